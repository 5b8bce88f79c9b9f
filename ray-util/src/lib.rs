// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Utility library for Ray.
//!
//! Provides logging, time, randomness, and backoff utilities shared by the
//! worker-side crates.

pub mod backoff;
pub mod logging;
pub mod random;
pub mod time;
