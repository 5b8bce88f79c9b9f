// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Core worker logic for Ray.
//!
//! Replaces `src/ray/core_worker/`.
//! Tracks every task this worker submits from submission through completion
//! or terminal failure: the submissible-task table, the completion pipeline
//! that routes return objects, the retry policy, lineage retention for
//! object reconstruction, and drain-and-shutdown coordination. The
//! [`task_manager::TaskManager`] ties these together on top of the
//! [`reference_counter::ReferenceCounter`] and the in-process
//! [`memory_store::CoreWorkerMemoryStore`].

pub mod error;
pub mod memory_store;
pub mod reference_counter;
pub mod task_manager;
pub mod task_spec;
pub mod task_spec_builder;
