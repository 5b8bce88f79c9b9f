// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Core worker error types.
//!
//! Invariant violations abort via panic and `resubmit_task` surfaces a
//! `ray_common::status::RayError`; the only operational error this crate
//! reports itself is a store wait that ran out of time.

/// Errors specific to the core worker.
#[derive(Debug, thiserror::Error)]
pub enum CoreWorkerError {
    #[error("operation timed out: {0}")]
    TimedOut(String),
}

/// Result type alias for core worker operations.
pub type CoreWorkerResult<T> = Result<T, CoreWorkerError>;
