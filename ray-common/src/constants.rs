// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Constants matching `src/ray/common/constants.h`.

/// Length of Ray full-length UniqueIDs in bytes.
pub const UNIQUE_ID_SIZE: usize = 28;

/// Object index bit width.
pub const OBJECT_ID_INDEX_SIZE: usize = 32;

/// Ray version string.
pub const RAY_VERSION: &str = "3.0.0.dev0";

/// MessagePack offset for cross-language serialization.
///
/// Error payloads stored for failed tasks start with this many bytes
/// holding the msgpack-encoded length of the body that follows.
pub const MESSAGE_PACK_OFFSET: usize = 9;

/// Function name of the internal worker-termination actor task. Failures of
/// these tasks are expected during shutdown and are not logged.
pub const WORKER_TERMINATE_TASK_NAME: &str = "__ray_terminate__";
