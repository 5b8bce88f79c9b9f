// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Random ID generators for Ray entity types.

use ray_common::id::*;

/// Create a random JobID for testing.
pub fn random_job_id() -> JobID {
    JobID::from_int(rand::random::<u16>() as u32 + 1)
}

/// Create a random ActorID for testing.
pub fn random_actor_id() -> ActorID {
    let job_id = random_job_id();
    let task_id = TaskID::from_random();
    ActorID::of(&job_id, &task_id, rand::random::<usize>())
}

/// Create a random TaskID for testing.
pub fn random_task_id() -> TaskID {
    TaskID::from_random()
}

/// Create a random NodeID for testing.
pub fn random_node_id() -> NodeID {
    NodeID::from_random()
}

/// Create a random WorkerID for testing.
pub fn random_worker_id() -> WorkerID {
    WorkerID::from_random()
}

/// Create a random ObjectID for testing.
pub fn random_object_id() -> ObjectID {
    let task_id = random_task_id();
    ObjectID::from_index(&task_id, rand::random::<u16>() as u32 + 1)
}
