// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Builder pattern for constructing task specifications.

use ray_common::id::{ActorID, JobID, ObjectID, TaskID};
use ray_proto::ray::rpc::{
    self, ActorCreationTaskSpec, ActorTaskSpec, Address, FunctionDescriptor, Language, TaskArg,
    TaskSpec,
};

use crate::task_spec::TaskSpecification;

/// Builder for constructing a [`TaskSpecification`].
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::default(),
        }
    }

    /// Set common fields shared by all task types.
    #[allow(clippy::too_many_arguments)]
    pub fn set_common_task_spec(
        &mut self,
        task_id: &TaskID,
        name: String,
        language: Language,
        function_descriptor: FunctionDescriptor,
        job_id: &JobID,
        parent_task_id: &TaskID,
        parent_counter: u64,
        caller_id: Vec<u8>,
        caller_address: Address,
        num_returns: u64,
    ) -> &mut Self {
        self.spec.task_id = task_id.binary();
        self.spec.name = name;
        self.spec.language = language as i32;
        self.spec.function_descriptor = Some(function_descriptor);
        self.spec.job_id = job_id.binary();
        self.spec.parent_task_id = parent_task_id.binary();
        self.spec.parent_counter = parent_counter;
        self.spec.caller_id = caller_id;
        self.spec.caller_address = Some(caller_address);
        self.spec.num_returns = num_returns;
        self
    }

    /// Configure as a normal (non-actor) task.
    pub fn set_normal_task_spec(&mut self, max_retries: i32) -> &mut Self {
        self.spec.r#type = rpc::TaskType::NormalTask as i32;
        self.spec.max_retries = max_retries;
        self
    }

    /// Configure as an actor creation task.
    #[allow(clippy::too_many_arguments)]
    pub fn set_actor_creation_task_spec(
        &mut self,
        actor_id: &ActorID,
        max_restarts: i64,
        max_task_retries: i64,
        max_concurrency: i32,
        is_detached: bool,
        name: String,
        ray_namespace: String,
    ) -> &mut Self {
        self.spec.r#type = rpc::TaskType::ActorCreationTask as i32;
        self.spec.actor_creation_task_spec = Some(ActorCreationTaskSpec {
            actor_id: actor_id.binary(),
            max_actor_restarts: max_restarts,
            max_task_retries,
            max_concurrency,
            is_detached,
            name,
            ray_namespace,
        });
        self
    }

    /// Configure as an actor task.
    pub fn set_actor_task_spec(
        &mut self,
        actor_id: &ActorID,
        actor_creation_dummy_object_id: &ObjectID,
        sequence_number: u64,
    ) -> &mut Self {
        self.spec.r#type = rpc::TaskType::ActorTask as i32;
        self.spec.actor_task_spec = Some(ActorTaskSpec {
            actor_id: actor_id.binary(),
            actor_creation_dummy_object_id: actor_creation_dummy_object_id.binary(),
            sequence_number,
        });
        self
    }

    /// Add a by-reference argument.
    pub fn add_by_ref_arg(&mut self, object_id: &ObjectID) -> &mut Self {
        self.spec.args.push(TaskArg {
            object_ref: Some(rpc::ObjectReference {
                object_id: object_id.binary(),
                owner_address: None,
                call_site: String::new(),
            }),
            ..Default::default()
        });
        self
    }

    /// Add an inlined argument carrying serialized data and the references
    /// nested inside it.
    pub fn add_inlined_arg(&mut self, data: Vec<u8>, nested_ids: &[ObjectID]) -> &mut Self {
        self.spec.args.push(TaskArg {
            object_ref: None,
            data,
            metadata: Vec::new(),
            nested_inlined_refs: nested_ids
                .iter()
                .map(|id| rpc::ObjectReference {
                    object_id: id.binary(),
                    owner_address: None,
                    call_site: String::new(),
                })
                .collect(),
        });
        self
    }

    /// Build the final [`TaskSpecification`].
    pub fn build(self) -> TaskSpecification {
        TaskSpecification::new(self.spec)
    }
}

impl Default for TaskSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}
