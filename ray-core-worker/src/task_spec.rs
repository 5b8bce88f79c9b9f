// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Typed wrapper around the `TaskSpec` protobuf message.
//!
//! Replaces `src/ray/common/task/task_spec.h/cc`. The wrapper decodes the
//! embedded IDs once per access and exposes the argument/return structure
//! the task manager consumes.

use std::fmt;

use ray_common::id::{JobID, ObjectID, TaskID};
use ray_proto::ray::rpc::{self, Language, TaskType};

/// An immutable task description.
///
/// Cheap to clone; holds only the underlying protobuf message.
#[derive(Clone, Default, PartialEq)]
pub struct TaskSpecification {
    message: rpc::TaskSpec,
}

impl TaskSpecification {
    pub fn new(message: rpc::TaskSpec) -> Self {
        Self { message }
    }

    /// The underlying protobuf message.
    pub fn message(&self) -> &rpc::TaskSpec {
        &self.message
    }

    pub fn task_id(&self) -> TaskID {
        if self.message.task_id.is_empty() {
            TaskID::nil()
        } else {
            TaskID::from_binary(&self.message.task_id)
        }
    }

    pub fn parent_task_id(&self) -> TaskID {
        if self.message.parent_task_id.is_empty() {
            TaskID::nil()
        } else {
            TaskID::from_binary(&self.message.parent_task_id)
        }
    }

    pub fn job_id(&self) -> JobID {
        if self.message.job_id.is_empty() {
            JobID::nil()
        } else {
            JobID::from_binary(&self.message.job_id)
        }
    }

    pub fn name(&self) -> &str {
        &self.message.name
    }

    pub fn task_type(&self) -> TaskType {
        TaskType::try_from(self.message.r#type).unwrap_or(TaskType::NormalTask)
    }

    pub fn is_normal_task(&self) -> bool {
        self.task_type() == TaskType::NormalTask
    }

    pub fn is_actor_creation_task(&self) -> bool {
        self.task_type() == TaskType::ActorCreationTask
    }

    pub fn is_actor_task(&self) -> bool {
        self.task_type() == TaskType::ActorTask
    }

    pub fn num_args(&self) -> usize {
        self.message.args.len()
    }

    /// Whether argument `i` is passed by reference.
    pub fn arg_by_ref(&self, i: usize) -> bool {
        self.message.args[i].object_ref.is_some()
    }

    /// The object ID of by-reference argument `i`. Panics if the argument
    /// is inlined; callers must check [`Self::arg_by_ref`] first.
    pub fn arg_id(&self, i: usize) -> ObjectID {
        let object_ref = self.message.args[i]
            .object_ref
            .as_ref()
            .expect("argument is not passed by reference");
        ObjectID::from_binary(&object_ref.object_id)
    }

    /// References contained inside inlined argument `i`.
    pub fn arg_inlined_refs(&self, i: usize) -> &[rpc::ObjectReference] {
        &self.message.args[i].nested_inlined_refs
    }

    pub fn num_returns(&self) -> usize {
        self.message.num_returns as usize
    }

    /// The object ID of return value `i` (stored at object index `i + 1`).
    pub fn return_id(&self, i: usize) -> ObjectID {
        ObjectID::from_index(&self.task_id(), (i + 1) as u32)
    }

    /// The dummy return object of the actor creation task this actor task
    /// depends on. Panics for non-actor tasks.
    pub fn actor_creation_dummy_object_id(&self) -> ObjectID {
        let actor_task_spec = self
            .message
            .actor_task_spec
            .as_ref()
            .expect("not an actor task");
        ObjectID::from_binary(&actor_task_spec.actor_creation_dummy_object_id)
    }

    /// The object IDs this task depends on: by-reference argument IDs plus
    /// the references contained in inlined arguments, in argument order.
    /// Does not include the actor creation dummy object.
    pub fn dependency_ids(&self) -> Vec<ObjectID> {
        let mut deps = Vec::new();
        for (i, arg) in self.message.args.iter().enumerate() {
            if arg.object_ref.is_some() {
                deps.push(self.arg_id(i));
            } else {
                for inlined_ref in &arg.nested_inlined_refs {
                    deps.push(ObjectID::from_binary(&inlined_ref.object_id));
                }
            }
        }
        deps
    }

    /// Human-readable one-line summary, used in failure logs.
    pub fn debug_string(&self) -> String {
        let language = Language::try_from(self.message.language).unwrap_or(Language::Python);
        let function = self
            .message
            .function_descriptor
            .as_ref()
            .map(|f| f.function_name.as_str())
            .unwrap_or_default();
        format!(
            "Type={:?}, Language={:?}, function={}, task_name={}, task_id={}, job_id={}, num_args={}, num_returns={}",
            self.task_type(),
            language,
            function,
            self.message.name,
            self.task_id(),
            self.job_id(),
            self.num_args(),
            self.num_returns(),
        )
    }
}

impl From<rpc::TaskSpec> for TaskSpecification {
    fn from(message: rpc::TaskSpec) -> Self {
        Self::new(message)
    }
}

impl fmt::Debug for TaskSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskSpecification({})", self.debug_string())
    }
}
