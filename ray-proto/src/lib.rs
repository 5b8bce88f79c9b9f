// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Protobuf message types for Ray.
//!
//! Hand-maintained prost definitions for the subset of `common.proto` and
//! `core_worker.proto` the worker-side task and object bookkeeping
//! exchanges: task specs, task replies, object references, and addresses.
//! Field numbers are part of the wire contract and must not be reused.

/// All Ray protobuf types organized by package.
pub mod ray {
    /// Main RPC types (package `ray.rpc`).
    pub mod rpc {
        use std::collections::HashMap;

        /// Language of a task's target function.
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum Language {
            Python = 0,
            Java = 1,
            Cpp = 2,
        }

        /// The type of a task.
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum TaskType {
            NormalTask = 0,
            ActorCreationTask = 1,
            ActorTask = 2,
            DriverTask = 3,
        }

        /// The reason a stored object is an error marker.
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum ErrorType {
            WorkerDied = 0,
            ActorDied = 1,
            ObjectUnreconstructable = 2,
            TaskExecutionException = 3,
            /// Sentinel metadata for a value that lives in the shared object
            /// store rather than in process.
            ObjectInPlasma = 4,
            TaskCancelled = 5,
            ActorCreationFailed = 6,
            RuntimeEnvSetupFailed = 7,
            ObjectLost = 8,
            OwnerDied = 9,
            ObjectDeleted = 10,
        }

        /// Network address of a worker, including the node it runs on.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Address {
            #[prost(bytes = "vec", tag = "1")]
            pub node_id: Vec<u8>,
            #[prost(string, tag = "2")]
            pub ip_address: String,
            #[prost(int32, tag = "3")]
            pub port: i32,
            #[prost(bytes = "vec", tag = "4")]
            pub worker_id: Vec<u8>,
        }

        /// A reference to an object: its ID, its owner, and where it was created.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ObjectReference {
            #[prost(bytes = "vec", tag = "1")]
            pub object_id: Vec<u8>,
            #[prost(message, optional, tag = "2")]
            pub owner_address: Option<Address>,
            #[prost(string, tag = "3")]
            pub call_site: String,
        }

        /// Borrow information reported for one object when a task finishes.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ObjectReferenceCount {
            #[prost(message, optional, tag = "1")]
            pub reference: Option<ObjectReference>,
            /// Whether the reporting worker still holds a local reference.
            #[prost(bool, tag = "2")]
            pub has_local_ref: bool,
            /// Downstream workers that now borrow the object.
            #[prost(message, repeated, tag = "3")]
            pub borrowers: Vec<Address>,
        }

        /// Descriptor of the remote function a task invokes.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct FunctionDescriptor {
            #[prost(string, tag = "1")]
            pub module_name: String,
            #[prost(string, tag = "2")]
            pub class_name: String,
            #[prost(string, tag = "3")]
            pub function_name: String,
        }

        /// One task argument, either by-reference or inlined.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct TaskArg {
            /// Set for by-reference arguments.
            #[prost(message, optional, tag = "1")]
            pub object_ref: Option<ObjectReference>,
            /// Serialized value for inlined arguments.
            #[prost(bytes = "vec", tag = "2")]
            pub data: Vec<u8>,
            #[prost(bytes = "vec", tag = "3")]
            pub metadata: Vec<u8>,
            /// References contained inside an inlined value.
            #[prost(message, repeated, tag = "4")]
            pub nested_inlined_refs: Vec<ObjectReference>,
        }

        /// Fields for an actor creation task.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ActorCreationTaskSpec {
            #[prost(bytes = "vec", tag = "1")]
            pub actor_id: Vec<u8>,
            #[prost(int64, tag = "2")]
            pub max_actor_restarts: i64,
            #[prost(int64, tag = "3")]
            pub max_task_retries: i64,
            #[prost(int32, tag = "4")]
            pub max_concurrency: i32,
            #[prost(bool, tag = "5")]
            pub is_detached: bool,
            #[prost(string, tag = "6")]
            pub name: String,
            #[prost(string, tag = "7")]
            pub ray_namespace: String,
        }

        /// Fields for a task targeting an existing actor.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ActorTaskSpec {
            #[prost(bytes = "vec", tag = "1")]
            pub actor_id: Vec<u8>,
            /// Dummy return object of the actor creation task; actor tasks
            /// depend on it so they cannot run before the actor exists.
            #[prost(bytes = "vec", tag = "2")]
            pub actor_creation_dummy_object_id: Vec<u8>,
            #[prost(uint64, tag = "3")]
            pub sequence_number: u64,
        }

        /// Immutable description of one task.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct TaskSpec {
            #[prost(enumeration = "TaskType", tag = "1")]
            pub r#type: i32,
            #[prost(enumeration = "Language", tag = "2")]
            pub language: i32,
            #[prost(message, optional, tag = "3")]
            pub function_descriptor: Option<FunctionDescriptor>,
            #[prost(bytes = "vec", tag = "4")]
            pub job_id: Vec<u8>,
            #[prost(bytes = "vec", tag = "5")]
            pub task_id: Vec<u8>,
            #[prost(bytes = "vec", tag = "6")]
            pub parent_task_id: Vec<u8>,
            #[prost(uint64, tag = "7")]
            pub parent_counter: u64,
            #[prost(bytes = "vec", tag = "8")]
            pub caller_id: Vec<u8>,
            #[prost(message, optional, tag = "9")]
            pub caller_address: Option<Address>,
            #[prost(message, repeated, tag = "10")]
            pub args: Vec<TaskArg>,
            #[prost(uint64, tag = "11")]
            pub num_returns: u64,
            #[prost(map = "string, double", tag = "12")]
            pub required_resources: HashMap<String, f64>,
            #[prost(string, tag = "13")]
            pub name: String,
            #[prost(message, optional, tag = "14")]
            pub actor_creation_task_spec: Option<ActorCreationTaskSpec>,
            #[prost(message, optional, tag = "15")]
            pub actor_task_spec: Option<ActorTaskSpec>,
            #[prost(int32, tag = "16")]
            pub max_retries: i32,
        }

        /// One return value of an executed task.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ReturnObject {
            #[prost(bytes = "vec", tag = "1")]
            pub object_id: Vec<u8>,
            /// Whether the value was placed in the shared object store
            /// instead of being returned inline.
            #[prost(bool, tag = "2")]
            pub in_plasma: bool,
            #[prost(bytes = "vec", tag = "3")]
            pub data: Vec<u8>,
            #[prost(bytes = "vec", tag = "4")]
            pub metadata: Vec<u8>,
            #[prost(message, repeated, tag = "5")]
            pub nested_inlined_refs: Vec<ObjectReference>,
            #[prost(int64, tag = "6")]
            pub size: i64,
        }

        /// Reply to a task pushed to a worker for execution.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct PushTaskReply {
            #[prost(message, repeated, tag = "1")]
            pub return_objects: Vec<ReturnObject>,
            /// Objects the executing worker (or its downstream borrowers)
            /// still borrows after the task returned.
            #[prost(message, repeated, tag = "2")]
            pub borrowed_refs: Vec<ObjectReferenceCount>,
        }

        /// A serialized application-level exception.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct RayException {
            #[prost(enumeration = "Language", tag = "1")]
            pub language: i32,
            #[prost(bytes = "vec", tag = "2")]
            pub serialized_exception: Vec<u8>,
            #[prost(string, tag = "3")]
            pub formatted_exception_string: String,
        }
    }
}

// Re-export the main namespace for convenience
pub use ray::rpc;
