// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Proto message builders matching C++ `test_utils.h` semantics.
//!
//! These generate realistic proto messages for use in tests.

use ray_common::id::{NodeID, ObjectID, WorkerID};
use ray_proto::ray::rpc;

/// Generate a worker Address on a random node, matching C++ `GenAddress`.
pub fn gen_address(ip_address: &str, port: i32) -> rpc::Address {
    rpc::Address {
        node_id: NodeID::from_random().binary(),
        ip_address: ip_address.to_string(),
        port,
        worker_id: WorkerID::from_random().binary(),
    }
}

/// Generate the Address of a worker on a specific node.
pub fn gen_address_on_node(node_id: &NodeID, ip_address: &str, port: i32) -> rpc::Address {
    rpc::Address {
        node_id: node_id.binary(),
        ip_address: ip_address.to_string(),
        port,
        worker_id: WorkerID::from_random().binary(),
    }
}

/// Generate a directly-returned object carrying the given data.
pub fn gen_return_object(object_id: &ObjectID, data: &[u8]) -> rpc::ReturnObject {
    rpc::ReturnObject {
        object_id: object_id.binary(),
        in_plasma: false,
        data: data.to_vec(),
        metadata: Vec::new(),
        nested_inlined_refs: Vec::new(),
        size: data.len() as i64,
    }
}

/// Generate a return object that was placed in the shared object store.
pub fn gen_plasma_return_object(object_id: &ObjectID, size: i64) -> rpc::ReturnObject {
    rpc::ReturnObject {
        object_id: object_id.binary(),
        in_plasma: true,
        data: Vec::new(),
        metadata: Vec::new(),
        nested_inlined_refs: Vec::new(),
        size,
    }
}

/// Generate a PushTaskReply with the given return objects and no borrows.
pub fn gen_push_task_reply(return_objects: Vec<rpc::ReturnObject>) -> rpc::PushTaskReply {
    rpc::PushTaskReply {
        return_objects,
        borrowed_refs: Vec::new(),
    }
}

/// Generate a RayException as an executing worker would report it.
pub fn gen_ray_exception(message: &str) -> rpc::RayException {
    rpc::RayException {
        language: rpc::Language::Python as i32,
        serialized_exception: message.as_bytes().to_vec(),
        formatted_exception_string: message.to_string(),
    }
}
