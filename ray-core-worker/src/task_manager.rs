// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Task lifecycle management for the core worker.
//!
//! Replaces `src/ray/core_worker/task_manager.h/cc`.
//!
//! Tracks every submitted task until it completes or fails terminally,
//! routes returned objects into the in-process store or the shared object
//! store, decides retries, and retains the specs of finished tasks whose
//! plasma returns are still in scope so lost objects can be reconstructed
//! by re-execution.
//!
//! All mutable state lives behind a single mutex. The mutex is never held
//! across calls into the reference counter, the stores, or any callback;
//! callbacks are free to re-enter the manager.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;

use ray_common::constants::{MESSAGE_PACK_OFFSET, WORKER_TERMINATE_TASK_NAME};
use ray_common::id::{NodeID, ObjectID, TaskID};
use ray_common::status::{RayError, RayResult};
use ray_proto::ray::rpc::{self, ErrorType};
use ray_util::time::current_time_ms;

use crate::memory_store::{CoreWorkerMemoryStore, RayObject};
use crate::reference_counter::ReferenceCounter;
use crate::task_spec::TaskSpecification;

// Start throttling task failure logs once this many have been emitted.
const TASK_FAILURE_THROTTLING_THRESHOLD: u64 = 50;

// Throttle task failure logs to once this interval.
const TASK_FAILURE_LOGGING_FREQUENCY_MILLIS: u64 = 5000;

/// Resubmit a task, either immediately (`delay == false`) or on the
/// caller's backoff schedule (`delay == true`).
pub type RetryTaskCallback = Box<dyn Fn(&TaskSpecification, bool) + Send + Sync>;

/// Trigger recovery of an object whose plasma copy was lost.
pub type ReconstructObjectCallback = Box<dyn Fn(&ObjectID) + Send + Sync>;

/// Place an object into the shared object store on the local node.
pub type PutInLocalPlasmaCallback = Box<dyn Fn(&RayObject, &ObjectID) + Send + Sync>;

/// Whether the given node is currently alive.
pub type CheckNodeAliveCallback = Box<dyn Fn(&NodeID) -> bool + Send + Sync>;

/// Invoked once all in-flight tasks have drained after `drain_and_shutdown`.
pub type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Per-task record in the submissible-task table.
struct TaskEntry {
    /// The immutable task description, kept for retries and reconstruction.
    spec: TaskSpecification,
    /// Retries remaining; -1 means unbounded. Clamped at 0 once finite.
    num_retries_left: i32,
    /// True while the task is submitted and awaiting a reply.
    pending: bool,
    num_successful_executions: usize,
    /// Return objects that were stored in plasma on the first successful
    /// execution and are still in scope somewhere in the cluster. While
    /// nonempty (and retries remain), the spec is retained so these can be
    /// recomputed.
    reconstructable_return_ids: HashSet<ObjectID>,
}

impl TaskEntry {
    fn new(spec: TaskSpecification, num_retries_left: i32, num_returns: usize) -> Self {
        let reconstructable_return_ids = (0..num_returns).map(|i| spec.return_id(i)).collect();
        Self {
            spec,
            num_retries_left,
            pending: true,
            num_successful_executions: 0,
            reconstructable_return_ids,
        }
    }
}

/// Decision whether to emit one rate-limited task failure log.
enum LogDecision {
    Skip,
    Log { announce_throttling: bool },
}

/// Rate limiter for terminal task failure logs: the first
/// `TASK_FAILURE_THROTTLING_THRESHOLD` failures log freely, afterwards at
/// most one log per `TASK_FAILURE_LOGGING_FREQUENCY_MILLIS`.
struct FailureLogThrottle {
    num_failure_logs: u64,
    last_log_time_ms: u64,
}

impl FailureLogThrottle {
    fn new() -> Self {
        Self {
            num_failure_logs: 0,
            last_log_time_ms: 0,
        }
    }

    fn decide(&mut self, now_ms: u64) -> LogDecision {
        if self.num_failure_logs < TASK_FAILURE_THROTTLING_THRESHOLD
            || now_ms.saturating_sub(self.last_log_time_ms) > TASK_FAILURE_LOGGING_FREQUENCY_MILLIS
        {
            let announce_throttling = self.num_failure_logs == TASK_FAILURE_THROTTLING_THRESHOLD;
            self.num_failure_logs += 1;
            self.last_log_time_ms = now_ms;
            LogDecision::Log {
                announce_throttling,
            }
        } else {
            LogDecision::Skip
        }
    }
}

/// Mutable manager state, serialized by one mutex.
struct TaskManagerState {
    /// All tasks this worker may resubmit: pending tasks plus finished
    /// tasks retained for reconstruction.
    submissible_tasks: HashMap<TaskID, TaskEntry>,
    /// Invariant: equals the number of entries with `pending == true`.
    num_pending_tasks: usize,
    /// Armed by `drain_and_shutdown` while tasks are in flight.
    shutdown_hook: Option<ShutdownHook>,
    failure_log_throttle: FailureLogThrottle,
}

/// Tracks in-flight tasks: their completion, failure handling, retries,
/// and the lineage needed to reconstruct lost return objects.
pub struct TaskManager {
    in_memory_store: Arc<CoreWorkerMemoryStore>,
    reference_counter: Arc<ReferenceCounter>,
    put_in_local_plasma_callback: PutInLocalPlasmaCallback,
    retry_task_callback: RetryTaskCallback,
    check_node_alive: CheckNodeAliveCallback,
    reconstruct_object_callback: ReconstructObjectCallback,
    state: Mutex<TaskManagerState>,
}

impl TaskManager {
    pub fn new(
        in_memory_store: Arc<CoreWorkerMemoryStore>,
        reference_counter: Arc<ReferenceCounter>,
        put_in_local_plasma_callback: PutInLocalPlasmaCallback,
        retry_task_callback: RetryTaskCallback,
        check_node_alive: CheckNodeAliveCallback,
        reconstruct_object_callback: ReconstructObjectCallback,
    ) -> Self {
        Self {
            in_memory_store,
            reference_counter,
            put_in_local_plasma_callback,
            retry_task_callback,
            check_node_alive,
            reconstruct_object_callback,
            state: Mutex::new(TaskManagerState {
                submissible_tasks: HashMap::new(),
                num_pending_tasks: 0,
                shutdown_hook: None,
                failure_log_throttle: FailureLogThrottle::new(),
            }),
        }
    }

    /// Register a newly submitted task. Adds borrow counts for the task's
    /// dependencies, registers ownership of its return objects, and inserts
    /// the pending entry. Returns references to the return objects.
    pub fn add_pending_task(
        &self,
        caller_address: &rpc::Address,
        spec: &TaskSpecification,
        call_site: &str,
        max_retries: i32,
    ) -> Vec<rpc::ObjectReference> {
        tracing::debug!(task_id = %spec.task_id(), max_retries, "adding pending task");

        // Add references for the dependencies to the task.
        let mut task_deps = spec.dependency_ids();
        if spec.is_actor_task() {
            task_deps.push(spec.actor_creation_dummy_object_id());
        }
        self.reference_counter
            .update_submitted_task_references(&task_deps, &[]);

        // Add new owned objects for the return values of the task. For
        // actor tasks the last declared return is reserved internally.
        let mut num_returns = spec.num_returns();
        if spec.is_actor_task() {
            num_returns -= 1;
        }
        let mut returned_refs = Vec::with_capacity(num_returns);
        for i in 0..num_returns {
            if !spec.is_actor_creation_task() {
                let is_reconstructable = max_retries != 0;
                // We do not know the values nested inside the return yet;
                // the worker reports them in its reply.
                self.reference_counter.add_owned_object(
                    spec.return_id(i),
                    vec![],
                    caller_address.clone(),
                    call_site,
                    -1,
                    is_reconstructable,
                );
            }

            returned_refs.push(rpc::ObjectReference {
                object_id: spec.return_id(i).binary(),
                owner_address: Some(caller_address.clone()),
                call_site: call_site.to_string(),
            });
        }

        {
            let mut state = self.state.lock();
            match state.submissible_tasks.entry(spec.task_id()) {
                Entry::Occupied(_) => panic!(
                    "task {} is already in the submissible task table",
                    spec.task_id()
                ),
                Entry::Vacant(slot) => {
                    slot.insert(TaskEntry::new(spec.clone(), max_retries, num_returns));
                }
            }
            state.num_pending_tasks += 1;
        }

        returned_refs
    }

    /// Resubmit a finished task whose spec is retained, to reconstruct a
    /// lost return object. A task that is already pending is left alone.
    /// Returns the task's dependency IDs, whose borrow counts have been
    /// re-added.
    pub fn resubmit_task(&self, task_id: &TaskID) -> RayResult<Vec<ObjectID>> {
        let mut resubmit_spec = None;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = state
                .submissible_tasks
                .get_mut(task_id)
                .ok_or_else(|| RayError::invalid("Task spec missing"))?;
            if !entry.pending {
                entry.pending = true;
                // A retained task may be resubmitted with zero retries left
                // when reconstructing its returns; the counter stays at 0.
                if entry.num_retries_left > 0 {
                    entry.num_retries_left -= 1;
                }
                resubmit_spec = Some(entry.spec.clone());
                state.num_pending_tasks += 1;
            }
        }

        let Some(spec) = resubmit_spec else {
            return Ok(Vec::new());
        };

        let task_deps = spec.dependency_ids();
        if !task_deps.is_empty() {
            self.reference_counter
                .update_resubmitted_task_references(&task_deps);
        }
        if spec.is_actor_task() {
            self.reference_counter
                .update_resubmitted_task_references(&[spec.actor_creation_dummy_object_id()]);
        }

        (self.retry_task_callback)(&spec, /*delay=*/ false);

        Ok(task_deps)
    }

    /// Wait for all pending tasks to finish, then invoke `shutdown`. If no
    /// task is in flight, the callback runs immediately.
    pub fn drain_and_shutdown(&self, shutdown: ShutdownHook) {
        let mut shutdown = Some(shutdown);
        {
            let mut state = self.state.lock();
            if state.num_pending_tasks > 0 {
                tracing::warn!(
                    num_in_flight = state.submissible_tasks.len(),
                    "this worker is still managing in flight tasks, waiting for them to finish \
                     before shutting down"
                );
                state.shutdown_hook = shutdown.take();
            }
        }

        // Do not hold the lock when calling callbacks.
        if let Some(hook) = shutdown {
            hook();
        }
    }

    pub fn is_task_submissible(&self, task_id: &TaskID) -> bool {
        self.state.lock().submissible_tasks.contains_key(task_id)
    }

    pub fn is_task_pending(&self, task_id: &TaskID) -> bool {
        self.state
            .lock()
            .submissible_tasks
            .get(task_id)
            .is_some_and(|entry| entry.pending)
    }

    pub fn num_submissible_tasks(&self) -> usize {
        self.state.lock().submissible_tasks.len()
    }

    pub fn num_pending_tasks(&self) -> usize {
        self.state.lock().num_pending_tasks
    }

    /// Process a successful task reply: route every return object, then
    /// either retain the entry for possible reconstruction or release its
    /// lineage.
    pub fn complete_pending_task(
        &self,
        task_id: &TaskID,
        reply: &rpc::PushTaskReply,
        worker_addr: &rpc::Address,
    ) {
        tracing::debug!(task_id = %task_id, "completing task");

        // Objects that were stored in plasma upon the first successful
        // execution of this task get stored in plasma again on
        // re-execution, even if the worker returned them directly, so that
        // pre-existing reference holders can still fetch them from there.
        let store_in_plasma_ids: HashSet<ObjectID> = {
            let state = self.state.lock();
            let Some(entry) = state.submissible_tasks.get(task_id) else {
                panic!("tried to complete task that was not pending {task_id}");
            };
            if entry.num_successful_executions > 0 {
                entry.reconstructable_return_ids.clone()
            } else {
                HashSet::new()
            }
        };

        let mut direct_return_ids = Vec::new();
        for return_object in &reply.return_objects {
            let object_id = ObjectID::from_binary(&return_object.object_id);
            self.reference_counter
                .update_object_size(&object_id, return_object.size);
            tracing::debug!(object_id = %object_id, size = return_object.size, "task return object");

            let nested_ids: Vec<ObjectID> = return_object
                .nested_inlined_refs
                .iter()
                .map(|nested_ref| ObjectID::from_binary(&nested_ref.object_id))
                .collect();

            if return_object.in_plasma {
                let pinned_at_node_id = NodeID::from_binary(&worker_addr.node_id);
                if (self.check_node_alive)(&pinned_at_node_id) {
                    self.reference_counter
                        .update_object_pinned_at_raylet(&object_id, pinned_at_node_id);
                    // Mark the value as living in plasma with a placeholder.
                    self.in_memory_store
                        .put(object_id, RayObject::from_error(ErrorType::ObjectInPlasma));
                } else {
                    tracing::debug!(
                        task_id = %task_id,
                        object_id = %object_id,
                        "task returned object in plasma on a dead node, attempting to recover"
                    );
                    (self.reconstruct_object_callback)(&object_id);
                }
            } else {
                // A direct return promoted to plasma keeps no pinned node
                // record; the pinned copy is local, so the object
                // fate-shares with this node.
                let object = RayObject::new(
                    Bytes::copy_from_slice(&return_object.data),
                    Bytes::copy_from_slice(&return_object.metadata),
                    nested_ids.clone(),
                );
                if store_in_plasma_ids.contains(&object_id) {
                    (self.put_in_local_plasma_callback)(&object, &object_id);
                } else if self.in_memory_store.put(object_id, object) {
                    direct_return_ids.push(object_id);
                }
            }

            if !nested_ids.is_empty() {
                if let Some(owner_address) = self.reference_counter.get_owner(&object_id) {
                    self.reference_counter.add_nested_object_ids(
                        &object_id,
                        &nested_ids,
                        &owner_address,
                    );
                }
            }
        }

        let spec;
        let mut release_lineage = true;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.submissible_tasks.get_mut(task_id) else {
                panic!("tried to complete task that was not pending {task_id}");
            };
            spec = entry.spec.clone();

            // Release the lineage for any non-plasma return objects.
            for direct_return_id in &direct_return_ids {
                entry.reconstructable_return_ids.remove(direct_return_id);
            }
            tracing::debug!(
                task_id = %task_id,
                plasma_returns_in_scope = entry.reconstructable_return_ids.len(),
                "task completed"
            );
            entry.num_successful_executions += 1;

            entry.pending = false;
            state.num_pending_tasks -= 1;

            // A finished task can only be re-executed if it has some number
            // of retries left and returned at least one object that is
            // still in use and stored in plasma.
            let task_retryable =
                entry.num_retries_left != 0 && !entry.reconstructable_return_ids.is_empty();
            if task_retryable {
                // Pin the task spec in case it gets retried again.
                release_lineage = false;
            } else {
                state.submissible_tasks.remove(task_id);
            }
        }

        self.remove_finished_task_references(
            &spec,
            release_lineage,
            worker_addr,
            &reply.borrowed_refs,
        );

        self.shutdown_if_needed();
    }

    /// If the task has retries left, arrange a delayed resubmission and
    /// return true. Decrements the retry counter unless it is unbounded.
    pub fn retry_task_if_possible(&self, task_id: &TaskID) -> bool {
        let num_retries_left;
        let spec;
        {
            let mut state = self.state.lock();
            let Some(entry) = state.submissible_tasks.get_mut(task_id) else {
                panic!("tried to retry task that was not pending {task_id}");
            };
            assert!(
                entry.pending,
                "tried to retry task that was not pending {task_id}"
            );
            spec = entry.spec.clone();
            num_retries_left = entry.num_retries_left;
            if num_retries_left > 0 {
                entry.num_retries_left -= 1;
            } else {
                assert!(num_retries_left == 0 || num_retries_left == -1);
            }
        }

        // Do not hold the lock during the callback; it may re-enter.
        if num_retries_left != 0 {
            let retries = if num_retries_left == -1 {
                "infinite".to_string()
            } else {
                num_retries_left.to_string()
            };
            tracing::info!(
                task_id = %spec.task_id(),
                retries_left = %retries,
                "attempting to resubmit failed task"
            );
            (self.retry_task_callback)(&spec, /*delay=*/ true);
            true
        } else {
            false
        }
    }

    /// Handle a failed pending task: retry it if possible, otherwise remove
    /// it, release its references, and store error objects for its returns.
    /// Returns whether the task will be retried.
    pub fn pending_task_failed(
        &self,
        task_id: &TaskID,
        error_type: ErrorType,
        status: Option<&RayError>,
        creation_task_exception: Option<&rpc::RayException>,
        immediately_mark_object_fail: bool,
    ) -> bool {
        // This might be the __ray_terminate__ task, so don't log loudly.
        tracing::debug!(task_id = %task_id, error_type = ?error_type, "task failed");
        let will_retry = self.retry_task_if_possible(task_id);
        let release_lineage = !will_retry;
        let spec;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.submissible_tasks.get(task_id) else {
                panic!("tried to fail task that was not pending {task_id}");
            };
            assert!(
                entry.pending,
                "tried to fail task that was not pending {task_id}"
            );
            spec = entry.spec.clone();
            if !will_retry {
                state.submissible_tasks.remove(task_id);
                state.num_pending_tasks -= 1;
            }
        }

        if !will_retry {
            self.log_task_failure_throttled(&spec, status);
            // The worker failed to execute the task, so it cannot be
            // borrowing any objects.
            self.remove_finished_task_references(
                &spec,
                release_lineage,
                &rpc::Address::default(),
                &[],
            );
            if immediately_mark_object_fail {
                self.mark_pending_task_failed(&spec, error_type, creation_task_exception);
            }
        }

        self.shutdown_if_needed();

        will_retry
    }

    /// Store an error object for each of the task's declared return IDs so
    /// anyone waiting on them unblocks. If a creation-task exception is
    /// supplied, its serialized form is stored as the error payload.
    pub fn mark_pending_task_failed(
        &self,
        spec: &TaskSpecification,
        error_type: ErrorType,
        creation_task_exception: Option<&rpc::RayException>,
    ) {
        let task_id = spec.task_id();
        tracing::debug!(task_id = %task_id, error_type = ?error_type, "treating task as failed");
        for i in 0..spec.num_returns() {
            let object_id = ObjectID::from_index(&task_id, (i + 1) as u32);
            let error = match creation_task_exception {
                Some(exception) => RayObject::from_error_with_data(
                    error_type,
                    wrap_exception_payload(exception),
                ),
                None => RayObject::from_error(error_type),
            };
            self.in_memory_store.put(object_id, error);
        }
    }

    /// Prevent any further retries of the task. Returns whether the task
    /// was found.
    pub fn mark_task_canceled(&self, task_id: &TaskID) -> bool {
        let mut state = self.state.lock();
        match state.submissible_tasks.get_mut(task_id) {
            Some(entry) => {
                entry.num_retries_left = 0;
                true
            }
            None => false,
        }
    }

    pub fn get_task_spec(&self, task_id: &TaskID) -> Option<TaskSpecification> {
        self.state
            .lock()
            .submissible_tasks
            .get(task_id)
            .map(|entry| entry.spec.clone())
    }

    /// IDs of all pending tasks whose parent is `parent_task_id`.
    pub fn get_pending_children_tasks(&self, parent_task_id: &TaskID) -> Vec<TaskID> {
        self.state
            .lock()
            .submissible_tasks
            .iter()
            .filter(|(_, entry)| entry.pending && entry.spec.parent_task_id() == *parent_task_id)
            .map(|(task_id, _)| *task_id)
            .collect()
    }

    /// The scheduler inlined some task arguments: the contained IDs take
    /// over the borrows of the inlined dependencies.
    pub fn on_task_dependencies_inlined(
        &self,
        inlined_dependency_ids: &[ObjectID],
        contained_ids: &[ObjectID],
    ) {
        let deleted = self
            .reference_counter
            .update_submitted_task_references(contained_ids, inlined_dependency_ids);
        self.in_memory_store.delete(&deleted);
    }

    /// A return object of a finished task went out of scope everywhere in
    /// the cluster. Once the task has no reconstructable returns left, its
    /// entry is dropped and its argument IDs are returned so the caller can
    /// cascade the lineage release upstream.
    pub fn remove_lineage_reference(&self, object_id: &ObjectID) -> Vec<ObjectID> {
        let mut state = self.state.lock();
        let task_id = object_id.task_id();
        let mut released_objects = Vec::new();

        let Some(entry) = state.submissible_tasks.get_mut(&task_id) else {
            tracing::debug!(object_id = %object_id, "no lineage for object");
            return released_objects;
        };

        entry.reconstructable_return_ids.remove(object_id);
        tracing::debug!(
            task_id = %task_id,
            object_id = %object_id,
            plasma_returns_in_scope = entry.reconstructable_return_ids.len(),
            "plasma object out of scope"
        );

        if entry.reconstructable_return_ids.is_empty() && !entry.pending {
            // The task finished and none of its return IDs are in scope
            // anymore, so the spec can go; its arguments lose their lineage
            // refs.
            released_objects = entry.spec.dependency_ids();
            state.submissible_tasks.remove(&task_id);
        }

        released_objects
    }

    /// Drop the borrow counts a finished task held on its dependencies and
    /// delete any objects that went out of scope as a consequence.
    fn remove_finished_task_references(
        &self,
        spec: &TaskSpecification,
        release_lineage: bool,
        borrower_addr: &rpc::Address,
        borrowed_refs: &[rpc::ObjectReferenceCount],
    ) {
        let mut plasma_dependencies = spec.dependency_ids();
        if spec.is_actor_task() {
            plasma_dependencies.push(spec.actor_creation_dummy_object_id());
        }

        let deleted = self.reference_counter.update_finished_task_references(
            &plasma_dependencies,
            release_lineage,
            borrower_addr,
            borrowed_refs,
        );
        self.in_memory_store.delete(&deleted);
    }

    /// Run the armed shutdown hook once no task is pending. Called at the
    /// tail of every completion and terminal-failure path.
    fn shutdown_if_needed(&self) {
        let shutdown_hook = {
            let mut state = self.state.lock();
            if state.num_pending_tasks == 0 {
                state.shutdown_hook.take()
            } else {
                None
            }
        };
        // Do not hold the lock when calling callbacks.
        if let Some(hook) = shutdown_hook {
            tracing::warn!(
                "all in flight tasks finished, worker will shut down after draining references"
            );
            hook();
        }
    }

    /// Rate-limited logging of terminal task failures. Internal
    /// worker-termination tasks are noisy on shutdown and skipped.
    fn log_task_failure_throttled(&self, spec: &TaskSpecification, status: Option<&RayError>) {
        let debug_str = spec.debug_string();
        if debug_str.contains(WORKER_TERMINATE_TASK_NAME) {
            return;
        }
        let decision = {
            let mut state = self.state.lock();
            state.failure_log_throttle.decide(current_time_ms())
        };
        match decision {
            LogDecision::Skip => {}
            LogDecision::Log {
                announce_throttling,
            } => {
                if announce_throttling {
                    tracing::warn!(
                        "too many failure logs, throttling to once every {} millis",
                        TASK_FAILURE_LOGGING_FREQUENCY_MILLIS
                    );
                }
                match status {
                    Some(status) => tracing::info!(error = %status, "task failed: {debug_str}"),
                    None => tracing::info!("task failed: {debug_str}"),
                }
            }
        }
    }

    #[cfg(test)]
    fn failure_log_count(&self) -> u64 {
        self.state.lock().failure_log_throttle.num_failure_logs
    }
}

/// Serialize an exception into the cross-language error payload layout:
/// a fixed `MESSAGE_PACK_OFFSET`-byte header holding the msgpack-encoded
/// length of the body, then the body, a msgpack bin wrapping the
/// exception's serialized bytes.
fn wrap_exception_payload(exception: &rpc::RayException) -> Bytes {
    let serialized = exception.encode_to_vec();

    let mut body = Vec::with_capacity(serialized.len() + 5);
    rmp::encode::write_bin(&mut body, &serialized).expect("msgpack encoding to a Vec");

    let mut offset_encoding = Vec::with_capacity(MESSAGE_PACK_OFFSET);
    rmp::encode::write_uint(&mut offset_encoding, body.len() as u64)
        .expect("msgpack encoding to a Vec");

    let mut payload = vec![0u8; MESSAGE_PACK_OFFSET + body.len()];
    payload[..offset_encoding.len()].copy_from_slice(&offset_encoding);
    payload[MESSAGE_PACK_OFFSET..].copy_from_slice(&body);
    Bytes::from(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;

    use ray_common::id::{ActorID, JobID};
    use ray_proto::ray::rpc::{FunctionDescriptor, Language};

    use crate::task_spec_builder::TaskSpecBuilder;

    // ── Harness ──────────────────────────────────────────────────────

    struct TestManager {
        manager: Arc<TaskManager>,
        store: Arc<CoreWorkerMemoryStore>,
        reference_counter: Arc<ReferenceCounter>,
        /// (task_id, delay) per retry callback invocation.
        retried: Arc<Mutex<Vec<(TaskID, bool)>>>,
        reconstructed: Arc<Mutex<Vec<ObjectID>>>,
        plasma_puts: Arc<Mutex<Vec<ObjectID>>>,
        node_alive: Arc<AtomicBool>,
    }

    fn make_manager() -> TestManager {
        let store = Arc::new(CoreWorkerMemoryStore::new());
        let reference_counter = Arc::new(ReferenceCounter::new());
        let retried = Arc::new(Mutex::new(Vec::new()));
        let reconstructed = Arc::new(Mutex::new(Vec::new()));
        let plasma_puts = Arc::new(Mutex::new(Vec::new()));
        let node_alive = Arc::new(AtomicBool::new(true));

        let plasma_puts_cb = plasma_puts.clone();
        let retried_cb = retried.clone();
        let node_alive_cb = node_alive.clone();
        let reconstructed_cb = reconstructed.clone();
        let manager = Arc::new(TaskManager::new(
            store.clone(),
            reference_counter.clone(),
            Box::new(move |_object, object_id| plasma_puts_cb.lock().push(*object_id)),
            Box::new(move |spec, delay| retried_cb.lock().push((spec.task_id(), delay))),
            Box::new(move |_node_id| node_alive_cb.load(Ordering::SeqCst)),
            Box::new(move |object_id| reconstructed_cb.lock().push(*object_id)),
        ));

        TestManager {
            manager,
            store,
            reference_counter,
            retried,
            reconstructed,
            plasma_puts,
            node_alive,
        }
    }

    fn caller_address() -> rpc::Address {
        rpc::Address {
            node_id: vec![7u8; 28],
            ip_address: "127.0.0.1".to_string(),
            port: 1234,
            worker_id: vec![8u8; 28],
        }
    }

    fn worker_address(node_id: &NodeID) -> rpc::Address {
        rpc::Address {
            node_id: node_id.binary(),
            ip_address: "10.0.0.1".to_string(),
            port: 5000,
            worker_id: vec![9u8; 28],
        }
    }

    fn make_task_spec_with_parent(
        num_returns: u64,
        deps: &[ObjectID],
        parent_task_id: &TaskID,
    ) -> TaskSpecification {
        let mut builder = TaskSpecBuilder::new();
        builder
            .set_common_task_spec(
                &TaskID::from_random(),
                "test_task".into(),
                Language::Python,
                FunctionDescriptor {
                    function_name: "test_task".into(),
                    ..Default::default()
                },
                &JobID::from_int(1),
                parent_task_id,
                0,
                vec![],
                caller_address(),
                num_returns,
            )
            .set_normal_task_spec(0);
        for dep in deps {
            builder.add_by_ref_arg(dep);
        }
        builder.build()
    }

    fn make_task_spec(num_returns: u64, deps: &[ObjectID]) -> TaskSpecification {
        make_task_spec_with_parent(num_returns, deps, &TaskID::nil())
    }

    fn make_actor_task_spec(num_returns: u64) -> (TaskSpecification, ObjectID) {
        let job_id = JobID::from_int(1);
        let actor_id = ActorID::of(&job_id, &TaskID::nil(), 0);
        let dummy = ObjectID::for_actor_handle(&actor_id);
        let mut builder = TaskSpecBuilder::new();
        builder
            .set_common_task_spec(
                &TaskID::for_actor_task(&job_id, &TaskID::nil(), 1, &actor_id),
                "Actor.method".into(),
                Language::Python,
                FunctionDescriptor::default(),
                &job_id,
                &TaskID::nil(),
                1,
                vec![],
                caller_address(),
                num_returns,
            )
            .set_actor_task_spec(&actor_id, &dummy, 0);
        (builder.build(), dummy)
    }

    fn direct_return(object_id: &ObjectID, data: &[u8]) -> rpc::ReturnObject {
        rpc::ReturnObject {
            object_id: object_id.binary(),
            in_plasma: false,
            data: data.to_vec(),
            metadata: Vec::new(),
            nested_inlined_refs: Vec::new(),
            size: data.len() as i64,
        }
    }

    fn plasma_return(object_id: &ObjectID, size: i64) -> rpc::ReturnObject {
        rpc::ReturnObject {
            object_id: object_id.binary(),
            in_plasma: true,
            data: Vec::new(),
            metadata: Vec::new(),
            nested_inlined_refs: Vec::new(),
            size,
        }
    }

    fn reply_with(return_objects: Vec<rpc::ReturnObject>) -> rpc::PushTaskReply {
        rpc::PushTaskReply {
            return_objects,
            borrowed_refs: Vec::new(),
        }
    }

    // ── Submission ───────────────────────────────────────────────────

    #[test]
    fn test_add_pending_task_returns_refs() {
        let t = make_manager();
        let dep = ObjectID::from_random();
        let spec = make_task_spec(2, &[dep]);

        let refs = t
            .manager
            .add_pending_task(&caller_address(), &spec, "test.py:10", 3);
        assert_eq!(refs.len(), 2);
        assert_eq!(ObjectID::from_binary(&refs[0].object_id), spec.return_id(0));
        assert_eq!(ObjectID::from_binary(&refs[1].object_id), spec.return_id(1));
        assert_eq!(refs[0].call_site, "test.py:10");
        assert_eq!(
            refs[0].owner_address.as_ref().unwrap().ip_address,
            caller_address().ip_address
        );

        assert!(t.manager.is_task_submissible(&spec.task_id()));
        assert!(t.manager.is_task_pending(&spec.task_id()));
        assert_eq!(t.manager.num_submissible_tasks(), 1);
        assert_eq!(t.manager.num_pending_tasks(), 1);

        // Dependencies got a submitted-task ref; returns are owned and
        // reconstructable since retries remain.
        assert_eq!(t.reference_counter.submitted_task_ref_count(&dep), 1);
        assert!(t.reference_counter.owned_by_us(&spec.return_id(0)));
        assert!(t.reference_counter.is_reconstructable(&spec.return_id(0)));
    }

    #[test]
    fn test_add_pending_task_no_retries_not_reconstructable() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);
        assert!(!t.reference_counter.is_reconstructable(&spec.return_id(0)));
    }

    #[test]
    #[should_panic(expected = "already in the submissible task table")]
    fn test_add_duplicate_task_panics() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);
    }

    #[test]
    fn test_actor_task_reserves_last_return_and_tracks_dummy() {
        let t = make_manager();
        let (spec, dummy) = make_actor_task_spec(2);
        let refs = t
            .manager
            .add_pending_task(&caller_address(), &spec, "actor.py:5", 0);

        // The last declared return is reserved internally.
        assert_eq!(refs.len(), 1);
        assert_eq!(ObjectID::from_binary(&refs[0].object_id), spec.return_id(0));
        // The actor creation dummy object is a tracked dependency.
        assert_eq!(t.reference_counter.submitted_task_ref_count(&dummy), 1);

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![direct_return(&spec.return_id(0), b"ok")]),
            &worker_address(&node_id),
        );
        assert_eq!(t.reference_counter.submitted_task_ref_count(&dummy), 0);
    }

    // ── Completion ───────────────────────────────────────────────────

    #[test]
    fn test_direct_return_no_retries() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);

        let refs = t
            .manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);
        assert_eq!(refs.len(), 1);
        assert_eq!(ObjectID::from_binary(&refs[0].object_id), object_id);

        let node_id = NodeID::from_random();
        let data = [0u8; 42];
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![direct_return(&object_id, &data)]),
            &worker_address(&node_id),
        );

        assert_eq!(t.manager.num_submissible_tasks(), 0);
        assert_eq!(t.manager.num_pending_tasks(), 0);
        assert!(t.store.contains(&object_id));
        assert_eq!(t.store.get(&object_id).unwrap().data.len(), 42);
        assert_eq!(t.reference_counter.get_object_size(&object_id), Some(42));
        assert!(t.plasma_puts.lock().is_empty());
    }

    #[test]
    fn test_plasma_return_on_live_node() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![plasma_return(&object_id, 1024)]),
            &worker_address(&node_id),
        );

        // Pinned at the executing node, placeholder in the local store, and
        // the spec retained for reconstruction.
        assert_eq!(t.reference_counter.pinned_at(&object_id), Some(node_id));
        assert!(t.store.get(&object_id).unwrap().is_in_plasma());
        assert!(t.manager.is_task_submissible(&spec.task_id()));
        assert!(!t.manager.is_task_pending(&spec.task_id()));
        assert!(t.reconstructed.lock().is_empty());
    }

    #[test]
    fn test_plasma_return_on_dead_node() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);

        t.node_alive.store(false, Ordering::SeqCst);
        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![plasma_return(&object_id, 1024)]),
            &worker_address(&node_id),
        );

        assert_eq!(t.reconstructed.lock().as_slice(), &[object_id]);
        assert_eq!(t.reference_counter.pinned_at(&object_id), None);
        assert!(!t.store.contains(&object_id));
        // The entry stays for the reconstruction attempt.
        assert!(t.manager.is_task_submissible(&spec.task_id()));
    }

    #[test]
    fn test_first_execution_never_replaces_into_plasma() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);

        // First execution with a direct return goes to the in-process
        // store, never through the plasma placement callback.
        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![direct_return(&object_id, b"value")]),
            &worker_address(&node_id),
        );
        assert!(t.plasma_puts.lock().is_empty());
        assert!(!t.store.get(&object_id).unwrap().is_error());
        // A direct return leaves nothing to reconstruct; entry removed.
        assert!(!t.manager.is_task_submissible(&spec.task_id()));
    }

    #[test]
    fn test_reexecution_replaces_plasma_returns() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 5);

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![plasma_return(&object_id, 1024)]),
            &worker_address(&node_id),
        );
        assert!(t.manager.is_task_submissible(&spec.task_id()));

        // Reconstruction resubmit, then the worker returns the value
        // directly. Pre-existing reference holders expect a plasma copy, so
        // the value is placed in plasma again.
        t.manager.resubmit_task(&spec.task_id()).unwrap();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![direct_return(&object_id, b"recomputed")]),
            &worker_address(&node_id),
        );
        assert_eq!(t.plasma_puts.lock().as_slice(), &[object_id]);
        // Still retained: the plasma return remains in scope.
        assert!(t.manager.is_task_submissible(&spec.task_id()));
    }

    #[test]
    fn test_dropped_direct_return_stays_reconstructable() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);

        // The slot is already occupied, so the store drops the new value
        // and the ID must not count as a direct return.
        t.store
            .put(object_id, RayObject::from_data(Bytes::from_static(b"stale")));

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![direct_return(&object_id, b"fresh")]),
            &worker_address(&node_id),
        );
        assert!(t.manager.is_task_submissible(&spec.task_id()));
    }

    #[test]
    fn test_completion_registers_nested_returns() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        let nested = ObjectID::from_random();
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);

        let mut ret = direct_return(&object_id, b"outer");
        ret.nested_inlined_refs = vec![rpc::ObjectReference {
            object_id: nested.binary(),
            owner_address: None,
            call_site: String::new(),
        }];
        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![ret]),
            &worker_address(&node_id),
        );

        // The nested ID is registered under the return object's owner.
        assert!(t.reference_counter.has_reference(&nested));
        assert_eq!(
            t.reference_counter.get_owner(&nested).unwrap().ip_address,
            caller_address().ip_address
        );
        assert_eq!(t.store.get(&object_id).unwrap().nested_refs, vec![nested]);
    }

    #[test]
    #[should_panic(expected = "tried to complete task that was not pending")]
    fn test_complete_unknown_task_panics() {
        let t = make_manager();
        let task_id = TaskID::from_random();
        t.manager.complete_pending_task(
            &task_id,
            &reply_with(vec![]),
            &worker_address(&NodeID::from_random()),
        );
    }

    // ── Retries and failure ──────────────────────────────────────────

    #[test]
    fn test_retry_on_failure() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 2);

        let will_retry = t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            true,
        );
        assert!(will_retry);
        assert_eq!(t.retried.lock().as_slice(), &[(spec.task_id(), true)]);
        assert!(t.manager.is_task_pending(&spec.task_id()));
        assert_eq!(t.manager.num_pending_tasks(), 1);
        // No error object is written while a retry is still possible.
        assert!(!t.store.contains(&spec.return_id(0)));
    }

    #[test]
    fn test_terminal_failure_stores_error_objects() {
        let t = make_manager();
        let dep = ObjectID::from_random();
        let spec = make_task_spec(2, &[dep]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);

        let will_retry = t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::ActorDied,
            None,
            None,
            true,
        );
        assert!(!will_retry);
        assert!(t.retried.lock().is_empty());
        assert_eq!(t.manager.num_submissible_tasks(), 0);
        assert_eq!(t.manager.num_pending_tasks(), 0);
        // One error object per declared return ID.
        for i in 0..2 {
            let stored = t.store.get(&spec.return_id(i)).unwrap();
            assert_eq!(stored.error_type(), Some(ErrorType::ActorDied));
        }
        // The dependency's borrow was dropped along with its lineage.
        assert!(!t.reference_counter.has_reference(&dep));
    }

    #[test]
    fn test_retries_decrement_until_terminal() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 2);

        assert!(t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            false,
        ));
        assert!(t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            false,
        ));
        // Third failure exhausts the retries.
        assert!(!t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            false,
        ));
        assert_eq!(t.retried.lock().len(), 2);
        assert_eq!(t.manager.num_submissible_tasks(), 0);
    }

    #[test]
    fn test_unbounded_retries() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", -1);

        for _ in 0..5 {
            assert!(t.manager.pending_task_failed(
                &spec.task_id(),
                ErrorType::WorkerDied,
                None,
                None,
                false,
            ));
        }
        assert_eq!(t.retried.lock().len(), 5);
        assert!(t.manager.is_task_pending(&spec.task_id()));

        // The task can still finish normally afterwards.
        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![direct_return(&spec.return_id(0), b"done")]),
            &worker_address(&node_id),
        );
        assert_eq!(t.manager.num_pending_tasks(), 0);
    }

    #[test]
    fn test_mark_task_canceled() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 5);

        assert!(t.manager.mark_task_canceled(&spec.task_id()));
        assert!(!t.manager.mark_task_canceled(&TaskID::from_random()));

        // Cancellation turns the next failure terminal despite the retries
        // the task was submitted with.
        let will_retry = t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::TaskCancelled,
            None,
            None,
            true,
        );
        assert!(!will_retry);
        assert_eq!(t.manager.num_submissible_tasks(), 0);
    }

    #[test]
    fn test_failed_task_stores_wrapped_exception() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);

        let exception = rpc::RayException {
            language: Language::Python as i32,
            serialized_exception: b"pickled-creation-error".to_vec(),
            formatted_exception_string: "RuntimeError: boom".to_string(),
        };
        t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::ActorCreationFailed,
            None,
            Some(&exception),
            true,
        );

        let stored = t.store.get(&spec.return_id(0)).unwrap();
        assert_eq!(stored.error_type(), Some(ErrorType::ActorCreationFailed));

        // Header: msgpack uint holding the body length, padded to the
        // fixed offset.
        let payload = stored.data.as_ref();
        let mut header: &[u8] = &payload[..MESSAGE_PACK_OFFSET];
        let body_len: u64 = rmp::decode::read_int(&mut header).unwrap();
        let body = &payload[MESSAGE_PACK_OFFSET..];
        assert_eq!(body.len() as u64, body_len);

        // Body: msgpack bin wrapping the serialized exception.
        let mut body_reader: &[u8] = body;
        let bin_len = rmp::decode::read_bin_len(&mut body_reader).unwrap();
        assert_eq!(bin_len as usize, body_reader.len());
        let decoded = rpc::RayException::decode(body_reader).unwrap();
        assert_eq!(decoded, exception);
    }

    #[test]
    fn test_terminate_task_failures_are_not_logged() {
        let t = make_manager();
        let mut builder = TaskSpecBuilder::new();
        builder
            .set_common_task_spec(
                &TaskID::from_random(),
                WORKER_TERMINATE_TASK_NAME.into(),
                Language::Python,
                FunctionDescriptor {
                    function_name: WORKER_TERMINATE_TASK_NAME.into(),
                    ..Default::default()
                },
                &JobID::from_int(1),
                &TaskID::nil(),
                0,
                vec![],
                caller_address(),
                1,
            )
            .set_normal_task_spec(0);
        let spec = builder.build();
        t.manager
            .add_pending_task(&caller_address(), &spec, "exit", 0);
        t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            false,
        );
        assert_eq!(t.manager.failure_log_count(), 0);

        // An ordinary failure does count.
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);
        t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::WorkerDied,
            Some(&RayError::io_error("connection reset")),
            None,
            false,
        );
        assert_eq!(t.manager.failure_log_count(), 1);
    }

    #[test]
    fn test_failure_log_throttle_window() {
        let mut throttle = FailureLogThrottle::new();
        for _ in 0..TASK_FAILURE_THROTTLING_THRESHOLD {
            assert!(matches!(
                throttle.decide(1_000),
                LogDecision::Log {
                    announce_throttling: false
                }
            ));
        }
        // Within the window: throttled.
        assert!(matches!(throttle.decide(1_001), LogDecision::Skip));
        assert!(matches!(throttle.decide(5_999), LogDecision::Skip));
        // Once the window elapses, logging resumes with a one-time notice.
        assert!(matches!(
            throttle.decide(7_000),
            LogDecision::Log {
                announce_throttling: true
            }
        ));
        assert!(matches!(throttle.decide(7_001), LogDecision::Skip));
        assert!(matches!(
            throttle.decide(12_500),
            LogDecision::Log {
                announce_throttling: false
            }
        ));
    }

    // ── Resubmission ─────────────────────────────────────────────────

    #[test]
    fn test_resubmit_retained_task() {
        let t = make_manager();
        let dep = ObjectID::from_random();
        let spec = make_task_spec(1, &[dep]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![plasma_return(&object_id, 64)]),
            &worker_address(&node_id),
        );
        assert!(!t.manager.is_task_pending(&spec.task_id()));
        t.retried.lock().clear();

        let deps = t.manager.resubmit_task(&spec.task_id()).unwrap();
        assert_eq!(deps, vec![dep]);
        assert!(t.manager.is_task_pending(&spec.task_id()));
        assert_eq!(t.manager.num_pending_tasks(), 1);
        assert_eq!(t.reference_counter.submitted_task_ref_count(&dep), 1);
        assert_eq!(t.retried.lock().as_slice(), &[(spec.task_id(), false)]);
    }

    #[test]
    fn test_resubmit_is_idempotent_while_pending() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);
        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![plasma_return(&object_id, 64)]),
            &worker_address(&node_id),
        );
        t.retried.lock().clear();

        t.manager.resubmit_task(&spec.task_id()).unwrap();
        // The second call sees a pending task and does nothing.
        let deps = t.manager.resubmit_task(&spec.task_id()).unwrap();
        assert!(deps.is_empty());
        assert_eq!(t.retried.lock().len(), 1);
        assert_eq!(t.manager.num_pending_tasks(), 1);
    }

    #[test]
    fn test_resubmit_unknown_task_is_invalid() {
        let t = make_manager();
        let err = t
            .manager
            .resubmit_task(&TaskID::from_random())
            .unwrap_err();
        assert!(err.is_invalid());
        assert_eq!(err.message, "Task spec missing");
    }

    #[test]
    fn test_resubmit_with_zero_retries_left() {
        // A retained task whose retries were zeroed (here via cancellation)
        // may still be resubmitted for reconstruction; the counter stays 0.
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 1);
        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![plasma_return(&object_id, 64)]),
            &worker_address(&node_id),
        );
        assert!(t.manager.mark_task_canceled(&spec.task_id()));
        t.retried.lock().clear();

        t.manager.resubmit_task(&spec.task_id()).unwrap();
        assert!(t.manager.is_task_pending(&spec.task_id()));
        assert_eq!(t.retried.lock().as_slice(), &[(spec.task_id(), false)]);
    }

    // ── Lineage ──────────────────────────────────────────────────────

    #[test]
    fn test_lineage_release_after_scope_exit() {
        let t = make_manager();
        let dep = ObjectID::from_random();
        let spec = make_task_spec(1, &[dep]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![plasma_return(&object_id, 64)]),
            &worker_address(&node_id),
        );
        assert!(t.manager.is_task_submissible(&spec.task_id()));

        // The return goes out of scope cluster-wide: the entry is erased
        // and the argument IDs cascade to the caller.
        let released = t.manager.remove_lineage_reference(&object_id);
        assert_eq!(released, vec![dep]);
        assert!(!t.manager.is_task_submissible(&spec.task_id()));

        // Releasing an object with no retained lineage is a no-op.
        let released = t.manager.remove_lineage_reference(&ObjectID::from_random());
        assert!(released.is_empty());
    }

    #[test]
    fn test_lineage_not_released_while_pending() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        let object_id = spec.return_id(0);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);

        // The task has not completed yet; dropping the return from scope
        // must not erase the pending entry.
        let released = t.manager.remove_lineage_reference(&object_id);
        assert!(released.is_empty());
        assert!(t.manager.is_task_pending(&spec.task_id()));
    }

    #[test]
    fn test_direct_return_is_not_lineage_tracked() {
        let t = make_manager();
        let spec = make_task_spec(2, &[]);
        let direct_id = spec.return_id(0);
        let plasma_id = spec.return_id(1);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 3);

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![
                direct_return(&direct_id, b"small"),
                plasma_return(&plasma_id, 1 << 20),
            ]),
            &worker_address(&node_id),
        );

        // Releasing the direct return changes nothing; the plasma return
        // still pins the entry.
        let released = t.manager.remove_lineage_reference(&direct_id);
        assert!(released.is_empty());
        assert!(t.manager.is_task_submissible(&spec.task_id()));

        // Releasing the plasma return erases the entry.
        t.manager.remove_lineage_reference(&plasma_id);
        assert!(!t.manager.is_task_submissible(&spec.task_id()));
    }

    #[test]
    fn test_on_task_dependencies_inlined() {
        let t = make_manager();
        let inlined = ObjectID::from_random();
        let contained = ObjectID::from_random();
        let spec = make_task_spec(1, &[inlined]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);
        assert_eq!(t.reference_counter.submitted_task_ref_count(&inlined), 1);
        t.store
            .put(inlined, RayObject::from_data(Bytes::from_static(b"v")));

        t.manager
            .on_task_dependencies_inlined(&[inlined], &[contained]);

        // The borrow moved to the contained ID; the inlined value went out
        // of scope and was deleted from the store.
        assert_eq!(t.reference_counter.submitted_task_ref_count(&contained), 1);
        assert!(!t.reference_counter.has_reference(&inlined));
        assert!(!t.store.contains(&inlined));
    }

    // ── Queries ──────────────────────────────────────────────────────

    #[test]
    fn test_get_task_spec() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);
        let fetched = t.manager.get_task_spec(&spec.task_id()).unwrap();
        assert_eq!(fetched.task_id(), spec.task_id());
        assert!(t.manager.get_task_spec(&TaskID::from_random()).is_none());
    }

    #[test]
    fn test_pending_counter_matches_pending_entries() {
        let t = make_manager();
        let parent = TaskID::from_random();
        let specs: Vec<_> = (0..4)
            .map(|_| make_task_spec_with_parent(1, &[], &parent))
            .collect();
        for spec in &specs {
            t.manager
                .add_pending_task(&caller_address(), spec, "test.py:1", 1);
        }
        let check = |expected: usize| {
            assert_eq!(t.manager.num_pending_tasks(), expected);
            assert_eq!(t.manager.get_pending_children_tasks(&parent).len(), expected);
        };
        check(4);

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &specs[0].task_id(),
            &reply_with(vec![direct_return(&specs[0].return_id(0), b"a")]),
            &worker_address(&node_id),
        );
        check(3);

        // First failure retries (stays pending), second is terminal.
        assert!(t.manager.pending_task_failed(
            &specs[1].task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            false,
        ));
        check(3);
        assert!(!t.manager.pending_task_failed(
            &specs[1].task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            false,
        ));
        check(2);
    }

    // ── Drain and shutdown ───────────────────────────────────────────

    #[test]
    fn test_drain_with_no_pending_tasks_runs_immediately() {
        let t = make_manager();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_hook = fired.clone();
        t.manager
            .drain_and_shutdown(Box::new(move || fired_hook.store(true, Ordering::SeqCst)));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drain_waits_for_completion() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 0);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_hook = fired.clone();
        t.manager
            .drain_and_shutdown(Box::new(move || fired_hook.store(true, Ordering::SeqCst)));
        assert!(!fired.load(Ordering::SeqCst));

        let node_id = NodeID::from_random();
        t.manager.complete_pending_task(
            &spec.task_id(),
            &reply_with(vec![direct_return(&spec.return_id(0), b"x")]),
            &worker_address(&node_id),
        );
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drain_waits_for_terminal_failure() {
        let t = make_manager();
        let spec = make_task_spec(1, &[]);
        t.manager
            .add_pending_task(&caller_address(), &spec, "test.py:1", 1);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_hook = fired.clone();
        t.manager
            .drain_and_shutdown(Box::new(move || fired_hook.store(true, Ordering::SeqCst)));

        // A retried failure keeps the task pending; the hook stays armed.
        assert!(t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            false,
        ));
        assert!(!fired.load(Ordering::SeqCst));

        assert!(!t.manager.pending_task_failed(
            &spec.task_id(),
            ErrorType::WorkerDied,
            None,
            None,
            false,
        ));
        assert!(fired.load(Ordering::SeqCst));
    }

    // ── Locking discipline ───────────────────────────────────────────

    #[test]
    fn test_callbacks_can_reenter_the_manager() {
        // The table mutex must be released before any callback runs; this
        // test deadlocks if it is not.
        let store = Arc::new(CoreWorkerMemoryStore::new());
        let reference_counter = Arc::new(ReferenceCounter::new());
        let manager_slot: Arc<OnceLock<Arc<TaskManager>>> = Arc::new(OnceLock::new());
        let observed = Arc::new(Mutex::new(Vec::new()));

        let slot_cb = manager_slot.clone();
        let observed_cb = observed.clone();
        let manager = Arc::new(TaskManager::new(
            store,
            reference_counter,
            Box::new(|_object, _object_id| {}),
            Box::new(move |spec, _delay| {
                let manager = slot_cb.get().expect("manager registered");
                observed_cb.lock().push((
                    manager.num_pending_tasks(),
                    manager.is_task_pending(&spec.task_id()),
                ));
            }),
            Box::new(|_node_id| true),
            Box::new(|_object_id| {}),
        ));
        let _ = manager_slot.set(manager.clone());

        let spec = make_task_spec(1, &[]);
        manager.add_pending_task(&caller_address(), &spec, "test.py:1", 1);
        manager.pending_task_failed(&spec.task_id(), ErrorType::WorkerDied, None, None, false);
        assert_eq!(observed.lock().as_slice(), &[(1, true)]);

        // The shutdown hook re-enters too.
        let manager_in_hook = manager.clone();
        let hook_saw = Arc::new(Mutex::new(None));
        let hook_saw_cb = hook_saw.clone();
        manager.pending_task_failed(&spec.task_id(), ErrorType::WorkerDied, None, None, false);
        manager.drain_and_shutdown(Box::new(move || {
            *hook_saw_cb.lock() = Some(manager_in_hook.num_submissible_tasks());
        }));
        assert_eq!(*hook_saw.lock(), Some(0));
    }
}
