// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Object reference counting for the core worker.
//!
//! Tracks local ref counts, submitted-task ref counts, lineage ref counts,
//! ownership, borrowers, and where each object is pinned. An object is
//! freed when all of its reference counts reach zero. Lineage ref counts
//! keep task arguments alive while the producing task may still be
//! re-executed to reconstruct a lost return object.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use ray_common::id::{NodeID, ObjectID};
use ray_proto::ray::rpc::{Address, ObjectReferenceCount};

/// Ownership and reference information for a single object.
#[derive(Debug, Clone)]
struct Reference {
    local_ref_count: u64,
    submitted_task_ref_count: u64,
    /// Held while a retained task spec may recompute this object's
    /// dependents; released through `release_lineage` paths.
    lineage_ref_count: u64,
    owner_address: Option<Address>,
    is_owned_by_us: bool,
    call_site: String,
    /// -1 until the first size report arrives.
    object_size: i64,
    is_reconstructable: bool,
    pinned_at_node_id: Option<NodeID>,
    contained_in: HashSet<ObjectID>,
    contains: HashSet<ObjectID>,
    borrowers: Vec<Address>,
}

impl Reference {
    fn new() -> Self {
        Self {
            local_ref_count: 0,
            submitted_task_ref_count: 0,
            lineage_ref_count: 0,
            owner_address: None,
            is_owned_by_us: false,
            call_site: String::new(),
            object_size: -1,
            is_reconstructable: false,
            pinned_at_node_id: None,
            contained_in: HashSet::new(),
            contains: HashSet::new(),
            borrowers: Vec::new(),
        }
    }

    fn total_ref_count(&self) -> u64 {
        self.local_ref_count + self.submitted_task_ref_count + self.lineage_ref_count
    }

    fn add_borrower(&mut self, address: &Address) {
        let known = self.borrowers.iter().any(|b| {
            b.worker_id == address.worker_id
                && b.ip_address == address.ip_address
                && b.port == address.port
        });
        if !known {
            self.borrowers.push(address.clone());
        }
    }
}

/// Tracks reference counts for objects in the core worker.
pub struct ReferenceCounter {
    refs: Mutex<HashMap<ObjectID, Reference>>,
    lineage_pinning_enabled: bool,
}

impl ReferenceCounter {
    pub fn new() -> Self {
        Self::with_lineage_pinning(true)
    }

    /// When lineage pinning is disabled, task arguments are not kept alive
    /// for reconstruction and `release_lineage` is a no-op.
    pub fn with_lineage_pinning(lineage_pinning_enabled: bool) -> Self {
        Self {
            refs: Mutex::new(HashMap::new()),
            lineage_pinning_enabled,
        }
    }

    /// Add a local reference to an object. Creates the entry if it doesn't exist.
    pub fn add_local_reference(&self, object_id: ObjectID) {
        let mut refs = self.refs.lock();
        let entry = refs.entry(object_id).or_insert_with(Reference::new);
        entry.local_ref_count += 1;
    }

    /// Remove a local reference. Returns the set of object IDs whose total
    /// reference count has reached zero and should be freed.
    pub fn remove_local_reference(&self, object_id: &ObjectID) -> Vec<ObjectID> {
        let mut refs = self.refs.lock();
        let mut deleted = Vec::new();
        if let Some(entry) = refs.get_mut(object_id) {
            entry.local_ref_count = entry.local_ref_count.saturating_sub(1);
            if entry.total_ref_count() == 0 {
                refs.remove(object_id);
                deleted.push(*object_id);
            }
        }
        deleted
    }

    /// Register an object that we own, created at `call_site` with the given
    /// (possibly still unknown, -1) size. `inner_ids` are objects nested
    /// inside the value, if already known.
    pub fn add_owned_object(
        &self,
        object_id: ObjectID,
        inner_ids: Vec<ObjectID>,
        owner_address: Address,
        call_site: &str,
        object_size: i64,
        is_reconstructable: bool,
    ) {
        let mut refs = self.refs.lock();
        let entry = refs.entry(object_id).or_insert_with(Reference::new);
        entry.is_owned_by_us = true;
        entry.owner_address = Some(owner_address);
        entry.call_site = call_site.to_string();
        entry.object_size = object_size;
        entry.is_reconstructable = is_reconstructable;
        for inner_id in &inner_ids {
            entry.contains.insert(*inner_id);
        }
        // Update inner references in a separate pass to avoid double borrow.
        for inner_id in &inner_ids {
            let inner = refs.entry(*inner_id).or_insert_with(Reference::new);
            inner.contained_in.insert(object_id);
        }
    }

    /// Record IDs nested inside `outer_id`, discovered when the value was
    /// produced. The nested objects are owned by `owner_address`.
    pub fn add_nested_object_ids(
        &self,
        outer_id: &ObjectID,
        nested_ids: &[ObjectID],
        owner_address: &Address,
    ) {
        let mut refs = self.refs.lock();
        if let Some(outer) = refs.get_mut(outer_id) {
            for nested_id in nested_ids {
                outer.contains.insert(*nested_id);
            }
        }
        for nested_id in nested_ids {
            let nested = refs.entry(*nested_id).or_insert_with(Reference::new);
            nested.contained_in.insert(*outer_id);
            if nested.owner_address.is_none() {
                nested.owner_address = Some(owner_address.clone());
            }
        }
    }

    /// Check if we own the given object.
    pub fn owned_by_us(&self, object_id: &ObjectID) -> bool {
        self.refs
            .lock()
            .get(object_id)
            .is_some_and(|r| r.is_owned_by_us)
    }

    /// Get the owner address for an object.
    pub fn get_owner(&self, object_id: &ObjectID) -> Option<Address> {
        self.refs
            .lock()
            .get(object_id)
            .and_then(|r| r.owner_address.clone())
    }

    /// Record the size of an object once its value is known.
    pub fn update_object_size(&self, object_id: &ObjectID, object_size: i64) {
        if let Some(entry) = self.refs.lock().get_mut(object_id) {
            entry.object_size = object_size;
        }
    }

    /// The last reported size of an object, or -1 if unknown.
    pub fn get_object_size(&self, object_id: &ObjectID) -> Option<i64> {
        self.refs.lock().get(object_id).map(|r| r.object_size)
    }

    /// Record the node whose shared object store holds the primary copy.
    pub fn update_object_pinned_at_raylet(&self, object_id: &ObjectID, node_id: NodeID) {
        if let Some(entry) = self.refs.lock().get_mut(object_id) {
            entry.pinned_at_node_id = Some(node_id);
        }
    }

    /// The node the object is pinned at, if any.
    pub fn pinned_at(&self, object_id: &ObjectID) -> Option<NodeID> {
        self.refs.lock().get(object_id).and_then(|r| r.pinned_at_node_id)
    }

    /// Whether the object can be recomputed by re-executing its task.
    pub fn is_reconstructable(&self, object_id: &ObjectID) -> bool {
        self.refs
            .lock()
            .get(object_id)
            .is_some_and(|r| r.is_reconstructable)
    }

    /// Increment submitted-task (and lineage) ref counts for the added
    /// dependency IDs and decrement them for the removed ones, as when an
    /// argument is replaced by the IDs contained in its inlined value.
    /// Returns freed object IDs.
    pub fn update_submitted_task_references(
        &self,
        argument_ids_to_add: &[ObjectID],
        argument_ids_to_remove: &[ObjectID],
    ) -> Vec<ObjectID> {
        let mut refs = self.refs.lock();
        for id in argument_ids_to_add {
            let entry = refs.entry(*id).or_insert_with(Reference::new);
            entry.submitted_task_ref_count += 1;
            if self.lineage_pinning_enabled {
                entry.lineage_ref_count += 1;
            }
        }
        Self::remove_submitted_refs_locked(
            &mut refs,
            argument_ids_to_remove,
            true,
            self.lineage_pinning_enabled,
        )
    }

    /// Increment submitted-task ref counts for a resubmitted task's
    /// dependencies. Lineage refs are already held from the first
    /// submission.
    pub fn update_resubmitted_task_references(&self, argument_ids: &[ObjectID]) {
        let mut refs = self.refs.lock();
        for id in argument_ids {
            let entry = refs.entry(*id).or_insert_with(Reference::new);
            entry.submitted_task_ref_count += 1;
        }
    }

    /// Decrement submitted-task ref counts when a task finishes, merging the
    /// borrow information the executing worker reported. Lineage refs are
    /// released too unless the task's spec stays retained for possible
    /// re-execution. Returns freed object IDs.
    pub fn update_finished_task_references(
        &self,
        argument_ids: &[ObjectID],
        release_lineage: bool,
        borrower_address: &Address,
        borrowed_refs: &[ObjectReferenceCount],
    ) -> Vec<ObjectID> {
        let mut refs = self.refs.lock();
        for borrowed in borrowed_refs {
            let Some(reference) = borrowed.reference.as_ref() else {
                continue;
            };
            let object_id = ObjectID::from_binary(&reference.object_id);
            if let Some(entry) = refs.get_mut(&object_id) {
                if borrowed.has_local_ref {
                    entry.add_borrower(borrower_address);
                }
                for downstream in &borrowed.borrowers {
                    entry.add_borrower(downstream);
                }
            }
        }
        Self::remove_submitted_refs_locked(
            &mut refs,
            argument_ids,
            release_lineage,
            self.lineage_pinning_enabled,
        )
    }

    /// Release the lineage refs that were held for the given task argument
    /// IDs; called while cascading lineage release upstream. Returns freed
    /// object IDs.
    pub fn release_lineage_references(&self, object_ids: &[ObjectID]) -> Vec<ObjectID> {
        if !self.lineage_pinning_enabled {
            return Vec::new();
        }
        let mut refs = self.refs.lock();
        let mut deleted = Vec::new();
        for id in object_ids {
            if let Some(entry) = refs.get_mut(id) {
                entry.lineage_ref_count = entry.lineage_ref_count.saturating_sub(1);
                if entry.total_ref_count() == 0 {
                    refs.remove(id);
                    deleted.push(*id);
                }
            }
        }
        deleted
    }

    fn remove_submitted_refs_locked(
        refs: &mut HashMap<ObjectID, Reference>,
        argument_ids: &[ObjectID],
        release_lineage: bool,
        lineage_pinning_enabled: bool,
    ) -> Vec<ObjectID> {
        let mut deleted = Vec::new();
        for id in argument_ids {
            if let Some(entry) = refs.get_mut(id) {
                entry.submitted_task_ref_count = entry.submitted_task_ref_count.saturating_sub(1);
                if lineage_pinning_enabled && release_lineage {
                    entry.lineage_ref_count = entry.lineage_ref_count.saturating_sub(1);
                }
                if entry.total_ref_count() == 0 {
                    refs.remove(id);
                    deleted.push(*id);
                }
            }
        }
        deleted
    }

    /// Number of outstanding submitted-task refs for an object.
    pub fn submitted_task_ref_count(&self, object_id: &ObjectID) -> u64 {
        self.refs
            .lock()
            .get(object_id)
            .map(|r| r.submitted_task_ref_count)
            .unwrap_or(0)
    }

    /// Number of recorded borrowers of an object.
    pub fn borrower_count(&self, object_id: &ObjectID) -> usize {
        self.refs
            .lock()
            .get(object_id)
            .map(|r| r.borrowers.len())
            .unwrap_or(0)
    }

    /// Check if an object has any references.
    pub fn has_reference(&self, object_id: &ObjectID) -> bool {
        self.refs.lock().contains_key(object_id)
    }

    /// Number of tracked objects.
    pub fn num_objects(&self) -> usize {
        self.refs.lock().len()
    }
}

impl Default for ReferenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
