// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! In-process object store for the core worker.
//!
//! Holds direct task return values and error markers keyed by object ID.
//! Values stored in the shared object store are represented here by an
//! `OBJECT_IN_PLASMA` marker so readers know where to fetch them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use ray_common::config::RayConfig;
use ray_common::id::ObjectID;
use ray_proto::ray::rpc::ErrorType;

use crate::error::{CoreWorkerError, CoreWorkerResult};

/// A Ray object stored in memory.
#[derive(Debug, Clone)]
pub struct RayObject {
    pub data: Bytes,
    pub metadata: Bytes,
    pub nested_refs: Vec<ObjectID>,
}

impl RayObject {
    pub fn new(data: Bytes, metadata: Bytes, nested_refs: Vec<ObjectID>) -> Self {
        Self {
            data,
            metadata,
            nested_refs,
        }
    }

    /// Create a simple data-only object.
    pub fn from_data(data: Bytes) -> Self {
        Self::new(data, Bytes::new(), Vec::new())
    }

    /// Create an error marker. The metadata carries the error type
    /// discriminant as a decimal string, shared with the other language
    /// runtimes.
    pub fn from_error(error_type: ErrorType) -> Self {
        Self::new(
            Bytes::new(),
            Bytes::from((error_type as i32).to_string()),
            Vec::new(),
        )
    }

    /// Create an error marker that additionally carries a payload, e.g. a
    /// serialized exception.
    pub fn from_error_with_data(error_type: ErrorType, data: Bytes) -> Self {
        Self::new(
            data,
            Bytes::from((error_type as i32).to_string()),
            Vec::new(),
        )
    }

    /// The error type of an error marker, if this object is one.
    pub fn error_type(&self) -> Option<ErrorType> {
        let metadata = std::str::from_utf8(&self.metadata).ok()?;
        let discriminant = metadata.parse::<i32>().ok()?;
        ErrorType::try_from(discriminant).ok()
    }

    pub fn is_error(&self) -> bool {
        self.error_type().is_some()
    }

    /// Whether this object is a placeholder for a value living in the
    /// shared object store.
    pub fn is_in_plasma(&self) -> bool {
        self.error_type() == Some(ErrorType::ObjectInPlasma)
    }

    pub fn size(&self) -> usize {
        self.data.len() + self.metadata.len()
    }
}

/// Thread-safe in-process memory store for Ray objects.
pub struct CoreWorkerMemoryStore {
    objects: Mutex<HashMap<ObjectID, RayObject>>,
    /// Notification channel for async waiters.
    notify: Arc<Notify>,
    /// Plain values above this size belong in the shared object store and
    /// are refused here.
    max_direct_call_object_size: i64,
    /// Wait bound used by [`Self::get_or_wait`] when the caller does not
    /// pass one.
    default_get_timeout: Duration,
}

impl CoreWorkerMemoryStore {
    pub fn new() -> Self {
        Self::with_config(&RayConfig::default())
    }

    pub fn with_config(config: &RayConfig) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
            max_direct_call_object_size: config.max_direct_call_object_size,
            default_get_timeout: Duration::from_millis(config.get_timeout_milliseconds),
        }
    }

    /// Put an object into the store.
    ///
    /// Returns whether the object was stored. The object is dropped and
    /// `false` returned if an entry already exists under the ID, or if a
    /// plain value exceeds `max_direct_call_object_size`; the caller must
    /// not treat the ID as a direct return in either case. Error markers
    /// are always kept so waiters can observe them.
    pub fn put(&self, object_id: ObjectID, object: RayObject) -> bool {
        if !object.is_error() && object.size() as i64 > self.max_direct_call_object_size {
            tracing::debug!(
                object_id = %object_id,
                size = object.size(),
                "value too large for the in-process store"
            );
            return false;
        }
        let mut store = self.objects.lock();
        if store.contains_key(&object_id) {
            tracing::debug!(object_id = %object_id, "dropping duplicate put");
            return false;
        }
        store.insert(object_id, object);
        drop(store);
        // Wake up any waiters.
        self.notify.notify_waiters();
        true
    }

    /// Get an object from the store. Returns `None` if not found.
    pub fn get(&self, object_id: &ObjectID) -> Option<RayObject> {
        self.objects.lock().get(object_id).cloned()
    }

    /// Delete a batch of objects from the store. IDs without an entry are
    /// skipped.
    pub fn delete(&self, object_ids: &[ObjectID]) {
        let mut store = self.objects.lock();
        for object_id in object_ids {
            store.remove(object_id);
        }
    }

    /// Check if an object exists in the store.
    pub fn contains(&self, object_id: &ObjectID) -> bool {
        self.objects.lock().contains_key(object_id)
    }

    /// Number of objects in the store.
    pub fn size(&self) -> usize {
        self.objects.lock().len()
    }

    /// Get an object, or wait for it to arrive.
    ///
    /// Without an explicit `timeout`, the configured `get_timeout_milliseconds`
    /// bounds the wait. Returns `Err(TimedOut)` once the bound expires.
    pub async fn get_or_wait(
        &self,
        object_id: &ObjectID,
        timeout: Option<Duration>,
    ) -> CoreWorkerResult<RayObject> {
        let timeout = timeout.unwrap_or(self.default_get_timeout);
        let arrival = async {
            loop {
                // Register for the next notification before checking, so a
                // put landing between the check and the wait still wakes us.
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(object) = self.get(object_id) {
                    return object;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, arrival).await.map_err(|_| {
            CoreWorkerError::TimedOut(format!("waiting for object {}", object_id.hex()))
        })
    }
}

impl Default for CoreWorkerMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_object(data: &[u8]) -> RayObject {
        RayObject::from_data(Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_put_and_get() {
        let store = CoreWorkerMemoryStore::new();
        let oid = ObjectID::from_random();
        assert!(store.put(oid, make_object(b"hello")));
        let got = store.get(&oid).unwrap();
        assert_eq!(got.data.as_ref(), b"hello");
    }

    #[test]
    fn test_duplicate_put_is_dropped() {
        let store = CoreWorkerMemoryStore::new();
        let oid = ObjectID::from_random();
        assert!(store.put(oid, make_object(b"a")));
        assert!(!store.put(oid, make_object(b"b")));
        // The original value wins.
        assert_eq!(store.get(&oid).unwrap().data.as_ref(), b"a");
    }

    #[test]
    fn test_delete_batch() {
        let store = CoreWorkerMemoryStore::new();
        let oid1 = ObjectID::from_random();
        let oid2 = ObjectID::from_random();
        let missing = ObjectID::from_random();
        store.put(oid1, make_object(b"x"));
        store.put(oid2, make_object(b"y"));
        store.delete(&[oid1, oid2, missing]);
        assert!(!store.contains(&oid1));
        assert!(!store.contains(&oid2));
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_error_object_metadata() {
        let obj = RayObject::from_error(ErrorType::WorkerDied);
        assert!(obj.is_error());
        assert_eq!(obj.error_type(), Some(ErrorType::WorkerDied));
        assert!(!obj.is_in_plasma());
        assert_eq!(obj.metadata.as_ref(), b"0");
    }

    #[test]
    fn test_plasma_placeholder() {
        let obj = RayObject::from_error(ErrorType::ObjectInPlasma);
        assert!(obj.is_in_plasma());
        assert!(obj.data.is_empty());
    }

    #[test]
    fn test_error_object_with_payload() {
        let obj =
            RayObject::from_error_with_data(ErrorType::ActorDied, Bytes::from_static(b"payload"));
        assert_eq!(obj.error_type(), Some(ErrorType::ActorDied));
        assert_eq!(obj.data.as_ref(), b"payload");
    }

    #[test]
    fn test_plain_object_is_not_error() {
        let obj = make_object(b"data");
        assert!(!obj.is_error());
        assert!(obj.error_type().is_none());
    }

    #[test]
    fn test_size() {
        let store = CoreWorkerMemoryStore::new();
        assert_eq!(store.size(), 0);
        store.put(ObjectID::from_random(), make_object(b"a"));
        store.put(ObjectID::from_random(), make_object(b"b"));
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn test_oversized_value_is_refused() {
        let config = RayConfig {
            max_direct_call_object_size: 8,
            ..Default::default()
        };
        let store = CoreWorkerMemoryStore::with_config(&config);
        let oid = ObjectID::from_random();
        assert!(!store.put(oid, make_object(b"way more than eight bytes")));
        assert!(!store.contains(&oid));
        // Small values and error markers still fit.
        assert!(store.put(oid, make_object(b"tiny")));
        let error_id = ObjectID::from_random();
        assert!(store.put(
            error_id,
            RayObject::from_error_with_data(
                ErrorType::WorkerDied,
                Bytes::from_static(b"a payload larger than the threshold"),
            )
        ));
    }

    #[tokio::test]
    async fn test_get_or_wait_immediate() {
        let store = CoreWorkerMemoryStore::new();
        let oid = ObjectID::from_random();
        store.put(oid, make_object(b"ready"));
        let obj = store
            .get_or_wait(&oid, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(obj.data.as_ref(), b"ready");
    }

    #[tokio::test]
    async fn test_get_or_wait_timeout() {
        let store = CoreWorkerMemoryStore::new();
        let oid = ObjectID::from_random();
        let result = store
            .get_or_wait(&oid, Some(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(CoreWorkerError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_get_or_wait_default_timeout_from_config() {
        let config = RayConfig {
            get_timeout_milliseconds: 30,
            ..Default::default()
        };
        let store = CoreWorkerMemoryStore::with_config(&config);
        let oid = ObjectID::from_random();
        let start = tokio::time::Instant::now();
        let result = store.get_or_wait(&oid, None).await;
        assert!(matches!(result, Err(CoreWorkerError::TimedOut(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_get_or_wait_async_arrival() {
        let store = Arc::new(CoreWorkerMemoryStore::new());
        let oid = ObjectID::from_random();

        let store2 = store.clone();
        let oid2 = oid;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store2.put(oid2, make_object(b"arrived"));
        });

        let obj = store
            .get_or_wait(&oid, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(obj.data.as_ref(), b"arrived");
    }
}
