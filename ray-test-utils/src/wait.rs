// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Async-aware wait utilities for tests.
//!
//! Rust equivalents of C++ `WaitForCondition`, `WaitReady`, `WaitForExpectedCount`.

use std::future::Future;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

/// Poll a synchronous condition every 10ms until it returns true or timeout.
///
/// Returns `true` if the condition was met, `false` on timeout.
pub async fn wait_for_condition<F>(condition: F, timeout_ms: u64) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for a future to produce `true` within the given timeout.
///
/// Returns `true` if the future completed with `true`, `false` on timeout.
pub async fn wait_ready<F>(future: F, timeout: Duration) -> bool
where
    F: Future<Output = bool>,
{
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_default()
}

/// Wait for an atomic counter to reach the expected value.
///
/// Returns `true` if the counter reached the expected value, `false` on timeout.
pub async fn wait_for_expected_count(
    counter: &AtomicI32,
    expected: i32,
    timeout_ms: u64,
) -> bool {
    wait_for_condition(|| counter.load(Ordering::SeqCst) == expected, timeout_ms).await
}
