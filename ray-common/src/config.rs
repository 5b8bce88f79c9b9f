// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Ray configuration.
//!
//! Replaces `src/ray/common/ray_config.h/cc` and `ray_config_def.h`.
//!
//! In C++, config values are defined via X-macro `RAY_CONFIG(type, name, default)`.
//! Here, we use a plain struct with defaults and support:
//! - Base64-encoded JSON config string from the Python launcher
//! - Environment variable overrides: `RAY_<name>`

use std::sync::OnceLock;

/// Global Ray configuration singleton.
static RAY_CONFIG: OnceLock<RayConfig> = OnceLock::new();

/// Get the global RayConfig. Panics if not initialized.
pub fn ray_config() -> &'static RayConfig {
    RAY_CONFIG
        .get()
        .expect("RayConfig not initialized. Call initialize_config() first.")
}

/// Initialize the global RayConfig from a base64-encoded JSON string.
/// Returns an error if already initialized.
pub fn initialize_config(config_str: Option<&str>) -> Result<(), String> {
    let config = match config_str {
        Some(s) if !s.is_empty() => RayConfig::from_base64_json(s)?,
        _ => RayConfig::default(),
    };
    RAY_CONFIG
        .set(config)
        .map_err(|_| "RayConfig already initialized".to_string())
}

/// Ray configuration parameters.
///
/// Each field corresponds to a `RAY_CONFIG(type, name, default)` entry in
/// the C++ `ray_config_def.h`, limited to the knobs the worker-side task
/// and object bookkeeping consumes.
#[derive(Debug, Clone)]
pub struct RayConfig {
    // ─── Task retries ─────────────────────────────────────────
    /// Delay applied before resubmitting a task that failed, when the retry
    /// path asks for a delayed resubmission.
    pub task_retry_delay_ms: i64,

    // ─── Lineage / reconstruction ─────────────────────────────
    /// Whether specs of tasks with in-scope plasma returns are pinned so
    /// the returns can be recomputed after object loss.
    pub lineage_pinning_enabled: bool,

    // ─── Object store ─────────────────────────────────────────
    /// Objects above this size are promoted from a direct return to the
    /// shared object store.
    pub max_direct_call_object_size: i64,

    /// How long a worker waits between checks for an object that is not yet
    /// local.
    pub get_timeout_milliseconds: u64,
}

impl Default for RayConfig {
    fn default() -> Self {
        Self {
            task_retry_delay_ms: 0,
            lineage_pinning_enabled: true,
            max_direct_call_object_size: 100 * 1024,
            get_timeout_milliseconds: 1_000,
        }
    }
}

impl RayConfig {
    /// Parse from base64-encoded JSON (as sent by the Python launcher).
    pub fn from_base64_json(b64: &str) -> Result<Self, String> {
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
            .map_err(|e| format!("base64 decode error: {e}"))?;
        let json_str =
            String::from_utf8(decoded).map_err(|e| format!("UTF-8 decode error: {e}"))?;
        Self::from_json(&json_str)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(json).map_err(|e| format!("JSON parse error: {e}"))?;

        let mut config = Self::default();

        // Apply JSON overrides
        macro_rules! set_field {
            ($field:ident, $key:expr, bool) => {
                if let Some(v) = map.get($key).and_then(|v| v.as_bool()) {
                    config.$field = v;
                }
            };
            ($field:ident, $key:expr, u64) => {
                if let Some(v) = map.get($key).and_then(|v| v.as_u64()) {
                    config.$field = v;
                }
            };
            ($field:ident, $key:expr, i64) => {
                if let Some(v) = map.get($key).and_then(|v| v.as_i64()) {
                    config.$field = v;
                }
            };
        }

        set_field!(task_retry_delay_ms, "task_retry_delay_ms", i64);
        set_field!(lineage_pinning_enabled, "lineage_pinning_enabled", bool);
        set_field!(
            max_direct_call_object_size,
            "max_direct_call_object_size",
            i64
        );
        set_field!(get_timeout_milliseconds, "get_timeout_milliseconds", u64);

        // Apply environment variable overrides (RAY_<name>)
        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides of the form `RAY_<name>`.
    fn apply_env_overrides(&mut self) {
        macro_rules! env_override {
            ($field:ident, $ty:ty) => {
                let env_key = concat!("RAY_", stringify!($field));
                if let Ok(val) = std::env::var(env_key) {
                    if let Ok(v) = val.parse::<$ty>() {
                        self.$field = v;
                    }
                }
            };
        }

        env_override!(task_retry_delay_ms, i64);
        env_override!(lineage_pinning_enabled, bool);
        env_override!(max_direct_call_object_size, i64);
        env_override!(get_timeout_milliseconds, u64);
    }
}
