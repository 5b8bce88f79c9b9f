// Copyright 2024 The Ray Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Ray status/error types.
//!
//! Replaces `src/ray/common/status.h/cc`. In Rust, `Status` becomes `Result<T, RayError>`.

use std::fmt;

/// Status codes matching the C++ `StatusCode` enum values exactly.
/// The discriminant values must match for cross-language compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum StatusCode {
    OK = 0,
    OutOfMemory = 1,
    KeyError = 2,
    TypeError = 3,
    Invalid = 4,
    IOError = 5,
    UnknownError = 9,
    NotImplemented = 10,
    TimedOut = 12,
    Interrupted = 13,
    IntentionalSystemExit = 14,
    UnexpectedSystemExit = 15,
    CreationTaskError = 16,
    NotFound = 17,
    Disconnected = 18,
    SchedulingCancelled = 19,
    AlreadyExists = 20,
    ObjectExists = 21,
    ObjectNotFound = 22,
    ObjectStoreFull = 24,
    ObjectUnknownOwner = 29,
    InvalidArgument = 34,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OK => "OK",
            Self::OutOfMemory => "OutOfMemory",
            Self::KeyError => "KeyError",
            Self::TypeError => "TypeError",
            Self::Invalid => "Invalid",
            Self::IOError => "IOError",
            Self::UnknownError => "UnknownError",
            Self::NotImplemented => "NotImplemented",
            Self::TimedOut => "TimedOut",
            Self::Interrupted => "Interrupted",
            Self::IntentionalSystemExit => "IntentionalSystemExit",
            Self::UnexpectedSystemExit => "UnexpectedSystemExit",
            Self::CreationTaskError => "CreationTaskError",
            Self::NotFound => "NotFound",
            Self::Disconnected => "Disconnected",
            Self::SchedulingCancelled => "SchedulingCancelled",
            Self::AlreadyExists => "AlreadyExists",
            Self::ObjectExists => "ObjectExists",
            Self::ObjectNotFound => "ObjectNotFound",
            Self::ObjectStoreFull => "ObjectStoreFull",
            Self::ObjectUnknownOwner => "ObjectUnknownOwner",
            Self::InvalidArgument => "InvalidArgument",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The primary error type for Ray operations.
///
/// In C++, `Status` is used with `Status::OK()` and various error factories.
/// In Rust, the idiomatic equivalent is `Result<T, RayError>`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RayError {
    pub code: StatusCode,
    pub message: String,
}

impl RayError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    // Convenience constructors matching C++ static methods
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Invalid, msg)
    }
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::IOError, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, msg)
    }

    // Status code predicates
    pub fn is_invalid(&self) -> bool {
        self.code == StatusCode::Invalid
    }
    pub fn is_not_found(&self) -> bool {
        self.code == StatusCode::NotFound
    }
}

/// Convenience type alias: `Result<T, RayError>`.
/// This is the Rust equivalent of C++'s `StatusOr<T>`.
pub type RayResult<T> = Result<T, RayError>;
