// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::ObjectKey;
use thiserror::Error;

/// How the engine reacts to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The object vanished; treated as success.
    NotFound,
    /// Stale write; retried locally against a fresh read.
    Conflict,
    /// Retried through the rate-limited queue.
    Transient,
    /// Cannot heal without a spec change, still retried at the backoff ceiling.
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConvergeError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },

    #[error("Conflict writing {key}: {message}")]
    Conflict { key: ObjectKey, message: String },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Failed to parse configuration file: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to apply status patch: {0}")]
    PatchError(#[from] json_patch::PatchError),

    #[error("Reconcile of {key} panicked: {message}")]
    Panicked { key: ObjectKey, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Leader election lease lost by {0}")]
    LeaseLost(String),
}

impl ConvergeError {
    pub fn transient(message: impl Into<String>) -> Self {
        ConvergeError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ConvergeError::Permanent(message.into())
    }

    pub fn conflict(key: &ObjectKey, message: impl Into<String>) -> Self {
        ConvergeError::Conflict {
            key: key.clone(),
            message: message.into(),
        }
    }

    /// Map this error onto the engine's retry taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            ConvergeError::NotFound { .. } => ErrorClass::NotFound,
            ConvergeError::Conflict { .. } => ErrorClass::Conflict,
            ConvergeError::KubeError(kube::Error::Api(e)) => match e.code {
                404 | 410 => ErrorClass::NotFound,
                409 => ErrorClass::Conflict,
                400 | 422 => ErrorClass::Permanent,
                _ => ErrorClass::Transient,
            },
            ConvergeError::Permanent(_)
            | ConvergeError::AlreadyExists { .. }
            | ConvergeError::SerdeError(_)
            | ConvergeError::YamlError(_)
            | ConvergeError::Config(_) => ErrorClass::Permanent,
            ConvergeError::PatchError(_) => ErrorClass::Conflict,
            _ => ErrorClass::Transient,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }
}

pub type Result<T> = std::result::Result<T, ConvergeError>;
