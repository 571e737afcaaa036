// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;
use thiserror::Error;

/// Lock operation related error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Caller supplied no session or transaction identity
    #[error("Lock request has no session or transaction identity")]
    MissingIdentity,

    /// Requested lock cannot be entered from the current lock state
    #[error("Cannot enter {requested} lock on '{resource}' from the current lock state")]
    Incompatible { resource: String, requested: String },

    /// Release asked for a lock type that is not weaker than the held one
    #[error("Lock type {requested} is not a downgrade of {held} on '{resource}'")]
    InvalidDowngrade {
        resource: String,
        held: String,
        requested: String,
    },

    /// Lock acquisition timeout
    #[error("Lock acquisition timeout for resource '{resource}' after {timeout:?}")]
    Timeout { resource: String, timeout: Duration },

    /// Request was dropped without being answered
    #[error("Lock request on '{resource}' was rejected: {reason}")]
    Rejected { resource: String, reason: String },

    /// Operation aborted by lock policy
    #[error("Lock operation aborted: {reason}")]
    Aborted { reason: String },

    /// Lock object was fully released and recycled
    #[error("Lock object has been released: {resource}")]
    Disposed { resource: String },

    /// Lock object initialised twice
    #[error("Lock already initialised: {resource}")]
    AlreadyInitialised { resource: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl LockError {
    /// Create incompatible state error
    pub fn incompatible(resource: impl Into<String>, requested: impl std::fmt::Display) -> Self {
        Self::Incompatible {
            resource: resource.into(),
            requested: requested.to_string(),
        }
    }

    /// Create invalid downgrade error
    pub fn invalid_downgrade(resource: impl Into<String>, held: impl std::fmt::Display, requested: impl std::fmt::Display) -> Self {
        Self::InvalidDowngrade {
            resource: resource.into(),
            held: held.to_string(),
            requested: requested.to_string(),
        }
    }

    /// Create timeout error
    pub fn timeout(resource: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            resource: resource.into(),
            timeout,
        }
    }

    /// Create rejected error
    pub fn rejected(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create aborted error
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted { reason: reason.into() }
    }

    /// Create disposed error
    pub fn disposed(resource: impl Into<String>) -> Self {
        Self::Disposed {
            resource: resource.into(),
        }
    }

    /// Create configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if it is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if it is a retryable error
    ///
    /// Only timeouts are worth retrying; a rejected or incompatible request
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
    }

    /// Check if it is a fatal error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingIdentity | Self::Disposed { .. } | Self::AlreadyInitialised { .. } | Self::Configuration { .. }
        )
    }
}

/// Lock operation Result type
pub type Result<T> = std::result::Result<T, LockError>;

/// Convert from serde_json::Error
impl From<serde_json::Error> for LockError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("invalid lock manager configuration: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let timeout_err = LockError::timeout("ODK:1$2$3", Duration::from_millis(50));
        assert!(matches!(timeout_err, LockError::Timeout { .. }));

        let downgrade_err = LockError::invalid_downgrade("DBK:1", "Shared", "Exclusive");
        assert_eq!(
            downgrade_err.to_string(),
            "Lock type Exclusive is not a downgrade of Shared on 'DBK:1'"
        );

        let rejected_err = LockError::rejected("OLK:1$2", "lock recycled");
        assert!(matches!(rejected_err, LockError::Rejected { .. }));
    }

    #[test]
    fn test_error_retryable() {
        assert!(LockError::timeout("test", Duration::from_secs(1)).is_retryable());
        assert!(!LockError::rejected("test", "cancelled").is_retryable());
        assert!(!LockError::incompatible("test", "Exclusive").is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(LockError::MissingIdentity.is_fatal());
        assert!(LockError::disposed("test").is_fatal());
        assert!(!LockError::timeout("test", Duration::from_secs(1)).is_fatal());
        assert!(!LockError::aborted("transaction complete").is_fatal());
    }

    #[test]
    fn test_from_json_error() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        assert!(matches!(LockError::from(err), LockError::Configuration { .. }));
    }
}
