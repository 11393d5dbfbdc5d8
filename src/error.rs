//! Error types used by the query engine and fetch functions.
//!
//! This module defines two error enums:
//!
//! - [`FetchError`]: errors produced by a fetch run (user fetch function, retry engine).
//! - [`KeyError`]: errors raised while building a [`QueryKey`](crate::QueryKey).
//!
//! Both types provide `as_label` for logs/metrics. [`FetchError::is_retryable`]
//! drives the retry engine: only retryable errors consume the retry budget.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a fetch run.
///
/// A fetch function returns `Err(FetchError)` to signal a failed attempt.
/// Transient errors (`Fail`, `Timeout`, `Panicked`) are retried until the
/// retry budget is exhausted; `Fatal` and `Canceled` settle the run at once.
///
/// The error is stored in [`QueryState`](crate::QueryState) and handed to every
/// observer, hence `Clone` and string payloads.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Fetch attempt failed but may succeed if retried.
    #[error("fetch failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Fetch attempt exceeded a caller-enforced timeout.
    #[error("fetch timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable error (never retried).
    #[error("fatal fetch error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The fetch function panicked while producing its future or while polled.
    #[error("fetch function panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The run was cancelled before it settled.
    #[error("fetch cancelled")]
    Canceled,
}

impl FetchError {
    /// Shorthand for a retryable [`FetchError::Fail`].
    ///
    /// # Example
    /// ```
    /// use queryvisor::FetchError;
    ///
    /// let err = FetchError::fail("connection refused");
    /// assert!(err.is_retryable());
    /// ```
    pub fn fail(error: impl Into<String>) -> Self {
        FetchError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for a non-retryable [`FetchError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        FetchError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use queryvisor::FetchError;
    /// use std::time::Duration;
    ///
    /// let err = FetchError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "fetch_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            FetchError::Fail { .. } => "fetch_failed",
            FetchError::Timeout { .. } => "fetch_timeout",
            FetchError::Fatal { .. } => "fetch_fatal",
            FetchError::Panicked { .. } => "fetch_panicked",
            FetchError::Canceled => "fetch_canceled",
        }
    }

    /// Returns a compact message without the variant prefix.
    pub fn as_message(&self) -> String {
        match self {
            FetchError::Fail { error } | FetchError::Fatal { error } => error.clone(),
            FetchError::Timeout { timeout } => format!("timeout after {timeout:?}"),
            FetchError::Panicked { info } => format!("panic: {info}"),
            FetchError::Canceled => "canceled".to_string(),
        }
    }

    /// Indicates whether the error may be retried.
    ///
    /// Returns `true` for [`FetchError::Fail`], [`FetchError::Timeout`] and
    /// [`FetchError::Panicked`], `false` otherwise.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Fail { .. } | FetchError::Timeout { .. } | FetchError::Panicked { .. }
        )
    }

    /// Builds a [`FetchError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let info = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        FetchError::Panicked { info }
    }
}

/// # Errors produced while building a query key.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum KeyError {
    /// A key part could not be converted into a JSON value.
    #[error("key part is not serializable: {error}")]
    Serialize {
        /// The serializer's message.
        error: String,
    },
}

impl KeyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            KeyError::Serialize { .. } => "key_serialize",
        }
    }
}

impl From<serde_json::Error> for KeyError {
    fn from(err: serde_json::Error) -> Self {
        KeyError::Serialize {
            error: err.to_string(),
        }
    }
}
