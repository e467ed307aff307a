// Error handling framework for the trigger checker

use thiserror::Error;

/// Storage errors
///
/// Every variant is treated as transient by the checker loops: the failing cycle is
/// logged and abandoned, the next event or tick tries again.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Errors raised by the checker engine and its supervised tasks
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("Invalid checker configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote source unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Task '{task}' panicked: {reason}")]
    TaskPanicked { task: String, reason: String },

    #[error("Task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error("Checker already started")]
    AlreadyStarted,
}

/// Error returned by a trigger evaluator for a single trigger
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Trigger evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Trigger evaluation panicked: {0}")]
    Panicked(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Remote metric source errors
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Remote source is not configured")]
    NotConfigured,

    #[error("Remote request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

/// Failure of one remote trigger scan
#[derive(Error, Debug)]
pub enum RemoteScanError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::RedisError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}

impl From<RemoteError> for CheckerError {
    fn from(err: RemoteError) -> Self {
        CheckerError::RemoteUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::RequestFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_display() {
        let err = CheckerError::InvalidConfiguration("MaxParallelChecks value is too large".into());
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_storage_error_converts_into_checker_error() {
        let err: CheckerError = StorageError::QueryFailed("boom".to_string()).into();
        assert!(matches!(err, CheckerError::Storage(StorageError::QueryFailed(_))));
    }

    #[test]
    fn test_remote_error_converts_into_checker_error() {
        let err: CheckerError = RemoteError::NotConfigured.into();
        assert!(matches!(err, CheckerError::RemoteUnavailable(_)));
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_task_panicked_display() {
        let err = CheckerError::TaskPanicked {
            task: "metric-events-consumer".to_string(),
            reason: "index out of bounds".to_string(),
        };
        assert!(err.to_string().contains("metric-events-consumer"));
    }

    #[test]
    fn test_json_error_converts_into_storage_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StorageError = json_err.into();
        assert!(matches!(err, StorageError::InvalidJson(_)));
    }
}
