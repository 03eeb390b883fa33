#![forbid(unsafe_code)]

use gridboard_layout::{SnapshotError, SurfaceError, WidgetId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid controller config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MountError {
    #[error("no renderer registered for content kind {kind:?}")]
    NoRenderer { kind: String },

    #[error("widget {id} already has mounted content")]
    AlreadyMounted { id: WidgetId },

    #[error("widget {id} has no mounted content")]
    NotMounted { id: WidgetId },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored layout is unreadable: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("storage backend failed: {message}")]
    Backend { message: String },
}

impl PersistenceError {
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Whether the stored bytes exist but cannot be understood.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Json(_) | Self::Snapshot(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "config-toml")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_lists_every_problem() {
        let error = ControllerError::InvalidConfig(vec!["a".into(), "b".into()]);
        assert_eq!(error.to_string(), "invalid controller config: a; b");
    }

    #[test]
    fn backend_constructor_and_corruption_flag() {
        let error = PersistenceError::backend("quota exceeded");
        assert_eq!(error.to_string(), "storage backend failed: quota exceeded");
        assert!(!error.is_corrupt());
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(PersistenceError::from(json).is_corrupt());
    }
}
