use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefugeError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },
    #[error("duplicate key: {message}")]
    DuplicateKey { message: String },
}

impl RefugeError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn version_conflict(expected: i64, actual: i64) -> Self {
        Self::VersionConflict { expected, actual }
    }

    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::DuplicateKey {
            message: message.into(),
        }
    }

    /// Stable taxonomy code surfaced to the routing layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage { .. } => "STORAGE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::DuplicateKey { .. } => "DUPLICATE_KEY",
        }
    }
}

pub type RefugeResult<T> = Result<T, RefugeError>;

impl From<sea_orm::DbErr> for RefugeError {
    fn from(value: sea_orm::DbErr) -> Self {
        match value.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(message)) => {
                RefugeError::duplicate_key(message)
            }
            _ => RefugeError::storage(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RefugeError;

    #[test]
    fn helper_constructors_set_variants() {
        let err = RefugeError::storage("disk");
        assert!(matches!(err, RefugeError::Storage { .. }));
        let err = RefugeError::not_found("missing");
        assert!(matches!(err, RefugeError::NotFound { .. }));
        let err = RefugeError::validation("bad");
        assert!(matches!(err, RefugeError::Validation { .. }));
        let err = RefugeError::version_conflict(3, 4);
        assert!(matches!(
            err,
            RefugeError::VersionConflict {
                expected: 3,
                actual: 4
            }
        ));
        let err = RefugeError::duplicate_key("dup");
        assert!(matches!(err, RefugeError::DuplicateKey { .. }));
    }

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(RefugeError::not_found("x").code(), "NOT_FOUND");
        assert_eq!(RefugeError::version_conflict(1, 2).code(), "VERSION_CONFLICT");
        assert_eq!(RefugeError::duplicate_key("k").code(), "DUPLICATE_KEY");
        assert_eq!(RefugeError::validation("v").code(), "VALIDATION");
        assert_eq!(
            RefugeError::version_conflict(1, 2).to_string(),
            "version conflict: expected 1, found 2"
        );
    }

    #[test]
    fn unrecognized_db_errors_become_storage() {
        let err = RefugeError::from(sea_orm::DbErr::Custom("boom".to_string()));
        assert_eq!(err.code(), "STORAGE");
    }
}
