//! Error types shared across the reconciliation engine
//!
//! `InventoryError` carries a structured `ErrorKind` when the accessor knows
//! what went wrong. Accessors that only surface message text get a kind
//! inferred by `ErrorKind::classify`.

use thiserror::Error;

/// Coarse classification of an inventory failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The object being created is already present
    AlreadyExists,
    NotFound,
    /// Timeouts, dropped connections, busy or locked resources
    Transient,
    /// Session expired or credentials rejected
    Authentication,
    /// The caller lacks the privilege for the call
    PermissionDenied,
    Other,
}

const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "unavailable",
    "busy",
    "locked",
    "temporarily",
    "try again",
];

const AUTH_KEYWORDS: &[&str] = &[
    "authentication",
    "not authenticated",
    "session is not authenticated",
    "login",
    "unauthorized",
];

const ALREADY_EXISTS_KEYWORDS: &[&str] = &["already exists", "alreadyexists", "duplicate"];

impl ErrorKind {
    /// Infer a kind from free-form error text
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let contains_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if contains_any(ALREADY_EXISTS_KEYWORDS) {
            ErrorKind::AlreadyExists
        } else if contains_any(AUTH_KEYWORDS) {
            ErrorKind::Authentication
        } else if contains_any(TRANSIENT_KEYWORDS) {
            ErrorKind::Transient
        } else if lower.contains("not found") || lower.contains("does not exist") {
            ErrorKind::NotFound
        } else if lower.contains("permission denied") || lower.contains("no permission") {
            ErrorKind::PermissionDenied
        } else {
            ErrorKind::Other
        }
    }
}

/// Failure reported by an inventory accessor call
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct InventoryError {
    kind: ErrorKind,
    message: String,
}

impl InventoryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error whose kind is inferred from its text
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(&message),
            message,
        }
    }

    pub fn already_exists(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::AlreadyExists, format!("{} already exists", what))
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found", what))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that abort a run before any mutation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown environment '{0}'. Known environments: {1}")]
    UnknownEnvironment(String, String),
    /// Note: bounds must match MIN_WORKERS/MAX_WORKERS in constants.rs
    #[error("Invalid max_threads: {0}. Must be between 1 and 10")]
    InvalidThreads(usize),
    #[error("Invalid retry max_attempts: {0}. Must be at least 1")]
    InvalidAttempts(u32),
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Tag '{tag}' requested in category '{requested}' already exists in category '{existing}'")]
    CategoryCollision {
        tag: String,
        requested: String,
        existing: String,
    },
}

/// Errors raised while loading the rule tables
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("{table} CSV is missing required column(s): {missing}")]
    MissingColumns { table: &'static str, missing: String },
    #[error("OS rule row {row}: invalid GuestOSPattern '{pattern}': {source}")]
    InvalidPattern {
        row: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{table} CSV could not be read: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: csv::Error,
    },
}

/// Errors from the tag resolver
#[derive(Debug, Clone, Error)]
pub enum TagError {
    #[error("Tag '{tag}' requested in category '{requested}' already exists in category '{existing}'")]
    CategoryCollision {
        tag: String,
        requested: String,
        existing: String,
    },
    #[error("Category '{0}' does not exist and could not be created")]
    MissingCategory(String),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Errors walking the pre-fetched inventory tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Cycle detected in container hierarchy at '{0}'")]
    Cycle(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transient_messages() {
        assert_eq!(ErrorKind::classify("The operation timed out"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify("Connection reset by peer"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify("Resource is busy"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify("Object is locked by another task"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify("503 Service Unavailable"), ErrorKind::Transient);
    }

    #[test]
    fn test_classify_already_exists_wins_over_transient() {
        // "duplicate" wording must never be retried
        assert_eq!(
            ErrorKind::classify("Duplicate name on locked folder"),
            ErrorKind::AlreadyExists
        );
        assert_eq!(ErrorKind::classify("Tag already exists"), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_classify_other_messages() {
        assert_eq!(ErrorKind::classify("Session is not authenticated"), ErrorKind::Authentication);
        assert_eq!(ErrorKind::classify("Role not found"), ErrorKind::NotFound);
        assert_eq!(ErrorKind::classify("Permission denied"), ErrorKind::PermissionDenied);
        assert_eq!(ErrorKind::classify("Invalid argument: principal"), ErrorKind::Other);
    }

    #[test]
    fn test_from_message_keeps_text() {
        let err = InventoryError::from_message("Request timed out after 30s");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.to_string(), "Request timed out after 30s");
    }
}
