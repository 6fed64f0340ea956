use std::fmt;

use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidRequest,
    InvalidConstraint,
    InvalidRoot,
    UnsupportedInput,
    Storage,
    Unknown,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn storage(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Storage,
            code: "storage_error",
            public,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidRequest,
            code: "invalid_request",
            public,
            source,
        }
    }

    pub fn invalid_with_code(
        code: &'static str,
        public: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidRequest,
            code,
            public,
            source,
        }
    }

    pub fn invalid_constraint(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidConstraint,
            code: "invalid_constraint",
            public,
            source,
        }
    }

    pub fn invalid_root(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidRoot,
            code: "invalid_root",
            public,
            source,
        }
    }

    pub fn unsupported(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::UnsupportedInput,
            code: "unsupported_input",
            public,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            source,
        }
    }

    /// Human-readable diagnostic recorded on failed jobs.
    pub fn diagnostic(&self) -> String {
        format!("{}: {:#}", self.public, self.source)
    }
}

impl fmt::Display for LibError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.public, self.source)
    }
}

impl std::error::Error for LibError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<std::io::Error> for LibError {
    fn from(value: std::io::Error) -> Self {
        Self::storage("Blob storage request failed", anyhow!(value))
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::storage("Catalog request failed", anyhow!(value))
    }
}
