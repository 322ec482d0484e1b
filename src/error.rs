//! Error types for the bridge
//!
//! Every recoverable failure is reported at the call site that produced it:
//! layout construction, region access, library resolution or binding.
//! A native callee that faults during `invoke` is not represented here.

use std::fmt;
use thiserror::Error;

/// Where a signature pairing went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Argument counts differ
    Arity,
    /// Top-level argument at this index
    Argument(usize),
    /// Nested struct field below an argument or the return value
    Field { root: Box<Position>, path: Vec<usize> },
    /// Return value
    Return,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Arity => write!(f, "arity"),
            Position::Argument(i) => write!(f, "argument {}", i),
            Position::Field { root, path } => {
                write!(f, "{} field ", root)?;
                for (i, idx) in path.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", idx)?;
                }
                Ok(())
            }
            Position::Return => write!(f, "return value"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DowncallError {
    #[error("Invalid layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Library not found: '{name}': {reason}")]
    LibraryNotFound { name: String, reason: String },

    #[error("Symbol '{symbol}' not found in '{library}'")]
    SymbolNotFound { symbol: String, library: String },

    #[error("Signature mismatch at {position}: expected {expected}, got {actual}")]
    SignatureMismatch {
        position: Position,
        expected: String,
        actual: String,
    },

    #[error("Failed to allocate {size} bytes aligned to {align}")]
    AllocationFailure { size: usize, align: usize },

    #[error("Access of {size} bytes at offset {offset} is out of bounds (length {length})")]
    OutOfBounds {
        offset: usize,
        size: usize,
        length: usize,
    },

    #[error("Offset {offset} is not aligned to {align}")]
    Misaligned { offset: usize, align: usize },

    #[error("In downcall '{name}': {source}")]
    Declaration {
        name: String,
        #[source]
        source: Box<DowncallError>,
    },
}

impl DowncallError {
    pub(crate) fn invalid_layout(reason: impl Into<String>) -> Self {
        DowncallError::InvalidLayout {
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(
        position: Position,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        DowncallError::SignatureMismatch {
            position,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Attach the name of the downcall declaration that failed
    pub(crate) fn in_declaration(self, name: &str) -> Self {
        DowncallError::Declaration {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}

/// Result type for bridge operations.
pub type DowncallResult<T> = Result<T, DowncallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_display() {
        assert_eq!(Position::Arity.to_string(), "arity");
        assert_eq!(Position::Argument(2).to_string(), "argument 2");
        let nested = Position::Field {
            root: Box::new(Position::Argument(0)),
            path: vec![1, 3],
        };
        assert_eq!(nested.to_string(), "argument 0 field 1.3");
        assert_eq!(Position::Return.to_string(), "return value");
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = DowncallError::mismatch(Position::Argument(1), "i32", "f64");
        let msg = err.to_string();
        assert!(msg.contains("argument 1"));
        assert!(msg.contains("i32"));
        assert!(msg.contains("f64"));

        let err = DowncallError::SymbolNotFound {
            symbol: "identity".to_string(),
            library: "libCallOverhead.so".to_string(),
        };
        assert!(err.to_string().contains("identity"));
        assert!(err.to_string().contains("libCallOverhead.so"));

        let err = DowncallError::invalid_layout("empty").in_declaration("identity_struct");
        assert_eq!(
            err.to_string(),
            "In downcall 'identity_struct': Invalid layout: empty"
        );
    }
}
