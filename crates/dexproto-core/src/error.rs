//! Error types for the dexproto-core library.
//!
//! This module provides error handling using the `thiserror` crate. The
//! variants fall into two groups: conditions of the recovery engine itself
//! (a class that is not a protobuf message, a method that is not the schema
//! method) and failures of the collaborators the engine talks to.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dexproto operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all dexproto operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The class directory has no class with this signature
    #[error("Class not found: {signature}")]
    ClassNotFound {
        /// Normalized signature that was looked up
        signature: String,
    },

    /// No method of the class produced a usable message-info string
    #[error("no method of {signature} carries a protobuf message-info string")]
    NoSchemaMethod {
        /// Signature of the class that was searched
        signature: String,
    },

    /// A single method body contained no message-info string
    #[error("no message-info string found in method body")]
    NoInfoFound,

    /// Symbolic execution of one method hit an unresolvable operand
    #[error("interpreter aborted at instruction {index}: {details}")]
    InterpreterAbort {
        /// Index of the instruction in the method body
        index: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// A line returned by the schema decoder has neither admissible shape
    #[error("malformed field line from schema decoder: '{line}'")]
    MalformedFieldLine {
        /// The offending line
        line: String,
    },

    /// Nested message composition went deeper than the configured ceiling
    #[error("message nesting exceeds {max_depth} levels at {class}")]
    RecursionLimit {
        /// Simple name of the class that would have exceeded the limit
        class: String,
        /// Configured ceiling
        max_depth: usize,
    },

    /// The supplied class signature is empty or unusable
    #[error("invalid class signature: '{signature}'")]
    InvalidSignature {
        /// The rejected input
        signature: String,
    },

    /// The class directory itself failed
    #[error("class directory error: {0}")]
    Directory(String),

    /// The schema decoder reported a failure
    #[error("schema decoder failed: {0}")]
    Decoder(String),

    /// The external schema decoder program could not be started
    #[error("failed to run schema decoder '{program}': {source}")]
    DecoderSpawn {
        /// Program that failed to start
        program: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a class dump
    #[error("failed to parse class dump '{path}': {source}")]
    DumpParse {
        /// Path to the dump file
        path: PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Creates a new class-not-found error
    pub fn class_not_found(signature: impl Into<String>) -> Self {
        Self::ClassNotFound {
            signature: signature.into(),
        }
    }

    /// Creates a new no-schema-method error
    pub fn no_schema_method(signature: impl Into<String>) -> Self {
        Self::NoSchemaMethod {
            signature: signature.into(),
        }
    }

    /// Creates a new interpreter abort error
    pub fn interpreter_abort(index: usize, details: impl Into<String>) -> Self {
        Self::InterpreterAbort {
            index,
            details: details.into(),
        }
    }

    /// Creates a new malformed field line error
    pub fn malformed_field_line(line: impl Into<String>) -> Self {
        Self::MalformedFieldLine { line: line.into() }
    }

    /// Creates a new invalid signature error
    pub fn invalid_signature(signature: impl Into<String>) -> Self {
        Self::InvalidSignature {
            signature: signature.into(),
        }
    }

    /// Creates a new class directory error
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// Creates a new schema decoder error
    pub fn decoder(msg: impl Into<String>) -> Self {
        Self::Decoder(msg.into())
    }

    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the current method candidate should be skipped and the
    /// next one tried
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoInfoFound | Self::InterpreterAbort { .. })
    }

    /// Returns true if this error is reported as an unsuccessful parse rather
    /// than propagated to the caller
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Self::ClassNotFound { .. }
                | Self::NoSchemaMethod { .. }
                | Self::NoInfoFound
                | Self::InterpreterAbort { .. }
                | Self::MalformedFieldLine { .. }
                | Self::RecursionLimit { .. }
                | Self::InvalidSignature { .. }
                | Self::Decoder(_)
        )
    }
}
