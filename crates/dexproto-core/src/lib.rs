//! # dexproto-core
//!
//! A library for recovering Protocol Buffer message definitions from
//! decompiled Android (protobuf-lite) classes.
//!
//! Generated protobuf-lite classes do not embed a `FileDescriptorProto`.
//! Their schema survives only as constants inside a method body: a
//! *message-info* string encoding the field layout and an `Object[]` of field
//! names and classes. This crate provides the core functionality for:
//! - Symbolically executing Dalvik instructions to recover those constants
//! - Selecting the schema method of a class
//! - Composing readable `message` definitions, following nested messages
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`dex`]: Class, field, method and instruction model, class directories
//! - [`recovery`]: Constant recovery interpreter and method selection
//! - [`decoder`]: Schema decoder interface
//! - [`compose`]: Recursive message composition
//! - [`parser`]: Top-level entry point
//! - [`signature`]: Class signature normalization
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use dexproto_core::{CommandDecoder, DexDump, ProtoParser};
//!
//! // Classes exported from a disassembler
//! let dump = DexDump::load("./classes.json")?;
//!
//! // The message-info decoder runs as an external program
//! let decoder = CommandDecoder::new("pbdecode");
//!
//! let parser = ProtoParser::new(&dump, &decoder);
//! let outcome = parser.parse_class("com.example.proto.User")?;
//! if let Some(definition) = outcome.proto_definition {
//!     println!("{}", definition);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! The library provides several traits for customization:
//!
//! - [`ClassDirectory`]: Plug in the host that owns the dex file
//! - [`SchemaDecoder`]: Plug in the message-info decoder
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod compose;
pub mod decoder;
pub mod dex;
pub mod error;
pub mod parser;
pub mod recovery;
pub mod signature;

// Re-export primary types for convenience
pub use compose::{ComposedMessage, Composer, ComposerConfig, VisitedSet};
pub use decoder::{CommandDecoder, SchemaDecoder};
pub use dex::{ClassDescriptor, ClassDirectory, DexDump, FieldDescriptor, Instruction, MethodDescriptor, Operand};
pub use error::{Error, Result};
pub use parser::{ParseOutcome, ProtoParser};
pub use recovery::{recover, select_schema_method, Recovered, RecoveryConfig, RegisterValue};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
