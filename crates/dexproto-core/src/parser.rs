//! Top-level class parsing.
//!
//! [`ProtoParser::parse_class`] is the entry point used by tools: it accepts a
//! class signature in any of the supported forms and reports the outcome as a
//! [`ParseOutcome`], which serializes to the JSON shape RPC clients expect.

use crate::compose::{ComposedMessage, Composer, ComposerConfig, VisitedSet};
use crate::decoder::SchemaDecoder;
use crate::dex::ClassDirectory;
use crate::error::{Error, Result};
use crate::signature;
use serde::Serialize;
use tracing::{debug, info};

/// Message attached to successful outcomes
pub const SUCCESS_MESSAGE: &str = "Protobuf definition parsed successfully";

/// Result of parsing one class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseOutcome {
    /// Whether a definition was produced
    pub success: bool,
    /// Normalized signature, or the input if it could not be normalized
    pub class_signature: String,
    /// Rendered definition of the class and every message it reaches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto_definition: Option<String>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human readable status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ParseOutcome {
    /// Creates a successful outcome
    pub fn parsed(class_signature: impl Into<String>, proto_definition: impl Into<String>) -> Self {
        Self {
            success: true,
            class_signature: class_signature.into(),
            proto_definition: Some(proto_definition.into()),
            error: None,
            message: Some(SUCCESS_MESSAGE.to_string()),
        }
    }

    /// Creates a failed outcome
    pub fn failed(class_signature: impl Into<String>, error: &Error) -> Self {
        Self {
            success: false,
            class_signature: class_signature.into(),
            proto_definition: None,
            error: Some(error.to_string()),
            message: None,
        }
    }
}

/// Parses protobuf-lite classes of a [`ClassDirectory`]
pub struct ProtoParser<'a, D: ?Sized, S: ?Sized> {
    directory: &'a D,
    decoder: &'a S,
    config: ComposerConfig,
}

impl<'a, D, S> ProtoParser<'a, D, S>
where
    D: ClassDirectory + ?Sized,
    S: SchemaDecoder + ?Sized,
{
    /// Creates a parser with default configuration
    pub fn new(directory: &'a D, decoder: &'a S) -> Self {
        Self {
            directory,
            decoder,
            config: ComposerConfig::default(),
        }
    }

    /// Sets the composer configuration
    pub fn with_config(mut self, config: ComposerConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the active configuration
    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Parse the class named by `class_signature`
    ///
    /// Conditions of the input (unknown class, not a protobuf class, a decoder
    /// that rejects the schema or output that cannot be interpreted) produce an
    /// unsuccessful outcome. Failures of the class directory, or a decoder that
    /// cannot be started, are returned as errors.
    pub fn parse_class(&self, class_signature: &str) -> Result<ParseOutcome> {
        let normalized =
            signature::normalize(class_signature).unwrap_or_else(|_| class_signature.to_string());

        match self.compose_class(class_signature) {
            Ok(composed) => {
                info!(
                    "Parsed {} ({} messages)",
                    normalized,
                    composed.message_count()
                );
                Ok(ParseOutcome::parsed(normalized, composed.render()))
            }
            Err(e) if e.is_parse_failure() => {
                debug!("{}: {}", normalized, e);
                Ok(ParseOutcome::failed(normalized, &e))
            }
            Err(e) => Err(e),
        }
    }

    /// Compose the class named by `class_signature` with a fresh visited set
    pub fn compose_class(&self, class_signature: &str) -> Result<ComposedMessage> {
        let normalized = signature::normalize(class_signature)?;
        let class = self
            .directory
            .lookup_class(&normalized)?
            .ok_or_else(|| Error::class_not_found(&normalized))?;

        let mut visited = VisitedSet::new();
        visited.insert(class.simple_name());

        Composer::new(self.directory, self.decoder, &self.config).compose(class, &mut visited)
    }
}
