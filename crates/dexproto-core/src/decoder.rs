//! Schema decoder interface.
//!
//! The decoder turns a message-info string and the comma-joined objects array
//! into draft `.proto` field lines. Its encoding knowledge lives outside this
//! crate; [`CommandDecoder`] runs it as an external program and any
//! `Fn(&str, &str) -> Result<String>` can stand in for it.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, trace};

/// Trait for decoding a message-info string into raw field lines
pub trait SchemaDecoder {
    /// Decode `message_info` given the joined objects array
    ///
    /// Returns newline separated field lines and block delimiters.
    fn decode(&self, message_info: &str, values: &str) -> Result<String>;
}

impl<F> SchemaDecoder for F
where
    F: Fn(&str, &str) -> Result<String>,
{
    fn decode(&self, message_info: &str, values: &str) -> Result<String> {
        self(message_info, values)
    }
}

/// Runs an external decoder program
///
/// The program is invoked as `program [args...] <escaped-info> <values>` and
/// must print the field lines on stdout. The message-info string is passed in
/// Java escape form (see [`escape_message_info`]) since it contains control
/// characters.
#[derive(Debug, Clone)]
pub struct CommandDecoder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandDecoder {
    /// Creates a decoder running `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds a fixed argument placed before the message-info argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds several fixed arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl SchemaDecoder for CommandDecoder {
    fn decode(&self, message_info: &str, values: &str) -> Result<String> {
        let escaped = escape_message_info(message_info);
        trace!("Running {} with {} value bytes", self.program.display(), values.len());

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&escaped)
            .arg(values)
            .output()
            .map_err(|source| Error::DecoderSpawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::decoder(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("Decoder returned {} lines", text.lines().count());
        Ok(text)
    }
}

/// Escape every UTF-16 code unit of `s` as `\uXXXX` (uppercase hex)
pub fn escape_message_info(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 6);
    for unit in s.encode_utf16() {
        result.push_str(&format!("\\u{:04X}", unit));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_message_info() {
        assert_eq!(escape_message_info("\u{0}\u{3}a"), "\\u0000\\u0003\\u0061");
        assert_eq!(escape_message_info("\u{1234}"), "\\u1234");
        // Supplementary characters become surrogate pairs
        assert_eq!(escape_message_info("\u{1F600}"), "\\uD83D\\uDE00");
        assert_eq!(escape_message_info(""), "");
    }

    #[test]
    fn test_closure_decoder() {
        let decoder = |info: &str, values: &str| -> Result<String> {
            Ok(format!("{}|{}", info.len(), values))
        };
        assert_eq!(decoder.decode("ab", "x,").unwrap(), "2|x,");
    }

    #[test]
    fn test_missing_program() {
        let decoder = CommandDecoder::new("/nonexistent/dexproto-decoder");
        assert!(matches!(
            decoder.decode("\u{1}\u{2}", "a,"),
            Err(Error::DecoderSpawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_decoder_arguments() {
        let decoder = CommandDecoder::new("sh")
            .args(["-c", "printf '%s\\n%s\\n' \"$0\" \"$1\""]);
        let text = decoder.decode("\u{0}\u{1}", "name_,").unwrap();
        assert_eq!(text, "\\u0000\\u0001\nname_,\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_decoder_failure() {
        let decoder = CommandDecoder::new("sh").args(["-c", "echo bad info >&2; exit 3"]);
        let err = decoder.decode("\u{1}\u{2}", "").unwrap_err();
        assert!(matches!(err, Error::Decoder(_)));
        assert!(err.to_string().contains("bad info"));
    }
}
