//! Finding the schema method of a class.

use super::{recover, Recovered, RecoveryConfig};
use crate::dex::{ClassDescriptor, MethodDescriptor};
use crate::error::{Error, Result};
use tracing::{debug, trace};

/// Returns the first method of `class` whose body yields a message-info
/// string, together with the recovered constants
///
/// Methods are tried in declaration order. Initializers and methods without a
/// body are skipped, and a method that aborts the interpreter is treated like
/// one without a message-info string.
pub fn select_schema_method<'c>(
    class: &'c ClassDescriptor,
    config: &RecoveryConfig,
) -> Result<(&'c MethodDescriptor, Recovered)> {
    for method in &class.methods {
        if method.is_initializer() || method.instructions.is_empty() {
            trace!("Skipping {}->{}", class.signature, method.name);
            continue;
        }

        match recover(&method.instructions, config) {
            Ok(recovered) => {
                debug!(
                    "Schema method {}->{} ({} values)",
                    class.signature,
                    method.name,
                    recovered.values.len()
                );
                return Ok((method, recovered));
            }
            Err(e) if e.is_recoverable() => {
                trace!("{}->{}: {}", class.signature, method.name, e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::no_schema_method(&class.signature))
}
