//! Class signature handling.
//!
//! Classes are addressed by their Dalvik type descriptor (`Lcom/example/Foo;`).
//! Callers may also pass a dotted Java name (`com.example.Foo`) or a bare
//! binary name (`com/example/Foo`); [`normalize`] converts all of them.

use crate::error::{Error, Result};

/// Returns true if `s` is already a class descriptor of the form `L...;`
pub fn is_descriptor(s: &str) -> bool {
    s.len() > 2
        && s.starts_with('L')
        && s.ends_with(';')
        && !s[1..s.len() - 1].contains(';')
}

/// Normalize a class signature into descriptor form
pub fn normalize(signature: &str) -> Result<String> {
    let signature = signature.trim();
    if signature.is_empty() {
        return Err(Error::invalid_signature(signature));
    }
    if is_descriptor(signature) {
        return Ok(signature.to_string());
    }
    Ok(format!("L{};", signature.replace('.', "/")))
}

/// Strip the `L` prefix and `;` suffix of a descriptor
///
/// Input that is not a descriptor is returned unchanged.
pub fn binary_name(signature: &str) -> &str {
    if is_descriptor(signature) {
        &signature[1..signature.len() - 1]
    } else {
        signature
    }
}

/// Returns the unqualified name of a class descriptor or binary name
pub fn simple_name(signature: &str) -> &str {
    let name = binary_name(signature);
    name.rsplit('/').next().unwrap_or(name)
}

/// Build the descriptor for a binary name such as `com/example/Foo`
pub fn descriptor_of(binary_name: &str) -> String {
    format!("L{};", binary_name)
}
