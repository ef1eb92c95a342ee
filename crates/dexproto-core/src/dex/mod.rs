//! Decompiled class model.
//!
//! This module describes the view of a dex file that the recovery engine
//! needs: classes with their structural fields and method bodies, and method
//! bodies as an ordered list of [`Instruction`]s whose pool references have
//! already been resolved by whoever produced them.
//!
//! ## Extensibility
//!
//! The [`ClassDirectory`] trait is the seam to the host that owns the dex
//! file. [`DexDump`] implements it over JSON class dumps:
//!
//! ```no_run
//! use dexproto_core::dex::{ClassDescriptor, ClassDirectory};
//! use dexproto_core::Result;
//! use std::collections::HashMap;
//!
//! struct InMemory(HashMap<String, ClassDescriptor>);
//!
//! impl ClassDirectory for InMemory {
//!     fn lookup_class(&self, signature: &str) -> Result<Option<&ClassDescriptor>> {
//!         Ok(self.0.get(signature))
//!     }
//! }
//! ```

mod dump;

use crate::error::Result;
use crate::signature;
use serde::{Deserialize, Serialize};

pub use dump::DexDump;

/// Name of instance constructors
pub const CONSTRUCTOR: &str = "<init>";

/// Name of static initializers
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// A single instruction operand, resolved against the dex pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operand {
    /// Register index (`vN`)
    Register(u32),
    /// Integer literal
    Literal(i64),
    /// String pool entry
    String(String),
    /// Type pool entry, as a descriptor (`Lcom/example/Foo;`)
    Type(String),
}

impl Operand {
    /// Returns the register index if this is a register operand
    pub fn as_register(&self) -> Option<u32> {
        match self {
            Operand::Register(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the literal value if this is a literal operand
    pub fn as_literal(&self) -> Option<i64> {
        match self {
            Operand::Literal(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string if this is a string pool operand
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Operand::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the descriptor if this is a type pool operand
    pub fn as_type(&self) -> Option<&str> {
        match self {
            Operand::Type(t) => Some(t),
            _ => None,
        }
    }
}

/// One instruction of a method body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Smali mnemonic, e.g. `const-string` or `filled-new-array/range`
    pub mnemonic: String,
    /// Operands in encoding order
    #[serde(default)]
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Creates a new instruction
    pub fn new(mnemonic: impl Into<String>, operands: Vec<Operand>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            operands,
        }
    }

    /// Returns the operand at `position`
    pub fn operand(&self, position: usize) -> Option<&Operand> {
        self.operands.get(position)
    }
}

/// A structural (declared) field of a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Current name, possibly renamed by the analyst
    pub name: String,
    /// Name as it appears in the dex file
    #[serde(default)]
    pub original_name: Option<String>,
    /// Declared type descriptor
    #[serde(rename = "type")]
    pub declared_type: String,
}

impl FieldDescriptor {
    /// Creates a field whose current and original names are the same
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            original_name: None,
            declared_type: declared_type.into(),
        }
    }

    /// Sets the original (pre-rename) name
    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    /// Returns true if `name` is this field's current or original name
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.original_name.as_deref() == Some(name)
    }

    /// Unqualified name of the declared type
    pub fn declared_type_simple_name(&self) -> &str {
        signature::simple_name(&self.declared_type)
    }
}

/// A method and its body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Method name
    pub name: String,
    /// Instruction stream, empty for abstract and native methods
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl MethodDescriptor {
    /// Creates a new method
    pub fn new(name: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self {
            name: name.into(),
            instructions,
        }
    }

    /// Returns true for `<init>` and `<clinit>`
    pub fn is_initializer(&self) -> bool {
        self.name == CONSTRUCTOR || self.name == STATIC_INITIALIZER
    }
}

/// A decompiled class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Class descriptor, e.g. `Lcom/example/Foo;`
    pub signature: String,
    /// Declared fields in declaration order
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Methods in declaration order
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl ClassDescriptor {
    /// Creates an empty class
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Adds a field
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a method
    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Unqualified class name
    pub fn simple_name(&self) -> &str {
        signature::simple_name(&self.signature)
    }

    /// Finds the structural field whose current or original name is `name`
    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.is_named(name))
    }
}

/// Trait for looking up classes of the analyzed dex file
///
/// Returning `Ok(None)` means the class does not exist; `Err` is reserved for
/// failures of the directory itself.
pub trait ClassDirectory {
    /// Look up a class by its descriptor (`Lcom/example/Foo;`)
    fn lookup_class(&self, signature: &str) -> Result<Option<&ClassDescriptor>>;
}
