//! Constant recovery for protobuf-lite schema methods.
//!
//! Generated protobuf-lite classes build their schema inside a method that
//! switches on a "method to invoke" argument. The build case constructs an
//! `Object[]` of field names, classes and numbers, then hands it to
//! `newMessageInfo` together with a string literal whose characters encode the
//! field layout (the *message-info string*).
//!
//! This module recovers both by symbolically executing a method body once.
//!
//! ## Algorithm Overview
//!
//! 1. **Guard**: `const/4` literals are collected until an `if-eq` compares a
//!    register against the guard literal (`2` by default); this is the build
//!    case of the switch preamble.
//! 2. **Objects**: from the first `const-string` on, string, class, integer
//!    and opaque values are tracked per register in an object table.
//! 3. **Freeze**: `filled-new-array` fixes the order of the table entries.
//!    Arrays built element by element with `aput-object` populate a sparse
//!    index map instead, which wins over the frozen order.
//! 4. **Resolve**: the message-info string is the only `const-string` holding
//!    a character in `0x00..=0x03`.

mod select;
mod value;

use crate::dex::{Instruction, Operand};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

pub use select::select_schema_method;
pub use value::{RegisterValue, ENUM_PLACEHOLDER};

/// Register id to tracked value
pub type ObjectTable = BTreeMap<u32, RegisterValue>;

/// Array index to value, for arrays filled with `aput-object`
pub type SparseValueMap = BTreeMap<i64, RegisterValue>;

/// Configuration for constant recovery
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Literal the build-case guard compares against
    pub guard_literal: i64,
    /// Minimum length, in characters, of a message-info string
    pub min_info_len: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            guard_literal: 2,
            min_info_len: 2,
        }
    }
}

impl RecoveryConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the guard literal
    pub fn guard_literal(mut self, literal: i64) -> Self {
        self.guard_literal = literal;
        self
    }

    /// Sets the minimum message-info length
    pub fn min_info_len(mut self, len: usize) -> Self {
        self.min_info_len = len;
        self
    }
}

/// Constants recovered from a schema method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    /// The raw message-info string
    pub message_info: String,
    /// Objects array contents, in array order
    pub values: Vec<RegisterValue>,
}

impl Recovered {
    /// Renders the values the way the schema decoder expects them: every
    /// value followed by a comma
    pub fn joined_values(&self) -> String {
        self.values.iter().map(|v| format!("{},", v)).collect()
    }
}

/// Interpreter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Collecting `const/4` literals of the switch preamble
    CollectingGuard,
    /// Collecting object table entries
    CollectingObjects,
    /// Array order fixed by `filled-new-array`
    Frozen,
    /// End of the instruction stream
    Done,
}

/// Instruction classes the interpreter distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    Const4,
    IfEq,
    ConstString,
    ConstClass,
    ConstLiteral,
    StaticGetObject,
    MoveObject,
    FilledNewArray { range: bool },
    AputObject,
    MoveResult,
    Other,
}

impl Opcode {
    fn classify(mnemonic: &str) -> Self {
        match mnemonic {
            "const/4" => Opcode::Const4,
            "if-eq" => Opcode::IfEq,
            "const-class" => Opcode::ConstClass,
            "sget-object" => Opcode::StaticGetObject,
            "aput-object" => Opcode::AputObject,
            m if m.starts_with("const-string") => Opcode::ConstString,
            m if m.contains("const/") => Opcode::ConstLiteral,
            m if m.contains("move-object") => Opcode::MoveObject,
            m if m.contains("filled-new-array") => Opcode::FilledNewArray {
                range: m.contains("range"),
            },
            m if m.contains("move-result") => Opcode::MoveResult,
            _ => Opcode::Other,
        }
    }
}

/// Symbolic interpreter over one method body
#[derive(Debug)]
pub struct Interpreter<'a> {
    config: &'a RecoveryConfig,
    state: State,
    const_regs: HashMap<u32, i64>,
    const_regs_complete: bool,
    objects: ObjectTable,
    frozen: Option<Vec<RegisterValue>>,
    sparse: SparseValueMap,
    message_info: Option<String>,
}

impl<'a> Interpreter<'a> {
    /// Creates an interpreter in the [`State::CollectingGuard`] state
    pub fn new(config: &'a RecoveryConfig) -> Self {
        Self {
            config,
            state: State::CollectingGuard,
            const_regs: HashMap::new(),
            const_regs_complete: false,
            objects: ObjectTable::new(),
            frozen: None,
            sparse: SparseValueMap::new(),
            message_info: None,
        }
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Object table as seen so far
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// Execute one instruction
    pub fn step(&mut self, index: usize, ins: &Instruction) -> Result<()> {
        let opcode = Opcode::classify(&ins.mnemonic);
        trace!("{:>4} {:?} {}", index, self.state, ins.mnemonic);

        match self.state {
            State::CollectingGuard => self.step_guard(index, ins, opcode),
            State::CollectingObjects | State::Frozen => self.step_objects(index, ins, opcode),
            State::Done => Ok(()),
        }
    }

    fn step_guard(&mut self, index: usize, ins: &Instruction, opcode: Opcode) -> Result<()> {
        match opcode {
            Opcode::Const4 => {
                if !self.const_regs_complete {
                    let dst = register(ins, 0, index)?;
                    let value = literal(ins, 1, index)?;
                    self.const_regs.insert(dst, value);
                }
            }
            Opcode::IfEq => {
                let tested = ins
                    .operand(1)
                    .and_then(Operand::as_register)
                    .and_then(|r| self.const_regs.get(&r));
                if tested == Some(&self.config.guard_literal) {
                    debug!("Build-case guard found at instruction {}", index);
                    self.const_regs_complete = true;
                }
            }
            Opcode::ConstString => {
                self.state = State::CollectingObjects;
                return self.step_objects(index, ins, opcode);
            }
            Opcode::ConstClass
            | Opcode::ConstLiteral
            | Opcode::StaticGetObject
            | Opcode::MoveObject
            | Opcode::FilledNewArray { .. }
            | Opcode::AputObject
            | Opcode::MoveResult
            | Opcode::Other => {}
        }
        Ok(())
    }

    fn step_objects(&mut self, index: usize, ins: &Instruction, opcode: Opcode) -> Result<()> {
        match opcode {
            Opcode::ConstString => {
                let dst = register(ins, 0, index)?;
                let s = string(ins, 1, index)?;
                if is_message_info(s) {
                    if s.chars().count() < self.config.min_info_len {
                        trace!("Ignoring short message-info string at {}", index);
                    } else if self.message_info.is_none() {
                        debug!(
                            "Message-info string ({} chars) at instruction {}",
                            s.chars().count(),
                            index
                        );
                        self.message_info = Some(s.to_string());
                    } else {
                        trace!("Ignoring further message-info string at {}", index);
                    }
                } else if self.collecting() {
                    self.objects.insert(dst, RegisterValue::StringLiteral(s.to_string()));
                }
            }
            Opcode::ConstClass => {
                if self.collecting() {
                    let dst = register(ins, 0, index)?;
                    let descriptor = type_descriptor(ins, 1, index)?;
                    self.objects.insert(dst, RegisterValue::type_reference(descriptor));
                }
            }
            Opcode::Const4 | Opcode::ConstLiteral => {
                let dst = register(ins, 0, index)?;
                let value = literal(ins, 1, index)?;
                self.objects.insert(dst, RegisterValue::IntegerConstant(value));
            }
            Opcode::StaticGetObject => {
                if self.collecting() {
                    let dst = register(ins, 0, index)?;
                    self.objects.insert(dst, RegisterValue::EnumMarker);
                }
            }
            Opcode::MoveObject => {
                if self.collecting() {
                    let dst = register(ins, 0, index)?;
                    let src = register(ins, 1, index)?;
                    let value = self.objects.get(&src).cloned().ok_or_else(|| {
                        Error::interpreter_abort(index, format!("move from unset register v{}", src))
                    })?;
                    self.objects.insert(dst, value);
                }
            }
            Opcode::FilledNewArray { range } => {
                if self.state == State::CollectingObjects {
                    self.freeze(index, ins, range)?;
                } else {
                    trace!("Array order already frozen, ignoring instruction {}", index);
                }
            }
            Opcode::AputObject => {
                let src = register(ins, 0, index)?;
                let idx = register(ins, 2, index)?;
                let key = self.resolve_index(index, idx)?;
                let value = self.objects.get(&src).cloned().ok_or_else(|| {
                    Error::interpreter_abort(index, format!("array store from unset register v{}", src))
                })?;
                trace!("objects[{}] = {}", key, value);
                self.sparse.insert(key, value);
            }
            Opcode::MoveResult => {
                let dst = register(ins, 0, index)?;
                self.objects.insert(dst, RegisterValue::EnumMarker);
            }
            Opcode::IfEq | Opcode::Other => {}
        }
        Ok(())
    }

    fn collecting(&self) -> bool {
        self.state == State::CollectingObjects && self.message_info.is_none()
    }

    fn freeze(&mut self, index: usize, ins: &Instruction, range: bool) -> Result<()> {
        let snapshot = if range {
            self.objects.values().cloned().collect()
        } else {
            ins.operands
                .iter()
                .skip(1)
                .filter_map(Operand::as_register)
                .map(|r| {
                    self.objects.get(&r).cloned().ok_or_else(|| {
                        Error::interpreter_abort(index, format!("array element v{} is unset", r))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        debug!("Froze {} array elements at instruction {}", snapshot.len(), index);
        self.frozen = Some(snapshot);
        self.state = State::Frozen;
        Ok(())
    }

    fn resolve_index(&self, index: usize, reg: u32) -> Result<i64> {
        match self.objects.get(&reg) {
            Some(value) => value.as_integer().ok_or_else(|| {
                Error::interpreter_abort(index, format!("array index v{} holds {:?}", reg, value))
            }),
            None => self.const_regs.get(&reg).copied().ok_or_else(|| {
                Error::interpreter_abort(index, format!("array index v{} is unset", reg))
            }),
        }
    }

    /// End the stream and produce the recovered constants
    pub fn finish(mut self) -> Result<Recovered> {
        self.state = State::Done;
        let message_info = self.message_info.ok_or(Error::NoInfoFound)?;

        let values = if !self.sparse.is_empty() {
            self.sparse.into_values().collect()
        } else {
            self.frozen.unwrap_or_default()
        };

        Ok(Recovered {
            message_info,
            values,
        })
    }
}

/// Recover the message-info string and objects array of one method body
pub fn recover(instructions: &[Instruction], config: &RecoveryConfig) -> Result<Recovered> {
    let mut interpreter = Interpreter::new(config);
    for (index, ins) in instructions.iter().enumerate() {
        interpreter.step(index, ins)?;
    }
    interpreter.finish()
}

/// Returns true if `s` holds a character in `0x00..=0x03`
fn is_message_info(s: &str) -> bool {
    s.chars().any(|c| c <= '\u{3}')
}

fn operand(ins: &Instruction, position: usize, index: usize) -> Result<&Operand> {
    ins.operand(position).ok_or_else(|| {
        Error::interpreter_abort(
            index,
            format!("{} has no operand {}", ins.mnemonic, position),
        )
    })
}

fn register(ins: &Instruction, position: usize, index: usize) -> Result<u32> {
    let op = operand(ins, position, index)?;
    op.as_register().ok_or_else(|| {
        Error::interpreter_abort(index, format!("expected register, found {:?}", op))
    })
}

fn literal(ins: &Instruction, position: usize, index: usize) -> Result<i64> {
    let op = operand(ins, position, index)?;
    op.as_literal().ok_or_else(|| {
        Error::interpreter_abort(index, format!("expected literal, found {:?}", op))
    })
}

fn string(ins: &Instruction, position: usize, index: usize) -> Result<&str> {
    let op = operand(ins, position, index)?;
    op.as_string().ok_or_else(|| {
        Error::interpreter_abort(index, format!("expected string, found {:?}", op))
    })
}

fn type_descriptor(ins: &Instruction, position: usize, index: usize) -> Result<&str> {
    let op = operand(ins, position, index)?;
    op.as_type().ok_or_else(|| {
        Error::interpreter_abort(index, format!("expected type, found {:?}", op))
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn strings(recovered: &Recovered) -> Vec<String> {
        recovered.values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_range_array_order() {
        let body = vec![
            const_string(0, "a"),
            const_string(1, "b"),
            const_string(2, "c"),
            filled_new_array_range(0, 2),
            const_string(3, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["a", "b", "c"]);
        assert_eq!(recovered.message_info, INFO);
        assert_eq!(recovered.joined_values(), "a,b,c,");
    }

    #[test]
    fn test_sparse_array_overrides_and_sorts() {
        let body = vec![
            const4(6, 2),
            if_eq(4, 6),
            const_string(0, "c"),
            const4(1, 2),
            aput_object(0, 7, 1),
            const_string(0, "a"),
            const4(1, 0),
            aput_object(0, 7, 1),
            const_string(0, "b"),
            const4(1, 1),
            aput_object(0, 7, 1),
            const_string(2, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sparse_index_from_guard_constants() {
        let body = vec![
            const4(9, 0),
            const4(8, 1),
            const_string(0, "first"),
            const_string(1, "second"),
            aput_object(1, 5, 8),
            aput_object(0, 5, 9),
            const_string(2, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["first", "second"]);
    }

    #[test]
    fn test_constants_after_guard_are_ignored() {
        let body = vec![
            const4(0, 2),
            if_eq(1, 0),
            const4(9, 0),
            const_string(0, "x"),
            aput_object(0, 5, 9),
            const_string(2, INFO),
        ];
        let err = recover(&body, &RecoveryConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InterpreterAbort { index: 4, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_guard_literal_is_configurable() {
        let config = RecoveryConfig::new().guard_literal(3);
        let body = vec![
            const4(0, 2),
            if_eq(1, 0),
            const4(9, 0),
            const_string(0, "x"),
            aput_object(0, 5, 9),
            const_string(2, INFO),
        ];
        // 2 is not the guard any more, so v9 is still collected
        let recovered = recover(&body, &config).unwrap();
        assert_eq!(strings(&recovered), vec!["x"]);
    }

    #[test]
    fn test_no_info_found() {
        let body = vec![
            const_string(0, "a"),
            const_string(1, "b"),
            filled_new_array_range(0, 1),
            invoke(),
        ];
        assert!(matches!(
            recover(&body, &RecoveryConfig::default()),
            Err(Error::NoInfoFound)
        ));
        assert!(matches!(
            recover(&[], &RecoveryConfig::default()),
            Err(Error::NoInfoFound)
        ));
    }

    #[test]
    fn test_info_needs_minimum_length() {
        let body = vec![const_string(0, "\u{1}")];
        assert!(matches!(
            recover(&body, &RecoveryConfig::default()),
            Err(Error::NoInfoFound)
        ));
        let recovered = recover(&body, &RecoveryConfig::new().min_info_len(1)).unwrap();
        assert_eq!(recovered.message_info, "\u{1}");
        assert!(recovered.values.is_empty());
    }

    #[test]
    fn test_short_control_string_is_never_an_object() {
        let body = vec![
            const_string(0, "\u{1}"),
            const_string(1, "a"),
            filled_new_array_range(0, 1),
            const_string(2, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["a"]);
        assert_eq!(recovered.message_info, INFO);
    }

    #[test]
    fn test_move_result_is_enum_marker() {
        let body = vec![
            const_string(0, "a"),
            move_result(1),
            filled_new_array_range(0, 1),
            const_string(2, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(recovered.values[1], RegisterValue::EnumMarker);
        assert_eq!(recovered.joined_values(), "a,enum.type,");
    }

    #[test]
    fn test_guard_against_unrecorded_register_is_ignored() {
        let body = vec![
            const4(0, 2),
            if_eq(1, 5),
            const4(9, 0),
            const_string(0, "x"),
            aput_object(0, 5, 9),
            const_string(2, INFO),
        ];
        // v5 holds nothing, so the guard never closes and v9 stays usable
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["x"]);
    }

    #[test]
    fn test_explicit_array_operands() {
        let body = vec![
            const_string(0, "zero"),
            const_string(1, "one"),
            const_string(2, "two"),
            filled_new_array(&[2, 0]),
            const_string(3, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["two", "zero"]);
    }

    #[test]
    fn test_explicit_array_with_unset_register_aborts() {
        let body = vec![
            const_string(0, "zero"),
            filled_new_array(&[0, 4]),
            const_string(3, INFO),
        ];
        assert!(matches!(
            recover(&body, &RecoveryConfig::default()),
            Err(Error::InterpreterAbort { index: 1, .. })
        ));
    }

    #[test]
    fn test_class_enum_and_alias_values() {
        let body = vec![
            const_string(0, "payload_"),
            const_class(1, "Lcom/example/Payload;"),
            sget_object(2),
            move_object(3, 0),
            const16(4, 300),
            filled_new_array_range(0, 4),
            const_string(5, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(
            recovered.values,
            vec![
                RegisterValue::StringLiteral("payload_".into()),
                RegisterValue::TypeReference("com/example/Payload".into()),
                RegisterValue::EnumMarker,
                RegisterValue::StringLiteral("payload_".into()),
                RegisterValue::IntegerConstant(300),
            ]
        );
    }

    #[test]
    fn test_move_from_unset_register_aborts() {
        let body = vec![const_string(0, "a"), move_object(1, 7), const_string(2, INFO)];
        assert!(matches!(
            recover(&body, &RecoveryConfig::default()),
            Err(Error::InterpreterAbort { index: 1, .. })
        ));
    }

    #[test]
    fn test_frozen_snapshot_is_stable() {
        let body = vec![
            const_string(0, "a"),
            const_string(1, "b"),
            filled_new_array_range(0, 1),
            const4(0, 5),
            const_string(1, "late"),
            filled_new_array_range(0, 1),
            const_string(2, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["a", "b"]);
    }

    #[test]
    fn test_no_collection_after_info() {
        let body = vec![
            const_string(0, "a"),
            const_string(1, INFO),
            const_string(2, "b"),
            filled_new_array_range(0, 2),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["a"]);
    }

    #[test]
    fn test_preamble_is_skipped() {
        // Nothing before the first const-string reaches the object table
        let body = vec![
            const_class(0, "Lcom/example/Noise;"),
            sget_object(1),
            const_string(2, "a"),
            filled_new_array_range(0, 2),
            const_string(3, INFO),
        ];
        let recovered = recover(&body, &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["a"]);
    }

    #[test]
    fn test_state_transitions() {
        let config = RecoveryConfig::default();
        let mut interpreter = Interpreter::new(&config);
        assert_eq!(interpreter.state(), State::CollectingGuard);

        interpreter.step(0, &const4(0, 2)).unwrap();
        interpreter.step(1, &if_eq(1, 0)).unwrap();
        assert_eq!(interpreter.state(), State::CollectingGuard);

        interpreter.step(2, &const_string(0, "a")).unwrap();
        assert_eq!(interpreter.state(), State::CollectingObjects);
        assert_eq!(interpreter.objects().len(), 1);

        interpreter.step(3, &filled_new_array_range(0, 0)).unwrap();
        assert_eq!(interpreter.state(), State::Frozen);

        interpreter.step(4, &const_string(1, INFO)).unwrap();
        let recovered = interpreter.finish().unwrap();
        assert_eq!(recovered.values.len(), 1);
    }

    #[test]
    fn test_schema_body_helper() {
        let recovered =
            recover(&schema_body(INFO, &["x_", "y_"]), &RecoveryConfig::default()).unwrap();
        assert_eq!(strings(&recovered), vec!["x_", "y_"]);
    }
}
