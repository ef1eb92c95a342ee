//! Recursive message composition.
//!
//! The schema decoder only knows the field layout of one class, and it writes
//! `message`, `group` and `enum` placeholders where the real type was a class
//! reference. [`Composer`] resolves those placeholders against the class's
//! declared fields, follows the referenced classes, and renders every reached
//! message as a `message Name { ... }` block, parents before children.
//!
//! Reference cycles are cut by a [`VisitedSet`] keyed by simple class name;
//! [`ComposerConfig::max_depth`] bounds the recursion as well.

mod line;

use crate::decoder::SchemaDecoder;
use crate::dex::{ClassDescriptor, ClassDirectory};
use crate::error::{Error, Result};
use crate::recovery::{select_schema_method, RecoveryConfig};
use crate::signature;
use std::collections::HashSet;
use tracing::{debug, trace, warn};

pub use line::{is_base_type, parse_lines, DecodedFieldLine, FieldLine, FieldLineShape, TypeKind};

/// Comment appended to enum fields
pub const UNKNOWN_ENUM_COMMENT: &str = " // unknown enum";

/// Configuration for message composition
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Indentation string for field lines (default: tab)
    pub indent_str: String,
    /// Maximum message nesting depth
    pub max_depth: usize,
    /// Constant recovery settings
    pub recovery: RecoveryConfig,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            indent_str: "\t".to_string(),
            max_depth: 64,
            recovery: RecoveryConfig::default(),
        }
    }
}

impl ComposerConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the constant recovery settings
    pub fn recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }
}

/// Simple names of the classes composed during one top-level parse
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    names: HashSet<String>,
}

impl VisitedSet {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a class as visited; returns false if it already was
    pub fn insert(&mut self, simple_name: &str) -> bool {
        if self.names.contains(simple_name) {
            return false;
        }
        self.names.insert(simple_name.to_string())
    }

    /// Returns true if the class was visited
    pub fn contains(&self, simple_name: &str) -> bool {
        self.names.contains(simple_name)
    }

    /// Number of visited classes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if nothing was visited
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A composed message and the messages it pulled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    /// Simple class name
    pub name: String,
    /// Decoder lines of this class
    pub lines: Vec<DecodedFieldLine>,
    /// Rendered block of this class alone
    pub text: String,
    /// Messages first reached through this one, in field order
    pub children: Vec<ComposedMessage>,
}

impl ComposedMessage {
    /// Render this message followed by all reached messages, depth-first
    pub fn render(&self) -> String {
        let mut output = self.text.clone();
        for child in &self.children {
            output.push_str(&child.render());
        }
        output
    }

    /// Length of the longest reference chain starting at this message
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Self::depth).max().unwrap_or(0)
    }

    /// Number of messages in this tree
    pub fn message_count(&self) -> usize {
        1 + self.children.iter().map(Self::message_count).sum::<usize>()
    }
}

/// Composes message definitions from classes of a [`ClassDirectory`]
pub struct Composer<'a, D: ?Sized, S: ?Sized> {
    directory: &'a D,
    decoder: &'a S,
    config: &'a ComposerConfig,
}

impl<'a, D, S> Composer<'a, D, S>
where
    D: ClassDirectory + ?Sized,
    S: SchemaDecoder + ?Sized,
{
    /// Creates a new composer
    pub fn new(directory: &'a D, decoder: &'a S, config: &'a ComposerConfig) -> Self {
        Self {
            directory,
            decoder,
            config,
        }
    }

    /// Recover and decode the field lines of a single class
    pub fn decode_class(&self, class: &ClassDescriptor) -> Result<Vec<DecodedFieldLine>> {
        let (_, recovered) = select_schema_method(class, &self.config.recovery)?;
        if recovered.values.is_empty() {
            debug!("{} has an empty objects array", class.signature);
            return Ok(Vec::new());
        }

        let raw = self
            .decoder
            .decode(&recovered.message_info, &recovered.joined_values())?;
        parse_lines(&raw)
    }

    /// Compose `class` and every message reachable from it
    ///
    /// The caller is expected to have inserted `class` itself into `visited`.
    pub fn compose(
        &self,
        class: &ClassDescriptor,
        visited: &mut VisitedSet,
    ) -> Result<ComposedMessage> {
        self.compose_at(class, visited, 0)
    }

    fn compose_at(
        &self,
        class: &ClassDescriptor,
        visited: &mut VisitedSet,
        depth: usize,
    ) -> Result<ComposedMessage> {
        let name = class.simple_name().to_string();
        if depth >= self.config.max_depth {
            return Err(Error::RecursionLimit {
                class: name,
                max_depth: self.config.max_depth,
            });
        }

        debug!("Composing message {} (depth {})", name, depth);
        let lines = self.decode_class(class)?;

        let mut text = format!("message {} {{\n", name);
        let mut children = Vec::new();

        for line in &lines {
            let rendered = match line {
                DecodedFieldLine::Delimiter(raw) => raw.clone(),
                DecodedFieldLine::Field(field) => {
                    self.resolve_field(class, field, visited, depth, &mut children)?
                }
            };
            text.push_str(&self.config.indent_str);
            text.push_str(&rendered);
            text.push('\n');
        }
        text.push_str("}\n\n");

        Ok(ComposedMessage {
            name,
            lines,
            text,
            children,
        })
    }

    /// Rewrite one field line, composing the message it references if that
    /// message was not seen yet
    fn resolve_field(
        &self,
        class: &ClassDescriptor,
        field: &FieldLine,
        visited: &mut VisitedSet,
        depth: usize,
        children: &mut Vec<ComposedMessage>,
    ) -> Result<String> {
        let token = field.type_token();

        match TypeKind::of(token) {
            TypeKind::Message | TypeKind::Group => {
                let field_name = field
                    .name()
                    .ok_or_else(|| Error::malformed_field_line(field.raw()))?;

                let Some(declared) = class.find_field(field_name) else {
                    warn!(
                        "{}: no declared field named {}, leaving {} unresolved",
                        class.signature, field_name, token
                    );
                    return Ok(field.raw().to_string());
                };

                let simple = declared.declared_type_simple_name();
                if visited.insert(simple) {
                    self.compose_reference(&declared.declared_type, visited, depth, children)?;
                } else {
                    trace!("{} already composed", simple);
                }
                Ok(field.with_type(simple))
            }
            TypeKind::Enum => Ok(format!(
                "{}{}",
                field.with_type("int32"),
                UNKNOWN_ENUM_COMMENT
            )),
            TypeKind::Base => Ok(field.display()),
            TypeKind::Reference(binary_name) => {
                let simple = signature::simple_name(binary_name);
                if visited.insert(simple) {
                    let descriptor = signature::descriptor_of(binary_name);
                    self.compose_reference(&descriptor, visited, depth, children)?;
                } else {
                    trace!("{} already composed", simple);
                }
                Ok(field.display())
            }
        }
    }

    fn compose_reference(
        &self,
        descriptor: &str,
        visited: &mut VisitedSet,
        depth: usize,
        children: &mut Vec<ComposedMessage>,
    ) -> Result<()> {
        match self.directory.lookup_class(descriptor)? {
            Some(child) => {
                children.push(self.compose_at(child, visited, depth + 1)?);
            }
            None => {
                warn!("Referenced message class {} not found", descriptor);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::{DexDump, FieldDescriptor, MethodDescriptor};
    use crate::recovery::testing::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::collections::HashMap;

    /// Decoder returning canned output keyed by the joined values
    struct CannedDecoder {
        outputs: HashMap<String, String>,
        calls: Cell<usize>,
    }

    impl CannedDecoder {
        fn new(outputs: &[(&str, &str)]) -> Self {
            Self {
                outputs: outputs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: Cell::new(0),
            }
        }
    }

    impl SchemaDecoder for CannedDecoder {
        fn decode(&self, message_info: &str, values: &str) -> Result<String> {
            assert_eq!(message_info, INFO);
            self.calls.set(self.calls.get() + 1);
            self.outputs
                .get(values)
                .cloned()
                .ok_or_else(|| Error::decoder(format!("unexpected values {}", values)))
        }
    }

    fn proto_class(signature: &str, values: &[&str]) -> ClassDescriptor {
        ClassDescriptor::new(signature)
            .method(MethodDescriptor::new("<init>", vec![]))
            .method(MethodDescriptor::new("dynamicMethod", schema_body(INFO, values)))
    }

    fn compose_root(dump: &DexDump, decoder: &CannedDecoder, root: &str) -> Result<ComposedMessage> {
        let config = ComposerConfig::default();
        let composer = Composer::new(dump, decoder, &config);
        let class = dump.lookup_class(root)?.expect("root class");
        let mut visited = VisitedSet::new();
        visited.insert(class.simple_name());
        composer.compose(class, &mut visited)
    }

    /// Brace nesting stays non-negative and returns to zero
    fn braces_balanced(text: &str) -> bool {
        let mut level: i64 = 0;
        for c in text.chars() {
            match c {
                '{' => level += 1,
                '}' => {
                    level -= 1;
                    if level < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
        level == 0
    }

    #[test]
    fn test_flat_message() {
        let dump = DexDump::from_classes([proto_class("Lcom/example/User;", &["id_", "name_"])]);
        let decoder = CannedDecoder::new(&[(
            "id_,name_,",
            "optional int64 id_ = 1;\noptional string name_ = 2;\n",
        )]);

        let composed = compose_root(&dump, &decoder, "Lcom/example/User;").unwrap();
        assert_eq!(
            composed.render(),
            "message User {\n\toptional int64 id_ = 1;\n\toptional string name_ = 2;\n}\n\n"
        );
        assert_eq!(composed.depth(), 1);
    }

    #[test]
    fn test_nested_message_emitted_once() {
        let dump = DexDump::from_classes([
            proto_class("Lcom/example/Foo;", &["first_", "second_"])
                .field(FieldDescriptor::new("first_", "Lcom/example/Bar;"))
                .field(FieldDescriptor::new("renamedSecond", "Lcom/example/Bar;").with_original_name("second_")),
            proto_class("Lcom/example/Bar;", &["value_"]),
        ]);
        let decoder = CannedDecoder::new(&[
            (
                "first_,second_,",
                "optional message first_ = 1;\noptional message second_ = 2;",
            ),
            ("value_,", "optional string value_ = 1;"),
        ]);

        let composed = compose_root(&dump, &decoder, "Lcom/example/Foo;").unwrap();
        let text = composed.render();
        assert_eq!(
            text,
            "message Foo {\n\toptional Bar first_ = 1;\n\toptional Bar second_ = 2;\n}\n\n\
             message Bar {\n\toptional string value_ = 1;\n}\n\n"
        );
        assert_eq!(text.matches("message Bar {").count(), 1);
        assert_eq!(decoder.calls.get(), 2);
    }

    #[test]
    fn test_self_reference_terminates() {
        let dump = DexDump::from_classes([proto_class("Lcom/example/Node;", &["next_", "label_"])
            .field(FieldDescriptor::new("next_", "Lcom/example/Node;"))]);
        let decoder = CannedDecoder::new(&[(
            "next_,label_,",
            "optional message next_ = 1;\noptional string label_ = 2;",
        )]);

        let composed = compose_root(&dump, &decoder, "Lcom/example/Node;").unwrap();
        let text = composed.render();
        assert_eq!(text.matches("message Node {").count(), 1);
        assert!(text.contains("optional Node next_ = 1;"));
        assert_eq!(decoder.calls.get(), 1);
    }

    #[test]
    fn test_mutual_reference_cycle() {
        let dump = DexDump::from_classes([
            proto_class("La/Ping;", &["pong_"]).field(FieldDescriptor::new("pong_", "La/Pong;")),
            proto_class("La/Pong;", &["ping_"]).field(FieldDescriptor::new("ping_", "La/Ping;")),
        ]);
        let decoder = CannedDecoder::new(&[
            ("pong_,", "optional message pong_ = 1;"),
            ("ping_,", "optional message ping_ = 1;"),
        ]);

        let composed = compose_root(&dump, &decoder, "La/Ping;").unwrap();
        assert_eq!(composed.message_count(), 2);
        assert_eq!(composed.depth(), 2);
        assert!(braces_balanced(&composed.render()));
    }

    #[test]
    fn test_enum_becomes_int32() {
        let dump = DexDump::from_classes([proto_class("LStatus;", &["state_"])]);
        let decoder = CannedDecoder::new(&[("state_,", "optional enum state_ = 1;")]);

        let composed = compose_root(&dump, &decoder, "LStatus;").unwrap();
        assert!(composed
            .text
            .contains("\toptional int32 state_ = 1; // unknown enum\n"));
    }

    #[test]
    fn test_qualified_reference_resolved_globally() {
        let dump = DexDump::from_classes([
            proto_class("Lcom/example/Order;", &["items_", "com/example/Item"]),
            proto_class("Lcom/example/Item;", &["sku_"]),
        ]);
        let decoder = CannedDecoder::new(&[
            (
                "items_,com/example/Item,",
                "repeated com/example/Item items_ = 1;",
            ),
            ("sku_,", "optional string sku_ = 1;"),
        ]);

        let composed = compose_root(&dump, &decoder, "Lcom/example/Order;").unwrap();
        assert_eq!(
            composed.render(),
            "message Order {\n\trepeated Item items_ = 1;\n}\n\n\
             message Item {\n\toptional string sku_ = 1;\n}\n\n"
        );
    }

    #[test]
    fn test_substring_base_type_is_not_followed() {
        // "Point" contains "int", so the heuristic treats it as a base type
        let dump = DexDump::from_classes([
            proto_class("Lgeo/Shape;", &["origin_"]),
            proto_class("Lgeo/Point;", &["x_"]),
        ]);
        let decoder = CannedDecoder::new(&[("origin_,", "optional geo/Point origin_ = 1;")]);

        let composed = compose_root(&dump, &decoder, "Lgeo/Shape;").unwrap();
        assert_eq!(composed.render(), "message Shape {\n\toptional Point origin_ = 1;\n}\n\n");
        assert!(composed.children.is_empty());
    }

    #[test]
    fn test_oneof_block_passes_through() {
        let dump = DexDump::from_classes([
            proto_class("LEvent;", &["click_", "text_"])
                .field(FieldDescriptor::new("click_", "LClick;")),
            proto_class("LClick;", &["x_"]),
        ]);
        let decoder = CannedDecoder::new(&[
            (
                "click_,text_,",
                "oneof payload {\nmessage oneof_payload click_ = 1;\nstring oneof_payload text_ = 2;\n}",
            ),
            ("x_,", "optional int32 x_ = 1;"),
        ]);

        let composed = compose_root(&dump, &decoder, "LEvent;").unwrap();
        assert_eq!(
            composed.text,
            "message Event {\n\toneof payload {\n\tClick oneof_payload click_ = 1;\n\
             \tstring oneof_payload text_ = 2;\n\t}\n}\n\n"
        );
        assert_eq!(composed.children.len(), 1);
        assert!(braces_balanced(&composed.render()));
    }

    #[test]
    fn test_group_resolved_through_declared_field() {
        let dump = DexDump::from_classes([
            proto_class("Lcom/example/Envelope;", &["header_"])
                .field(FieldDescriptor::new("header_", "Lcom/example/Header;")),
            proto_class("Lcom/example/Header;", &["id_"]),
        ]);
        let decoder = CannedDecoder::new(&[
            ("header_,", "optional group header_ = 1;"),
            ("id_,", "optional int64 id_ = 1;"),
        ]);

        let composed = compose_root(&dump, &decoder, "Lcom/example/Envelope;").unwrap();
        assert_eq!(
            composed.render(),
            "message Envelope {\n\toptional Header header_ = 1;\n}\n\n\
             message Header {\n\toptional int64 id_ = 1;\n}\n\n"
        );
    }

    #[test]
    fn test_oneof_qualified_reference_resolved_globally() {
        let dump = DexDump::from_classes([
            proto_class("Lcom/x/Choice;", &["y_", "com/x/Y"]),
            proto_class("Lcom/x/Y;", &["flag_"]),
        ]);
        let decoder = CannedDecoder::new(&[
            (
                "y_,com/x/Y,",
                "oneof v {\ncom/x/Y oneof_v y_ = 1;\n}",
            ),
            ("flag_,", "optional bool flag_ = 1;"),
        ]);

        let composed = compose_root(&dump, &decoder, "Lcom/x/Choice;").unwrap();
        assert_eq!(
            composed.text,
            "message Choice {\n\toneof v {\n\tY oneof_v y_ = 1;\n\t}\n}\n\n"
        );
        assert_eq!(composed.children.len(), 1);
        assert_eq!(composed.children[0].name, "Y");
    }

    #[test]
    fn test_unmatched_message_field_is_kept() {
        let dump = DexDump::from_classes([proto_class("LLoose;", &["ghost_"])]);
        let decoder = CannedDecoder::new(&[("ghost_,", "optional message ghost_ = 1;")]);

        let composed = compose_root(&dump, &decoder, "LLoose;").unwrap();
        assert!(composed.text.contains("\toptional message ghost_ = 1;\n"));
    }

    #[test]
    fn test_missing_referenced_class_is_skipped() {
        let dump = DexDump::from_classes([
            proto_class("LHolder;", &["inner_"]).field(FieldDescriptor::new("inner_", "LGone;")),
        ]);
        let decoder = CannedDecoder::new(&[("inner_,", "optional message inner_ = 1;")]);

        let composed = compose_root(&dump, &decoder, "LHolder;").unwrap();
        assert!(composed.text.contains("optional Gone inner_ = 1;"));
        assert!(composed.children.is_empty());
    }

    #[test]
    fn test_empty_objects_array_skips_decoder() {
        let dump = DexDump::from_classes([proto_class("LEmpty;", &[])]);
        let decoder = CannedDecoder::new(&[]);

        let composed = compose_root(&dump, &decoder, "LEmpty;").unwrap();
        assert_eq!(composed.render(), "message Empty {\n}\n\n");
        assert_eq!(decoder.calls.get(), 0);
    }

    #[test]
    fn test_malformed_line_fails() {
        let dump = DexDump::from_classes([proto_class("LBad;", &["a_"])]);
        let decoder = CannedDecoder::new(&[("a_,", "this is not a field")]);

        let err = compose_root(&dump, &decoder, "LBad;").unwrap_err();
        assert!(matches!(err, Error::MalformedFieldLine { .. }));
    }

    #[test]
    fn test_depth_limit() {
        let dump = DexDump::from_classes([
            proto_class("LA;", &["b_"]).field(FieldDescriptor::new("b_", "LB;")),
            proto_class("LB;", &["c_"]).field(FieldDescriptor::new("c_", "LC;")),
            proto_class("LC;", &["v_"]),
        ]);
        let decoder = CannedDecoder::new(&[
            ("b_,", "optional message b_ = 1;"),
            ("c_,", "optional message c_ = 1;"),
            ("v_,", "optional bool v_ = 1;"),
        ]);

        let composed = compose_root(&dump, &decoder, "LA;").unwrap();
        assert_eq!(composed.depth(), 3);

        let config = ComposerConfig::new().max_depth(2);
        let composer = Composer::new(&dump, &decoder, &config);
        let root = dump.lookup_class("LA;").unwrap().unwrap();
        let mut visited = VisitedSet::new();
        visited.insert("A");
        let err = composer.compose(root, &mut visited).unwrap_err();
        assert!(matches!(err, Error::RecursionLimit { ref class, max_depth: 2 } if class == "C"));
    }

    #[test]
    fn test_custom_indent() {
        let dump = DexDump::from_classes([proto_class("LUser;", &["id_"])]);
        let decoder = CannedDecoder::new(&[("id_,", "optional int64 id_ = 1;")]);
        let config = ComposerConfig::new().indent_str("  ");
        let composer = Composer::new(&dump, &decoder, &config);
        let class = dump.lookup_class("LUser;").unwrap().unwrap();

        let composed = composer.compose(class, &mut VisitedSet::new()).unwrap();
        assert_eq!(composed.text, "message User {\n  optional int64 id_ = 1;\n}\n\n");
    }

    #[test]
    fn test_visited_set() {
        let mut visited = VisitedSet::new();
        assert!(visited.is_empty());
        assert!(visited.insert("Foo"));
        assert!(!visited.insert("Foo"));
        assert!(visited.contains("Foo"));
        assert_eq!(visited.len(), 1);
    }
}
