//! Two-pass loading of serialized `FileDescriptorSet`s.
//!
//! The parse pass drives the crate's own push parser with the bootstrap
//! schema, building a raw descriptor tree. The seal pass registers every
//! type under its fully-qualified name, resolves symbolic field targets
//! into direct indices, parses primitive defaults, and computes message
//! layouts. A failed load leaves the pool untouched: everything is staged
//! into a scratch copy that replaces the pool only on success.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use log::{debug, trace};

use crate::bootstrap;
use crate::bytestr::ByteString;
use crate::descriptor::{
    DefaultValue, DescriptorPool, EnumDescriptor, EnumIndex, FieldDescriptor, FieldType, Label,
    MessageDescriptor, MessageIndex, Symbol, TypeRef,
};
use crate::encoding::{WireType, MAX_FIELD_NUMBER};
use crate::error::{Error, ErrorCode, Result};
use crate::parse::{Events, Parser};
use crate::stream::Value;
use crate::DEFAULT_NESTING_LIMIT;

impl DescriptorPool {
    /// The built-in pool describing `descriptor.proto` itself.
    pub fn bootstrap() -> DescriptorPool {
        bootstrap::pool()
    }

    /// A fresh pool holding the types of one serialized
    /// `FileDescriptorSet`.
    pub fn load(bytes: impl Into<Bytes>) -> Result<DescriptorPool> {
        let mut pool = DescriptorPool::new();
        pool.add_descriptor_set(bytes)?;
        Ok(pool)
    }

    /// Decodes a serialized `FileDescriptorSet` and merges its types into
    /// this pool. References may span descriptor sets loaded earlier. On
    /// error the pool is left unchanged.
    pub fn add_descriptor_set(&mut self, bytes: impl Into<Bytes>) -> Result<()> {
        let bytes = bytes.into();
        let files = parse_set(&bytes)?;
        let mut staged = self.clone();
        seal(&mut staged, files)?;
        *self = staged;
        Ok(())
    }
}

#[cold]
fn malformed(description: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorCode::MalformedDescriptor, description)
}

fn as_malformed(error: Error) -> Error {
    if error.code() == ErrorCode::MalformedDescriptor {
        error
    } else {
        malformed(format!("unparseable descriptor set: {}", error))
    }
}

// ---------------------------------------------------------------------------
// Parse pass
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RawFile {
    name: String,
    package: String,
    messages: Vec<RawMessage>,
    enums: Vec<RawEnum>,
}

#[derive(Default)]
struct RawMessage {
    name: String,
    fields: Vec<RawField>,
    nested: Vec<RawMessage>,
    enums: Vec<RawEnum>,
}

#[derive(Default)]
struct RawField {
    name: String,
    number: Option<i32>,
    label: Option<i32>,
    field_type: Option<i32>,
    type_name: Option<String>,
    default: Option<String>,
    packed: bool,
}

#[derive(Default)]
struct RawEnum {
    name: String,
    values: Vec<(String, i32)>,
}

enum Node {
    Set { files: Vec<RawFile> },
    File(RawFile),
    Message(RawMessage),
    Field(RawField),
    Options { packed: bool },
    Enum(RawEnum),
    EnumValue { name: String, number: Option<i32> },
}

struct Scope {
    msg: MessageIndex,
    node: Node,
}

/// Consumes push-parser events for a `FileDescriptorSet`, building the raw
/// descriptor tree. Tag decisions come from the bootstrap pool, so fields
/// of `descriptor.proto` this engine does not model are skipped, not
/// rejected.
struct SetBuilder {
    bootstrap: DescriptorPool,
    scopes: Vec<Scope>,
    pending: Option<u32>,
}

impl SetBuilder {
    fn new() -> SetBuilder {
        SetBuilder {
            bootstrap: bootstrap::pool(),
            scopes: vec![Scope {
                msg: bootstrap::FILE_DESCRIPTOR_SET,
                node: Node::Set { files: Vec::new() },
            }],
            pending: None,
        }
    }

    fn top(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("root scope is never popped")
    }

    fn into_files(mut self) -> Result<Vec<RawFile>> {
        match self.scopes.pop() {
            Some(Scope {
                node: Node::Set { files },
                ..
            }) if self.scopes.is_empty() => Ok(files),
            _ => Err(malformed("unbalanced descriptor nesting")),
        }
    }
}

fn utf8(bytes: &ByteString) -> Result<String> {
    String::from_utf8(bytes.as_bytes().to_vec())
        .map_err(|_| malformed("descriptor string is not UTF-8"))
}

impl Events for SetBuilder {
    type Frame = ();

    fn tag(&mut self, _frame: &mut (), number: u32, wire_type: WireType) -> Result<Option<FieldType>> {
        let msg = self.top().msg;
        let Some(field) = self.bootstrap.message(msg).field_by_number(number) else {
            trace!("descriptor field {} not modeled; skipping", number);
            self.pending = None;
            return Ok(None);
        };
        if wire_type != field.field_type().wire_type() {
            return Err(malformed(format!(
                "descriptor field {} has wire type {:?}",
                number, wire_type
            )));
        }
        self.pending = Some(number);
        Ok(Some(field.field_type()))
    }

    fn value(&mut self, _frame: &mut (), value: Value) -> Result<()> {
        let number = self
            .pending
            .take()
            .ok_or_else(|| malformed("descriptor value without a tag"))?;
        match (&mut self.top().node, number, value) {
            (Node::Field(field), 3, Value::Int32(v)) => field.number = Some(v),
            (Node::Field(field), 4, Value::Enum(v)) => field.label = Some(v),
            (Node::Field(field), 5, Value::Enum(v)) => field.field_type = Some(v),
            (Node::Options { packed }, 2, Value::Bool(v)) => *packed = v,
            (Node::EnumValue { number: slot, .. }, 2, Value::Int32(v)) => *slot = Some(v),
            _ => return Err(malformed("descriptor value in unexpected position")),
        }
        Ok(())
    }

    fn string(&mut self, _frame: &mut (), bytes: ByteString) -> Result<()> {
        let number = self
            .pending
            .take()
            .ok_or_else(|| malformed("descriptor string without a tag"))?;
        let text = utf8(&bytes)?;
        match (&mut self.top().node, number) {
            (Node::File(file), 1) => file.name = text,
            (Node::File(file), 2) => file.package = text,
            (Node::Message(message), 1) => message.name = text,
            (Node::Field(field), 1) => field.name = text,
            (Node::Field(field), 6) => field.type_name = Some(text),
            (Node::Field(field), 7) => field.default = Some(text),
            (Node::Enum(decl), 1) => decl.name = text,
            (Node::EnumValue { name, .. }, 1) => *name = text,
            _ => return Err(malformed("descriptor string in unexpected position")),
        }
        Ok(())
    }

    fn submsg_start(&mut self, _frame: &mut ()) -> Result<()> {
        let number = self
            .pending
            .take()
            .ok_or_else(|| malformed("descriptor submessage without a tag"))?;
        let parent = self.top().msg;
        let child_msg = self
            .bootstrap
            .message(parent)
            .field_by_number(number)
            .and_then(FieldDescriptor::message_type)
            .ok_or_else(|| malformed("descriptor submessage under a scalar field"))?;
        let node = match (&self.top().node, number) {
            (Node::Set { .. }, 1) => Node::File(RawFile::default()),
            (Node::File(_), 4) => Node::Message(RawMessage::default()),
            (Node::File(_), 5) => Node::Enum(RawEnum::default()),
            (Node::Message(_), 2) => Node::Field(RawField::default()),
            (Node::Message(_), 3) => Node::Message(RawMessage::default()),
            (Node::Message(_), 4) => Node::Enum(RawEnum::default()),
            (Node::Field(_), 8) => Node::Options { packed: false },
            (Node::Enum(_), 2) => Node::EnumValue {
                name: String::new(),
                number: None,
            },
            _ => return Err(malformed("descriptor submessage in unexpected position")),
        };
        self.scopes.push(Scope {
            msg: child_msg,
            node,
        });
        Ok(())
    }

    fn submsg_end(&mut self, _frame: &mut ()) -> Result<()> {
        let Scope { node, .. } = self
            .scopes
            .pop()
            .ok_or_else(|| malformed("unbalanced descriptor nesting"))?;
        match (&mut self.top().node, node) {
            (Node::Set { files }, Node::File(file)) => {
                debug!(
                    "parsed descriptor file {:?}: {} message(s), {} enum(s)",
                    file.name,
                    file.messages.len(),
                    file.enums.len()
                );
                files.push(file);
            }
            (Node::File(file), Node::Message(message)) => file.messages.push(message),
            (Node::File(file), Node::Enum(decl)) => file.enums.push(decl),
            (Node::Message(message), Node::Field(field)) => message.fields.push(field),
            (Node::Message(message), Node::Message(nested)) => message.nested.push(nested),
            (Node::Message(message), Node::Enum(decl)) => message.enums.push(decl),
            (Node::Field(field), Node::Options { packed }) => field.packed = packed,
            (Node::Enum(decl), Node::EnumValue { name, number }) => {
                let number = number.ok_or_else(|| malformed("enum value missing number"))?;
                if name.is_empty() {
                    return Err(malformed("enum value missing name"));
                }
                decl.values.push((name, number));
            }
            _ => return Err(malformed("unbalanced descriptor nesting")),
        }
        Ok(())
    }
}

fn parse_set(bytes: &Bytes) -> Result<Vec<RawFile>> {
    let mut parser: Parser<()> = Parser::new(DEFAULT_NESTING_LIMIT);
    let mut builder = SetBuilder::new();
    let consumed = parser.parse(bytes, &mut builder).map_err(as_malformed)?;
    parser.finish(&bytes[consumed..]).map_err(as_malformed)?;
    builder.into_files()
}

// ---------------------------------------------------------------------------
// Seal pass
// ---------------------------------------------------------------------------

fn join(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_owned()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn seal(pool: &mut DescriptorPool, files: Vec<RawFile>) -> Result<()> {
    let first = pool.messages.len();
    let mut enum_defaults: Vec<(usize, usize, String)> = Vec::new();

    for file in files {
        let package = file.package;
        for raw in file.messages {
            register_message(pool, &package, raw, &mut enum_defaults)?;
        }
        for raw in file.enums {
            register_enum(pool, &package, raw)?;
        }
    }

    for index in first..pool.messages.len() {
        resolve_message(pool, index)?;
    }

    for (msg, slot, text) in enum_defaults {
        let enum_index = pool.messages[msg].fields[slot]
            .enum_type()
            .ok_or_else(|| malformed("default value on an unresolved enum field"))?;
        let value = pool
            .enumeration(enum_index)
            .value(&text)
            .ok_or_else(|| malformed(format!("unknown enum default value {:?}", text)))?;
        pool.messages[msg].fields[slot].default = DefaultValue::Enum(value);
    }

    for index in first..pool.messages.len() {
        DescriptorPool::finish_message(&mut pool.messages[index])?;
    }
    Ok(())
}

fn register_message(
    pool: &mut DescriptorPool,
    scope: &str,
    raw: RawMessage,
    enum_defaults: &mut Vec<(usize, usize, String)>,
) -> Result<()> {
    if raw.name.is_empty() {
        return Err(malformed("message missing a name"));
    }
    let fq = join(scope, &raw.name);
    let index = MessageIndex(pool.messages.len() as u32);
    pool.insert_symbol(fq.clone(), Symbol::Message(index))?;

    let msg_slot = pool.messages.len();
    let mut fields = Vec::with_capacity(raw.fields.len());
    for (slot, raw_field) in raw.fields.into_iter().enumerate() {
        let (field, enum_default) = build_field(raw_field, &fq)?;
        if let Some(text) = enum_default {
            enum_defaults.push((msg_slot, slot, text));
        }
        fields.push(field);
    }
    pool.messages.push(MessageDescriptor {
        name: fq.clone(),
        fields,
        by_number: Vec::new(),
        size: 0,
        presence_bits: 0,
    });

    for nested in raw.nested {
        register_message(pool, &fq, nested, enum_defaults)?;
    }
    for decl in raw.enums {
        register_enum(pool, &fq, decl)?;
    }
    Ok(())
}

fn register_enum(pool: &mut DescriptorPool, scope: &str, raw: RawEnum) -> Result<()> {
    if raw.name.is_empty() {
        return Err(malformed("enum missing a name"));
    }
    if raw.values.is_empty() {
        return Err(malformed("enum must declare at least one value"));
    }
    let fq = join(scope, &raw.name);
    let index = EnumIndex(pool.enums.len() as u32);
    pool.insert_symbol(fq.clone(), Symbol::Enum(index))?;

    let default = raw.values[0].1;
    let mut by_name = HashMap::new();
    let mut by_value: HashMap<i32, String> = HashMap::new();
    for (name, value) in raw.values {
        if by_name.insert(name.clone(), value).is_some() {
            return Err(Error::new(
                ErrorCode::DuplicateSymbol,
                format!("enum value defined twice: {}.{}", fq, name),
            ));
        }
        // Aliased numbers keep their first name.
        by_value.entry(value).or_insert(name);
    }
    pool.enums.push(EnumDescriptor {
        name: fq,
        by_name,
        by_value,
        default,
    });
    Ok(())
}

fn build_field(raw: RawField, message_name: &str) -> Result<(FieldDescriptor, Option<String>)> {
    if raw.name.is_empty() {
        return Err(malformed(format!("field in {} missing a name", message_name)));
    }
    let number = raw
        .number
        .ok_or_else(|| malformed(format!("field {}.{} missing a number", message_name, raw.name)))?;
    if number <= 0 || number as u32 > MAX_FIELD_NUMBER {
        return Err(malformed(format!(
            "field {}.{} has invalid number {}",
            message_name, raw.name, number
        )));
    }
    let field_type = FieldType::from_descriptor(
        raw.field_type
            .ok_or_else(|| malformed(format!("field {}.{} missing a type", message_name, raw.name)))?
            as u64,
    )?;
    let label = match raw.label {
        None => Label::Optional,
        Some(value) => Label::from_descriptor(value as u64)?,
    };

    let type_ref = match field_type {
        FieldType::Message | FieldType::Group | FieldType::Enum => {
            let type_name = raw.type_name.ok_or_else(|| {
                malformed(format!(
                    "field {}.{} of type {:?} missing type_name",
                    message_name, raw.name, field_type
                ))
            })?;
            Some(TypeRef::Unresolved(type_name))
        }
        _ => None,
    };

    let mut enum_default = None;
    let default = match raw.default {
        None => DefaultValue::Unset,
        Some(text) if field_type == FieldType::Enum => {
            enum_default = Some(text);
            DefaultValue::Unset
        }
        Some(text) => parse_default(field_type, &text)?,
    };

    Ok((
        FieldDescriptor {
            name: raw.name,
            number: number as u32,
            label,
            field_type,
            packed: raw.packed,
            type_ref,
            default,
            offset: 0,
            bit_index: 0,
        },
        enum_default,
    ))
}

fn parse_default(field_type: FieldType, text: &str) -> Result<DefaultValue> {
    let bad = || malformed(format!("bad default value {:?} for {:?}", text, field_type));
    Ok(match field_type {
        FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 => {
            DefaultValue::Int(i64::from(text.parse::<i32>().map_err(|_| bad())?))
        }
        FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => {
            DefaultValue::Int(text.parse::<i64>().map_err(|_| bad())?)
        }
        FieldType::UInt32 | FieldType::Fixed32 => {
            DefaultValue::UInt(u64::from(text.parse::<u32>().map_err(|_| bad())?))
        }
        FieldType::UInt64 | FieldType::Fixed64 => {
            DefaultValue::UInt(text.parse::<u64>().map_err(|_| bad())?)
        }
        FieldType::Bool => match text {
            "true" => DefaultValue::Bool(true),
            "false" => DefaultValue::Bool(false),
            _ => return Err(bad()),
        },
        FieldType::Float | FieldType::Double => DefaultValue::Float(match text {
            "inf" => f64::INFINITY,
            "-inf" => f64::NEG_INFINITY,
            "nan" => f64::NAN,
            _ => text.parse::<f64>().map_err(|_| bad())?,
        }),
        FieldType::String | FieldType::Bytes => DefaultValue::Bytes(ByteString::from(text)),
        FieldType::Enum | FieldType::Message | FieldType::Group => return Err(bad()),
    })
}

/// Protobuf name resolution: try the reference in the referencing scope,
/// then in each outer scope, then at the root. A leading dot pins the name
/// to the root.
fn resolve_name(pool: &DescriptorPool, scope: &str, name: &str) -> Option<Symbol> {
    if let Some(absolute) = name.strip_prefix('.') {
        return pool.symbols.get(absolute).copied();
    }
    let mut scope = scope;
    loop {
        let candidate = join(scope, name);
        if let Some(symbol) = pool.symbols.get(&candidate) {
            return Some(*symbol);
        }
        match scope.rfind('.') {
            Some(dot) => scope = &scope[..dot],
            None if !scope.is_empty() => scope = "",
            None => return None,
        }
    }
}

fn resolve_message(pool: &mut DescriptorPool, index: usize) -> Result<()> {
    let message_name = pool.messages[index].name.clone();
    let mut updates = Vec::new();
    for (slot, field) in pool.messages[index].fields.iter().enumerate() {
        let Some(TypeRef::Unresolved(type_name)) = &field.type_ref else {
            continue;
        };
        let symbol = resolve_name(pool, &message_name, type_name).ok_or_else(|| {
            Error::new(
                ErrorCode::BadReference,
                format!(
                    "unresolved type {} referenced by {}.{}",
                    type_name, message_name, field.name
                ),
            )
        })?;
        let resolved = match (field.field_type, symbol) {
            (FieldType::Message | FieldType::Group, Symbol::Message(target)) => {
                TypeRef::Message(target)
            }
            (FieldType::Enum, Symbol::Enum(target)) => TypeRef::Enum(target),
            _ => {
                return Err(Error::new(
                    ErrorCode::BadReference,
                    format!(
                        "{} resolves to the wrong kind for {}.{}",
                        type_name, message_name, field.name
                    ),
                ));
            }
        };
        updates.push((slot, resolved));
    }
    for (slot, resolved) in updates {
        pool.messages[index].fields[slot].type_ref = Some(resolved);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_resolution_walks_outward() {
        let mut pool = DescriptorPool::new();
        for (slot, name) in ["pkg.Outer", "pkg.Outer.Inner", "other.Inner"]
            .iter()
            .enumerate()
        {
            pool.insert_symbol(
                (*name).to_owned(),
                Symbol::Message(MessageIndex(slot as u32)),
            )
            .unwrap();
        }

        assert_eq!(
            resolve_name(&pool, "pkg.Outer", "Inner"),
            Some(Symbol::Message(MessageIndex(1)))
        );
        assert_eq!(
            resolve_name(&pool, "pkg.Outer", ".other.Inner"),
            Some(Symbol::Message(MessageIndex(2)))
        );
        assert_eq!(
            resolve_name(&pool, "pkg.Outer.Inner", "Outer"),
            Some(Symbol::Message(MessageIndex(0)))
        );
        assert_eq!(resolve_name(&pool, "pkg.Outer", "Absent"), None);
    }

    #[test]
    fn default_parsing() {
        assert_eq!(
            parse_default(FieldType::Int32, "-7").unwrap(),
            DefaultValue::Int(-7)
        );
        assert_eq!(
            parse_default(FieldType::Bool, "true").unwrap(),
            DefaultValue::Bool(true)
        );
        assert_eq!(
            parse_default(FieldType::Double, "inf").unwrap(),
            DefaultValue::Float(f64::INFINITY)
        );
        assert_eq!(
            parse_default(FieldType::String, "hi").unwrap(),
            DefaultValue::Bytes(ByteString::from("hi"))
        );
        assert!(parse_default(FieldType::Int32, "twelve").is_err());
    }
}
