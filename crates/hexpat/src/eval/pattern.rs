// PatternNode: evaluation output tree representing decoded binary regions

use crate::error::EvalError;
use crate::eval::data_source::DataSource;
use crate::eval::value::{sign_extend, Value};
use crate::parser::ast::Endianness;

/// A node in the evaluation result tree.
/// Each node represents a region of the byte source; values are decoded on
/// demand through [`PatternNode::read_value`].
#[derive(Debug, Clone, PartialEq)]
pub struct PatternNode {
    /// Declared name
    pub name: String,
    /// Override from the `name` attribute
    pub display_name: Option<String>,
    /// Type name (e.g., "u32", "Header", "Color")
    pub type_name: String,
    /// Byte offset in the binary data
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    pub kind: PatternKind,
    /// Declared endianness; `None` falls back to the document default
    pub endian: Option<Endianness>,
    /// Display color as `0xAABBGGRR`
    pub color: Option<u32>,
    pub comment: Option<String>,
    pub hidden: bool,
    /// Function that renders the value for display
    pub formatter: Option<String>,
    /// Function that maps the raw value before display
    pub transform: Option<String>,
    /// Members, elements or fields for compound kinds
    pub children: Vec<PatternNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    Unsigned,
    Signed,
    Float,
    Boolean,
    Character,
    Character16,
    /// `char[n]`
    String,
    /// `char16[n]`, UTF-16 in the node's byte order
    String16,
    Padding,
    Enum {
        /// Resolved entry table
        entries: Vec<(String, u128)>,
    },
    /// Field of a bitfield. The node spans the whole bitfield; the field
    /// occupies `bit_size` bits starting `bit_offset` bits from its LSB.
    BitfieldField {
        bit_offset: u32,
        bit_size: u32,
    },
    Struct,
    Union,
    Bitfield,
    Array,
    /// The pointer node covers the address bytes; the target lives
    /// elsewhere.
    Pointer {
        pointee: Box<PatternNode>,
    },
}

impl PatternNode {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        offset: u64,
        size: u64,
        kind: PatternKind,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            type_name: type_name.into(),
            offset,
            size,
            kind,
            endian: None,
            color: None,
            comment: None,
            hidden: false,
            formatter: None,
            transform: None,
            children: Vec::new(),
        }
    }

    /// Add a child node
    pub fn with_child(mut self, child: PatternNode) -> Self {
        self.children.push(child);
        self
    }

    /// Name shown to the user
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Struct, union, bitfield and array nodes
    pub fn is_compound(&self) -> bool {
        matches!(
            self.kind,
            PatternKind::Struct | PatternKind::Union | PatternKind::Bitfield | PatternKind::Array
        )
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    pub fn child(&self, name: &str) -> Option<&PatternNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Move this node to `new_offset`, translating every descendant by the
    /// same delta. Pointer targets keep their absolute address.
    pub fn relocate(&mut self, new_offset: u64) {
        let delta = new_offset.wrapping_sub(self.offset);
        self.shift(delta);
    }

    fn shift(&mut self, delta: u64) {
        self.offset = self.offset.wrapping_add(delta);
        for child in &mut self.children {
            child.shift(delta);
        }
    }

    /// Set the display color; arrays pass it on to their elements
    pub fn set_color(&mut self, color: u32) {
        self.color = Some(color);
        if self.kind == PatternKind::Array {
            for element in &mut self.children {
                element.set_color(color);
            }
        }
    }

    fn read_raw(&self, data: &dyn DataSource) -> Result<Vec<u8>, EvalError> {
        data.read_bytes(self.offset, self.size)
    }

    /// Decode the node's bytes as an unsigned integer of its own width
    fn read_integer(&self, data: &dyn DataSource, endian: Endianness) -> Result<u128, EvalError> {
        if self.size > 16 {
            return Err(EvalError::new(format!(
                "cannot decode {} bytes as an integer",
                self.size
            )));
        }
        let bytes = self.read_raw(data)?;
        Ok(bytes_to_u128(&bytes, endian))
    }

    /// Decode this node's value from the byte source
    pub fn read_value(
        &self,
        data: &dyn DataSource,
        default_endian: Endianness,
    ) -> Result<Value, EvalError> {
        let endian = self.endian.unwrap_or(default_endian);
        match &self.kind {
            PatternKind::Unsigned | PatternKind::Enum { .. } => {
                Ok(Value::Unsigned(self.read_integer(data, endian)?))
            }
            PatternKind::Signed => {
                let raw = self.read_integer(data, endian)?;
                Ok(Value::Signed(sign_extend(raw, self.size as u32 * 8)))
            }
            PatternKind::Float => {
                let raw = self.read_integer(data, endian)?;
                match self.size {
                    4 => Ok(Value::Float(f32::from_bits(raw as u32) as f64)),
                    8 => Ok(Value::Float(f64::from_bits(raw as u64))),
                    n => Err(EvalError::new(format!("invalid float size {}", n))),
                }
            }
            PatternKind::Boolean => Ok(Value::Bool(self.read_integer(data, endian)? != 0)),
            PatternKind::Character => {
                let raw = self.read_integer(data, endian)?;
                Ok(Value::Char(char::from(raw as u8)))
            }
            PatternKind::Character16 => {
                let raw = self.read_integer(data, endian)?;
                Ok(Value::Char(
                    char::from_u32(raw as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
                ))
            }
            PatternKind::String => {
                let bytes = self.read_raw(data)?;
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Ok(Value::String(bytes[..end].iter().map(|&b| char::from(b)).collect()))
            }
            PatternKind::String16 => {
                let bytes = self.read_raw(data)?;
                let units = bytes
                    .chunks_exact(2)
                    .map(|pair| bytes_to_u128(pair, endian) as u16)
                    .take_while(|&unit| unit != 0);
                Ok(Value::String(
                    char::decode_utf16(units)
                        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                        .collect(),
                ))
            }
            PatternKind::BitfieldField {
                bit_offset,
                bit_size,
            } => {
                let raw = self.read_integer(data, endian)?;
                let shifted = raw.checked_shr(*bit_offset).unwrap_or(0);
                let mask = if *bit_size >= 128 {
                    u128::MAX
                } else {
                    (1u128 << bit_size) - 1
                };
                Ok(Value::Unsigned(shifted & mask))
            }
            PatternKind::Pointer { .. } => Ok(Value::Unsigned(self.read_integer(data, endian)?)),
            PatternKind::Padding => Err(EvalError::new("cannot read the value of padding")),
            PatternKind::Struct | PatternKind::Union | PatternKind::Bitfield | PatternKind::Array => {
                Ok(Value::Pattern(Box::new(self.clone())))
            }
        }
    }

    /// Default display formatting of the node's value
    pub fn formatted_value(
        &self,
        data: &dyn DataSource,
        default_endian: Endianness,
    ) -> Result<String, EvalError> {
        let formatted = match &self.kind {
            PatternKind::Struct | PatternKind::Union | PatternKind::Bitfield => "{ ... }".to_string(),
            PatternKind::Array => "[ ... ]".to_string(),
            PatternKind::Padding => String::new(),
            PatternKind::Pointer { .. } => {
                let address = self.read_value(data, default_endian)?.to_unsigned()?;
                format!("*(0x{:X})", address)
            }
            PatternKind::Enum { entries } => {
                let value = self.read_value(data, default_endian)?.to_unsigned()?;
                match entries.iter().find(|(_, v)| *v == value) {
                    Some((entry, _)) => format!("{}::{} (0x{:X})", self.type_name, entry, value),
                    None => format!("{}::??? (0x{:X})", self.type_name, value),
                }
            }
            PatternKind::Unsigned => {
                let value = self.read_value(data, default_endian)?.to_unsigned()?;
                format!("{} (0x{:0width$X})", value, value, width = self.size as usize * 2)
            }
            PatternKind::Character | PatternKind::Character16 => {
                let c = self.read_value(data, default_endian)?.to_char()?;
                format!("'{}'", c.escape_default())
            }
            PatternKind::String | PatternKind::String16 => {
                let value = self.read_value(data, default_endian)?;
                format!("\"{}\"", value.to_display_string().escape_default())
            }
            _ => self.read_value(data, default_endian)?.to_display_string(),
        };
        Ok(formatted)
    }
}

/// Assemble up to 16 bytes into an integer
pub(crate) fn bytes_to_u128(bytes: &[u8], endian: Endianness) -> u128 {
    let fold = |acc: u128, &b: &u8| (acc << 8) | u128::from(b);
    match endian {
        Endianness::Little => bytes.iter().rev().fold(0, fold),
        Endianness::Big => bytes.iter().fold(0, fold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::data_source::SliceDataSource;

    fn leaf(name: &str, offset: u64, size: u64, kind: PatternKind) -> PatternNode {
        PatternNode::new(name, "u8", offset, size, kind)
    }

    #[test]
    fn test_pattern_node_with_children() {
        let node = PatternNode::new("header", "Header", 0, 6, PatternKind::Struct)
            .with_child(leaf("magic", 0, 4, PatternKind::Unsigned))
            .with_child(leaf("version", 4, 2, PatternKind::Unsigned));
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.child("version").map(|c| c.offset), Some(4));
        assert!(node.is_compound());
        assert_eq!(node.end(), 6);
    }

    #[test]
    fn test_relocate_translates_descendants() {
        let inner = PatternNode::new("inner", "Inner", 4, 2, PatternKind::Struct)
            .with_child(leaf("a", 4, 1, PatternKind::Unsigned))
            .with_child(leaf("b", 5, 1, PatternKind::Unsigned));
        let mut outer = PatternNode::new("outer", "Outer", 0, 6, PatternKind::Struct)
            .with_child(leaf("x", 0, 4, PatternKind::Unsigned))
            .with_child(inner);

        outer.relocate(0x100);
        assert_eq!(outer.offset, 0x100);
        assert_eq!(outer.children[0].offset, 0x100);
        assert_eq!(outer.children[1].offset, 0x104);
        assert_eq!(outer.children[1].children[1].offset, 0x105);

        outer.relocate(0x10);
        assert_eq!(outer.children[1].children[0].offset, 0x14);
    }

    #[test]
    fn test_set_color_propagates_to_array_elements() {
        let mut array = PatternNode::new("arr", "u8", 0, 2, PatternKind::Array)
            .with_child(leaf("[0]", 0, 1, PatternKind::Unsigned))
            .with_child(leaf("[1]", 1, 1, PatternKind::Unsigned));
        array.set_color(0x0000FF);
        assert!(array.children.iter().all(|c| c.color == Some(0x0000FF)));

        let mut s = PatternNode::new("s", "S", 0, 1, PatternKind::Struct)
            .with_child(leaf("a", 0, 1, PatternKind::Unsigned));
        s.set_color(0x00FF00);
        assert_eq!(s.children[0].color, None);
    }

    #[test]
    fn test_read_integer_values() {
        let data = [0x34, 0x12, 0xFF, 0xFF];
        let ds = SliceDataSource::new(&data);
        let node = leaf("a", 0, 2, PatternKind::Unsigned);
        assert_eq!(
            node.read_value(&ds, Endianness::Little).unwrap(),
            Value::Unsigned(0x1234)
        );
        assert_eq!(
            node.read_value(&ds, Endianness::Big).unwrap(),
            Value::Unsigned(0x3412)
        );
        let mut signed = leaf("b", 2, 2, PatternKind::Signed);
        signed.endian = Some(Endianness::Big);
        assert_eq!(
            signed.read_value(&ds, Endianness::Little).unwrap(),
            Value::Signed(-1)
        );
    }

    #[test]
    fn test_read_float_and_chars() {
        let mut data = 1.5f32.to_le_bytes().to_vec();
        data.extend_from_slice(b"Hi\0z");
        let ds = SliceDataSource::new(&data);
        let f = leaf("f", 0, 4, PatternKind::Float);
        assert_eq!(f.read_value(&ds, Endianness::Little).unwrap(), Value::Float(1.5));
        let s = leaf("s", 4, 4, PatternKind::String);
        assert_eq!(
            s.read_value(&ds, Endianness::Little).unwrap(),
            Value::String("Hi".into())
        );
        let c = leaf("c", 4, 1, PatternKind::Character);
        assert_eq!(c.formatted_value(&ds, Endianness::Little).unwrap(), "'H'");
    }

    #[test]
    fn test_read_utf16_string() {
        let data = [0x48, 0x00, 0xE9, 0x00, 0x3D, 0xD8, 0x00, 0xDE, 0x00, 0x00, 0x41, 0x00];
        let ds = SliceDataSource::new(&data);
        let s = leaf("s", 0, 12, PatternKind::String16);
        assert_eq!(
            s.read_value(&ds, Endianness::Little).unwrap(),
            Value::String("H\u{e9}\u{1f600}".into())
        );
        assert_eq!(
            s.formatted_value(&ds, Endianness::Little).unwrap(),
            "\"H\\u{e9}\\u{1f600}\""
        );

        let mut be = leaf("be", 0, 2, PatternKind::String16);
        be.endian = Some(Endianness::Big);
        assert_eq!(
            be.read_value(&ds, Endianness::Little).unwrap(),
            Value::String("\u{4800}".into())
        );
    }

    #[test]
    fn test_read_bitfield_field() {
        // 0b1011_0110: bits 1..=3 hold 0b011
        let data = [0b1011_0110u8];
        let ds = SliceDataSource::new(&data);
        let field = leaf(
            "f",
            0,
            1,
            PatternKind::BitfieldField {
                bit_offset: 1,
                bit_size: 3,
            },
        );
        assert_eq!(
            field.read_value(&ds, Endianness::Little).unwrap(),
            Value::Unsigned(0b011)
        );
    }

    #[test]
    fn test_padding_has_no_value() {
        let data = [0u8; 4];
        let ds = SliceDataSource::new(&data);
        let pad = leaf("padding", 0, 4, PatternKind::Padding);
        assert!(pad.read_value(&ds, Endianness::Little).is_err());
    }

    #[test]
    fn test_formatted_enum_and_unsigned() {
        let data = [0x02, 0x07];
        let ds = SliceDataSource::new(&data);
        let mut e = leaf(
            "kind",
            0,
            1,
            PatternKind::Enum {
                entries: vec![("A".into(), 1), ("B".into(), 2)],
            },
        );
        e.type_name = "Kind".into();
        assert_eq!(e.formatted_value(&ds, Endianness::Little).unwrap(), "Kind::B (0x2)");
        let u = leaf("u", 1, 1, PatternKind::Unsigned);
        assert_eq!(u.formatted_value(&ds, Endianness::Little).unwrap(), "7 (0x07)");
    }

    #[test]
    fn test_bytes_to_u128() {
        assert_eq!(bytes_to_u128(&[1, 2, 3], Endianness::Little), 0x030201);
        assert_eq!(bytes_to_u128(&[1, 2, 3], Endianness::Big), 0x010203);
        assert_eq!(bytes_to_u128(&[], Endianness::Big), 0);
    }
}
