// Declarative pass: building pattern nodes for types, arrays and pointers
use super::*;

use crate::parser::ast::{
    ArrayDecl, ArraySize, BitfieldEntry, BuiltinType, EnumDef, PointerDecl, StructDef, TypeBody,
    TypeDecl,
};
use pattern::{bytes_to_u128, PatternKind};
use scope::FrameKind;

/// A built node plus whether the type asked to be inlined
pub(crate) struct Built {
    pub node: PatternNode,
    pub inline: bool,
}

fn builtin_kind(ty: BuiltinType) -> PatternKind {
    match ty {
        t if t.is_signed() => PatternKind::Signed,
        t if t.is_float() => PatternKind::Float,
        BuiltinType::Bool => PatternKind::Boolean,
        BuiltinType::Char => PatternKind::Character,
        BuiltinType::Char16 => PatternKind::Character16,
        _ => PatternKind::Unsigned,
    }
}

impl<'a> Evaluator<'a> {
    /// Build a pattern for `ty` at the cursor, advancing it past the type
    pub(crate) fn build_type(&mut self, ty: &TypeDecl, name: &str) -> Result<Built, EvalError> {
        self.enter()?;
        let saved_endian = self.current_endian;
        if ty.endian.is_some() {
            self.current_endian = ty.endian;
        }
        let result = self.build_type_body(ty, name);
        self.current_endian = saved_endian;
        self.leave();

        let mut built = result?;
        built.inline |= self.apply_attributes(&mut built.node, &ty.attrs)?;
        Ok(built)
    }

    fn build_type_body(&mut self, ty: &TypeDecl, name: &str) -> Result<Built, EvalError> {
        let type_name = ty.display_name();
        let node = match &ty.body {
            TypeBody::Builtin(builtin) => self.build_builtin(*builtin, name, type_name)?,
            TypeBody::Alias(inner) => {
                let mut built = self.build_type(inner, name)?;
                built.node.type_name = type_name;
                return Ok(built);
            }
            TypeBody::Forward(qualified) => {
                let program = self.program;
                let decl = program
                    .type_named(qualified)
                    .ok_or_else(|| EvalError::new(format!("unknown type '{}'", qualified)))?;
                return self.build_type(decl, name);
            }
            TypeBody::Struct(def) => self.build_struct(def, name, type_name)?,
            TypeBody::Union(members) => self.build_union(members, name, type_name)?,
            TypeBody::Enum(def) => self.build_enum(def, name, type_name)?,
            TypeBody::Bitfield(entries) => self.build_bitfield(entries, name, type_name)?,
        };
        Ok(Built {
            node,
            inline: false,
        })
    }

    /// A fresh node for the pattern limit, with the current endianness
    pub(crate) fn new_node(
        &mut self,
        name: &str,
        type_name: impl Into<String>,
        offset: u64,
        size: u64,
        kind: PatternKind,
    ) -> Result<PatternNode, EvalError> {
        self.count_pattern()?;
        let mut node = PatternNode::new(name, type_name, offset, size, kind);
        node.endian = self.current_endian;
        Ok(node)
    }

    fn build_builtin(
        &mut self,
        ty: BuiltinType,
        name: &str,
        type_name: String,
    ) -> Result<PatternNode, EvalError> {
        let size = match (ty, ty.size()) {
            (_, Some(size)) => size,
            (BuiltinType::Str, None) => {
                return Err(EvalError::new(
                    "cannot place a 'str' without an explicit size, use 'char[]'",
                ))
            }
            _ => return Err(EvalError::new("cannot place a variable of type 'auto'")),
        };
        let start = self.offset;
        self.check_range(start, size)?;
        let node = self.new_node(name, type_name, start, size, builtin_kind(ty))?;
        self.offset = start + size;
        Ok(node)
    }

    /// Build the members of a compound body in a fresh frame.
    /// The frame is popped whether or not a member fails.
    fn build_in_frame(
        &mut self,
        type_name: &str,
        build: impl FnOnce(&mut Self) -> Result<(), EvalError>,
    ) -> Result<Vec<PatternNode>, EvalError> {
        self.scope
            .push(FrameKind::Compound, self.offset, type_name.to_string());
        let result = build(self);
        let frame = self.scope.pop();
        result.map(|_| frame.members)
    }

    fn build_struct(
        &mut self,
        def: &StructDef,
        name: &str,
        type_name: String,
    ) -> Result<PatternNode, EvalError> {
        let start = self.offset;
        let members = self.build_in_frame(&type_name, |this| {
            for base in &def.inherits {
                let inherited = this.build_type(base, "")?;
                this.scope.extend_members(inherited.node.children);
            }
            for member in &def.members {
                this.build_member(member)?;
            }
            Ok(())
        })?;
        let size = self.offset.saturating_sub(start);
        let mut node = self.new_node(name, type_name, start, size, PatternKind::Struct)?;
        node.children = members;
        Ok(node)
    }

    fn build_union(
        &mut self,
        members: &[Stmt],
        name: &str,
        type_name: String,
    ) -> Result<PatternNode, EvalError> {
        let start = self.offset;
        let mut size = 0u64;
        let children = self.build_in_frame(&type_name, |this| {
            for member in members {
                this.offset = start;
                this.build_member(member)?;
                size = size.max(this.offset.saturating_sub(start));
            }
            Ok(())
        })?;
        self.offset = start + size;
        let mut node = self.new_node(name, type_name, start, size, PatternKind::Union)?;
        node.children = children;
        Ok(node)
    }

    fn build_enum(
        &mut self,
        def: &EnumDef,
        name: &str,
        type_name: String,
    ) -> Result<PatternNode, EvalError> {
        let size = def
            .underlying
            .size()
            .ok_or_else(|| EvalError::new("enum underlying type has no size"))?;
        let entries = self.enum_entries(def)?;
        let start = self.offset;
        self.check_range(start, size)?;
        let node = self.new_node(name, type_name, start, size, PatternKind::Enum { entries })?;
        self.offset = start + size;
        Ok(node)
    }

    /// Evaluate every entry value as the raw bits of the underlying type
    pub(crate) fn enum_entries(&mut self, def: &EnumDef) -> Result<Vec<(String, u128)>, EvalError> {
        let bits = def.underlying.size().unwrap_or(16) * 8;
        let mask = if bits >= 128 { u128::MAX } else { (1u128 << bits) - 1 };
        def.entries
            .iter()
            .map(|entry| {
                let value = self
                    .eval_expr(&entry.value)?
                    .cast(def.underlying, Endianness::Little)?
                    .to_unsigned()?;
                Ok((entry.name.clone(), value & mask))
            })
            .collect()
    }

    fn build_bitfield(
        &mut self,
        entries: &[BitfieldEntry],
        name: &str,
        type_name: String,
    ) -> Result<PatternNode, EvalError> {
        let start = self.offset;
        let mut bit_offset = 0u32;
        let mut fields = Vec::new();
        for entry in entries {
            let width = self.eval_expr(&entry.width)?.to_unsigned()?;
            let width = u32::try_from(width)
                .ok()
                .filter(|&w| w <= 128 - bit_offset)
                .ok_or_else(|| EvalError::new("bitfield exceeds 128 bits"))?;
            if !entry.padding {
                let kind = PatternKind::BitfieldField {
                    bit_offset,
                    bit_size: width,
                };
                fields.push(self.new_node(&entry.name, "bits", start, 0, kind)?);
            }
            bit_offset += width;
        }

        let size = u64::from(bit_offset.div_ceil(8));
        self.check_range(start, size)?;
        for field in &mut fields {
            field.size = size;
        }
        self.offset = start + size;
        let mut node = self.new_node(name, type_name, start, size, PatternKind::Bitfield)?;
        node.children = fields;
        Ok(node)
    }

    /// Build an array declaration at the cursor
    pub(crate) fn build_array(&mut self, decl: &ArrayDecl) -> Result<PatternNode, EvalError> {
        match decl.ty.as_builtin() {
            Some(BuiltinType::Char) => return self.build_string(decl, 1),
            Some(BuiltinType::Char16) => return self.build_string(decl, 2),
            _ => {}
        }

        let start = self.offset;
        let mut elements = Vec::new();
        match &decl.size {
            ArraySize::Fixed(count) => {
                let count = self.eval_expr(count)?.to_unsigned()?;
                self.check_array_length(count)?;
                for i in 0..count {
                    elements.push(self.build_element(&decl.ty, i)?);
                }
            }
            ArraySize::While(cond) => {
                while self.eval_expr(cond)?.to_bool()? {
                    self.check_array_length(elements.len() as u128 + 1)?;
                    elements.push(self.build_element(&decl.ty, elements.len() as u128)?);
                }
            }
            ArraySize::Unsized => {
                while self.offset < self.data.size() {
                    self.check_array_length(elements.len() as u128 + 1)?;
                    let element = self.build_element(&decl.ty, elements.len() as u128)?;
                    let terminator = self.is_zeroed(&element)?;
                    elements.push(element);
                    if terminator {
                        break;
                    }
                }
            }
        }

        let size = self.offset.saturating_sub(start);
        let type_name = decl.ty.display_name();
        let mut node = self.new_node(&decl.name, type_name, start, size, PatternKind::Array)?;
        node.children = elements;
        Ok(node)
    }

    fn build_element(&mut self, ty: &TypeDecl, index: u128) -> Result<PatternNode, EvalError> {
        self.tick()?;
        let name = format!("[{}]", index);
        Ok(self.build_type(ty, &name)?.node)
    }

    fn check_array_length(&self, count: u128) -> Result<(), EvalError> {
        let max = self.config.max_array_length;
        if max > 0 && count > u128::from(max) {
            return Err(EvalError::new(format!(
                "array grew past the maximum of {} entries",
                max
            )));
        }
        Ok(())
    }

    fn is_zeroed(&self, node: &PatternNode) -> Result<bool, EvalError> {
        let bytes = self.data.read_bytes(node.offset, node.size)?;
        Ok(bytes.iter().all(|&b| b == 0))
    }

    /// `char[...]` and `char16[...]` become a single string node. `unit` is
    /// the character width in bytes; counts and limits are in characters.
    fn build_string(&mut self, decl: &ArrayDecl, unit: u64) -> Result<PatternNode, EvalError> {
        let start = self.offset;
        match &decl.size {
            ArraySize::Fixed(count) => {
                let count = self.eval_expr(count)?.to_unsigned()?;
                self.check_array_length(count)?;
                let size = u64::try_from(count)
                    .ok()
                    .and_then(|count| count.checked_mul(unit))
                    .ok_or_else(|| EvalError::new(format!("string length {} is too large", count)))?;
                self.check_range(start, size)?;
                self.offset = start + size;
            }
            ArraySize::While(cond) => {
                while self.eval_expr(cond)?.to_bool()? {
                    self.tick()?;
                    self.check_array_length(u128::from((self.offset - start) / unit) + 1)?;
                    self.check_range(self.offset, unit)?;
                    self.offset += unit;
                }
            }
            ArraySize::Unsized => {
                while self.offset + unit <= self.data.size() {
                    self.tick()?;
                    let bytes = self.data.read_bytes(self.offset, unit)?;
                    self.offset += unit;
                    if bytes.iter().all(|&b| b == 0) {
                        break;
                    }
                }
            }
        }
        let size = self.offset - start;
        let (type_name, kind) = match unit {
            1 => ("char", PatternKind::String),
            _ => ("char16", PatternKind::String16),
        };
        let mut node = self.new_node(&decl.name, type_name, start, size, kind)?;
        if decl.ty.endian.is_some() {
            node.endian = decl.ty.endian;
        }
        Ok(node)
    }

    /// Build a pointer: the address at the cursor, then the target at that
    /// address. The cursor ends just past the address bytes.
    pub(crate) fn build_pointer(&mut self, decl: &PointerDecl) -> Result<PatternNode, EvalError> {
        let width = decl
            .size_type
            .size()
            .ok_or_else(|| EvalError::new("invalid type used for pointer size"))?;
        let start = self.offset;
        let endian = self.endian_for(decl.size_endian);
        let raw = bytes_to_u128(&self.data.read_bytes(start, width)?, endian);
        self.offset = start + width;

        let mut address = raw;
        if let Some(base) = decl.attrs.iter().find(|a| a.name == "pointer_base") {
            address = address.wrapping_add(self.pointer_base(base, raw)?);
        }
        let address = u64::try_from(address).map_err(|_| {
            EvalError::new(format!("pointer address 0x{:X} is out of range", address))
        })?;
        let target = self.at_offset(address, |this| this.build_type(&decl.target, &decl.name))?;
        let pointee = Box::new(target.node);

        let type_name = format!("{}*", decl.target.display_name());
        let mut node = self.new_node(
            &decl.name,
            type_name,
            start,
            width,
            PatternKind::Pointer { pointee },
        )?;
        node.endian = decl.size_endian.or(self.current_endian);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use data_source::SliceDataSource;

    fn eval_pattern(source: &str, data: &[u8]) -> Vec<PatternNode> {
        let tokens = Lexer::new(source).tokenize().expect("lex failed");
        let program = Parser::new(tokens).parse().expect("parse failed");
        let ds = SliceDataSource::new(data);
        let mut evaluator = Evaluator::new(&program, &ds, EvalConfig::default());
        evaluator.evaluate().expect("evaluation failed")
    }

    fn read(node: &PatternNode, data: &[u8]) -> Value {
        let ds = SliceDataSource::new(data);
        node.read_value(&ds, Endianness::Little).expect("read failed")
    }

    #[test]
    fn test_struct_members_are_packed() {
        let source = r#"
            struct Header {
                u32 magic;
                u16 version;
                u8 flags;
                u64 length;
            };
            Header header @ 0x02;
        "#;
        let data = [0u8; 32];
        let header = &eval_pattern(source, &data)[0];
        assert_eq!((header.offset, header.size), (2, 15));
        let offsets: Vec<_> = header.children.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![2, 6, 8, 9]);
    }

    #[test]
    fn test_union_members_share_offset() {
        let source = r#"
            union Value {
                u8 byte;
                u32 word;
                u16 half;
            };
            Value v @ 4;
            u8 after;
        "#;
        let data = [0u8; 16];
        let results = eval_pattern(source, &data);
        let union = &results[0];
        assert_eq!(union.kind, PatternKind::Union);
        assert_eq!((union.offset, union.size), (4, 4));
        assert!(union.children.iter().all(|c| c.offset == 4));
        assert_eq!(results[1].offset, 0);
    }

    #[test]
    fn test_nested_union_advances_cursor_by_largest_member() {
        let source = r#"
            union U { u8 a; u16 b; };
            struct S { U u; u8 tail; };
            S s @ 0;
        "#;
        let s = &eval_pattern(source, &[0u8; 4])[0];
        assert_eq!(s.children[1].offset, 2);
        assert_eq!(s.size, 3);
    }

    #[test]
    fn test_enum_node_carries_entries() {
        let source = r#"
            enum Kind : u8 {
                A,
                B = 5,
                C
            };
            Kind k @ 0;
        "#;
        let data = [6u8];
        let kind = &eval_pattern(source, &data)[0];
        let PatternKind::Enum { entries } = &kind.kind else {
            panic!("expected an enum node");
        };
        assert_eq!(
            entries,
            &vec![("A".to_string(), 0), ("B".to_string(), 5), ("C".to_string(), 6)]
        );
        let ds = SliceDataSource::new(&data);
        assert_eq!(
            kind.formatted_value(&ds, Endianness::Little).unwrap(),
            "Kind::C (0x6)"
        );
    }

    #[test]
    fn test_bitfield_packs_lsb_first() {
        let source = r#"
            bitfield Flags {
                low : 3;
                padding : 2;
                high : 5;
            };
            Flags f @ 0;
        "#;
        // bits 0..3 = 0b101, bits 5..10 = 0b10011
        let raw: u16 = 0b101 | (0b10011 << 5);
        let data = raw.to_le_bytes();
        let flags = &eval_pattern(source, &data)[0];
        assert_eq!(flags.size, 2);
        assert_eq!(flags.children.len(), 2);
        assert_eq!(read(&flags.children[0], &data), Value::Unsigned(0b101));
        assert_eq!(read(&flags.children[1], &data), Value::Unsigned(0b10011));
    }

    #[test]
    fn test_fixed_array_elements_are_named_by_index() {
        let data = [1u8, 0, 2, 0, 3, 0];
        let array = &eval_pattern("u16 values[3] @ 0;", &data)[0];
        assert_eq!(array.kind, PatternKind::Array);
        assert_eq!(array.type_name, "u16");
        assert_eq!(array.size, 6);
        let names: Vec<_> = array.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["[0]", "[1]", "[2]"]);
        assert_eq!(read(&array.children[2], &data), Value::Unsigned(3));
    }

    #[test]
    fn test_while_array_checks_before_each_element() {
        let data = [1u8, 1, 1, 0, 1];
        let array = &eval_pattern("u8 run[while(std::mem::read_unsigned($, 1) != 0)] @ 0;", &data)[0];
        assert_eq!(array.children.len(), 3);
        assert_eq!(array.size, 3);

        let empty = &eval_pattern("u8 none[while(false)] @ 2;", &data)[0];
        assert_eq!((empty.offset, empty.size), (2, 0));
        assert!(empty.children.is_empty());
    }

    #[test]
    fn test_unsized_array_includes_terminator() {
        let data = [3u8, 0, 2, 0, 0, 0, 9, 9];
        let array = &eval_pattern("u16 items[] @ 0;", &data)[0];
        assert_eq!(array.children.len(), 3);
        assert_eq!(array.size, 6);
    }

    #[test]
    fn test_char_array_is_one_string_node() {
        let data = b"PNG\0rest";
        let results = eval_pattern("char sig[3] @ 0; char name[] @ 0;", data);
        assert_eq!(results[0].kind, PatternKind::String);
        assert!(results[0].children.is_empty());
        assert_eq!(read(&results[0], data), Value::String("PNG".into()));
        assert_eq!(results[1].size, 4);
    }

    #[test]
    fn test_char16_array_is_one_utf16_string_node() {
        let data = [b'H', 0, b'i', 0, 0, 0, 0, b'A', 0, b'B', 7, 7];
        let source = r#"
            char16 fixed[2] @ 0;
            char16 unsized[] @ 0;
            be char16 big[2] @ 6;
            char16 counted[while(std::mem::read_unsigned($, 2) != 0)] @ 0;
        "#;
        let results = eval_pattern(source, &data);
        let fixed = &results[0];
        assert_eq!(fixed.kind, PatternKind::String16);
        assert_eq!(fixed.type_name, "char16");
        assert_eq!(fixed.size, 4);
        assert!(fixed.children.is_empty());
        assert_eq!(read(fixed, &data), Value::String("Hi".into()));

        // the terminator is part of the unsized form
        assert_eq!(results[1].size, 6);
        assert_eq!(read(&results[1], &data), Value::String("Hi".into()));

        assert_eq!(results[2].endian, Some(Endianness::Big));
        assert_eq!(read(&results[2], &data), Value::String("AB".into()));

        assert_eq!(results[3].size, 4);
    }

    #[test]
    fn test_pointer_reads_target_without_moving_past_address() {
        let source = r#"
            u32 *ptr : u8 @ 0;
            struct S { u16 *p : u8; u8 after; };
            S s @ 0;
        "#;
        let data = [0x04u8, 0x09, 0, 0, 0xEF, 0xBE, 0xAD, 0xDE];
        let results = eval_pattern(source, &data);
        let ptr = &results[0];
        assert_eq!(ptr.type_name, "u32*");
        assert_eq!(ptr.size, 1);
        let PatternKind::Pointer { pointee: target } = &ptr.kind else {
            panic!("expected a pointer");
        };
        assert_eq!(target.offset, 4);
        assert_eq!(read(target, &data), Value::Unsigned(0xDEADBEEF));
        assert_eq!(results[1].children[1].offset, 1);
    }

    #[test]
    fn test_zero_pointer_targets_offset_zero() {
        let data = [0u8, 0x42];
        let ptr = &eval_pattern("u16 *ptr : u8 @ 0;", &data)[0];
        let PatternKind::Pointer { pointee: target } = &ptr.kind else {
            panic!("expected a pointer");
        };
        assert_eq!((target.offset, target.size), (0, 2));
        assert_eq!(read(target, &data), Value::Unsigned(0x4200));
    }

    #[test]
    fn test_inheritance_splices_base_members_first() {
        let source = r#"
            struct Base { u8 tag; };
            struct Extra { u8 more; };
            struct Derived : Base, Extra { u16 value; };
            Derived d @ 0;
        "#;
        let d = &eval_pattern(source, &[1, 2, 3, 0])[0];
        let names: Vec<_> = d.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["tag", "more", "value"]);
        assert_eq!(d.children[2].offset, 2);
        assert_eq!(d.size, 4);
    }

    #[test]
    fn test_alias_keeps_its_own_name() {
        let data = [0x34u8, 0x12];
        let word = &eval_pattern("using Word = be u16; Word w @ 0;", &data)[0];
        assert_eq!(word.type_name, "Word");
        assert_eq!(read(word, &data), Value::Unsigned(0x3412));
    }
}
