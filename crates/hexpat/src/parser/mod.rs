// Recursive descent parser for the pattern language

pub mod ast;
mod expr;
mod types;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::ParseError;
use crate::lexer::token::{Token, TokenKind};
use crate::span::Span;
use ast::*;
use types::TypeRegistry;

// Token classes. Data-carrying tokens match on their variant alone.
const IDENT: TokenKind = TokenKind::Ident(String::new());
const STRING: TokenKind = TokenKind::StringLiteral(String::new());
const VALUE_TYPE: TokenKind = TokenKind::ValueType(BuiltinType::U8);

/// Parser that converts a token stream into a [`Program`].
///
/// Parsing is fail-fast: the first grammar mismatch ends the parse with an
/// error carrying the offending token's line.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    registry: TypeRegistry,
    functions: FxHashSet<String>,
    /// Current namespace path, innermost last
    namespace: Vec<String>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            registry: TypeRegistry::new(),
            functions: FxHashSet::default(),
            namespace: Vec::new(),
        }
    }

    /// Parse the entire token stream into a program
    pub fn parse(mut self) -> Result<Program, ParseError> {
        let mut stmts = Vec::new();
        while !self.peek(&TokenKind::Eof, 0) {
            stmts.extend(self.parse_statements()?);
        }
        if stmts.is_empty() {
            return Err(self.error("program is empty"));
        }
        let types = self.registry.into_types();
        debug!(
            statements = stmts.len(),
            types = types.len(),
            functions = self.functions.len(),
            "parsed program"
        );
        Ok(Program { stmts, types })
    }

    // ========== Cursor and backtracking ==========

    fn index(&self, offset: isize) -> Option<usize> {
        self.pos.checked_add_signed(offset)
    }

    fn token_at(&self, offset: isize) -> Option<&Token> {
        self.index(offset).and_then(|i| self.tokens.get(i))
    }

    fn kind_at(&self, offset: isize) -> &TokenKind {
        self.token_at(offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Span of the token at `offset`, clamped to the stream
    fn span_at(&self, offset: isize) -> Span {
        let last = self.tokens.len().saturating_sub(1);
        let idx = self.index(offset).unwrap_or(0).min(last);
        self.tokens.get(idx).map(|t| t.span).unwrap_or_else(Span::dummy)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        self.error_at(message, 0)
    }

    fn error_at(&self, message: impl Into<String>, offset: isize) -> ParseError {
        ParseError::new(message, self.span_at(offset).line)
    }

    /// True if the token at `offset` is of the same class as `kind`
    fn peek(&self, kind: &TokenKind, offset: isize) -> bool {
        std::mem::discriminant(self.kind_at(offset)) == std::mem::discriminant(kind)
    }

    fn peek_literal(&self) -> bool {
        self.kind_at(0).is_literal()
    }

    /// Consume `kinds` in order if all of them match, otherwise leave the
    /// cursor where it was
    fn sequence(&mut self, kinds: &[TokenKind]) -> bool {
        let matched = kinds
            .iter()
            .enumerate()
            .all(|(i, kind)| self.peek(kind, i as isize));
        if matched {
            self.pos += kinds.len();
        }
        matched
    }

    /// Consume one token if it matches any of `kinds`
    fn one_of(&mut self, kinds: &[TokenKind]) -> bool {
        if kinds.iter().any(|kind| self.peek(kind, 0)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume one token if it matches `a` or `b`
    fn variant(&mut self, a: TokenKind, b: TokenKind) -> bool {
        self.one_of(&[a, b])
    }

    fn ident_at(&self, offset: isize) -> Result<String, ParseError> {
        match self.kind_at(offset) {
            TokenKind::Ident(name) => Ok(name.clone()),
            other => Err(self.error_at(format!("expected identifier, got {}", other), offset)),
        }
    }

    fn string_at(&self, offset: isize) -> Result<String, ParseError> {
        match self.kind_at(offset) {
            TokenKind::StringLiteral(s) => Ok(s.clone()),
            other => Err(self.error_at(format!("expected string literal, got {}", other), offset)),
        }
    }

    fn value_type_at(&self, offset: isize) -> Result<BuiltinType, ParseError> {
        match self.kind_at(offset) {
            TokenKind::ValueType(ty) => Ok(*ty),
            other => Err(self.error_at(format!("expected builtin type, got {}", other), offset)),
        }
    }

    fn peek_type_start(&self) -> bool {
        self.peek(&TokenKind::KwLe, 0)
            || self.peek(&TokenKind::KwBe, 0)
            || self.peek(&VALUE_TYPE, 0)
            || self.peek(&IDENT, 0)
    }

    /// `ns::name(` ahead of the cursor. Pure lookahead, the cursor is untouched.
    fn peek_call(&self) -> bool {
        if !self.peek(&IDENT, 0) {
            return false;
        }
        let mut offset = 1;
        while self.peek(&TokenKind::ColonColon, offset) && self.peek(&IDENT, offset + 1) {
            offset += 2;
        }
        self.peek(&TokenKind::LParen, offset)
    }

    /// `name[` but not `name [[`, which opens an attribute list
    fn peek_array_declarator(&self) -> bool {
        self.peek(&IDENT, 0) && self.peek(&TokenKind::LBracket, 1) && !self.peek(&TokenKind::LBracket, 2)
    }

    /// `name = ...` or `name op= ...`
    fn peek_assignment(&self) -> bool {
        self.peek(&IDENT, 0) && assign_op(self.kind_at(1)).is_some()
    }

    fn expect_semicolon(&mut self) -> Result<(), ParseError> {
        if !self.sequence(&[TokenKind::Semicolon]) {
            return Err(self.error_at("missing ';' at end of expression", -1));
        }
        while self.sequence(&[TokenKind::Semicolon]) {}
        Ok(())
    }

    /// Parse `a::b::c` starting at the current identifier
    fn parse_namespace_resolution(&mut self) -> Result<String, ParseError> {
        if !self.sequence(&[IDENT]) {
            return Err(self.error("expected identifier"));
        }
        let mut name = self.ident_at(-1)?;
        while self.sequence(&[TokenKind::ColonColon, IDENT]) {
            name.push_str("::");
            name.push_str(&self.ident_at(-1)?);
        }
        Ok(name)
    }

    // ========== Top level ==========

    fn parse_statements(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.peek(&TokenKind::Semicolon, 0) {
            while self.sequence(&[TokenKind::Semicolon]) {}
            return Ok(Vec::new());
        }
        if self.sequence(&[TokenKind::KwNamespace]) {
            return self.parse_namespace();
        }

        let mut stmt = if self.sequence(&[TokenKind::KwUsing, IDENT]) {
            self.parse_using()?
        } else if self.peek_call() {
            let call = self.parse_call()?;
            let span = call.span;
            Stmt::new(StmtKind::Expr(call), span)
        } else if self.peek_type_start() {
            self.parse_placement()?
        } else if self.sequence(&[TokenKind::KwStruct, IDENT]) {
            self.parse_struct()?
        } else if self.sequence(&[TokenKind::KwUnion, IDENT, TokenKind::LBrace]) {
            self.parse_union()?
        } else if self.sequence(&[TokenKind::KwEnum, IDENT, TokenKind::Colon]) {
            self.parse_enum()?
        } else if self.sequence(&[TokenKind::KwBitfield, IDENT, TokenKind::LBrace]) {
            self.parse_bitfield()?
        } else if self.sequence(&[TokenKind::KwFn, IDENT, TokenKind::LParen]) {
            self.parse_function()?
        } else {
            return Err(self.error(format!("invalid sequence, unexpected {}", self.kind_at(0))));
        };

        self.parse_trailing_attributes(&mut stmt)?;
        self.expect_semicolon()?;
        Ok(vec![stmt])
    }

    fn parse_namespace(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if !self.peek(&IDENT, 0) {
            return Err(self.error("expected namespace identifier"));
        }
        let path = self.parse_namespace_resolution()?;
        let depth = self.namespace.len();
        self.namespace.extend(path.split("::").map(str::to_string));

        if !self.sequence(&[TokenKind::LBrace]) {
            return Err(self.error("expected '{' at start of namespace"));
        }
        let mut stmts = Vec::new();
        while !self.sequence(&[TokenKind::RBrace]) {
            if self.peek(&TokenKind::Eof, 0) {
                return Err(self.error_at("missing '}' at end of namespace", -1));
            }
            stmts.extend(self.parse_statements()?);
        }
        self.namespace.truncate(depth);
        while self.sequence(&[TokenKind::Semicolon]) {}
        Ok(stmts)
    }

    fn parse_using(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(-2);
        self.pos -= 1;
        let name = self.parse_namespace_resolution()?;
        if !self.sequence(&[TokenKind::Eq]) {
            return Err(self.error_at("expected '=' after type name of using declaration", -1));
        }
        let target = self.parse_type(false)?;
        let qualified = self
            .registry
            .open(&self.namespace, &name)
            .map_err(|msg| self.error_at(msg, -1))?;
        let decl = TypeDecl {
            name: qualified,
            endian: target.endian,
            body: TypeBody::Alias(Box::new(target)),
            attrs: Vec::new(),
            span,
        };
        self.registry.finish(decl.clone());
        Ok(Stmt::new(StmtKind::TypeDef(Box::new(decl)), span))
    }

    /// `type name [@ off|in|out]`, `type name[size] @ off`, `type *name : size @ off`
    fn parse_placement(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(0);
        let ty = self.parse_type(false)?;

        if self.peek_array_declarator() {
            self.pos += 2;
            let name = self.ident_at(-2)?;
            let size = self.parse_array_size()?;
            if !self.sequence(&[TokenKind::At]) {
                return Err(self.error_at("expected placement instruction", -1));
            }
            let offset = self.parse_expr()?;
            let decl = ArrayDecl {
                name,
                ty,
                size,
                placement: Placement::At(offset),
                attrs: Vec::new(),
            };
            Ok(Stmt::new(StmtKind::Array(Box::new(decl)), span))
        } else if self.sequence(&[IDENT]) {
            let name = self.ident_at(-1)?;
            let placement = if self.sequence(&[TokenKind::At]) {
                Placement::At(self.parse_expr()?)
            } else if self.sequence(&[TokenKind::KwIn]) {
                Placement::In
            } else if self.sequence(&[TokenKind::KwOut]) {
                Placement::Out
            } else {
                Placement::Cursor
            };
            let decl = VarDecl {
                name,
                ty,
                placement,
                attrs: Vec::new(),
            };
            Ok(Stmt::new(StmtKind::Var(Box::new(decl)), span))
        } else if self.sequence(&[TokenKind::Star, IDENT, TokenKind::Colon]) {
            let mut decl = self.parse_pointer_tail(ty)?;
            if !self.sequence(&[TokenKind::At]) {
                return Err(self.error_at("expected placement instruction", -1));
            }
            decl.placement = Placement::At(self.parse_expr()?);
            Ok(Stmt::new(StmtKind::Pointer(Box::new(decl)), span))
        } else {
            Err(self.error(format!("invalid sequence, unexpected {}", self.kind_at(0))))
        }
    }

    // ========== Types ==========

    /// Parse a type use: `[le|be] (builtin | ns::Name)`.
    /// `allow_function_types` admits `str` and `auto`.
    fn parse_type(&mut self, allow_function_types: bool) -> Result<TypeDecl, ParseError> {
        let span = self.span_at(0);
        let endian = if self.sequence(&[TokenKind::KwLe]) {
            Some(Endianness::Little)
        } else if self.sequence(&[TokenKind::KwBe]) {
            Some(Endianness::Big)
        } else {
            None
        };

        if self.peek(&IDENT, 0) {
            let name = self.parse_namespace_resolution()?;
            let mut decl = self
                .registry
                .instantiate(&self.namespace, &name, span)
                .ok_or_else(|| self.error_at(format!("unknown type '{}'", name), -1))?;
            if endian.is_some() {
                decl.endian = endian;
            }
            return Ok(decl);
        }

        if self.sequence(&[VALUE_TYPE]) {
            let ty = self.value_type_at(-1)?;
            if !allow_function_types && matches!(ty, BuiltinType::Str | BuiltinType::Auto) {
                return Err(self.error_at(
                    format!("cannot use '{}' in this context", ty.name()),
                    -1,
                ));
            }
            return Ok(TypeDecl::builtin(ty, endian, span));
        }

        Err(self.error("failed to parse type, expected identifier or builtin type"))
    }

    fn parse_struct(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(-2);
        let name = self.ident_at(-1)?;
        let qualified = self
            .registry
            .open(&self.namespace, &name)
            .map_err(|msg| self.error_at(msg, -1))?;

        let mut inherits = Vec::new();
        if self.sequence(&[TokenKind::Colon, IDENT]) {
            loop {
                self.pos -= 1;
                let base = self.parse_namespace_resolution()?;
                match self.registry.instantiate_finished(&self.namespace, &base) {
                    Some(decl) => inherits.push(decl),
                    None => {
                        return Err(
                            self.error_at(format!("cannot inherit from unknown type '{}'", base), -1)
                        )
                    }
                }
                if !self.sequence(&[TokenKind::Comma, IDENT]) {
                    break;
                }
            }
        } else if self.sequence(&[TokenKind::Colon, VALUE_TYPE]) {
            return Err(self.error_at("cannot inherit from builtin type", -1));
        }

        if !self.sequence(&[TokenKind::LBrace]) {
            return Err(self.error_at("expected '{' after struct definition", -1));
        }
        let members = self.parse_member_block("struct")?;

        let decl = TypeDecl {
            name: qualified,
            endian: None,
            body: TypeBody::Struct(StructDef { inherits, members }),
            attrs: Vec::new(),
            span,
        };
        self.registry.finish(decl.clone());
        Ok(Stmt::new(StmtKind::TypeDef(Box::new(decl)), span))
    }

    fn parse_union(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(-3);
        let name = self.ident_at(-2)?;
        let qualified = self
            .registry
            .open(&self.namespace, &name)
            .map_err(|msg| self.error_at(msg, -2))?;
        let members = self.parse_member_block("union")?;

        let decl = TypeDecl {
            name: qualified,
            endian: None,
            body: TypeBody::Union(members),
            attrs: Vec::new(),
            span,
        };
        self.registry.finish(decl.clone());
        Ok(Stmt::new(StmtKind::TypeDef(Box::new(decl)), span))
    }

    /// Members up to and including the closing brace
    fn parse_member_block(&mut self, what: &str) -> Result<Vec<Stmt>, ParseError> {
        let mut members = Vec::new();
        while !self.sequence(&[TokenKind::RBrace]) {
            if self.peek(&TokenKind::Eof, 0) {
                return Err(self.error_at(format!("missing '}}' at end of {}", what), -1));
            }
            members.push(self.parse_member()?);
        }
        Ok(members)
    }

    fn parse_enum(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(-3);
        let name = self.ident_at(-2)?;

        let underlying = self.parse_type(false)?;
        if underlying.endian.is_some() {
            return Err(self.error_at("underlying type may not have an endian specification", -2));
        }
        let underlying = match underlying.as_builtin() {
            Some(ty) if ty.is_integer() => ty,
            _ => return Err(self.error_at("invalid underlying type for enum, expected an integer type", -1)),
        };

        let qualified = self
            .registry
            .open(&self.namespace, &name)
            .map_err(|msg| self.error_at(msg, -1))?;
        if !self.sequence(&[TokenKind::LBrace]) {
            return Err(self.error_at("expected '{' after enum definition", -1));
        }

        let mut entries: Vec<EnumEntry> = Vec::new();
        while !self.sequence(&[TokenKind::RBrace]) {
            let entry_span = self.span_at(0);
            let entry = if self.sequence(&[IDENT, TokenKind::Eq]) {
                EnumEntry {
                    name: self.ident_at(-2)?,
                    value: self.parse_expr()?,
                }
            } else if self.sequence(&[IDENT]) {
                let value = match entries.last() {
                    None => Expr::new(ExprKind::Literal(Literal::Integer(0)), entry_span),
                    Some(prev) => Expr::new(
                        ExprKind::Binary(
                            BinOp::Add,
                            Box::new(prev.value.clone()),
                            Box::new(Expr::new(ExprKind::Literal(Literal::Integer(1)), entry_span)),
                        ),
                        entry_span,
                    ),
                };
                EnumEntry {
                    name: self.ident_at(-1)?,
                    value,
                }
            } else if self.peek(&TokenKind::Eof, 0) {
                return Err(self.error_at("unexpected end of program", -1));
            } else {
                return Err(self.error("invalid enum entry"));
            };
            entries.push(entry);

            if !self.sequence(&[TokenKind::Comma]) {
                if self.sequence(&[TokenKind::RBrace]) {
                    break;
                }
                return Err(self.error("missing ',' between enum entries"));
            }
        }

        let decl = TypeDecl {
            name: qualified,
            endian: None,
            body: TypeBody::Enum(EnumDef {
                underlying,
                entries,
            }),
            attrs: Vec::new(),
            span,
        };
        self.registry.finish(decl.clone());
        Ok(Stmt::new(StmtKind::TypeDef(Box::new(decl)), span))
    }

    fn parse_bitfield(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(-3);
        let name = self.ident_at(-2)?;
        let qualified = self
            .registry
            .open(&self.namespace, &name)
            .map_err(|msg| self.error_at(msg, -2))?;

        let mut entries = Vec::new();
        while !self.sequence(&[TokenKind::RBrace]) {
            let entry = if self.sequence(&[IDENT, TokenKind::Colon]) {
                BitfieldEntry {
                    name: self.ident_at(-2)?,
                    width: self.parse_expr()?,
                    padding: false,
                }
            } else if self.sequence(&[TokenKind::KwPadding, TokenKind::Colon]) {
                BitfieldEntry {
                    name: "padding".to_string(),
                    width: self.parse_expr()?,
                    padding: true,
                }
            } else if self.peek(&TokenKind::Eof, 0) {
                return Err(self.error_at("unexpected end of program", -1));
            } else {
                return Err(self.error("invalid bitfield member"));
            };
            entries.push(entry);
            self.expect_semicolon()?;
        }

        let decl = TypeDecl {
            name: qualified,
            endian: None,
            body: TypeBody::Bitfield(entries),
            attrs: Vec::new(),
            span,
        };
        self.registry.finish(decl.clone());
        Ok(Stmt::new(StmtKind::TypeDef(Box::new(decl)), span))
    }

    // ========== Members ==========

    fn parse_member(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(0);
        let mut stmt = if self.peek_call() {
            let call = self.parse_call()?;
            Stmt::new(StmtKind::Expr(call), span)
        } else if self.peek_type_start() {
            let ty = self.parse_type(false)?;
            if self.peek_array_declarator() {
                self.pos += 2;
                let name = self.ident_at(-2)?;
                let size = self.parse_array_size()?;
                let decl = ArrayDecl {
                    name,
                    ty,
                    size,
                    placement: Placement::Cursor,
                    attrs: Vec::new(),
                };
                Stmt::new(StmtKind::Array(Box::new(decl)), span)
            } else if self.sequence(&[IDENT]) {
                self.parse_member_variable(ty, span)?
            } else if self.sequence(&[TokenKind::Star, IDENT, TokenKind::Colon]) {
                let decl = self.parse_pointer_tail(ty)?;
                Stmt::new(StmtKind::Pointer(Box::new(decl)), span)
            } else {
                return Err(self.error("invalid variable declaration"));
            }
        } else if self.sequence(&[TokenKind::KwPadding, TokenKind::LBracket]) {
            let size = self.parse_expr()?;
            if !self.sequence(&[TokenKind::RBracket]) {
                return Err(self.error_at("expected closing ']' at end of padding", -1));
            }
            Stmt::new(StmtKind::Padding(size), span)
        } else if self.sequence(&[TokenKind::KwIf, TokenKind::LParen]) {
            return self.parse_member_conditional(span);
        } else if self.peek(&TokenKind::Eof, 0) {
            return Err(self.error_at("unexpected end of program", -1));
        } else {
            return Err(self.error(format!("invalid struct member, unexpected {}", self.kind_at(0))));
        };

        self.parse_trailing_attributes(&mut stmt)?;
        self.expect_semicolon()?;
        Ok(stmt)
    }

    /// `name` already consumed; handles `a, b, c` multi-declarations
    fn parse_member_variable(&mut self, ty: TypeDecl, span: Span) -> Result<Stmt, ParseError> {
        let first = VarDecl {
            name: self.ident_at(-1)?,
            ty,
            placement: Placement::Cursor,
            attrs: Vec::new(),
        };
        if !self.peek(&TokenKind::Comma, 0) {
            return Ok(Stmt::new(StmtKind::Var(Box::new(first)), span));
        }
        let mut vars = vec![first];
        while self.sequence(&[TokenKind::Comma, IDENT]) {
            vars.push(VarDecl {
                name: self.ident_at(-1)?,
                ty: vars[0].ty.clone(),
                placement: Placement::Cursor,
                attrs: Vec::new(),
            });
        }
        Ok(Stmt::new(StmtKind::Multi(vars), span))
    }

    /// `*name :` already consumed; parses the address type
    fn parse_pointer_tail(&mut self, target: TypeDecl) -> Result<PointerDecl, ParseError> {
        let name = self.ident_at(-2)?;
        let size = self.parse_type(false)?;
        let size_type = match size.as_builtin() {
            Some(ty) if ty.is_unsigned() => ty,
            _ => return Err(self.error_at("invalid type used for pointer size", -1)),
        };
        Ok(PointerDecl {
            name,
            target,
            size_type,
            size_endian: size.endian,
            placement: Placement::Cursor,
            attrs: Vec::new(),
        })
    }

    fn parse_array_size(&mut self) -> Result<ArraySize, ParseError> {
        if self.sequence(&[TokenKind::RBracket]) {
            return Ok(ArraySize::Unsized);
        }
        let size = if self.sequence(&[TokenKind::KwWhile, TokenKind::LParen]) {
            let cond = self.parse_expr()?;
            if !self.sequence(&[TokenKind::RParen]) {
                return Err(self.error_at("expected closing ')' after while head", -1));
            }
            ArraySize::While(cond)
        } else {
            ArraySize::Fixed(self.parse_expr()?)
        };
        if !self.sequence(&[TokenKind::RBracket]) {
            return Err(self.error_at("expected closing ']' at end of array declaration", -1));
        }
        Ok(size)
    }

    /// `if (` already consumed. Branches hold members, spliced into the
    /// enclosing compound when taken.
    fn parse_member_conditional(&mut self, span: Span) -> Result<Stmt, ParseError> {
        let cond = self.parse_expr()?;
        if !self.sequence(&[TokenKind::RParen]) {
            return Err(self.error_at("expected closing ')' after condition", -1));
        }
        let then_body = self.parse_member_body()?;
        let else_body = if self.sequence(&[TokenKind::KwElse]) {
            self.parse_member_body()?
        } else {
            Vec::new()
        };
        while self.sequence(&[TokenKind::Semicolon]) {}
        Ok(Stmt::new(
            StmtKind::If(Box::new(IfData {
                cond,
                then_body,
                else_body,
            })),
            span,
        ))
    }

    fn parse_member_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.sequence(&[TokenKind::LBrace]) {
            self.parse_member_block("conditional")
        } else {
            Ok(vec![self.parse_member()?])
        }
    }

    // ========== Attributes ==========

    fn parse_trailing_attributes(&mut self, stmt: &mut Stmt) -> Result<(), ParseError> {
        if !self.peek(&TokenKind::LBracket, 0) || !self.peek(&TokenKind::LBracket, 1) {
            return Ok(());
        }
        let Some(list) = stmt.attrs_mut() else {
            return Err(self.error("tried to apply attribute to invalid statement"));
        };
        self.pos += 2;

        let mut attrs = Vec::new();
        loop {
            let span = self.span_at(0);
            if !self.sequence(&[IDENT]) {
                return Err(self.error("expected attribute expression"));
            }
            let name = self.ident_at(-1)?;
            let value = if self.sequence(&[TokenKind::LParen, STRING, TokenKind::RParen]) {
                Some(self.string_at(-2)?)
            } else if self.peek(&TokenKind::LParen, 0) {
                return Err(self.error(format!(
                    "expected a single string argument to attribute '{}'",
                    name
                )));
            } else {
                None
            };
            attrs.push(Attribute { name, value, span });
            if !self.sequence(&[TokenKind::Comma]) {
                break;
            }
        }
        if !self.sequence(&[TokenKind::RBracket, TokenKind::RBracket]) {
            return Err(self.error("expected ']]' to finish attribute"));
        }

        list.extend(attrs.iter().cloned());
        if let StmtKind::TypeDef(decl) = &stmt.kind {
            self.registry.add_attrs(&decl.name, &attrs);
        }
        Ok(())
    }

    // ========== Functions ==========

    fn parse_function(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(-3);
        let name = types::qualify(&self.namespace, &self.ident_at(-2)?);
        if !self.functions.insert(name.clone()) {
            return Err(self.error_at(format!("redefinition of function '{}'", name), -2));
        }

        let mut params = Vec::new();
        if !self.sequence(&[TokenKind::RParen]) {
            let mut unnamed = 0usize;
            loop {
                let ty = self.parse_type(true)?;
                let param_name = if self.sequence(&[IDENT]) {
                    self.ident_at(-1)?
                } else {
                    let n = unnamed.to_string();
                    unnamed += 1;
                    n
                };
                params.push(Param {
                    name: param_name,
                    ty,
                });
                if self.sequence(&[TokenKind::Comma]) {
                    continue;
                }
                if self.sequence(&[TokenKind::RParen]) {
                    break;
                }
                return Err(self.error("expected closing ')' after parameter list"));
            }
        }

        if !self.sequence(&[TokenKind::LBrace]) {
            return Err(self.error_at("expected opening '{' after function definition", -1));
        }
        let mut body = Vec::new();
        while !self.sequence(&[TokenKind::RBrace]) {
            if self.peek(&TokenKind::Eof, 0) {
                return Err(self.error_at("missing '}' at end of function body", -1));
            }
            body.push(self.parse_function_statement()?);
        }

        let def = FnDef { name, params, body };
        Ok(Stmt::new(StmtKind::Function(Box::new(def)), span))
    }

    fn parse_function_statement(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(0);
        let mut needs_semicolon = true;

        let stmt = if self.peek_assignment() {
            self.parse_assignment()?
        } else if self.sequence(&[TokenKind::KwReturn]) {
            let value = if self.peek(&TokenKind::Semicolon, 0) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            Stmt::new(StmtKind::Return(value), span)
        } else if self.sequence(&[TokenKind::KwBreak]) {
            Stmt::new(StmtKind::Break, span)
        } else if self.sequence(&[TokenKind::KwContinue]) {
            Stmt::new(StmtKind::Continue, span)
        } else if self.sequence(&[TokenKind::KwIf, TokenKind::LParen]) {
            needs_semicolon = false;
            self.parse_function_if(span)?
        } else if self.sequence(&[TokenKind::KwWhile, TokenKind::LParen]) {
            needs_semicolon = false;
            let cond = self.parse_expr()?;
            if !self.sequence(&[TokenKind::RParen]) {
                return Err(self.error_at("expected closing ')' after while head", -1));
            }
            let body = self.parse_statement_body()?;
            Stmt::new(
                StmtKind::While(Box::new(WhileData {
                    cond,
                    body,
                    post: None,
                })),
                span,
            )
        } else if self.sequence(&[TokenKind::KwFor, TokenKind::LParen]) {
            needs_semicolon = false;
            self.parse_function_for(span)?
        } else if self.peek_call() {
            let call = self.parse_call()?;
            Stmt::new(StmtKind::Expr(call), span)
        } else if self.peek_type_start() {
            self.parse_local_declaration()?
        } else if self.peek(&TokenKind::Eof, 0) {
            return Err(self.error_at("unexpected end of program", -1));
        } else {
            return Err(self.error(format!("invalid sequence, unexpected {}", self.kind_at(0))));
        };

        if needs_semicolon {
            self.expect_semicolon()?;
        }
        Ok(stmt)
    }

    /// `name op= expr`; compound operators desugar to `name = name op expr`
    fn parse_assignment(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(0);
        let name = self.ident_at(0)?;
        let op = assign_op(self.kind_at(1));
        self.pos += 2;
        let rhs = self.parse_expr()?;
        let value = match op.flatten() {
            None => rhs,
            Some(op) => {
                let lhs = Expr::new(ExprKind::Path(vec![PathSegment::Name(name.clone())]), span);
                let span = span.merge(rhs.span);
                Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), span)
            }
        };
        Ok(Stmt::new(
            StmtKind::Assign(Box::new(AssignData { name, value })),
            span,
        ))
    }

    /// `Type a [= expr]` or `Type a, b`
    fn parse_local_declaration(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span_at(0);
        let ty = self.parse_type(true)?;
        if !self.sequence(&[IDENT]) {
            return Err(self.error("invalid variable declaration"));
        }
        let decl = self.parse_member_variable(ty, span)?;
        if !self.sequence(&[TokenKind::Eq]) {
            return Ok(decl);
        }
        let StmtKind::Var(var) = &decl.kind else {
            return Err(self.error_at("cannot initialize multiple variables at once", -1));
        };
        let assign = AssignData {
            name: var.name.clone(),
            value: self.parse_expr()?,
        };
        Ok(Stmt::new(
            StmtKind::Compound(vec![
                decl,
                Stmt::new(StmtKind::Assign(Box::new(assign)), span),
            ]),
            span,
        ))
    }

    fn parse_function_if(&mut self, span: Span) -> Result<Stmt, ParseError> {
        let cond = self.parse_expr()?;
        if !self.sequence(&[TokenKind::RParen]) {
            return Err(self.error_at("expected closing ')' after condition", -1));
        }
        let then_body = self.parse_statement_body()?;
        let else_body = if self.sequence(&[TokenKind::KwElse]) {
            self.parse_statement_body()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(
            StmtKind::If(Box::new(IfData {
                cond,
                then_body,
                else_body,
            })),
            span,
        ))
    }

    /// `for (decl, cond, assignment) body` becomes `{ decl; while (cond) { body; assignment } }`
    fn parse_function_for(&mut self, span: Span) -> Result<Stmt, ParseError> {
        let init = self.parse_local_declaration()?;
        if !self.variant(TokenKind::Comma, TokenKind::Semicolon) {
            return Err(self.error("expected ',' after for loop variable declaration"));
        }
        let cond = self.parse_expr()?;
        if !self.variant(TokenKind::Comma, TokenKind::Semicolon) {
            return Err(self.error("expected ',' after for loop condition"));
        }
        if !self.peek_assignment() {
            return Err(self.error("expected for loop variable assignment"));
        }
        let post = self.parse_assignment()?;
        if !self.sequence(&[TokenKind::RParen]) {
            return Err(self.error_at("expected closing ')' after for loop head", -1));
        }
        let body = self.parse_statement_body()?;

        let looped = Stmt::new(
            StmtKind::While(Box::new(WhileData {
                cond,
                body,
                post: Some(Box::new(post)),
            })),
            span,
        );
        Ok(Stmt::new(StmtKind::Compound(vec![init, looped]), span))
    }

    fn parse_statement_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if !self.sequence(&[TokenKind::LBrace]) {
            return Ok(vec![self.parse_function_statement()?]);
        }
        let mut body = Vec::new();
        while !self.sequence(&[TokenKind::RBrace]) {
            if self.peek(&TokenKind::Eof, 0) {
                return Err(self.error_at("missing '}' at end of block", -1));
            }
            body.push(self.parse_function_statement()?);
        }
        Ok(body)
    }
}

/// Assignment operator: `Some(None)` for `=`, `Some(Some(op))` for `op=`
fn assign_op(kind: &TokenKind) -> Option<Option<BinOp>> {
    let op = match kind {
        TokenKind::Eq => None,
        TokenKind::PlusEq => Some(BinOp::Add),
        TokenKind::MinusEq => Some(BinOp::Sub),
        TokenKind::StarEq => Some(BinOp::Mul),
        TokenKind::SlashEq => Some(BinOp::Div),
        TokenKind::PercentEq => Some(BinOp::Mod),
        TokenKind::AmpEq => Some(BinOp::BitAnd),
        TokenKind::PipeEq => Some(BinOp::BitOr),
        TokenKind::CaretEq => Some(BinOp::BitXor),
        TokenKind::LShiftEq => Some(BinOp::Shl),
        TokenKind::RShiftEq => Some(BinOp::Shr),
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(input: &str) -> Program {
        let tokens = Lexer::new(input).tokenize().expect("lex failed");
        Parser::new(tokens).parse().expect("parse failed")
    }

    fn parse_err(input: &str) -> ParseError {
        let tokens = Lexer::new(input).tokenize().expect("lex failed");
        Parser::new(tokens).parse().unwrap_err()
    }

    fn struct_members(program: &Program, name: &str) -> Vec<Stmt> {
        match &program.type_named(name).expect("type registered").body {
            TypeBody::Struct(def) => def.members.clone(),
            other => panic!("expected struct, got {:?}", other),
        }
    }

    // ========== Placements ==========

    #[test]
    fn test_struct_and_placement() {
        let program = parse("struct A { u32 x; u16 y; }; A a @ 0x10;");
        assert_eq!(program.stmts.len(), 2);
        assert!(matches!(program.stmts[0].kind, StmtKind::TypeDef(_)));
        match &program.stmts[1].kind {
            StmtKind::Var(v) => {
                assert_eq!(v.name, "a");
                assert_eq!(v.ty.name, "A");
                assert!(matches!(
                    &v.placement,
                    Placement::At(Expr {
                        kind: ExprKind::Literal(Literal::Integer(0x10)),
                        ..
                    })
                ));
            }
            other => panic!("expected placement, got {:?}", other),
        }
        assert_eq!(struct_members(&program, "A").len(), 2);
    }

    #[test]
    fn test_in_out_placements() {
        let program = parse("u32 limit in; u32 count out; u8 first;");
        let placements: Vec<_> = program
            .stmts
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Var(v) => v.placement.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            placements,
            vec![Placement::In, Placement::Out, Placement::Cursor]
        );
    }

    #[test]
    fn test_top_level_array_requires_placement() {
        let err = parse_err("u8 data[4];");
        assert_eq!(err.message, "expected placement instruction");
        parse("u8 data[4] @ 0;");
    }

    #[test]
    fn test_top_level_pointer() {
        let program = parse("u32 *ptr : u16 @ 0x04;");
        match &program.stmts[0].kind {
            StmtKind::Pointer(p) => {
                assert_eq!(p.name, "ptr");
                assert_eq!(p.size_type, BuiltinType::U16);
                assert_eq!(p.target.as_builtin(), Some(BuiltinType::U32));
            }
            other => panic!("expected pointer, got {:?}", other),
        }
    }

    #[test]
    fn test_pointer_size_must_be_unsigned() {
        let err = parse_err("struct A { u8 *p : s32; };");
        assert_eq!(err.message, "invalid type used for pointer size");
        let err = parse_err("struct A { u8 *p : float; };");
        assert_eq!(err.message, "invalid type used for pointer size");
    }

    // ========== Types ==========

    #[test]
    fn test_unterminated_struct_reports_its_line() {
        let err = parse_err("struct A { u8 x");
        assert_eq!(err.line, 1);
        assert_eq!(err.message, "missing ';' at end of expression");
    }

    #[test]
    fn test_redefinition() {
        let err = parse_err("struct A { u8 x; };\nstruct A { u8 y; };");
        assert_eq!(err.message, "redefinition of type 'A'");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_unknown_type() {
        let err = parse_err("struct A { Missing m; };");
        assert_eq!(err.message, "unknown type 'Missing'");
    }

    #[test]
    fn test_empty_program() {
        let err = parse_err("  // nothing here\n");
        assert_eq!(err.message, "program is empty");
    }

    #[test]
    fn test_enum_auto_increment_expressions() {
        let program = parse("enum E : u8 { A, B = 5, C, D };");
        let TypeBody::Enum(def) = &program.type_named("E").unwrap().body else {
            panic!("expected enum");
        };
        assert_eq!(def.underlying, BuiltinType::U8);
        let names: Vec<_> = def.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C", "D"]);
        assert_eq!(def.entries[0].value.kind, ExprKind::Literal(Literal::Integer(0)));
        // C = (5) + 1, D = ((5) + 1) + 1
        match &def.entries[3].value.kind {
            ExprKind::Binary(BinOp::Add, lhs, _) => {
                assert!(matches!(lhs.kind, ExprKind::Binary(BinOp::Add, _, _)));
            }
            other => panic!("expected addition, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_underlying_rejects_endian() {
        let err = parse_err("enum E : be u16 { A };");
        assert_eq!(err.message, "underlying type may not have an endian specification");
    }

    #[test]
    fn test_enum_missing_comma() {
        let err = parse_err("enum E : u8 { A B };");
        assert_eq!(err.message, "missing ',' between enum entries");
    }

    #[test]
    fn test_bitfield_entries() {
        let program = parse("bitfield Flags { a : 1; padding : 3; b : 4; };");
        let TypeBody::Bitfield(entries) = &program.type_named("Flags").unwrap().body else {
            panic!("expected bitfield");
        };
        assert_eq!(entries.len(), 3);
        assert!(entries[1].padding);
        assert_eq!(entries[2].name, "b");
    }

    #[test]
    fn test_inheritance() {
        let program = parse("struct Base { u8 a; }; struct Derived : Base { u8 b; };");
        let TypeBody::Struct(def) = &program.type_named("Derived").unwrap().body else {
            panic!("expected struct");
        };
        assert_eq!(def.inherits.len(), 1);
        assert_eq!(def.inherits[0].name, "Base");
    }

    #[test]
    fn test_inheritance_errors() {
        let err = parse_err("struct D : Nope { u8 b; };");
        assert_eq!(err.message, "cannot inherit from unknown type 'Nope'");
        let err = parse_err("struct D : u32 { u8 b; };");
        assert_eq!(err.message, "cannot inherit from builtin type");
    }

    #[test]
    fn test_self_referencing_pointer_is_forward() {
        let program = parse("struct Node { u8 value; Node *next : u32; };");
        let members = struct_members(&program, "Node");
        match &members[1].kind {
            StmtKind::Pointer(p) => {
                assert_eq!(p.target.body, TypeBody::Forward("Node".to_string()));
            }
            other => panic!("expected pointer, got {:?}", other),
        }
    }

    #[test]
    fn test_using_alias_and_endian_override() {
        let program = parse("using Word = u16; struct A { be Word w; };");
        let members = struct_members(&program, "A");
        let StmtKind::Var(v) = &members[0].kind else {
            panic!("expected var");
        };
        assert_eq!(v.ty.name, "Word");
        assert_eq!(v.ty.endian, Some(Endianness::Big));
        assert_eq!(v.ty.as_builtin(), Some(BuiltinType::U16));
    }

    #[test]
    fn test_nested_namespaces_mangle_names() {
        let program = parse(
            "namespace fmt { namespace v1 { struct Header { u8 m; }; } struct Body { v1::Header h; }; }",
        );
        assert!(program.type_named("fmt::v1::Header").is_some());
        let members = struct_members(&program, "fmt::Body");
        let StmtKind::Var(v) = &members[0].kind else {
            panic!("expected var");
        };
        assert_eq!(v.ty.name, "fmt::v1::Header");
    }

    // ========== Members ==========

    #[test]
    fn test_member_forms() {
        let program = parse(
            "struct A { u8 a, b, c; padding[2]; char name[while($ < 8)]; u8 rest[]; if (a == 1) u8 x; else { u16 y; } };",
        );
        let members = struct_members(&program, "A");
        assert!(matches!(&members[0].kind, StmtKind::Multi(v) if v.len() == 3));
        assert!(matches!(members[1].kind, StmtKind::Padding(_)));
        assert!(matches!(
            &members[2].kind,
            StmtKind::Array(a) if matches!(a.size, ArraySize::While(_))
        ));
        assert!(matches!(
            &members[3].kind,
            StmtKind::Array(a) if a.size == ArraySize::Unsized
        ));
        match &members[4].kind {
            StmtKind::If(data) => {
                assert_eq!(data.then_body.len(), 1);
                assert_eq!(data.else_body.len(), 1);
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_attributes() {
        let program = parse(r#"struct A { u8 x [[color("FF0000"), hidden]]; } [[inline]];"#);
        let members = struct_members(&program, "A");
        let StmtKind::Var(v) = &members[0].kind else {
            panic!("expected var");
        };
        assert_eq!(v.attrs.len(), 2);
        assert_eq!(v.attrs[0].name, "color");
        assert_eq!(v.attrs[0].value.as_deref(), Some("FF0000"));
        assert_eq!(v.attrs[1].value, None);
        // type attributes also land in the registry
        assert_eq!(program.type_named("A").unwrap().attrs[0].name, "inline");
    }

    #[test]
    fn test_attribute_on_invalid_statement() {
        let err = parse_err("struct A { u8 a, b [[hidden]]; };");
        assert_eq!(err.message, "tried to apply attribute to invalid statement");
    }

    #[test]
    fn test_superfluous_semicolons() {
        let program = parse("struct A { u8 x;;; };;; A a @ 0;;");
        assert_eq!(program.stmts.len(), 2);
    }

    // ========== Functions ==========

    #[test]
    fn test_function_params_auto_numbered() {
        let program = parse("fn f(u32 a, u8, u16) { return a; };");
        let StmtKind::Function(def) = &program.stmts[0].kind else {
            panic!("expected function");
        };
        let names: Vec<_> = def.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a", "0", "1"]);
    }

    #[test]
    fn test_for_desugars_to_while() {
        let program = parse("fn f() { for (u32 i = 0; i < 4, i += 1) { continue; } };");
        let StmtKind::Function(def) = &program.stmts[0].kind else {
            panic!("expected function");
        };
        let StmtKind::Compound(parts) = &def.body[0].kind else {
            panic!("expected compound");
        };
        // declaration with initializer, then the loop
        assert!(matches!(&parts[0].kind, StmtKind::Compound(init) if init.len() == 2));
        match &parts[1].kind {
            StmtKind::While(w) => {
                assert!(w.post.is_some());
                assert!(matches!(w.body[0].kind, StmtKind::Continue));
            }
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let program = parse("fn f() { u32 x; x <<= 2; };");
        let StmtKind::Function(def) = &program.stmts[0].kind else {
            panic!("expected function");
        };
        match &def.body[1].kind {
            StmtKind::Assign(a) => {
                assert_eq!(a.name, "x");
                assert!(matches!(a.value.kind, ExprKind::Binary(BinOp::Shl, _, _)));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_namespaced_function_and_call() {
        let program = parse("namespace util { fn one() { return 1; }; } util::one();");
        let StmtKind::Function(def) = &program.stmts[0].kind else {
            panic!("expected function");
        };
        assert_eq!(def.name, "util::one");
        match &program.stmts[1].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Call { name, args, .. },
                ..
            }) => {
                assert_eq!(name, "util::one");
                assert!(args.is_empty());
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_function_redefinition() {
        let err = parse_err("fn f() { }; fn f() { };");
        assert_eq!(err.message, "redefinition of function 'f'");
    }

    #[test]
    fn test_missing_semicolon_in_function() {
        let err = parse_err("fn f() {\n  u32 x = 1\n};");
        assert_eq!(err.message, "missing ';' at end of expression");
        assert_eq!(err.line, 2);
    }
}
