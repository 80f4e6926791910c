// Expression grammar: precedence ladder from ternary down to primary

use super::ast::*;
use super::{Parser, IDENT, VALUE_TYPE};
use crate::error::ParseError;
use crate::lexer::token::TokenKind;

impl Parser {
    pub(super) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    /// `cond ? a : b`, right-associative
    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_bool_or()?;
        if !self.sequence(&[TokenKind::Question]) {
            return Ok(cond);
        }
        let then_expr = self.parse_ternary()?;
        if !self.sequence(&[TokenKind::Colon]) {
            return Err(self.error("expected ':' in ternary expression"));
        }
        let else_expr = self.parse_ternary()?;
        let span = cond.span.merge(else_expr.span);
        Ok(Expr::new(
            ExprKind::Ternary(Box::new(cond), Box::new(then_expr), Box::new(else_expr)),
            span,
        ))
    }

    /// Helper: parse left-associative binary operators.
    /// Calls `next_fn` for operands, `map_op` to convert the current token to a BinOp.
    fn parse_binary_op(
        &mut self,
        next_fn: fn(&mut Self) -> Result<Expr, ParseError>,
        map_op: fn(&TokenKind) -> Option<BinOp>,
    ) -> Result<Expr, ParseError> {
        let mut lhs = next_fn(self)?;
        while let Some(op) = map_op(self.kind_at(0)) {
            self.pos += 1;
            let rhs = next_fn(self)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), span);
        }
        Ok(lhs)
    }

    fn parse_bool_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bool_xor, |tok| match tok {
            TokenKind::PipePipe => Some(BinOp::LogOr),
            _ => None,
        })
    }

    fn parse_bool_xor(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bool_and, |tok| match tok {
            TokenKind::CaretCaret => Some(BinOp::LogXor),
            _ => None,
        })
    }

    fn parse_bool_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bit_or, |tok| match tok {
            TokenKind::AmpAmp => Some(BinOp::LogAnd),
            _ => None,
        })
    }

    fn parse_bit_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bit_xor, |tok| match tok {
            TokenKind::Pipe => Some(BinOp::BitOr),
            _ => None,
        })
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bit_and, |tok| match tok {
            TokenKind::Caret => Some(BinOp::BitXor),
            _ => None,
        })
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_equality, |tok| match tok {
            TokenKind::Ampersand => Some(BinOp::BitAnd),
            _ => None,
        })
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_relational, |tok| match tok {
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::BangEq => Some(BinOp::Ne),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_shift, |tok| match tok {
            TokenKind::Less => Some(BinOp::Lt),
            TokenKind::Greater => Some(BinOp::Gt),
            TokenKind::LessEq => Some(BinOp::Le),
            TokenKind::GreaterEq => Some(BinOp::Ge),
            _ => None,
        })
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_additive, |tok| match tok {
            TokenKind::LShift => Some(BinOp::Shl),
            TokenKind::RShift => Some(BinOp::Shr),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_multiplicative, |tok| match tok {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_unary, |tok| match tok {
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::Percent => Some(BinOp::Mod),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.span_at(0);
        let op = match self.kind_at(0) {
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            _ => return self.parse_cast(),
        };
        self.pos += 1;
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), span))
    }

    /// `[le|be] builtin(expr)`
    fn parse_cast(&mut self) -> Result<Expr, ParseError> {
        let starts_cast = self.peek(&TokenKind::KwLe, 0)
            || self.peek(&TokenKind::KwBe, 0)
            || self.peek(&VALUE_TYPE, 0);
        if !starts_cast {
            return self.parse_primary();
        }

        let start = self.span_at(0);
        let target = self.parse_type(true)?;
        let Some(ty) = target.as_builtin().filter(|_| target.name.is_empty()) else {
            return Err(self.error_at("cast target must be a builtin type", -1));
        };
        if !self.peek(&TokenKind::LParen, 0) {
            return Err(self.error("expected '(' after cast type"));
        }
        let operand = self.parse_primary()?;
        let span = start.merge(operand.span);
        Ok(Expr::new(
            ExprKind::Cast {
                ty,
                endian: target.endian,
                expr: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span_at(0);

        if self.peek_literal() {
            let literal = match self.kind_at(0) {
                TokenKind::IntLiteral(v) => Literal::Integer(*v),
                TokenKind::FloatLiteral(v) => Literal::Float(*v),
                TokenKind::StringLiteral(s) => Literal::String(s.clone()),
                TokenKind::CharLiteral(c) => Literal::Char(*c),
                TokenKind::BoolLiteral(b) => Literal::Bool(*b),
                other => return Err(self.error(format!("unexpected {}", other))),
            };
            self.pos += 1;
            return Ok(Expr::new(ExprKind::Literal(literal), span));
        }

        if self.sequence(&[TokenKind::LParen]) {
            let inner = self.parse_expr()?;
            if !self.sequence(&[TokenKind::RParen]) {
                return Err(self.error_at("expected closing parenthesis", -1));
            }
            return Ok(inner);
        }

        if self.peek_call() {
            return self.parse_call();
        }

        if self.peek(&IDENT, 0) && self.peek(&TokenKind::ColonColon, 1) {
            return self.parse_scope_resolution();
        }

        if self.peek(&IDENT, 0) || self.peek(&TokenKind::KwParent, 0) || self.peek(&TokenKind::KwThis, 0) {
            let path = self.parse_rvalue_path()?;
            let span = span.merge(self.span_at(-1));
            return Ok(Expr::new(ExprKind::Path(path), span));
        }

        if self.sequence(&[TokenKind::Dollar]) {
            return Ok(Expr::new(ExprKind::Cursor, span));
        }

        if self.sequence(&[TokenKind::KwAddressof, TokenKind::LParen]) {
            let path = self.parse_rvalue_path()?;
            self.expect_close_paren("addressof")?;
            return Ok(Expr::new(ExprKind::AddressOf(path), span.merge(self.span_at(-1))));
        }

        if self.sequence(&[TokenKind::KwSizeof, TokenKind::LParen]) {
            let target = if self.sequence(&[VALUE_TYPE]) {
                SizeOfTarget::Type(self.value_type_at(-1)?)
            } else {
                SizeOfTarget::Path(self.parse_rvalue_path()?)
            };
            self.expect_close_paren("sizeof")?;
            return Ok(Expr::new(ExprKind::SizeOf(target), span.merge(self.span_at(-1))));
        }

        if self.peek(&TokenKind::Eof, 0) {
            return Err(self.error_at("unexpected end of program", -1));
        }
        Err(self.error(format!("expected value or parenthesis, got {}", self.kind_at(0))))
    }

    fn expect_close_paren(&mut self, what: &str) -> Result<(), ParseError> {
        if !self.sequence(&[TokenKind::RParen]) {
            return Err(self.error(format!("expected closing ')' after {} operand", what)));
        }
        Ok(())
    }

    /// `a.b[i].c`, `parent.parent.x`, `this[2]`
    fn parse_rvalue_path(&mut self) -> Result<Vec<PathSegment>, ParseError> {
        let mut path = Vec::new();
        loop {
            if self.sequence(&[IDENT]) {
                path.push(PathSegment::Name(self.ident_at(-1)?));
            } else if self.sequence(&[TokenKind::KwParent]) {
                path.push(PathSegment::Parent);
            } else if path.is_empty() && self.sequence(&[TokenKind::KwThis]) {
                path.push(PathSegment::This);
            } else {
                return Err(self.error("expected identifier in member path"));
            }

            if self.sequence(&[TokenKind::LBracket]) {
                let index = self.parse_expr()?;
                if !self.sequence(&[TokenKind::RBracket]) {
                    return Err(self.error_at("expected closing ']' after array index", -1));
                }
                path.push(PathSegment::Index(index));
            }

            if !self.sequence(&[TokenKind::Dot]) {
                return Ok(path);
            }
        }
    }

    /// `Type::member`, `ns::Type::member`
    fn parse_scope_resolution(&mut self) -> Result<Expr, ParseError> {
        let span = self.span_at(0);
        let mut type_name = self.ident_at(0)?;
        self.pos += 1;
        loop {
            if !self.sequence(&[TokenKind::ColonColon, IDENT]) {
                return Err(self.error("failed to parse scope resolution, expected 'TypeName::identifier'"));
            }
            let part = self.ident_at(-1)?;
            if self.peek(&TokenKind::ColonColon, 0) && self.peek(&IDENT, 1) {
                type_name.push_str("::");
                type_name.push_str(&part);
                continue;
            }
            let Some(ty) = self.registry.instantiate(&self.namespace, &type_name, span) else {
                return Err(self.error_at(
                    format!("cannot access scope of invalid type '{}'", type_name),
                    -1,
                ));
            };
            return Ok(Expr::new(
                ExprKind::ScopeResolution {
                    ty: Box::new(ty),
                    member: part,
                },
                span.merge(self.span_at(-1)),
            ));
        }
    }

    /// `ns::name(args)` with the cursor on the first identifier
    pub(super) fn parse_call(&mut self) -> Result<Expr, ParseError> {
        let span = self.span_at(0);
        let name = self.parse_namespace_resolution()?;
        if !self.sequence(&[TokenKind::LParen]) {
            return Err(self.error("expected '(' after function name"));
        }

        let mut args = Vec::new();
        if !self.sequence(&[TokenKind::RParen]) {
            loop {
                args.push(self.parse_expr()?);
                if self.sequence(&[TokenKind::Comma, TokenKind::RParen]) {
                    return Err(self.error_at("unexpected ',' at end of function parameter list", -1));
                }
                if self.sequence(&[TokenKind::RParen]) {
                    break;
                }
                if !self.sequence(&[TokenKind::Comma]) {
                    return Err(self.error("missing ',' between parameters"));
                }
            }
        }

        Ok(Expr::new(
            ExprKind::Call {
                name,
                namespace: self.namespace.join("::"),
                args,
            },
            span.merge(self.span_at(-1)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    /// Parse `expr` as the initializer of a local in a throwaway function
    fn parse_expr_str(prelude: &str, expr: &str) -> Result<Expr, ParseError> {
        let source = format!("{} fn probe() {{ auto v = {}; }};", prelude, expr);
        let tokens = Lexer::new(&source).tokenize().expect("lex failed");
        let program = Parser::new(tokens).parse()?;
        let StmtKind::Function(def) = &program.stmts.last().unwrap().kind else {
            panic!("expected function");
        };
        let StmtKind::Compound(parts) = &def.body[0].kind else {
            panic!("expected initialized declaration");
        };
        let StmtKind::Assign(assign) = &parts[1].kind else {
            panic!("expected assignment");
        };
        Ok(assign.value.clone())
    }

    fn expr(source: &str) -> Expr {
        parse_expr_str("", source).expect("parse failed")
    }

    fn int(v: u128) -> ExprKind {
        ExprKind::Literal(Literal::Integer(v))
    }

    #[test]
    fn test_multiplicative_binds_tighter() {
        let e = expr("1 + 2 * 3");
        let ExprKind::Binary(BinOp::Add, lhs, rhs) = e.kind else {
            panic!("expected addition");
        };
        assert_eq!(lhs.kind, int(1));
        assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn test_left_associative() {
        let e = expr("10 - 4 - 3");
        let ExprKind::Binary(BinOp::Sub, lhs, rhs) = e.kind else {
            panic!("expected subtraction");
        };
        assert!(matches!(lhs.kind, ExprKind::Binary(BinOp::Sub, _, _)));
        assert_eq!(rhs.kind, int(3));
    }

    #[test]
    fn test_ternary_right_associative() {
        let e = expr("true ? 1 : false ? 2 : 3");
        let ExprKind::Ternary(_, then_expr, else_expr) = e.kind else {
            panic!("expected ternary");
        };
        assert_eq!(then_expr.kind, int(1));
        assert!(matches!(else_expr.kind, ExprKind::Ternary(_, _, _)));
    }

    #[test]
    fn test_precedence_ladder_order() {
        // && binds tighter than ^^ which binds tighter than ||
        let e = expr("1 || 2 ^^ 3 && 4");
        let ExprKind::Binary(BinOp::LogOr, _, rhs) = e.kind else {
            panic!("expected ||");
        };
        let ExprKind::Binary(BinOp::LogXor, _, rhs) = rhs.kind else {
            panic!("expected ^^");
        };
        assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::LogAnd, _, _)));

        // shift binds tighter than comparison, comparison tighter than &
        let e = expr("1 << 2 < 3 & 4");
        let ExprKind::Binary(BinOp::BitAnd, lhs, _) = e.kind else {
            panic!("expected &");
        };
        let ExprKind::Binary(BinOp::Lt, lhs, _) = lhs.kind else {
            panic!("expected <");
        };
        assert!(matches!(lhs.kind, ExprKind::Binary(BinOp::Shl, _, _)));
    }

    #[test]
    fn test_nested_unary() {
        let e = expr("-~!1");
        let ExprKind::Unary(UnaryOp::Neg, inner) = e.kind else {
            panic!("expected negation");
        };
        let ExprKind::Unary(UnaryOp::BitNot, inner) = inner.kind else {
            panic!("expected bitwise not");
        };
        assert!(matches!(inner.kind, ExprKind::Unary(UnaryOp::Not, _)));
    }

    #[test]
    fn test_cast() {
        let e = expr("be u16(0x1234)");
        match e.kind {
            ExprKind::Cast { ty, endian, expr } => {
                assert_eq!(ty, BuiltinType::U16);
                assert_eq!(endian, Some(Endianness::Big));
                assert_eq!(expr.kind, int(0x1234));
            }
            other => panic!("expected cast, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_requires_builtin() {
        // a bare `A(1)` is a call; the endian prefix forces the cast path
        let err = parse_expr_str("struct A { u8 x; };", "le A(1)").unwrap_err();
        assert_eq!(err.message, "cast target must be a builtin type");
    }

    #[test]
    fn test_paths() {
        let e = expr("parent.parent.items[2].value");
        let ExprKind::Path(segments) = e.kind else {
            panic!("expected path");
        };
        assert_eq!(segments.len(), 5);
        assert_eq!(segments[0], PathSegment::Parent);
        assert_eq!(segments[1], PathSegment::Parent);
        assert_eq!(segments[2], PathSegment::Name("items".into()));
        assert!(matches!(segments[3], PathSegment::Index(_)));
        assert_eq!(segments[4], PathSegment::Name("value".into()));
    }

    #[test]
    fn test_cursor_sizeof_addressof() {
        assert_eq!(expr("$").kind, ExprKind::Cursor);
        assert_eq!(
            expr("sizeof(u32)").kind,
            ExprKind::SizeOf(SizeOfTarget::Type(BuiltinType::U32))
        );
        assert!(matches!(
            expr("sizeof(this)").kind,
            ExprKind::SizeOf(SizeOfTarget::Path(_))
        ));
        assert!(matches!(expr("addressof(x.y)").kind, ExprKind::AddressOf(p) if p.len() == 2));
    }

    #[test]
    fn test_scope_resolution() {
        let e = parse_expr_str("enum Kind : u8 { A, B };", "Kind::B").unwrap();
        match e.kind {
            ExprKind::ScopeResolution { ty, member } => {
                assert_eq!(ty.name, "Kind");
                assert_eq!(member, "B");
            }
            other => panic!("expected scope resolution, got {:?}", other),
        }
        let err = parse_expr_str("", "Missing::B").unwrap_err();
        assert_eq!(err.message, "cannot access scope of invalid type 'Missing'");
    }

    #[test]
    fn test_call_arguments() {
        let e = expr("std::mem::read_unsigned(0, 4)");
        match e.kind {
            ExprKind::Call { name, args, .. } => {
                assert_eq!(name, "std::mem::read_unsigned");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
        let err = parse_expr_str("", "f(1,)").unwrap_err();
        assert_eq!(err.message, "unexpected ',' at end of function parameter list");
        let err = parse_expr_str("", "f(1 2)").unwrap_err();
        assert_eq!(err.message, "missing ',' between parameters");
    }

    #[test]
    fn test_missing_close_paren() {
        let err = parse_expr_str("", "(1 + 2").unwrap_err();
        assert_eq!(err.message, "expected closing parenthesis");
    }
}
