// Expression evaluation methods for the evaluator
use super::*;

use crate::parser::ast::{
    BinOp, BuiltinType, Expr, ExprKind, Literal, PathSegment, SizeOfTarget, TypeBody, TypeDecl,
};
use scope::{FrameKind, Resolved, Segment, Variable};

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Integer(v) => Value::Unsigned(*v),
        Literal::Float(v) => Value::Float(*v),
        Literal::Bool(v) => Value::Bool(*v),
        Literal::Char(v) => Value::Char(*v),
        Literal::String(v) => Value::String(v.clone()),
    }
}

impl<'a> Evaluator<'a> {
    /// Evaluate an expression to a value
    pub(crate) fn eval_expr(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval_expr_inner(expr)
            .map_err(|e| e.with_line_if_none(expr.span.line))
    }

    fn eval_expr_inner(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(literal_value(literal)),
            ExprKind::Path(path) => match self.resolve_path(path)? {
                Resolved::Value(value) => Ok(value),
                Resolved::Node(node) => self.node_value(node),
            },
            ExprKind::Cursor => Ok(Value::Unsigned(u128::from(self.offset))),
            ExprKind::Unary(op, operand) => {
                let value = self.eval_expr(operand)?;
                Value::unary(*op, &value)
            }
            ExprKind::Binary(BinOp::LogAnd, lhs, rhs) => {
                if !self.eval_expr(lhs)?.to_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_expr(rhs)?.to_bool()?))
            }
            ExprKind::Binary(BinOp::LogOr, lhs, rhs) => {
                if self.eval_expr(lhs)?.to_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_expr(rhs)?.to_bool()?))
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.eval_expr(lhs)?;
                let rhs = self.eval_expr(rhs)?;
                Value::binary(*op, &lhs, &rhs)
            }
            ExprKind::Ternary(cond, then, otherwise) => {
                if self.eval_expr(cond)?.to_bool()? {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(otherwise)
                }
            }
            ExprKind::Cast { ty, endian, expr } => self
                .eval_expr(expr)?
                .cast(*ty, endian.unwrap_or_default()),
            ExprKind::ScopeResolution { ty, member } => self.scope_member(ty, member),
            ExprKind::Call {
                name,
                namespace,
                args,
            } => self
                .call_function(name, namespace, args)?
                .ok_or_else(|| {
                    EvalError::new(format!("function '{}' did not return a value", name))
                }),
            ExprKind::AddressOf(path) => {
                let node = self.path_node(path, "addressof")?;
                Ok(Value::Unsigned(u128::from(node.offset)))
            }
            ExprKind::SizeOf(SizeOfTarget::Path(path)) => {
                let node = self.path_node(path, "sizeof")?;
                Ok(Value::Unsigned(u128::from(node.size)))
            }
            ExprKind::SizeOf(SizeOfTarget::Type(ty)) => ty
                .size()
                .map(|size| Value::Unsigned(u128::from(size)))
                .ok_or_else(|| {
                    EvalError::new(format!("cannot take the size of '{}'", ty.name()))
                }),
        }
    }

    /// Evaluate index expressions, then walk the scope stack
    fn resolve_path(&mut self, path: &[PathSegment]) -> Result<Resolved, EvalError> {
        let mut segments = Vec::with_capacity(path.len());
        for segment in path {
            segments.push(match segment {
                PathSegment::Name(name) => Segment::Name(name),
                PathSegment::Parent => Segment::Parent,
                PathSegment::This => Segment::This,
                PathSegment::Index(index) => Segment::Index(self.eval_expr(index)?.to_unsigned()?),
            });
        }
        self.scope.resolve(&segments, self.offset)
    }

    fn path_node(&mut self, path: &[PathSegment], operator: &str) -> Result<PatternNode, EvalError> {
        match self.resolve_path(path)? {
            Resolved::Node(node) => Ok(node),
            Resolved::Value(_) => Err(EvalError::new(format!(
                "{} can only be applied to patterns, not variables",
                operator
            ))),
        }
    }

    /// A node used as a value: compounds stay patterns, leaves are decoded
    pub(crate) fn node_value(&self, node: PatternNode) -> Result<Value, EvalError> {
        if node.is_compound() {
            return Ok(Value::Pattern(Box::new(node)));
        }
        node.read_value(self.data, self.default_endian())
    }

    /// `Type::member` looks up an enum entry
    fn scope_member(&mut self, ty: &TypeDecl, member: &str) -> Result<Value, EvalError> {
        let program = self.program;
        let mut decl = ty;
        loop {
            decl = match &decl.body {
                TypeBody::Alias(inner) => &**inner,
                TypeBody::Forward(name) => program
                    .type_named(name)
                    .ok_or_else(|| EvalError::new(format!("unknown type '{}'", name)))?,
                _ => break,
            };
        }
        let TypeBody::Enum(def) = &decl.body else {
            return Err(EvalError::new(format!(
                "cannot access scope of type '{}'",
                ty.display_name()
            )));
        };
        self.enum_entries(def)?
            .into_iter()
            .find(|(name, _)| name == member)
            .map(|(_, value)| Value::Unsigned(value))
            .ok_or_else(|| {
                EvalError::new(format!(
                    "'{}' has no member named '{}'",
                    ty.display_name(),
                    member
                ))
            })
    }

    // ========== Calls ==========

    /// Evaluate the arguments and call a user function or builtin
    pub(crate) fn call_function(
        &mut self,
        name: &str,
        namespace: &str,
        args: &[Expr],
    ) -> Result<Option<Value>, EvalError> {
        let values = args
            .iter()
            .map(|arg| self.eval_expr(arg))
            .collect::<Result<Vec<_>, _>>()?;
        self.invoke(name, namespace, values)
    }

    /// User functions under the namespace-prefixed name, then as written,
    /// then builtins
    fn invoke(
        &mut self,
        name: &str,
        namespace: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, EvalError> {
        let qualified = (!namespace.is_empty()).then(|| format!("{}::{}", namespace, name));
        let user = qualified
            .as_deref()
            .and_then(|q| self.function(q))
            .or_else(|| self.function(name));
        if let Some(def) = user {
            return self.call_user(def, args);
        }
        let builtin = builtins::lookup(name)
            .or_else(|| qualified.as_deref().and_then(builtins::lookup));
        match builtin {
            Some(builtin) => builtin(self, &args),
            None => Err(EvalError::new(format!("unknown function '{}'", name))),
        }
    }

    /// Run a user function in a fresh function frame
    pub(crate) fn call_user(
        &mut self,
        def: &FnDef,
        args: Vec<Value>,
    ) -> Result<Option<Value>, EvalError> {
        if args.len() != def.params.len() {
            return Err(EvalError::new(format!(
                "function '{}' expects {} parameter(s), got {}",
                def.name,
                def.params.len(),
                args.len()
            )));
        }

        self.enter()?;
        self.scope.push(FrameKind::Function, self.offset, String::new());
        let result = self.bind_and_run(def, args);
        self.scope.pop();
        self.leave();

        match result? {
            ControlFlow::Return(value) => Ok(value),
            ControlFlow::None => Ok(None),
            ControlFlow::Break | ControlFlow::Continue => Err(EvalError::new(
                "break or continue used outside of a loop",
            )),
        }
    }

    fn bind_and_run(&mut self, def: &FnDef, args: Vec<Value>) -> Result<ControlFlow, EvalError> {
        for (param, value) in def.params.iter().zip(args) {
            let endian = param.ty.endian.unwrap_or_default();
            let variable = match param.ty.as_builtin() {
                Some(BuiltinType::Auto) | None => Variable::new(value, None, endian),
                Some(ty) => Variable::new(value.cast(ty, endian)?, Some(ty), endian),
            };
            self.scope.define(param.name.clone(), variable);
        }
        self.exec_block(&def.body)
    }
}
