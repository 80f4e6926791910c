// Statement evaluation: members of compound types and function bodies
use super::*;

use tracing::trace;

use crate::parser::ast::{Attribute, BuiltinType, Expr, ExprKind, Placement, VarDecl};
use pattern::PatternKind;
use scope::Variable;

/// Name of the declaration a statement introduces, for error context
fn declared_name(stmt: &Stmt) -> &str {
    match &stmt.kind {
        StmtKind::Var(v) => &v.name,
        StmtKind::Array(a) => &a.name,
        StmtKind::Pointer(p) => &p.name,
        StmtKind::Padding(_) => "padding",
        _ => "",
    }
}

impl<'a> Evaluator<'a> {
    /// Build one member of the compound currently under construction
    /// (or a top-level declaration), adding its nodes to the current frame.
    pub(crate) fn build_member(&mut self, stmt: &Stmt) -> Result<(), EvalError> {
        self.tick()
            .and_then(|_| self.build_member_inner(stmt))
            .map_err(|e| {
                e.with_line_if_none(stmt.span.line)
                    .with_node_if_none(declared_name(stmt))
            })
    }

    fn build_member_inner(&mut self, stmt: &Stmt) -> Result<(), EvalError> {
        match &stmt.kind {
            StmtKind::Var(var) => self.build_var(var),
            StmtKind::Multi(vars) => {
                for var in vars {
                    self.build_var(var)?;
                }
                Ok(())
            }
            StmtKind::Array(decl) => {
                let node = self.place(&decl.placement, &decl.name, |this| this.build_array(decl))?;
                self.emit(node, false, &decl.attrs)
            }
            StmtKind::Pointer(decl) => {
                let node =
                    self.place(&decl.placement, &decl.name, |this| this.build_pointer(decl))?;
                self.emit(node, false, &decl.attrs)
            }
            StmtKind::Padding(size) => {
                let size = self.eval_expr(size)?.to_unsigned()?;
                let size = u64::try_from(size)
                    .map_err(|_| EvalError::new(format!("padding of {} bytes is too large", size)))?;
                let start = self.offset;
                self.check_range(start, size)?;
                let node = self.new_node("padding", "padding", start, size, PatternKind::Padding)?;
                self.offset = start + size;
                self.scope.push_member(node);
                Ok(())
            }
            StmtKind::If(branch) => {
                let body = if self.eval_expr(&branch.cond)?.to_bool()? {
                    &branch.then_body
                } else {
                    &branch.else_body
                };
                for member in body {
                    self.build_member(member)?;
                }
                Ok(())
            }
            StmtKind::Expr(expr) => self.exec_expr_stmt(expr),
            StmtKind::TypeDef(_) | StmtKind::Function(_) => Ok(()),
            _ => Err(EvalError::new(
                "statement is only allowed inside a function body",
            )),
        }
    }

    fn build_var(&mut self, var: &VarDecl) -> Result<(), EvalError> {
        if matches!(var.placement, Placement::In | Placement::Out) {
            return self.declare_host_variable(var);
        }
        let built = self.place(&var.placement, &var.name, |this| {
            this.build_type(&var.ty, &var.name)
        })?;
        self.emit(built.node, built.inline, &var.attrs)
    }

    /// Run a builder at the declaration's placement
    fn place<T>(
        &mut self,
        placement: &Placement,
        name: &str,
        build: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        match placement {
            Placement::Cursor => {
                trace!(name, offset = self.offset, "placing at cursor");
                build(self)
            }
            Placement::At(expr) => {
                let address = self.eval_expr(expr)?.to_unsigned()?;
                let address = u64::try_from(address).map_err(|_| {
                    EvalError::new(format!("placement address 0x{:X} is out of range", address))
                })?;
                trace!(name, offset = address, "placing at address");
                self.at_offset(address, build)
            }
            Placement::In | Placement::Out => Err(EvalError::new(
                "'in' and 'out' apply only to variables of builtin type",
            )),
        }
    }

    /// Apply declaration attributes, then add the node (or its children
    /// when inlined) to the current frame
    fn emit(
        &mut self,
        mut node: PatternNode,
        inline: bool,
        attrs: &[Attribute],
    ) -> Result<(), EvalError> {
        let inline = self.apply_attributes(&mut node, attrs)? | inline;
        if inline {
            self.scope.extend_members(node.children);
        } else {
            self.scope.push_member(node);
        }
        Ok(())
    }

    /// `T name in;` and `T name out;` become global variables
    fn declare_host_variable(&mut self, var: &VarDecl) -> Result<(), EvalError> {
        let ty = var
            .ty
            .as_builtin()
            .filter(|t| !matches!(t, BuiltinType::Auto))
            .ok_or_else(|| EvalError::new("'in' and 'out' apply only to variables of builtin type"))?;
        let value = match var.placement {
            Placement::In => match self.in_variables.get(&var.name) {
                Some(supplied) => supplied.cast(ty, Endianness::Little)?,
                None => Value::zero(ty),
            },
            _ => {
                self.out_names.push(var.name.clone());
                Value::zero(ty)
            }
        };
        trace!(name = %var.name, value = %value, "declared host variable");
        self.scope.global_mut().variables.insert(
            var.name.clone(),
            Variable::new(value, Some(ty), Endianness::Little),
        );
        Ok(())
    }

    /// Calls are run for their side effects; a missing return value is fine
    fn exec_expr_stmt(&mut self, expr: &Expr) -> Result<(), EvalError> {
        match &expr.kind {
            ExprKind::Call {
                name,
                namespace,
                args,
            } => self
                .call_function(name, namespace, args)
                .map(|_| ())
                .map_err(|e| e.with_line_if_none(expr.span.line)),
            _ => self.eval_expr(expr).map(|_| ()),
        }
    }

    // ========== Imperative pass ==========

    /// Execute statements in order, stopping at the first control-flow signal
    pub(crate) fn exec_block(&mut self, stmts: &[Stmt]) -> Result<ControlFlow, EvalError> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                ControlFlow::None => {}
                flow => return Ok(flow),
            }
        }
        Ok(ControlFlow::None)
    }

    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt) -> Result<ControlFlow, EvalError> {
        self.tick()
            .and_then(|_| self.exec_stmt_inner(stmt))
            .map_err(|e| e.with_line_if_none(stmt.span.line))
    }

    fn exec_stmt_inner(&mut self, stmt: &Stmt) -> Result<ControlFlow, EvalError> {
        match &stmt.kind {
            StmtKind::Var(var) => {
                self.declare_local(var)?;
            }
            StmtKind::Multi(vars) => {
                for var in vars {
                    self.declare_local(var)?;
                }
            }
            StmtKind::Assign(assign) => {
                let value = self.eval_expr(&assign.value)?;
                self.scope.assign(&assign.name, value)?;
            }
            StmtKind::If(branch) => {
                let body = if self.eval_expr(&branch.cond)?.to_bool()? {
                    &branch.then_body
                } else {
                    &branch.else_body
                };
                return self.exec_block(body);
            }
            StmtKind::While(data) => {
                loop {
                    self.tick()?;
                    if !self.eval_expr(&data.cond)?.to_bool()? {
                        break;
                    }
                    match self.exec_block(&data.body)? {
                        ControlFlow::Break => break,
                        ControlFlow::Return(value) => return Ok(ControlFlow::Return(value)),
                        ControlFlow::Continue | ControlFlow::None => {}
                    }
                    if let Some(post) = &data.post {
                        self.exec_stmt(post)?;
                    }
                }
            }
            StmtKind::Compound(stmts) => return self.exec_block(stmts),
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|e| self.eval_expr(e)).transpose()?;
                return Ok(ControlFlow::Return(value));
            }
            StmtKind::Break => return Ok(ControlFlow::Break),
            StmtKind::Continue => return Ok(ControlFlow::Continue),
            StmtKind::Expr(expr) => self.exec_expr_stmt(expr)?,
            StmtKind::Array(_) | StmtKind::Pointer(_) | StmtKind::Padding(_) => {
                return Err(EvalError::new(
                    "arrays, pointers and padding cannot be declared inside a function",
                ));
            }
            StmtKind::TypeDef(_) | StmtKind::Function(_) => {
                return Err(EvalError::new(
                    "types and functions cannot be defined inside a function",
                ));
            }
        }
        Ok(ControlFlow::None)
    }

    /// Function locals start at zero of their type; `auto` takes whatever
    /// is assigned first
    fn declare_local(&mut self, var: &VarDecl) -> Result<(), EvalError> {
        let ty = var.ty.as_builtin().ok_or_else(|| {
            EvalError::new(format!(
                "local variable '{}' must have a builtin type",
                var.name
            ))
        })?;
        let endian = var.ty.endian.unwrap_or_default();
        let variable = match ty {
            BuiltinType::Auto => Variable::new(Value::Unsigned(0), None, endian),
            ty => Variable::new(Value::zero(ty), Some(ty), endian),
        };
        self.scope.define(var.name.clone(), variable);
        Ok(())
    }
}
