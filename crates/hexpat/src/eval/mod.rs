// Tree-walking evaluator for the pattern language

mod attributes;
mod builtins;
pub mod data_source;
mod expr;
pub mod pattern;
mod read_type;
pub(crate) mod scope;
mod stmt;
pub mod value;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::parser::ast::{Endianness, FnDef, Program, Stmt, StmtKind};
use data_source::DataSource;
use pattern::PatternNode;
use scope::Scope;
use value::Value;

/// Control flow signal from statement execution
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ControlFlow {
    None,
    Break,
    Continue,
    Return(Option<Value>),
}

/// Counters collected during one evaluation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Statements, members, array elements and loop iterations executed
    pub steps: u64,
    /// Pattern nodes created, including children
    pub patterns: u64,
}

// Cancellation is polled at this step interval
const CANCEL_CHECK_INTERVAL: u64 = 1024;
// Shared step counter is published at this step interval
const SHARED_COUNT_INTERVAL: u64 = 64;

/// Evaluator that runs a parsed program against binary data
pub struct Evaluator<'a> {
    data: &'a dyn DataSource,
    program: &'a Program,
    /// Functions keyed by qualified name, collected before the pass
    functions: FxHashMap<&'a str, &'a FnDef>,
    pub(crate) scope: Scope,
    /// Byte-source cursor
    offset: u64,
    config: EvalConfig,
    /// Endianness inherited from the enclosing declaration
    current_endian: Option<Endianness>,
    depth: u32,
    steps: u64,
    pattern_count: u64,
    cancelled: Option<Arc<AtomicBool>>,
    shared_step_count: Option<Arc<AtomicU64>>,
    in_variables: FxHashMap<String, Value>,
    out_names: Vec<String>,
    /// Output of `std::print`
    console: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(program: &'a Program, data: &'a dyn DataSource, config: EvalConfig) -> Self {
        let mut functions = FxHashMap::default();
        collect_functions(&program.stmts, &mut functions);
        Self {
            data,
            program,
            functions,
            scope: Scope::new(),
            offset: 0,
            config,
            current_endian: None,
            depth: 0,
            steps: 0,
            pattern_count: 0,
            cancelled: None,
            shared_step_count: None,
            in_variables: FxHashMap::default(),
            out_names: Vec::new(),
            console: Vec::new(),
        }
    }

    /// Set a cancellation token. The pass stops once it reads `true`.
    pub fn set_cancellation_token(&mut self, token: Arc<AtomicBool>) {
        self.cancelled = Some(token);
    }

    /// Set a step counter that other threads can read during the pass
    pub fn set_shared_step_count(&mut self, counter: Arc<AtomicU64>) {
        self.shared_step_count = Some(counter);
    }

    /// Values for `in` variables
    pub fn set_in_variables(&mut self, values: impl IntoIterator<Item = (String, Value)>) {
        self.in_variables.extend(values);
    }

    /// Run the program's top-level statements and return the forest
    pub fn evaluate(&mut self) -> Result<Vec<PatternNode>, EvalError> {
        self.check_cancelled()?;
        let program = self.program;
        for stmt in &program.stmts {
            self.build_member(stmt)?;
        }
        self.publish_steps();
        let forest = self.scope.take_members();
        debug!(
            patterns = forest.len(),
            nodes = self.pattern_count,
            steps = self.steps,
            "evaluation finished"
        );
        Ok(forest)
    }

    pub fn stats(&self) -> EvalStats {
        EvalStats {
            steps: self.steps,
            patterns: self.pattern_count,
        }
    }

    /// Final values of the `out` variables, in declaration order
    pub fn out_variables(&self) -> Vec<(String, Value)> {
        let globals = &self.scope.global().variables;
        self.out_names
            .iter()
            .filter_map(|name| {
                globals
                    .get(name)
                    .map(|var| (name.clone(), var.value.clone()))
            })
            .collect()
    }

    /// Lines printed through `std::print`
    pub fn take_console(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console)
    }

    pub(crate) fn default_endian(&self) -> Endianness {
        self.config.default_endian
    }

    /// Endianness in effect for a declaration with the given qualifier
    pub(crate) fn endian_for(&self, declared: Option<Endianness>) -> Endianness {
        declared
            .or(self.current_endian)
            .unwrap_or(self.config.default_endian)
    }

    pub(crate) fn function(&self, name: &str) -> Option<&'a FnDef> {
        self.functions.get(name).copied()
    }

    /// Count one unit of work against the step budget
    pub(crate) fn tick(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps % SHARED_COUNT_INTERVAL == 0 {
            self.publish_steps();
        }
        if self.steps % CANCEL_CHECK_INTERVAL == 0 {
            self.check_cancelled()?;
        }
        if self.config.max_steps > 0 && self.steps > self.config.max_steps {
            return Err(EvalError::new(format!(
                "evaluation exceeded the step limit of {}",
                self.config.max_steps
            )));
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), EvalError> {
        match &self.cancelled {
            Some(token) if token.load(Ordering::Relaxed) => {
                Err(EvalError::new("evaluation cancelled"))
            }
            _ => Ok(()),
        }
    }

    fn publish_steps(&self) {
        if let Some(counter) = &self.shared_step_count {
            counter.store(self.steps, Ordering::Relaxed);
        }
    }

    /// Count a new pattern node against the pattern limit
    pub(crate) fn count_pattern(&mut self) -> Result<(), EvalError> {
        self.pattern_count += 1;
        if self.config.max_patterns > 0 && self.pattern_count > self.config.max_patterns {
            return Err(EvalError::new(format!(
                "pattern limit exceeded (max {})",
                self.config.max_patterns
            )));
        }
        Ok(())
    }

    /// Enter a type instantiation or function call
    pub(crate) fn enter(&mut self) -> Result<(), EvalError> {
        let max = self.config.max_recursion_depth;
        if max > 0 && self.depth >= max {
            return Err(EvalError::new(format!(
                "recursion depth exceeded (max {})",
                max
            )));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Run `f` with the cursor at `offset`, restoring it afterwards
    pub(crate) fn at_offset<T>(
        &mut self,
        offset: u64,
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        let saved = self.offset;
        self.offset = offset;
        let result = f(self);
        self.offset = saved;
        result
    }

    /// Check that `size` bytes starting at `offset` exist in the source
    pub(crate) fn check_range(&self, offset: u64, size: u64) -> Result<(), EvalError> {
        let len = self.data.size();
        match offset.checked_add(size) {
            Some(end) if end <= len => Ok(()),
            _ => Err(data_source::out_of_bounds(offset, size, len)),
        }
    }
}

/// Collect every function definition, including those nested in namespaces
fn collect_functions<'a>(stmts: &'a [Stmt], out: &mut FxHashMap<&'a str, &'a FnDef>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Function(def) => {
                out.insert(def.name.as_str(), def.as_ref());
            }
            StmtKind::Compound(inner) => collect_functions(inner, out),
            _ => {}
        }
    }
}
