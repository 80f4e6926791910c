// Binary layout pattern language: lexer, parser and evaluator

pub mod config;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod span;

// Re-export key types for public API
pub use config::EvalConfig;
pub use error::{Error, EvalError, LexError, ParseError};
pub use eval::data_source::{DataSource, SliceDataSource};
pub use eval::pattern::{PatternKind, PatternNode};
pub use eval::value::Value;
pub use eval::{EvalStats, Evaluator};
pub use parser::ast::{Endianness, Program};

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use lexer::Lexer;
use parser::Parser;

/// Per-pass inputs that are not part of the engine configuration
#[derive(Clone, Default)]
pub struct EvalOptions {
    /// Values for `in` variables, by name
    pub in_variables: Vec<(String, Value)>,
    /// Evaluation stops with an error once this reads `true`
    pub cancellation_token: Option<Arc<AtomicBool>>,
    /// Step counter readable from other threads during the pass
    pub shared_step_count: Option<Arc<AtomicU64>>,
}

/// Everything one evaluation pass produces
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub patterns: Vec<PatternNode>,
    /// Final values of `out` variables, in declaration order
    pub out_variables: Vec<(String, Value)>,
    /// Lines printed through `std::print`
    pub console: Vec<String>,
    pub stats: EvalStats,
}

/// Main entry point for the pattern language engine.
/// Provides parse, evaluate, and run methods.
#[derive(Debug, Clone, Default)]
pub struct PatternEngine {
    config: EvalConfig,
}

impl PatternEngine {
    /// Create an engine with the default limits
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Lex and parse source code into a program
    pub fn parse(&self, source: &str) -> Result<Program, Error> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Parser::new(tokens).parse()?)
    }

    /// Evaluate a parsed program against binary data
    pub fn evaluate(
        &self,
        program: &Program,
        data: &dyn DataSource,
    ) -> Result<Vec<PatternNode>, EvalError> {
        Evaluator::new(program, data, self.config.clone()).evaluate()
    }

    /// Parse and evaluate in one step
    pub fn run(&self, source: &str, data: &dyn DataSource) -> Result<Vec<PatternNode>, Error> {
        let program = self.parse(source)?;
        Ok(self.evaluate(&program, data)?)
    }

    /// Parse and evaluate with host inputs. Returns the forest together
    /// with `out` variables, console output and statistics.
    pub fn run_with_options(
        &self,
        source: &str,
        data: &dyn DataSource,
        options: EvalOptions,
    ) -> Result<Evaluation, Error> {
        let program = self.parse(source)?;
        Ok(self.evaluate_with_options(&program, data, options)?)
    }

    /// Evaluate an already parsed program with host inputs
    pub fn evaluate_with_options(
        &self,
        program: &Program,
        data: &dyn DataSource,
        options: EvalOptions,
    ) -> Result<Evaluation, EvalError> {
        let mut evaluator = Evaluator::new(program, data, self.config.clone());
        evaluator.set_in_variables(options.in_variables);
        if let Some(token) = options.cancellation_token {
            evaluator.set_cancellation_token(token);
        }
        if let Some(counter) = options.shared_step_count {
            evaluator.set_shared_step_count(counter);
        }

        let patterns = evaluator.evaluate()?;
        Ok(Evaluation {
            patterns,
            out_variables: evaluator.out_variables(),
            console: evaluator.take_console(),
            stats: evaluator.stats(),
        })
    }

    /// Display string for a node produced by `program`, running its
    /// `format`/`transform` functions if it has any
    pub fn format_value(
        &self,
        program: &Program,
        node: &PatternNode,
        data: &dyn DataSource,
    ) -> Result<String, EvalError> {
        Evaluator::new(program, data, self.config.clone()).format_node(node)
    }

    /// Value of a node produced by `program` after its `transform` function
    pub fn transform_value(
        &self,
        program: &Program,
        node: &PatternNode,
        data: &dyn DataSource,
    ) -> Result<Value, EvalError> {
        Evaluator::new(program, data, self.config.clone()).transform_node(node)
    }
}
