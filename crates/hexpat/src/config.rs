// Evaluation limits and defaults

use serde::{Deserialize, Serialize};

use crate::parser::ast::Endianness;

pub const DEFAULT_MAX_STEPS: u64 = 10_000_000;
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 256;
pub const DEFAULT_MAX_ARRAY_LENGTH: u64 = 0x10000;
pub const DEFAULT_MAX_PATTERNS: u64 = 0x40000;

/// Resource budget and document defaults for one evaluation pass.
/// A limit of 0 disables that limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Statements, members, array elements and loop iterations per pass
    pub max_steps: u64,
    /// Nested type instantiations plus function calls
    pub max_recursion_depth: u32,
    /// Elements in a single array
    pub max_array_length: u64,
    /// Pattern nodes created in a pass
    pub max_patterns: u64,
    /// Endianness for declarations without `le`/`be`
    pub default_endian: Endianness,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
            max_patterns: DEFAULT_MAX_PATTERNS,
            default_endian: Endianness::Little,
        }
    }
}
