// Scope stack for the evaluator: compound, function and global frames

use rustc_hash::FxHashMap;

use crate::error::EvalError;
use crate::parser::ast::{BuiltinType, Endianness};

use super::pattern::{PatternKind, PatternNode};
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Global,
    /// A struct, union or bitfield under construction
    Compound,
    Function,
}

/// A declared variable
#[derive(Debug, Clone)]
pub(crate) struct Variable {
    pub value: Value,
    /// Declared builtin type; `None` for `auto` and non-builtin parameters
    pub ty: Option<BuiltinType>,
    pub endian: Endianness,
}

impl Variable {
    pub fn new(value: Value, ty: Option<BuiltinType>, endian: Endianness) -> Self {
        Self { value, ty, endian }
    }
}

#[derive(Debug)]
pub(crate) struct Frame {
    pub kind: FrameKind,
    /// Pattern nodes built so far in this frame
    pub members: Vec<PatternNode>,
    pub variables: FxHashMap<String, Variable>,
    /// Cursor when the frame was entered
    pub start: u64,
    pub type_name: String,
}

impl Frame {
    fn new(kind: FrameKind, start: u64, type_name: String) -> Self {
        Self {
            kind,
            members: Vec::new(),
            variables: FxHashMap::default(),
            start,
            type_name,
        }
    }

    /// Most recently built member with this name
    fn member(&self, name: &str) -> Option<&PatternNode> {
        self.members.iter().rev().find(|m| m.name == name)
    }

    /// The frame as a struct node ending at `cursor`
    fn to_node(&self, name: &str, cursor: u64) -> PatternNode {
        let mut node = PatternNode::new(
            name,
            self.type_name.clone(),
            self.start,
            cursor.saturating_sub(self.start),
            PatternKind::Struct,
        );
        node.children = self.members.clone();
        node
    }
}

/// A path segment with its index already evaluated
#[derive(Debug, Clone)]
pub(crate) enum Segment<'p> {
    Name(&'p str),
    Parent,
    This,
    Index(u128),
}

/// What a path resolved to
#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    Value(Value),
    Node(PatternNode),
}

/// Position reached while walking a path
enum Step<'s> {
    Frame(&'s Frame, &'static str),
    Node(&'s PatternNode),
    Value(&'s Value),
    Char(char),
}

/// Stack of frames. The global frame sits at index 0 and is never popped.
#[derive(Debug)]
pub(crate) struct Scope {
    frames: Vec<Frame>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new(FrameKind::Global, 0, String::new())],
        }
    }

    pub fn push(&mut self, kind: FrameKind, start: u64, type_name: impl Into<String>) {
        self.frames.push(Frame::new(kind, start, type_name.into()));
    }

    /// Pop the innermost frame, handing back what it built
    pub fn pop(&mut self) -> Frame {
        if self.frames.len() > 1 {
            if let Some(frame) = self.frames.pop() {
                return frame;
            }
        }
        Frame::new(FrameKind::Global, 0, String::new())
    }

    fn current_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn global(&self) -> &Frame {
        &self.frames[0]
    }

    pub fn global_mut(&mut self) -> &mut Frame {
        &mut self.frames[0]
    }

    pub fn push_member(&mut self, node: PatternNode) {
        self.current_mut().members.push(node);
    }

    pub fn extend_members(&mut self, nodes: impl IntoIterator<Item = PatternNode>) {
        self.current_mut().members.extend(nodes);
    }

    /// Take the members built so far in the innermost frame
    pub fn take_members(&mut self) -> Vec<PatternNode> {
        std::mem::take(&mut self.current_mut().members)
    }

    pub fn define(&mut self, name: impl Into<String>, variable: Variable) {
        self.current_mut().variables.insert(name.into(), variable);
    }

    /// Frame indices visible from the innermost frame: outward up to and
    /// including the nearest function frame, then the global frame.
    fn visible(&self) -> impl Iterator<Item = usize> + '_ {
        let boundary = self
            .frames
            .iter()
            .rposition(|f| f.kind == FrameKind::Function)
            .unwrap_or(0);
        let global = (boundary > 0).then_some(0);
        (boundary..self.frames.len()).rev().chain(global)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.visible()
            .find_map(|i| self.frames[i].variables.get(name))
    }

    /// Assign to an existing variable, converting to its declared type
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        let index = self
            .visible()
            .find(|&i| self.frames[i].variables.contains_key(name))
            .ok_or_else(|| {
                EvalError::new(format!("cannot assign to undeclared variable '{}'", name))
            })?;
        let Some(variable) = self.frames[index].variables.get_mut(name) else {
            return Err(EvalError::new(format!("no variable named '{}' found", name)));
        };
        variable.value = match variable.ty {
            Some(ty) => value.cast(ty, variable.endian)?,
            None => value,
        };
        Ok(())
    }

    /// The `levels`-th compound frame counting outward from the innermost
    fn compound(&self, levels: usize) -> Result<&Frame, EvalError> {
        self.frames
            .iter()
            .rev()
            .filter(|f| f.kind == FrameKind::Compound)
            .nth(levels)
            .ok_or_else(|| {
                if levels == 0 {
                    EvalError::new("'this' used outside of a compound type")
                } else {
                    EvalError::new("no parent available")
                }
            })
    }

    /// Walk a path through variables, built members and the compound frames
    pub fn resolve(&self, segments: &[Segment<'_>], cursor: u64) -> Result<Resolved, EvalError> {
        let Some(first) = segments.first() else {
            return Err(EvalError::new("empty path"));
        };

        let mut rest = &segments[1..];
        let mut step = match first {
            Segment::This => Step::Frame(self.compound(0)?, "this"),
            Segment::Parent => {
                let mut levels = 1;
                while let Some(Segment::Parent) = rest.first() {
                    levels += 1;
                    rest = &rest[1..];
                }
                Step::Frame(self.compound(levels)?, "parent")
            }
            Segment::Name(name) => self.lookup(name)?,
            Segment::Index(_) => return Err(EvalError::new("path cannot start with an index")),
        };

        for segment in rest {
            step = descend(step, segment)?;
        }

        Ok(match step {
            Step::Frame(frame, name) => Resolved::Node(frame.to_node(name, cursor)),
            Step::Node(node) => Resolved::Node(node.clone()),
            Step::Value(value) => Resolved::Value(value.clone()),
            Step::Char(c) => Resolved::Value(Value::Char(c)),
        })
    }

    fn lookup(&self, name: &str) -> Result<Step<'_>, EvalError> {
        for i in self.visible() {
            let frame = &self.frames[i];
            if let Some(var) = frame.variables.get(name) {
                return Ok(Step::Value(&var.value));
            }
            if let Some(node) = frame.member(name) {
                return Ok(Step::Node(node));
            }
        }
        Err(EvalError::new(format!("no variable named '{}' found", name)))
    }
}

fn descend<'s>(step: Step<'s>, segment: &Segment<'_>) -> Result<Step<'s>, EvalError> {
    // Member access through a pointer reaches into its target
    let step = match step {
        Step::Node(PatternNode {
            kind: PatternKind::Pointer { pointee: target },
            ..
        }) => Step::Node(&**target),
        Step::Value(Value::Pattern(node)) => Step::Node(&**node),
        other => other,
    };

    match (step, segment) {
        (Step::Frame(frame, _), Segment::Name(name)) => frame
            .member(name)
            .map(Step::Node)
            .ok_or_else(|| no_member(name, &frame.type_name)),
        (Step::Node(node), Segment::Name(name)) if node.is_compound() => node
            .child(name)
            .map(Step::Node)
            .ok_or_else(|| no_member(name, &node.type_name)),
        (Step::Node(node), Segment::Index(i)) if node.kind == PatternKind::Array => {
            usize::try_from(*i)
                .ok()
                .and_then(|i| node.children.get(i))
                .map(Step::Node)
                .ok_or_else(|| {
                    EvalError::new(format!(
                        "array index {} out of bounds (size {})",
                        i,
                        node.children.len()
                    ))
                })
        }
        (Step::Value(Value::String(s)), Segment::Index(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(Step::Char)
            .ok_or_else(|| {
                EvalError::new(format!(
                    "string index {} out of bounds (length {})",
                    i,
                    s.chars().count()
                ))
            }),
        (_, Segment::Name(name)) => Err(EvalError::new(format!(
            "cannot access member '{}' of a non-compound value",
            name
        ))),
        (_, Segment::Index(_)) => Err(EvalError::new("cannot index a non-array value")),
        (_, Segment::Parent | Segment::This) => Err(EvalError::new(
            "'parent' and 'this' may only start a path",
        )),
    }
}

fn no_member(name: &str, type_name: &str) -> EvalError {
    EvalError::new(format!("no member named '{}' in '{}'", name, type_name))
}
