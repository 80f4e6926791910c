// AST node definitions for the pattern language

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::span::Span;

/// A parsed program: top-level statements plus the frozen type registry
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub stmts: Vec<Stmt>,
    /// Declared types keyed by namespace-qualified name
    pub types: FxHashMap<String, TypeDecl>,
}

impl Program {
    /// Look up a registered type by its qualified name
    pub fn type_named(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }
}

/// A statement with source span
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Attributes attached to this statement, if it can carry any
    pub fn attrs_mut(&mut self) -> Option<&mut Vec<Attribute>> {
        match &mut self.kind {
            StmtKind::Var(d) => Some(&mut d.attrs),
            StmtKind::Array(d) => Some(&mut d.attrs),
            StmtKind::Pointer(d) => Some(&mut d.attrs),
            StmtKind::TypeDef(t) => Some(&mut t.attrs),
            _ => None,
        }
    }
}

/// Statements double as struct members. Inside a compound body they build
/// pattern nodes; inside a function body they execute.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `Type name;`, optionally placed
    Var(Box<VarDecl>),
    /// `Type name[size];`
    Array(Box<ArrayDecl>),
    /// `Type *name : sizeType;`
    Pointer(Box<PointerDecl>),
    /// `padding[size];`
    Padding(Expr),
    /// `Type a, b, c;`
    Multi(Vec<VarDecl>),
    /// struct / union / enum / bitfield / using definition
    TypeDef(Box<TypeDecl>),
    Function(Box<FnDef>),
    If(Box<IfData>),
    While(Box<WhileData>),
    /// Statement group without its own scope (e.g. desugared `for`)
    Compound(Vec<Stmt>),
    Assign(Box<AssignData>),
    Return(Option<Expr>),
    Break,
    Continue,
    /// Expression evaluated for its side effects (function call)
    Expr(Expr),
}

/// Where a declaration reads its data from
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// At the evaluator cursor, advancing it
    Cursor,
    /// `@ offset`
    At(Expr),
    /// `in`: value supplied by the host
    In,
    /// `out`: value reported back to the host
    Out,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeDecl,
    pub placement: Placement,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDecl {
    pub name: String,
    pub ty: TypeDecl,
    pub size: ArraySize,
    pub placement: Placement,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArraySize {
    /// `Type[N]`
    Fixed(Expr),
    /// `Type[while(cond)]`, checked before each element
    While(Expr),
    /// `Type[]`: up to and including the first all-zero element
    Unsized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointerDecl {
    pub name: String,
    pub target: TypeDecl,
    /// Unsigned builtin holding the address
    pub size_type: BuiltinType,
    pub size_endian: Option<Endianness>,
    pub placement: Placement,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    /// Namespace-qualified name
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Declared name, or its position ("0", "1", ...) when unnamed
    pub name: String,
    pub ty: TypeDecl,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfData {
    pub cond: Expr,
    pub then_body: Vec<Stmt>,
    pub else_body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileData {
    pub cond: Expr,
    pub body: Vec<Stmt>,
    /// Post-iteration assignment of a desugared `for`
    pub post: Option<Box<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignData {
    pub name: String,
    pub value: Expr,
}

// --- Types ---

/// A type as declared in the registry or instantiated at a use site.
/// Every use site owns its own clone.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    /// Qualified name; empty for anonymous builtin uses
    pub name: String,
    pub endian: Option<Endianness>,
    pub body: TypeBody,
    pub attrs: Vec<Attribute>,
    pub span: Span,
}

impl TypeDecl {
    pub fn builtin(ty: BuiltinType, endian: Option<Endianness>, span: Span) -> Self {
        Self {
            name: String::new(),
            endian,
            body: TypeBody::Builtin(ty),
            attrs: Vec::new(),
            span,
        }
    }

    /// The builtin type this declaration resolves to through aliases, if any
    pub fn as_builtin(&self) -> Option<BuiltinType> {
        match &self.body {
            TypeBody::Builtin(ty) => Some(*ty),
            TypeBody::Alias(inner) => inner.as_builtin(),
            _ => None,
        }
    }

    /// Display name: the declared name, or the builtin spelling
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match &self.body {
            TypeBody::Builtin(ty) => ty.name().to_string(),
            TypeBody::Alias(inner) => inner.display_name(),
            TypeBody::Forward(name) => name.clone(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeBody {
    Builtin(BuiltinType),
    Struct(StructDef),
    Union(Vec<Stmt>),
    Enum(EnumDef),
    Bitfield(Vec<BitfieldEntry>),
    /// `using Name = Type;`
    Alias(Box<TypeDecl>),
    /// Reference to a type whose definition was still open at the use site.
    /// Resolved through the program's registry at evaluation time.
    Forward(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    /// Inherited types, evaluated in order before own members
    pub inherits: Vec<TypeDecl>,
    pub members: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub underlying: BuiltinType,
    pub entries: Vec<EnumEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumEntry {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitfieldEntry {
    pub name: String,
    pub width: Expr,
    pub padding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    U8,
    U16,
    U24,
    U32,
    U48,
    U64,
    U96,
    U128,
    S8,
    S16,
    S24,
    S32,
    S48,
    S64,
    S96,
    S128,
    Float,
    Double,
    Char,
    Char16,
    Bool,
    Str,
    Auto,
}

impl BuiltinType {
    pub fn from_name(s: &str) -> Option<BuiltinType> {
        let ty = match s {
            "u8" => BuiltinType::U8,
            "u16" => BuiltinType::U16,
            "u24" => BuiltinType::U24,
            "u32" => BuiltinType::U32,
            "u48" => BuiltinType::U48,
            "u64" => BuiltinType::U64,
            "u96" => BuiltinType::U96,
            "u128" => BuiltinType::U128,
            "s8" => BuiltinType::S8,
            "s16" => BuiltinType::S16,
            "s24" => BuiltinType::S24,
            "s32" => BuiltinType::S32,
            "s48" => BuiltinType::S48,
            "s64" => BuiltinType::S64,
            "s96" => BuiltinType::S96,
            "s128" => BuiltinType::S128,
            "float" => BuiltinType::Float,
            "double" => BuiltinType::Double,
            "char" => BuiltinType::Char,
            "char16" => BuiltinType::Char16,
            "bool" => BuiltinType::Bool,
            "str" => BuiltinType::Str,
            "auto" => BuiltinType::Auto,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinType::U8 => "u8",
            BuiltinType::U16 => "u16",
            BuiltinType::U24 => "u24",
            BuiltinType::U32 => "u32",
            BuiltinType::U48 => "u48",
            BuiltinType::U64 => "u64",
            BuiltinType::U96 => "u96",
            BuiltinType::U128 => "u128",
            BuiltinType::S8 => "s8",
            BuiltinType::S16 => "s16",
            BuiltinType::S24 => "s24",
            BuiltinType::S32 => "s32",
            BuiltinType::S48 => "s48",
            BuiltinType::S64 => "s64",
            BuiltinType::S96 => "s96",
            BuiltinType::S128 => "s128",
            BuiltinType::Float => "float",
            BuiltinType::Double => "double",
            BuiltinType::Char => "char",
            BuiltinType::Char16 => "char16",
            BuiltinType::Bool => "bool",
            BuiltinType::Str => "str",
            BuiltinType::Auto => "auto",
        }
    }

    /// Size in bytes; `None` for `str` and `auto`
    pub fn size(&self) -> Option<u64> {
        match self {
            BuiltinType::U8 | BuiltinType::S8 | BuiltinType::Char | BuiltinType::Bool => Some(1),
            BuiltinType::U16 | BuiltinType::S16 | BuiltinType::Char16 => Some(2),
            BuiltinType::U24 | BuiltinType::S24 => Some(3),
            BuiltinType::U32 | BuiltinType::S32 | BuiltinType::Float => Some(4),
            BuiltinType::U48 | BuiltinType::S48 => Some(6),
            BuiltinType::U64 | BuiltinType::S64 | BuiltinType::Double => Some(8),
            BuiltinType::U96 | BuiltinType::S96 => Some(12),
            BuiltinType::U128 | BuiltinType::S128 => Some(16),
            BuiltinType::Str | BuiltinType::Auto => None,
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            BuiltinType::U8
                | BuiltinType::U16
                | BuiltinType::U24
                | BuiltinType::U32
                | BuiltinType::U48
                | BuiltinType::U64
                | BuiltinType::U96
                | BuiltinType::U128
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            BuiltinType::S8
                | BuiltinType::S16
                | BuiltinType::S24
                | BuiltinType::S32
                | BuiltinType::S48
                | BuiltinType::S64
                | BuiltinType::S96
                | BuiltinType::S128
        )
    }

    pub fn is_integer(&self) -> bool {
        self.is_unsigned() || self.is_signed()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, BuiltinType::Float | BuiltinType::Double)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// `[[name]]` or `[[name("value")]]`
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
    pub span: Span,
}

// --- Expressions ---

/// An expression with source span
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// `a.b[i].c`, `parent.x`, `this`
    Path(Vec<PathSegment>),
    /// `$`
    Cursor,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `[le|be] builtin(expr)`
    Cast {
        ty: BuiltinType,
        endian: Option<Endianness>,
        expr: Box<Expr>,
    },
    /// `Type::member`
    ScopeResolution { ty: Box<TypeDecl>, member: String },
    /// `ns::name(args)`; `namespace` is the enclosing namespace at the call site
    Call {
        name: String,
        namespace: String,
        args: Vec<Expr>,
    },
    AddressOf(Vec<PathSegment>),
    SizeOf(SizeOfTarget),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(u128),
    Float(f64),
    Bool(bool),
    Char(char),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Name(String),
    Parent,
    This,
    Index(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizeOfTarget {
    Path(Vec<PathSegment>),
    Type(BuiltinType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    LogAnd,
    LogOr,
    LogXor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
            BinOp::LogXor => "^^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}
