// Token definitions for the pattern language

use crate::parser::ast::BuiltinType;
use crate::span::Span;

/// A single token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn line(&self) -> u32 {
        self.span.line
    }
}

/// All possible token types in the pattern language.
///
/// Tokens carrying data (literals, identifiers, value types) are matched by
/// the parser on their variant alone, so `Ident(String::new())` stands for
/// "any identifier".
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    IntLiteral(u128),
    FloatLiteral(f64),
    StringLiteral(String),
    CharLiteral(char),
    BoolLiteral(bool),

    // Identifier
    Ident(String),

    // Builtin type names: u8, s32, float, char, str, auto, ...
    ValueType(BuiltinType),

    // Keywords - declarations
    KwStruct,
    KwUnion,
    KwEnum,
    KwBitfield,
    KwFn,
    KwNamespace,
    KwUsing,
    KwPadding,

    // Keywords - control flow
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwBreak,
    KwContinue,
    KwReturn,

    // Keywords - placement direction
    KwIn,
    KwOut,

    // Keywords - endianness
    KwLe,
    KwBe,

    // Keywords - paths and pseudo-operators
    KwParent,
    KwThis,
    KwSizeof,
    KwAddressof,

    // Arithmetic operators
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %

    // Bitwise operators
    Ampersand, // &
    Pipe,      // |
    Caret,     // ^
    Tilde,     // ~
    LShift,    // <<
    RShift,    // >>

    // Logical operators
    AmpAmp,     // &&
    PipePipe,   // ||
    CaretCaret, // ^^
    Bang,       // !

    // Comparison operators
    EqEq,      // ==
    BangEq,    // !=
    Less,      // <
    Greater,   // >
    LessEq,    // <=
    GreaterEq, // >=

    // Assignment operators
    Eq,        // =
    PlusEq,    // +=
    MinusEq,   // -=
    StarEq,    // *=
    SlashEq,   // /=
    PercentEq, // %=
    AmpEq,     // &=
    PipeEq,    // |=
    CaretEq,   // ^=
    LShiftEq,  // <<=
    RShiftEq,  // >>=

    // Special symbols
    Dollar,     // $
    At,         // @
    ColonColon, // ::
    Dot,        // .
    Comma,      // ,
    Semicolon,  // ;
    Colon,      // :
    Question,   // ?

    // Brackets
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }

    // End of program
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::IntLiteral(v) => write!(f, "integer '{}'", v),
            TokenKind::FloatLiteral(v) => write!(f, "float '{}'", v),
            TokenKind::StringLiteral(v) => write!(f, "string \"{}\"", v),
            TokenKind::CharLiteral(v) => write!(f, "char '{}'", v),
            TokenKind::BoolLiteral(v) => write!(f, "'{}'", v),
            TokenKind::Ident(name) => write!(f, "'{}'", name),
            TokenKind::ValueType(ty) => write!(f, "'{}'", ty.name()),
            TokenKind::Eof => write!(f, "end of program"),
            other => match other.symbol() {
                Some(sym) => write!(f, "'{}'", sym),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

impl TokenKind {
    /// Source spelling of keywords, operators and separators
    pub fn symbol(&self) -> Option<&'static str> {
        let s = match self {
            TokenKind::KwStruct => "struct",
            TokenKind::KwUnion => "union",
            TokenKind::KwEnum => "enum",
            TokenKind::KwBitfield => "bitfield",
            TokenKind::KwFn => "fn",
            TokenKind::KwNamespace => "namespace",
            TokenKind::KwUsing => "using",
            TokenKind::KwPadding => "padding",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwWhile => "while",
            TokenKind::KwFor => "for",
            TokenKind::KwBreak => "break",
            TokenKind::KwContinue => "continue",
            TokenKind::KwReturn => "return",
            TokenKind::KwIn => "in",
            TokenKind::KwOut => "out",
            TokenKind::KwLe => "le",
            TokenKind::KwBe => "be",
            TokenKind::KwParent => "parent",
            TokenKind::KwThis => "this",
            TokenKind::KwSizeof => "sizeof",
            TokenKind::KwAddressof => "addressof",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Ampersand => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::LShift => "<<",
            TokenKind::RShift => ">>",
            TokenKind::AmpAmp => "&&",
            TokenKind::PipePipe => "||",
            TokenKind::CaretCaret => "^^",
            TokenKind::Bang => "!",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Less => "<",
            TokenKind::Greater => ">",
            TokenKind::LessEq => "<=",
            TokenKind::GreaterEq => ">=",
            TokenKind::Eq => "=",
            TokenKind::PlusEq => "+=",
            TokenKind::MinusEq => "-=",
            TokenKind::StarEq => "*=",
            TokenKind::SlashEq => "/=",
            TokenKind::PercentEq => "%=",
            TokenKind::AmpEq => "&=",
            TokenKind::PipeEq => "|=",
            TokenKind::CaretEq => "^=",
            TokenKind::LShiftEq => "<<=",
            TokenKind::RShiftEq => ">>=",
            TokenKind::Dollar => "$",
            TokenKind::At => "@",
            TokenKind::ColonColon => "::",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Question => "?",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            _ => return None,
        };
        Some(s)
    }

    /// Get the keyword for an identifier string, if any
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        match s {
            "struct" => Some(TokenKind::KwStruct),
            "union" => Some(TokenKind::KwUnion),
            "enum" => Some(TokenKind::KwEnum),
            "bitfield" => Some(TokenKind::KwBitfield),
            "fn" => Some(TokenKind::KwFn),
            "namespace" => Some(TokenKind::KwNamespace),
            "using" => Some(TokenKind::KwUsing),
            "padding" => Some(TokenKind::KwPadding),
            "if" => Some(TokenKind::KwIf),
            "else" => Some(TokenKind::KwElse),
            "while" => Some(TokenKind::KwWhile),
            "for" => Some(TokenKind::KwFor),
            "break" => Some(TokenKind::KwBreak),
            "continue" => Some(TokenKind::KwContinue),
            "return" => Some(TokenKind::KwReturn),
            "in" => Some(TokenKind::KwIn),
            "out" => Some(TokenKind::KwOut),
            "le" => Some(TokenKind::KwLe),
            "be" => Some(TokenKind::KwBe),
            "parent" => Some(TokenKind::KwParent),
            "this" => Some(TokenKind::KwThis),
            "sizeof" => Some(TokenKind::KwSizeof),
            "addressof" => Some(TokenKind::KwAddressof),
            "true" => Some(TokenKind::BoolLiteral(true)),
            "false" => Some(TokenKind::BoolLiteral(false)),
            _ => BuiltinType::from_name(s).map(TokenKind::ValueType),
        }
    }

    /// True for any literal token
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::IntLiteral(_)
                | TokenKind::FloatLiteral(_)
                | TokenKind::StringLiteral(_)
                | TokenKind::CharLiteral(_)
                | TokenKind::BoolLiteral(_)
        )
    }
}
