// Hand-written lexer for the pattern language

pub mod token;

use crate::error::LexError;
use crate::span::{LineCounter, Span};
use token::{Token, TokenKind};

/// Lexer that converts source text into tokens.
/// Stops at the first malformed token.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    lines: LineCounter<'a>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            lines: LineCounter::new(source),
        }
    }

    /// Tokenize the entire source. The result always ends with `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.bytes.len() {
                let span = self.span_from(self.pos);
                tokens.push(Token::new(TokenKind::Eof, span));
                break;
            }
            let token = self.next_token()?;
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn span_from(&mut self, start: usize) -> Span {
        let line = self.lines.line_at(start);
        Span::new(start as u32, self.pos as u32, line)
    }

    fn error_at(&mut self, start: usize, message: impl Into<String>) -> LexError {
        LexError::new(message, self.lines.line_at(start))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.bytes.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                self.pos += 1;
            }

            // Line comment
            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'/') {
                while self.peek().is_some_and(|b| b != b'\n') {
                    self.pos += 1;
                }
                continue;
            }

            // Block comment, nesting allowed
            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'*') {
                let start = self.pos;
                self.pos += 2;
                let mut depth = 1;
                while self.pos + 1 < self.bytes.len() && depth > 0 {
                    if self.bytes[self.pos] == b'/' && self.bytes[self.pos + 1] == b'*' {
                        depth += 1;
                        self.pos += 2;
                    } else if self.bytes[self.pos] == b'*' && self.bytes[self.pos + 1] == b'/' {
                        depth -= 1;
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                }
                if depth > 0 {
                    return Err(self.error_at(start, "unterminated block comment"));
                }
                continue;
            }

            return Ok(());
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let b = self.bytes[self.pos];

        if b.is_ascii_digit() {
            return self.lex_number(start);
        }
        if b == b'"' {
            return self.lex_string(start);
        }
        if b == b'\'' {
            return self.lex_char(start);
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            return Ok(self.lex_ident(start));
        }

        match self.lex_operator(start) {
            Some(token) => Ok(token),
            None => {
                let ch = self.source[start..].chars().next().unwrap_or('?');
                Err(self.error_at(start, format!("unexpected character '{}'", ch)))
            }
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, LexError> {
        if self.bytes[self.pos] == b'0' {
            match self.peek_at(1) {
                Some(b'x' | b'X') => {
                    return self.lex_radix_number(start, 16, |b| b.is_ascii_hexdigit(), "hex")
                }
                Some(b'o' | b'O') => {
                    return self.lex_radix_number(start, 8, |b| (b'0'..=b'7').contains(&b), "octal")
                }
                // 0b only introduces a binary literal when a binary digit follows
                Some(b'b' | b'B') if matches!(self.peek_at(2), Some(b'0' | b'1')) => {
                    return self.lex_radix_number(start, 2, |b| b == b'0' || b == b'1', "binary")
                }
                _ => {}
            }
        }
        self.lex_decimal_number(start)
    }

    /// Consume digits accepted by `is_digit`, allowing `_` and C++-style `'` separators
    fn consume_digits(&mut self, is_digit: fn(u8) -> bool) {
        while let Some(b) = self.peek() {
            if is_digit(b) || b == b'_' {
                self.pos += 1;
            } else if b == b'\'' && self.peek_at(1).is_some_and(is_digit) {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn clean_digits(&self, from: usize, to: usize) -> String {
        self.source[from..to]
            .chars()
            .filter(|&c| c != '_' && c != '\'')
            .collect()
    }

    /// `start` is the position of '0'; the two-byte prefix has not been skipped yet
    fn lex_radix_number(
        &mut self,
        start: usize,
        radix: u32,
        is_digit: fn(u8) -> bool,
        prefix_name: &str,
    ) -> Result<Token, LexError> {
        self.pos += 2;
        let digit_start = self.pos;
        self.consume_digits(is_digit);
        let digits = self.clean_digits(digit_start, self.pos);
        if digits.is_empty() {
            let prefix = &self.source[start..digit_start];
            let message = format!("expected {} digits after '{}'", prefix_name, prefix);
            return Err(self.error_at(start, message));
        }
        // Optional unsigned suffix
        let _ = self.eat(b'U') || self.eat(b'u');
        match u128::from_str_radix(&digits, radix) {
            Ok(val) => Ok(Token::new(TokenKind::IntLiteral(val), self.span_from(start))),
            Err(_) => Err(self.error_at(start, format!("{} literal overflow", prefix_name))),
        }
    }

    fn lex_decimal_number(&mut self, start: usize) -> Result<Token, LexError> {
        self.consume_digits(|b| b.is_ascii_digit());

        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            self.consume_digits(|b| b.is_ascii_digit());
        }

        // Exponent part
        if matches!(self.peek(), Some(b'e' | b'E'))
            && self
                .peek_at(1)
                .is_some_and(|b| b.is_ascii_digit() || b == b'+' || b == b'-')
        {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let text_end = self.pos;
        if matches!(self.peek(), Some(b'F' | b'f' | b'D' | b'd')) {
            is_float = true;
            self.pos += 1;
        } else if !is_float {
            let _ = self.eat(b'U') || self.eat(b'u');
        }

        let text = self.clean_digits(start, text_end);
        if is_float {
            match text.parse::<f64>() {
                Ok(val) => Ok(Token::new(TokenKind::FloatLiteral(val), self.span_from(start))),
                Err(_) => Err(self.error_at(start, "invalid float literal")),
            }
        } else {
            match text.parse::<u128>() {
                Ok(val) => Ok(Token::new(TokenKind::IntLiteral(val), self.span_from(start))),
                Err(_) => Err(self.error_at(start, "integer literal overflow")),
            }
        }
    }

    /// Decode the escape sequence whose backslash has already been consumed
    fn lex_escape_char(&mut self, start: usize) -> Result<char, LexError> {
        let Some(b) = self.advance() else {
            return Err(self.error_at(start, "unterminated escape sequence"));
        };
        let ch = match b {
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'\\' => '\\',
            b'"' => '"',
            b'\'' => '\'',
            b'0' => '\0',
            b'a' => '\x07',
            b'b' => '\x08',
            b'f' => '\x0C',
            b'v' => '\x0B',
            b'x' => {
                let hex_start = self.pos;
                while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) && self.pos - hex_start < 2 {
                    self.pos += 1;
                }
                match u8::from_str_radix(&self.source[hex_start..self.pos], 16) {
                    Ok(val) => val as char,
                    Err(_) => return Err(self.error_at(start, "invalid hex escape")),
                }
            }
            other => {
                let message = format!("unknown escape sequence '\\{}'", other as char);
                return Err(self.error_at(start, message));
            }
        };
        Ok(ch)
    }

    fn lex_string(&mut self, start: usize) -> Result<Token, LexError> {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error_at(start, "unterminated string literal")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let ch = self.lex_escape_char(start)?;
                    value.push(ch);
                }
                Some(_) => {
                    let ch = self.source[self.pos..].chars().next().unwrap_or('\u{FFFD}');
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        Ok(Token::new(TokenKind::StringLiteral(value), self.span_from(start)))
    }

    fn lex_char(&mut self, start: usize) -> Result<Token, LexError> {
        self.pos += 1; // opening quote
        let ch = match self.peek() {
            None => return Err(self.error_at(start, "unterminated character literal")),
            Some(b'\'') => return Err(self.error_at(start, "empty character literal")),
            Some(b'\\') => {
                self.pos += 1;
                self.lex_escape_char(start)?
            }
            Some(_) => {
                let ch = self.source[self.pos..].chars().next().unwrap_or('\u{FFFD}');
                self.pos += ch.len_utf8();
                ch
            }
        };
        if !self.eat(b'\'') {
            return Err(self.error_at(start, "unterminated character literal"));
        }
        Ok(Token::new(TokenKind::CharLiteral(ch), self.span_from(start)))
    }

    fn lex_ident(&mut self, start: usize) -> Token {
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];
        let kind =
            TokenKind::keyword_from_str(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        Token::new(kind, self.span_from(start))
    }

    /// Operator with an optional `=` suffix, e.g. `+` / `+=`
    fn with_assign(&mut self, plain: TokenKind, assign: TokenKind) -> TokenKind {
        if self.eat(b'=') {
            assign
        } else {
            plain
        }
    }

    fn lex_operator(&mut self, start: usize) -> Option<Token> {
        let b = self.advance()?;
        let kind = match b {
            b'+' => self.with_assign(TokenKind::Plus, TokenKind::PlusEq),
            b'-' => self.with_assign(TokenKind::Minus, TokenKind::MinusEq),
            b'*' => self.with_assign(TokenKind::Star, TokenKind::StarEq),
            b'/' => self.with_assign(TokenKind::Slash, TokenKind::SlashEq),
            b'%' => self.with_assign(TokenKind::Percent, TokenKind::PercentEq),
            b'&' => {
                if self.eat(b'&') {
                    TokenKind::AmpAmp
                } else {
                    self.with_assign(TokenKind::Ampersand, TokenKind::AmpEq)
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    TokenKind::PipePipe
                } else {
                    self.with_assign(TokenKind::Pipe, TokenKind::PipeEq)
                }
            }
            b'^' => {
                if self.eat(b'^') {
                    TokenKind::CaretCaret
                } else {
                    self.with_assign(TokenKind::Caret, TokenKind::CaretEq)
                }
            }
            b'~' => TokenKind::Tilde,
            b'<' => {
                if self.eat(b'<') {
                    self.with_assign(TokenKind::LShift, TokenKind::LShiftEq)
                } else {
                    self.with_assign(TokenKind::Less, TokenKind::LessEq)
                }
            }
            b'>' => {
                if self.eat(b'>') {
                    self.with_assign(TokenKind::RShift, TokenKind::RShiftEq)
                } else {
                    self.with_assign(TokenKind::Greater, TokenKind::GreaterEq)
                }
            }
            b'=' => self.with_assign(TokenKind::Eq, TokenKind::EqEq),
            b'!' => self.with_assign(TokenKind::Bang, TokenKind::BangEq),
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'$' => TokenKind::Dollar,
            b'@' => TokenKind::At,
            b':' => {
                if self.eat(b':') {
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            b'.' => TokenKind::Dot,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b'?' => TokenKind::Question,
            _ => {
                self.pos = start;
                return None;
            }
        };
        Some(Token::new(kind, self.span_from(start)))
    }
}
