//! Lexer (tokeniser) for program text.

use std::fmt;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Pow};

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Delimiters
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    LParen,   // (
    RParen,   // )

    // Punctuation
    Comma,    // ,
    Eq,       // =
    Pipe,     // |
    Dot,      // .
    Colon,    // :
    FatArrow, // =>

    // Operators
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    PlusPlus, // ++
    At,       // @
    EqEq,     // ==
    NotEq,    // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    AndAnd,   // &&
    OrOr,     // ||
    Bang,     // !

    // Keywords
    Let,
    Rec,
    In,
    Fun,
    If,
    Then,
    Else,
    True,
    False,
    Null,

    // Literals
    Ident(String),
    Num(BigRational),
    Str(String),
    EnumTag(String),

    // Special
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::Comma => "`,`",
            TokenKind::Eq => "`=`",
            TokenKind::Pipe => "`|`",
            TokenKind::Dot => "`.`",
            TokenKind::Colon => "`:`",
            TokenKind::FatArrow => "`=>`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::PlusPlus => "`++`",
            TokenKind::At => "`@`",
            TokenKind::EqEq => "`==`",
            TokenKind::NotEq => "`!=`",
            TokenKind::Lt => "`<`",
            TokenKind::Le => "`<=`",
            TokenKind::Gt => "`>`",
            TokenKind::Ge => "`>=`",
            TokenKind::AndAnd => "`&&`",
            TokenKind::OrOr => "`||`",
            TokenKind::Bang => "`!`",
            TokenKind::Let => "`let`",
            TokenKind::Rec => "`rec`",
            TokenKind::In => "`in`",
            TokenKind::Fun => "`fun`",
            TokenKind::If => "`if`",
            TokenKind::Then => "`then`",
            TokenKind::Else => "`else`",
            TokenKind::True => "`true`",
            TokenKind::False => "`false`",
            TokenKind::Null => "`null`",
            TokenKind::Ident(name) => return write!(f, "identifier `{}`", name),
            TokenKind::Num(n) => return write!(f, "number `{}`", n),
            TokenKind::Str(_) => "string literal",
            TokenKind::EnumTag(tag) => return write!(f, "enum tag `'{}`", tag),
            TokenKind::Eof => "end of input",
        };
        f.write_str(text)
    }
}

/// A token and its byte range.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// What was read
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

/// Lexer error with the offending byte range.
#[derive(Debug, Clone, PartialEq)]
pub struct LexerError {
    /// What went wrong
    pub message: String,
    /// Byte offset of the error
    pub start: usize,
    /// Byte offset one past the error
    pub end: usize,
}

/// Converts program text into tokens.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `source`.
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    /// Read every token, ending with [`TokenKind::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Read the next token.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace_and_comments();
        let start = self.pos;

        let Some(c) = self.advance() else {
            return Ok(self.token(TokenKind::Eof, start));
        };

        let kind = match c {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '@' => TokenKind::At,
            '-' => TokenKind::Minus,
            '+' if self.eat('+') => TokenKind::PlusPlus,
            '+' => TokenKind::Plus,
            '=' if self.eat('>') => TokenKind::FatArrow,
            '=' if self.eat('=') => TokenKind::EqEq,
            '=' => TokenKind::Eq,
            '!' if self.eat('=') => TokenKind::NotEq,
            '!' => TokenKind::Bang,
            '<' if self.eat('=') => TokenKind::Le,
            '<' => TokenKind::Lt,
            '>' if self.eat('=') => TokenKind::Ge,
            '>' => TokenKind::Gt,
            '&' if self.eat('&') => TokenKind::AndAnd,
            '|' if self.eat('|') => TokenKind::OrOr,
            '|' => TokenKind::Pipe,
            '"' => TokenKind::Str(self.read_string_content(start)?),
            '\'' => self.read_enum_tag(start)?,
            c if c.is_ascii_digit() => self.read_number(start)?,
            c if is_ident_start(c) => self.read_ident(start),
            other => {
                return Err(self.error(format!("unexpected character `{}`", other), start));
            }
        };

        Ok(self.token(kind, start))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Character Helpers
    // ═══════════════════════════════════════════════════════════════════

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.source[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            start,
            end: self.pos,
        }
    }

    fn error(&self, message: String, start: usize) -> LexerError {
        LexerError {
            message,
            start,
            end: self.pos.max(start + 1).min(self.source.len().max(start)),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else if c == '#' {
                while let Some(c) = self.advance() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Literals
    // ═══════════════════════════════════════════════════════════════════

    fn read_string_content(&mut self, start: usize) -> Result<String, LexerError> {
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string literal".to_string(), start)),
                Some('"') => return Ok(out),
                Some('\\') => {
                    let escape_start = self.pos - 1;
                    match self.advance() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('r') => out.push('\r'),
                        Some('"') => out.push('"'),
                        Some('\\') => out.push('\\'),
                        Some('%') => out.push('%'),
                        Some(other) => {
                            return Err(self.error(
                                format!("invalid escape sequence `\\{}`", other),
                                escape_start,
                            ))
                        }
                        None => {
                            return Err(
                                self.error("unterminated string literal".to_string(), start)
                            )
                        }
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn read_enum_tag(&mut self, start: usize) -> Result<TokenKind, LexerError> {
        if self.eat('"') {
            let tag = self.read_string_content(self.pos - 1)?;
            return Ok(TokenKind::EnumTag(tag));
        }
        match self.peek() {
            Some(c) if is_ident_start(c) => {
                let ident_start = self.pos;
                self.advance();
                while self.peek().is_some_and(is_ident_char) {
                    self.advance();
                }
                Ok(TokenKind::EnumTag(
                    self.source[ident_start..self.pos].to_string(),
                ))
            }
            _ => Err(self.error("expected an enum tag after `'`".to_string(), start)),
        }
    }

    fn read_ident(&mut self, start: usize) -> TokenKind {
        while self.peek().is_some_and(is_ident_char) {
            self.advance();
        }
        match &self.source[start..self.pos] {
            "let" => TokenKind::Let,
            "rec" => TokenKind::Rec,
            "in" => TokenKind::In,
            "fun" => TokenKind::Fun,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            ident => TokenKind::Ident(ident.to_string()),
        }
    }

    fn read_number(&mut self, start: usize) -> Result<TokenKind, LexerError> {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let save = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = save;
            }
        }

        let text = &self.source[start..self.pos];
        parse_decimal(text)
            .map(TokenKind::Num)
            .ok_or_else(|| self.error(format!("invalid number literal `{}`", text), start))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '\''
}

/// Parse a decimal literal (`12`, `1.5`, `2e-3`) into an exact rational.
pub fn parse_decimal(text: &str) -> Option<BigRational> {
    let (mantissa, exponent) = match text.find(['e', 'E']) {
        Some(i) => (&text[..i], text[i + 1..].parse::<i64>().ok()?),
        None => (text, 0),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (mantissa, ""),
    };
    if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits: BigInt = format!("{}{}", int_part, frac_part).parse().ok()?;
    let scale = exponent.checked_sub(i64::try_from(frac_part.len()).ok()?)?;
    let ten = BigInt::from(10);
    let magnitude = u32::try_from(scale.unsigned_abs()).ok()?;
    let factor: BigInt = Pow::pow(&ten, magnitude);

    Some(if scale >= 0 {
        BigRational::from_integer(digits * factor)
    } else {
        BigRational::new(digits, factor)
    })
}

/// `true` if the rational has denominator one.
pub fn is_integer(n: &BigRational) -> bool {
    n.denom().is_one()
}
