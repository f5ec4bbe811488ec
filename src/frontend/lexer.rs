//! Lexer for Spezi
//!
//! Converts source code into a stream of tokens.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Error, Result, Span};

/// The lexer state
pub struct Lexer {
    source: String,
    /// Current byte position in source
    pos: usize,
    /// Start byte position of current token
    start: usize,
    /// File ID for span tracking
    file_id: usize,
}

impl Lexer {
    /// Create a new lexer for the given source code
    pub fn new(source: &str, file_id: usize) -> Self {
        Self {
            source: source.to_string(),
            pos: 0,
            start: 0,
            file_id,
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        self.source[self.pos..].chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn make_span(&self) -> Span {
        Span::new(self.start, self.pos, self.file_id)
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.make_span())
    }

    /// Skip whitespace and `//` comments
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_identifier(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.source[self.start..self.pos];
        let kind = TokenKind::keyword_from_str(text)
            .unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        self.make_token(kind)
    }

    /// Integer (`12`, `12L`) or float (`1.5`, `1.5f`, `2f`) literal
    fn read_number(&mut self) -> Result<Token> {
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }

        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_next().map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let digits = self.source[self.start..self.pos].to_string();
        let invalid = |lexer: &Self| Error::InvalidNumber {
            text: lexer.source[lexer.start..lexer.pos].to_string(),
            span: lexer.make_span(),
        };

        let single = self.matches('f');
        if single || is_float {
            let value = digits.parse::<f64>().map_err(|_| invalid(self))?;
            // a literal must stay finite in its own width
            let finite = if single {
                (value as f32).is_finite()
            } else {
                value.is_finite()
            };
            if !finite {
                return Err(invalid(self));
            }
            return Ok(self.make_token(TokenKind::FloatLit(value, single)));
        }

        let long = self.matches('L');
        let value = digits.parse::<i64>().map_err(|_| invalid(self))?;
        Ok(self.make_token(TokenKind::IntLit(value, long)))
    }

    fn read_string(&mut self) -> Result<Token> {
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(Error::UnterminatedString { span: self.make_span() });
                }
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::UnterminatedString { span: self.make_span() });
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(self.make_token(TokenKind::StringLit(value)))
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        self.start = self.pos;

        let Some(c) = self.advance() else {
            return Ok(Token::eof(self.make_span()));
        };

        if c.is_alphabetic() || c == '_' {
            return Ok(self.read_identifier());
        }
        if c.is_ascii_digit() {
            return self.read_number();
        }
        if c == '"' {
            return self.read_string();
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semi,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '&' => TokenKind::Amp,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            '-' => {
                if self.matches('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '!' => {
                if self.matches('=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.matches('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }
            '<' => {
                if self.matches('<') {
                    TokenKind::Shl
                } else if self.matches('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.matches('>') {
                    TokenKind::Shr
                } else if self.matches('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            other => {
                return Err(Error::UnexpectedChar { ch: other, span: self.make_span() });
            }
        };

        Ok(self.make_token(kind))
    }

    /// Tokenize the entire source, ending with an `Eof` token
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        debug_assert!(self.is_at_end());
        Ok(tokens)
    }
}
