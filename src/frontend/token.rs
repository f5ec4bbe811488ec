//! Token definitions for Spezi

use crate::utils::Span;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn eof(span: Span) -> Self {
        Self { kind: TokenKind::Eof, span }
    }
}

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ============ Keywords ============
    Let,
    Mut,
    Fn,
    Struct,
    Import,
    If,
    Else,
    Return,
    Extern,
    New,
    As,
    True,
    False,

    // ============ Type keywords ============
    KwVoid,
    KwBool,
    KwString,
    KwI32,
    KwI64,
    KwF32,
    KwF64,

    // ============ Identifiers and Literals ============
    Ident(String),
    /// Integer literal; `true` when written with the `L` suffix
    IntLit(i64, bool),
    /// Float literal; `true` when written with the `f` suffix
    FloatLit(f64, bool),
    StringLit(String),

    // ============ Operators ============
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Shl,
    Shr,
    Eq,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Arrow,
    Dot,

    // ============ Delimiters ============
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    /// Optional statement terminator
    Semi,

    // ============ Special ============
    Eof,
}

impl TokenKind {
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        match s {
            "let" => Some(TokenKind::Let),
            "mut" => Some(TokenKind::Mut),
            "fn" => Some(TokenKind::Fn),
            "struct" => Some(TokenKind::Struct),
            "import" => Some(TokenKind::Import),
            "if" => Some(TokenKind::If),
            "else" => Some(TokenKind::Else),
            "return" => Some(TokenKind::Return),
            "extern" => Some(TokenKind::Extern),
            "new" => Some(TokenKind::New),
            "as" => Some(TokenKind::As),
            "true" => Some(TokenKind::True),
            "false" => Some(TokenKind::False),
            "void" => Some(TokenKind::KwVoid),
            "bool" => Some(TokenKind::KwBool),
            "string" => Some(TokenKind::KwString),
            "i32" => Some(TokenKind::KwI32),
            "i64" => Some(TokenKind::KwI64),
            "f32" => Some(TokenKind::KwF32),
            "f64" => Some(TokenKind::KwF64),
            _ => None,
        }
    }

    /// Binding power of an infix operator; higher binds tighter
    pub fn binary_precedence(&self) -> Option<u8> {
        match self {
            TokenKind::As => Some(11),
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some(10),
            TokenKind::Plus | TokenKind::Minus => Some(9),
            TokenKind::Shl | TokenKind::Shr => Some(8),
            TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => Some(7),
            TokenKind::EqEq | TokenKind::Ne => Some(6),
            TokenKind::Amp => Some(5),
            TokenKind::Caret => Some(4),
            TokenKind::Pipe => Some(3),
            _ => None,
        }
    }

    /// Human readable form used in parse errors
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::IntLit(v, _) => format!("integer {}", v),
            TokenKind::FloatLit(v, _) => format!("float {}", v),
            TokenKind::StringLit(_) => "string literal".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            other => format!("{:?}", other),
        }
    }
}
