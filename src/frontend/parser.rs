//! Parser for Spezi
//!
//! Recursive descent parser with Pratt parsing for expressions. Errors are
//! collected and the parser resynchronises at the next item or statement
//! keyword, so a single pass reports as many syntax errors as it can.

use crate::frontend::ast::*;
use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::types::Type;
use crate::utils::{Error, Result, Span};

/// The parser
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: u32,
    errors: Vec<Error>,
}

impl Parser {
    /// Create a new parser from a lexer
    pub fn new(mut lexer: Lexer) -> Result<Self> {
        Ok(Self::from_tokens(lexer.tokenize()?))
    }

    /// Create a parser from pre-tokenized input
    pub fn from_tokens(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
            let end = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token::eof(end));
        }
        Self {
            tokens,
            pos: 0,
            next_id: 0,
            errors: Vec::new(),
        }
    }

    /// Start numbering nodes at `first`, so ids stay unique across files
    pub fn with_first_id(mut self, first: u32) -> Self {
        self.next_id = first;
        self
    }

    /// The first node id not handed out by this parser
    pub fn next_node_id(&self) -> u32 {
        self.next_id
    }

    // ==================== Helper Methods ====================

    fn current(&self) -> &Token {
        // from_tokens guarantees a trailing Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.current_kind()) == std::mem::discriminant(kind)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            Err(Error::UnexpectedToken {
                expected: expected.describe(),
                got: self.current_kind().describe(),
                span: self.current().span,
            })
        }
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn mk_expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        Expr {
            id: self.node_id(),
            kind,
            span,
        }
    }

    // ==================== Error Recovery ====================

    fn is_item_start(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Fn | TokenKind::Struct | TokenKind::Extern | TokenKind::Import
        )
    }

    /// Skip to the next top-level keyword
    fn synchronize_item(&mut self) {
        self.advance();
        while !self.is_at_end() && !Self::is_item_start(self.current_kind()) {
            self.advance();
        }
    }

    /// Skip to the next statement keyword or the closing brace of the
    /// current block, stepping over nested blocks
    fn synchronize_stmt(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.current_kind() {
                TokenKind::Eof => return,
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace if depth == 0 => return,
                TokenKind::RBrace => depth -= 1,
                TokenKind::Let | TokenKind::If | TokenKind::Return | TokenKind::Semi
                    if depth == 0 =>
                {
                    return
                }
                kind if depth == 0 && Self::is_item_start(kind) => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ==================== Parsing Methods ====================

    /// Parse a complete program, returning every syntax error on failure
    pub fn parse_program(&mut self) -> std::result::Result<Program, Vec<Error>> {
        let mut items = Vec::new();

        while !self.is_at_end() {
            if self.consume(&TokenKind::Semi) {
                continue;
            }
            let start = self.pos;
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(e) => {
                    self.errors.push(e);
                    if self.pos == start || !Self::is_item_start(self.current_kind()) {
                        self.synchronize_item();
                    }
                }
            }
        }

        if self.errors.is_empty() {
            Ok(Program { items })
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    /// Parse a top-level item
    fn parse_item(&mut self) -> Result<Item> {
        match self.current_kind() {
            TokenKind::Import => Ok(Item::Import(self.parse_import()?)),
            TokenKind::Struct => Ok(Item::Struct(self.parse_struct()?)),
            TokenKind::Fn => Ok(Item::Fn(self.parse_function()?)),
            TokenKind::Extern => Ok(Item::Extern(self.parse_extern()?)),
            _ => Err(Error::UnexpectedToken {
                expected: "item (import, struct, fn, extern)".to_string(),
                got: self.current_kind().describe(),
                span: self.current().span,
            }),
        }
    }

    fn parse_import(&mut self) -> Result<ImportDecl> {
        let start = self.expect(TokenKind::Import)?.span;
        let mut path = vec![self.parse_ident()?];
        while self.consume(&TokenKind::Dot) {
            path.push(self.parse_ident()?);
        }
        Ok(ImportDecl {
            path,
            span: start.merge(&self.previous_span()),
        })
    }

    fn parse_struct(&mut self) -> Result<StructDef> {
        let start = self.expect(TokenKind::Struct)?.span;
        let name = self.parse_ident()?;
        self.expect(TokenKind::LBrace)?;

        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let field_start = self.current().span;
            let field_name = self.parse_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            fields.push(Field {
                name: field_name,
                ty,
                span: field_start.merge(&self.previous_span()),
            });
            self.consume(&TokenKind::Comma);
        }
        self.expect(TokenKind::RBrace)?;

        Ok(StructDef {
            name,
            fields,
            span: start.merge(&self.previous_span()),
        })
    }

    /// `fn name(...)` or `fn Receiver.name(...)`
    fn parse_function(&mut self) -> Result<FnDef> {
        let start = self.expect(TokenKind::Fn)?.span;

        let first = self.parse_ident()?;
        let (extension_of, name) = if self.consume(&TokenKind::Dot) {
            (Some(Type::Struct(first)), self.parse_ident()?)
        } else {
            (None, first)
        };

        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        let ret = self.parse_type()?;

        let body = self.parse_block()?;

        Ok(FnDef {
            name,
            module: String::new(),
            extension_of,
            params,
            ret,
            body,
            span: start.merge(&self.previous_span()),
        })
    }

    fn parse_extern(&mut self) -> Result<ExternFnDef> {
        let start = self.expect(TokenKind::Extern)?.span;
        self.expect(TokenKind::Fn)?;
        let name = self.parse_ident()?;

        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        let ret = self.parse_type()?;

        Ok(ExternFnDef {
            name,
            params,
            ret,
            span: start.merge(&self.previous_span()),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();

        while !self.check(&TokenKind::RParen) && !self.is_at_end() {
            let start = self.current().span;
            let name = self.parse_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            params.push(Param {
                name,
                ty,
                span: start.merge(&self.previous_span()),
            });
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }

        Ok(params)
    }

    fn parse_ident(&mut self) -> Result<String> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(Error::UnexpectedToken {
                expected: "identifier".to_string(),
                got: other.describe(),
                span: token.span,
            }),
        }
    }

    fn parse_type(&mut self) -> Result<Type> {
        let token = self.advance();
        let ty = match token.kind {
            TokenKind::KwVoid => Type::Void,
            TokenKind::KwBool => Type::Bool,
            TokenKind::KwString => Type::String,
            TokenKind::KwI32 => Type::I32,
            TokenKind::KwI64 => Type::I64,
            TokenKind::KwF32 => Type::F32,
            TokenKind::KwF64 => Type::F64,
            TokenKind::Ident(name) => Type::Struct(name),
            other => {
                return Err(Error::UnexpectedToken {
                    expected: "type".to_string(),
                    got: other.describe(),
                    span: token.span,
                })
            }
        };
        Ok(ty)
    }

    // ==================== Statements ====================

    fn parse_block(&mut self) -> Result<Block> {
        let start = self.expect(TokenKind::LBrace)?.span;
        let id = self.node_id();
        let mut stmts = Vec::new();

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            if Self::is_item_start(self.current_kind()) {
                break;
            }
            if self.consume(&TokenKind::Semi) {
                continue;
            }
            let before = self.pos;
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    if self.pos == before {
                        self.advance();
                    }
                    self.synchronize_stmt();
                }
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Block {
            id,
            stmts,
            span: start.merge(&self.previous_span()),
        })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.current_kind() {
            TokenKind::Let => self.parse_let_stmt(),
            TokenKind::If => self.parse_if_stmt(),
            TokenKind::Return => self.parse_return_stmt(),
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_let_stmt(&mut self) -> Result<Stmt> {
        let start = self.expect(TokenKind::Let)?.span;
        let id = self.node_id();
        let mutable = self.consume(&TokenKind::Mut);
        let name = self.parse_ident()?;

        let ty = if self.consume(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let init = if self.consume(&TokenKind::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(Stmt::VarDecl(VarDecl {
            id,
            name,
            ty,
            mutable,
            init,
            span: start.merge(&self.previous_span()),
        }))
    }

    fn parse_if_stmt(&mut self) -> Result<Stmt> {
        let start = self.expect(TokenKind::If)?.span;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_block = if self.consume(&TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            span: start.merge(&self.previous_span()),
        })
    }

    fn parse_return_stmt(&mut self) -> Result<Stmt> {
        let start = self.expect(TokenKind::Return)?.span;
        let value = if self.check(&TokenKind::RBrace)
            || self.check(&TokenKind::Semi)
            || self.is_at_end()
        {
            None
        } else {
            Some(self.parse_expr()?)
        };

        Ok(Stmt::Return {
            value,
            span: start.merge(&self.previous_span()),
        })
    }

    /// Expression statement or `name = expr`
    fn parse_expr_stmt(&mut self) -> Result<Stmt> {
        let expr = self.parse_expr()?;

        if self.check(&TokenKind::Eq) {
            let eq_span = self.advance().span;
            let value = self.parse_expr()?;
            let span = expr.span.merge(&value.span);
            return match expr.kind {
                ExprKind::VarRef(name) => Ok(Stmt::Assign { name, value, span }),
                _ => Err(Error::Expected(
                    "Assignment target must be a variable".to_string(),
                    eq_span,
                )),
            };
        }

        Ok(Stmt::Expr(expr))
    }

    // ==================== Expression Parsing (Pratt) ====================

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_expr_bp(0)
    }

    /// Parse expression with binding power (Pratt parsing)
    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let Some(bp) = self.current_kind().binary_precedence() else {
                break;
            };

            if bp < min_bp {
                break;
            }

            let op_token = self.advance();

            if op_token.kind == TokenKind::As {
                let ty = self.parse_type()?;
                let span = left.span.merge(&self.previous_span());
                left = self.mk_expr(
                    ExprKind::Cast {
                        expr: Box::new(left),
                        ty,
                    },
                    span,
                );
                continue;
            }

            let op = Self::token_to_binop(&op_token)?;
            let right = self.parse_expr_bp(bp + 1)?;
            let span = left.span.merge(&right.span);

            left = self.mk_expr(
                ExprKind::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.current_kind() {
            TokenKind::Bang => UnOp::Not,
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Tilde => UnOp::BitNot,
            _ => return self.parse_postfix(),
        };
        let start = self.advance().span;
        let operand = self.parse_unary()?;
        let span = start.merge(&operand.span);
        Ok(self.mk_expr(
            ExprKind::Unary {
                op,
                expr: Box::new(operand),
            },
            span,
        ))
    }

    /// Primary followed by any number of `.field` / `.method(args)`
    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        while self.consume(&TokenKind::Dot) {
            let member = self.parse_ident()?;
            if self.check(&TokenKind::LParen) {
                let mut args = vec![expr];
                args.extend(self.parse_args()?);
                let span = args[0].span.merge(&self.previous_span());
                expr = self.mk_expr(ExprKind::Call { name: member, args }, span);
            } else {
                let span = expr.span.merge(&self.previous_span());
                expr = self.mk_expr(
                    ExprKind::Access {
                        object: Box::new(expr),
                        member,
                    },
                    span,
                );
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        let span = token.span;

        let kind = match token.kind {
            TokenKind::IntLit(value, long) => ExprKind::Int { value, long },
            TokenKind::FloatLit(value, single) => ExprKind::Float { value, single },
            TokenKind::StringLit(s) => ExprKind::Str(s),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::New => {
                let name = self.parse_ident()?;
                let args = self.parse_args()?;
                let span = span.merge(&self.previous_span());
                return Ok(self.mk_expr(ExprKind::Constructor { name, args }, span));
            }
            TokenKind::Ident(name) => {
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    let span = span.merge(&self.previous_span());
                    return Ok(self.mk_expr(ExprKind::Call { name, args }, span));
                }
                ExprKind::VarRef(name)
            }
            other => {
                return Err(Error::UnexpectedToken {
                    expected: "expression".to_string(),
                    got: other.describe(),
                    span,
                })
            }
        };

        Ok(self.mk_expr(kind, span))
    }

    /// `( expr, expr, ... )`
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) && !self.is_at_end() {
            args.push(self.parse_expr()?);
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn token_to_binop(token: &Token) -> Result<BinOp> {
        let op = match token.kind {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Mod,
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::Ne => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            TokenKind::Amp => BinOp::BitAnd,
            TokenKind::Pipe => BinOp::BitOr,
            TokenKind::Caret => BinOp::BitXor,
            TokenKind::Shl => BinOp::Shl,
            TokenKind::Shr => BinOp::Shr,
            ref other => {
                return Err(Error::UnexpectedToken {
                    expected: "binary operator".to_string(),
                    got: other.describe(),
                    span: token.span,
                })
            }
        };
        Ok(op)
    }
}

/// Lex and parse one source text
pub fn parse_source(
    source: &str,
    file_id: usize,
    first_id: u32,
) -> std::result::Result<(Program, u32), Vec<Error>> {
    let mut parser = Parser::new(Lexer::new(source, file_id))
        .map_err(|e| vec![e])?
        .with_first_id(first_id);
    let program = parser.parse_program()?;
    Ok((program, parser.next_node_id()))
}
