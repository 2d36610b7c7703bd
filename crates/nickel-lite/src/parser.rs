//! Recursive descent parser.
//!
//! Converts tokens into [`Node`] trees. Binary operators are parsed by
//! precedence climbing; application by juxtaposition binds tighter than any
//! operator, and field access binds tightest of all.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{EvalError, Result, Source, Span};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::term::{Annotation, BinOp, Contract, FieldDef, Node, Term, UnOp};

/// Parse a whole program.
pub fn parse(source: &Arc<Source>) -> Result<Arc<Node>> {
    let tokens = Lexer::new(&source.text).tokenize().map_err(|e| {
        EvalError::parse(
            e.message,
            Some(Span::new(Arc::clone(source), e.start, e.end)),
        )
    })?;

    let mut parser = Parser {
        source: Arc::clone(source),
        tokens,
        pos: 0,
        depth: 0,
    };
    let node = parser.parse_expr()?;
    if !parser.at(&TokenKind::Eof) {
        return Err(parser.unexpected("end of input"));
    }
    tracing::trace!(source = %source.name, "parsed program");
    Ok(node)
}

/// Deepest nesting of expressions the parser accepts. The parser is
/// recursive and must stay within a 2 MiB thread stack.
pub const MAX_NESTING: usize = 128;

struct Parser {
    source: Arc<Source>,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    // ═══════════════════════════════════════════════════════════════════
    // Token Helpers
    // ═══════════════════════════════════════════════════════════════════

    fn current(&self) -> &Token {
        // The token list always ends with Eof and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn start(&self) -> usize {
        self.current().start
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].end
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(Arc::clone(&self.source), start, self.prev_end().max(start))
    }

    fn token_span(&self, token: &Token) -> Span {
        Span::new(Arc::clone(&self.source), token.start, token.end)
    }

    fn unexpected(&self, expected: &str) -> EvalError {
        let token = self.current();
        EvalError::parse(
            format!("unexpected {}, expected {}", token.kind, expected),
            Some(self.token_span(token)),
        )
    }

    fn ident(&mut self, what: &str) -> Result<(String, Span)> {
        match self.current().kind.clone() {
            TokenKind::Ident(name) => {
                let token = self.advance();
                Ok((name, self.token_span(&token)))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(EvalError::parse(
                format!("expression nested more than {} levels deep", MAX_NESTING),
                Some(self.token_span(self.current())),
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    // ═══════════════════════════════════════════════════════════════════
    // Expressions
    // ═══════════════════════════════════════════════════════════════════

    fn parse_expr(&mut self) -> Result<Arc<Node>> {
        self.nested(Self::parse_annotated)
    }

    fn parse_annotated(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        let expr = self.parse_binary(0)?;

        let mut annotations = Vec::new();
        while self.eat(&TokenKind::Pipe) {
            annotations.push(self.parse_annotation()?);
        }
        if annotations.is_empty() {
            Ok(expr)
        } else {
            Ok(Node::new(
                Term::Annotated(expr, annotations),
                self.span_from(start),
            ))
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Arc<Node>> {
        let start = self.start();
        let mut lhs = self.parse_unary()?;

        while let Some((op, prec)) = binary_op(&self.current().kind) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Node::new(Term::Op2(op, lhs, rhs), self.span_from(start));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        let op = match self.current().kind {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Bang => UnOp::Not,
            _ => return self.parse_application(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Node::new(Term::Op1(op, operand), self.span_from(start)))
    }

    fn parse_application(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        let mut func = self.parse_postfix()?;
        while starts_argument(&self.current().kind) {
            let arg = self.parse_postfix()?;
            func = Node::new(Term::App(func, arg), self.span_from(start));
        }
        Ok(func)
    }

    fn parse_postfix(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        let mut expr = self.parse_atom()?;
        while self.eat(&TokenKind::Dot) {
            let field = match self.current().kind.clone() {
                TokenKind::Ident(name) | TokenKind::Str(name) => {
                    self.advance();
                    name
                }
                _ => return Err(self.unexpected("a field name")),
            };
            expr = Node::new(Term::Access(expr, field), self.span_from(start));
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        let term = match self.current().kind.clone() {
            TokenKind::Null => {
                self.advance();
                Term::Null
            }
            TokenKind::True => {
                self.advance();
                Term::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                Term::Bool(false)
            }
            TokenKind::Num(n) => {
                self.advance();
                Term::Num(n)
            }
            TokenKind::Str(s) => {
                self.advance();
                Term::Str(s)
            }
            TokenKind::Ident(name) => {
                self.advance();
                Term::Var(name)
            }
            TokenKind::EnumTag(tag) => {
                self.advance();
                if starts_argument(&self.current().kind) {
                    let payload = self.nested(Self::parse_postfix)?;
                    Term::EnumVariant(tag, payload)
                } else {
                    Term::EnumTag(tag)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBrace => return self.parse_record(),
            TokenKind::LBracket => return self.parse_array(),
            TokenKind::Let => return self.parse_let(),
            TokenKind::Fun => return self.parse_fun(),
            TokenKind::If => return self.parse_if(),
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(Node::new(term, self.span_from(start)))
    }

    fn parse_let(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        self.expect(&TokenKind::Let)?;
        let rec = self.eat(&TokenKind::Rec);
        let (name, _) = self.ident("a binding name")?;

        let mut params = Vec::new();
        while let TokenKind::Ident(param) = self.current().kind.clone() {
            let token = self.advance();
            params.push((param, token.start));
        }

        let annotations = self.parse_binding_annotations()?;
        self.expect(&TokenKind::Eq)?;
        let mut bound = self.parse_expr()?;
        for (param, param_start) in params.into_iter().rev() {
            let span = Span::new(Arc::clone(&self.source), param_start, self.prev_end());
            bound = Node::new(Term::Fun { param, body: bound }, span);
        }

        self.expect(&TokenKind::In)?;
        let body = self.parse_expr()?;
        Ok(Node::new(
            Term::Let {
                name,
                rec,
                annotations,
                bound,
                body,
            },
            self.span_from(start),
        ))
    }

    fn parse_fun(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        self.expect(&TokenKind::Fun)?;
        let mut params = vec![self.ident("a parameter name")?.0];
        while let TokenKind::Ident(param) = self.current().kind.clone() {
            self.advance();
            params.push(param);
        }
        self.expect(&TokenKind::FatArrow)?;

        let mut body = self.parse_expr()?;
        let span = self.span_from(start);
        for param in params.into_iter().rev() {
            body = Node::new(Term::Fun { param, body }, span.clone());
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        self.expect(&TokenKind::If)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Then)?;
        let then_branch = self.parse_expr()?;
        self.expect(&TokenKind::Else)?;
        let else_branch = self.parse_expr()?;
        Ok(Node::new(
            Term::If(cond, then_branch, else_branch),
            self.span_from(start),
        ))
    }

    fn parse_array(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        self.expect(&TokenKind::LBracket)?;
        let mut elements = Vec::new();
        while !self.at(&TokenKind::RBracket) {
            elements.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(Node::new(Term::Array(elements), self.span_from(start)))
    }

    fn parse_record(&mut self) -> Result<Arc<Node>> {
        let start = self.start();
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        let mut seen = HashSet::new();

        while !self.at(&TokenKind::RBrace) {
            let field = self.parse_field()?;
            if !seen.insert(field.name.clone()) {
                return Err(EvalError::parse(
                    format!("duplicate definition of field `{}`", field.name),
                    Some(field.name_span),
                ));
            }
            fields.push(field);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Node::new(Term::Record(fields), self.span_from(start)))
    }

    fn parse_field(&mut self) -> Result<FieldDef> {
        let name_token = self.current().clone();
        let name = match &name_token.kind {
            TokenKind::Ident(name) | TokenKind::Str(name) => name.clone(),
            _ => return Err(self.unexpected("a field name")),
        };
        self.advance();

        let mut field = FieldDef {
            name,
            name_span: self.token_span(&name_token),
            annotations: Vec::new(),
            not_exported: false,
            doc: None,
            value: None,
        };

        loop {
            if self.eat(&TokenKind::Colon) {
                field.annotations.push(self.parse_annotation()?);
            } else if self.eat(&TokenKind::Pipe) {
                match self.current().kind.clone() {
                    TokenKind::Ident(word) if word == "not_exported" => {
                        self.advance();
                        field.not_exported = true;
                    }
                    TokenKind::Ident(word) if word == "doc" => {
                        self.advance();
                        match self.current().kind.clone() {
                            TokenKind::Str(doc) => {
                                self.advance();
                                field.doc = Some(doc);
                            }
                            _ => return Err(self.unexpected("a documentation string")),
                        }
                    }
                    _ => field.annotations.push(self.parse_annotation()?),
                }
            } else {
                break;
            }
        }

        if self.eat(&TokenKind::Eq) {
            field.value = Some(self.parse_expr()?);
        }
        Ok(field)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Contracts
    // ═══════════════════════════════════════════════════════════════════

    fn parse_binding_annotations(&mut self) -> Result<Vec<Annotation>> {
        let mut annotations = Vec::new();
        while self.eat(&TokenKind::Pipe) || self.eat(&TokenKind::Colon) {
            annotations.push(self.parse_annotation()?);
        }
        Ok(annotations)
    }

    fn parse_annotation(&mut self) -> Result<Annotation> {
        let start = self.start();
        let contract = self.parse_contract()?;
        Ok(Annotation {
            contract,
            span: self.span_from(start),
        })
    }

    fn parse_contract(&mut self) -> Result<Contract> {
        if self.eat(&TokenKind::LParen) {
            let inner = self.nested(Self::parse_contract)?;
            self.expect(&TokenKind::RParen)?;
            return Ok(inner);
        }

        let start = self.start();
        let (head, _) = self.ident("a contract")?;
        let contract = match head.as_str() {
            "Dyn" => Contract::Dyn,
            "Number" => Contract::Number,
            "String" => Contract::String,
            "Bool" => Contract::Bool,
            "Array" => Contract::Array(Box::new(self.nested(Self::parse_contract)?)),
            "std" => {
                let mut path = vec![head.clone()];
                while self.eat(&TokenKind::Dot) {
                    path.push(self.ident("a contract name")?.0);
                }
                match path.join(".").as_str() {
                    "std.number.Integer" => Contract::Integer,
                    "std.number.Nat" => Contract::Nat,
                    "std.string.NonEmpty" => Contract::NonEmpty,
                    other => {
                        return Err(EvalError::parse(
                            format!("unknown contract `{}`", other),
                            Some(self.span_from(start)),
                        ))
                    }
                }
            }
            other => {
                return Err(EvalError::parse(
                    format!("unknown contract `{}`", other),
                    Some(self.span_from(start)),
                ))
            }
        };
        Ok(contract)
    }
}

fn binary_op(kind: &TokenKind) -> Option<(BinOp, u8)> {
    let op = match kind {
        TokenKind::OrOr => (BinOp::Or, 1),
        TokenKind::AndAnd => (BinOp::And, 2),
        TokenKind::EqEq => (BinOp::Eq, 3),
        TokenKind::NotEq => (BinOp::Ne, 3),
        TokenKind::Lt => (BinOp::Lt, 4),
        TokenKind::Le => (BinOp::Le, 4),
        TokenKind::Gt => (BinOp::Gt, 4),
        TokenKind::Ge => (BinOp::Ge, 4),
        TokenKind::Plus => (BinOp::Add, 5),
        TokenKind::Minus => (BinOp::Sub, 5),
        TokenKind::PlusPlus => (BinOp::StrConcat, 5),
        TokenKind::At => (BinOp::ArrayConcat, 5),
        TokenKind::Star => (BinOp::Mul, 6),
        TokenKind::Slash => (BinOp::Div, 6),
        TokenKind::Percent => (BinOp::Rem, 6),
        _ => return None,
    };
    Some(op)
}

fn starts_argument(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Null
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Num(_)
            | TokenKind::Str(_)
            | TokenKind::Ident(_)
            | TokenKind::EnumTag(_)
            | TokenKind::LParen
            | TokenKind::LBrace
            | TokenKind::LBracket
    )
}
