//! Recursive-descent parser producing the script AST.
//!
//! ```text
//! script  := stmt*
//! stmt    := "let" IDENT "=" expr ";"
//!          | "model" IDENT (":" IDENT)? "{" member* "}"
//!          | "import" STRING ";"
//!          | expr ";"
//! member  := IDENT "=" expr ";"
//!          | IDENT ":" TYPE "?"? ("=" expr)? ";"
//! ```

use crate::error::{ScriptError, ScriptResult};
use crate::lexer::{Tok, Token};

/// Nesting bound for expressions; deeper input is rejected instead of
/// recursing further.
pub(crate) const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pos {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Expr>),
    Name(String, Pos),
    Call {
        name: String,
        args: Vec<Arg>,
        pos: Pos,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        pos: Pos,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Pos,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Member {
    Attr {
        name: String,
        value: Expr,
        pos: Pos,
    },
    Field {
        name: String,
        type_tag: String,
        optional: bool,
        init: Option<Expr>,
        pos: Pos,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ModelDecl {
    pub name: String,
    pub base: Option<String>,
    pub members: Vec<Member>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Let { name: String, value: Expr, pos: Pos },
    Model(ModelDecl),
    Import { path: String, pos: Pos },
    Expr(Expr),
}

pub(crate) fn parse(tokens: Vec<Token>) -> ScriptResult<Vec<Stmt>> {
    let mut parser = Parser {
        tokens,
        at: 0,
        depth: 0,
    };
    let mut stmts = Vec::new();
    while parser.peek() != &Tok::Eof {
        stmts.push(parser.stmt()?);
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // The token list always ends with Eof and `advance` never moves past it.
        &self.tokens[self.at.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Tok {
        &self.current().tok
    }

    fn peek_next(&self) -> &Tok {
        let i = (self.at + 1).min(self.tokens.len() - 1);
        &self.tokens[i].tok
    }

    fn pos(&self) -> Pos {
        let t = self.current();
        Pos {
            line: t.line,
            column: t.column,
        }
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.at + 1 < self.tokens.len() {
            self.at += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let t = self.current();
        ScriptError::syntax(t.line, t.column, message)
    }

    fn expect(&mut self, want: Tok) -> ScriptResult<()> {
        if *self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                want.describe(),
                self.peek().describe()
            )))
        }
    }

    fn ident(&mut self, what: &str) -> ScriptResult<String> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {what}, found {}", other.describe()))),
        }
    }

    // ── Statements ───────────────────────────────────────────────

    fn stmt(&mut self) -> ScriptResult<Stmt> {
        let pos = self.pos();
        match self.peek() {
            Tok::Let => {
                self.advance();
                let name = self.ident("a variable name")?;
                self.expect(Tok::Assign)?;
                let value = self.expr()?;
                self.expect(Tok::Semi)?;
                Ok(Stmt::Let { name, value, pos })
            }
            Tok::Model => {
                self.advance();
                self.model(pos).map(Stmt::Model)
            }
            Tok::Import => {
                self.advance();
                let path = match self.advance() {
                    Tok::Str(path) => path,
                    other => {
                        return Err(self.error(format!(
                            "expected a module string after import, found {}",
                            other.describe()
                        )));
                    }
                };
                self.expect(Tok::Semi)?;
                Ok(Stmt::Import { path, pos })
            }
            _ => {
                let expr = self.expr()?;
                self.expect(Tok::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn model(&mut self, pos: Pos) -> ScriptResult<ModelDecl> {
        let name = self.ident("a model name")?;
        let base = if *self.peek() == Tok::Colon {
            self.advance();
            Some(self.ident("a base model name")?)
        } else {
            None
        };
        self.expect(Tok::LBrace)?;
        let mut members = Vec::new();
        while *self.peek() != Tok::RBrace {
            if *self.peek() == Tok::Eof {
                return Err(self.error(format!("model '{name}' is missing its closing '}}'")));
            }
            members.push(self.member()?);
        }
        self.expect(Tok::RBrace)?;
        Ok(ModelDecl {
            name,
            base,
            members,
            pos,
        })
    }

    fn member(&mut self) -> ScriptResult<Member> {
        let pos = self.pos();
        let name = self.ident("an attribute or field name")?;
        match self.advance() {
            Tok::Assign => {
                let value = self.expr()?;
                self.expect(Tok::Semi)?;
                Ok(Member::Attr { name, value, pos })
            }
            Tok::Colon => {
                let type_tag = self.ident("a field type")?;
                let optional = if *self.peek() == Tok::Question {
                    self.advance();
                    true
                } else {
                    false
                };
                let init = if *self.peek() == Tok::Assign {
                    self.advance();
                    Some(self.expr()?)
                } else {
                    None
                };
                self.expect(Tok::Semi)?;
                Ok(Member::Field {
                    name,
                    type_tag,
                    optional,
                    init,
                    pos,
                })
            }
            other => Err(ScriptError::syntax(
                pos.line,
                pos.column,
                format!("expected '=' or ':' after '{name}', found {}", other.describe()),
            )),
        }
    }

    // ── Expressions ──────────────────────────────────────────────

    fn expr(&mut self) -> ScriptResult<Expr> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ScriptError::ResourceLimit(format!(
                "expression nesting deeper than {MAX_NESTING}"
            )));
        }
        let result = self.binary(0);
        self.depth -= 1;
        result
    }

    fn binary(&mut self, level: usize) -> ScriptResult<Expr> {
        if level >= BINARY_LEVELS {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        loop {
            let pos = self.pos();
            let Some(op) = binary_op(level, self.peek()) else {
                return Ok(lhs);
            };
            self.advance();
            let rhs = self.binary(level + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
    }

    fn unary(&mut self) -> ScriptResult<Expr> {
        let pos = self.pos();
        let op = match self.peek() {
            Tok::Bang => UnaryOp::Not,
            Tok::Minus => UnaryOp::Neg,
            _ => return self.primary(),
        };
        self.advance();
        let expr = Box::new(self.nested(Self::unary)?);
        Ok(Expr::Unary { op, expr, pos })
    }

    fn nested(&mut self, f: fn(&mut Self) -> ScriptResult<Expr>) -> ScriptResult<Expr> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ScriptError::ResourceLimit(format!(
                "expression nesting deeper than {MAX_NESTING}"
            )));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn primary(&mut self) -> ScriptResult<Expr> {
        let pos = self.pos();
        match self.advance() {
            Tok::Null => Ok(Expr::Null),
            Tok::True => Ok(Expr::Bool(true)),
            Tok::False => Ok(Expr::Bool(false)),
            Tok::Int(n) => Ok(Expr::Int(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::LParen => {
                let inner = self.expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::LBracket => {
                let items = self.sequence(Tok::RBracket, Self::expr)?;
                Ok(Expr::List(items))
            }
            Tok::Ident(name) if *self.peek() == Tok::LParen => {
                self.advance();
                let args = self.sequence(Tok::RParen, Self::arg)?;
                Ok(Expr::Call { name, args, pos })
            }
            Tok::Ident(name) => Ok(Expr::Name(name, pos)),
            other => Err(ScriptError::syntax(
                pos.line,
                pos.column,
                format!("expected an expression, found {}", other.describe()),
            )),
        }
    }

    fn arg(&mut self) -> ScriptResult<Arg> {
        if matches!(self.peek(), Tok::Ident(_)) && *self.peek_next() == Tok::Colon {
            let name = self.ident("an argument name")?;
            self.advance();
            let value = self.expr()?;
            return Ok(Arg {
                name: Some(name),
                value,
            });
        }
        Ok(Arg {
            name: None,
            value: self.expr()?,
        })
    }

    /// Comma-separated items up to `close`; a trailing comma is allowed.
    fn sequence<T>(
        &mut self,
        close: Tok,
        mut item: impl FnMut(&mut Self) -> ScriptResult<T>,
    ) -> ScriptResult<Vec<T>> {
        let mut items = Vec::new();
        while *self.peek() != close {
            items.push(item(self)?);
            if *self.peek() == Tok::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }
}

const BINARY_LEVELS: usize = 5;

/// Binary operators by precedence level, loosest first.
fn binary_op(level: usize, tok: &Tok) -> Option<BinaryOp> {
    let op = match (level, tok) {
        (0, Tok::OrOr) => BinaryOp::Or,
        (1, Tok::AndAnd) => BinaryOp::And,
        (2, Tok::EqEq) => BinaryOp::Eq,
        (2, Tok::NotEq) => BinaryOp::Ne,
        (2, Tok::Lt) => BinaryOp::Lt,
        (2, Tok::Le) => BinaryOp::Le,
        (2, Tok::Gt) => BinaryOp::Gt,
        (2, Tok::Ge) => BinaryOp::Ge,
        (3, Tok::Plus) => BinaryOp::Add,
        (3, Tok::Minus) => BinaryOp::Sub,
        (4, Tok::Star) => BinaryOp::Mul,
        _ => return None,
    };
    Some(op)
}
