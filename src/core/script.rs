//! Script parsing for condition and instruction text.
//!
//! Exported flow data carries small C-like scripts:
//!
//! ```text
//! GameState.awake == false && Inventory.keys >= 2
//! GameState.awake = true; Inventory.keys -= 1; // comment
//! ```
//!
//! `parse` turns the text into a [`Script`]; evaluation lives in `evaluator`.

use std::fmt;
use thiserror::Error;

use crate::core::store::StoreError;
use crate::schema::variable::{GvName, Value};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("undeclared variable: {0}")]
    UndeclaredVariable(GvName),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{function} expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: &'static str,
        found: usize,
    },
    #[error("{0} is not allowed in a condition")]
    NotAllowed(String),
    #[error("condition must be a single bool expression, got {0}")]
    NotBoolean(String),
    #[error("random() needs a random source, none is attached to this state")]
    NoRandomSource,
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ScriptError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VariableNotFound(name) => Self::UndeclaredVariable(name),
            StoreError::TypeMismatch {
                name,
                expected,
                found,
            } => Self::TypeMismatch(format!("cannot assign {found} to {name} ({expected})")),
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne => 3,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Assignment operators. Compound forms apply the matching binary op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    pub fn binary(&self) -> Option<BinaryOp> {
        match self {
            Self::Set => None,
            Self::Add => Some(BinaryOp::Add),
            Self::Sub => Some(BinaryOp::Sub),
            Self::Mul => Some(BinaryOp::Mul),
            Self::Div => Some(BinaryOp::Div),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(GvName),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Every variable referenced by this expression, in source order.
    pub fn variables(&self, out: &mut Vec<GvName>) {
        match self {
            Self::Literal(_) => {}
            Self::Variable(name) => out.push(name.clone()),
            Self::Unary { operand, .. } => operand.variables(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.variables(out);
                rhs.variables(out);
            }
            Self::Call { args, .. } => args.iter().for_each(|arg| arg.variables(out)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        target: GvName,
        op: AssignOp,
        value: Expr,
    },
    Expr(Expr),
}

/// A parsed script: zero or more statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub statements: Vec<Stmt>,
}

impl Script {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Every variable read or written, in source order, duplicates kept.
    pub fn variables(&self) -> Vec<GvName> {
        let mut out = Vec::new();
        for stmt in &self.statements {
            match stmt {
                Stmt::Assign { target, value, .. } => {
                    out.push(target.clone());
                    value.variables(&mut out);
                }
                Stmt::Expr(expr) => expr.variables(&mut out),
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Str(String),
    /// Identifier, possibly dotted (`Ns.Var`).
    Ident(String),
    LParen,
    RParen,
    Comma,
    Semi,
    Bang,
    Binary(BinaryOp),
    Assign(AssignOp),
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    position: usize,
}

fn parse_error(position: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Parse {
        position,
        message: message.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<Spanned>, ScriptError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|&(_, c)| c);

    while let Some(&(position, c)) = chars.get(i) {
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == '/' && peek(i + 1) == Some('/') {
            while let Some(c) = peek(i) {
                if c == '\n' {
                    break;
                }
                i += 1;
            }
            continue;
        }
        if c == '/' && peek(i + 1) == Some('*') {
            i += 2;
            loop {
                match peek(i) {
                    None => return Err(parse_error(position, "unterminated block comment")),
                    Some('*') if peek(i + 1) == Some('/') => {
                        i += 2;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            let hex = c == '0' && matches!(peek(i + 1), Some('x') | Some('X'));
            if hex {
                i += 2;
            }
            while peek(i).is_some_and(|c| c.is_ascii_alphanumeric()) {
                i += 1;
            }
            let literal: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            let parsed = if hex {
                u64::from_str_radix(&literal[2..], 16)
                    .ok()
                    .and_then(|v| i64::try_from(v).ok())
            } else {
                literal.parse::<i64>().ok()
            };
            let value =
                parsed.ok_or_else(|| parse_error(position, format!("bad integer '{literal}'")))?;
            tokens.push(Spanned {
                tok: Tok::Int(value),
                position,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while peek(i).is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            tokens.push(Spanned {
                tok: Tok::Ident(ident),
                position,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                match peek(i) {
                    None => return Err(parse_error(position, "unterminated string")),
                    Some(c) if c == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = match peek(i + 1) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some(c) => c,
                            None => return Err(parse_error(position, "unterminated string")),
                        };
                        s.push(escaped);
                        i += 2;
                    }
                    Some(c) => {
                        s.push(c);
                        i += 1;
                    }
                }
            }
            tokens.push(Spanned {
                tok: Tok::Str(s),
                position,
            });
            continue;
        }

        let next = peek(i + 1);
        let (tok, width) = match (c, next) {
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            (',', _) => (Tok::Comma, 1),
            (';', _) => (Tok::Semi, 1),
            ('&', Some('&')) => (Tok::Binary(BinaryOp::And), 2),
            ('|', Some('|')) => (Tok::Binary(BinaryOp::Or), 2),
            ('=', Some('=')) => (Tok::Binary(BinaryOp::Eq), 2),
            ('!', Some('=')) => (Tok::Binary(BinaryOp::Ne), 2),
            ('<', Some('=')) => (Tok::Binary(BinaryOp::Le), 2),
            ('>', Some('=')) => (Tok::Binary(BinaryOp::Ge), 2),
            ('+', Some('=')) => (Tok::Assign(AssignOp::Add), 2),
            ('-', Some('=')) => (Tok::Assign(AssignOp::Sub), 2),
            ('*', Some('=')) => (Tok::Assign(AssignOp::Mul), 2),
            ('/', Some('=')) => (Tok::Assign(AssignOp::Div), 2),
            ('=', _) => (Tok::Assign(AssignOp::Set), 1),
            ('!', _) => (Tok::Bang, 1),
            ('<', _) => (Tok::Binary(BinaryOp::Lt), 1),
            ('>', _) => (Tok::Binary(BinaryOp::Gt), 1),
            ('+', _) => (Tok::Binary(BinaryOp::Add), 1),
            ('-', _) => (Tok::Binary(BinaryOp::Sub), 1),
            ('*', _) => (Tok::Binary(BinaryOp::Mul), 1),
            ('/', _) => (Tok::Binary(BinaryOp::Div), 1),
            ('%', _) => (Tok::Binary(BinaryOp::Rem), 1),
            _ => return Err(parse_error(position, format!("unexpected character '{c}'"))),
        };
        tokens.push(Spanned { tok, position });
        i += width;
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|t| &t.tok)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.position)
            .unwrap_or(self.end)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Tok, what: &str) -> Result<(), ScriptError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(parse_error(self.position(), format!("expected {what}")))
        }
    }

    fn script(&mut self) -> Result<Script, ScriptError> {
        let mut statements = Vec::new();
        loop {
            while self.peek() == Some(&Tok::Semi) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                break;
            }
            statements.push(self.statement()?);
            match self.peek() {
                None | Some(Tok::Semi) => {}
                Some(_) => return Err(parse_error(self.position(), "expected ';'")),
            }
        }
        Ok(Script { statements })
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        if let (Some(Tok::Ident(ident)), Some(Tok::Assign(op))) = (self.peek(), self.peek_at(1)) {
            let position = self.position();
            let op = *op;
            let target = variable_name(ident, position)?;
            self.pos += 2;
            let value = self.expression(0)?;
            return Ok(Stmt::Assign { target, op, value });
        }
        Ok(Stmt::Expr(self.expression(0)?))
    }

    /// Precedence climbing over binary operators.
    fn expression(&mut self, min_precedence: u8) -> Result<Expr, ScriptError> {
        let mut lhs = self.unary()?;
        while let Some(Tok::Binary(op)) = self.peek() {
            let op = *op;
            let precedence = op.precedence();
            if precedence <= min_precedence {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(precedence)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Some(Tok::Bang) => UnaryOp::Not,
            Some(Tok::Binary(BinaryOp::Sub)) => UnaryOp::Neg,
            _ => return self.primary(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let position = self.position();
        match self.bump() {
            Some(Tok::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::LParen) => {
                let inner = self.expression(0)?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                _ if self.peek() == Some(&Tok::LParen) => {
                    self.pos += 1;
                    let args = self.arguments()?;
                    Ok(Expr::Call { name: ident, args })
                }
                _ => Ok(Expr::Variable(variable_name(&ident, position)?)),
            },
            Some(tok) => Err(parse_error(position, format!("unexpected {}", describe(&tok)))),
            None => Err(parse_error(position, "unexpected end of script")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression(0)?);
            match self.bump() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => break,
                _ => return Err(parse_error(self.position(), "expected ',' or ')'")),
            }
        }
        Ok(args)
    }
}

fn variable_name(ident: &str, position: usize) -> Result<GvName, ScriptError> {
    GvName::parse(ident).ok_or_else(|| {
        parse_error(
            position,
            format!("'{ident}' is not a Namespace.Variable reference"),
        )
    })
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Int(i) => format!("integer {i}"),
        Tok::Str(s) => format!("string \"{s}\""),
        Tok::Ident(s) => format!("identifier '{s}'"),
        Tok::LParen => "'('".to_string(),
        Tok::RParen => "')'".to_string(),
        Tok::Comma => "','".to_string(),
        Tok::Semi => "';'".to_string(),
        Tok::Bang => "'!'".to_string(),
        Tok::Binary(op) => format!("'{op}'"),
        Tok::Assign(_) => "assignment".to_string(),
    }
}

/// Parse script text. Empty or comment-only text yields an empty script.
pub fn parse(text: &str) -> Result<Script, ScriptError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
    };
    parser.script()
}
