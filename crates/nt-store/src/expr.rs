//! Expression engine for selections and observables.
//!
//! Grammar (lowest to highest precedence): ternary `c ? a : b`, `||`, `&&`,
//! comparisons (`== != < <= > >=`), `+ -`, `* / %`, unary `- !`, atoms
//! (numbers, `true`/`false`, field names, calls to `abs sqrt log exp pow min
//! max`, parenthesised expressions). Truth values are non-zero numbers.
//!
//! An expression is compiled once, bound once per stream to field handles
//! ([`BoundExpr`]) and then evaluated per record without allocating.

use nt_core::{Error, Result};

use crate::field::FieldHandle;
use crate::schema::Schema;
use crate::store::Record;

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    Field(usize),
    Neg(Box<Node>),
    Not(Box<Node>),
    Bin(Op, Box<Node>, Box<Node>),
    Cond(Box<Node>, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Op::Or => 1,
            Op::And => 2,
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => 3,
            Op::Add | Op::Sub => 4,
            Op::Mul | Op::Div | Op::Rem => 5,
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        let t = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            Op::Or => t(a != 0.0 || b != 0.0),
            Op::And => t(a != 0.0 && b != 0.0),
            Op::Eq => t(a == b),
            Op::Ne => t(a != b),
            Op::Lt => t(a < b),
            Op::Le => t(a <= b),
            Op::Gt => t(a > b),
            Op::Ge => t(a >= b),
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div => a / b,
            Op::Rem => a % b,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn from_name(name: &str) -> Option<(Func, usize)> {
        Some(match name {
            "abs" => (Func::Abs, 1),
            "sqrt" => (Func::Sqrt, 1),
            "log" => (Func::Log, 1),
            "exp" => (Func::Exp, 1),
            "pow" => (Func::Pow, 2),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            _ => return None,
        })
    }
}

impl Node {
    fn eval<F: Fn(usize) -> f64>(&self, field: &F) -> f64 {
        match self {
            Node::Const(c) => *c,
            Node::Field(i) => field(*i),
            Node::Neg(a) => -a.eval(field),
            Node::Not(a) => {
                if a.eval(field) != 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
            // Short-circuiting.
            Node::Bin(Op::And, a, b) => {
                if a.eval(field) != 0.0 && b.eval(field) != 0.0 { 1.0 } else { 0.0 }
            }
            Node::Bin(Op::Or, a, b) => {
                if a.eval(field) != 0.0 || b.eval(field) != 0.0 { 1.0 } else { 0.0 }
            }
            Node::Bin(op, a, b) => op.apply(a.eval(field), b.eval(field)),
            Node::Cond(c, a, b) => {
                if c.eval(field) != 0.0 {
                    a.eval(field)
                } else {
                    b.eval(field)
                }
            }
            Node::Call(f, args) => {
                let x = args[0].eval(field);
                match f {
                    Func::Abs => x.abs(),
                    Func::Sqrt => x.sqrt(),
                    Func::Log => x.ln(),
                    Func::Exp => x.exp(),
                    Func::Pow => x.powf(args[1].eval(field)),
                    Func::Min => x.min(args[1].eval(field)),
                    Func::Max => x.max(args[1].eval(field)),
                }
            }
        }
    }
}

// ── Compiled / bound expressions ───────────────────────────────

/// A parsed expression, not yet tied to a schema.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    root: Node,
    /// Field names referenced, in order of first occurrence.
    pub required_fields: Vec<String>,
}

impl CompiledExpr {
    /// Parse `input`.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = lex(input)?;
        let mut p = Parser { tokens: &tokens, pos: 0, fields: Vec::new() };
        let root = p.ternary()?;
        if let Some(t) = p.tokens.get(p.pos) {
            return Err(Error::Expression(format!("'{input}': unexpected {t:?} after expression")));
        }
        Ok(Self { source: input.to_string(), root, required_fields: p.fields })
    }

    /// Original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with field values given positionally (`required_fields` order).
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        self.root.eval(&|i| values[i])
    }

    /// Resolve every referenced field against `schema`.
    pub fn bind(&self, schema: &Schema) -> Result<BoundExpr> {
        let handles = self
            .required_fields
            .iter()
            .map(|name| {
                FieldHandle::scalar(schema, name).map_err(|e| {
                    Error::SchemaMismatch(format!("expression '{}': {e}", self.source))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BoundExpr { root: self.root.clone(), handles })
    }
}

/// An expression bound to one stream's field handles.
#[derive(Debug, Clone)]
pub struct BoundExpr {
    root: Node,
    handles: Vec<FieldHandle>,
}

impl BoundExpr {
    /// Numeric value on `rec`.
    pub fn eval(&self, rec: &Record<'_>) -> f64 {
        self.root.eval(&|i| rec.f64(self.handles[i]))
    }

    /// Truth value on `rec`.
    pub fn test(&self, rec: &Record<'_>) -> bool {
        self.eval(rec) != 0.0
    }
}

// ── Lexer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Op(Op),
    Minus,
    Bang,
    Question,
    Colon,
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Tok>> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        let next = bytes.get(i + 1).map(|&b| b as char);
        let (tok, width) = match (c, next) {
            (' ' | '\t' | '\n' | '\r', _) => {
                i += 1;
                continue;
            }
            ('&', Some('&')) => (Tok::Op(Op::And), 2),
            ('|', Some('|')) => (Tok::Op(Op::Or), 2),
            ('=', Some('=')) => (Tok::Op(Op::Eq), 2),
            ('!', Some('=')) => (Tok::Op(Op::Ne), 2),
            ('<', Some('=')) => (Tok::Op(Op::Le), 2),
            ('>', Some('=')) => (Tok::Op(Op::Ge), 2),
            ('<', _) => (Tok::Op(Op::Lt), 1),
            ('>', _) => (Tok::Op(Op::Gt), 1),
            ('!', _) => (Tok::Bang, 1),
            ('+', _) => (Tok::Op(Op::Add), 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Op(Op::Mul), 1),
            ('/', _) => (Tok::Op(Op::Div), 1),
            ('%', _) => (Tok::Op(Op::Rem), 1),
            ('?', _) => (Tok::Question, 1),
            (':', _) => (Tok::Colon, 1),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            (',', _) => (Tok::Comma, 1),
            (d, _) if d.is_ascii_digit() || d == '.' => {
                let start = i;
                let mut j = i;
                while j < bytes.len() {
                    let ch = bytes[j] as char;
                    let exp_sign =
                        (ch == '+' || ch == '-') && j > start && matches!(bytes[j - 1], b'e' | b'E');
                    if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' || exp_sign {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let text = &input[start..j];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| Error::Expression(format!("'{input}': bad number '{text}'")))?;
                (Tok::Num(n), j - start)
            }
            (a, _) if a.is_ascii_alphabetic() || a == '_' => {
                let start = i;
                let mut j = i;
                while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                (Tok::Ident(input[start..j].to_string()), j - start)
            }
            (other, _) => {
                return Err(Error::Expression(format!("'{input}': unexpected character '{other}'")));
            }
        };
        out.push(tok);
        i += width;
    }
    Ok(out)
}

// ── Parser (precedence climbing) ───────────────────────────────

struct Parser<'a> {
    tokens: &'a [Tok],
    pos: usize,
    fields: Vec<String>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += usize::from(t.is_some());
        t
    }

    fn eat(&mut self, want: &Tok) -> Result<()> {
        match self.bump() {
            Some(t) if &t == want => Ok(()),
            got => Err(Error::Expression(format!("expected {want:?}, found {got:?}"))),
        }
    }

    fn ternary(&mut self) -> Result<Node> {
        let cond = self.binary(1)?;
        if self.peek() != Some(&Tok::Question) {
            return Ok(cond);
        }
        self.bump();
        let yes = self.ternary()?;
        self.eat(&Tok::Colon)?;
        let no = self.ternary()?;
        Ok(Node::Cond(Box::new(cond), Box::new(yes), Box::new(no)))
    }

    fn binary(&mut self, min_prec: u8) -> Result<Node> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) => *op,
                Some(Tok::Minus) => Op::Sub,
                _ => break,
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.bump();
            // Comparisons do not chain: `a < b < c` is rejected.
            let rhs = self.binary(prec + 1)?;
            if prec == 3
                && let Some(Tok::Op(next)) = self.peek()
                && next.precedence() == 3
            {
                return Err(Error::Expression("chained comparison".into()));
            }
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node> {
        match self.peek() {
            Some(Tok::Minus) => {
                self.bump();
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Tok::Bang) => {
                self.bump();
                Ok(Node::Not(Box::new(self.unary()?)))
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Node> {
        match self.bump() {
            Some(Tok::Num(n)) => Ok(Node::Const(n)),
            Some(Tok::LParen) => {
                let inner = self.ternary()?;
                self.eat(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Ident(name)) if self.peek() == Some(&Tok::LParen) => {
                let (func, arity) = Func::from_name(&name)
                    .ok_or_else(|| Error::Expression(format!("unknown function '{name}'")))?;
                self.bump();
                let mut args = vec![self.ternary()?];
                while self.peek() == Some(&Tok::Comma) {
                    self.bump();
                    args.push(self.ternary()?);
                }
                self.eat(&Tok::RParen)?;
                if args.len() != arity {
                    return Err(Error::Expression(format!(
                        "{name}() takes {arity} argument(s), got {}",
                        args.len()
                    )));
                }
                Ok(Node::Call(func, args))
            }
            Some(Tok::Ident(name)) => Ok(match name.as_str() {
                "true" => Node::Const(1.0),
                "false" => Node::Const(0.0),
                _ => {
                    let idx = match self.fields.iter().position(|f| *f == name) {
                        Some(i) => i,
                        None => {
                            self.fields.push(name);
                            self.fields.len() - 1
                        }
                    };
                    Node::Field(idx)
                }
            }),
            other => Err(Error::Expression(format!("expected operand, found {other:?}"))),
        }
    }
}
