//! Capture filter language.
//!
//! Expressions compare event fields against values and combine comparisons
//! with `and`, `or`, `not` and parentheses:
//!
//! ```text
//! evt.type = open and fd.name contains /etc
//! proc.name = nginx or proc.name = haproxy
//! not (evt.dir = < and evt.cpu > 2)
//! ```
//!
//! Compilation reports the byte position of the offending token; evaluation
//! is side-effect free. Field classes that only need thread-table context
//! are flagged so predicates can run against incomplete events.

use crate::error::{Result, SinspError};
use crate::event::Event;
use crate::fd_table::FdDesc;
use crate::threads::ThreadRecord;

/// Fields the language can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    EvtType,
    EvtDir,
    EvtNum,
    EvtCpu,
    ProcName,
    ProcPid,
    ThreadTid,
    FdNum,
    FdType,
    FdName,
    UserUid,
    ContainerId,
}

impl Field {
    fn parse(name: &str) -> Option<Field> {
        match name {
            "evt.type" => Some(Field::EvtType),
            "evt.dir" => Some(Field::EvtDir),
            "evt.num" => Some(Field::EvtNum),
            "evt.cpu" => Some(Field::EvtCpu),
            "proc.name" => Some(Field::ProcName),
            "proc.pid" => Some(Field::ProcPid),
            "thread.tid" => Some(Field::ThreadTid),
            "fd.num" => Some(Field::FdNum),
            "fd.type" => Some(Field::FdType),
            "fd.name" => Some(Field::FdName),
            "user.uid" => Some(Field::UserUid),
            "container.id" => Some(Field::ContainerId),
            _ => None,
        }
    }

    /// True when the field evaluates from thread-table (and FD) context
    /// alone, allowing evaluation against incomplete events.
    pub fn works_on_thread_table(self) -> bool {
        matches!(
            self,
            Field::ProcName
                | Field::ProcPid
                | Field::ThreadTid
                | Field::FdNum
                | Field::FdType
                | Field::FdName
                | Field::UserUid
                | Field::ContainerId
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Cmp {
        field: Field,
        op: CmpOp,
        value: String,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Context a predicate evaluates against. All references are scoped to one
/// inspector iteration.
#[derive(Clone, Copy, Default)]
pub struct FilterContext<'a> {
    pub event: Option<&'a Event>,
    pub thread: Option<&'a ThreadRecord>,
    pub fd: Option<&'a FdDesc>,
}

/// A compiled capture filter.
#[derive(Debug, Clone)]
pub struct Filter {
    expression: String,
    ast: Expr,
}

impl Filter {
    /// Compile an expression. Errors carry the byte position of the problem.
    pub fn compile(expression: &str) -> Result<Filter> {
        let tokens = lex(expression)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            input_len: expression.len(),
        };
        let ast = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(SinspError::FilterCompile {
                pos: tok.pos,
                message: format!("unexpected '{}'", tok.text),
            });
        }
        Ok(Filter {
            expression: expression.to_string(),
            ast,
        })
    }

    /// The source expression this filter was compiled from.
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// True when every referenced field works on thread-table context alone.
    pub fn works_on_thread_table(&self) -> bool {
        fn walk(expr: &Expr) -> bool {
            match expr {
                Expr::Cmp { field, .. } => field.works_on_thread_table(),
                Expr::And(a, b) | Expr::Or(a, b) => walk(a) && walk(b),
                Expr::Not(inner) => walk(inner),
            }
        }
        walk(&self.ast)
    }

    /// Evaluate against one enriched event. Side-effect free.
    pub fn evaluate(&self, ctx: &FilterContext<'_>) -> bool {
        eval(&self.ast, ctx)
    }
}

fn eval(expr: &Expr, ctx: &FilterContext<'_>) -> bool {
    match expr {
        Expr::And(a, b) => eval(a, ctx) && eval(b, ctx),
        Expr::Or(a, b) => eval(a, ctx) || eval(b, ctx),
        Expr::Not(inner) => !eval(inner, ctx),
        Expr::Cmp { field, op, value } => {
            let Some(actual) = field_value(*field, ctx) else {
                // Missing context never matches.
                return false;
            };
            compare(&actual, *op, value)
        }
    }
}

fn field_value(field: Field, ctx: &FilterContext<'_>) -> Option<String> {
    match field {
        Field::EvtType => ctx.event.map(|e| e.name().into_owned()),
        Field::EvtDir => ctx.event.map(|e| e.direction().symbol().to_string()),
        Field::EvtNum => ctx.event.map(|e| e.num().to_string()),
        Field::EvtCpu => ctx.event.map(|e| e.cpu().to_string()),
        Field::ProcName => ctx.thread.map(|t| t.comm.clone()),
        Field::ProcPid => ctx.thread.map(|t| t.pid.to_string()),
        Field::ThreadTid => ctx.thread.map(|t| t.tid.to_string()),
        Field::FdNum => ctx.fd.map(|fd| fd.fd.to_string()),
        Field::FdType => ctx.fd.map(|fd| fd.ftype.name().to_string()),
        Field::FdName => ctx.fd.map(|fd| match &fd.tuple {
            Some(tuple) => tuple.to_string(),
            None => fd.name.clone(),
        }),
        Field::UserUid => ctx.thread.map(|t| t.uid.to_string()),
        Field::ContainerId => ctx.thread.map(|t| t.container_id.clone()),
    }
}

fn compare(actual: &str, op: CmpOp, expected: &str) -> bool {
    if let (Ok(a), Ok(b)) = (actual.parse::<i64>(), expected.parse::<i64>()) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Contains => actual.contains(expected),
        };
    }
    match op {
        CmpOp::Eq => actual == expected,
        CmpOp::Ne => actual != expected,
        CmpOp::Lt => actual < expected,
        CmpOp::Le => actual <= expected,
        CmpOp::Gt => actual > expected,
        CmpOp::Ge => actual >= expected,
        CmpOp::Contains => actual.contains(expected),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident,
    Value,
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    pos: usize,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match c {
            '(' => {
                tokens.push(Token {
                    kind: TokenKind::LParen,
                    text: "(".into(),
                    pos: start,
                });
                i += 1;
            }
            ')' => {
                tokens.push(Token {
                    kind: TokenKind::RParen,
                    text: ")".into(),
                    pos: start,
                });
                i += 1;
            }
            '=' => {
                tokens.push(Token {
                    kind: TokenKind::Op(CmpOp::Eq),
                    text: "=".into(),
                    pos: start,
                });
                i += 1;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::Op(CmpOp::Ne),
                        text: "!=".into(),
                        pos: start,
                    });
                    i += 2;
                } else {
                    return Err(SinspError::FilterCompile {
                        pos: start,
                        message: "expected '=' after '!'".into(),
                    });
                }
            }
            '<' | '>' => {
                let (kind, len) = if bytes.get(i + 1) == Some(&b'=') {
                    (
                        if c == '<' {
                            TokenKind::Op(CmpOp::Le)
                        } else {
                            TokenKind::Op(CmpOp::Ge)
                        },
                        2,
                    )
                } else {
                    (
                        if c == '<' {
                            TokenKind::Op(CmpOp::Lt)
                        } else {
                            TokenKind::Op(CmpOp::Gt)
                        },
                        1,
                    )
                };
                tokens.push(Token {
                    kind,
                    text: input[start..start + len].to_string(),
                    pos: start,
                });
                i += len;
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let vstart = i;
                while i < bytes.len() && bytes[i] as char != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(SinspError::FilterCompile {
                        pos: start,
                        message: "unterminated string".into(),
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Value,
                    text: input[vstart..i].to_string(),
                    pos: start,
                });
                i += 1;
            }
            _ => {
                while i < bytes.len() {
                    let b = bytes[i] as char;
                    if b.is_whitespace() || "()=!<>".contains(b) {
                        break;
                    }
                    i += 1;
                }
                let word = &input[start..i];
                let kind = match word {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "contains" => TokenKind::Op(CmpOp::Contains),
                    _ => TokenKind::Ident,
                };
                tokens.push(Token {
                    kind,
                    text: word.to_string(),
                    pos: start,
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error_at_end(&self, message: &str) -> SinspError {
        SinspError::FilterCompile {
            pos: self.input_len,
            message: message.into(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::And)) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Not)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(tok) if tok.kind == TokenKind::RParen => Ok(inner),
                    Some(tok) => Err(SinspError::FilterCompile {
                        pos: tok.pos,
                        message: "expected ')'".into(),
                    }),
                    None => Err(self.error_at_end("expected ')'")),
                }
            }
            Some(_) => self.parse_comparison(),
            None => Err(self.error_at_end("expected expression")),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let field_tok = self
            .advance()
            .ok_or_else(|| self.error_at_end("expected field"))?;
        if field_tok.kind != TokenKind::Ident {
            return Err(SinspError::FilterCompile {
                pos: field_tok.pos,
                message: format!("expected field, found '{}'", field_tok.text),
            });
        }
        let field = Field::parse(&field_tok.text).ok_or(SinspError::FilterCompile {
            pos: field_tok.pos,
            message: format!("unknown field '{}'", field_tok.text),
        })?;

        let op = match self.advance() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) => op,
            Some(tok) => {
                return Err(SinspError::FilterCompile {
                    pos: tok.pos,
                    message: format!("expected operator, found '{}'", tok.text),
                })
            }
            None => return Err(self.error_at_end("expected operator")),
        };

        let value = match self.advance() {
            Some(Token {
                kind: TokenKind::Ident | TokenKind::Value,
                text,
                ..
            }) => text,
            Some(tok) => {
                return Err(SinspError::FilterCompile {
                    pos: tok.pos,
                    message: format!("expected value, found '{}'", tok.text),
                })
            }
            None => return Err(self.error_at_end("expected value")),
        };

        Ok(Expr::Cmp { field, op, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{codes, RawFrame};
    use crate::utils::tgidpid_from_parts;

    fn open_exit_event() -> Event {
        let mut evt = Event::default();
        evt.bind(
            RawFrame {
                ts: 1000,
                tgidpid: tgidpid_from_parts(100, 100),
                cpu: 3,
                etype: codes::OPEN | 1,
                params: vec![5i64.to_le_bytes().to_vec(), b"/etc/passwd\0".to_vec()],
            },
            42,
        );
        evt
    }

    #[test]
    fn compile_and_evaluate_simple_equality() {
        let filter = Filter::compile("evt.type = open").unwrap();
        let evt = open_exit_event();
        let ctx = FilterContext {
            event: Some(&evt),
            ..Default::default()
        };
        assert!(filter.evaluate(&ctx));

        let filter = Filter::compile("evt.type = close").unwrap();
        assert!(!filter.evaluate(&ctx));
    }

    #[test]
    fn numeric_comparison() {
        let evt = open_exit_event();
        let ctx = FilterContext {
            event: Some(&evt),
            ..Default::default()
        };
        assert!(Filter::compile("evt.cpu >= 3").unwrap().evaluate(&ctx));
        assert!(Filter::compile("evt.cpu < 4").unwrap().evaluate(&ctx));
        assert!(!Filter::compile("evt.num > 100").unwrap().evaluate(&ctx));
    }

    #[test]
    fn boolean_combinators_and_parens() {
        let evt = open_exit_event();
        let ctx = FilterContext {
            event: Some(&evt),
            ..Default::default()
        };
        let filter =
            Filter::compile("(evt.type = open or evt.type = openat) and not evt.cpu = 9")
                .unwrap();
        assert!(filter.evaluate(&ctx));
    }

    #[test]
    fn thread_and_fd_fields() {
        let evt = open_exit_event();
        let mut thread = ThreadRecord::new(100, 100, 1, 1000);
        thread.comm = "nginx".into();
        thread.uid = 33;
        let fd = FdDesc::with_name(5, crate::fd_table::FdType::File, "/etc/passwd");
        let ctx = FilterContext {
            event: Some(&evt),
            thread: Some(&thread),
            fd: Some(&fd),
        };

        assert!(Filter::compile("proc.name = nginx").unwrap().evaluate(&ctx));
        assert!(Filter::compile("fd.name contains /etc").unwrap().evaluate(&ctx));
        assert!(Filter::compile("fd.type = file").unwrap().evaluate(&ctx));
        assert!(Filter::compile("user.uid = 33").unwrap().evaluate(&ctx));
    }

    #[test]
    fn missing_context_never_matches() {
        let filter = Filter::compile("proc.name = nginx").unwrap();
        let evt = open_exit_event();
        let ctx = FilterContext {
            event: Some(&evt),
            ..Default::default()
        };
        assert!(!filter.evaluate(&ctx));
        // But a negation of a missing field does match.
        let filter = Filter::compile("not proc.name = nginx").unwrap();
        assert!(filter.evaluate(&ctx));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let filter = Filter::compile("evt.type = open").unwrap();
        let evt = open_exit_event();
        let ctx = FilterContext {
            event: Some(&evt),
            ..Default::default()
        };
        assert_eq!(filter.evaluate(&ctx), filter.evaluate(&ctx));
    }

    #[test]
    fn missing_value_error_points_past_operator() {
        let err = Filter::compile("evt.type = ").unwrap_err();
        match err {
            SinspError::FilterCompile { pos, .. } => assert_eq!(pos, 11),
            other => panic!("expected FilterCompile, got {other:?}"),
        }
    }

    #[test]
    fn unknown_field_error_points_at_field() {
        let err = Filter::compile("bogus.field = 1").unwrap_err();
        match err {
            SinspError::FilterCompile { pos, message } => {
                assert_eq!(pos, 0);
                assert!(message.contains("bogus.field"));
            }
            other => panic!("expected FilterCompile, got {other:?}"),
        }
    }

    #[test]
    fn works_on_thread_table_flags() {
        assert!(Filter::compile("proc.name = x and fd.num = 1")
            .unwrap()
            .works_on_thread_table());
        assert!(!Filter::compile("evt.type = open")
            .unwrap()
            .works_on_thread_table());
    }

    #[test]
    fn quoted_values() {
        let filter = Filter::compile("fd.name = \"/tmp/with space\"").unwrap();
        let fd = FdDesc::with_name(1, crate::fd_table::FdType::File, "/tmp/with space");
        let ctx = FilterContext {
            fd: Some(&fd),
            ..Default::default()
        };
        assert!(filter.evaluate(&ctx));
    }
}
