//! Filter expressions used by predicate pushdown.
//!
//! The pipeline core treats expressions as opaque values except for the
//! distinguished trivially-true constant. This module additionally provides a
//! small textual syntax and a row evaluator so filters can be written in
//! pipeline definitions and applied by `where` and by sources that accept a
//! pushed-down filter:
//!
//! ```text
//! #schema == "zeek.conn" && (port > 1024 || proto != "tcp") && !(host == null)
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::types::{EventBatch, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    const TOKENS: [(&'static str, CmpOp); 6] = [
        ("==", CmpOp::Eq),
        ("!=", CmpOp::Ne),
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn holds(self, ord: Option<Ordering>) -> bool {
        match self {
            CmpOp::Eq => ord == Some(Ordering::Equal),
            CmpOp::Ne => ord != Some(Ordering::Equal),
            CmpOp::Lt => ord == Some(Ordering::Less),
            CmpOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            CmpOp::Gt => ord == Some(Ordering::Greater),
            CmpOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// Left-hand side of a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// A top-level field of the event.
    Field(String),
    /// The `#schema` meta extractor: the name of the event's schema.
    Schema,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':')
}

/// Field names that are not a plain word are written in backticks.
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(name) if !name.is_empty() && name.chars().all(is_word_char) => {
                f.write_str(name)
            }
            Operand::Field(name) => write_quoted(f, name, '`'),
            Operand::Schema => f.write_str("#schema"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Expression {
    /// Matches everything.
    True,
    Predicate {
        lhs: Operand,
        op: CmpOp,
        rhs: Scalar,
    },
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
}

impl Default for Expression {
    fn default() -> Self {
        Expression::True
    }
}

impl Expression {
    /// The distinguished expression that every event satisfies. Operators that
    /// do not carry events receive and return this in `optimize`.
    pub fn trivially_true() -> Self {
        Expression::True
    }

    pub fn is_trivially_true(&self) -> bool {
        match self {
            Expression::True => true,
            Expression::And(xs) => xs.iter().all(Expression::is_trivially_true),
            _ => false,
        }
    }

    pub fn predicate(field: impl Into<String>, op: CmpOp, rhs: Scalar) -> Self {
        Expression::Predicate {
            lhs: Operand::Field(field.into()),
            op,
            rhs,
        }
    }

    /// `lhs && rhs`, eliding trivially-true sides and flattening nested
    /// conjunctions.
    pub fn and(lhs: Expression, rhs: Expression) -> Expression {
        if lhs.is_trivially_true() {
            return rhs;
        }
        if rhs.is_trivially_true() {
            return lhs;
        }
        let mut parts = Vec::new();
        for side in [lhs, rhs] {
            match side {
                Expression::And(xs) => parts.extend(xs),
                other => parts.push(other),
            }
        }
        Expression::And(parts)
    }

    /// Field names referenced anywhere in the expression.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::True => {}
            Expression::Predicate { lhs, .. } => {
                if let Operand::Field(name) = lhs {
                    out.push(name);
                }
            }
            Expression::And(xs) | Expression::Or(xs) => {
                xs.iter().for_each(|x| x.collect_fields(out));
            }
            Expression::Not(x) => x.collect_fields(out),
        }
    }

    /// Bind field names to column positions of `schema`.
    pub fn resolve(&self, schema: &Schema) -> Resolved {
        let node = match self {
            Expression::True => Node::True,
            Expression::Predicate { lhs, op, rhs } => {
                let operand = match lhs {
                    Operand::Schema => Bound::Constant(Scalar::Str(schema.name.clone())),
                    Operand::Field(name) => match schema.index_of(name) {
                        Some(idx) => Bound::Column(idx),
                        None => Bound::Missing(name.clone()),
                    },
                };
                Node::Predicate {
                    operand,
                    op: *op,
                    rhs: rhs.clone(),
                }
            }
            Expression::And(xs) => Node::And(xs.iter().map(|x| x.resolve(schema).0).collect()),
            Expression::Or(xs) => Node::Or(xs.iter().map(|x| x.resolve(schema).0).collect()),
            Expression::Not(x) => Node::Not(Box::new(x.resolve(schema).0)),
        };
        Resolved(node)
    }

    /// Evaluate against every row of `batch`.
    pub fn evaluate(&self, batch: &EventBatch) -> Vec<bool> {
        self.resolve(&batch.schema).evaluate(batch)
    }

    /// Rows of `batch` that satisfy the expression.
    pub fn filter(&self, batch: &EventBatch) -> EventBatch {
        if self.is_trivially_true() {
            return batch.clone();
        }
        batch.filter_rows(&self.evaluate(batch))
    }
}

/// An expression bound to one schema.
#[derive(Debug, Clone)]
pub struct Resolved(Node);

#[derive(Debug, Clone)]
enum Node {
    True,
    Predicate { operand: Bound, op: CmpOp, rhs: Scalar },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

#[derive(Debug, Clone)]
enum Bound {
    Column(usize),
    Constant(Scalar),
    // Missing fields evaluate as null.
    Missing(String),
}

impl Resolved {
    /// Field names that do not exist in the schema this was resolved against.
    pub fn unresolved_fields(&self) -> Vec<String> {
        fn walk(node: &Node, out: &mut Vec<String>) {
            match node {
                Node::True => {}
                Node::Predicate { operand, .. } => {
                    if let Bound::Missing(name) = operand {
                        out.push(name.clone());
                    }
                }
                Node::And(xs) | Node::Or(xs) => xs.iter().for_each(|x| walk(x, out)),
                Node::Not(x) => walk(x, out),
            }
        }
        let mut out = Vec::new();
        walk(&self.0, &mut out);
        out.sort();
        out.dedup();
        out
    }

    pub fn evaluate(&self, batch: &EventBatch) -> Vec<bool> {
        (0..batch.rows())
            .map(|row| eval_node(&self.0, batch, row))
            .collect()
    }
}

fn eval_node(node: &Node, batch: &EventBatch, row: usize) -> bool {
    match node {
        Node::True => true,
        Node::Predicate { operand, op, rhs } => {
            let null = Scalar::Null;
            let lhs = match operand {
                Bound::Column(idx) => &batch.columns[*idx].values[row],
                Bound::Constant(value) => value,
                Bound::Missing(_) => &null,
            };
            op.holds(lhs.partial_compare(rhs))
        }
        Node::And(xs) => xs.iter().all(|x| eval_node(x, batch, row)),
        Node::Or(xs) => xs.iter().any(|x| eval_node(x, batch, row)),
        Node::Not(x) => !eval_node(x, batch, row),
    }
}

// --- printing ---

fn write_literal(f: &mut fmt::Formatter<'_>, value: &Scalar) -> fmt::Result {
    match value {
        Scalar::Null => f.write_str("null"),
        Scalar::Bool(b) => write!(f, "{b}"),
        Scalar::I64(i) => write!(f, "{i}"),
        Scalar::F64(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
        Scalar::F64(x) => write!(f, "{x}"),
        Scalar::Str(s) => write_quoted(f, s, '"'),
        Scalar::Bin(b) => {
            f.write_str("b\"")?;
            for byte in b {
                write!(f, "\\x{byte:02x}")?;
            }
            f.write_str("\"")
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str, delim: char) -> fmt::Result {
    write!(f, "{delim}")?;
    for c in text.chars() {
        if c == delim || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    write!(f, "{delim}")
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::True => f.write_str("true"),
            Expression::Predicate { lhs, op, rhs } => {
                write!(f, "{} {} ", lhs, op.symbol())?;
                write_literal(f, rhs)
            }
            Expression::And(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" && ")?;
                    }
                    if matches!(x, Expression::Or(_)) {
                        write!(f, "({x})")?;
                    } else {
                        write!(f, "{x}")?;
                    }
                }
                Ok(())
            }
            Expression::Or(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" || ")?;
                    }
                    write!(f, "{x}")?;
                }
                Ok(())
            }
            Expression::Not(x) => write!(f, "!({x})"),
        }
    }
}

impl From<Expression> for String {
    fn from(e: Expression) -> Self {
        e.to_string()
    }
}

impl TryFrom<String> for Expression {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

// --- parsing ---

impl FromStr for Expression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parser = Parser { src: s, pos: 0 };
        let expr = parser.disjunction()?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::Expression {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn disjunction(&mut self) -> Result<Expression> {
        let mut parts = vec![self.conjunction()?];
        while self.eat("||") {
            parts.push(self.conjunction()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expression::Or(parts)
        })
    }

    fn conjunction(&mut self) -> Result<Expression> {
        let mut parts = vec![self.unary()?];
        while self.eat("&&") {
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expression::And(parts)
        })
    }

    fn unary(&mut self) -> Result<Expression> {
        self.skip_ws();
        if self.rest().starts_with("!=") {
            return Err(self.error("expected expression"));
        }
        if self.eat("!") {
            return Ok(Expression::Not(Box::new(self.unary()?)));
        }
        if self.eat("(") {
            let inner = self.disjunction()?;
            if !self.eat(")") {
                return Err(self.error("expected `)`"));
            }
            return Ok(inner);
        }
        let lhs = self.operand()?;
        self.skip_ws();
        if matches!(lhs, Operand::Field(ref name) if name == "true") && !self.at_cmp_op() {
            return Ok(Expression::True);
        }
        let op = self.cmp_op()?;
        let rhs = self.literal()?;
        Ok(Expression::Predicate { lhs, op, rhs })
    }

    fn at_cmp_op(&self) -> bool {
        CmpOp::TOKENS.iter().any(|(t, _)| self.rest().starts_with(t))
    }

    fn operand(&mut self) -> Result<Operand> {
        self.skip_ws();
        if self.eat("#schema") {
            return Ok(Operand::Schema);
        }
        if self.eat("`") {
            return Ok(Operand::Field(self.quoted('`', "field name")?));
        }
        let ident = self.word();
        if ident.is_empty() {
            return Err(self.error("expected field name"));
        }
        Ok(Operand::Field(ident.to_string()))
    }

    fn word(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_word_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    /// Text up to the closing `delim`, which is consumed. A backslash
    /// escapes the next character.
    fn quoted(&mut self, delim: char, what: &str) -> Result<String> {
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            if c == delim {
                self.pos += i + c.len_utf8();
                return Ok(out);
            }
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                other => out.push(other),
            }
        }
        Err(self.error(&format!("unterminated {what}")))
    }

    /// Body of a `b"..."` literal: `\xNN` is one byte, anything else its
    /// UTF-8 encoding.
    fn bytes(&mut self) -> Result<Vec<u8>> {
        let rest = self.rest();
        let mut out = Vec::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((j, 'x')) => {
                        let hex = rest
                            .get(j + 1..j + 3)
                            .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))
                            .ok_or_else(|| self.error("invalid byte escape"))?;
                        let byte = u8::from_str_radix(hex, 16)
                            .map_err(|_| self.error("invalid byte escape"))?;
                        out.push(byte);
                        chars.next();
                        chars.next();
                    }
                    Some((_, escaped)) => {
                        let mut buf = [0; 4];
                        out.extend_from_slice(escaped.encode_utf8(&mut buf).as_bytes());
                    }
                    None => break,
                },
                other => {
                    let mut buf = [0; 4];
                    out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        Err(self.error("unterminated byte literal"))
    }

    fn cmp_op(&mut self) -> Result<CmpOp> {
        self.skip_ws();
        for (token, op) in CmpOp::TOKENS {
            if self.eat(token) {
                return Ok(op);
            }
        }
        Err(self.error("expected comparison operator"))
    }

    fn literal(&mut self) -> Result<Scalar> {
        self.skip_ws();
        if self.eat("\"") {
            return Ok(Scalar::Str(self.quoted('"', "string literal")?));
        }
        if self.eat("b\"") {
            return Ok(Scalar::Bin(self.bytes()?));
        }
        let word = self.word();
        match word {
            "" => Err(self.error("expected literal")),
            "null" => Ok(Scalar::Null),
            "true" => Ok(Scalar::Bool(true)),
            "false" => Ok(Scalar::Bool(false)),
            _ => {
                if let Ok(i) = word.parse::<i64>() {
                    Ok(Scalar::I64(i))
                } else if let Ok(x) = word.parse::<f64>() {
                    Ok(Scalar::F64(x))
                } else {
                    Ok(Scalar::Str(word.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field};

    fn batch() -> EventBatch {
        let schema = Schema::new(
            "zeek.conn",
            vec![
                Field::new("port", DataType::Int64, false),
                Field::new("proto", DataType::Utf8, false),
            ],
        );
        EventBatch::from_rows(
            schema,
            vec![
                vec![Scalar::I64(22), Scalar::Str("tcp".into())],
                vec![Scalar::I64(53), Scalar::Str("udp".into())],
                vec![Scalar::I64(8080), Scalar::Str("tcp".into())],
            ],
        )
        .unwrap()
    }

    #[test]
    fn parse_and_print_round_trip() {
        let src = r#"#schema == "zeek.conn" && (port > 1024 || proto != "tcp") && !(port == 0)"#;
        let expr: Expression = src.parse().unwrap();
        assert_eq!(expr.to_string(), src);
        let again: Expression = expr.to_string().parse().unwrap();
        assert_eq!(again, expr);
    }

    #[test]
    fn bare_true_is_trivially_true() {
        let expr: Expression = "true".parse().unwrap();
        assert!(expr.is_trivially_true());
        let expr: Expression = "true == false".parse().unwrap();
        assert!(!expr.is_trivially_true());
    }

    #[test]
    fn parse_errors_carry_offset() {
        let err = "port >".parse::<Expression>().unwrap_err();
        assert!(matches!(err, Error::Expression { offset: 6, .. }));
        assert!("port > 1 )".parse::<Expression>().is_err());
        assert!("(port > 1".parse::<Expression>().is_err());
    }

    #[test]
    fn and_elides_true_and_flattens() {
        let a = Expression::predicate("a", CmpOp::Eq, Scalar::I64(1));
        let b = Expression::predicate("b", CmpOp::Eq, Scalar::I64(2));
        assert_eq!(Expression::and(Expression::True, a.clone()), a);
        let ab = Expression::and(a.clone(), b.clone());
        let abc = Expression::and(ab, Expression::predicate("c", CmpOp::Lt, Scalar::F64(0.5)));
        assert!(matches!(abc, Expression::And(ref xs) if xs.len() == 3));
        assert_eq!(abc.fields(), vec!["a", "b", "c"]);
    }

    #[test]
    fn evaluates_rows() {
        let expr: Expression = r#"port > 50 && proto == "tcp""#.parse().unwrap();
        assert_eq!(expr.evaluate(&batch()), vec![false, false, true]);
        let expr: Expression = r#"#schema == "zeek.conn""#.parse().unwrap();
        assert_eq!(expr.filter(&batch()).rows(), 3);
        let expr: Expression = r#"#schema == "suricata.alert""#.parse().unwrap();
        assert!(expr.filter(&batch()).is_empty());
    }

    #[test]
    fn missing_fields_evaluate_as_null() {
        let expr: Expression = "missing == null || port < 0".parse().unwrap();
        let resolved = expr.resolve(&batch().schema);
        assert_eq!(resolved.unresolved_fields(), vec!["missing".to_string()]);
        assert_eq!(resolved.evaluate(&batch()), vec![true, true, true]);
    }

    #[test]
    fn serde_uses_text_form() {
        let expr: Expression = "port >= 1.5".parse().unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, "\"port >= 1.5\"");
        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
    }

    #[test]
    fn quoted_fields_and_bytes_round_trip() {
        let expr = Expression::and(
            Expression::predicate("src ip", CmpOp::Eq, Scalar::Str("10.0.0.1".into())),
            Expression::and(
                Expression::predicate("payload", CmpOp::Ne, Scalar::Bin(vec![0x00, 0x7f, 0xff])),
                Expression::predicate("odd`name\\", CmpOp::Lt, Scalar::I64(3)),
            ),
        );
        let text = expr.to_string();
        assert_eq!(
            text,
            r#"`src ip` == "10.0.0.1" && payload != b"\x00\x7f\xff" && `odd\`name\\` < 3"#
        );
        assert_eq!(text.parse::<Expression>().unwrap(), expr);

        let meta_lookalike = Expression::predicate("#schema", CmpOp::Eq, Scalar::Null);
        assert_eq!(meta_lookalike.to_string(), "`#schema` == null");
        assert_eq!(meta_lookalike.to_string().parse::<Expression>().unwrap(), meta_lookalike);

        assert!("x == b\"\\x4\"".parse::<Expression>().is_err());
        assert!("`open == 1".parse::<Expression>().is_err());
    }
}
