//! Expression evaluator behind `expr`, `if`, `while` and `for`.

use crate::error::Exception;
use crate::interp::Interp;
use crate::parser::{Parser, Part, Stop};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if let Some(i) = parse_int(trimmed) {
            return Self::Int(i);
        }
        if trimmed.chars().any(|c| c.is_ascii_digit()) {
            if let Ok(f) = trimmed.parse::<f64>() {
                return Self::Float(f);
            }
        }
        Self::Str(text.to_string())
    }

    fn as_bool(&self) -> Result<bool, Exception> {
        match self {
            Self::Int(i) => Ok(*i != 0),
            Self::Float(f) => Ok(*f != 0.0),
            Self::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Ok(true),
                "false" | "no" | "off" => Ok(false),
                _ => Err(Exception::error(format!(
                    "expected boolean value but got \"{}\"",
                    s
                ))),
            },
        }
    }

    fn is_numeric(&self) -> bool {
        !matches!(self, Self::Str(_))
    }

    fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
            Self::Str(_) => f64::NAN,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 => {
                write!(f, "{:.1}", x)
            }
            Self::Float(x) if x.is_infinite() => {
                f.write_str(if *x > 0.0 { "Inf" } else { "-Inf" })
            }
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Parse an integer literal, accepting an optional sign and a `0x` prefix.
pub(crate) fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()?
    } else if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse::<i64>().ok()?
    } else {
        return None;
    };
    Some(if negative { value.wrapping_neg() } else { value })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    StrEq,
    StrNe,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::StrEq => "eq",
            Self::StrNe => "ne",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone)]
enum Node {
    Lit(Value),
    Var(String),
    Script(String),
    Quoted(Vec<Part>),
    Unary(UnOp, Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
}

struct ExprParser<'a> {
    source: &'a str,
    p: Parser,
}

impl<'a> ExprParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            p: Parser::new(source),
        }
    }

    fn syntax_error(&self) -> Exception {
        Exception::error(format!("syntax error in expression \"{}\"", self.source))
    }

    fn skip_ws(&mut self) {
        while self.p.peek().is_some_and(char::is_whitespace) {
            self.p.set_pos(self.p.pos() + 1);
        }
    }

    fn looking_at(&self, token: &str) -> bool {
        token
            .chars()
            .enumerate()
            .all(|(i, c)| self.p.peek_at(i) == Some(c))
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if !self.looking_at(token) {
            return false;
        }
        let len = token.chars().count();
        // Word operators must not run into an identifier.
        if token.chars().all(char::is_alphabetic)
            && self
                .p
                .peek_at(len)
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            return false;
        }
        self.p.set_pos(self.p.pos() + len);
        true
    }

    fn parse(mut self) -> Result<Node, Exception> {
        let node = self.ternary()?;
        self.skip_ws();
        if self.p.peek().is_some() {
            return Err(self.syntax_error());
        }
        Ok(node)
    }

    fn ternary(&mut self) -> Result<Node, Exception> {
        let cond = self.or()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.ternary()?;
        if !self.eat(":") {
            return Err(Exception::error(format!(
                "missing ':' in ternary expression \"{}\"",
                self.source
            )));
        }
        let otherwise = self.ternary()?;
        Ok(Node::Ternary(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn or(&mut self) -> Result<Node, Exception> {
        let mut left = self.and()?;
        while self.eat("||") {
            let right = self.and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, Exception> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            let right = self.equality()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Node, Exception> {
        let mut left = self.relational()?;
        loop {
            let op = if self.eat("==") {
                BinOp::Eq
            } else if self.eat("!=") {
                BinOp::Ne
            } else if self.eat("eq") {
                BinOp::StrEq
            } else if self.eat("ne") {
                BinOp::StrNe
            } else {
                return Ok(left);
            };
            let right = self.relational()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn relational(&mut self) -> Result<Node, Exception> {
        let mut left = self.additive()?;
        loop {
            let op = if self.eat("<=") {
                BinOp::Le
            } else if self.eat(">=") {
                BinOp::Ge
            } else if self.eat("<") {
                BinOp::Lt
            } else if self.eat(">") {
                BinOp::Gt
            } else {
                return Ok(left);
            };
            let right = self.additive()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Node, Exception> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinOp::Add
            } else if self.eat("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.multiplicative()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Node, Exception> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat("*") {
                BinOp::Mul
            } else if self.eat("/") {
                BinOp::Div
            } else if self.eat("%") {
                BinOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Node, Exception> {
        let op = if self.eat("-") {
            UnOp::Neg
        } else if self.eat("+") {
            UnOp::Plus
        } else if self.eat("!") {
            UnOp::Not
        } else {
            return self.primary();
        };
        Ok(Node::Unary(op, Box::new(self.unary()?)))
    }

    fn primary(&mut self) -> Result<Node, Exception> {
        self.skip_ws();
        let Some(c) = self.p.peek() else {
            return Err(Exception::error(format!(
                "missing operand in expression \"{}\"",
                self.source
            )));
        };

        match c {
            '(' => {
                self.p.set_pos(self.p.pos() + 1);
                let inner = self.ternary()?;
                if !self.eat(")") {
                    return Err(Exception::error(format!(
                        "unbalanced parentheses in expression \"{}\"",
                        self.source
                    )));
                }
                Ok(inner)
            }
            '$' => match self.p.parse_var_name()? {
                Some(name) => Ok(Node::Var(name)),
                None => Err(self.syntax_error()),
            },
            '[' => Ok(Node::Script(self.p.parse_bracketed()?)),
            '"' => {
                self.p.set_pos(self.p.pos() + 1);
                Ok(Node::Quoted(self.p.parse_parts(Stop::Char('"'))?))
            }
            '{' => Ok(Node::Lit(Value::from_text(&self.p.parse_braced()?))),
            c if c.is_ascii_digit() || c == '.' => self.number(),
            c if c.is_alphabetic() => {
                let mut word = String::new();
                while let Some(c) = self.p.peek().filter(|c| c.is_alphanumeric()) {
                    word.push(c);
                    self.p.set_pos(self.p.pos() + 1);
                }
                let value = Value::Str(word.clone());
                if value.as_bool().is_ok() {
                    Ok(Node::Lit(value))
                } else {
                    Err(Exception::error(format!(
                        "invalid bare word \"{}\" in expression \"{}\"",
                        word, self.source
                    )))
                }
            }
            _ => Err(self.syntax_error()),
        }
    }

    fn number(&mut self) -> Result<Node, Exception> {
        let mut text = String::new();
        let mut prev = '\0';
        while let Some(c) = self.p.peek() {
            let accept = c.is_ascii_alphanumeric()
                || c == '.'
                || ((c == '+' || c == '-') && matches!(prev, 'e' | 'E') && !text.starts_with("0x"));
            if !accept {
                break;
            }
            text.push(c);
            prev = c;
            self.p.set_pos(self.p.pos() + 1);
        }
        match Value::from_text(&text) {
            Value::Str(_) => Err(Exception::error(format!(
                "invalid number \"{}\" in expression \"{}\"",
                text, self.source
            ))),
            number => Ok(Node::Lit(number)),
        }
    }
}

fn non_numeric(op: &str) -> Exception {
    Exception::error(format!(
        "can't use non-numeric string as operand of \"{}\"",
        op
    ))
}

fn eval_node(interp: &Interp, node: &Node) -> Result<Value, Exception> {
    match node {
        Node::Lit(v) => Ok(v.clone()),
        Node::Var(name) => Ok(Value::from_text(&interp.read_var(name)?)),
        Node::Script(script) => Ok(Value::from_text(&interp.eval_script(script)?)),
        Node::Quoted(parts) => Ok(Value::from_text(&interp.subst_parts(parts)?)),
        Node::Unary(op, operand) => {
            let v = eval_node(interp, operand)?;
            match (op, v) {
                (UnOp::Not, v) => Ok(Value::Int(i64::from(!v.as_bool()?))),
                (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
                (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                (UnOp::Plus, v) if v.is_numeric() => Ok(v),
                (UnOp::Neg, _) => Err(non_numeric("-")),
                (UnOp::Plus, _) => Err(non_numeric("+")),
            }
        }
        Node::And(left, right) => {
            let result =
                eval_node(interp, left)?.as_bool()? && eval_node(interp, right)?.as_bool()?;
            Ok(Value::Int(i64::from(result)))
        }
        Node::Or(left, right) => {
            let result =
                eval_node(interp, left)?.as_bool()? || eval_node(interp, right)?.as_bool()?;
            Ok(Value::Int(i64::from(result)))
        }
        Node::Ternary(cond, then, otherwise) => {
            if eval_node(interp, cond)?.as_bool()? {
                eval_node(interp, then)
            } else {
                eval_node(interp, otherwise)
            }
        }
        Node::Binary(op, left, right) => {
            let l = eval_node(interp, left)?;
            let r = eval_node(interp, right)?;
            binary(*op, l, r)
        }
    }
}

fn compare(l: &Value, r: &Value) -> Ordering {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        _ if l.is_numeric() && r.is_numeric() => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => l.to_string().cmp(&r.to_string()),
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, Exception> {
    let truth = |b: bool| Ok(Value::Int(i64::from(b)));
    match op {
        BinOp::StrEq => return truth(l.to_string() == r.to_string()),
        BinOp::StrNe => return truth(l.to_string() != r.to_string()),
        BinOp::Eq => return truth(compare(&l, &r) == Ordering::Equal),
        BinOp::Ne => return truth(compare(&l, &r) != Ordering::Equal),
        BinOp::Lt => return truth(compare(&l, &r) == Ordering::Less),
        BinOp::Gt => return truth(compare(&l, &r) == Ordering::Greater),
        BinOp::Le => return truth(compare(&l, &r) != Ordering::Greater),
        BinOp::Ge => return truth(compare(&l, &r) != Ordering::Less),
        _ => {}
    }

    if !l.is_numeric() || !r.is_numeric() {
        return Err(non_numeric(op.symbol()));
    }

    match (l, r) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => Ok(Value::Int(a.wrapping_add(b))),
            BinOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
            BinOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
            BinOp::Div | BinOp::Rem if b == 0 => Err(Exception::error("divide by zero")),
            // Integer division rounds toward negative infinity.
            BinOp::Div => {
                let q = a.wrapping_div_euclid(b);
                let adjust = b < 0 && a.wrapping_rem_euclid(b) != 0;
                Ok(Value::Int(q - i64::from(adjust)))
            }
            BinOp::Rem => {
                let m = a.wrapping_rem_euclid(b);
                Ok(Value::Int(if b < 0 && m != 0 { m + b } else { m }))
            }
            _ => Err(non_numeric(op.symbol())),
        },
        (l, r) => {
            let (a, b) = (l.as_f64(), r.as_f64());
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div if b == 0.0 => Err(Exception::error("divide by zero")),
                BinOp::Div => Ok(Value::Float(a / b)),
                BinOp::Rem => Err(Exception::error(
                    "can't use floating-point value as operand of \"%\"",
                )),
                _ => Err(non_numeric(op.symbol())),
            }
        }
    }
}

/// Evaluate an expression and return its value as text.
pub(crate) fn eval_expr(interp: &Interp, text: &str) -> Result<String, Exception> {
    let node = ExprParser::new(text).parse()?;
    Ok(eval_node(interp, &node)?.to_string())
}

/// Evaluate an expression as a condition.
pub(crate) fn eval_bool(interp: &Interp, text: &str) -> Result<bool, Exception> {
    let node = ExprParser::new(text).parse()?;
    eval_node(interp, &node)?.as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp() -> Interp {
        crate::initialize();
        Interp::new().unwrap()
    }

    #[test]
    fn test_arithmetic_precedence() {
        let i = interp();
        assert_eq!(eval_expr(&i, "1 + 2").unwrap(), "3");
        assert_eq!(eval_expr(&i, "1 + 2 * 3").unwrap(), "7");
        assert_eq!(eval_expr(&i, "(1 + 2) * 3").unwrap(), "9");
        assert_eq!(eval_expr(&i, "-7 / 2").unwrap(), "-4");
        assert_eq!(eval_expr(&i, "-7 % 2").unwrap(), "1");
        assert_eq!(eval_expr(&i, "1.5 + 1").unwrap(), "2.5");
        assert_eq!(eval_expr(&i, "2.0 * 2").unwrap(), "4.0");
        assert_eq!(eval_expr(&i, "0x10 + 1").unwrap(), "17");
    }

    #[test]
    fn test_comparisons_and_logic() {
        let i = interp();
        assert_eq!(eval_expr(&i, "3 > 2 && 1 <= 1").unwrap(), "1");
        assert_eq!(eval_expr(&i, "!1 || 0").unwrap(), "0");
        assert_eq!(eval_expr(&i, "\"abc\" eq {abc}").unwrap(), "1");
        assert_eq!(eval_expr(&i, "10 == 10.0").unwrap(), "1");
        assert_eq!(eval_expr(&i, "1 ? {yes} : {no}").unwrap(), "yes");
    }

    #[test]
    fn test_variables_and_commands() {
        let i = interp();
        i.set_var("x", "4").unwrap();
        assert_eq!(eval_expr(&i, "$x * [set x]").unwrap(), "16");
        assert!(eval_bool(&i, "$x > 3").unwrap());
    }

    #[test]
    fn test_short_circuit_skips_right_operand() {
        let i = interp();
        assert_eq!(eval_expr(&i, "0 && [error boom]").unwrap(), "0");
        assert_eq!(eval_expr(&i, "1 || [error boom]").unwrap(), "1");
    }

    #[test]
    fn test_errors() {
        let i = interp();
        assert_eq!(eval_expr(&i, "1 / 0").unwrap_err().value, "divide by zero");
        assert!(eval_expr(&i, "1 +").is_err());
        assert!(eval_expr(&i, "foo + 1").is_err());
        assert!(eval_expr(&i, "{a} + 1").is_err());
        assert!(eval_expr(&i, "(1 + 2").is_err());
    }
}
