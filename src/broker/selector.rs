//! Message selector evaluation for the in-memory broker.
//!
//! Supports the commonly used subset of SQL-92 selectors: comparisons
//! (`= <> < > <= >=`) between identifiers and string, numeric or boolean
//! literals, `IS [NOT] NULL`, `AND`, `OR`, `NOT` and parentheses.
//! Evaluation is three-valued: a comparison against a missing property is
//! unknown, and only a `true` result selects the message.

use super::{BrokerError, BrokerMessage, DeliveryMode};
use crate::message::PropertyValue;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(Cmp),
    LParen,
    RParen,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Cmp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Ident(String),
    Literal(Value),
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Operand, Cmp, Operand),
    IsNull(Operand, bool),
    Literal(bool),
}

/// A parsed selector expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    source: String,
    expr: Expr,
}

impl Selector {
    /// Parse `source`, failing with [`BrokerError::InvalidSelector`].
    pub fn parse(source: &str) -> Result<Self, BrokerError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(invalid(format!("unexpected {:?} in '{}'", token, source)));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the selector evaluates to `true` for `message`.
    pub fn matches(&self, message: &BrokerMessage) -> bool {
        eval(&self.expr, message) == Some(true)
    }
}

fn invalid(msg: String) -> BrokerError {
    BrokerError::InvalidSelector(msg)
}

fn tokenize(source: &str) -> Result<Vec<Token>, BrokerError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(Cmp::Eq));
                i += 1;
            }
            '<' => match chars.get(i + 1) {
                Some('>') => {
                    tokens.push(Token::Op(Cmp::Ne));
                    i += 2;
                }
                Some('=') => {
                    tokens.push(Token::Op(Cmp::Le));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(Cmp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(Cmp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(Cmp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(invalid(format!("unterminated string in '{}'", source))),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| invalid(format!("bad number '{}' in '{}'", text, source)))?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(invalid(format!("unexpected character '{}' in '{}'", other, source)))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn or(&mut self) -> Result<Expr, BrokerError> {
        let mut left = self.and()?;
        while self.keyword("OR") {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, BrokerError> {
        let mut left = self.not()?;
        while self.keyword("AND") {
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, BrokerError> {
        if self.keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, BrokerError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let expr = self.or()?;
            return match self.next() {
                Some(Token::RParen) => Ok(expr),
                other => Err(invalid(format!("expected ')' but found {:?}", other))),
            };
        }

        let left = self.operand()?;
        if self.keyword("IS") {
            let negated = self.keyword("NOT");
            if !self.keyword("NULL") {
                return Err(invalid("expected NULL after IS".into()));
            }
            return Ok(Expr::IsNull(left, negated));
        }

        match self.peek() {
            Some(Token::Op(cmp)) => {
                let cmp = *cmp;
                self.pos += 1;
                let right = self.operand()?;
                Ok(Expr::Compare(left, cmp, right))
            }
            _ => match left {
                Operand::Literal(Value::Bool(b)) => Ok(Expr::Literal(b)),
                other => Err(invalid(format!("expected comparison after {:?}", other))),
            },
        }
    }

    fn operand(&mut self) -> Result<Operand, BrokerError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::Str(s))),
            Some(Token::Num(n)) => Ok(Operand::Literal(Value::Num(n))),
            Some(Token::Ident(ident)) => {
                if ident.eq_ignore_ascii_case("TRUE") {
                    Ok(Operand::Literal(Value::Bool(true)))
                } else if ident.eq_ignore_ascii_case("FALSE") {
                    Ok(Operand::Literal(Value::Bool(false)))
                } else if ["AND", "OR", "NOT", "IS", "NULL"]
                    .iter()
                    .any(|kw| ident.eq_ignore_ascii_case(kw))
                {
                    Err(invalid(format!("unexpected keyword {}", ident)))
                } else {
                    Ok(Operand::Ident(ident))
                }
            }
            other => Err(invalid(format!("expected operand but found {:?}", other))),
        }
    }
}

fn resolve(operand: &Operand, message: &BrokerMessage) -> Option<Value> {
    let name = match operand {
        Operand::Literal(value) => return Some(value.clone()),
        Operand::Ident(name) => name.as_str(),
    };

    match name {
        "JMSPriority" => return Some(Value::Num(message.priority as f64)),
        "JMSTimestamp" => return Some(Value::Num(message.timestamp as f64)),
        "JMSMessageID" => return Some(Value::Str(message.message_id.clone())),
        "JMSDeliveryMode" => {
            let mode = match message.delivery_mode {
                DeliveryMode::Persistent => "PERSISTENT",
                DeliveryMode::NonPersistent => "NON_PERSISTENT",
            };
            return Some(Value::Str(mode.into()));
        }
        "JMSType" => return message.message_type.clone().map(Value::Str),
        "JMSCorrelationID" => return message.correlation_id.clone().map(Value::Str),
        _ => {}
    }

    message.property(name).map(|value| match value {
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Int(i) => Value::Num(*i as f64),
        PropertyValue::Float(f) => Value::Num(*f),
        PropertyValue::String(s) => Value::Str(s.clone()),
    })
}

fn compare(left: &Value, cmp: Cmp, right: &Value) -> Option<bool> {
    match (left, right) {
        (Value::Num(a), Value::Num(b)) => Some(match cmp {
            Cmp::Eq => a == b,
            Cmp::Ne => a != b,
            Cmp::Lt => a < b,
            Cmp::Gt => a > b,
            Cmp::Le => a <= b,
            Cmp::Ge => a >= b,
        }),
        (Value::Str(a), Value::Str(b)) => match cmp {
            Cmp::Eq => Some(a == b),
            Cmp::Ne => Some(a != b),
            _ => None,
        },
        (Value::Bool(a), Value::Bool(b)) => match cmp {
            Cmp::Eq => Some(a == b),
            Cmp::Ne => Some(a != b),
            _ => None,
        },
        _ => None,
    }
}

fn eval(expr: &Expr, message: &BrokerMessage) -> Option<bool> {
    match expr {
        Expr::Literal(b) => Some(*b),
        Expr::Not(inner) => eval(inner, message).map(|b| !b),
        Expr::And(left, right) => match (eval(left, message), eval(right, message)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Expr::Or(left, right) => match (eval(left, message), eval(right, message)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Expr::IsNull(operand, negated) => {
            let is_null = resolve(operand, message).is_none();
            Some(is_null != *negated)
        }
        Expr::Compare(left, cmp, right) => {
            let left = resolve(left, message)?;
            let right = resolve(right, message)?;
            compare(&left, *cmp, &right)
        }
    }
}
