//! Recursive-descent parser.
//!
//! ```text
//! or      := and ('||' and)*
//! and     := cmp ('&&' cmp)*
//! cmp     := unary (cmp_op unary)?
//! unary   := '!' unary | primary
//! primary := '(' or ')' | 'true' | 'false' | name '(' ')' | path | string | number
//! ```

use super::ExpressionError;
use super::lexer::{Spanned, Token, tokenize};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Status-aggregate builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Every recorded job completed or was skipped.
    Success,
    /// Some recorded job failed.
    Failure,
    /// Always true.
    Always,
    /// Some recorded job was cancelled.
    Cancelled,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "always" => Some(Self::Always),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Bool(bool),
    Call(Builtin),
    /// Variable path or bare word.
    Path(String),
    Str(String),
    /// Numeric literal as written.
    Number(String),
}

/// Parses expression text (without the `${{ }}` wrapper).
///
/// # Errors
///
/// Returns the first lexical or syntax error.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(extra) => Err(unexpected(extra)),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

fn unexpected(spanned: &Spanned) -> ExpressionError {
    ExpressionError::UnexpectedToken {
        token: spanned.token.to_string(),
        position: spanned.position,
    }
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.pos).cloned();
        if spanned.is_some() {
            self.pos += 1;
        }
        spanned
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().is_some_and(|s| s.token == *token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(s) if s.token == *token => Ok(()),
            Some(s) => Err(unexpected(&s)),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let right = self.comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.unary()?;
        let op = match self.peek().map(|s| &s.token) {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.unary()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let spanned = self.next().ok_or(ExpressionError::UnexpectedEnd)?;
        match spanned.token {
            Token::LParen => {
                let inner = self.or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Str(text) => Ok(Expr::Str(text)),
            Token::Number(text) => Ok(Expr::Number(text)),
            Token::Word(word) => {
                if self.eat(&Token::LParen) {
                    let builtin = Builtin::from_name(&word)
                        .ok_or(ExpressionError::UnknownFunction { name: word })?;
                    self.expect(&Token::RParen)?;
                    return Ok(Expr::Call(builtin));
                }
                if word.eq_ignore_ascii_case("true") {
                    Ok(Expr::Bool(true))
                } else if word.eq_ignore_ascii_case("false") {
                    Ok(Expr::Bool(false))
                } else {
                    Ok(Expr::Path(word))
                }
            }
            _ => Err(unexpected(&spanned)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Box<Expr> {
        Box::new(Expr::Path(p.to_string()))
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("a || b && c").expect("parse");
        assert_eq!(
            expr,
            Expr::Or(path("a"), Box::new(Expr::And(path("b"), path("c"))))
        );
    }

    #[test]
    fn comparison_operands() {
        let expr = parse("jobs.a.status == 'failed'").expect("parse");
        assert_eq!(
            expr,
            Expr::Compare {
                left: path("jobs.a.status"),
                op: CompareOp::Eq,
                right: Box::new(Expr::Str("failed".to_string())),
            }
        );
    }

    #[test]
    fn negation_and_parentheses() {
        let expr = parse("!(a || TRUE)").expect("parse");
        assert_eq!(
            expr,
            Expr::Not(Box::new(Expr::Or(path("a"), Box::new(Expr::Bool(true)))))
        );
    }

    #[test]
    fn builtin_calls() {
        assert_eq!(parse("always()"), Ok(Expr::Call(Builtin::Always)));
        assert_eq!(
            parse("success() && !cancelled()"),
            Ok(Expr::And(
                Box::new(Expr::Call(Builtin::Success)),
                Box::new(Expr::Not(Box::new(Expr::Call(Builtin::Cancelled)))),
            ))
        );
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert_eq!(
            parse("explode()"),
            Err(ExpressionError::UnknownFunction {
                name: "explode".to_string()
            })
        );
    }

    #[test]
    fn missing_close_paren() {
        assert_eq!(parse("(a && b"), Err(ExpressionError::UnexpectedEnd));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert_eq!(
            parse("a b"),
            Err(ExpressionError::UnexpectedToken {
                token: "b".to_string(),
                position: 2
            })
        );
    }

    #[test]
    fn dangling_operator() {
        assert_eq!(parse("a =="), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(
            parse("== a"),
            Err(ExpressionError::UnexpectedToken {
                token: "==".to_string(),
                position: 0
            })
        );
    }
}
