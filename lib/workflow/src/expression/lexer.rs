//! Expression tokenizer.

use super::ExpressionError;
use std::fmt;

/// A lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Quoted literal, without its quotes.
    Str(String),
    /// Numeric literal, kept as source text.
    Number(String),
    /// Bare word: a variable path, a boolean or a function name.
    Word(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Not => f.write_str("!"),
            Self::And => f.write_str("&&"),
            Self::Or => f.write_str("||"),
            Self::Eq => f.write_str("=="),
            Self::Ne => f.write_str("!="),
            Self::Lt => f.write_str("<"),
            Self::Le => f.write_str("<="),
            Self::Gt => f.write_str(">"),
            Self::Ge => f.write_str(">="),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Number(s) | Self::Word(s) => f.write_str(s),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_number(word: &str) -> bool {
    let digits = word.strip_prefix('-').unwrap_or(word);
    digits.starts_with(|c: char| c.is_ascii_digit()) && word.parse::<f64>().is_ok()
}

/// Splits an expression into tokens.
///
/// # Errors
///
/// Returns an error for an unterminated quote or a character that starts
/// no token.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((position, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '!' | '=' | '<' | '>' | '&' | '|' => {
                let next = chars.peek().map(|(_, n)| *n);
                let (token, wide) = match (c, next) {
                    ('!', Some('=')) => (Token::Ne, true),
                    ('!', _) => (Token::Not, false),
                    ('=', Some('=')) => (Token::Eq, true),
                    ('<', Some('=')) => (Token::Le, true),
                    ('<', _) => (Token::Lt, false),
                    ('>', Some('=')) => (Token::Ge, true),
                    ('>', _) => (Token::Gt, false),
                    ('&', Some('&')) => (Token::And, true),
                    ('|', Some('|')) => (Token::Or, true),
                    _ => return Err(ExpressionError::UnexpectedChar { ch: c, position }),
                };
                if wide {
                    chars.next();
                }
                token
            }
            '\'' | '"' => {
                let mut literal = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == c {
                        closed = true;
                        break;
                    }
                    literal.push(n);
                }
                if !closed {
                    return Err(ExpressionError::UnterminatedString { position });
                }
                Token::Str(literal)
            }
            c if is_word_char(c) => {
                let mut word = String::from(c);
                while let Some((_, n)) = chars.next_if(|(_, n)| is_word_char(*n)) {
                    word.push(n);
                }
                if is_number(&word) {
                    Token::Number(word)
                } else {
                    Token::Word(word)
                }
            }
            ch => return Err(ExpressionError::UnexpectedChar { ch, position }),
        };
        tokens.push(Spanned { token, position });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .expect("tokenize")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn operators_and_paths() {
        assert_eq!(
            kinds("jobs.a.outputs.x != 'y' && !failure()"),
            vec![
                Token::Word("jobs.a.outputs.x".into()),
                Token::Ne,
                Token::Str("y".into()),
                Token::And,
                Token::Not,
                Token::Word("failure".into()),
                Token::LParen,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn operator_text_inside_quotes_is_one_token() {
        assert_eq!(
            kinds(r#"x == "a || b && c == d""#),
            vec![
                Token::Word("x".into()),
                Token::Eq,
                Token::Str("a || b && c == d".into()),
            ]
        );
    }

    #[test]
    fn numbers_and_dashed_names() {
        assert_eq!(
            kinds("jobs.my-job.outputs.count >= -1.5"),
            vec![
                Token::Word("jobs.my-job.outputs.count".into()),
                Token::Ge,
                Token::Number("-1.5".into()),
            ]
        );
        assert_eq!(kinds("nan"), vec![Token::Word("nan".into())]);
    }

    #[test]
    fn positions_are_byte_offsets() {
        let tokens = tokenize("a  <= b").expect("tokenize");
        let positions: Vec<_> = tokens.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 3, 6]);
    }

    #[test]
    fn rejects_single_ampersand() {
        assert_eq!(
            tokenize("a & b"),
            Err(ExpressionError::UnexpectedChar {
                ch: '&',
                position: 2
            })
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        assert_eq!(
            tokenize("x == 'open"),
            Err(ExpressionError::UnterminatedString { position: 5 })
        );
    }
}
