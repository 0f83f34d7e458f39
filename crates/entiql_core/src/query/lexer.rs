//! Lexical scanner for the query language.

use crate::error::{ParseError, ParseResult};
use std::fmt;

/// Reserved words. Matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    Select,
    From,
    Where,
    Join,
    Inner,
    Left,
    Outer,
    Fetch,
    Update,
    Delete,
    Set,
    Order,
    By,
    Asc,
    Desc,
    Distinct,
    New,
    Case,
    When,
    Then,
    Else,
    End,
    And,
    Or,
    Not,
    Is,
    Null,
    Like,
    In,
    Between,
    As,
    True,
    False,
}

impl Keyword {
    const ALL: [Self; 33] = [
        Self::Select,
        Self::From,
        Self::Where,
        Self::Join,
        Self::Inner,
        Self::Left,
        Self::Outer,
        Self::Fetch,
        Self::Update,
        Self::Delete,
        Self::Set,
        Self::Order,
        Self::By,
        Self::Asc,
        Self::Desc,
        Self::Distinct,
        Self::New,
        Self::Case,
        Self::When,
        Self::Then,
        Self::Else,
        Self::End,
        Self::And,
        Self::Or,
        Self::Not,
        Self::Is,
        Self::Null,
        Self::Like,
        Self::In,
        Self::Between,
        Self::As,
        Self::True,
        Self::False,
    ];

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::From => "from",
            Self::Where => "where",
            Self::Join => "join",
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Outer => "outer",
            Self::Fetch => "fetch",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Set => "set",
            Self::Order => "order",
            Self::By => "by",
            Self::Asc => "asc",
            Self::Desc => "desc",
            Self::Distinct => "distinct",
            Self::New => "new",
            Self::Case => "case",
            Self::When => "when",
            Self::Then => "then",
            Self::Else => "else",
            Self::End => "end",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Is => "is",
            Self::Null => "null",
            Self::Like => "like",
            Self::In => "in",
            Self::Between => "between",
            Self::As => "as",
            Self::True => "true",
            Self::False => "false",
        }
    }

    fn lookup(word: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(word))
    }
}

/// Token kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Reserved word, with the text as written.
    Keyword(Keyword, String),
    Ident(String),
    Str(String),
    Int(i64),
    /// `:name`
    Param(String),
    Dot,
    Comma,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword(_, text) | Self::Ident(text) => write!(f, "'{text}'"),
            Self::Str(s) => write!(f, "string '{s}'"),
            Self::Int(n) => write!(f, "integer {n}"),
            Self::Param(name) => write!(f, "parameter :{name}"),
            Self::Dot => f.write_str("'.'"),
            Self::Comma => f.write_str("','"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Eq => f.write_str("'='"),
            Self::Ne => f.write_str("'<>'"),
            Self::Lt => f.write_str("'<'"),
            Self::Le => f.write_str("'<='"),
            Self::Gt => f.write_str("'>'"),
            Self::Ge => f.write_str("'>='"),
            Self::Plus => f.write_str("'+'"),
            Self::Minus => f.write_str("'-'"),
            Self::Star => f.write_str("'*'"),
            Self::Slash => f.write_str("'/'"),
            Self::Eof => f.write_str("end of query"),
        }
    }
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) offset: usize,
}

/// Splits query text into tokens, ending with [`TokenKind::Eof`].
pub(crate) fn tokenize(input: &str) -> ParseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            '.' => single(&mut chars, TokenKind::Dot),
            ',' => single(&mut chars, TokenKind::Comma),
            '(' => single(&mut chars, TokenKind::LParen),
            ')' => single(&mut chars, TokenKind::RParen),
            '=' => single(&mut chars, TokenKind::Eq),
            '+' => single(&mut chars, TokenKind::Plus),
            '-' => single(&mut chars, TokenKind::Minus),
            '*' => single(&mut chars, TokenKind::Star),
            '/' => single(&mut chars, TokenKind::Slash),
            '<' => {
                chars.next();
                match chars.peek() {
                    Some((_, '=')) => single(&mut chars, TokenKind::Le),
                    Some((_, '>')) => single(&mut chars, TokenKind::Ne),
                    _ => TokenKind::Lt,
                }
            }
            '>' => {
                chars.next();
                match chars.peek() {
                    Some((_, '=')) => single(&mut chars, TokenKind::Ge),
                    _ => TokenKind::Gt,
                }
            }
            '!' => {
                chars.next();
                match chars.peek() {
                    Some((_, '=')) => single(&mut chars, TokenKind::Ne),
                    _ => return Err(ParseError::syntax(offset, "expected '=' after '!'")),
                }
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => {
                            if matches!(chars.peek(), Some((_, '\''))) {
                                chars.next();
                                text.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some((_, ch)) => text.push(ch),
                        None => {
                            return Err(ParseError::syntax(offset, "unterminated string literal"))
                        }
                    }
                }
                TokenKind::Str(text)
            }
            ':' => {
                chars.next();
                let name = take_word(&mut chars);
                if name.is_empty() {
                    return Err(ParseError::syntax(offset, "expected parameter name after ':'"));
                }
                TokenKind::Param(name)
            }
            c if c.is_ascii_digit() => {
                let digits = take_while(&mut chars, |c| c.is_ascii_digit());
                if matches!(chars.peek(), Some((_, c)) if is_word_char(*c)) {
                    return Err(ParseError::syntax(offset, "malformed number"));
                }
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| ParseError::syntax(offset, "integer literal out of range"))?;
                TokenKind::Int(value)
            }
            c if is_word_start(c) => {
                let word = take_word(&mut chars);
                match Keyword::lookup(&word) {
                    Some(keyword) => TokenKind::Keyword(keyword, word),
                    None => TokenKind::Ident(word),
                }
            }
            other => {
                return Err(ParseError::syntax(
                    offset,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        tokens.push(Token { kind, offset });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: input.len(),
    });
    Ok(tokens)
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn single(chars: &mut Chars<'_>, kind: TokenKind) -> TokenKind {
    chars.next();
    kind
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn take_while(chars: &mut Chars<'_>, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if !keep(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

fn take_word(chars: &mut Chars<'_>) -> String {
    take_while(chars, is_word_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = kinds("SELECT m From Member m");
        assert!(matches!(tokens[0], TokenKind::Keyword(Keyword::Select, _)));
        assert!(matches!(tokens[2], TokenKind::Keyword(Keyword::From, _)));
        assert_eq!(tokens[3], TokenKind::Ident("Member".to_string()));
        assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn paths_and_parameters() {
        assert_eq!(
            kinds("m.team.name = :teamName"),
            vec![
                TokenKind::Ident("m".to_string()),
                TokenKind::Dot,
                TokenKind::Ident("team".to_string()),
                TokenKind::Dot,
                TokenKind::Ident("name".to_string()),
                TokenKind::Eq,
                TokenKind::Param("teamName".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds("'it''s'"),
            vec![TokenKind::Str("it's".to_string()), TokenKind::Eof]
        );
        assert_eq!(
            kinds("'회원1'"),
            vec![TokenKind::Str("회원1".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(
            kinds("<= >= <> != < >"),
            vec![
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Ne,
                TokenKind::Ne,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn offsets_point_at_token_start() {
        let tokens = tokenize("select  m").unwrap();
        assert_eq!(tokens[1].offset, 8);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            tokenize("'open"),
            Err(ParseError::Syntax { offset: 0, .. })
        ));
        assert!(matches!(tokenize("a # b"), Err(ParseError::Syntax { offset: 2, .. })));
        assert!(tokenize(": x").is_err());
        assert!(tokenize("12ab").is_err());
        assert!(tokenize("99999999999999999999").is_err());
    }
}
