//! Token scanner for Scheme source text.
//!
//! The lexer is a cursor over the source; [`Lexer::token_type`] and
//! [`Lexer::peek_token`] look at the next token without consuming it, which is all
//! the lookahead the parser needs.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace1, not_line_ending, one_of, satisfy},
    combinator::{map, opt, recognize},
    multi::many0_count,
    sequence::pair,
};

use crate::Error;

/// Characters that may start an identifier
pub(crate) const IDENTIFIER_START_CHARS: &str = "?!*/<=>:$%^&_~";
/// Characters that may continue an identifier in addition to the start set
pub(crate) const IDENTIFIER_CONTINUE_CHARS: &str = "+-.";

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || IDENTIFIER_START_CHARS.contains(c)
}

fn is_identifier_char(c: char) -> bool {
    is_identifier_start(c) || c.is_ascii_digit() || IDENTIFIER_CONTINUE_CHARS.contains(c)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Open,
    Close,
    Quote,
    /// The `.` of a dotted pair
    Dot,
    Integer,
    Identifier,
    Boolean,
    String,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Raw token text; string tokens keep their delimiters
    pub text: &'a str,
    /// Byte offset of the token in the source
    pub offset: usize,
}

/// Skip whitespace and `;` comments
fn atmosphere(input: &str) -> IResult<&str, usize> {
    many0_count(alt((
        multispace1,
        recognize(pair(char(';'), not_line_ending)),
    )))
    .parse(input)
}

fn scan_punctuation(input: &str) -> IResult<&str, (TokenKind, &str)> {
    alt((
        map(tag("("), |t| (TokenKind::Open, t)),
        map(tag(")"), |t| (TokenKind::Close, t)),
        map(tag("'"), |t| (TokenKind::Quote, t)),
        map(tag("."), |t| (TokenKind::Dot, t)),
    ))
    .parse(input)
}

fn scan_integer(input: &str) -> IResult<&str, (TokenKind, &str)> {
    map(recognize(pair(opt(one_of("+-")), digit1)), |t| {
        (TokenKind::Integer, t)
    })
    .parse(input)
}

/// Identifiers, plus the lone `+` and `-` operators
fn scan_identifier(input: &str) -> IResult<&str, (TokenKind, &str)> {
    map(
        alt((
            recognize(pair(
                satisfy(is_identifier_start),
                take_while(is_identifier_char),
            )),
            recognize(one_of("+-")),
        )),
        |t| (TokenKind::Identifier, t),
    )
    .parse(input)
}

fn scan_boolean(input: &str) -> IResult<&str, (TokenKind, &str)> {
    map(alt((tag("#t"), tag("#f"))), |t| (TokenKind::Boolean, t)).parse(input)
}

/// Scan a string literal, returning its text including the delimiters
fn scan_string(input: &str) -> IResult<&str, (TokenKind, &str)> {
    let (mut remaining, _) = char('"').parse(input)?;

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => {
                let rest = char_iter.as_str();
                let text = &input[..input.len() - rest.len()];
                return Ok((rest, (TokenKind::String, text)));
            }
            Some('\\') => match char_iter.next() {
                Some('n' | 't' | 'r' | '\\' | '"') => remaining = char_iter.as_str(),
                _ => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        remaining,
                        nom::error::ErrorKind::Escaped,
                    )));
                }
            },
            Some(_) => remaining = char_iter.as_str(),
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    remaining,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}

fn scan_token(input: &str) -> IResult<&str, (TokenKind, &str)> {
    alt((
        scan_punctuation,
        scan_integer,
        scan_identifier,
        scan_boolean,
        scan_string,
    ))
    .parse(input)
}

/// Turn a scanning failure into a user-facing message
fn scan_error_message(rest: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    let snippet: String = rest.chars().take(10).collect();
    match (rest.chars().next(), error) {
        (Some('"'), nom::Err::Failure(e)) if e.code == nom::error::ErrorKind::Escaped => {
            format!("invalid escape sequence in string {snippet}")
        }
        (Some('"'), _) => "unterminated string".to_owned(),
        (Some('#'), _) => format!("unsupported syntax near '{snippet}'"),
        (Some(c), _) => format!("unexpected character '{c}'"),
        (None, _) => "unexpected end of input".to_owned(),
    }
}

/// Strip the delimiters from a string token and resolve its escapes
pub fn unescape_string(token: &str) -> String {
    let inner = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token);

    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}

/// Cursor over Scheme source text
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer { source, pos: 0 }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor, e.g. to resume after a malformed form
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.source.len());
    }

    /// Scan the token starting at or after `from`; returns it with its end offset
    fn scan_from(&self, from: usize) -> Result<(Token<'a>, usize), Error> {
        let input = self.source.get(from..).unwrap_or_default();
        let rest = match atmosphere(input) {
            Ok((rest, _)) => rest,
            Err(_) => input,
        };
        let start = self.source.len() - rest.len();

        if rest.is_empty() {
            let eof = Token {
                kind: TokenKind::Eof,
                text: "",
                offset: start,
            };
            return Ok((eof, start));
        }

        match scan_token(rest) {
            Ok((after, (kind, text))) => {
                let token = Token {
                    kind,
                    text,
                    offset: start,
                };
                Ok((token, self.source.len() - after.len()))
            }
            Err(e) => Err(Error::ParseError(scan_error_message(rest, e))),
        }
    }

    /// The next token, without consuming it
    pub fn peek(&self) -> Result<Token<'a>, Error> {
        self.scan_from(self.pos).map(|(token, _)| token)
    }

    /// Consume and return the next token.
    /// On a scanning error the offending character is skipped so that callers can
    /// make progress.
    pub fn advance(&mut self) -> Result<Token<'a>, Error> {
        match self.scan_from(self.pos) {
            Ok((token, end)) => {
                self.pos = end;
                Ok(token)
            }
            Err(e) => {
                self.skip_bad_input();
                Err(e)
            }
        }
    }

    fn skip_bad_input(&mut self) {
        let input = self.source.get(self.pos..).unwrap_or_default();
        let rest = atmosphere(input).map_or(input, |(rest, _)| rest);
        // An unterminated string swallows the remaining input
        let skipped = if rest.starts_with('"') {
            rest.len()
        } else {
            rest.chars().next().map_or(0, char::len_utf8)
        };
        self.pos = self.source.len() - rest.len() + skipped;
    }

    /// Classify the next token without consuming it
    pub fn token_type(&self) -> Result<TokenKind, Error> {
        self.peek().map(|token| token.kind)
    }

    /// Text of the next token without consuming it
    pub fn peek_token(&self) -> Result<&'a str, Error> {
        self.peek().map(|token| token.text)
    }

    /// Consume the next token and return its text
    pub fn next_token(&mut self) -> Result<&'a str, Error> {
        self.advance().map(|token| token.text)
    }

    /// Unmatched `(` minus `)` over the remaining input.
    /// Scanning stops at the first lexical error.
    pub fn indent_level(&self) -> isize {
        let mut cursor = self.clone();
        let mut level: isize = 0;
        while let Ok(token) = cursor.advance() {
            match token.kind {
                TokenKind::Open => level += 1,
                TokenKind::Close => level -= 1,
                TokenKind::Eof => break,
                _ => {}
            }
        }
        level
    }

    /// All remaining tokens (excluding the end marker)
    pub fn tokens(&self) -> Result<Vec<Token<'a>>, Error> {
        let mut cursor = self.clone();
        let mut tokens = Vec::new();
        loop {
            let token = cursor.advance()?;
            if token.kind == TokenKind::Eof {
                return Ok(tokens);
            }
            tokens.push(token);
        }
    }
}
