//! # Lexer
//!
//! Tokenization stage for MinnieML. Transforms raw source text into a
//! sequence of [`Token`]s carrying precise [`Span`] information, consuming
//! whitespace and comments along the way.
//!
//! ```text
//! Source Code  →  Token Stream  →  Parser
//!    (String)      (Positioned)     (AST)
//! ```
//!
//! Two comment forms are understood: `// ...` until end of line and
//! `/* ... */` blocks, which nest. A `/** ... */` block is a documentation
//! comment: it is not skipped but emitted as a [`Token::DocComment`] so the
//! parser can attach it to the member that follows.
//!
//! Fixed terminals (keywords, punctuation, reserved symbol runs) live in
//! [`LexMap`] tables; identifier and number literals are matched with
//! anchored regular expressions. Operator symbols are lexed as maximal runs
//! of symbol characters, so `++`, `==` or `+.` each form a single token for
//! user-defined operators to claim.

mod lexmap;
mod token;

pub use lexmap::*;
pub use token::*;

use std::{error::Error, fmt::Display};

use once_cell::sync::Lazy;
use regex::Regex;

macro_rules! terminal {
    ($map:ident, $name:ident, $value:expr) => {
        $map.insert($value, Terminal::$name);
    };
}

static KEYWORDS: Lazy<LexMap> = Lazy::new(|| {
    let mut m = LexMap::default();

    terminal!(m, LetKeyword, "let");
    terminal!(m, FnKeyword, "fn");
    terminal!(m, OpKeyword, "op");
    terminal!(m, StructKeyword, "struct");
    terminal!(m, TypeKeyword, "type");
    terminal!(m, IfKeyword, "if");
    terminal!(m, ThenKeyword, "then");
    terminal!(m, ElifKeyword, "elif");
    terminal!(m, ElseKeyword, "else");

    m
});

static PUNCTUATION: Lazy<LexMap> = Lazy::new(|| {
    let mut m = LexMap::default();

    terminal!(m, LParen, "(");
    terminal!(m, RParen, ")");
    terminal!(m, LBrace, "{");
    terminal!(m, RBrace, "}");
    terminal!(m, LBracket, "[");
    terminal!(m, RBracket, "]");
    terminal!(m, Comma, ",");
    terminal!(m, Semicolon, ";");

    m
});

/// Symbol runs that are reserved punctuation rather than operator material.
static RESERVED_RUNS: Lazy<LexMap> = Lazy::new(|| {
    let mut m = LexMap::default();

    terminal!(m, Assign, "=");
    terminal!(m, SmallRightArrow, "->");
    terminal!(m, Colon, ":");
    terminal!(m, Tilde, "~");
    terminal!(m, Dot, ".");
    terminal!(m, HoleMark, "???");

    m
});

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z_][a-zA-Z0-9_]*").expect("invalid identifier pattern"));
static FLOAT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[0-9]+\\.[0-9]+").expect("invalid float pattern"));
static INT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[0-9]+").expect("invalid integer pattern"));

const SYMBOL_CHARS: &str = "+-*/%<>=!&|^~.:?@#";

fn is_symbol_char(c: char) -> bool {
    SYMBOL_CHARS.contains(c)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError(String);

impl LexError {
    pub fn message(&self) -> &str {
        &self.0
    }
}

pub type LexResult<T> = Result<T, LexError>;

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Error for LexError {}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    tokens: Vec<Token>,
    info: SourceInfo,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            position: 0,
            tokens: vec![],
            info: SourceInfo::new(input),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.position..]
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span::Real {
            start: self.info.point_at(start),
            end: self.info.point_at(end),
            source: self.input.to_string(),
        }
    }

    fn eat_whitespace(&mut self) {
        while let Some(c) = self.rest().chars().next() {
            if !c.is_whitespace() {
                return;
            }
            self.position += c.len_utf8();
        }
    }

    /// Skip whitespace and non-doc comments. Emits a token for every doc
    /// comment encountered so the parser can attach it to the next member.
    fn eat_trivia(&mut self) -> LexResult<()> {
        loop {
            self.eat_whitespace();

            if self.rest().starts_with("//") {
                let line_end = self
                    .rest()
                    .find('\n')
                    .map(|offset| self.position + offset + 1)
                    .unwrap_or(self.input.len());
                self.position = line_end;
                continue;
            }

            if self.rest().starts_with("/**") && !self.rest().starts_with("/**/") {
                self.lex_doc_comment()?;
                continue;
            }

            if self.rest().starts_with("/*") {
                self.skip_block_comment()?;
                continue;
            }

            return Ok(());
        }
    }

    fn block_comment_end(&self) -> LexResult<usize> {
        let mut depth = 0usize;
        let mut offset = 0usize;
        let rest = self.rest();

        while offset < rest.len() {
            if rest[offset..].starts_with("/*") {
                depth += 1;
                offset += 2;
            } else if rest[offset..].starts_with("*/") {
                depth -= 1;
                offset += 2;
                if depth == 0 {
                    return Ok(self.position + offset);
                }
            } else {
                offset += rest[offset..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
            }
        }

        Err(LexError(format!(
            "unterminated block comment starting at byte {}",
            self.position
        )))
    }

    fn skip_block_comment(&mut self) -> LexResult<()> {
        self.position = self.block_comment_end()?;
        Ok(())
    }

    fn lex_doc_comment(&mut self) -> LexResult<()> {
        let start = self.position;
        let end = self.block_comment_end()?;

        let raw = &self.input[start + 3..end - 2];
        let value = raw
            .lines()
            .map(|line| line.trim().trim_start_matches('*').trim())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        self.tokens.push(Token::DocComment {
            value,
            position: self.span(start, end),
        });
        self.position = end;
        Ok(())
    }

    fn lex_word(&mut self) -> LexResult<()> {
        let m = ID_PATTERN
            .find(self.rest())
            .expect("caller checked the first character");
        let word = m.as_str();
        let start = self.position;
        let end = start + word.len();
        let position = self.span(start, end);

        let token = if word == "_" {
            Token::Underscore { position }
        } else if word == "true" || word == "false" {
            Token::BoolLiteral {
                value: word == "true",
                position,
            }
        } else if let Some(terminal) = KEYWORDS.get(word) {
            keyword_token(terminal, position)
        } else {
            Token::Id {
                value: word.to_string(),
                position,
            }
        };

        self.tokens.push(token);
        self.position = end;
        Ok(())
    }

    fn lex_number(&mut self) -> LexResult<()> {
        let start = self.position;

        if let Some(m) = FLOAT_PATTERN.find(self.rest()) {
            let end = start + m.as_str().len();
            let value = m.as_str().parse::<f64>().map_err(|e| {
                LexError(format!("invalid float literal '{}': {e}", m.as_str()))
            })?;
            self.tokens.push(Token::FloatingPoint {
                value,
                position: self.span(start, end),
            });
            self.position = end;
            return Ok(());
        }

        let m = INT_PATTERN
            .find(self.rest())
            .expect("caller checked the first character");
        let end = start + m.as_str().len();
        let value = m
            .as_str()
            .parse::<i64>()
            .map_err(|e| LexError(format!("invalid integer literal '{}': {e}", m.as_str())))?;
        self.tokens.push(Token::Integer {
            value,
            position: self.span(start, end),
        });
        self.position = end;
        Ok(())
    }

    fn lex_string(&mut self) -> LexResult<()> {
        let start = self.position;
        let mut offset = 1;
        let rest = self.rest();
        let bytes = rest.as_bytes();

        while offset < bytes.len() {
            match bytes[offset] {
                b'\\' => offset += 2,
                b'"' => {
                    let raw = &rest[1..offset];
                    let value = unescape::unescape(raw).ok_or_else(|| {
                        LexError(format!("invalid escape sequence in string '{raw}'"))
                    })?;
                    let end = start + offset + 1;
                    self.tokens.push(Token::StringLiteral {
                        value,
                        position: self.span(start, end),
                    });
                    self.position = end;
                    return Ok(());
                }
                _ => {
                    offset += rest[offset..]
                        .chars()
                        .next()
                        .map(char::len_utf8)
                        .unwrap_or(1);
                }
            }
        }

        Err(LexError(format!(
            "unterminated string literal starting at byte {start}"
        )))
    }

    fn lex_symbol_run(&mut self) -> LexResult<()> {
        let start = self.position;
        let run: String = self.rest().chars().take_while(|c| is_symbol_char(*c)).collect();
        let end = start + run.len();
        let position = self.span(start, end);

        let token = match RESERVED_RUNS.get(&run) {
            Some(Terminal::Assign) => Token::Assign { position },
            Some(Terminal::SmallRightArrow) => Token::SmallRightArrow { position },
            Some(Terminal::Colon) => Token::Colon { position },
            Some(Terminal::Tilde) => Token::Tilde { position },
            Some(Terminal::Dot) => Token::Dot { position },
            Some(Terminal::HoleMark) => Token::HoleMark { position },
            _ => Token::OperatorSymbol {
                value: run,
                position,
            },
        };

        self.tokens.push(token);
        self.position = end;
        Ok(())
    }

    fn lex_punctuation(&mut self, symbol: &str) -> LexResult<()> {
        let start = self.position;
        let end = start + symbol.len();
        let position = self.span(start, end);

        let token = match PUNCTUATION.get(symbol) {
            Some(Terminal::LParen) => Token::LParen { position },
            Some(Terminal::RParen) => Token::RParen { position },
            Some(Terminal::LBrace) => Token::LBrace { position },
            Some(Terminal::RBrace) => Token::RBrace { position },
            Some(Terminal::LBracket) => Token::LBracket { position },
            Some(Terminal::RBracket) => Token::RBracket { position },
            Some(Terminal::Comma) => Token::Comma { position },
            Some(Terminal::Semicolon) => Token::Semicolon { position },
            _ => {
                return Err(LexError(format!(
                    "failed to lex '{symbol}' at byte {start}"
                )))
            }
        };

        self.tokens.push(token);
        self.position = end;
        Ok(())
    }

    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        loop {
            self.eat_trivia()?;

            let Some(next) = self.rest().chars().next() else {
                return Ok(self.tokens);
            };

            match next {
                'a'..='z' | 'A'..='Z' | '_' => self.lex_word()?,
                '0'..='9' => self.lex_number()?,
                '"' => self.lex_string()?,
                '@' if self.is_at_native() => {
                    let start = self.position;
                    let end = start + "@native".len();
                    let position = self.span(start, end);
                    self.tokens.push(Token::AtNative { position });
                    self.position = end;
                }
                c if PUNCTUATION.can_match(&c.to_string()) => {
                    self.lex_punctuation(&c.to_string())?
                }
                c if is_symbol_char(c) => self.lex_symbol_run()?,
                c => {
                    return Err(LexError(format!(
                        "failed to lex '{c}' at byte {}; remaining '{}'",
                        self.position,
                        self.rest()
                    )))
                }
            }
        }
    }

    fn is_at_native(&self) -> bool {
        let rest = self.rest();
        rest.starts_with("@native")
            && !rest["@native".len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }
}

fn keyword_token(terminal: Terminal, position: Span) -> Token {
    match terminal {
        Terminal::LetKeyword => Token::LetKeyword { position },
        Terminal::FnKeyword => Token::FnKeyword { position },
        Terminal::OpKeyword => Token::OpKeyword { position },
        Terminal::StructKeyword => Token::StructKeyword { position },
        Terminal::TypeKeyword => Token::TypeKeyword { position },
        Terminal::IfKeyword => Token::IfKeyword { position },
        Terminal::ThenKeyword => Token::ThenKeyword { position },
        Terminal::ElifKeyword => Token::ElifKeyword { position },
        Terminal::ElseKeyword => Token::ElseKeyword { position },
        other => unreachable!("'{other:?}' is not a keyword terminal"),
    }
}
