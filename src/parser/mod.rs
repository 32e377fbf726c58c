//! # Parser
//!
//! Combinator-based, backtracking parser for MinnieML. The lexed token
//! stream is consumed by per-node parsing functions composed with the
//! [`Comb`](combinators::Comb) algebra; alternatives rewind the
//! [`ParseState`] cursor, so the grammar needs no lookahead tables.
//!
//! ```text
//! Token Stream  →  Member Parsers  →  Module (untyped AST)
//!   (Lexer)         (Comb + FromTokens)   (Semantic Pipeline)
//! ```
//!
//! Two properties matter to the rest of the pipeline:
//!
//! - **Expressions stay flat.** A body parses to a sequence of `let`
//!   statements and a flat run of terms; operator fixity and application
//!   nesting are reconstructed later by the expression rewriter, once
//!   references have been resolved to operator declarations.
//! - **Recovery over rejection.** A member that fails to parse is consumed
//!   up to the end of its line and kept in the AST as a
//!   `ParsingMemberError`; an invalid identifier inside an otherwise
//!   well-formed member is captured as a `ParsingIdError` without
//!   rejecting the member. Parsing only fails outright when no member list
//!   can be produced at all.
//!
//! Function, operator and struct declarations desugar during parsing:
//! `fn`/`op` members become [`ast::Bnd`] bindings whose body is a single
//! lambda tagged with [`ast::BindingMeta`], and every `struct` member gets
//! a companion constructor binding over its fields.

use std::{error::Error, fmt::Display};

pub mod ast;
pub mod combinators;
mod parse_state;

pub use self::parse_state::*;

use serde::{Deserialize, Serialize};

use crate::lexer::{Lexer, Span, Token};

use self::ast::{AstNode, Member, Module};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub position: Option<Span>,
}

impl ParseError {
    pub fn eof(item: &str) -> ParseError {
        ParseError {
            message: format!("hit EOF while parsing {item}"),
            position: None,
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(pos) = &self.position {
            f.write_str(pos.to_string(&self.message).as_str())
        } else {
            f.write_str(&self.message)
        }
    }
}

impl Error for ParseError {}

/// Fatal parser outcome: the input could not be turned into a module at
/// all. Everything recoverable rides inside the AST instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserError {
    Failure { trace: String },
}

impl Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParserError::Failure { trace } => {
                f.write_fmt(format_args!("failed to parse module: {trace}"))
            }
        }
    }
}

impl Error for ParserError {}

pub trait FromTokens<T> {
    fn parse(tokens: &mut ParseState<T>) -> Result<AstNode, ParseError>;
}

/// Lex and parse one source file into a module. The module name is the
/// caller's business (usually the file stem).
pub fn parse_source(module_name: &str, source: &str) -> Result<Module, ParserError> {
    let tokens = Lexer::new(source).lex().map_err(|e| ParserError::Failure {
        trace: e.to_string(),
    })?;

    parse_module(module_name, tokens)
}

/// Parse a token stream into a module, recovering member-by-member. A
/// documentation comment attaches to the member that follows it; a doc
/// comment followed by `;` attaches to nothing at all.
pub fn parse_module(module_name: &str, tokens: Vec<Token>) -> Result<Module, ParserError> {
    let had_tokens = !tokens.is_empty();
    let mut state = ParseState::new(tokens);
    let mut members: Vec<Member> = vec![];
    let mut pending_doc: Option<String> = None;

    loop {
        match state.peek() {
            None => break,
            Some(Token::Semicolon { .. }) => {
                // a stray separator; whatever doc was pending belongs to
                // nothing now
                state.next();
                pending_doc = None;
            }
            Some(Token::DocComment { value, .. }) => {
                state.next();
                pending_doc = Some(value);
            }
            Some(_) => match Member::parse(&mut state) {
                Ok(member) => {
                    log::trace!(
                        "parsed member {:?} ({})",
                        member.name(),
                        member.kind()
                    );
                    let constructor = match &member {
                        Member::TypeStruct(ts) => Some(Member::Bnd(ts.constructor())),
                        _ => None,
                    };
                    members.push(member.with_doc(pending_doc.take()));
                    if let Some(constructor) = constructor {
                        members.push(constructor);
                    }
                }
                Err(e) => {
                    log::debug!("member failed to parse, recovering: {}", e.message);
                    members.push(Member::recover(&mut state, e));
                    pending_doc = None;
                }
            },
        }
    }

    if members.is_empty() && had_tokens {
        return Err(ParserError::Failure {
            trace: "no members could be parsed from a non-empty input".to_string(),
        });
    }

    Ok(Module::new(module_name, members))
}

#[cfg(test)]
mod tests {
    use crate::parser::ast::{Bnd, ParsingMemberError, Term};

    use super::*;

    fn parse(input: &str) -> Module {
        parse_source("test", input).expect("parsing failed")
    }

    #[test]
    fn test_parse_empty_module() {
        let module = parse("");
        assert!(module.members.is_empty());
    }

    #[test]
    fn test_parse_two_members() {
        let module = parse("fn f(): Int = 1; fn g(): Int = 2;");

        assert_eq!(module.members.len(), 2);
        assert_eq!(module.members[0].name(), Some("f"));
        assert_eq!(module.members[1].name(), Some("g"));
    }

    #[test]
    fn test_member_body_with_lets_stays_one_member() {
        let module = parse("fn main(): Unit =\n  let s = \"hello\";\n  println s\n;");

        assert_eq!(module.members.len(), 1);
        let Member::Bnd(bnd) = &module.members[0] else {
            panic!("expected a binding");
        };
        let lambda = bnd.lambda().expect("lambda body missing");
        assert_eq!(lambda.body.terms.len(), 3);
        assert!(matches!(lambda.body.terms[0], Term::Let(_)));
    }

    #[test]
    fn test_struct_gets_companion_constructor() {
        let module = parse("struct User { name: String, age: Int };");

        assert_eq!(module.members.len(), 2);
        assert!(matches!(module.members[0], Member::TypeStruct(_)));
        assert!(
            matches!(&module.members[1], Member::Bnd(Bnd { name, .. }) if name == "User")
        );
    }

    #[test]
    fn test_doc_comment_attaches_forward() {
        let module = parse("/** adds numbers */\nfn add(a: Int, b: Int): Int = a + b;");

        let Member::Bnd(bnd) = &module.members[0] else {
            panic!("expected a binding");
        };
        assert_eq!(bnd.doc.as_deref(), Some("adds numbers"));
    }

    #[test]
    fn test_doc_comment_before_semicolon_attaches_to_nothing() {
        let module = parse("fn f(): Int = 1;\n/** dangling */;\nfn g(): Int = 2;");

        assert_eq!(module.members.len(), 2);
        let Member::Bnd(g) = &module.members[1] else {
            panic!("expected a binding");
        };
        assert!(g.doc.is_none());
    }

    #[test]
    fn test_recovery_keeps_following_members() {
        let module = parse("fn broken(((();\nfn ok(): Int = 1;");

        assert_eq!(module.members.len(), 2);
        assert!(matches!(
            module.members[0],
            Member::MemberError(ParsingMemberError { .. })
        ));
        assert_eq!(module.members[1].name(), Some("ok"));
    }

    #[test]
    fn test_recovery_span_covers_offending_text() {
        let source = "fn broken(((();\nfn ok(): Int = 1;";
        let module = parse(source);

        let Member::MemberError(error) = &module.members[0] else {
            panic!("expected a member error");
        };
        let Span::Real { start, end, .. } = &error.position else {
            panic!("expected a real span");
        };
        assert_eq!(start.index, 0);
        assert_eq!(end.index, source.find('\n').expect("newline in source"));
    }

    #[test]
    fn test_garbage_only_input_fails() {
        // nothing member-shaped at all: recovery still yields members, so
        // only an unlexable input can produce a hard failure
        assert!(parse_source("test", "let s = \"unterminated").is_err());
    }
}
