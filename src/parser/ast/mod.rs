mod binding;
mod index;
mod member;
mod module;
mod term;
mod types;

pub use self::binding::*;
pub use self::index::*;
pub use self::member::*;
pub use self::module::*;
pub use self::term::*;
pub use self::types::*;

use serde::{Deserialize, Serialize};

use crate::{
    lexer::{GetPosition, Span, Token},
    parser::{FromTokens, ParseError, ParseState},
};

/// A raw identifier with its position, as captured by `Comb::IDENT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ident {
    pub value: String,
    pub position: Span,
}

impl FromTokens<Token> for Ident {
    fn parse(tokens: &mut ParseState<Token>) -> Result<AstNode, ParseError> {
        match tokens.next() {
            Some(Token::Id { value, position }) => Ok(AstNode::Id(Ident { value, position })),
            other => Err(ParseError {
                message: format!("expected an identifier, found {other:?}"),
                position: other.map(|t| t.position()),
            }),
        }
    }
}

impl From<Ident> for AstNode {
    fn from(value: Ident) -> Self {
        AstNode::Id(value)
    }
}

/// Union of everything a node parser can produce; the combinators collect
/// these and the per-node `parse` functions destructure them back.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Id(Ident),
    Member(Member),
    Expr(Expr),
    Term(Term),
    TypeSpec(TypeSpec),
    Param(Param),
    StructField(StructField),
}
