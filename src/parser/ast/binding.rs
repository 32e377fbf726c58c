use serde::{Deserialize, Serialize};

use crate::{
    lexer::{Span, Token},
    parser::{FromTokens, ParseError, ParseState},
};

use super::{AstNode, Expr, Lambda, Param, ParsingIdError, Term, TypeSpec};

/// What kind of binding a `BindingMeta` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingOrigin {
    Function,
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arity {
    Nullary,
    Unary,
    Binary,
    Nary(usize),
}

impl Arity {
    pub fn of(param_count: usize) -> Arity {
        match param_count {
            0 => Arity::Nullary,
            1 => Arity::Unary,
            2 => Arity::Binary,
            n => Arity::Nary(n),
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Arity::Nullary => 0,
            Arity::Unary => 1,
            Arity::Binary => 2,
            Arity::Nary(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assoc {
    Left,
    Right,
    None,
}

/// Structural tag on a `Bnd` whose body is a lambda representing a
/// function or operator: arity, precedence and associativity drive the
/// expression rewriter, the name pair records the surface symbol next to
/// its mangled binding name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingMeta {
    pub origin: BindingOrigin,
    pub arity: Arity,
    pub precedence: u32,
    pub assoc: Assoc,
    pub original_name: String,
    pub mangled_name: String,
}

/// Unified value/function/operator binding. Function and operator
/// declarations desugar at parse time into a `Bnd` whose body is a single
/// `Lambda` term tagged with `BindingMeta`; plain `let` members carry no
/// meta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bnd {
    pub id: Option<String>,
    pub name: String,
    pub meta: Option<BindingMeta>,
    pub type_asc: Option<TypeSpec>,
    pub type_spec: Option<TypeSpec>,
    pub value: Expr,
    pub doc: Option<String>,
    pub id_error: Option<ParsingIdError>,
    pub position: Span,
}

impl Bnd {
    /// The lambda body of a function/operator binding, if this is one.
    pub fn lambda(&self) -> Option<&Lambda> {
        match self.value.terms.first() {
            Some(Term::Lambda(lambda)) if self.value.terms.len() == 1 => Some(lambda),
            _ => None,
        }
    }

    pub fn lambda_mut(&mut self) -> Option<&mut Lambda> {
        match self.value.terms.first_mut() {
            Some(Term::Lambda(lambda)) => Some(lambda),
            _ => None,
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self.meta,
            Some(BindingMeta {
                origin: BindingOrigin::Operator,
                ..
            })
        )
    }

    pub fn is_function(&self) -> bool {
        matches!(
            self.meta,
            Some(BindingMeta {
                origin: BindingOrigin::Function,
                ..
            })
        )
    }
}

/// Deterministic operator name mangling: every symbol character maps to a
/// token, the tokens are joined and wrapped as `op.<tokens>.<arity>` so
/// unary and binary declarations of the same symbol get distinct names.
/// Alphabetic operator names (`and`, `or`, `not`) are kept as-is.
pub fn mangle_operator(symbol: &str, arity: Arity) -> String {
    let tokens = if symbol.chars().all(|c| c.is_alphanumeric() || c == '_') {
        symbol.to_string()
    } else {
        symbol.chars().map(symbol_token).collect::<String>()
    };

    format!("op.{tokens}.{}", arity.param_count())
}

fn symbol_token(c: char) -> &'static str {
    match c {
        '+' => "plus",
        '-' => "minus",
        '*' => "mul",
        '/' => "div",
        '%' => "mod",
        '<' => "lt",
        '>' => "gt",
        '=' => "eq",
        '!' => "bang",
        '&' => "amp",
        '|' => "pipe",
        '^' => "caret",
        '~' => "tilde",
        '.' => "dot",
        ':' => "colon",
        '?' => "quest",
        '@' => "at",
        '#' => "hash",
        _ => "sym",
    }
}

impl FromTokens<Token> for Param {
    /// `~`? name (`:` type)?
    fn parse(tokens: &mut ParseState<Token>) -> Result<AstNode, ParseError> {
        let consuming = matches!(tokens.peek(), Some(Token::Tilde { .. }));
        let tilde_position = if consuming {
            let Some(Token::Tilde { position }) = tokens.next() else {
                unreachable!("peeked the tilde");
            };
            Some(position)
        } else {
            None
        };

        let (name, name_position) = match tokens.next() {
            Some(Token::Id { value, position }) => (value, position),
            other => {
                return Err(ParseError {
                    message: format!("expected a parameter name, found {other:?}"),
                    position: other.map(|t| crate::lexer::GetPosition::position(&t)),
                })
            }
        };

        let type_asc = match tokens.peek() {
            Some(Token::Colon { .. }) => {
                tokens.next();
                let AstNode::TypeSpec(spec) = TypeSpec::parse(tokens)? else {
                    unreachable!()
                };
                Some(spec)
            }
            _ => None,
        };

        let start = tilde_position.unwrap_or_else(|| name_position.clone());
        let end = type_asc
            .as_ref()
            .map(|t| t.position())
            .unwrap_or_else(|| name_position.clone());

        Ok(AstNode::Param(Param {
            id: None,
            name,
            type_asc,
            type_spec: None,
            consuming,
            position: start.merge(&end),
        }))
    }
}

impl From<Param> for AstNode {
    fn from(value: Param) -> Self {
        AstNode::Param(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Lexer;

    use super::*;

    #[test]
    fn test_mangle_binary_operator() {
        assert_eq!(mangle_operator("*", Arity::Binary), "op.mul.2");
        assert_eq!(mangle_operator("+", Arity::Binary), "op.plus.2");
        assert_eq!(mangle_operator("++", Arity::Binary), "op.plusplus.2");
        assert_eq!(mangle_operator("==", Arity::Binary), "op.eqeq.2");
    }

    #[test]
    fn test_mangle_unary_and_binary_differ() {
        assert_ne!(
            mangle_operator("-", Arity::Unary),
            mangle_operator("-", Arity::Binary)
        );
    }

    #[test]
    fn test_mangle_alphabetic_operator() {
        assert_eq!(mangle_operator("and", Arity::Binary), "op.and.2");
        assert_eq!(mangle_operator("not", Arity::Unary), "op.not.1");
    }

    #[test]
    fn test_parse_plain_param() {
        let mut tokens = Lexer::new("a: Int").lex().expect("lexing failed").into();
        let AstNode::Param(param) = Param::parse(&mut tokens).expect("parsing failed") else {
            unreachable!()
        };

        assert_eq!(param.name, "a");
        assert!(!param.consuming);
        assert!(param.type_asc.is_some());
    }

    #[test]
    fn test_parse_consuming_param() {
        let mut tokens = Lexer::new("~x: String").lex().expect("lexing failed").into();
        let AstNode::Param(param) = Param::parse(&mut tokens).expect("parsing failed") else {
            unreachable!()
        };

        assert_eq!(param.name, "x");
        assert!(param.consuming);
    }

    #[test]
    fn test_parse_param_without_ascription() {
        let mut tokens = Lexer::new("a, b").lex().expect("lexing failed").into();
        let AstNode::Param(param) = Param::parse(&mut tokens).expect("parsing failed") else {
            unreachable!()
        };

        assert_eq!(param.name, "a");
        assert!(param.type_asc.is_none());
    }
}
