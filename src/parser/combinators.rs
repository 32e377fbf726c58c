use std::ops::{BitOr, BitXor, Not, Rem, Shr};

use super::{
    ast::{AstNode, Expr, Ident, Param, StructField, Term, TypeSpec},
    FromTokens, ParseError, ParseState,
};
use crate::lexer::{GetPosition, Terminal, Token};

/// Combinator over the token stream. Terminals match a single token by
/// class, nodes delegate to the parsing function of the respective AST
/// node, and the remaining variants compose combinators. The operator
/// sugar mirrors grammar notation: `a >> b` sequences, `a | b` tries the
/// left side first, `!a` is optional, `a ^ ()` repeats, `a % sep` parses a
/// separated list.
#[derive(Clone)]
pub enum Comb<'a, Tok, Term, Node> {
    /// Parse a non-terminal via its parsing function.
    Node {
        parser: &'a dyn Fn(&mut ParseState<Tok>) -> Result<Node, ParseError>,
    },
    /// Match a single terminal token.
    Terminal { token: Term },
    /// Match two combinators in sequence.
    Sequence {
        current: Box<Comb<'a, Tok, Term, Node>>,
        next: Box<Comb<'a, Tok, Term, Node>>,
    },
    /// Match either the left or the right combinator, trying left FIRST.
    Either {
        left: Box<Comb<'a, Tok, Term, Node>>,
        right: Box<Comb<'a, Tok, Term, Node>>,
    },
    /// Optionally match the inner combinator; on a miss the tokens are
    /// left untouched.
    Optional {
        inner: Box<Comb<'a, Tok, Term, Node>>,
    },
    /// Match a repetition of the inner combinator: exactly `amount` times
    /// when given, else as often as it matches.
    Repetition {
        inner: Box<Comb<'a, Tok, Term, Node>>,
        amount: Option<usize>,
    },
}

impl<Tok, Term, Node> PartialEq for Comb<'_, Tok, Term, Node>
where
    Term: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Node { .. }, Self::Node { .. }) => false,
            (Self::Terminal { token: l }, Self::Terminal { token: r }) => l == r,
            (
                Self::Sequence {
                    current: l_current,
                    next: l_next,
                },
                Self::Sequence {
                    current: r_current,
                    next: r_next,
                },
            ) => l_current == r_current && l_next == r_next,
            (
                Self::Either {
                    left: l_left,
                    right: l_right,
                },
                Self::Either {
                    left: r_left,
                    right: r_right,
                },
            ) => l_left == r_left && l_right == r_right,
            (Self::Optional { inner: l }, Self::Optional { inner: r }) => l == r,
            (
                Self::Repetition {
                    inner: l_inner,
                    amount: l_amount,
                },
                Self::Repetition {
                    inner: r_inner,
                    amount: r_amount,
                },
            ) => l_inner == r_inner && l_amount == r_amount,
            _ => false,
        }
    }
}

impl<Tok, Term, Node> std::fmt::Debug for Comb<'_, Tok, Term, Node>
where
    Term: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node { .. } => f.debug_struct("Node").finish(),
            Self::Terminal { token } => f.debug_struct("Terminal").field("token", token).finish(),
            Self::Sequence { current, next } => f
                .debug_struct("Sequence")
                .field("current", current)
                .field("next", next)
                .finish(),
            Self::Either { left, right } => f
                .debug_struct("Either")
                .field("left", left)
                .field("right", right)
                .finish(),
            Self::Optional { inner } => f.debug_struct("Optional").field("inner", inner).finish(),
            Self::Repetition { inner, amount } => f
                .debug_struct("Repetition")
                .field("inner", inner)
                .field("amount", amount)
                .finish(),
        }
    }
}

/// Create a combinator for a specified terminal symbol.
macro_rules! terminal_comb {
    ($name:ident, $terminal:ident) => {
        pub const $name: Comb<'static, Token, Terminal, AstNode> = Comb::Terminal {
            token: Terminal::$terminal,
        };
    };
}

/// Create a combinator for a specified non-terminal symbol.
macro_rules! node_comb {
    ($name:ident, $struct:ident) => {
        pub const $name: Comb<'static, Token, Terminal, AstNode> = Comb::Node {
            parser: &$struct::parse,
        };
    };
}

impl Comb<'_, Token, Terminal, AstNode> {
    terminal_comb!(LET, LetKeyword);

    terminal_comb!(FN_KEYWORD, FnKeyword);

    terminal_comb!(OP_KEYWORD, OpKeyword);

    terminal_comb!(STRUCT_KEYWORD, StructKeyword);

    terminal_comb!(TYPE_KEYWORD, TypeKeyword);

    terminal_comb!(ASSIGN, Assign);

    terminal_comb!(LPAREN, LParen);

    terminal_comb!(RPAREN, RParen);

    terminal_comb!(LBRACE, LBrace);

    terminal_comb!(RBRACE, RBrace);

    terminal_comb!(COLON, Colon);

    terminal_comb!(COMMA, Comma);

    terminal_comb!(SEMI, Semicolon);

    terminal_comb!(TILDE, Tilde);

    terminal_comb!(SMALL_RIGHT_ARROW, SmallRightArrow);

    node_comb!(IDENT, Ident);

    node_comb!(EXPR, Expr);

    node_comb!(TERM, Term);

    node_comb!(TYPE_SPEC, TypeSpec);

    node_comb!(PARAM, Param);

    node_comb!(STRUCT_FIELD, StructField);
}

impl<Tok, Term, Node> Comb<'_, Tok, Term, Node>
where
    Tok: Clone + std::fmt::Debug + GetPosition,
    Term: PartialEq<Tok> + std::fmt::Debug,
    Node: std::fmt::Debug,
{
    pub fn parse(&self, tokens: &mut ParseState<Tok>) -> Result<Vec<Node>, ParseError> {
        let mut matched = vec![];
        match self {
            Comb::Terminal { token } => {
                let Some(t) = tokens.next() else {
                    return Err(ParseError {
                        message: format!("hit EOF while trying to parse {token:?}"),
                        position: tokens.last_token().map(|token| token.position()),
                    });
                };

                if *token != t {
                    return Err(ParseError {
                        message: format!("unexpected {t:?} while trying to parse {token:?}"),
                        position: Some(t.position()),
                    });
                }
            }
            Comb::Sequence { current, next } => {
                let mut current_matches = current.parse(tokens)?;
                matched.append(&mut current_matches);

                let mut next_matches = next.parse(tokens)?;
                matched.append(&mut next_matches);
            }
            Comb::Either { left, right } => {
                let current_index = tokens.get_index();

                if let Ok(mut left_matches) = left.parse(tokens) {
                    matched.append(&mut left_matches);
                } else {
                    tokens.set_index(current_index);
                    let mut right_matches = right.parse(tokens)?;
                    matched.append(&mut right_matches);
                }
            }
            Comb::Node { parser } => {
                let matches = parser(tokens)?;
                matched.push(matches);
            }
            Comb::Optional { inner } => {
                let current_index = tokens.get_index();
                if let Ok(mut result) = inner.parse(tokens) {
                    matched.append(&mut result);
                } else {
                    tokens.set_index(current_index);
                }
            }
            Comb::Repetition { inner, amount } => {
                if let Some(amount) = amount {
                    for _ in 0..*amount {
                        let mut result = inner.parse(tokens)?;
                        matched.append(&mut result);
                    }
                } else {
                    let mut current_index = tokens.get_index();
                    while let Ok(mut result) = inner.parse(tokens) {
                        matched.append(&mut result);
                        current_index = tokens.get_index();
                    }
                    tokens.set_index(current_index);
                }
            }
        }

        Ok(matched)
    }
}

impl<Tok, Term, Node> Shr for Comb<'_, Tok, Term, Node> {
    type Output = Self;

    fn shr(self, rhs: Self) -> Self::Output {
        Comb::Sequence {
            current: Box::new(self),
            next: Box::new(rhs),
        }
    }
}

impl<Tok, Term, Node> BitOr for Comb<'_, Tok, Term, Node> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Comb::Either {
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }
}

impl<Tok, Term, Node> Not for Comb<'_, Tok, Term, Node> {
    type Output = Self;

    fn not(self) -> Self::Output {
        Comb::Optional {
            inner: Box::new(self),
        }
    }
}

impl<Tok, Term, Node> BitXor<()> for Comb<'_, Tok, Term, Node> {
    type Output = Self;

    fn bitxor(self, _rhs: ()) -> Self::Output {
        Comb::Repetition {
            inner: Box::new(self),
            amount: None,
        }
    }
}

impl<Tok, Term, Node> BitXor<usize> for Comb<'_, Tok, Term, Node> {
    type Output = Self;

    fn bitxor(self, rhs: usize) -> Self::Output {
        Comb::Repetition {
            inner: Box::new(self),
            amount: Some(rhs),
        }
    }
}

/// `a % sep`: a possibly empty list of `a` separated by `sep`.
impl<'a, Tok, Term, Node> Rem for Comb<'a, Tok, Term, Node>
where
    Comb<'a, Tok, Term, Node>: Clone,
{
    type Output = Self;

    fn rem(self, rhs: Self) -> Self::Output {
        !(self.clone() >> ((rhs >> self) ^ ()))
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Span;

    use super::*;

    #[test]
    fn test_sequence_builds_nested() {
        let new = Comb::LET >> Comb::ASSIGN >> Comb::SEMI;

        assert_eq!(
            Comb::Sequence {
                current: Box::new(Comb::Sequence {
                    current: Box::new(Comb::LET),
                    next: Box::new(Comb::ASSIGN),
                }),
                next: Box::new(Comb::SEMI)
            },
            new
        );
    }

    #[test]
    fn test_parse_terminal() {
        let mut tokens = vec![Token::LetKeyword {
            position: Span::default(),
        }]
        .into();
        let result = Comb::LET.parse(&mut tokens);

        assert!(result.is_ok());
        assert!(result.expect("parse failed").is_empty());
        assert_eq!(tokens.get_index(), 1);
    }

    #[test]
    fn test_parse_terminal_mismatch() {
        let mut tokens = vec![Token::Integer {
            value: 42,
            position: Span::default(),
        }]
        .into();

        assert!(Comb::LET.parse(&mut tokens).is_err());
    }

    #[test]
    fn test_parse_either_backtracks() {
        let matcher = Comb::LET | Comb::IDENT;
        let mut tokens = vec![Token::Id {
            value: "some_id".into(),
            position: Span::default(),
        }]
        .into();

        let result = matcher.parse(&mut tokens).expect("parse failed");
        assert!(
            matches!(result.as_slice(), [AstNode::Id(id)] if id.value == "some_id")
        );
        assert_eq!(tokens.get_index(), 1);
    }

    #[test]
    fn test_parse_optional_missing() {
        let matcher = !Comb::LET;
        let mut tokens = vec![Token::Assign {
            position: Span::default(),
        }]
        .into();

        let result = matcher.parse(&mut tokens).expect("parse failed");
        assert!(result.is_empty());
        assert_eq!(tokens.get_index(), 0);
    }

    #[test]
    fn test_parse_repetition_wildcard() {
        let matcher = Comb::IDENT ^ ();
        let mut tokens = vec![
            Token::Id {
                value: "a".into(),
                position: Span::default(),
            },
            Token::Id {
                value: "b".into(),
                position: Span::default(),
            },
            Token::Semicolon {
                position: Span::default(),
            },
        ]
        .into();

        let result = matcher.parse(&mut tokens).expect("parse failed");
        assert_eq!(result.len(), 2);
        assert_eq!(tokens.get_index(), 2);
    }

    #[test]
    fn test_parse_separated_list() {
        let matcher = Comb::IDENT % Comb::COMMA;
        let mut tokens = vec![
            Token::Id {
                value: "a".into(),
                position: Span::default(),
            },
            Token::Comma {
                position: Span::default(),
            },
            Token::Id {
                value: "b".into(),
                position: Span::default(),
            },
        ]
        .into();

        let result = matcher.parse(&mut tokens).expect("parse failed");
        assert_eq!(result.len(), 2);
    }
}
