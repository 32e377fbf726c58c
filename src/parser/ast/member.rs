use serde::{Deserialize, Serialize};

use crate::{
    lexer::{GetPosition, Span, Token},
    parser::{combinators::Comb, FromTokens, ParseError, ParseState},
};

use super::{
    mangle_operator, Arity, Assoc, AstNode, BindingMeta, BindingOrigin, Bnd, Expr, Ident, Lambda,
    Param, Term, TypeSpec,
};

pub const DEFAULT_PRECEDENCE: u32 = 50;

/// An identifier position that was filled with something that is not a
/// valid identifier. The surrounding member still parses; the error is
/// lifted into the error channel by the parsing error checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsingIdError {
    pub raw: String,
    pub message: String,
    pub position: Span,
}

/// A member that failed to parse entirely. The raw source text up to the
/// end of the offending line is kept for error reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsingMemberError {
    pub raw: String,
    pub message: String,
    pub position: Span,
}

/// A later declaration of an already-declared name; wraps the shadowing
/// member and points back at the first occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMember {
    pub first_position: Span,
    pub original: Box<Member>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidMember {
    pub reason: String,
    pub original: Box<Member>,
    pub position: Span,
}

/// Native type definition: `type CharPtr = @native[t=*i8];`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub id: Option<String>,
    pub name: String,
    pub spec: TypeSpec,
    pub doc: Option<String>,
    pub position: Span,
}

/// Type alias: `type Int = Int64;`. After the type resolver has run,
/// `type_spec` holds the canonical target at the end of the alias chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAlias {
    pub id: Option<String>,
    pub name: String,
    pub aliased: TypeSpec,
    pub type_spec: Option<TypeSpec>,
    pub doc: Option<String>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub id: Option<String>,
    pub name: String,
    pub type_asc: TypeSpec,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

/// Named record type: `struct User { name: String, age: Int };`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStruct {
    pub id: Option<String>,
    pub name: String,
    pub fields: Vec<StructField>,
    pub doc: Option<String>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Member {
    Bnd(Bnd),
    TypeDef(TypeDef),
    TypeAlias(TypeAlias),
    TypeStruct(TypeStruct),
    MemberError(ParsingMemberError),
    Duplicate(DuplicateMember),
    Invalid(InvalidMember),
}

impl Member {
    pub fn name(&self) -> Option<&str> {
        match self {
            Member::Bnd(Bnd { name, .. }) => Some(name),
            Member::TypeDef(TypeDef { name, .. }) => Some(name),
            Member::TypeAlias(TypeAlias { name, .. }) => Some(name),
            Member::TypeStruct(TypeStruct { name, .. }) => Some(name),
            Member::MemberError(_) => None,
            Member::Duplicate(DuplicateMember { original, .. }) => original.name(),
            Member::Invalid(InvalidMember { original, .. }) => original.name(),
        }
    }

    /// The namespace a member declares into; duplicate checking groups by
    /// `(name, kind)`. Operator bindings carry the arity in their mangled
    /// name, so unary and binary declarations of one symbol coexist.
    pub fn kind(&self) -> &'static str {
        match self {
            Member::Bnd(_) => "bnd",
            Member::TypeDef(_) | Member::TypeAlias(_) | Member::TypeStruct(_) => "type",
            Member::MemberError(_) | Member::Duplicate(_) | Member::Invalid(_) => "error",
        }
    }

    pub fn stable_id(&self) -> Option<&str> {
        match self {
            Member::Bnd(Bnd { id, .. })
            | Member::TypeDef(TypeDef { id, .. })
            | Member::TypeAlias(TypeAlias { id, .. })
            | Member::TypeStruct(TypeStruct { id, .. }) => id.as_deref(),
            Member::MemberError(_) | Member::Duplicate(_) | Member::Invalid(_) => None,
        }
    }

    pub fn position(&self) -> Span {
        match self {
            Member::Bnd(Bnd { position, .. })
            | Member::TypeDef(TypeDef { position, .. })
            | Member::TypeAlias(TypeAlias { position, .. })
            | Member::TypeStruct(TypeStruct { position, .. })
            | Member::MemberError(ParsingMemberError { position, .. })
            | Member::Duplicate(DuplicateMember { position, .. })
            | Member::Invalid(InvalidMember { position, .. }) => position.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Member::MemberError(_) | Member::Duplicate(_) | Member::Invalid(_)
        )
    }

    /// Attach a documentation comment. Error members swallow the doc.
    pub fn with_doc(mut self, doc: Option<String>) -> Member {
        if doc.is_none() {
            return self;
        }

        match &mut self {
            Member::Bnd(Bnd { doc: slot, .. })
            | Member::TypeDef(TypeDef { doc: slot, .. })
            | Member::TypeAlias(TypeAlias { doc: slot, .. })
            | Member::TypeStruct(TypeStruct { doc: slot, .. }) => *slot = doc,
            Member::MemberError(_) | Member::Duplicate(_) | Member::Invalid(_) => {}
        }

        self
    }

    /// Ordered try over all member forms. Callers are expected to recover
    /// with [`Member::recover`] when this fails.
    pub fn parse(tokens: &mut ParseState<Token>) -> Result<Member, ParseError> {
        type MemberParser = fn(&mut ParseState<Token>) -> Result<Member, ParseError>;
        let alternatives: [MemberParser; 5] = [
            Bnd::parse_op,
            Bnd::parse_let,
            Bnd::parse_fn,
            TypeStruct::parse_struct,
            parse_type_member,
        ];

        let checkpoint = tokens.get_index();
        let mut last_error = None;

        for alternative in alternatives {
            tokens.set_index(checkpoint);
            match alternative(tokens) {
                Ok(member) => return Ok(member),
                Err(e) => last_error = Some(e),
            }
        }

        tokens.set_index(checkpoint);
        Err(last_error.expect("at least one alternative was tried"))
    }

    /// Recovery for an unparseable member: consume everything up to the
    /// end of the offending line and keep it as a `ParsingMemberError`.
    pub fn recover(tokens: &mut ParseState<Token>, cause: ParseError) -> Member {
        let mut consumed: Vec<Token> = vec![];

        let line = tokens
            .peek()
            .and_then(|t| t.position().start())
            .map(|p| p.line);

        while let Some(token) = tokens.peek() {
            let token_line = token.position().start().map(|p| p.line);
            if !consumed.is_empty() && token_line != line {
                break;
            }
            tokens.next();
            consumed.push(token);
        }

        let position = match (consumed.first(), consumed.last()) {
            (Some(first), Some(last)) => first.position().merge(&last.position()),
            _ => Span::Synthetic,
        };

        let raw = match &position {
            Span::Real { start, end, source } => {
                source[start.index..end.index.min(source.len())].to_string()
            }
            Span::Synthetic => consumed
                .iter()
                .map(|t| format!("{t:?}"))
                .collect::<Vec<_>>()
                .join(" "),
        };

        Member::MemberError(ParsingMemberError {
            raw,
            message: cause.message,
            position,
        })
    }
}

/// Capture an identifier position for a binding. Succeeds structurally on
/// anything identifier-shaped and reports invalid text as a
/// `ParsingIdError` instead of rejecting the whole member.
fn binding_id_or_error(
    tokens: &mut ParseState<Token>,
) -> Result<(String, Option<ParsingIdError>, Span), ParseError> {
    match tokens.next() {
        Some(Token::Id { value, position }) => Ok((value, None, position)),
        Some(Token::OperatorSymbol { value, position }) => {
            let error = ParsingIdError {
                raw: value.clone(),
                message: format!("'{value}' is not a valid binding name"),
                position: position.clone(),
            };
            Ok((value, Some(error), position))
        }
        Some(Token::Integer { value, position }) => {
            let raw = value.to_string();
            let error = ParsingIdError {
                raw: raw.clone(),
                message: format!("'{raw}' is not a valid binding name"),
                position: position.clone(),
            };
            Ok((raw, Some(error), position))
        }
        other => Err(ParseError {
            message: format!("expected a binding name, found {other:?}"),
            position: other.map(|t| t.position()),
        }),
    }
}

/// Capture an operator symbol position. Symbol runs and alphabetic
/// operator names are valid; reserved punctuation is captured with a
/// `ParsingIdError`.
fn operator_id_or_error(
    tokens: &mut ParseState<Token>,
) -> Result<(String, Option<ParsingIdError>, Span), ParseError> {
    let reserved = |raw: &str, position: Span| {
        let error = ParsingIdError {
            raw: raw.to_string(),
            message: format!("'{raw}' is reserved and cannot be declared as an operator"),
            position: position.clone(),
        };
        Ok((raw.to_string(), Some(error), position))
    };

    match tokens.next() {
        Some(Token::OperatorSymbol { value, position }) => Ok((value, None, position)),
        Some(Token::Id { value, position }) => Ok((value, None, position)),
        Some(Token::Assign { position }) => reserved("=", position),
        Some(Token::Dot { position }) => reserved(".", position),
        Some(Token::Colon { position }) => reserved(":", position),
        Some(Token::Tilde { position }) => reserved("~", position),
        Some(Token::SmallRightArrow { position }) => reserved("->", position),
        other => Err(ParseError {
            message: format!("expected an operator symbol, found {other:?}"),
            position: other.map(|t| t.position()),
        }),
    }
}

fn expect_semi(tokens: &mut ParseState<Token>) -> Result<Span, ParseError> {
    match tokens.next() {
        Some(Token::Semicolon { position }) => Ok(position),
        other => Err(ParseError {
            message: format!("expected ';' to end the member, found {other:?}"),
            position: other.map(|t| t.position()),
        }),
    }
}

fn expect_assign(tokens: &mut ParseState<Token>) -> Result<(), ParseError> {
    match tokens.next() {
        Some(Token::Assign { .. }) => Ok(()),
        other => Err(ParseError {
            message: format!("expected '=', found {other:?}"),
            position: other.map(|t| t.position()),
        }),
    }
}

fn parse_ascription(tokens: &mut ParseState<Token>) -> Result<Option<TypeSpec>, ParseError> {
    if !matches!(tokens.peek(), Some(Token::Colon { .. })) {
        return Ok(None);
    }
    tokens.next();

    let AstNode::TypeSpec(spec) = TypeSpec::parse(tokens)? else {
        unreachable!()
    };
    Ok(Some(spec))
}

fn parse_param_list(tokens: &mut ParseState<Token>) -> Result<Vec<Param>, ParseError> {
    let matcher = Comb::LPAREN >> (Comb::PARAM % Comb::COMMA) >> Comb::RPAREN;
    let result = matcher.parse(tokens)?;

    Ok(result
        .into_iter()
        .map(|node| {
            let AstNode::Param(param) = node else {
                unreachable!()
            };
            param
        })
        .collect())
}

impl Bnd {
    /// `fn name(params): Ret = body ;` desugars directly to a `Bnd` whose
    /// body is a lambda tagged with function meta.
    pub(crate) fn parse_fn(tokens: &mut ParseState<Token>) -> Result<Member, ParseError> {
        let start = match tokens.next() {
            Some(Token::FnKeyword { position }) => position,
            other => {
                return Err(ParseError {
                    message: format!("expected 'fn', found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        };

        let (name, id_error, _) = binding_id_or_error(tokens)?;
        let params = parse_param_list(tokens)?;
        let ret_asc = parse_ascription(tokens)?;
        expect_assign(tokens)?;

        let AstNode::Expr(body) = Expr::parse(tokens)? else {
            unreachable!()
        };
        let end = expect_semi(tokens)?;

        let position = start.merge(&end);
        let lambda = Lambda {
            params,
            ret_asc,
            type_spec: None,
            tail_recursive: false,
            position: position.clone(),
            body: Box::new(body),
        };

        let arity = Arity::of(lambda.params.len());
        Ok(Member::Bnd(Bnd {
            id: None,
            name: name.clone(),
            meta: Some(BindingMeta {
                origin: BindingOrigin::Function,
                arity,
                precedence: DEFAULT_PRECEDENCE,
                assoc: Assoc::Left,
                original_name: name.clone(),
                mangled_name: name,
            }),
            type_asc: None,
            type_spec: None,
            value: Expr::single(Term::Lambda(lambda)),
            doc: None,
            id_error,
            position,
        }))
    }

    /// `op <sym>(a, b): Ret <prec>? <assoc>? = body ;`
    pub(crate) fn parse_op(tokens: &mut ParseState<Token>) -> Result<Member, ParseError> {
        let start = match tokens.next() {
            Some(Token::OpKeyword { position }) => position,
            other => {
                return Err(ParseError {
                    message: format!("expected 'op', found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        };

        let (symbol, id_error, symbol_position) = operator_id_or_error(tokens)?;
        let params = parse_param_list(tokens)?;

        if params.is_empty() || params.len() > 2 {
            return Err(ParseError {
                message: format!(
                    "operator '{symbol}' takes one or two parameters, found {}",
                    params.len()
                ),
                position: Some(symbol_position),
            });
        }

        let ret_asc = parse_ascription(tokens)?;

        let precedence = match tokens.peek() {
            Some(Token::Integer { value, .. }) => {
                tokens.next();
                value as u32
            }
            _ => DEFAULT_PRECEDENCE,
        };

        let arity = Arity::of(params.len());
        let declared_assoc = match tokens.peek() {
            Some(Token::Id { value, .. }) if value == "left" => {
                tokens.next();
                Some(Assoc::Left)
            }
            Some(Token::Id { value, .. }) if value == "right" => {
                tokens.next();
                Some(Assoc::Right)
            }
            Some(Token::Id { value, .. }) if value == "none" => {
                tokens.next();
                Some(Assoc::None)
            }
            _ => None,
        };
        let assoc = declared_assoc.unwrap_or(match arity {
            Arity::Unary => Assoc::Right,
            _ => Assoc::Left,
        });

        expect_assign(tokens)?;

        let AstNode::Expr(body) = Expr::parse(tokens)? else {
            unreachable!()
        };
        let end = expect_semi(tokens)?;

        let position = start.merge(&end);
        let lambda = Lambda {
            params,
            ret_asc,
            type_spec: None,
            tail_recursive: false,
            position: position.clone(),
            body: Box::new(body),
        };

        let mangled = mangle_operator(&symbol, arity);
        Ok(Member::Bnd(Bnd {
            id: None,
            name: mangled.clone(),
            meta: Some(BindingMeta {
                origin: BindingOrigin::Operator,
                arity,
                precedence,
                assoc,
                original_name: symbol,
                mangled_name: mangled,
            }),
            type_asc: None,
            type_spec: None,
            value: Expr::single(Term::Lambda(lambda)),
            doc: None,
            id_error,
            position,
        }))
    }

    /// `let name (: T)? = body ;` at module level.
    pub(crate) fn parse_let(tokens: &mut ParseState<Token>) -> Result<Member, ParseError> {
        let start = match tokens.next() {
            Some(Token::LetKeyword { position }) => position,
            other => {
                return Err(ParseError {
                    message: format!("expected 'let', found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        };

        let (name, id_error, _) = binding_id_or_error(tokens)?;
        let type_asc = parse_ascription(tokens)?;
        expect_assign(tokens)?;

        let AstNode::Expr(body) = Expr::parse(tokens)? else {
            unreachable!()
        };
        let end = expect_semi(tokens)?;

        Ok(Member::Bnd(Bnd {
            id: None,
            name,
            meta: None,
            type_asc,
            type_spec: None,
            value: body,
            doc: None,
            id_error,
            position: start.merge(&end),
        }))
    }
}

impl TypeStruct {
    /// `struct Name { field: T, ... } ;` with an optional trailing comma
    /// after the last field.
    pub(crate) fn parse_struct(tokens: &mut ParseState<Token>) -> Result<Member, ParseError> {
        let start = match tokens.next() {
            Some(Token::StructKeyword { position }) => position,
            other => {
                return Err(ParseError {
                    message: format!("expected 'struct', found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        };

        let AstNode::Id(name) = Ident::parse(tokens)? else {
            unreachable!()
        };

        let matcher = Comb::LBRACE >> (Comb::STRUCT_FIELD % Comb::COMMA) >> !Comb::COMMA
            >> Comb::RBRACE;
        let fields = matcher
            .parse(tokens)?
            .into_iter()
            .map(|node| {
                let AstNode::StructField(field) = node else {
                    unreachable!()
                };
                field
            })
            .collect();

        let end = expect_semi(tokens)?;

        Ok(Member::TypeStruct(TypeStruct {
            id: None,
            name: name.value,
            fields,
            doc: None,
            position: start.merge(&end),
        }))
    }

    /// The companion constructor binding of a struct declaration: a
    /// function of the fields whose body is a `DataConstructor` marker.
    pub fn constructor(&self) -> Bnd {
        let params = self
            .fields
            .iter()
            .map(|field| Param {
                id: None,
                name: field.name.clone(),
                type_asc: Some(field.type_asc.clone()),
                type_spec: None,
                consuming: false,
                position: Span::Synthetic,
            })
            .collect::<Vec<_>>();

        let arity = Arity::of(params.len());
        let lambda = Lambda {
            params,
            ret_asc: Some(TypeSpec::Ref(super::TypeRef {
                name: self.name.clone(),
                resolved_id: None,
                position: Span::Synthetic,
            })),
            type_spec: None,
            tail_recursive: false,
            position: Span::Synthetic,
            body: Box::new(Expr::single(Term::Data(super::DataConstructor {
                struct_name: self.name.clone(),
                type_spec: None,
                position: Span::Synthetic,
            }))),
        };

        Bnd {
            id: None,
            name: self.name.clone(),
            meta: Some(BindingMeta {
                origin: BindingOrigin::Function,
                arity,
                precedence: DEFAULT_PRECEDENCE,
                assoc: Assoc::Left,
                original_name: self.name.clone(),
                mangled_name: self.name.clone(),
            }),
            type_asc: None,
            type_spec: None,
            value: Expr::single(Term::Lambda(lambda)),
            doc: None,
            id_error: None,
            position: Span::Synthetic,
        }
    }
}

/// `type Name = @native...;` defines a native type; `type Name = T;`
/// declares an alias.
fn parse_type_member(tokens: &mut ParseState<Token>) -> Result<Member, ParseError> {
    let start = match tokens.next() {
        Some(Token::TypeKeyword { position }) => position,
        other => {
            return Err(ParseError {
                message: format!("expected 'type', found {other:?}"),
                position: other.map(|t| t.position()),
            })
        }
    };

    let AstNode::Id(name) = Ident::parse(tokens)? else {
        unreachable!()
    };
    expect_assign(tokens)?;

    let native = matches!(tokens.peek(), Some(Token::AtNative { .. }));
    let AstNode::TypeSpec(spec) = TypeSpec::parse(tokens)? else {
        unreachable!()
    };
    let end = expect_semi(tokens)?;
    let position = start.merge(&end);

    if native {
        Ok(Member::TypeDef(TypeDef {
            id: None,
            name: name.value,
            spec,
            doc: None,
            position,
        }))
    } else {
        Ok(Member::TypeAlias(TypeAlias {
            id: None,
            name: name.value,
            aliased: spec,
            type_spec: None,
            doc: None,
            position,
        }))
    }
}

impl FromTokens<Token> for StructField {
    fn parse(tokens: &mut ParseState<Token>) -> Result<AstNode, ParseError> {
        let AstNode::Id(name) = Ident::parse(tokens)? else {
            unreachable!()
        };

        match tokens.next() {
            Some(Token::Colon { .. }) => {}
            other => {
                return Err(ParseError {
                    message: format!("expected ':' after field name, found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        }

        let AstNode::TypeSpec(type_asc) = TypeSpec::parse(tokens)? else {
            unreachable!()
        };

        let position = name.position.merge(&type_asc.position());
        Ok(AstNode::StructField(StructField {
            id: None,
            name: name.value,
            type_asc,
            type_spec: None,
            position,
        }))
    }
}

impl From<StructField> for AstNode {
    fn from(value: StructField) -> Self {
        AstNode::StructField(value)
    }
}

impl From<Member> for AstNode {
    fn from(value: Member) -> Self {
        AstNode::Member(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Lexer;
    use crate::parser::ast::{Ref, TypeRef};

    use super::*;

    fn parse_member(input: &str) -> Member {
        let mut tokens = Lexer::new(input).lex().expect("lexing failed").into();
        Member::parse(&mut tokens).expect("parsing failed")
    }

    #[test]
    fn test_parse_fn_desugars_to_lambda() {
        let Member::Bnd(bnd) = parse_member("fn add(a: Int, b: Int): Int = a + b;") else {
            panic!("expected a binding");
        };

        assert_eq!(bnd.name, "add");
        let meta = bnd.meta.as_ref().expect("function meta missing");
        assert_eq!(meta.origin, BindingOrigin::Function);
        assert_eq!(meta.arity, Arity::Binary);

        let lambda = bnd.lambda().expect("lambda body missing");
        assert_eq!(lambda.params.len(), 2);
        assert!(matches!(
            lambda.ret_asc,
            Some(TypeSpec::Ref(TypeRef { ref name, .. })) if name == "Int"
        ));
    }

    #[test]
    fn test_parse_nullary_fn() {
        let Member::Bnd(bnd) = parse_member("fn g(): Int = 42;") else {
            panic!("expected a binding");
        };

        assert_eq!(bnd.meta.as_ref().map(|m| m.arity), Some(Arity::Nullary));
    }

    #[test]
    fn test_parse_binary_operator() {
        let Member::Bnd(bnd) = parse_member("op *(a: Int, b: Int): Int 80 left = mul a b;")
        else {
            panic!("expected a binding");
        };

        assert_eq!(bnd.name, "op.mul.2");
        let meta = bnd.meta.expect("operator meta missing");
        assert_eq!(meta.origin, BindingOrigin::Operator);
        assert_eq!(meta.arity, Arity::Binary);
        assert_eq!(meta.precedence, 80);
        assert_eq!(meta.assoc, Assoc::Left);
        assert_eq!(meta.original_name, "*");
    }

    #[test]
    fn test_parse_operator_defaults() {
        let Member::Bnd(bnd) = parse_member("op %%(a: Int, b: Int): Int = a;") else {
            panic!("expected a binding");
        };

        let meta = bnd.meta.expect("operator meta missing");
        assert_eq!(meta.precedence, DEFAULT_PRECEDENCE);
        assert_eq!(meta.assoc, Assoc::Left);
    }

    #[test]
    fn test_parse_unary_operator_defaults_right() {
        let Member::Bnd(bnd) = parse_member("op !!(a: Bool): Bool = a;") else {
            panic!("expected a binding");
        };

        let meta = bnd.meta.expect("operator meta missing");
        assert_eq!(meta.arity, Arity::Unary);
        assert_eq!(meta.assoc, Assoc::Right);
        assert_eq!(bnd.name, "op.bangbang.1");
    }

    #[test]
    fn test_parse_let_member() {
        let Member::Bnd(bnd) = parse_member("let x = f;") else {
            panic!("expected a binding");
        };

        assert_eq!(bnd.name, "x");
        assert!(bnd.meta.is_none());
        assert!(
            matches!(&bnd.value.terms[0], Term::Ref(Ref { name, .. }) if name == "f")
        );
    }

    #[test]
    fn test_parse_struct_member() {
        let Member::TypeStruct(ts) = parse_member("struct User { name: String, age: Int };")
        else {
            panic!("expected a struct");
        };

        assert_eq!(ts.name, "User");
        assert_eq!(ts.fields.len(), 2);
        assert_eq!(ts.fields[0].name, "name");
    }

    #[test]
    fn test_struct_constructor_shape() {
        let Member::TypeStruct(ts) = parse_member("struct User { name: String, age: Int };")
        else {
            panic!("expected a struct");
        };

        let ctor = ts.constructor();
        assert_eq!(ctor.name, "User");
        let lambda = ctor.lambda().expect("constructor lambda missing");
        assert_eq!(lambda.params.len(), 2);
        assert!(matches!(
            lambda.body.terms[0],
            Term::Data(super::super::DataConstructor { .. })
        ));
        assert!(ctor.position.is_synthetic());
    }

    #[test]
    fn test_parse_type_alias_and_native_def() {
        let Member::TypeAlias(alias) = parse_member("type Int = Int64;") else {
            panic!("expected an alias");
        };
        assert_eq!(alias.name, "Int");

        let Member::TypeDef(def) = parse_member("type CharPtr = @native[t=*i8];") else {
            panic!("expected a native type def");
        };
        assert_eq!(def.name, "CharPtr");
    }

    #[test]
    fn test_invalid_binding_name_is_captured() {
        let Member::Bnd(bnd) = parse_member("fn ++(a: Int): Int = a;") else {
            panic!("expected a binding");
        };

        let error = bnd.id_error.expect("expected a captured id error");
        assert_eq!(error.raw, "++");
    }

    #[test]
    fn test_member_recovery_consumes_line() {
        let mut tokens = Lexer::new("fn broken((((;\nlet x = 1;")
            .lex()
            .expect("lexing failed")
            .into();

        let error = Member::parse(&mut tokens).expect_err("member should not parse");
        let member = Member::recover(&mut tokens, error);

        let Member::MemberError(e) = member else {
            panic!("expected a member error");
        };
        assert!(e.raw.contains("broken"));

        // the following member is intact
        let next = Member::parse(&mut tokens).expect("next member should parse");
        assert_eq!(next.name(), Some("x"));
    }
}
