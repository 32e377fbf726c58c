use serde::{Deserialize, Serialize};

use crate::{
    lexer::{GetPosition, Span, Token},
    parser::{FromTokens, ParseError, ParseState},
};

use super::{types::parse_native_attrs, AstNode, MemEffect, TypeSpec};

/// Where a body-local binding came from. The ownership analyzer skips
/// bindings it introduced itself on a re-run, which keeps the rewrite
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LetOrigin {
    User,
    TempWrapper,
    Witness,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub terms: Vec<Term>,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

impl Expr {
    pub fn single(term: Term) -> Expr {
        Expr {
            position: term.position(),
            type_spec: term.type_spec(),
            terms: vec![term],
        }
    }

    /// The result terms of this expression, i.e. everything after the
    /// leading `let` statements.
    pub fn result_terms(&self) -> &[Term] {
        let first = self
            .terms
            .iter()
            .position(|t| !matches!(t, Term::Let(_)))
            .unwrap_or(self.terms.len());
        &self.terms[first..]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermGroup {
    pub inner: Box<Expr>,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cond {
    pub condition: Box<Expr>,
    pub then_branch: Box<Expr>,
    pub else_branch: Box<Expr>,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// The applied function: always a `Ref` or another `App` once the
    /// expression rewriter has run.
    pub func: Box<Term>,
    pub arg: Box<Expr>,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub id: Option<String>,
    pub name: String,
    pub type_asc: Option<TypeSpec>,
    pub type_spec: Option<TypeSpec>,
    /// `~name`: the callee takes ownership of the argument.
    pub consuming: bool,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub ret_asc: Option<TypeSpec>,
    pub body: Box<Expr>,
    pub type_spec: Option<TypeSpec>,
    pub tail_recursive: bool,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ref {
    pub name: String,
    pub resolved_id: Option<String>,
    pub candidate_ids: Vec<String>,
    /// `~ref` at a call site: the caller hands the binding over.
    pub consume: bool,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

impl Ref {
    pub fn unresolved(name: impl ToString, position: Span) -> Ref {
        Ref {
            name: name.to_string(),
            resolved_id: None,
            candidate_ids: vec![],
            consume: false,
            type_spec: None,
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub target: Box<Term>,
    pub field: String,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitInt {
    pub value: i64,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitFloat {
    pub value: f64,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitString {
    pub value: String,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitBool {
    pub value: bool,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitUnit {
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    pub elements: Vec<Expr>,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placeholder {
    pub position: Span,
}

/// The typed hole `???`: stands for a missing expression and adopts the
/// type its context expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hole {
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

/// Marker body for externally implemented bindings: an LLVM IR template
/// (placeholders `%result`, `%type`, `%operand`, `%operand1`, `%operand2`)
/// or, without a template, a plain external symbol the runtime provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeImpl {
    pub template: Option<String>,
    pub mem_effect: Option<MemEffect>,
    pub position: Span,
}

/// Marker body of a synthesized struct constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConstructor {
    pub struct_name: String,
    pub type_spec: Option<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetBind {
    pub id: Option<String>,
    pub name: String,
    pub type_asc: Option<TypeSpec>,
    pub type_spec: Option<TypeSpec>,
    pub value: Box<Expr>,
    pub origin: LetOrigin,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidExpression {
    pub original: Box<Term>,
    pub reason: String,
    pub position: Span,
}

/// Unrecognized material inside an expression; the raw token text is kept
/// so error reporting can echo it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermError {
    pub message: String,
    pub raw: String,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Expr(Box<Expr>),
    Group(TermGroup),
    Cond(Cond),
    App(App),
    Lambda(Lambda),
    Ref(Ref),
    Select(Select),
    Int(LitInt),
    Float(LitFloat),
    Str(LitString),
    Bool(LitBool),
    Unit(LitUnit),
    Tuple(Tuple),
    Placeholder(Placeholder),
    Hole(Hole),
    Native(NativeImpl),
    Data(DataConstructor),
    Let(LetBind),
    Invalid(InvalidExpression),
    Error(TermError),
}

impl Term {
    pub fn position(&self) -> Span {
        match self {
            Term::Expr(expr) => expr.position.clone(),
            Term::Group(TermGroup { position, .. })
            | Term::Cond(Cond { position, .. })
            | Term::App(App { position, .. })
            | Term::Lambda(Lambda { position, .. })
            | Term::Ref(Ref { position, .. })
            | Term::Select(Select { position, .. })
            | Term::Int(LitInt { position, .. })
            | Term::Float(LitFloat { position, .. })
            | Term::Str(LitString { position, .. })
            | Term::Bool(LitBool { position, .. })
            | Term::Unit(LitUnit { position })
            | Term::Tuple(Tuple { position, .. })
            | Term::Placeholder(Placeholder { position })
            | Term::Hole(Hole { position, .. })
            | Term::Native(NativeImpl { position, .. })
            | Term::Data(DataConstructor { position, .. })
            | Term::Let(LetBind { position, .. })
            | Term::Invalid(InvalidExpression { position, .. })
            | Term::Error(TermError { position, .. }) => position.clone(),
        }
    }

    pub fn type_spec(&self) -> Option<TypeSpec> {
        match self {
            Term::Expr(expr) => expr.type_spec.clone(),
            Term::Group(TermGroup { type_spec, .. })
            | Term::Cond(Cond { type_spec, .. })
            | Term::App(App { type_spec, .. })
            | Term::Lambda(Lambda { type_spec, .. })
            | Term::Ref(Ref { type_spec, .. })
            | Term::Select(Select { type_spec, .. })
            | Term::Tuple(Tuple { type_spec, .. })
            | Term::Hole(Hole { type_spec, .. })
            | Term::Data(DataConstructor { type_spec, .. }) => type_spec.clone(),
            Term::Let(LetBind { type_spec, .. }) => type_spec.clone(),
            Term::Int(_) | Term::Float(_) | Term::Str(_) | Term::Bool(_) | Term::Unit(_) => None,
            Term::Placeholder(_) | Term::Native(_) | Term::Invalid(_) | Term::Error(_) => None,
        }
    }

    pub fn set_type(&mut self, spec: TypeSpec) {
        match self {
            Term::Expr(expr) => expr.type_spec = Some(spec),
            Term::Group(TermGroup { type_spec, .. })
            | Term::Cond(Cond { type_spec, .. })
            | Term::App(App { type_spec, .. })
            | Term::Lambda(Lambda { type_spec, .. })
            | Term::Ref(Ref { type_spec, .. })
            | Term::Select(Select { type_spec, .. })
            | Term::Tuple(Tuple { type_spec, .. })
            | Term::Hole(Hole { type_spec, .. })
            | Term::Data(DataConstructor { type_spec, .. })
            | Term::Let(LetBind { type_spec, .. }) => *type_spec = Some(spec),
            Term::Int(_)
            | Term::Float(_)
            | Term::Str(_)
            | Term::Bool(_)
            | Term::Unit(_)
            | Term::Placeholder(_)
            | Term::Native(_)
            | Term::Invalid(_)
            | Term::Error(_) => {}
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Term::Invalid(_) | Term::Error(_))
    }

    /// Depth-first walk over this term and everything below it.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Term)) {
        f(self);
        match self {
            Term::Expr(expr) => expr.walk(f),
            Term::Group(group) => group.inner.walk(f),
            Term::Cond(cond) => {
                cond.condition.walk(f);
                cond.then_branch.walk(f);
                cond.else_branch.walk(f);
            }
            Term::App(app) => {
                app.func.walk(f);
                app.arg.walk(f);
            }
            Term::Lambda(lambda) => lambda.body.walk(f),
            Term::Select(select) => select.target.walk(f),
            Term::Tuple(tuple) => {
                for element in &tuple.elements {
                    element.walk(f);
                }
            }
            Term::Let(bind) => bind.value.walk(f),
            Term::Invalid(invalid) => invalid.original.walk(f),
            Term::Ref(_)
            | Term::Int(_)
            | Term::Float(_)
            | Term::Str(_)
            | Term::Bool(_)
            | Term::Unit(_)
            | Term::Placeholder(_)
            | Term::Hole(_)
            | Term::Native(_)
            | Term::Data(_)
            | Term::Error(_) => {}
        }
    }
}

impl Expr {
    /// Depth-first walk over every term in this expression.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Term)) {
        for term in &self.terms {
            term.walk(f);
        }
    }

    /// Mutable counterpart of [`Expr::walk`].
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Term)) {
        for term in &mut self.terms {
            term.walk_mut(f);
        }
    }
}

impl Term {
    /// Mutable counterpart of [`Term::walk`].
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Term)) {
        f(self);
        match self {
            Term::Expr(expr) => expr.walk_mut(f),
            Term::Group(group) => group.inner.walk_mut(f),
            Term::Cond(cond) => {
                cond.condition.walk_mut(f);
                cond.then_branch.walk_mut(f);
                cond.else_branch.walk_mut(f);
            }
            Term::App(app) => {
                app.func.walk_mut(f);
                app.arg.walk_mut(f);
            }
            Term::Lambda(lambda) => lambda.body.walk_mut(f),
            Term::Select(select) => select.target.walk_mut(f),
            Term::Tuple(tuple) => {
                for element in &mut tuple.elements {
                    element.walk_mut(f);
                }
            }
            Term::Let(bind) => bind.value.walk_mut(f),
            Term::Invalid(invalid) => invalid.original.walk_mut(f),
            Term::Ref(_)
            | Term::Int(_)
            | Term::Float(_)
            | Term::Str(_)
            | Term::Bool(_)
            | Term::Unit(_)
            | Term::Placeholder(_)
            | Term::Hole(_)
            | Term::Native(_)
            | Term::Data(_)
            | Term::Error(_) => {}
        }
    }
}

/// Tokens that end a flat term run without being part of it.
fn at_terminator(tokens: &ParseState<Token>) -> bool {
    matches!(
        tokens.peek(),
        None | Some(Token::Semicolon { .. })
            | Some(Token::RParen { .. })
            | Some(Token::RBrace { .. })
            | Some(Token::Comma { .. })
            | Some(Token::ThenKeyword { .. })
            | Some(Token::ElifKeyword { .. })
            | Some(Token::ElseKeyword { .. })
    )
}

impl FromTokens<Token> for Expr {
    /// Parse a body: leading `let` statements followed by a flat term run.
    /// Operator fixity is not resolved here; the expression rewriter turns
    /// the flat run into application trees later. Unrecognized material is
    /// collected into `Term::Error` so a broken expression never aborts the
    /// surrounding member.
    fn parse(tokens: &mut ParseState<Token>) -> Result<AstNode, ParseError> {
        let mut terms: Vec<Term> = vec![];

        while matches!(tokens.peek(), Some(Token::LetKeyword { .. })) {
            terms.push(Term::Let(LetBind::parse_bind(tokens)?));
        }

        loop {
            if at_terminator(tokens) {
                break;
            }

            let checkpoint = tokens.get_index();
            match Term::parse(tokens) {
                Ok(AstNode::Term(term)) => terms.push(term),
                Ok(_) => unreachable!(),
                Err(e) => {
                    tokens.set_index(checkpoint);
                    if terms.is_empty() {
                        return Err(e);
                    }
                    terms.push(recover_term_error(tokens, e));
                }
            }
        }

        let Some(first) = terms.first() else {
            let position = tokens.peek().map(|t| t.position());
            return Err(ParseError {
                message: "expected an expression".to_string(),
                position,
            });
        };

        let position = first
            .position()
            .merge(&terms.last().expect("terms is non-empty").position());

        Ok(AstNode::Expr(Expr {
            terms,
            type_spec: None,
            position,
        }))
    }
}

/// Consume unparseable tokens up to the next terminator and wrap them in a
/// `Term::Error` so analysis can continue around them.
fn recover_term_error(tokens: &mut ParseState<Token>, cause: ParseError) -> Term {
    let mut raw = vec![];
    let mut position = Span::Synthetic;

    while !at_terminator(tokens) {
        let Some(token) = tokens.next() else { break };
        position = position.merge(&token.position());
        raw.push(format!("{token:?}"));
    }

    Term::Error(TermError {
        message: cause.message,
        raw: raw.join(" "),
        position,
    })
}

impl FromTokens<Token> for Term {
    fn parse(tokens: &mut ParseState<Token>) -> Result<AstNode, ParseError> {
        let term = match tokens.peek() {
            Some(Token::IfKeyword { .. }) => Term::Cond(Cond::parse_cond(tokens)?),
            Some(Token::LParen { .. }) => parse_parenthesized(tokens)?,
            Some(Token::Integer { value, position }) => {
                tokens.next();
                Term::Int(LitInt { value, position })
            }
            Some(Token::FloatingPoint { value, position }) => {
                tokens.next();
                Term::Float(LitFloat { value, position })
            }
            Some(Token::StringLiteral { value, position }) => {
                tokens.next();
                Term::Str(LitString { value, position })
            }
            Some(Token::BoolLiteral { value, position }) => {
                tokens.next();
                Term::Bool(LitBool { value, position })
            }
            Some(Token::HoleMark { position }) => {
                tokens.next();
                Term::Hole(Hole {
                    type_spec: None,
                    position,
                })
            }
            Some(Token::Underscore { position }) => {
                tokens.next();
                Term::Placeholder(Placeholder { position })
            }
            Some(Token::AtNative { .. }) => Term::Native(parse_native_impl(tokens)?),
            Some(Token::Tilde { position }) => {
                tokens.next();
                match tokens.next() {
                    Some(Token::Id { value, position: id_position }) => Term::Ref(Ref {
                        name: value,
                        resolved_id: None,
                        candidate_ids: vec![],
                        consume: true,
                        type_spec: None,
                        position: position.merge(&id_position),
                    }),
                    other => {
                        return Err(ParseError {
                            message: format!("expected a binding name after '~', found {other:?}"),
                            position: other.map(|t| t.position()),
                        })
                    }
                }
            }
            Some(Token::Id { value, position }) => {
                tokens.next();
                let mut term = Term::Ref(Ref::unresolved(value, position));
                // greedily extend into a selection chain: `a.b.c`
                while matches!(tokens.peek(), Some(Token::Dot { .. }))
                    && matches!(tokens.peek_ahead(1), Some(Token::Id { .. }))
                {
                    tokens.next();
                    let Some(Token::Id { value, position }) = tokens.next() else {
                        unreachable!("peeked an identifier");
                    };
                    let merged = term.position().merge(&position);
                    term = Term::Select(Select {
                        target: Box::new(term),
                        field: value,
                        type_spec: None,
                        position: merged,
                    });
                }
                term
            }
            Some(Token::OperatorSymbol { value, position }) => {
                tokens.next();
                Term::Ref(Ref::unresolved(value, position))
            }
            other => {
                return Err(ParseError {
                    message: format!("expected a term, found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        };

        Ok(AstNode::Term(term))
    }
}

/// `()` is the unit literal, `(e)` a group and `(a, b, ...)` a tuple.
fn parse_parenthesized(tokens: &mut ParseState<Token>) -> Result<Term, ParseError> {
    let Some(Token::LParen { position: start }) = tokens.next() else {
        unreachable!("caller peeked the opening parenthesis");
    };

    if let Some(Token::RParen { position: end }) = tokens.peek() {
        tokens.next();
        return Ok(Term::Unit(LitUnit {
            position: start.merge(&end),
        }));
    }

    let AstNode::Expr(first) = Expr::parse(tokens)? else {
        unreachable!()
    };

    let mut elements = vec![first];
    while matches!(tokens.peek(), Some(Token::Comma { .. })) {
        tokens.next();
        let AstNode::Expr(next) = Expr::parse(tokens)? else {
            unreachable!()
        };
        elements.push(next);
    }

    match tokens.next() {
        Some(Token::RParen { position: end }) => {
            let position = start.merge(&end);
            if elements.len() == 1 {
                Ok(Term::Group(TermGroup {
                    inner: Box::new(elements.remove(0)),
                    type_spec: None,
                    position,
                }))
            } else {
                Ok(Term::Tuple(Tuple {
                    elements,
                    type_spec: None,
                    position,
                }))
            }
        }
        other => Err(ParseError {
            message: format!("expected ')' to close the expression, found {other:?}"),
            position: other.map(|t| t.position()),
        }),
    }
}

fn parse_native_impl(tokens: &mut ParseState<Token>) -> Result<NativeImpl, ParseError> {
    let Some(Token::AtNative { position: start }) = tokens.next() else {
        unreachable!("caller peeked the native marker");
    };

    let (_, _, mem_effect) = parse_native_attrs(tokens)?;

    let (template, end) = match tokens.peek() {
        Some(Token::StringLiteral { value, position }) => {
            tokens.next();
            (Some(value), position)
        }
        _ => (None, start.clone()),
    };

    Ok(NativeImpl {
        template,
        mem_effect,
        position: start.merge(&end),
    })
}

impl Cond {
    /// `if c then a (elif c2 then b)* else z`; `elif` chains nest in the
    /// else position so every conditional has exactly two branches.
    fn parse_cond(tokens: &mut ParseState<Token>) -> Result<Cond, ParseError> {
        let Some(Token::IfKeyword { position: start }) = tokens.next() else {
            unreachable!("caller peeked the if keyword");
        };

        let AstNode::Expr(condition) = Expr::parse(tokens)? else {
            unreachable!()
        };

        expect_then(tokens)?;

        let AstNode::Expr(then_branch) = Expr::parse(tokens)? else {
            unreachable!()
        };

        let mut elifs = vec![];
        loop {
            match tokens.peek() {
                Some(Token::ElifKeyword { position }) => {
                    tokens.next();
                    let AstNode::Expr(elif_condition) = Expr::parse(tokens)? else {
                        unreachable!()
                    };
                    expect_then(tokens)?;
                    let AstNode::Expr(elif_branch) = Expr::parse(tokens)? else {
                        unreachable!()
                    };
                    elifs.push((elif_condition, elif_branch, position));
                }
                Some(Token::ElseKeyword { .. }) => {
                    tokens.next();
                    break;
                }
                other => {
                    return Err(ParseError {
                        message: format!("expected 'elif' or 'else', found {other:?}"),
                        position: other.map(|t| t.position()),
                    })
                }
            }
        }

        let AstNode::Expr(else_branch) = Expr::parse(tokens)? else {
            unreachable!()
        };

        let position = start.merge(&else_branch.position);

        // fold the elif chain backwards into nested conditionals
        let mut else_acc = else_branch;
        for (elif_condition, elif_branch, elif_position) in elifs.into_iter().rev() {
            let cond = Cond {
                position: elif_position.merge(&else_acc.position),
                condition: Box::new(elif_condition),
                then_branch: Box::new(elif_branch),
                else_branch: Box::new(else_acc),
                type_spec: None,
            };
            else_acc = Expr::single(Term::Cond(cond));
        }

        Ok(Cond {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_acc),
            type_spec: None,
            position,
        })
    }
}

fn expect_then(tokens: &mut ParseState<Token>) -> Result<(), ParseError> {
    match tokens.next() {
        Some(Token::ThenKeyword { .. }) => Ok(()),
        other => Err(ParseError {
            message: format!("expected 'then', found {other:?}"),
            position: other.map(|t| t.position()),
        }),
    }
}

impl LetBind {
    /// `let name (: T)? = body ;` inside an expression sequence.
    pub(crate) fn parse_bind(tokens: &mut ParseState<Token>) -> Result<LetBind, ParseError> {
        let Some(Token::LetKeyword { position: start }) = tokens.next() else {
            unreachable!("caller peeked the let keyword");
        };

        let name = match tokens.next() {
            Some(Token::Id { value, .. }) => value,
            Some(Token::Underscore { .. }) => "_".to_string(),
            other => {
                return Err(ParseError {
                    message: format!("expected a binding name after 'let', found {other:?}"),
                    position: other.map(|t| t.position()),
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

        match tokens.next() {
            Some(Token::Assign { .. }) => {}
            other => {
                return Err(ParseError {
                    message: format!("expected '=' in let binding, found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        }

        let AstNode::Expr(value) = Expr::parse(tokens)? else {
            unreachable!()
        };

        let end = match tokens.next() {
            Some(Token::Semicolon { position }) => position,
            other => {
                return Err(ParseError {
                    message: format!("expected ';' after let binding, found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        };

        Ok(LetBind {
            id: None,
            name,
            type_asc,
            type_spec: None,
            value: Box::new(value),
            origin: LetOrigin::User,
            position: start.merge(&end),
        })
    }
}

impl From<Expr> for AstNode {
    fn from(value: Expr) -> Self {
        AstNode::Expr(value)
    }
}

impl From<Term> for AstNode {
    fn from(value: Term) -> Self {
        AstNode::Term(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Lexer;

    use super::*;

    fn parse_expr(input: &str) -> Expr {
        let mut tokens = Lexer::new(input).lex().expect("lexing failed").into();
        let AstNode::Expr(expr) = Expr::parse(&mut tokens).expect("parsing failed") else {
            unreachable!()
        };
        expr
    }

    #[test]
    fn test_parse_flat_term_run() {
        let expr = parse_expr("f x 42");

        assert_eq!(expr.terms.len(), 3);
        assert!(matches!(&expr.terms[0], Term::Ref(Ref { name, .. }) if name == "f"));
        assert!(matches!(&expr.terms[1], Term::Ref(Ref { name, .. }) if name == "x"));
        assert!(matches!(&expr.terms[2], Term::Int(LitInt { value: 42, .. })));
    }

    #[test]
    fn test_operators_stay_flat() {
        let expr = parse_expr("1 + 2 * 3");

        assert_eq!(expr.terms.len(), 5);
        assert!(matches!(&expr.terms[1], Term::Ref(Ref { name, .. }) if name == "+"));
        assert!(matches!(&expr.terms[3], Term::Ref(Ref { name, .. }) if name == "*"));
    }

    #[test]
    fn test_parse_let_sequence() {
        let expr = parse_expr("let s = \"hello\"; println s");

        assert_eq!(expr.terms.len(), 3);
        let Term::Let(bind) = &expr.terms[0] else {
            panic!("expected a let binding");
        };
        assert_eq!(bind.name, "s");
        assert_eq!(bind.origin, LetOrigin::User);
        assert_eq!(expr.result_terms().len(), 2);
    }

    #[test]
    fn test_parse_conditional_with_elif() {
        let expr = parse_expr("if a then 1 elif b then 2 else 3");

        assert_eq!(expr.terms.len(), 1);
        let Term::Cond(cond) = &expr.terms[0] else {
            panic!("expected a conditional");
        };
        // the elif chain nests in the else position
        let Term::Cond(nested) = &cond.else_branch.terms[0] else {
            panic!("expected a nested conditional for elif");
        };
        assert!(matches!(
            nested.then_branch.terms[0],
            Term::Int(LitInt { value: 2, .. })
        ));
        assert!(matches!(
            nested.else_branch.terms[0],
            Term::Int(LitInt { value: 3, .. })
        ));
    }

    #[test]
    fn test_parse_unit_group_tuple() {
        assert!(matches!(parse_expr("()").terms[0], Term::Unit(_)));
        assert!(matches!(parse_expr("(x)").terms[0], Term::Group(_)));
        let Term::Tuple(tuple) = &parse_expr("(x, 1)").terms[0] else {
            panic!("expected a tuple");
        };
        assert_eq!(tuple.elements.len(), 2);
    }

    #[test]
    fn test_parse_selection_chain() {
        let expr = parse_expr("u.name");

        let Term::Select(select) = &expr.terms[0] else {
            panic!("expected a selection");
        };
        assert_eq!(select.field, "name");
        assert!(matches!(&*select.target, Term::Ref(Ref { name, .. }) if name == "u"));
    }

    #[test]
    fn test_parse_consuming_ref() {
        let expr = parse_expr("consume_string ~s");

        let Term::Ref(arg) = &expr.terms[1] else {
            panic!("expected a ref");
        };
        assert!(arg.consume);
        assert_eq!(arg.name, "s");
    }

    #[test]
    fn test_parse_hole_and_placeholder() {
        let expr = parse_expr("f ??? _");

        assert!(matches!(expr.terms[1], Term::Hole(_)));
        assert!(matches!(expr.terms[2], Term::Placeholder(_)));
    }

    #[test]
    fn test_parse_native_body() {
        let expr = parse_expr("@native[mem=alloc] \"%result = call ptr @mml_readline()\"");

        let Term::Native(native) = &expr.terms[0] else {
            panic!("expected a native impl");
        };
        assert_eq!(native.mem_effect, Some(MemEffect::Alloc));
        assert!(native.template.as_deref().unwrap().contains("mml_readline"));
    }

    #[test]
    fn test_expression_recovery_produces_term_error() {
        // `}` cannot start a term and `]` cannot either; the run recovers
        let mut tokens = Lexer::new("f x ] y").lex().expect("lexing failed").into();
        let AstNode::Expr(expr) = Expr::parse(&mut tokens).expect("parsing failed") else {
            unreachable!()
        };

        assert!(expr.terms.iter().any(|t| matches!(t, Term::Error(_))));
    }
}
