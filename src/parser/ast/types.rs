use serde::{Deserialize, Serialize};

use crate::{
    lexer::{GetPosition, Span, Token},
    parser::{combinators::Comb, FromTokens, ParseError, ParseState},
};

use super::{AstNode, Ident};

/// Memory effect attached to native types and native implementations.
/// `Alloc` marks values that live on the heap and must be released;
/// `Static` marks data baked into the binary that must never be freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemEffect {
    Alloc,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
    pub resolved_id: Option<String>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFn {
    pub params: Vec<TypeSpec>,
    pub ret: Box<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTuple {
    pub elements: Vec<TypeSpec>,
    pub position: Span,
}

/// Universally quantified type. The parser never produces one (generics are
/// a non-goal) but the data model carries it so tooling and future phases
/// can traverse schemes structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeScheme {
    pub vars: Vec<String>,
    pub body: Box<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeVariable {
    pub name: String,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeApplication {
    pub constructor: Box<TypeSpec>,
    pub args: Vec<TypeSpec>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePrimitive {
    pub llvm_type: String,
    pub mem_effect: Option<MemEffect>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePointer {
    pub llvm_type: String,
    pub mem_effect: Option<MemEffect>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeField {
    pub name: String,
    pub spec: TypeSpec,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeStruct {
    pub fields: Vec<NativeField>,
    pub mem_effect: Option<MemEffect>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidType {
    pub original: Box<TypeSpec>,
    pub position: Span,
}

/// Type language of MinnieML. A `TypeSpec` is both what the parser produces
/// for ascriptions and what the checker computes for terms; the resolver
/// links `Ref` variants to their defining members by stable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSpec {
    Ref(TypeRef),
    Fn(TypeFn),
    Tuple(TypeTuple),
    Scheme(TypeScheme),
    Variable(TypeVariable),
    Application(TypeApplication),
    NativePrimitive(NativePrimitive),
    NativePointer(NativePointer),
    NativeStruct(NativeStruct),
    Unit { position: Span },
    Invalid(InvalidType),
}

impl TypeSpec {
    pub fn position(&self) -> Span {
        match self {
            TypeSpec::Ref(TypeRef { position, .. })
            | TypeSpec::Fn(TypeFn { position, .. })
            | TypeSpec::Tuple(TypeTuple { position, .. })
            | TypeSpec::Scheme(TypeScheme { position, .. })
            | TypeSpec::Variable(TypeVariable { position, .. })
            | TypeSpec::Application(TypeApplication { position, .. })
            | TypeSpec::NativePrimitive(NativePrimitive { position, .. })
            | TypeSpec::NativePointer(NativePointer { position, .. })
            | TypeSpec::NativeStruct(NativeStruct { position, .. })
            | TypeSpec::Unit { position }
            | TypeSpec::Invalid(InvalidType { position, .. }) => position.clone(),
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, TypeSpec::Unit { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self, TypeSpec::Fn(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, TypeSpec::Invalid(_))
    }

    /// The memory effect carried directly by this spec, if it is a native
    /// type. Struct heap-ness is computed through the resolvables index,
    /// not here.
    pub fn mem_effect(&self) -> Option<MemEffect> {
        match self {
            TypeSpec::NativePrimitive(NativePrimitive { mem_effect, .. })
            | TypeSpec::NativePointer(NativePointer { mem_effect, .. })
            | TypeSpec::NativeStruct(NativeStruct { mem_effect, .. }) => *mem_effect,
            _ => None,
        }
    }
}

impl std::fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeSpec::Ref(TypeRef { name, .. }) => write!(f, "{name}"),
            TypeSpec::Fn(TypeFn { params, ret, .. }) => {
                if params.is_empty() {
                    write!(f, "() -> {ret}")
                } else {
                    for p in params {
                        write!(f, "{p} -> ")?;
                    }
                    write!(f, "{ret}")
                }
            }
            TypeSpec::Tuple(TypeTuple { elements, .. }) => {
                let inner = elements
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "({inner})")
            }
            TypeSpec::Scheme(TypeScheme { vars, body, .. }) => {
                write!(f, "forall {}. {body}", vars.join(" "))
            }
            TypeSpec::Variable(TypeVariable { name, .. }) => write!(f, "'{name}"),
            TypeSpec::Application(TypeApplication {
                constructor, args, ..
            }) => {
                write!(f, "{constructor}")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                Ok(())
            }
            TypeSpec::NativePrimitive(NativePrimitive { llvm_type, .. }) => {
                write!(f, "@native[t={llvm_type}]")
            }
            TypeSpec::NativePointer(NativePointer { llvm_type, .. }) => {
                write!(f, "@native[t=*{llvm_type}]")
            }
            TypeSpec::NativeStruct(_) => write!(f, "@native {{ .. }}"),
            TypeSpec::Unit { .. } => write!(f, "()"),
            TypeSpec::Invalid(InvalidType { original, .. }) => {
                write!(f, "<invalid {original}>")
            }
        }
    }
}

impl FromTokens<Token> for TypeSpec {
    /// Parse a chain of type atoms separated by `->`. A chain of length one
    /// is the atom itself; longer chains become a `TypeFn` whose parameters
    /// are all atoms but the last. A single `()` parameter list collapses
    /// to a nullary function type.
    fn parse(tokens: &mut ParseState<Token>) -> Result<AstNode, ParseError> {
        let first = parse_type_atom(tokens)?;
        let mut atoms = vec![first];

        let arrow = Comb::SMALL_RIGHT_ARROW;
        loop {
            let checkpoint = tokens.get_index();
            if arrow.parse(tokens).is_err() {
                tokens.set_index(checkpoint);
                break;
            }
            atoms.push(parse_type_atom(tokens)?);
        }

        if atoms.len() == 1 {
            let only = atoms.remove(0);
            return Ok(AstNode::TypeSpec(only));
        }

        let ret = atoms.pop().expect("chain has at least two atoms");
        let position = atoms
            .first()
            .map(|a| a.position().merge(&ret.position()))
            .unwrap_or_default();
        let params = if atoms.len() == 1 && atoms[0].is_unit() {
            vec![]
        } else {
            atoms
        };

        Ok(AstNode::TypeSpec(TypeSpec::Fn(TypeFn {
            params,
            ret: Box::new(ret),
            position,
        })))
    }
}

fn parse_type_atom(tokens: &mut ParseState<Token>) -> Result<TypeSpec, ParseError> {
    match tokens.peek() {
        Some(Token::Id { value, position }) => {
            tokens.next();
            Ok(TypeSpec::Ref(TypeRef {
                name: value,
                resolved_id: None,
                position,
            }))
        }
        Some(Token::LParen { position }) => {
            tokens.next();

            if let Some(Token::RParen { position: end }) = tokens.peek() {
                tokens.next();
                return Ok(TypeSpec::Unit {
                    position: position.merge(&end),
                });
            }

            let AstNode::TypeSpec(first) = TypeSpec::parse(tokens)? else {
                unreachable!()
            };

            let mut elements = vec![first];
            while let Some(Token::Comma { .. }) = tokens.peek() {
                tokens.next();
                let AstNode::TypeSpec(next) = TypeSpec::parse(tokens)? else {
                    unreachable!()
                };
                elements.push(next);
            }

            match tokens.next() {
                Some(Token::RParen { position: end }) => {
                    if elements.len() == 1 {
                        Ok(elements.remove(0))
                    } else {
                        Ok(TypeSpec::Tuple(TypeTuple {
                            elements,
                            position: position.merge(&end),
                        }))
                    }
                }
                other => Err(ParseError {
                    message: format!("expected ')' in type, found {other:?}"),
                    position: other.map(|t| t.position()),
                }),
            }
        }
        Some(Token::AtNative { .. }) => parse_native_type(tokens),
        other => Err(ParseError {
            message: format!("expected a type, found {other:?}"),
            position: other.map(|t| t.position()),
        }),
    }
}

#[derive(Debug, Default)]
struct NativeAttrs {
    llvm_type: Option<String>,
    pointer: bool,
    mem_effect: Option<MemEffect>,
}

/// Parse the `[t=..., mem=...]` attribute block of a native marker.
pub(crate) fn parse_native_attrs(
    tokens: &mut ParseState<Token>,
) -> Result<(Option<String>, bool, Option<MemEffect>), ParseError> {
    let mut attrs = NativeAttrs::default();

    if !matches!(tokens.peek(), Some(Token::LBracket { .. })) {
        return Ok((None, false, None));
    }
    tokens.next();

    loop {
        let AstNode::Id(key) = Ident::parse(tokens)? else {
            unreachable!()
        };

        match tokens.next() {
            Some(Token::Assign { .. }) => {}
            other => {
                return Err(ParseError {
                    message: format!("expected '=' in native attribute, found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        }

        match key.value.as_str() {
            "t" => {
                if let Some(Token::OperatorSymbol { value, .. }) = tokens.peek() {
                    if value == "*" {
                        tokens.next();
                        attrs.pointer = true;
                    }
                }
                let AstNode::Id(llvm) = Ident::parse(tokens)? else {
                    unreachable!()
                };
                attrs.llvm_type = Some(llvm.value);
            }
            "mem" => {
                let AstNode::Id(effect) = Ident::parse(tokens)? else {
                    unreachable!()
                };
                attrs.mem_effect = match effect.value.as_str() {
                    "heap" | "alloc" => Some(MemEffect::Alloc),
                    "static" => Some(MemEffect::Static),
                    other => {
                        return Err(ParseError {
                            message: format!("unknown memory effect '{other}'"),
                            position: Some(effect.position),
                        })
                    }
                };
            }
            other => {
                return Err(ParseError {
                    message: format!("unknown native attribute '{other}'"),
                    position: Some(key.position),
                })
            }
        }

        match tokens.next() {
            Some(Token::Comma { .. }) => continue,
            Some(Token::RBracket { .. }) => break,
            other => {
                return Err(ParseError {
                    message: format!("expected ',' or ']' in native attributes, found {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        }
    }

    Ok((attrs.llvm_type, attrs.pointer, attrs.mem_effect))
}

fn parse_native_type(tokens: &mut ParseState<Token>) -> Result<TypeSpec, ParseError> {
    let Some(Token::AtNative { position: start }) = tokens.next() else {
        unreachable!("caller peeked the native marker");
    };

    let (llvm_type, pointer, mem_effect) = parse_native_attrs(tokens)?;

    if matches!(tokens.peek(), Some(Token::LBrace { .. })) {
        tokens.next();

        let mut fields = vec![];
        loop {
            let AstNode::Id(name) = Ident::parse(tokens)? else {
                unreachable!()
            };

            match tokens.next() {
                Some(Token::Colon { .. }) => {}
                other => {
                    return Err(ParseError {
                        message: format!("expected ':' after native field name, found {other:?}"),
                        position: other.map(|t| t.position()),
                    })
                }
            }

            let AstNode::TypeSpec(spec) = TypeSpec::parse(tokens)? else {
                unreachable!()
            };

            let position = name.position.merge(&spec.position());
            fields.push(NativeField {
                name: name.value,
                spec,
                position,
            });

            match tokens.next() {
                Some(Token::Comma { .. }) => continue,
                Some(Token::RBrace { position: end }) => {
                    return Ok(TypeSpec::NativeStruct(NativeStruct {
                        fields,
                        mem_effect,
                        position: start.merge(&end),
                    }))
                }
                other => {
                    return Err(ParseError {
                        message: format!("expected ',' or '}}' in native struct, found {other:?}"),
                        position: other.map(|t| t.position()),
                    })
                }
            }
        }
    }

    let end = tokens
        .peek_reverse()
        .map(|t| t.position())
        .unwrap_or_default();
    let position = start.merge(&end);

    match llvm_type {
        Some(llvm_type) if pointer => Ok(TypeSpec::NativePointer(NativePointer {
            llvm_type,
            mem_effect,
            position,
        })),
        Some(llvm_type) => Ok(TypeSpec::NativePrimitive(NativePrimitive {
            llvm_type,
            mem_effect,
            position,
        })),
        // an opaque native type, e.g. `@native[mem=heap]`: a pointer whose
        // layout only the runtime knows
        None => Ok(TypeSpec::NativePointer(NativePointer {
            llvm_type: "i8".to_string(),
            mem_effect,
            position,
        })),
    }
}

impl From<TypeSpec> for AstNode {
    fn from(value: TypeSpec) -> Self {
        AstNode::TypeSpec(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Lexer;

    use super::*;

    fn parse_type(input: &str) -> TypeSpec {
        let mut tokens = Lexer::new(input).lex().expect("lexing failed").into();
        let AstNode::TypeSpec(spec) = TypeSpec::parse(&mut tokens).expect("parsing failed") else {
            unreachable!()
        };
        spec
    }

    #[test]
    fn test_parse_simple_ref() {
        assert_eq!(
            parse_type("Int"),
            TypeSpec::Ref(TypeRef {
                name: "Int".into(),
                resolved_id: None,
                position: Span::default(),
            })
        );
    }

    #[test]
    fn test_parse_function_chain() {
        let spec = parse_type("Int -> Int -> Bool");

        let TypeSpec::Fn(TypeFn { params, ret, .. }) = spec else {
            panic!("expected a function type");
        };
        assert_eq!(params.len(), 2);
        assert!(matches!(*ret, TypeSpec::Ref(TypeRef { ref name, .. }) if name == "Bool"));
    }

    #[test]
    fn test_parse_nullary_function() {
        let spec = parse_type("() -> Int");

        let TypeSpec::Fn(TypeFn { params, .. }) = spec else {
            panic!("expected a function type");
        };
        assert!(params.is_empty());
    }

    #[test]
    fn test_parse_grouped_function_param() {
        let spec = parse_type("(Int -> Bool) -> Unit");

        let TypeSpec::Fn(TypeFn { params, ret, .. }) = spec else {
            panic!("expected a function type");
        };
        assert_eq!(params.len(), 1);
        assert!(params[0].is_function());
        assert!(matches!(*ret, TypeSpec::Ref(TypeRef { ref name, .. }) if name == "Unit"));
    }

    #[test]
    fn test_parse_tuple_type() {
        let spec = parse_type("(Int, Bool)");

        let TypeSpec::Tuple(TypeTuple { elements, .. }) = spec else {
            panic!("expected a tuple type");
        };
        assert_eq!(elements.len(), 2);
    }

    #[test]
    fn test_parse_native_primitive() {
        let spec = parse_type("@native[t=i64]");

        assert_eq!(
            spec,
            TypeSpec::NativePrimitive(NativePrimitive {
                llvm_type: "i64".into(),
                mem_effect: None,
                position: Span::default(),
            })
        );
    }

    #[test]
    fn test_parse_native_pointer_with_effect() {
        let spec = parse_type("@native[t=*i8, mem=heap]");

        assert_eq!(
            spec,
            TypeSpec::NativePointer(NativePointer {
                llvm_type: "i8".into(),
                mem_effect: Some(MemEffect::Alloc),
                position: Span::default(),
            })
        );
    }

    #[test]
    fn test_parse_native_struct() {
        let spec = parse_type("@native[mem=heap] { length: Int64, data: CharPtr }");

        let TypeSpec::NativeStruct(NativeStruct {
            fields, mem_effect, ..
        }) = spec
        else {
            panic!("expected a native struct");
        };
        assert_eq!(mem_effect, Some(MemEffect::Alloc));
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "length");
        assert_eq!(fields[1].name, "data");
    }
}
