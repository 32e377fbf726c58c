use std::collections::HashMap;

use crate::lexer::Span;
use crate::parser::ast::{DuplicateMember, InvalidMember, Member, Module};

use super::{Phase, SemanticError};

/// Groups declarations by `(name, kind)` and keeps only the first of each
/// group valid; every later declaration is wrapped in a `DuplicateMember`
/// pointing back at the first. Operator bindings carry their arity in the
/// mangled name, so a unary and a binary `-` coexist, while two functions
/// of the same name collide regardless of signature. Parameter lists are
/// checked for duplicate names as well; those invalidate the whole member.
pub struct DuplicateNameChecker;

impl Phase for DuplicateNameChecker {
    fn name(&self) -> &'static str {
        "DuplicateNameChecker"
    }

    fn run(&self, module: Module, errors: &mut Vec<SemanticError>) -> Module {
        let Module {
            name,
            visibility,
            members,
            doc,
            source_path,
            index,
        } = module;

        let mut first_seen: HashMap<(String, &'static str), Span> = HashMap::new();
        let mut groups: HashMap<(String, &'static str), Vec<Span>> = HashMap::new();
        let mut checked: Vec<Member> = vec![];

        for member in members {
            let member = check_params(member, errors);

            let Some(member_name) = member.name().map(str::to_string) else {
                checked.push(member);
                continue;
            };
            if member.is_error() {
                checked.push(member);
                continue;
            }

            let key = (member_name, member.kind());
            groups
                .entry(key.clone())
                .or_default()
                .push(member.position());

            match first_seen.get(&key) {
                None => {
                    first_seen.insert(key, member.position());
                    checked.push(member);
                }
                Some(first_position) => {
                    checked.push(Member::Duplicate(DuplicateMember {
                        first_position: first_position.clone(),
                        position: member.position(),
                        original: Box::new(member),
                    }));
                }
            }
        }

        for ((group_name, _), spans) in groups {
            if spans.len() > 1 {
                errors.push(SemanticError::DuplicateName {
                    name: group_name,
                    spans,
                });
            }
        }

        Module {
            name,
            visibility,
            members: checked,
            doc,
            source_path,
            index,
        }
    }
}

/// Wrap a function/operator member whose parameter list declares the same
/// name twice.
fn check_params(member: Member, errors: &mut Vec<SemanticError>) -> Member {
    let Member::Bnd(bnd) = &member else {
        return member;
    };
    let Some(lambda) = bnd.lambda() else {
        return member;
    };

    let mut seen: HashMap<&str, Span> = HashMap::new();
    for param in &lambda.params {
        if let Some(first) = seen.get(param.name.as_str()) {
            errors.push(SemanticError::DuplicateName {
                name: param.name.clone(),
                spans: vec![first.clone(), param.position.clone()],
            });

            let reason = format!(
                "parameter '{}' is declared twice in '{}'",
                param.name, bnd.name
            );
            let position = member.position();
            return Member::Invalid(InvalidMember {
                reason,
                position,
                original: Box::new(member),
            });
        }
        seen.insert(param.name.as_str(), param.position.clone());
    }

    member
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;

    use super::*;

    fn run(input: &str) -> (Module, Vec<SemanticError>) {
        let module = parse_source("test", input).expect("parsing failed");
        let mut errors = vec![];
        let module = DuplicateNameChecker.run(module, &mut errors);
        (module, errors)
    }

    #[test]
    fn test_first_declaration_wins() {
        let (module, errors) = run("fn f(): Int = 1; fn f(): Int = 2;");

        assert!(matches!(module.members[0], Member::Bnd(_)));
        assert!(matches!(module.members[1], Member::Duplicate(_)));
        assert!(errors
            .iter()
            .any(|e| matches!(e, SemanticError::DuplicateName { name, spans } if name == "f" && spans.len() == 2)));
    }

    #[test]
    fn test_unary_and_binary_operator_coexist() {
        let (module, errors) = run(
            "op --(a: Int, b: Int): Int = a; op --(a: Int): Int = a;",
        );

        assert!(module.members.iter().all(|m| !m.is_error()));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_struct_and_constructor_do_not_collide() {
        let (module, errors) = run("struct User { name: String };");

        assert!(module.members.iter().all(|m| !m.is_error()));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_duplicate_parameter_invalidates_member() {
        let (module, errors) = run("fn f(a: Int, a: Int): Int = a;");

        assert!(matches!(module.members[0], Member::Invalid(_)));
        assert!(errors
            .iter()
            .any(|e| matches!(e, SemanticError::DuplicateName { name, .. } if name == "a")));
    }
}
