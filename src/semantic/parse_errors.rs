use crate::parser::ast::{Member, Module, Term};

use super::{Phase, SemanticError};

/// Lifts the recovery markers the parser left in the AST into the error
/// channel: failed members, malformed identifiers and unrecognized
/// expression material. The offending nodes stay in the tree so later
/// phases can skip them; always the first semantic phase after injection.
pub struct ParsingErrorChecker;

impl Phase for ParsingErrorChecker {
    fn name(&self) -> &'static str {
        "ParsingErrorChecker"
    }

    fn run(&self, module: Module, errors: &mut Vec<SemanticError>) -> Module {
        for member in &module.members {
            check_member(member, errors);
        }

        module
    }
}

fn check_member(member: &Member, errors: &mut Vec<SemanticError>) {
    match member {
        Member::MemberError(e) => {
            errors.push(SemanticError::MemberErrorFound {
                message: format!("{} (near '{}')", e.message, e.raw.trim()),
                span: e.position.clone(),
            });
        }
        Member::Bnd(bnd) => {
            if let Some(id_error) = &bnd.id_error {
                errors.push(SemanticError::ParsingIdErrorFound {
                    raw: id_error.raw.clone(),
                    message: id_error.message.clone(),
                    span: id_error.position.clone(),
                });
            }

            bnd.value.walk(&mut |term| {
                if let Term::Error(e) = term {
                    errors.push(SemanticError::MemberErrorFound {
                        message: format!("{} (near '{}')", e.message, e.raw.trim()),
                        span: e.position.clone(),
                    });
                }
            });
        }
        Member::Duplicate(dup) => check_member(&dup.original, errors),
        Member::Invalid(invalid) => check_member(&invalid.original, errors),
        Member::TypeDef(_) | Member::TypeAlias(_) | Member::TypeStruct(_) => {}
    }
}
