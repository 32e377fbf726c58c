use std::collections::HashSet;

use crate::parser::ast::{Member, Module, ResolvablesIndex, Term};

use super::{Phase, SemanticError};

/// Mints a stable id for every resolvable node that does not already
/// carry one (prelude entries come preassigned) and seeds the resolvables
/// index. Ids follow the schema
///
/// ```text
/// <module>::<decl-kind-lower>::<name>          top-level declarations
/// <module>::typestruct::<struct>::<field>      struct fields
/// <owner-id>::param::<name>                    parameters
/// <owner-id>::let::<name>                      body-local bindings
/// ```
///
/// Ids are assigned once and never mutated afterwards; within a module
/// they are unique, with an ordinal suffix disambiguating shadowing
/// body-local bindings.
pub struct IdAssigner;

impl Phase for IdAssigner {
    fn name(&self) -> &'static str {
        "IdAssigner"
    }

    fn run(&self, module: Module, _errors: &mut Vec<SemanticError>) -> Module {
        let Module {
            name,
            visibility,
            members,
            doc,
            source_path,
            ..
        } = module;

        let mut taken: HashSet<String> = members
            .iter()
            .filter_map(|m| m.stable_id().map(str::to_string))
            .collect();

        let members = members
            .into_iter()
            .map(|member| assign_member(member, &name, &mut taken))
            .collect();

        let mut module = Module {
            name,
            visibility,
            members,
            doc,
            source_path,
            index: ResolvablesIndex::default(),
        };
        module.index = ResolvablesIndex::build(&module);

        log::debug!("seeded resolvables index with {} entries", module.index.len());

        module
    }
}

fn unique(candidate: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(candidate.clone()) {
        return candidate;
    }

    let mut ordinal = 2;
    loop {
        let disambiguated = format!("{candidate}#{ordinal}");
        if taken.insert(disambiguated.clone()) {
            return disambiguated;
        }
        ordinal += 1;
    }
}

fn assign_member(member: Member, module_name: &str, taken: &mut HashSet<String>) -> Member {
    match member {
        Member::Bnd(mut bnd) => {
            if bnd.id.is_none() {
                bnd.id = Some(unique(
                    format!("{module_name}::bnd::{}", bnd.name),
                    taken,
                ));
            }
            let owner = bnd.id.clone().expect("id was just assigned");

            if let Some(lambda) = bnd.lambda_mut() {
                for param in &mut lambda.params {
                    if param.id.is_none() {
                        param.id = Some(unique(format!("{owner}::param::{}", param.name), taken));
                    }
                }
            }

            bnd.value.walk_mut(&mut |term| {
                if let Term::Let(bind) = term {
                    if bind.id.is_none() {
                        bind.id = Some(unique(format!("{owner}::let::{}", bind.name), taken));
                    }
                }
            });

            Member::Bnd(bnd)
        }
        Member::TypeDef(mut def) => {
            if def.id.is_none() {
                def.id = Some(unique(
                    format!("{module_name}::typedef::{}", def.name),
                    taken,
                ));
            }
            Member::TypeDef(def)
        }
        Member::TypeAlias(mut alias) => {
            if alias.id.is_none() {
                alias.id = Some(unique(
                    format!("{module_name}::typealias::{}", alias.name),
                    taken,
                ));
            }
            Member::TypeAlias(alias)
        }
        Member::TypeStruct(mut ts) => {
            if ts.id.is_none() {
                ts.id = Some(unique(
                    format!("{module_name}::typestruct::{}", ts.name),
                    taken,
                ));
            }
            for field in &mut ts.fields {
                if field.id.is_none() {
                    field.id = Some(unique(
                        format!("{module_name}::typestruct::{}::{}", ts.name, field.name),
                        taken,
                    ));
                }
            }
            Member::TypeStruct(ts)
        }
        // error members stay id-less; nothing may resolve to them
        other @ (Member::MemberError(_) | Member::Duplicate(_) | Member::Invalid(_)) => other,
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::ast::Bnd;
    use crate::parser::parse_source;

    use super::*;

    fn run(input: &str) -> Module {
        let module = parse_source("test", input).expect("parsing failed");
        IdAssigner.run(module, &mut vec![])
    }

    fn bnd<'a>(module: &'a Module, name: &str) -> &'a Bnd {
        module
            .bindings()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("missing binding {name}"))
    }

    #[test]
    fn test_member_and_param_ids() {
        let module = run("fn add(a: Int, b: Int): Int = a + b;");

        let add = bnd(&module, "add");
        assert_eq!(add.id.as_deref(), Some("test::bnd::add"));

        let lambda = add.lambda().expect("lambda body missing");
        assert_eq!(
            lambda.params[0].id.as_deref(),
            Some("test::bnd::add::param::a")
        );
        assert_eq!(
            lambda.params[1].id.as_deref(),
            Some("test::bnd::add::param::b")
        );
    }

    #[test]
    fn test_struct_field_ids() {
        let module = run("struct User { name: String, age: Int };");

        let Member::TypeStruct(ts) = &module.members[0] else {
            panic!("expected a struct");
        };
        assert_eq!(ts.id.as_deref(), Some("test::typestruct::User"));
        assert_eq!(
            ts.fields[0].id.as_deref(),
            Some("test::typestruct::User::name")
        );
    }

    #[test]
    fn test_let_ids_inside_bodies() {
        let module = run("fn main(): Unit = let s = \"x\"; println s;");

        let main = bnd(&module, "main");
        let lambda = main.lambda().expect("lambda body missing");
        let Term::Let(bind) = &lambda.body.terms[0] else {
            panic!("expected a let binding");
        };
        assert_eq!(bind.id.as_deref(), Some("test::bnd::main::let::s"));
    }

    #[test]
    fn test_ids_are_unique() {
        // the duplicate checker normally runs first; even without it, the
        // assigner must never mint the same id twice
        let module = run("fn f(): Int = 1; fn f(): Int = 2;");

        let mut ids: Vec<_> = module
            .members
            .iter()
            .filter_map(|m| m.stable_id().map(str::to_string))
            .collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn test_index_is_seeded() {
        let module = run("fn add(a: Int, b: Int): Int = a + b;");

        assert!(module.index.contains("test::bnd::add"));
        assert!(module.index.contains("test::bnd::add::param::a"));
    }
}
