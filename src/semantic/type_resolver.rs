use std::collections::{HashMap, HashSet};

use crate::parser::ast::{
    InvalidType, Member, Module, ResolvablesIndex, Term, TypeRef, TypeSpec,
};

use super::{Phase, SemanticError};

/// Resolves every `TypeRef` in the module to the stable id of its defining
/// member, in three passes:
///
/// 1. collect all type-introducing members into a name → id map,
/// 2. resolve references inside the type definitions themselves (struct
///    field types, alias right-hand sides, nested native-struct fields)
///    and follow alias chains to compute each alias's canonical target,
/// 3. resolve references in member signatures and expression ascriptions.
///
/// Unresolvable references are wrapped in `InvalidType` and reported as
/// `UndefinedTypeRef`; downstream phases treat those as already handled.
pub struct TypeResolver;

impl Phase for TypeResolver {
    fn name(&self) -> &'static str {
        "TypeResolver"
    }

    fn run(&self, module: Module, errors: &mut Vec<SemanticError>) -> Module {
        let Module {
            name,
            visibility,
            members,
            doc,
            source_path,
            ..
        } = module;

        // pass 1: type namespace
        let mut type_names: HashMap<String, String> = HashMap::new();
        for member in &members {
            let id = member.stable_id();
            match (member, id) {
                (Member::TypeDef(_), Some(id))
                | (Member::TypeAlias(_), Some(id))
                | (Member::TypeStruct(_), Some(id)) => {
                    let member_name = member.name().expect("type members are named");
                    type_names
                        .entry(member_name.to_string())
                        .or_insert_with(|| id.to_string());
                }
                _ => {}
            }
        }

        // pass 2 + 3: resolve definitions, signatures and bodies
        let mut members: Vec<Member> = members
            .into_iter()
            .map(|member| resolve_member(member, &type_names, errors))
            .collect();

        // alias chains: canonical target of every alias
        let alias_targets: HashMap<String, TypeSpec> = members
            .iter()
            .filter_map(|member| match member {
                Member::TypeAlias(alias) => alias
                    .id
                    .clone()
                    .map(|id| (id, alias.aliased.clone())),
                _ => None,
            })
            .collect();

        for member in &mut members {
            if let Member::TypeAlias(alias) = member {
                let mut visiting = HashSet::new();
                let canonical = canonicalize(alias.aliased.clone(), &alias_targets, &mut visiting);
                alias.type_spec = Some(match canonical {
                    Some(spec) => spec,
                    None => {
                        errors.push(SemanticError::UndefinedTypeRef {
                            name: alias.name.clone(),
                            span: alias.position.clone(),
                        });
                        TypeSpec::Invalid(InvalidType {
                            original: Box::new(alias.aliased.clone()),
                            position: alias.position.clone(),
                        })
                    }
                });
            }
        }

        let mut module = Module {
            name,
            visibility,
            members,
            doc,
            source_path,
            index: ResolvablesIndex::default(),
        };
        module.index = ResolvablesIndex::build(&module);

        module
    }
}

/// Follow an alias chain down to a non-alias target. `None` signals a
/// cycle.
fn canonicalize(
    spec: TypeSpec,
    alias_targets: &HashMap<String, TypeSpec>,
    visiting: &mut HashSet<String>,
) -> Option<TypeSpec> {
    match &spec {
        TypeSpec::Ref(TypeRef {
            resolved_id: Some(id),
            ..
        }) => match alias_targets.get(id) {
            Some(target) => {
                if !visiting.insert(id.clone()) {
                    return None;
                }
                canonicalize(target.clone(), alias_targets, visiting)
            }
            None => Some(spec),
        },
        _ => Some(spec),
    }
}

fn resolve_member(
    member: Member,
    type_names: &HashMap<String, String>,
    errors: &mut Vec<SemanticError>,
) -> Member {
    match member {
        Member::TypeDef(mut def) => {
            def.spec = resolve_spec(def.spec, type_names, errors);
            Member::TypeDef(def)
        }
        Member::TypeAlias(mut alias) => {
            alias.aliased = resolve_spec(alias.aliased, type_names, errors);
            Member::TypeAlias(alias)
        }
        Member::TypeStruct(mut ts) => {
            for field in &mut ts.fields {
                field.type_asc = resolve_spec(field.type_asc.clone(), type_names, errors);
            }
            Member::TypeStruct(ts)
        }
        Member::Bnd(mut bnd) => {
            bnd.type_asc = bnd
                .type_asc
                .take()
                .map(|spec| resolve_spec(spec, type_names, errors));

            if let Some(lambda) = bnd.lambda_mut() {
                lambda.ret_asc = lambda
                    .ret_asc
                    .take()
                    .map(|spec| resolve_spec(spec, type_names, errors));
                for param in &mut lambda.params {
                    param.type_asc = param
                        .type_asc
                        .take()
                        .map(|spec| resolve_spec(spec, type_names, errors));
                }
            }

            bnd.value.walk_mut(&mut |term| {
                if let Term::Let(bind) = term {
                    bind.type_asc = bind
                        .type_asc
                        .take()
                        .map(|spec| resolve_spec(spec, type_names, errors));
                }
            });

            Member::Bnd(bnd)
        }
        // wrapped members were already reported; leave them untouched
        other @ (Member::MemberError(_) | Member::Duplicate(_) | Member::Invalid(_)) => other,
    }
}

fn resolve_spec(
    spec: TypeSpec,
    type_names: &HashMap<String, String>,
    errors: &mut Vec<SemanticError>,
) -> TypeSpec {
    match spec {
        TypeSpec::Ref(mut r) => {
            if r.resolved_id.is_some() {
                return TypeSpec::Ref(r);
            }
            match type_names.get(&r.name) {
                Some(id) => {
                    r.resolved_id = Some(id.clone());
                    TypeSpec::Ref(r)
                }
                None => {
                    errors.push(SemanticError::UndefinedTypeRef {
                        name: r.name.clone(),
                        span: r.position.clone(),
                    });
                    let position = r.position.clone();
                    TypeSpec::Invalid(InvalidType {
                        original: Box::new(TypeSpec::Ref(r)),
                        position,
                    })
                }
            }
        }
        TypeSpec::Fn(mut f) => {
            f.params = f
                .params
                .into_iter()
                .map(|p| resolve_spec(p, type_names, errors))
                .collect();
            f.ret = Box::new(resolve_spec(*f.ret, type_names, errors));
            TypeSpec::Fn(f)
        }
        TypeSpec::Tuple(mut t) => {
            t.elements = t
                .elements
                .into_iter()
                .map(|e| resolve_spec(e, type_names, errors))
                .collect();
            TypeSpec::Tuple(t)
        }
        TypeSpec::Scheme(mut s) => {
            s.body = Box::new(resolve_spec(*s.body, type_names, errors));
            TypeSpec::Scheme(s)
        }
        TypeSpec::Application(mut a) => {
            a.constructor = Box::new(resolve_spec(*a.constructor, type_names, errors));
            a.args = a
                .args
                .into_iter()
                .map(|arg| resolve_spec(arg, type_names, errors))
                .collect();
            TypeSpec::Application(a)
        }
        TypeSpec::NativeStruct(mut ns) => {
            for field in &mut ns.fields {
                field.spec = resolve_spec(field.spec.clone(), type_names, errors);
            }
            TypeSpec::NativeStruct(ns)
        }
        other @ (TypeSpec::Variable(_)
        | TypeSpec::NativePrimitive(_)
        | TypeSpec::NativePointer(_)
        | TypeSpec::Unit { .. }
        | TypeSpec::Invalid(_)) => other,
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;
    use crate::semantic::{IdAssigner, StdlibInjector};

    use super::*;

    fn run(input: &str) -> (Module, Vec<SemanticError>) {
        let module = parse_source("test", input).expect("parsing failed");
        let mut errors = vec![];
        let module = StdlibInjector.run(module, &mut errors);
        let module = IdAssigner.run(module, &mut errors);
        let module = TypeResolver.run(module, &mut errors);
        (module, errors)
    }

    fn find_bnd<'a>(module: &'a Module, name: &str) -> &'a crate::parser::ast::Bnd {
        module
            .bindings()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("missing binding {name}"))
    }

    #[test]
    fn test_signature_refs_resolve_to_stdlib() {
        let (module, errors) = run("fn add(a: Int, b: Int): Int = a;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let add = find_bnd(&module, "add");
        let lambda = add.lambda().expect("lambda body missing");

        let Some(TypeSpec::Ref(r)) = &lambda.params[0].type_asc else {
            panic!("expected a resolved type ref");
        };
        assert_eq!(r.resolved_id.as_deref(), Some("stdlib::Int"));
    }

    #[test]
    fn test_alias_chain_canonicalizes() {
        let (module, errors) = run("type MyInt = Int;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let alias = module
            .members
            .iter()
            .find_map(|m| match m {
                Member::TypeAlias(a) if a.name == "MyInt" => Some(a),
                _ => None,
            })
            .expect("missing alias");

        // Int is itself an alias of Int64; the canonical target is the def
        let Some(TypeSpec::Ref(canonical)) = &alias.type_spec else {
            panic!("expected a canonical ref, got {:?}", alias.type_spec);
        };
        assert_eq!(canonical.resolved_id.as_deref(), Some("stdlib::Int64"));
    }

    #[test]
    fn test_alias_cycle_is_invalid() {
        let (module, errors) = run("type A = B; type B = A;");

        assert!(errors
            .iter()
            .any(|e| matches!(e, SemanticError::UndefinedTypeRef { .. })));
        let alias = module
            .members
            .iter()
            .find_map(|m| match m {
                Member::TypeAlias(a) if a.name == "A" => Some(a),
                _ => None,
            })
            .expect("missing alias");
        assert!(matches!(alias.type_spec, Some(TypeSpec::Invalid(_))));
    }

    #[test]
    fn test_undefined_type_ref_is_wrapped() {
        let (module, errors) = run("fn f(a: Bogus): Int = a;");

        assert!(errors
            .iter()
            .any(|e| matches!(e, SemanticError::UndefinedTypeRef { name, .. } if name == "Bogus")));

        let f = find_bnd(&module, "f");
        let lambda = f.lambda().expect("lambda body missing");
        assert!(matches!(
            lambda.params[0].type_asc,
            Some(TypeSpec::Invalid(_))
        ));
    }

    #[test]
    fn test_struct_field_types_resolve() {
        let (module, errors) = run("struct User { name: String, age: Int };");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let ts = module
            .members
            .iter()
            .find_map(|m| match m {
                Member::TypeStruct(ts) if ts.name == "User" => Some(ts),
                _ => None,
            })
            .expect("missing struct");

        let TypeSpec::Ref(name_field) = &ts.fields[0].type_asc else {
            panic!("expected a resolved field type");
        };
        assert_eq!(name_field.resolved_id.as_deref(), Some("stdlib::String"));
    }
}
