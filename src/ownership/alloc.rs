use std::collections::HashSet;

use crate::parser::ast::{MemEffect, Member, Module, Term, TypeRef, TypeSpec};
use crate::typechecker::is_heap_type;

/// Computes the set of functions in this module that allocate, as stable
/// ids. A function allocates if its body contains an allocating native
/// implementation, constructs a heap struct, or calls (transitively)
/// another allocating function. The worklist iterates to a fixpoint;
/// termination is guaranteed because the set only ever grows inside a
/// finite module.
pub fn allocating_functions(module: &Module) -> HashSet<String> {
    let mut allocating: HashSet<String> = HashSet::new();

    // seed: direct allocators
    for bnd in module.bindings() {
        let Some(id) = &bnd.id else { continue };
        let Some(lambda) = bnd.lambda() else { continue };

        let mut direct = false;
        lambda.body.walk(&mut |term| match term {
            Term::Native(native) if native.mem_effect == Some(MemEffect::Alloc) => {
                direct = true;
            }
            Term::Data(data) => {
                let spec = data.type_spec.clone().unwrap_or(TypeSpec::Ref(TypeRef {
                    name: data.struct_name.clone(),
                    resolved_id: None,
                    position: crate::lexer::Span::Synthetic,
                }));
                if is_heap_type(&spec, &module.index) {
                    direct = true;
                }
            }
            _ => {}
        });

        if direct {
            allocating.insert(id.clone());
        }
    }

    // fixpoint: pull in callers of allocating functions
    loop {
        let mut changed = false;

        for bnd in module.bindings() {
            let Some(id) = &bnd.id else { continue };
            if allocating.contains(id) {
                continue;
            }
            let Some(lambda) = bnd.lambda() else { continue };

            let mut calls_allocator = false;
            lambda.body.walk(&mut |term| {
                if let Term::Ref(r) = term {
                    if let Some(target) = &r.resolved_id {
                        if target != id && allocating.contains(target) {
                            calls_allocator = true;
                        }
                    }
                }
            });

            if calls_allocator {
                allocating.insert(id.clone());
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    log::debug!("{} allocating functions in module", allocating.len());
    allocating
}

/// Whether a term is an allocation: a (complete) call whose head resolves
/// to an allocating function, or a heap struct construction.
pub fn term_allocates(term: &Term, allocating: &HashSet<String>) -> bool {
    match term {
        Term::App(_) => app_head(term)
            .and_then(|head| head.resolved_id.as_deref())
            .map(|id| allocating.contains(id))
            .unwrap_or(false),
        _ => false,
    }
}

fn app_head(term: &Term) -> Option<&crate::parser::ast::Ref> {
    match term {
        Term::App(app) => app_head(&app.func),
        Term::Ref(r) => Some(r),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;
    use crate::semantic::{
        DuplicateNameChecker, ExpressionRewriter, IdAssigner, MemoryFunctionGenerator,
        ParsingErrorChecker, Phase, RefResolver, ResolvablesReindexer, Simplifier,
        StdlibInjector, TypeResolver,
    };
    use crate::typechecker::TypeChecker;

    use super::*;

    fn run(input: &str) -> Module {
        let module = parse_source("test", input).expect("parsing failed");
        let mut errors = vec![];
        let module = StdlibInjector.run(module, &mut errors);
        let module = ParsingErrorChecker.run(module, &mut errors);
        let module = DuplicateNameChecker.run(module, &mut errors);
        let module = IdAssigner.run(module, &mut errors);
        let module = TypeResolver.run(module, &mut errors);
        let module = RefResolver.run(module, &mut errors);
        let module = ExpressionRewriter.run(module, &mut errors);
        let module = Simplifier.run(module, &mut errors);
        let module = TypeChecker.run(module, &mut errors);
        let module = MemoryFunctionGenerator.run(module, &mut errors);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        ResolvablesReindexer.run(module, &mut errors)
    }

    #[test]
    fn test_native_allocators_are_seeded() {
        let module = run("");
        let allocating = allocating_functions(&module);

        assert!(allocating.contains("stdlib::readline"));
        assert!(allocating.contains("stdlib::concat"));
        assert!(allocating.contains("stdlib::op.plusplus.2"));
        assert!(!allocating.contains("stdlib::println"));
        assert!(!allocating.contains("stdlib::__free_String"));
    }

    #[test]
    fn test_transitive_allocation() {
        let module = run(
            "fn greet(name: String): String = concat \"hi \" name;\nfn shout(name: String): String = greet name;",
        );
        let allocating = allocating_functions(&module);

        assert!(allocating.contains("test::bnd::greet"));
        assert!(allocating.contains("test::bnd::shout"));
    }

    #[test]
    fn test_non_allocating_function() {
        let module = run("fn add(a: Int, b: Int): Int = a + b;");
        let allocating = allocating_functions(&module);

        assert!(!allocating.contains("test::bnd::add"));
    }

    #[test]
    fn test_heap_constructor_allocates() {
        let module = run(
            "struct User { name: String };\nfn mk(n: String): User = User n;",
        );
        let allocating = allocating_functions(&module);

        // the constructor itself and its caller
        assert!(allocating.contains("test::bnd::User"));
        assert!(allocating.contains("test::bnd::mk"));
        // the generated clone allocates, the free does not
        assert!(allocating.contains("test::bnd::__clone_User"));
        assert!(!allocating.contains("test::bnd::__free_User"));
    }
}
