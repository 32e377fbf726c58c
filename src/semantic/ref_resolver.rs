use std::collections::HashMap;

use crate::parser::ast::{
    Expr, InvalidExpression, Member, Module, Ref, ResolvablesIndex, Term,
};

use super::{Phase, SemanticError};

/// Resolves every value reference in member bodies. The search order is
/// body-local bindings and parameters (innermost first), then module
/// members, then the injected prelude, all through name matching, so
/// self-recursion resolves to the member being checked. A reference whose
/// name matches several declarations (a unary and a binary operator of the
/// same symbol) keeps the full candidate list; the expression rewriter
/// picks the arity that fits the position. Only a reference with no
/// candidates at all is an error here.
pub struct RefResolver;

impl Phase for RefResolver {
    fn name(&self) -> &'static str {
        "RefResolver"
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

        // module-level value namespace: binding names plus, for operators,
        // their surface symbol
        let mut candidates: HashMap<String, Vec<String>> = HashMap::new();
        for member in &members {
            let Member::Bnd(bnd) = member else { continue };
            let Some(id) = &bnd.id else { continue };

            candidates
                .entry(bnd.name.clone())
                .or_default()
                .push(id.clone());

            if let Some(meta) = &bnd.meta {
                if meta.original_name != bnd.name {
                    candidates
                        .entry(meta.original_name.clone())
                        .or_default()
                        .push(id.clone());
                }
            }
        }

        let members = members
            .into_iter()
            .map(|member| resolve_member(member, &candidates, errors))
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

        module
    }
}

struct Resolver<'a> {
    module_candidates: &'a HashMap<String, Vec<String>>,
    /// innermost frame last; each frame holds (name, id) pairs in
    /// declaration order
    frames: Vec<Vec<(String, String)>>,
    member_name: String,
}

fn resolve_member(
    member: Member,
    candidates: &HashMap<String, Vec<String>>,
    errors: &mut Vec<SemanticError>,
) -> Member {
    match member {
        Member::Bnd(mut bnd) => {
            let mut resolver = Resolver {
                module_candidates: candidates,
                frames: vec![],
                member_name: bnd.name.clone(),
            };

            bnd.value = resolver.resolve_expr(bnd.value, errors);
            Member::Bnd(bnd)
        }
        // type members carry no value references; wrapped members were
        // already reported
        other => other,
    }
}

impl Resolver<'_> {
    fn lookup_local(&self, name: &str) -> Option<String> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| {
                frame
                    .iter()
                    .rev()
                    .find(|(binding, _)| binding == name)
                    .map(|(_, id)| id.clone())
            })
    }

    fn resolve_expr(&mut self, expr: Expr, errors: &mut Vec<SemanticError>) -> Expr {
        let Expr {
            terms,
            type_spec,
            position,
        } = expr;

        self.frames.push(vec![]);

        let terms = terms
            .into_iter()
            .map(|term| match term {
                Term::Let(mut bind) => {
                    // the value cannot see the binding it initializes
                    bind.value = Box::new(self.resolve_expr(*bind.value, errors));
                    if let Some(id) = &bind.id {
                        self.frames
                            .last_mut()
                            .expect("frame was just pushed")
                            .push((bind.name.clone(), id.clone()));
                    }
                    Term::Let(bind)
                }
                other => self.resolve_term(other, errors),
            })
            .collect();

        self.frames.pop();

        Expr {
            terms,
            type_spec,
            position,
        }
    }

    fn resolve_term(&mut self, term: Term, errors: &mut Vec<SemanticError>) -> Term {
        match term {
            Term::Ref(r) => self.resolve_ref(r, errors),
            Term::Expr(inner) => Term::Expr(Box::new(self.resolve_expr(*inner, errors))),
            Term::Group(mut group) => {
                group.inner = Box::new(self.resolve_expr(*group.inner, errors));
                Term::Group(group)
            }
            Term::Cond(mut cond) => {
                cond.condition = Box::new(self.resolve_expr(*cond.condition, errors));
                cond.then_branch = Box::new(self.resolve_expr(*cond.then_branch, errors));
                cond.else_branch = Box::new(self.resolve_expr(*cond.else_branch, errors));
                Term::Cond(cond)
            }
            Term::App(mut app) => {
                app.func = Box::new(self.resolve_term(*app.func, errors));
                app.arg = Box::new(self.resolve_expr(*app.arg, errors));
                Term::App(app)
            }
            Term::Lambda(mut lambda) => {
                let frame = lambda
                    .params
                    .iter()
                    .filter_map(|p| p.id.clone().map(|id| (p.name.clone(), id)))
                    .collect();
                self.frames.push(frame);
                lambda.body = Box::new(self.resolve_expr(*lambda.body, errors));
                self.frames.pop();
                Term::Lambda(lambda)
            }
            Term::Select(mut select) => {
                // fields resolve against the target's type during checking
                select.target = Box::new(self.resolve_term(*select.target, errors));
                Term::Select(select)
            }
            Term::Tuple(mut tuple) => {
                tuple.elements = tuple
                    .elements
                    .into_iter()
                    .map(|e| self.resolve_expr(e, errors))
                    .collect();
                Term::Tuple(tuple)
            }
            other => other,
        }
    }

    fn resolve_ref(&mut self, mut r: Ref, errors: &mut Vec<SemanticError>) -> Term {
        if r.resolved_id.is_some() {
            return Term::Ref(r);
        }

        if let Some(id) = self.lookup_local(&r.name) {
            r.candidate_ids = vec![id.clone()];
            r.resolved_id = Some(id);
            return Term::Ref(r);
        }

        match self.module_candidates.get(&r.name) {
            Some(ids) if ids.len() == 1 => {
                r.candidate_ids = ids.clone();
                r.resolved_id = Some(ids[0].clone());
                Term::Ref(r)
            }
            Some(ids) if !ids.is_empty() => {
                // ambiguity is not an error here; the rewriter picks the
                // candidate that fits the position
                r.candidate_ids = ids.clone();
                Term::Ref(r)
            }
            _ => {
                errors.push(SemanticError::UndefinedRef {
                    name: r.name.clone(),
                    member: Some(self.member_name.clone()),
                    span: r.position.clone(),
                });
                let position = r.position.clone();
                Term::Invalid(InvalidExpression {
                    reason: format!("undefined reference '{}'", r.name),
                    original: Box::new(Term::Ref(r)),
                    position,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;
    use crate::semantic::{IdAssigner, StdlibInjector, TypeResolver};

    use super::*;

    fn run(input: &str) -> (Module, Vec<SemanticError>) {
        let module = parse_source("test", input).expect("parsing failed");
        let mut errors = vec![];
        let module = StdlibInjector.run(module, &mut errors);
        let module = IdAssigner.run(module, &mut errors);
        let module = TypeResolver.run(module, &mut errors);
        let module = RefResolver.run(module, &mut errors);
        (module, errors)
    }

    fn body_of<'a>(module: &'a Module, name: &str) -> &'a Expr {
        let bnd = module
            .bindings()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("missing binding {name}"));
        &bnd.lambda().expect("lambda body missing").body
    }

    #[test]
    fn test_param_reference_resolves() {
        let (module, errors) = run("fn id_fn(a: Int): Int = a;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let body = body_of(&module, "id_fn");
        let Term::Ref(r) = &body.terms[0] else {
            panic!("expected a ref");
        };
        assert_eq!(r.resolved_id.as_deref(), Some("test::bnd::id_fn::param::a"));
    }

    #[test]
    fn test_let_reference_resolves() {
        let (module, errors) = run("fn main(): Unit = let s = \"x\"; println s;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let body = body_of(&module, "main");
        let found = body
            .terms
            .iter()
            .find_map(|t| match t {
                Term::Ref(r) if r.name == "s" => Some(Term::Ref(r.clone())),
                _ => None,
            });
        let Term::Ref(r) = found.as_ref().expect("missing ref to s") else {
            unreachable!()
        };
        assert_eq!(r.resolved_id.as_deref(), Some("test::bnd::main::let::s"));
    }

    #[test]
    fn test_self_recursion_resolves_by_name() {
        let (module, errors) = run("fn fact(n: Int): Int = fact n;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let body = body_of(&module, "fact");
        let Term::Ref(r) = &body.terms[0] else {
            panic!("expected a ref");
        };
        assert_eq!(r.resolved_id.as_deref(), Some("test::bnd::fact"));
    }

    #[test]
    fn test_operator_symbol_keeps_candidates() {
        let (module, errors) = run("fn f(a: Int): Int = a - a;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let body = body_of(&module, "f");
        let Term::Ref(minus) = &body.terms[1] else {
            panic!("expected a ref");
        };
        // unary and binary minus both match; resolution is positional
        assert!(minus.resolved_id.is_none());
        assert_eq!(minus.candidate_ids.len(), 2);
    }

    #[test]
    fn test_undefined_ref_is_wrapped() {
        let (module, errors) = run("fn main(): Unit = println greet;");

        assert!(errors.iter().any(|e| matches!(
            e,
            SemanticError::UndefinedRef { name, member: Some(m), .. }
                if name == "greet" && m == "main"
        )));

        let body = body_of(&module, "main");
        assert!(body.terms.iter().any(|t| matches!(
            t,
            Term::Invalid(InvalidExpression { original, .. })
                if matches!(&**original, Term::Ref(r) if r.name == "greet")
        )));
    }
}
