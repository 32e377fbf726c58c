use crate::parser::ast::{Expr, Member, Module, Ref, Term};

use super::{Phase, SemanticError};

/// Marks function and operator lambdas whose body contains a self-call in
/// tail position. Tail positions are the body's result expression, both
/// branches of a conditional in tail position, and the result of a
/// let-sequence. The mark is advisory: the back end lowers marked lambdas
/// to loops instead of recursive calls.
pub struct TailRecursionDetector;

impl Phase for TailRecursionDetector {
    fn name(&self) -> &'static str {
        "TailRecursionDetector"
    }

    fn run(&self, module: Module, _errors: &mut Vec<SemanticError>) -> Module {
        let Module {
            name,
            visibility,
            members,
            doc,
            source_path,
            index,
        } = module;

        let members = members
            .into_iter()
            .map(|member| match member {
                Member::Bnd(mut bnd) => {
                    let Some(self_id) = bnd.id.clone() else {
                        return Member::Bnd(bnd);
                    };
                    if let Some(lambda) = bnd.lambda_mut() {
                        lambda.tail_recursive = has_tail_self_call(&lambda.body, &self_id);
                        if lambda.tail_recursive {
                            log::debug!("{self_id} is tail recursive");
                        }
                    }
                    Member::Bnd(bnd)
                }
                other => other,
            })
            .collect();

        Module {
            name,
            visibility,
            members,
            doc,
            source_path,
            index,
        }
    }
}

fn has_tail_self_call(body: &Expr, self_id: &str) -> bool {
    let Some(result) = body.terms.iter().rev().find(|t| !matches!(t, Term::Let(_)))
    else {
        return false;
    };

    term_has_tail_self_call(result, self_id)
}

fn term_has_tail_self_call(term: &Term, self_id: &str) -> bool {
    match term {
        Term::App(_) => {
            app_head(term).is_some_and(|head| head.resolved_id.as_deref() == Some(self_id))
        }
        Term::Cond(cond) => {
            has_tail_self_call(&cond.then_branch, self_id)
                || has_tail_self_call(&cond.else_branch, self_id)
        }
        Term::Group(group) => has_tail_self_call(&group.inner, self_id),
        Term::Expr(inner) => has_tail_self_call(inner, self_id),
        _ => false,
    }
}

/// The reference at the head of a (curried) application chain.
fn app_head(term: &Term) -> Option<&Ref> {
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
        ExpressionRewriter, IdAssigner, RefResolver, Simplifier, StdlibInjector, TypeResolver,
    };

    use super::*;

    fn run(input: &str) -> Module {
        let module = parse_source("test", input).expect("parsing failed");
        let mut errors = vec![];
        let module = StdlibInjector.run(module, &mut errors);
        let module = IdAssigner.run(module, &mut errors);
        let module = TypeResolver.run(module, &mut errors);
        let module = RefResolver.run(module, &mut errors);
        let module = ExpressionRewriter.run(module, &mut errors);
        let module = Simplifier.run(module, &mut errors);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        TailRecursionDetector.run(module, &mut vec![])
    }

    fn is_marked(module: &Module, name: &str) -> bool {
        module
            .bindings()
            .find(|b| b.name == name)
            .and_then(|b| b.lambda())
            .map(|l| l.tail_recursive)
            .unwrap_or(false)
    }

    #[test]
    fn test_plain_function_is_not_marked() {
        let module = run("fn add(a: Int, b: Int): Int = a + b;");
        assert!(!is_marked(&module, "add"));
    }

    #[test]
    fn test_tail_call_in_conditional_branch() {
        let module = run(
            "fn count(n: Int): Int = if n == 0 then 0 else count (n - 1);",
        );
        assert!(is_marked(&module, "count"));
    }

    #[test]
    fn test_ackermann_is_marked() {
        let module = run(
            "fn ack(m: Int, n: Int): Int = if m == 0 then n + 1 elif n == 0 then ack (m - 1) 1 else ack (m - 1) (ack m (n - 1));",
        );
        assert!(is_marked(&module, "ack"));
    }

    #[test]
    fn test_non_tail_recursion_is_not_marked() {
        // the self-call feeds an operator, so it is not in tail position
        let module = run("fn fact(n: Int): Int = if n == 0 then 1 else n * fact (n - 1);");
        assert!(!is_marked(&module, "fact"));
    }

    #[test]
    fn test_let_sequence_result_is_tail() {
        let module = run(
            "fn loop_fn(n: Int): Int = let m = n - 1; if m == 0 then 0 else loop_fn m;",
        );
        assert!(is_marked(&module, "loop_fn"));
    }
}
