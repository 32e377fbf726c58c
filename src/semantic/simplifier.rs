use crate::parser::ast::{Expr, Member, Module, ResolvablesIndex, Term};

use super::{Phase, SemanticError};

/// Removes the wrappers that only existed to carry structure through
/// parsing and rewriting: a parenthesized group collapses into its inner
/// term and a single-term expression nested as a term collapses into that
/// term. Ascriptions transfer to the surviving node. Expression wrappers
/// with meaning to later phases (function bodies, conditional branches,
/// application arguments) are preserved.
pub struct Simplifier;

impl Phase for Simplifier {
    fn name(&self) -> &'static str {
        "Simplifier"
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

        let members = members
            .into_iter()
            .map(|member| match member {
                Member::Bnd(mut bnd) => {
                    bnd.value = simplify_expr(bnd.value);
                    Member::Bnd(bnd)
                }
                other => other,
            })
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

fn simplify_expr(expr: Expr) -> Expr {
    let Expr {
        terms,
        type_spec,
        position,
    } = expr;

    Expr {
        terms: terms.into_iter().map(simplify_term).collect(),
        type_spec,
        position,
    }
}

fn simplify_term(term: Term) -> Term {
    match term {
        Term::Group(group) => {
            let inner = simplify_expr(*group.inner);
            match single_term(inner) {
                Ok(mut single) => {
                    if let Some(spec) = group.type_spec {
                        single.set_type(spec);
                    }
                    single
                }
                Err(inner) => Term::Expr(Box::new(inner)),
            }
        }
        Term::Expr(inner) => {
            let inner = simplify_expr(*inner);
            match single_term(inner) {
                Ok(single) => single,
                Err(inner) => Term::Expr(Box::new(inner)),
            }
        }
        Term::App(mut app) => {
            app.func = Box::new(simplify_term(*app.func));
            app.arg = Box::new(simplify_expr(*app.arg));
            Term::App(app)
        }
        Term::Cond(mut cond) => {
            cond.condition = Box::new(simplify_expr(*cond.condition));
            cond.then_branch = Box::new(simplify_expr(*cond.then_branch));
            cond.else_branch = Box::new(simplify_expr(*cond.else_branch));
            Term::Cond(cond)
        }
        Term::Lambda(mut lambda) => {
            lambda.body = Box::new(simplify_expr(*lambda.body));
            Term::Lambda(lambda)
        }
        Term::Select(mut select) => {
            select.target = Box::new(simplify_term(*select.target));
            Term::Select(select)
        }
        Term::Tuple(mut tuple) => {
            tuple.elements = tuple.elements.into_iter().map(simplify_expr).collect();
            Term::Tuple(tuple)
        }
        Term::Let(mut bind) => {
            bind.value = Box::new(simplify_expr(*bind.value));
            Term::Let(bind)
        }
        other => other,
    }
}

/// A single non-let term can stand on its own; anything else keeps its
/// expression wrapper.
fn single_term(mut expr: Expr) -> Result<Term, Expr> {
    if expr.terms.len() == 1 && !matches!(expr.terms[0], Term::Let(_)) {
        let mut single = expr.terms.remove(0);
        if let Some(spec) = expr.type_spec {
            single.set_type(spec);
        }
        Ok(single)
    } else {
        Err(expr)
    }
}
