use crate::parser::ast::{
    App, Arity, Assoc, BindingOrigin, Expr, InvalidExpression, LitUnit, Member, Module, Ref,
    ResolvablesIndex, Term, TypeSpec,
};

use super::{Phase, SemanticError};

/// Restructures the flat term runs the parser produced into properly
/// nested application trees using precedence climbing.
///
/// - Juxtaposition (`f x y`) is the implicit highest-precedence
///   left-associative operator and becomes a curried `App` chain.
/// - A reference in operand position prefers its non-operator candidate
///   and falls back to a unary prefix operator; in operator position it
///   prefers the binary candidate and falls back to unary postfix. The
///   choice is written back into `Ref.resolved_id`.
/// - A reference to a nullary function in value position is rewritten to
///   an explicit call `App(ref, ())` unless the contextual expected type
///   is a function type.
///
/// Runs that cannot be shaped into a single tree leave a
/// `DanglingTerms` error and an `InvalidExpression` wrapper behind.
pub struct ExpressionRewriter;

impl Phase for ExpressionRewriter {
    fn name(&self) -> &'static str {
        "ExpressionRewriter"
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

        let members: Vec<Member> = members
            .into_iter()
            .map(|member| match member {
                Member::Bnd(mut bnd) => {
                    let expected_fn = match (&bnd.type_asc, bnd.lambda()) {
                        (_, Some(lambda)) => {
                            matches!(lambda.ret_asc, Some(TypeSpec::Fn(_)))
                        }
                        (Some(asc), None) => asc.is_function(),
                        _ => false,
                    };

                    if let Some(lambda) = bnd.lambda_mut() {
                        lambda.body =
                            Box::new(rewrite_expr(*lambda.body.clone(), &index, expected_fn, errors));
                    } else {
                        bnd.value = rewrite_expr(bnd.value, &index, expected_fn, errors);
                    }
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

/// Operator facts looked up through the resolvables index.
#[derive(Debug, Clone, Copy)]
struct OpInfo<'a> {
    id: &'a str,
    precedence: u32,
    assoc: Assoc,
}

fn candidate_ops<'a>(
    r: &'a Ref,
    index: &'a ResolvablesIndex,
    arity: Arity,
    assoc: Option<Assoc>,
) -> Option<OpInfo<'a>> {
    r.candidate_ids.iter().find_map(|id| {
        let bnd = index.get(id)?.as_bnd()?;
        let meta = bnd.meta.as_ref()?;
        if meta.origin != BindingOrigin::Operator || meta.arity != arity {
            return None;
        }
        if let Some(required) = assoc {
            if meta.assoc != required {
                return None;
            }
        }
        Some(OpInfo {
            id: id.as_str(),
            precedence: meta.precedence,
            assoc: meta.assoc,
        })
    })
}

fn binary_op<'a>(r: &'a Ref, index: &'a ResolvablesIndex) -> Option<OpInfo<'a>> {
    candidate_ops(r, index, Arity::Binary, None)
}

fn prefix_op<'a>(r: &'a Ref, index: &'a ResolvablesIndex) -> Option<OpInfo<'a>> {
    candidate_ops(r, index, Arity::Unary, Some(Assoc::Right))
}

fn postfix_op<'a>(r: &'a Ref, index: &'a ResolvablesIndex) -> Option<OpInfo<'a>> {
    candidate_ops(r, index, Arity::Unary, Some(Assoc::Left))
}

/// A candidate that can stand as a plain value: anything that is not an
/// operator binding. Parameters and body-local bindings are not indexed
/// as operators, so they count as values.
fn value_candidate(r: &Ref, index: &ResolvablesIndex) -> Option<String> {
    r.candidate_ids
        .iter()
        .find(|id| match index.get(id) {
            Some(resolvable) => resolvable
                .as_bnd()
                .and_then(|bnd| bnd.meta.as_ref())
                .map(|meta| meta.origin != BindingOrigin::Operator)
                .unwrap_or(true),
            None => true,
        })
        .cloned()
}

fn app(func: Term, arg: Term) -> Term {
    let position = func.position().merge(&arg.position());
    Term::App(App {
        func: Box::new(func),
        arg: Box::new(Expr::single(arg)),
        type_spec: None,
        position,
    })
}

fn rewrite_expr(
    expr: Expr,
    index: &ResolvablesIndex,
    expected_fn: bool,
    errors: &mut Vec<SemanticError>,
) -> Expr {
    let Expr {
        terms,
        type_spec,
        position,
    } = expr;

    let mut rewritten: Vec<Term> = vec![];
    let mut run: Vec<Term> = vec![];

    for term in terms {
        match term {
            Term::Let(mut bind) => {
                let value_expected = bind
                    .type_asc
                    .as_ref()
                    .map(TypeSpec::is_function)
                    .unwrap_or(false);
                bind.value = Box::new(rewrite_expr(*bind.value, index, value_expected, errors));
                rewritten.push(Term::Let(bind));
            }
            other => run.push(rewrite_children(other, index, expected_fn, errors)),
        }
    }

    if !run.is_empty() {
        let mut climber = Climber {
            terms: run,
            pos: 0,
            index,
            errors,
        };
        let mut result = climber.climb(0);

        if climber.pos < climber.terms.len() {
            let leftover = climber.terms.split_off(climber.pos);
            let message = format!(
                "{} terms could not be attached to the expression",
                leftover.len()
            );
            climber.errors.push(SemanticError::DanglingTerms {
                message,
                span: leftover
                    .first()
                    .map(|t| t.position())
                    .unwrap_or(crate::lexer::Span::Synthetic),
            });

            let mut all = vec![result];
            all.extend(leftover);
            let original = Expr {
                position: position.clone(),
                type_spec: None,
                terms: all,
            };
            result = Term::Invalid(InvalidExpression {
                reason: "dangling terms after rewriting".to_string(),
                position: original.position.clone(),
                original: Box::new(Term::Expr(Box::new(original))),
            });
        }

        rewritten.push(auto_call(result, index, expected_fn, false));
    }

    Expr {
        terms: rewritten,
        type_spec,
        position,
    }
}

/// Rewrite the expressions nested inside a single run term before the run
/// itself is climbed.
fn rewrite_children(
    term: Term,
    index: &ResolvablesIndex,
    expected_fn: bool,
    errors: &mut Vec<SemanticError>,
) -> Term {
    match term {
        Term::Group(mut group) => {
            group.inner = Box::new(rewrite_expr(*group.inner, index, expected_fn, errors));
            Term::Group(group)
        }
        Term::Cond(mut cond) => {
            cond.condition = Box::new(rewrite_expr(*cond.condition, index, false, errors));
            cond.then_branch = Box::new(rewrite_expr(*cond.then_branch, index, expected_fn, errors));
            cond.else_branch = Box::new(rewrite_expr(*cond.else_branch, index, expected_fn, errors));
            Term::Cond(cond)
        }
        Term::Tuple(mut tuple) => {
            tuple.elements = tuple
                .elements
                .into_iter()
                .map(|e| rewrite_expr(e, index, false, errors))
                .collect();
            Term::Tuple(tuple)
        }
        Term::Select(mut select) => {
            select.target = Box::new(rewrite_children(*select.target, index, false, errors));
            Term::Select(select)
        }
        Term::Expr(inner) => Term::Expr(Box::new(rewrite_expr(*inner, index, expected_fn, errors))),
        other => other,
    }
}

struct Climber<'a, 'e> {
    terms: Vec<Term>,
    pos: usize,
    index: &'a ResolvablesIndex,
    errors: &'e mut Vec<SemanticError>,
}

impl Climber<'_, '_> {
    fn peek(&self) -> Option<&Term> {
        self.terms.get(self.pos)
    }

    fn next(&mut self) -> Term {
        let term = self.terms[self.pos].clone();
        self.pos += 1;
        term
    }

    /// Precedence climbing over the run. `min_prec` is the lowest operator
    /// precedence this call may consume.
    fn climb(&mut self, min_prec: u32) -> Term {
        let mut lhs = self.parse_operand();

        while let Some(Term::Ref(r)) = self.peek() {
            if let Some(op) = binary_op(r, self.index) {
                if op.precedence < min_prec {
                    break;
                }
                let (op_id, op_prec, op_assoc) =
                    (op.id.to_string(), op.precedence, op.assoc);

                let Term::Ref(mut op_ref) = self.next() else {
                    unreachable!("peeked a ref");
                };
                op_ref.resolved_id = Some(op_id);

                if self.peek().is_none() {
                    self.errors.push(SemanticError::DanglingTerms {
                        message: format!("operator '{}' is missing its right operand", op_ref.name),
                        span: op_ref.position.clone(),
                    });
                    let position = op_ref.position.clone();
                    return Term::Invalid(InvalidExpression {
                        reason: "operator is missing its right operand".to_string(),
                        original: Box::new(app(Term::Ref(op_ref), lhs)),
                        position,
                    });
                }

                // left associativity raises the bar for the right side,
                // right associativity lets equal precedence nest rightwards
                let next_min = match op_assoc {
                    Assoc::Right => op_prec,
                    Assoc::Left | Assoc::None => op_prec + 1,
                };
                let rhs = self.climb(next_min);
                lhs = app(app(Term::Ref(op_ref), lhs), rhs);
            } else if let Some(op) = postfix_op(r, self.index) {
                if op.precedence < min_prec {
                    break;
                }
                let op_id = op.id.to_string();
                let Term::Ref(mut op_ref) = self.next() else {
                    unreachable!("peeked a ref");
                };
                op_ref.resolved_id = Some(op_id);
                lhs = app(Term::Ref(op_ref), lhs);
            } else {
                break;
            }
        }

        lhs
    }

    /// An operand: leading prefix operators, an atom, then a juxtaposition
    /// chain of argument atoms.
    fn parse_operand(&mut self) -> Term {
        let mut lhs = match self.peek() {
            Some(Term::Ref(r)) => {
                if value_candidate(r, self.index).is_some() {
                    self.next_value_ref()
                } else if let Some(op) = prefix_op(r, self.index) {
                    let op_prec = op.precedence;
                    let op_id = op.id.to_string();
                    let Term::Ref(mut op_ref) = self.next() else {
                        unreachable!("peeked a ref");
                    };
                    op_ref.resolved_id = Some(op_id);
                    let operand = self.climb(op_prec);
                    return app(Term::Ref(op_ref), operand);
                } else {
                    let Term::Ref(r) = self.next() else {
                        unreachable!("peeked a ref");
                    };
                    self.errors.push(SemanticError::DanglingTerms {
                        message: format!("'{}' cannot be used as a value here", r.name),
                        span: r.position.clone(),
                    });
                    let position = r.position.clone();
                    Term::Invalid(InvalidExpression {
                        reason: format!("'{}' cannot be used as a value here", r.name),
                        original: Box::new(Term::Ref(r)),
                        position,
                    })
                }
            }
            Some(_) => self.next(),
            None => {
                self.errors.push(SemanticError::DanglingTerms {
                    message: "expected an operand".to_string(),
                    span: crate::lexer::Span::Synthetic,
                });
                return Term::Invalid(InvalidExpression {
                    reason: "expected an operand".to_string(),
                    original: Box::new(Term::Unit(LitUnit {
                        position: crate::lexer::Span::Synthetic,
                    })),
                    position: crate::lexer::Span::Synthetic,
                });
            }
        };

        // juxtaposition: apply while the next term starts an operand
        while self.starts_operand() {
            let arg = self.parse_juxt_arg();
            lhs = app(lhs, arg);
        }

        lhs
    }

    /// One juxtaposed argument: prefix operators bind only the immediately
    /// following atom in argument position.
    fn parse_juxt_arg(&mut self) -> Term {
        match self.peek() {
            Some(Term::Ref(r)) => {
                if value_candidate(r, self.index).is_some() {
                    self.next_value_ref()
                } else if let Some(op) = prefix_op(r, self.index) {
                    let op_id = op.id.to_string();
                    let Term::Ref(mut op_ref) = self.next() else {
                        unreachable!("peeked a ref");
                    };
                    op_ref.resolved_id = Some(op_id);
                    let arg = self.parse_juxt_arg();
                    app(Term::Ref(op_ref), arg)
                } else {
                    unreachable!("starts_operand() said this ref starts an operand")
                }
            }
            _ => self.next(),
        }
    }

    fn next_value_ref(&mut self) -> Term {
        let Term::Ref(mut r) = self.next() else {
            unreachable!("caller peeked a ref");
        };
        if r.resolved_id.is_none() {
            r.resolved_id = value_candidate(&r, self.index);
        }
        Term::Ref(r)
    }

    fn starts_operand(&self) -> bool {
        match self.peek() {
            None => false,
            Some(Term::Ref(r)) => {
                // operator position wins: a binary or postfix candidate
                // means this ref continues the expression instead of
                // starting a new operand
                if binary_op(r, self.index).is_some() || postfix_op(r, self.index).is_some() {
                    false
                } else {
                    value_candidate(r, self.index).is_some()
                        || prefix_op(r, self.index).is_some()
                }
            }
            Some(Term::Let(_)) => false,
            Some(_) => true,
        }
    }
}

/// Rewrite bare references to nullary functions in value position into
/// explicit calls, leaving them untouched where a function value is
/// expected.
fn auto_call(term: Term, index: &ResolvablesIndex, expected_fn: bool, in_func_pos: bool) -> Term {
    match term {
        Term::Ref(r) => {
            if expected_fn || in_func_pos {
                return Term::Ref(r);
            }

            let is_nullary_fn = r
                .resolved_id
                .as_deref()
                .and_then(|id| index.get(id))
                .and_then(|resolvable| resolvable.as_bnd())
                .and_then(|bnd| bnd.meta.as_ref())
                .map(|meta| {
                    meta.origin == BindingOrigin::Function && meta.arity == Arity::Nullary
                })
                .unwrap_or(false);

            if is_nullary_fn {
                let position = r.position.clone();
                app(
                    Term::Ref(r),
                    Term::Unit(LitUnit { position }),
                )
            } else {
                Term::Ref(r)
            }
        }
        Term::App(mut a) => {
            a.func = Box::new(auto_call(*a.func, index, false, true));
            a.arg = Box::new(auto_call_expr(*a.arg, index, false));
            Term::App(a)
        }
        Term::Group(mut group) => {
            group.inner = Box::new(auto_call_expr(*group.inner, index, expected_fn));
            Term::Group(group)
        }
        Term::Cond(mut cond) => {
            cond.then_branch = Box::new(auto_call_expr(*cond.then_branch, index, expected_fn));
            cond.else_branch = Box::new(auto_call_expr(*cond.else_branch, index, expected_fn));
            Term::Cond(cond)
        }
        Term::Tuple(mut tuple) => {
            tuple.elements = tuple
                .elements
                .into_iter()
                .map(|e| auto_call_expr(e, index, false))
                .collect();
            Term::Tuple(tuple)
        }
        other => other,
    }
}

fn auto_call_expr(expr: Expr, index: &ResolvablesIndex, expected_fn: bool) -> Expr {
    let Expr {
        terms,
        type_spec,
        position,
    } = expr;

    Expr {
        terms: terms
            .into_iter()
            .map(|t| match t {
                bind @ Term::Let(_) => bind,
                other => auto_call(other, index, expected_fn, false),
            })
            .collect(),
        type_spec,
        position,
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::ast::LitInt;
    use crate::parser::parse_source;
    use crate::semantic::{IdAssigner, RefResolver, StdlibInjector, TypeResolver};

    use super::*;

    fn run(input: &str) -> (Module, Vec<SemanticError>) {
        let module = parse_source("test", input).expect("parsing failed");
        let mut errors = vec![];
        let module = StdlibInjector.run(module, &mut errors);
        let module = IdAssigner.run(module, &mut errors);
        let module = TypeResolver.run(module, &mut errors);
        let module = RefResolver.run(module, &mut errors);
        let module = ExpressionRewriter.run(module, &mut errors);
        (module, errors)
    }

    fn result_term<'a>(module: &'a Module, name: &str) -> &'a Term {
        let bnd = module
            .bindings()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("missing binding {name}"));
        let body = match bnd.lambda() {
            Some(lambda) => &lambda.body,
            None => &bnd.value,
        };
        body.terms.last().expect("body has a result term")
    }

    fn as_app(term: &Term) -> &App {
        let Term::App(app) = term else {
            panic!("expected an application, got {term:?}");
        };
        app
    }

    fn op_name(term: &Term) -> &str {
        let Term::Ref(r) = term else {
            panic!("expected a ref, got {term:?}");
        };
        &r.name
    }

    #[test]
    fn test_juxtaposition_curries_left() {
        let (module, errors) = run("fn f(x: Int, y: Int): Int = x; fn g(a: Int): Int = f a a;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        // f a a → App(App(f, a), a)
        let outer = as_app(result_term(&module, "g"));
        let inner = as_app(&outer.func);
        assert_eq!(op_name(&inner.func), "f");
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        let (module, errors) = run("fn f(a: Int): Int = 1 + 2 * 3;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        // 1 + 2 * 3 → App(App(+, 1), App(App(*, 2), 3))
        let plus = as_app(result_term(&module, "f"));
        let plus_lhs = as_app(&plus.func);
        assert_eq!(op_name(&plus_lhs.func), "+");
        assert!(matches!(
            plus_lhs.arg.terms[0],
            Term::Int(LitInt { value: 1, .. })
        ));

        let rhs = as_app(&plus.arg.terms[0]);
        let rhs_inner = as_app(&rhs.func);
        assert_eq!(op_name(&rhs_inner.func), "*");
    }

    #[test]
    fn test_left_associativity() {
        let (module, errors) = run("fn f(a: Int, b: Int, c: Int): Int = a + b + c;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        // (a + b) + c
        let outer = as_app(result_term(&module, "f"));
        let outer_fn = as_app(&outer.func);
        assert_eq!(op_name(&outer_fn.func), "+");
        assert!(matches!(outer_fn.arg.terms[0], Term::App(_)));
    }

    #[test]
    fn test_right_associativity() {
        let (module, errors) =
            run("fn f(a: String, b: String, c: String): String = a ++ b ++ c;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        // a ++ (b ++ c)
        let outer = as_app(result_term(&module, "f"));
        let outer_fn = as_app(&outer.func);
        assert_eq!(op_name(&outer_fn.func), "++");
        assert!(matches!(outer_fn.arg.terms[0], Term::Ref(_)));
        assert!(matches!(outer.arg.terms[0], Term::App(_)));
    }

    #[test]
    fn test_unary_prefix_in_operand_position() {
        let (module, errors) = run("fn f(a: Int): Int = -a + a;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        // (-a) + a
        let plus = as_app(result_term(&module, "f"));
        let plus_fn = as_app(&plus.func);
        let negated = as_app(&plus_fn.arg.terms[0]);
        let Term::Ref(minus) = &*negated.func else {
            panic!("expected the unary minus ref");
        };
        assert_eq!(minus.resolved_id.as_deref(), Some("stdlib::op.minus.1"));
    }

    #[test]
    fn test_binary_wins_in_operator_position() {
        let (module, errors) = run("fn f(a: Int, b: Int): Int = a - b;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let outer = as_app(result_term(&module, "f"));
        let inner = as_app(&outer.func);
        let Term::Ref(minus) = &*inner.func else {
            panic!("expected the binary minus ref");
        };
        assert_eq!(minus.resolved_id.as_deref(), Some("stdlib::op.minus.2"));
    }

    #[test]
    fn test_nullary_auto_call_in_value_position() {
        let (module, errors) = run("fn g(): Int = 42; let x = g;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let call = as_app(result_term(&module, "x"));
        assert_eq!(op_name(&call.func), "g");
        assert!(matches!(call.arg.terms[0], Term::Unit(_)));
    }

    #[test]
    fn test_no_auto_call_when_function_type_expected() {
        let (module, errors) = run("fn g(): Int = 42; let f: () -> Int = g;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert!(matches!(result_term(&module, "f"), Term::Ref(_)));
    }

    #[test]
    fn test_dangling_operator_reports() {
        let (_, errors) = run("fn f(a: Int): Int = a +;");

        assert!(errors
            .iter()
            .any(|e| matches!(e, SemanticError::DanglingTerms { .. })));
    }

    #[test]
    fn test_conditional_is_an_atom() {
        let (module, errors) =
            run("fn f(a: Int): Int = 1 + (if a == 0 then 1 else 2);");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let plus = as_app(result_term(&module, "f"));
        assert!(matches!(plus.arg.terms[0], Term::Group(_)));
    }
}
