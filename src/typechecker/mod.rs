//! # Type Checker
//!
//! Checks and infers types over the rewritten AST in two sub-passes:
//!
//! 1. **Lower ascriptions.** Every function/operator parameter copies its
//!    declared type into the computed slot; a missing annotation is an
//!    error. Fully ascribed signatures are established up front so that
//!    forward references resolve through the index.
//! 2. **Check and infer.** Bottom-up over each member's body in a scope
//!    holding the lambda's parameters. Applications consume one parameter
//!    at a time (under-saturation is a legal curried value), conditionals
//!    require boolean conditions and agreeing branches, holes adopt the
//!    type their context expects, and native bodies are trusted to match
//!    their declared signature. Return types are inferred from bodies
//!    except for self-recursive functions, which must declare them.
//!
//! Everything found wrong is accumulated; error nodes left by earlier
//! phases type as unknown and never produce follow-up reports. When the
//! module declares a `main` binding its signature is validated to be
//! `() -> Unit` or `() -> Int`.

mod error;
mod scope;

pub use self::error::TypeError;
pub use self::scope::Scope;

use crate::lexer::Span;
use crate::parser::ast::{
    App, Bnd, BindingOrigin, Cond, Expr, MemEffect, Member, Module, ResolvablesIndex, Resolvable,
    Select, Term, TypeFn, TypeRef, TypeSpec,
};
use crate::semantic::{Phase, SemanticError};

pub struct TypeChecker;

impl Phase for TypeChecker {
    fn name(&self) -> &'static str {
        "TypeChecker"
    }

    fn run(&self, module: Module, errors: &mut Vec<SemanticError>) -> Module {
        let Module {
            name,
            visibility,
            mut members,
            doc,
            source_path,
            ..
        } = module;

        // pass 1: lower ascriptions and establish declared signatures
        for member in &mut members {
            if let Member::Bnd(bnd) = member {
                lower_ascriptions(bnd, errors);
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

        // pass 2: check member bodies in order; every finished member
        // updates its index entry so later members see inferred signatures
        for i in 0..module.members.len() {
            let mut member = module.members[i].clone();

            if let Member::Bnd(bnd) = &mut member {
                check_bnd(bnd, &module.index, errors);
                if let Some(id) = bnd.id.clone() {
                    module.index.insert(id, Resolvable::Bnd(bnd.clone()));
                }
            }

            module.members[i] = member;
        }

        check_main_signature(&module, errors);

        module.index = ResolvablesIndex::build(&module);
        module
    }
}

/// Fixed types of literals and friends.
pub fn int_type() -> TypeSpec {
    stdlib_ref("Int64")
}

pub fn float_type() -> TypeSpec {
    stdlib_ref("Double")
}

pub fn string_type() -> TypeSpec {
    stdlib_ref("String")
}

pub fn bool_type() -> TypeSpec {
    stdlib_ref("Bool")
}

pub fn unit_type() -> TypeSpec {
    TypeSpec::Unit {
        position: Span::Synthetic,
    }
}

fn stdlib_ref(name: &str) -> TypeSpec {
    TypeSpec::Ref(TypeRef {
        name: name.to_string(),
        resolved_id: Some(format!("stdlib::{name}")),
        position: Span::Synthetic,
    })
}

/// Resolve a spec to its canonical shape: alias chains collapse to their
/// target and the native `void` type becomes the unit type.
pub fn canonical_spec(spec: &TypeSpec, index: &ResolvablesIndex) -> TypeSpec {
    match spec {
        TypeSpec::Ref(r) => {
            let Some(id) = &r.resolved_id else {
                return spec.clone();
            };
            match index.get(id) {
                Some(Resolvable::TypeAlias(alias)) => match &alias.type_spec {
                    Some(target) => canonical_spec(target, index),
                    None => spec.clone(),
                },
                Some(Resolvable::TypeDef(def)) => match &def.spec {
                    TypeSpec::NativePrimitive(p) if p.llvm_type == "void" => unit_type(),
                    _ => spec.clone(),
                },
                _ => spec.clone(),
            }
        }
        _ => spec.clone(),
    }
}

/// Flatten a curried function spec: `A -> (B -> C)` and `A -> B -> C`
/// denote the same function.
fn flatten_fn(f: TypeFn) -> TypeFn {
    let TypeFn {
        mut params,
        ret,
        position,
    } = f;

    match *ret {
        TypeSpec::Fn(inner) if !params.is_empty() && !inner.params.is_empty() => {
            let inner = flatten_fn(inner);
            params.extend(inner.params);
            TypeFn {
                params,
                ret: inner.ret,
                position,
            }
        }
        ret => TypeFn {
            params,
            ret: Box::new(ret),
            position,
        },
    }
}

/// Structural type equality modulo aliases. Invalid and variable specs
/// compare equal to anything so that already-reported errors do not
/// cascade.
pub fn types_equal(a: &TypeSpec, b: &TypeSpec, index: &ResolvablesIndex) -> bool {
    let a = canonical_spec(a, index);
    let b = canonical_spec(b, index);

    match (a, b) {
        (TypeSpec::Invalid(_), _) | (_, TypeSpec::Invalid(_)) => true,
        (TypeSpec::Variable(_), _) | (_, TypeSpec::Variable(_)) => true,
        (TypeSpec::Unit { .. }, TypeSpec::Unit { .. }) => true,
        (TypeSpec::Ref(x), TypeSpec::Ref(y)) => match (&x.resolved_id, &y.resolved_id) {
            (Some(xi), Some(yi)) => xi == yi,
            _ => x.name == y.name,
        },
        (TypeSpec::Fn(x), TypeSpec::Fn(y)) => {
            let x = flatten_fn(x);
            let y = flatten_fn(y);
            x.params.len() == y.params.len()
                && x.params
                    .iter()
                    .zip(y.params.iter())
                    .all(|(xp, yp)| types_equal(xp, yp, index))
                && types_equal(&x.ret, &y.ret, index)
        }
        (TypeSpec::Tuple(x), TypeSpec::Tuple(y)) => {
            x.elements.len() == y.elements.len()
                && x.elements
                    .iter()
                    .zip(y.elements.iter())
                    .all(|(xe, ye)| types_equal(xe, ye, index))
        }
        (TypeSpec::NativePrimitive(x), TypeSpec::NativePrimitive(y)) => {
            x.llvm_type == y.llvm_type
        }
        (TypeSpec::NativePointer(x), TypeSpec::NativePointer(y)) => x.llvm_type == y.llvm_type,
        (TypeSpec::NativeStruct(x), TypeSpec::NativeStruct(y)) => {
            x.fields.len() == y.fields.len()
                && x.fields.iter().zip(y.fields.iter()).all(|(xf, yf)| {
                    xf.name == yf.name && types_equal(&xf.spec, &yf.spec, index)
                })
        }
        _ => false,
    }
}

/// Whether values of this type live on the heap and must be released:
/// native types tagged with an allocation effect, and structs with at
/// least one heap field, transitively.
pub fn is_heap_type(spec: &TypeSpec, index: &ResolvablesIndex) -> bool {
    heap_check(spec, index, &mut Vec::new())
}

fn heap_check(spec: &TypeSpec, index: &ResolvablesIndex, visiting: &mut Vec<String>) -> bool {
    let canonical = canonical_spec(spec, index);
    match &canonical {
        TypeSpec::NativePrimitive(p) => p.mem_effect == Some(MemEffect::Alloc),
        TypeSpec::NativePointer(p) => p.mem_effect == Some(MemEffect::Alloc),
        TypeSpec::NativeStruct(ns) => {
            ns.mem_effect == Some(MemEffect::Alloc)
                || ns.fields.iter().any(|f| heap_check(&f.spec, index, visiting))
        }
        TypeSpec::Tuple(t) => t.elements.iter().any(|e| heap_check(e, index, visiting)),
        TypeSpec::Ref(r) => {
            let Some(id) = &r.resolved_id else {
                return false;
            };
            if visiting.contains(id) {
                return false;
            }
            match index.get(id) {
                Some(Resolvable::TypeDef(def)) => def.spec.mem_effect() == Some(MemEffect::Alloc),
                Some(Resolvable::TypeStruct(ts)) => {
                    visiting.push(id.clone());
                    let heap = ts.fields.iter().any(|f| {
                        let spec = f.type_spec.as_ref().unwrap_or(&f.type_asc);
                        heap_check(spec, index, visiting)
                    });
                    visiting.pop();
                    heap
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// The user-facing name of a heap type, used to locate its `__free_*` and
/// `__clone_*` runtime hooks.
pub fn heap_type_name(spec: &TypeSpec, index: &ResolvablesIndex) -> Option<String> {
    match canonical_spec(spec, index) {
        TypeSpec::Ref(r) => {
            let id = r.resolved_id?;
            match index.get(&id) {
                Some(Resolvable::TypeDef(def)) => Some(def.name.clone()),
                Some(Resolvable::TypeStruct(ts)) => Some(ts.name.clone()),
                _ => Some(r.name),
            }
        }
        _ => None,
    }
}

fn lower_ascriptions(bnd: &mut Bnd, errors: &mut Vec<SemanticError>) {
    let meta = bnd.meta.clone();
    let bnd_id = bnd.id.clone();
    let bnd_name = bnd.name.clone();

    let Some(lambda) = bnd.lambda_mut() else {
        return;
    };

    for param in &mut lambda.params {
        match &param.type_asc {
            Some(asc) => param.type_spec = Some(asc.clone()),
            None => {
                let error = match &meta {
                    Some(m) if m.origin == BindingOrigin::Operator => {
                        TypeError::MissingOperatorParameterType {
                            operator: m.original_name.clone(),
                            param: param.name.clone(),
                            span: param.position.clone(),
                        }
                    }
                    _ => TypeError::MissingParameterType {
                        function: bnd_name.clone(),
                        param: param.name.clone(),
                        span: param.position.clone(),
                    },
                };
                errors.push(SemanticError::TypeCheckingError(error));
            }
        }
    }

    // a self-recursive body cannot have its return type inferred
    if lambda.ret_asc.is_none() {
        if let Some(id) = &bnd_id {
            let mut recursive = false;
            lambda.body.walk(&mut |term| {
                if let Term::Ref(r) = term {
                    if r.resolved_id.as_deref() == Some(id) {
                        recursive = true;
                    }
                }
            });
            if recursive {
                errors.push(SemanticError::TypeCheckingError(
                    TypeError::RecursiveFunctionMissingReturnType {
                        function: bnd_name,
                        span: lambda.position.clone(),
                    },
                ));
            }
        }
    }

    // a fully ascribed signature is usable before the body is checked
    if let Some(ret) = &lambda.ret_asc {
        let params: Vec<TypeSpec> = lambda
            .params
            .iter()
            .map(|p| {
                p.type_spec.clone().unwrap_or(TypeSpec::Variable(
                    crate::parser::ast::TypeVariable {
                        name: p.name.clone(),
                        position: Span::Synthetic,
                    },
                ))
            })
            .collect();
        let sig = TypeSpec::Fn(TypeFn {
            params,
            ret: Box::new(ret.clone()),
            position: Span::Synthetic,
        });
        lambda.type_spec = Some(sig.clone());
        bnd.type_spec = Some(sig);
    }
}

fn check_bnd(bnd: &mut Bnd, index: &ResolvablesIndex, errors: &mut Vec<SemanticError>) {
    let bnd_name = bnd.name.clone();

    if bnd.lambda().is_some() {
        let Some(lambda) = bnd.lambda_mut() else {
            unreachable!("just checked for a lambda body");
        };

        let mut scope = Scope::new();
        for param in &lambda.params {
            if let (Some(id), Some(spec)) = (&param.id, &param.type_spec) {
                scope.add(id, spec.clone());
            }
        }

        // native and constructor bodies are markers: trust the signature
        let trusted = matches!(
            lambda.body.result_terms().last(),
            Some(Term::Native(_)) | Some(Term::Data(_))
        );

        let expected = lambda.ret_asc.clone();
        let ret = if trusted {
            if let Some(Term::Data(data)) = lambda
                .body
                .result_terms()
                .last()
                .cloned()
                .as_ref()
            {
                let mut data = data.clone();
                data.type_spec = expected.clone();
                let position = lambda.body.position.clone();
                lambda.body = Box::new(Expr {
                    terms: vec![Term::Data(data)],
                    type_spec: expected.clone(),
                    position,
                });
            }
            expected.clone()
        } else {
            let before = errors.len();
            let mut checker = Checker {
                index,
                errors: &mut *errors,
            };
            let body_type = checker.check_expr(&mut lambda.body, &mut scope, expected.as_ref());

            if let (Some(asc), Some(actual)) = (&expected, &body_type) {
                if !types_equal(asc, actual, index) {
                    errors.push(SemanticError::TypeCheckingError(TypeError::TypeMismatch {
                        expected: asc.clone(),
                        actual: actual.clone(),
                        expected_by: Some(bnd_name.clone()),
                        span: lambda.body.position.clone(),
                    }));
                }
            }

            let ret = expected.clone().or(body_type);
            if ret.is_none() && errors.len() == before {
                errors.push(SemanticError::TypeCheckingError(TypeError::UnableToInfer {
                    name: bnd_name.clone(),
                    span: lambda.position.clone(),
                }));
            }
            ret
        };

        if let Some(ret) = ret {
            let params: Vec<TypeSpec> = lambda
                .params
                .iter()
                .map(|p| {
                    p.type_spec.clone().unwrap_or(TypeSpec::Variable(
                        crate::parser::ast::TypeVariable {
                            name: p.name.clone(),
                            position: Span::Synthetic,
                        },
                    ))
                })
                .collect();
            let sig = TypeSpec::Fn(TypeFn {
                params,
                ret: Box::new(ret),
                position: Span::Synthetic,
            });
            lambda.type_spec = Some(sig.clone());
            bnd.type_spec = Some(sig);
        }
        return;
    }

    // plain let member: checked in an empty local scope
    let expected = bnd.type_asc.clone();
    let before = errors.len();
    let mut checker = Checker {
        index,
        errors: &mut *errors,
    };
    let mut scope = Scope::new();
    let value_type = checker.check_expr(&mut bnd.value, &mut scope, expected.as_ref());

    if let (Some(asc), Some(actual)) = (&expected, &value_type) {
        if !types_equal(asc, actual, index) {
            errors.push(SemanticError::TypeCheckingError(TypeError::TypeMismatch {
                expected: asc.clone(),
                actual: actual.clone(),
                expected_by: Some(bnd_name.clone()),
                span: bnd.value.position.clone(),
            }));
        }
    }

    bnd.type_spec = expected.or(value_type);
    if bnd.type_spec.is_none() && errors.len() == before {
        errors.push(SemanticError::TypeCheckingError(TypeError::UnableToInfer {
            name: bnd_name,
            span: bnd.position.clone(),
        }));
    }
}

fn check_main_signature(module: &Module, errors: &mut Vec<SemanticError>) {
    let Some(main) = module
        .bindings()
        .find(|b| b.name == "main" && b.id.as_deref().map(|id| !id.starts_with("stdlib")) == Some(true))
    else {
        return;
    };

    let Some(spec) = &main.type_spec else {
        return;
    };

    let valid = match canonical_spec(spec, &module.index) {
        TypeSpec::Fn(f) if f.params.is_empty() => {
            let ret = canonical_spec(&f.ret, &module.index);
            ret.is_unit()
                || matches!(
                    &ret,
                    TypeSpec::Ref(r) if r.resolved_id.as_deref() == Some("stdlib::Int64")
                )
        }
        _ => false,
    };

    if !valid {
        errors.push(SemanticError::InvalidMainSignature {
            found: spec.to_string(),
            span: main.position.clone(),
        });
    }
}

struct Checker<'a, 'e> {
    index: &'a ResolvablesIndex,
    errors: &'e mut Vec<SemanticError>,
}

impl Checker<'_, '_> {
    fn check_expr(
        &mut self,
        expr: &mut Expr,
        scope: &mut Scope,
        expected: Option<&TypeSpec>,
    ) -> Option<TypeSpec> {
        scope.enter();

        let len = expr.terms.len();
        let mut result = None;

        for (i, term) in expr.terms.iter_mut().enumerate() {
            match term {
                Term::Let(bind) => {
                    let asc = bind.type_asc.clone();
                    let value_type = self.check_expr(&mut bind.value, scope, asc.as_ref());

                    if let (Some(asc), Some(actual)) = (&asc, &value_type) {
                        if !types_equal(asc, actual, self.index) {
                            self.errors.push(SemanticError::TypeCheckingError(
                                TypeError::TypeMismatch {
                                    expected: asc.clone(),
                                    actual: actual.clone(),
                                    expected_by: Some(bind.name.clone()),
                                    span: bind.position.clone(),
                                },
                            ));
                        }
                    }

                    bind.type_spec = asc.or(value_type);
                    if let (Some(id), Some(spec)) = (&bind.id, &bind.type_spec) {
                        scope.add(id, spec.clone());
                    }
                }
                other => {
                    let term_expected = if i + 1 == len { expected } else { None };
                    result = self.check_term(other, scope, term_expected);
                }
            }
        }

        scope.exit();

        if let Some(spec) = &result {
            expr.type_spec = Some(spec.clone());
        }
        result
    }

    fn check_term(
        &mut self,
        term: &mut Term,
        scope: &mut Scope,
        expected: Option<&TypeSpec>,
    ) -> Option<TypeSpec> {
        match term {
            Term::Int(_) => Some(int_type()),
            Term::Float(_) => Some(float_type()),
            Term::Str(_) => Some(string_type()),
            Term::Bool(_) => Some(bool_type()),
            Term::Unit(_) => Some(unit_type()),
            Term::Ref(r) => {
                let spec = r.resolved_id.as_deref().and_then(|id| {
                    scope
                        .resolve(id)
                        .cloned()
                        .or_else(|| self.index.get(id).and_then(|n| n.type_spec().cloned()))
                });
                if let Some(spec) = &spec {
                    r.type_spec = Some(spec.clone());
                }
                spec
            }
            Term::App(app) => self.check_app(app, scope),
            Term::Cond(cond) => self.check_cond(cond, scope, expected),
            Term::Select(select) => self.check_select(select, scope),
            Term::Group(group) => {
                let spec = self.check_expr(&mut group.inner, scope, expected);
                group.type_spec = spec.clone();
                spec
            }
            Term::Expr(inner) => self.check_expr(inner, scope, expected),
            Term::Tuple(tuple) => {
                let mut element_types = vec![];
                for element in &mut tuple.elements {
                    element_types.push(self.check_expr(element, scope, None));
                }
                let spec = element_types
                    .into_iter()
                    .collect::<Option<Vec<_>>>()
                    .map(|elements| {
                        TypeSpec::Tuple(crate::parser::ast::TypeTuple {
                            elements,
                            position: Span::Synthetic,
                        })
                    });
                tuple.type_spec = spec.clone();
                spec
            }
            Term::Hole(hole) => match expected {
                Some(spec) => {
                    hole.type_spec = Some(spec.clone());
                    Some(spec.clone())
                }
                None => {
                    self.errors.push(SemanticError::TypeCheckingError(
                        TypeError::UntypedHoleInBinding {
                            span: hole.position.clone(),
                        },
                    ));
                    None
                }
            },
            // already reported or checked elsewhere
            Term::Native(_)
            | Term::Data(_)
            | Term::Lambda(_)
            | Term::Placeholder(_)
            | Term::Let(_)
            | Term::Invalid(_)
            | Term::Error(_) => None,
        }
    }

    fn check_app(&mut self, app: &mut App, scope: &mut Scope) -> Option<TypeSpec> {
        let func_type = self.check_term(&mut app.func, scope, None);

        let result = match func_type.map(|t| canonical_spec(&t, self.index)) {
            Some(TypeSpec::Fn(f)) => {
                if f.params.is_empty() {
                    // a nullary function is called with the unit value
                    let unit = unit_type();
                    let arg_type = self.check_expr(&mut app.arg, scope, Some(&unit));
                    if let Some(actual) = &arg_type {
                        if !types_equal(&unit, actual, self.index) {
                            self.errors.push(SemanticError::TypeCheckingError(
                                TypeError::TypeMismatch {
                                    expected: unit,
                                    actual: actual.clone(),
                                    expected_by: head_name(&app.func),
                                    span: app.arg.position.clone(),
                                },
                            ));
                        }
                    }
                    Some((*f.ret).clone())
                } else {
                    let param = f.params[0].clone();
                    let arg_type = self.check_expr(&mut app.arg, scope, Some(&param));
                    if let Some(actual) = &arg_type {
                        if !types_equal(&param, actual, self.index) {
                            self.errors.push(SemanticError::TypeCheckingError(
                                TypeError::TypeMismatch {
                                    expected: param.clone(),
                                    actual: actual.clone(),
                                    expected_by: head_name(&app.func),
                                    span: app.arg.position.clone(),
                                },
                            ));
                        }
                    }

                    if f.params.len() > 1 {
                        // under-saturation: a curried value
                        Some(TypeSpec::Fn(TypeFn {
                            params: f.params[1..].to_vec(),
                            ret: f.ret.clone(),
                            position: Span::Synthetic,
                        }))
                    } else {
                        Some((*f.ret).clone())
                    }
                }
            }
            Some(TypeSpec::Invalid(_)) | None => {
                // still descend for nested reports, but stay silent here
                self.check_expr(&mut app.arg, scope, None);
                None
            }
            Some(other) => {
                self.check_expr(&mut app.arg, scope, None);
                let error = if matches!(*app.func, Term::App(_)) {
                    TypeError::OversaturatedApplication {
                        span: app.position.clone(),
                    }
                } else {
                    TypeError::InvalidApplication {
                        actual: Some(other),
                        span: app.position.clone(),
                    }
                };
                self.errors.push(SemanticError::TypeCheckingError(error));
                None
            }
        };

        if let Some(spec) = &result {
            app.type_spec = Some(spec.clone());
        }
        result
    }

    fn check_cond(
        &mut self,
        cond: &mut Cond,
        scope: &mut Scope,
        expected: Option<&TypeSpec>,
    ) -> Option<TypeSpec> {
        let bool_spec = bool_type();
        let cond_type = self.check_expr(&mut cond.condition, scope, Some(&bool_spec));
        if let Some(actual) = &cond_type {
            if !types_equal(&bool_spec, actual, self.index) {
                self.errors.push(SemanticError::TypeCheckingError(
                    TypeError::TypeMismatch {
                        expected: bool_spec,
                        actual: actual.clone(),
                        expected_by: None,
                        span: cond.condition.position.clone(),
                    },
                ));
            }
        }

        // a hole branch adopts the type of its sibling, so the sibling is
        // checked first
        let then_is_hole = matches!(cond.then_branch.result_terms(), [Term::Hole(_)]);

        let (then_type, else_type) = if then_is_hole {
            let else_type = self.check_expr(&mut cond.else_branch, scope, expected);
            let adopted = else_type.clone().or(expected.cloned());
            let then_type = self.check_expr(&mut cond.then_branch, scope, adopted.as_ref());
            (then_type, else_type)
        } else {
            let then_type = self.check_expr(&mut cond.then_branch, scope, expected);
            let adopted = then_type.clone().or(expected.cloned());
            let else_type = self.check_expr(&mut cond.else_branch, scope, adopted.as_ref());
            (then_type, else_type)
        };

        if let (Some(then_type), Some(else_type)) = (&then_type, &else_type) {
            if !types_equal(then_type, else_type, self.index) {
                self.errors.push(SemanticError::TypeCheckingError(
                    TypeError::ConditionalBranchTypeMismatch {
                        then_type: then_type.clone(),
                        else_type: else_type.clone(),
                        span: cond.position.clone(),
                    },
                ));
                return None;
            }
        }

        let result = then_type.or(else_type);
        if let Some(spec) = &result {
            cond.type_spec = Some(spec.clone());
        }
        result
    }

    fn check_select(&mut self, select: &mut Select, scope: &mut Scope) -> Option<TypeSpec> {
        let target_type = self.check_term(&mut select.target, scope, None)?;

        let canonical = canonical_spec(&target_type, self.index);
        let result = match &canonical {
            TypeSpec::Ref(r) => {
                let target =
                    r.resolved_id.as_deref().and_then(|id| self.index.get(id));
                match target {
                    Some(Resolvable::TypeStruct(ts)) => {
                        match ts.fields.iter().find(|f| f.name == select.field) {
                            Some(field) => {
                                Some(field.type_spec.clone().unwrap_or(field.type_asc.clone()))
                            }
                            None => {
                                self.errors.push(SemanticError::TypeCheckingError(
                                    TypeError::UnknownField {
                                        struct_name: ts.name.clone(),
                                        field: select.field.clone(),
                                        span: select.position.clone(),
                                    },
                                ));
                                None
                            }
                        }
                    }
                    _ => {
                        self.errors.push(SemanticError::TypeCheckingError(
                            TypeError::InvalidSelection {
                                actual: Some(target_type.clone()),
                                field: select.field.clone(),
                                span: select.position.clone(),
                            },
                        ));
                        None
                    }
                }
            }
            TypeSpec::NativeStruct(ns) => {
                match ns.fields.iter().find(|f| f.name == select.field) {
                    Some(field) => Some(field.spec.clone()),
                    None => {
                        self.errors.push(SemanticError::TypeCheckingError(
                            TypeError::UnknownField {
                                struct_name: "@native".to_string(),
                                field: select.field.clone(),
                                span: select.position.clone(),
                            },
                        ));
                        None
                    }
                }
            }
            TypeSpec::Invalid(_) => None,
            _ => {
                self.errors.push(SemanticError::TypeCheckingError(
                    TypeError::InvalidSelection {
                        actual: Some(target_type.clone()),
                        field: select.field.clone(),
                        span: select.position.clone(),
                    },
                ));
                None
            }
        };

        if let Some(spec) = &result {
            select.type_spec = Some(spec.clone());
        }
        result
    }
}

/// The surface name at the head of an application chain, for error
/// attribution.
fn head_name(term: &Term) -> Option<String> {
    match term {
        Term::Ref(r) => Some(r.name.clone()),
        Term::App(app) => head_name(&app.func),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;
    use crate::semantic::{
        DuplicateNameChecker, ExpressionRewriter, IdAssigner, ParsingErrorChecker, RefResolver,
        Simplifier, StdlibInjector, TypeResolver,
    };

    use super::*;

    fn run(input: &str) -> (Module, Vec<SemanticError>) {
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
        (module, errors)
    }

    fn bnd<'a>(module: &'a Module, name: &str) -> &'a Bnd {
        module
            .bindings()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("missing binding {name}"))
    }

    fn type_errors(errors: &[SemanticError]) -> Vec<&TypeError> {
        errors
            .iter()
            .filter_map(|e| match e {
                SemanticError::TypeCheckingError(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_return_type_inference() {
        let (module, errors) = run("fn add(a: Int, b: Int) = a + b;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let add = bnd(&module, "add");
        let Some(TypeSpec::Fn(sig)) = &add.type_spec else {
            panic!("expected a function signature");
        };
        assert_eq!(sig.params.len(), 2);
        assert!(types_equal(&sig.ret, &int_type(), &module.index));
    }

    #[test]
    fn test_main_signature_is_valid() {
        let (module, errors) = run("fn main(): Unit = let s = \"hello\"; println s;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let main = bnd(&module, "main");
        let Some(TypeSpec::Fn(sig)) = &main.type_spec else {
            panic!("expected a function signature");
        };
        assert!(sig.params.is_empty());
        assert!(types_equal(&sig.ret, &unit_type(), &module.index));
    }

    #[test]
    fn test_recursive_function_needs_return_type() {
        let (_, errors) =
            run("fn fact(n: Int) = if n == 0 then 1 else n * fact (n - 1);");

        assert!(type_errors(&errors).iter().any(|e| matches!(
            e,
            TypeError::RecursiveFunctionMissingReturnType { function, .. } if function == "fact"
        )));
    }

    #[test]
    fn test_recursive_function_with_return_type_checks() {
        let (module, errors) =
            run("fn fact(n: Int): Int = if n == 0 then 1 else n * fact (n - 1);");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let fact = bnd(&module, "fact");
        assert!(fact.type_spec.is_some());
    }

    #[test]
    fn test_missing_parameter_type() {
        let (_, errors) = run("fn f(a) = a;");

        assert!(type_errors(&errors)
            .iter()
            .any(|e| matches!(e, TypeError::MissingParameterType { param, .. } if param == "a")));
    }

    #[test]
    fn test_condition_must_be_bool() {
        let (_, errors) = run("fn f(a: Int): Int = if a then 1 else 2;");

        assert!(type_errors(&errors)
            .iter()
            .any(|e| matches!(e, TypeError::TypeMismatch { .. })));
    }

    #[test]
    fn test_branches_must_agree() {
        let (_, errors) = run("fn f(a: Bool): Int = if a then 1 else \"x\";");

        assert!(type_errors(&errors)
            .iter()
            .any(|e| matches!(e, TypeError::ConditionalBranchTypeMismatch { .. })));
    }

    #[test]
    fn test_hole_adopts_sibling_branch_type() {
        let (module, errors) = run("fn f(a: Bool): Int = if a then ??? else 1;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let f = bnd(&module, "f");
        assert!(f.type_spec.is_some());
    }

    #[test]
    fn test_untyped_hole_reports() {
        let (_, errors) = run("let x = ???;");

        assert!(type_errors(&errors)
            .iter()
            .any(|e| matches!(e, TypeError::UntypedHoleInBinding { .. })));
    }

    #[test]
    fn test_argument_type_mismatch_names_the_callee() {
        let (_, errors) = run("fn main(): Unit = println 42;");

        assert!(type_errors(&errors).iter().any(|e| matches!(
            e,
            TypeError::TypeMismatch { expected_by: Some(by), .. } if by == "println"
        )));
    }

    #[test]
    fn test_under_saturation_is_a_curried_value() {
        let (module, errors) =
            run("fn add(a: Int, b: Int): Int = a + b; let inc = add 1;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let inc = bnd(&module, "inc");
        let Some(TypeSpec::Fn(sig)) = &inc.type_spec else {
            panic!("expected a curried function type, got {:?}", inc.type_spec);
        };
        assert_eq!(sig.params.len(), 1);
    }

    #[test]
    fn test_over_saturation_reports() {
        let (_, errors) = run("fn f(a: Int): Int = a; let x = f 1 2;");

        assert!(type_errors(&errors)
            .iter()
            .any(|e| matches!(e, TypeError::OversaturatedApplication { .. })));
    }

    #[test]
    fn test_applying_non_function_reports() {
        let (_, errors) = run("let x = 1 2;");

        assert!(type_errors(&errors)
            .iter()
            .any(|e| matches!(e, TypeError::InvalidApplication { .. })));
    }

    #[test]
    fn test_struct_selection_types() {
        let (module, errors) = run(
            "struct User { name: String, age: Int };\nfn get_name(u: User): String = u.name;",
        );

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let get_name = bnd(&module, "get_name");
        let Some(TypeSpec::Fn(sig)) = &get_name.type_spec else {
            panic!("expected a function signature");
        };
        assert!(types_equal(&sig.ret, &string_type(), &module.index));
    }

    #[test]
    fn test_unknown_field_reports() {
        let (_, errors) = run(
            "struct User { name: String };\nfn f(u: User): String = u.email;",
        );

        assert!(type_errors(&errors).iter().any(|e| matches!(
            e,
            TypeError::UnknownField { struct_name, field, .. }
                if struct_name == "User" && field == "email"
        )));
    }

    #[test]
    fn test_invalid_selection_reports() {
        let (_, errors) = run("fn f(a: Int): Int = a.name;");

        assert!(type_errors(&errors)
            .iter()
            .any(|e| matches!(e, TypeError::InvalidSelection { .. })));
    }

    #[test]
    fn test_undefined_ref_does_not_cascade() {
        let (_, errors) = run("fn main(): Unit = println greet;");

        assert!(errors
            .iter()
            .any(|e| matches!(e, SemanticError::UndefinedRef { .. })));
        assert!(type_errors(&errors).is_empty());
    }

    #[test]
    fn test_invalid_main_signature() {
        let (_, errors) = run("fn main(a: Int): Unit = println \"hi\";");

        assert!(errors
            .iter()
            .any(|e| matches!(e, SemanticError::InvalidMainSignature { .. })));
    }

    #[test]
    fn test_string_struct_field_selection() {
        // the prelude String is itself a struct with a length field
        let (module, errors) = run("fn len(s: String): Int = s.length;");

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let len = bnd(&module, "len");
        assert!(len.type_spec.is_some());
    }

    #[test]
    fn test_heap_type_detection() {
        let (module, errors) = run(
            "struct User { name: String, age: Int };\nstruct Point { x: Int, y: Int };",
        );

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");

        let user = TypeSpec::Ref(TypeRef {
            name: "User".into(),
            resolved_id: Some("test::typestruct::User".into()),
            position: Span::Synthetic,
        });
        let point = TypeSpec::Ref(TypeRef {
            name: "Point".into(),
            resolved_id: Some("test::typestruct::Point".into()),
            position: Span::Synthetic,
        });

        assert!(is_heap_type(&user, &module.index));
        assert!(!is_heap_type(&point, &module.index));
        assert!(is_heap_type(&string_type(), &module.index));
        assert!(!is_heap_type(&int_type(), &module.index));
    }
}
