use crate::lexer::Span;
use crate::parser::ast::{
    App, Arity, Assoc, BindingMeta, BindingOrigin, Bnd, Expr, Lambda, LitUnit, Member, Module,
    Param, Ref, Select, StructField, Term, TypeFn, TypeRef, TypeSpec, TypeStruct,
};
use crate::typechecker::{heap_type_name, is_heap_type, unit_type};

use super::{Phase, SemanticError};

/// Synthesizes `__free_T` and `__clone_T` for every user-defined struct
/// that owns heap data. The generated functions are ordinary bindings:
/// they are typed here, indexed by the reindexer and rewritten by the
/// ownership analyzer like any user code.
///
/// `__free_T` consumes its argument and tears it down field by field;
/// `__clone_T` borrows its argument and rebuilds it through the struct
/// constructor, cloning heap fields and copying the rest.
pub struct MemoryFunctionGenerator;

impl Phase for MemoryFunctionGenerator {
    fn name(&self) -> &'static str {
        "MemoryFunctionGenerator"
    }

    fn run(&self, module: Module, _errors: &mut Vec<SemanticError>) -> Module {
        let Module {
            name,
            visibility,
            mut members,
            doc,
            source_path,
            index,
        } = module;

        let heap_structs: Vec<TypeStruct> = members
            .iter()
            .filter_map(|member| match member {
                Member::TypeStruct(ts) => {
                    let id = ts.id.as_deref()?;
                    if id.starts_with("stdlib::") {
                        return None;
                    }
                    let spec = TypeSpec::Ref(TypeRef {
                        name: ts.name.clone(),
                        resolved_id: Some(id.to_string()),
                        position: Span::Synthetic,
                    });
                    is_heap_type(&spec, &index).then(|| ts.clone())
                }
                _ => None,
            })
            .collect();

        for ts in &heap_structs {
            log::debug!("synthesizing memory functions for struct {}", ts.name);
            let generator = Generator {
                module_name: &name,
                index: &index,
                heap_structs: &heap_structs,
            };
            members.push(Member::Bnd(generator.free_fn(ts)));
            members.push(Member::Bnd(generator.clone_fn(ts)));
        }

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

struct Generator<'a> {
    module_name: &'a str,
    index: &'a crate::parser::ast::ResolvablesIndex,
    heap_structs: &'a [TypeStruct],
}

impl Generator<'_> {
    fn struct_spec(&self, ts: &TypeStruct) -> TypeSpec {
        TypeSpec::Ref(TypeRef {
            name: ts.name.clone(),
            resolved_id: ts.id.clone(),
            position: Span::Synthetic,
        })
    }

    fn field_spec(&self, field: &StructField) -> TypeSpec {
        field.type_spec.clone().unwrap_or(field.type_asc.clone())
    }

    fn field_is_heap(&self, field: &StructField) -> bool {
        is_heap_type(&self.field_spec(field), self.index)
    }

    /// The id of the `__free_F`/`__clone_F` hook for a heap type name:
    /// the stdlib is searched first, then the module's own synthesized
    /// functions.
    fn hook_id(&self, prefix: &str, type_name: &str) -> Option<String> {
        let stdlib = format!("stdlib::{prefix}{type_name}");
        if self.index.contains(&stdlib) {
            return Some(stdlib);
        }

        self.heap_structs
            .iter()
            .any(|ts| ts.name == type_name)
            .then(|| format!("{}::bnd::{prefix}{type_name}", self.module_name))
    }

    fn typed_ref(&self, name: &str, id: String, spec: TypeSpec) -> Term {
        Term::Ref(Ref {
            name: name.to_string(),
            resolved_id: Some(id),
            candidate_ids: vec![],
            consume: false,
            type_spec: Some(spec),
            position: Span::Synthetic,
        })
    }

    fn select_field(&self, param: &Param, field: &StructField) -> Term {
        Term::Select(Select {
            target: Box::new(Term::Ref(Ref {
                name: param.name.clone(),
                resolved_id: param.id.clone(),
                candidate_ids: vec![],
                consume: false,
                type_spec: param.type_spec.clone(),
                position: Span::Synthetic,
            })),
            field: field.name.clone(),
            type_spec: Some(self.field_spec(field)),
            position: Span::Synthetic,
        })
    }

    fn app(&self, func: Term, arg: Term, result: TypeSpec) -> Term {
        Term::App(App {
            func: Box::new(func),
            arg: Box::new(Expr::single(arg)),
            type_spec: Some(result),
            position: Span::Synthetic,
        })
    }

    fn value_param(&self, owner_id: &str, ts: &TypeStruct, consuming: bool) -> Param {
        Param {
            id: Some(format!("{owner_id}::param::value")),
            name: "value".to_string(),
            type_asc: Some(self.struct_spec(ts)),
            type_spec: Some(self.struct_spec(ts)),
            consuming,
            position: Span::Synthetic,
        }
    }

    fn mem_bnd(
        &self,
        id: String,
        fn_name: String,
        param: Param,
        ret: TypeSpec,
        body: Expr,
    ) -> Bnd {
        let sig = TypeSpec::Fn(TypeFn {
            params: vec![param.type_spec.clone().expect("generated param is typed")],
            ret: Box::new(ret.clone()),
            position: Span::Synthetic,
        });

        Bnd {
            id: Some(id),
            name: fn_name.clone(),
            meta: Some(BindingMeta {
                origin: BindingOrigin::Function,
                arity: Arity::Unary,
                precedence: crate::parser::ast::DEFAULT_PRECEDENCE,
                assoc: Assoc::Left,
                original_name: fn_name.clone(),
                mangled_name: fn_name,
            }),
            type_asc: None,
            type_spec: Some(sig.clone()),
            value: Expr::single(Term::Lambda(Lambda {
                params: vec![param],
                ret_asc: Some(ret),
                type_spec: Some(sig),
                tail_recursive: false,
                position: Span::Synthetic,
                body: Box::new(body),
            })),
            doc: None,
            id_error: None,
            position: Span::Synthetic,
        }
    }

    /// `__free_T(~value: T): Unit` applies the matching `__free_F` to
    /// every heap field of `value`, in declaration order, then yields
    /// unit.
    fn free_fn(&self, ts: &TypeStruct) -> Bnd {
        let fn_name = format!("__free_{}", ts.name);
        let id = format!("{}::bnd::{fn_name}", self.module_name);
        let param = self.value_param(&id, ts, true);

        let mut terms: Vec<Term> = vec![];
        for field in &ts.fields {
            if !self.field_is_heap(field) {
                continue;
            }
            let Some(type_name) = heap_type_name(&self.field_spec(field), self.index) else {
                continue;
            };
            let Some(hook) = self.hook_id("__free_", &type_name) else {
                log::debug!("no free hook for field {}.{}", ts.name, field.name);
                continue;
            };

            let free_ref = self.typed_ref(
                &format!("__free_{type_name}"),
                hook,
                TypeSpec::Fn(TypeFn {
                    params: vec![self.field_spec(field)],
                    ret: Box::new(unit_type()),
                    position: Span::Synthetic,
                }),
            );
            let call = self.app(free_ref, self.select_field(&param, field), unit_type());

            terms.push(Term::Let(crate::parser::ast::LetBind {
                id: Some(format!("{id}::let::_{}", field.name)),
                name: "_".to_string(),
                type_asc: None,
                type_spec: Some(unit_type()),
                value: Box::new(Expr::single(call)),
                origin: crate::parser::ast::LetOrigin::User,
                position: Span::Synthetic,
            }));
        }

        terms.push(Term::Unit(LitUnit {
            position: Span::Synthetic,
        }));

        let body = Expr {
            terms,
            type_spec: Some(unit_type()),
            position: Span::Synthetic,
        };

        self.mem_bnd(id, fn_name, param, unit_type(), body)
    }

    /// `__clone_T(value: T): T` applies the struct constructor to a deep
    /// copy of `value`: heap fields via their `__clone_F`, non-heap
    /// fields by direct access.
    fn clone_fn(&self, ts: &TypeStruct) -> Bnd {
        let fn_name = format!("__clone_{}", ts.name);
        let id = format!("{}::bnd::{fn_name}", self.module_name);
        let param = self.value_param(&id, ts, false);

        let ctor_id = ts
            .id
            .as_deref()
            .map(|_| format!("{}::bnd::{}", self.module_name, ts.name))
            .expect("generated structs carry ids");
        let ctor_sig = TypeSpec::Fn(TypeFn {
            params: ts.fields.iter().map(|f| self.field_spec(f)).collect(),
            ret: Box::new(self.struct_spec(ts)),
            position: Span::Synthetic,
        });

        let mut call = self.typed_ref(&ts.name, ctor_id, ctor_sig);
        let field_count = ts.fields.len();

        for (i, field) in ts.fields.iter().enumerate() {
            let arg = if self.field_is_heap(field) {
                match heap_type_name(&self.field_spec(field), self.index)
                    .and_then(|n| self.hook_id("__clone_", &n).map(|id| (n, id)))
                {
                    Some((type_name, hook)) => {
                        let clone_ref = self.typed_ref(
                            &format!("__clone_{type_name}"),
                            hook,
                            TypeSpec::Fn(TypeFn {
                                params: vec![self.field_spec(field)],
                                ret: Box::new(self.field_spec(field)),
                                position: Span::Synthetic,
                            }),
                        );
                        self.app(clone_ref, self.select_field(&param, field), self.field_spec(field))
                    }
                    None => self.select_field(&param, field),
                }
            } else {
                self.select_field(&param, field)
            };

            let remaining: Vec<TypeSpec> = ts.fields[i + 1..]
                .iter()
                .map(|f| self.field_spec(f))
                .collect();
            let result = if i + 1 == field_count {
                self.struct_spec(ts)
            } else {
                TypeSpec::Fn(TypeFn {
                    params: remaining,
                    ret: Box::new(self.struct_spec(ts)),
                    position: Span::Synthetic,
                })
            };
            call = self.app(call, arg, result);
        }

        let body = Expr {
            type_spec: Some(self.struct_spec(ts)),
            position: Span::Synthetic,
            terms: vec![call],
        };

        self.mem_bnd(id, fn_name, param, self.struct_spec(ts), body)
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;
    use crate::semantic::{
        DuplicateNameChecker, ExpressionRewriter, IdAssigner, ParsingErrorChecker, RefResolver,
        ResolvablesReindexer, Simplifier, StdlibInjector, TypeResolver,
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
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let module = MemoryFunctionGenerator.run(module, &mut errors);
        ResolvablesReindexer.run(module, &mut errors)
    }

    fn find<'a>(module: &'a Module, name: &str) -> Option<&'a Bnd> {
        module.bindings().find(|b| b.name == name)
    }

    #[test]
    fn test_heap_struct_gets_both_functions() {
        let module = run("struct User { name: String, age: Int };");

        let free = find(&module, "__free_User").expect("missing __free_User");
        assert_eq!(free.id.as_deref(), Some("test::bnd::__free_User"));
        assert!(free.position.is_synthetic());

        let clone = find(&module, "__clone_User").expect("missing __clone_User");
        let lambda = clone.lambda().expect("clone lambda missing");
        assert!(!lambda.params[0].consuming);

        let free_lambda = free.lambda().expect("free lambda missing");
        assert!(free_lambda.params[0].consuming);
    }

    #[test]
    fn test_non_heap_struct_is_skipped() {
        let module = run("struct Point { x: Int, y: Int };");

        assert!(find(&module, "__free_Point").is_none());
        assert!(find(&module, "__clone_Point").is_none());
    }

    #[test]
    fn test_free_body_frees_only_heap_fields() {
        let module = run("struct User { name: String, age: Int };");

        let free = find(&module, "__free_User").expect("missing __free_User");
        let body = &free.lambda().expect("free lambda missing").body;

        // one let per heap field (only `name`), then the unit result
        let lets: Vec<_> = body
            .terms
            .iter()
            .filter(|t| matches!(t, Term::Let(_)))
            .collect();
        assert_eq!(lets.len(), 1);
        assert!(matches!(body.terms.last(), Some(Term::Unit(_))));

        let Term::Let(bind) = lets[0] else {
            unreachable!()
        };
        let Term::App(app) = &bind.value.terms[0] else {
            panic!("expected a free call");
        };
        let Term::Ref(free_ref) = &*app.func else {
            panic!("expected a ref to the free hook");
        };
        assert_eq!(free_ref.resolved_id.as_deref(), Some("stdlib::__free_String"));
    }

    #[test]
    fn test_clone_body_applies_constructor() {
        let module = run("struct User { name: String, age: Int };");

        let clone = find(&module, "__clone_User").expect("missing __clone_User");
        let body = &clone.lambda().expect("clone lambda missing").body;

        // User (__clone_String value.name) value.age
        let Term::App(outer) = &body.terms[0] else {
            panic!("expected a constructor application");
        };
        let Term::App(inner) = &*outer.func else {
            panic!("expected a curried application");
        };
        let Term::Ref(ctor) = &*inner.func else {
            panic!("expected the constructor ref");
        };
        assert_eq!(ctor.resolved_id.as_deref(), Some("test::bnd::User"));

        // first argument is a clone call, second a direct field access
        assert!(matches!(inner.arg.terms[0], Term::App(_)));
        assert!(matches!(outer.arg.terms[0], Term::Select(_)));
    }

    #[test]
    fn test_nested_heap_structs_reference_each_other() {
        let module = run(
            "struct Inner { s: String };\nstruct Outer { i: Inner, n: Int };",
        );

        let free = find(&module, "__free_Outer").expect("missing __free_Outer");
        let body = &free.lambda().expect("free lambda missing").body;

        let Term::Let(bind) = &body.terms[0] else {
            panic!("expected a free call");
        };
        let Term::App(app) = &bind.value.terms[0] else {
            panic!("expected a free call");
        };
        let Term::Ref(free_ref) = &*app.func else {
            panic!("expected a ref");
        };
        assert_eq!(
            free_ref.resolved_id.as_deref(),
            Some("test::bnd::__free_Inner")
        );
    }

    #[test]
    fn test_generated_functions_are_indexed_after_reindex() {
        let module = run("struct User { name: String };");

        assert!(module.index.contains("test::bnd::__free_User"));
        assert!(module.index.contains("test::bnd::__clone_User"));
        assert!(module.index.contains("test::bnd::__free_User::param::value"));
    }
}
