use crate::lexer::Span;
use crate::parser::ast::{
    mangle_operator, Arity, Assoc, BindingMeta, BindingOrigin, Bnd, Expr, Member, MemEffect,
    Module, NativeImpl, NativePointer, NativePrimitive, Param, StructField, Term, TypeDef,
    TypeRef, TypeSpec, TypeStruct, Lambda,
};

use super::{Phase, SemanticError};

/// Prefix of every prelude stable id.
pub const STDLIB_PREFIX: &str = "stdlib";

pub fn stdlib_id(name: &str) -> String {
    format!("{STDLIB_PREFIX}::{name}")
}

/// Injects the prelude ahead of the user members: native primitive types,
/// the `String` struct, the operator table and the runtime functions.
/// Every entry carries a preassigned `stdlib::<name>` id and a synthetic
/// span, so the id assigner and error rendering leave them alone.
pub struct StdlibInjector;

impl Phase for StdlibInjector {
    fn name(&self) -> &'static str {
        "StdlibInjector"
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

        let mut injected = prelude_members();
        log::debug!("injecting {} prelude members", injected.len());
        injected.extend(members);

        Module {
            name,
            visibility,
            members: injected,
            doc,
            source_path,
            index,
        }
    }
}

fn ty(name: &str) -> TypeSpec {
    TypeSpec::Ref(TypeRef {
        name: name.to_string(),
        resolved_id: None,
        position: Span::Synthetic,
    })
}

fn native_type(name: &str, llvm_type: &str) -> Member {
    Member::TypeDef(TypeDef {
        id: Some(stdlib_id(name)),
        name: name.to_string(),
        spec: TypeSpec::NativePrimitive(NativePrimitive {
            llvm_type: llvm_type.to_string(),
            mem_effect: None,
            position: Span::Synthetic,
        }),
        doc: None,
        position: Span::Synthetic,
    })
}

fn native_heap_pointer(name: &str, llvm_type: &str) -> Member {
    Member::TypeDef(TypeDef {
        id: Some(stdlib_id(name)),
        name: name.to_string(),
        spec: TypeSpec::NativePointer(NativePointer {
            llvm_type: llvm_type.to_string(),
            mem_effect: Some(MemEffect::Alloc),
            position: Span::Synthetic,
        }),
        doc: None,
        position: Span::Synthetic,
    })
}

fn alias(name: &str, target: &str) -> Member {
    Member::TypeAlias(crate::parser::ast::TypeAlias {
        id: Some(stdlib_id(name)),
        name: name.to_string(),
        aliased: ty(target),
        type_spec: None,
        doc: None,
        position: Span::Synthetic,
    })
}

fn string_struct() -> Member {
    let field = |field_name: &str, ty_name: &str| StructField {
        id: Some(format!("{STDLIB_PREFIX}::typestruct::String::{field_name}")),
        name: field_name.to_string(),
        type_asc: ty(ty_name),
        type_spec: None,
        position: Span::Synthetic,
    };

    Member::TypeStruct(TypeStruct {
        id: Some(stdlib_id("String")),
        name: "String".to_string(),
        fields: vec![field("length", "Int64"), field("data", "CharPtr")],
        doc: None,
        position: Span::Synthetic,
    })
}

fn param(name: &str, ty_name: &str) -> Param {
    Param {
        id: None,
        name: name.to_string(),
        type_asc: Some(ty(ty_name)),
        type_spec: None,
        consuming: false,
        position: Span::Synthetic,
    }
}

fn consuming_param(name: &str, ty_name: &str) -> Param {
    Param {
        consuming: true,
        ..param(name, ty_name)
    }
}

fn native_body(effect: Option<MemEffect>, template: Option<&str>) -> Expr {
    Expr::single(Term::Native(NativeImpl {
        template: template.map(str::to_string),
        mem_effect: effect,
        position: Span::Synthetic,
    }))
}

fn native_fn(
    name: &str,
    params: Vec<Param>,
    ret: &str,
    effect: Option<MemEffect>,
    template: Option<&str>,
) -> Member {
    let arity = Arity::of(params.len());

    Member::Bnd(Bnd {
        id: Some(stdlib_id(name)),
        name: name.to_string(),
        meta: Some(BindingMeta {
            origin: BindingOrigin::Function,
            arity,
            precedence: crate::parser::ast::DEFAULT_PRECEDENCE,
            assoc: Assoc::Left,
            original_name: name.to_string(),
            mangled_name: name.to_string(),
        }),
        type_asc: None,
        type_spec: None,
        value: Expr::single(Term::Lambda(Lambda {
            params,
            ret_asc: Some(ty(ret)),
            type_spec: None,
            tail_recursive: false,
            position: Span::Synthetic,
            body: Box::new(native_body(effect, template)),
        })),
        doc: None,
        id_error: None,
        position: Span::Synthetic,
    })
}

#[allow(clippy::too_many_arguments)]
fn native_op(
    symbol: &str,
    params: Vec<Param>,
    ret: &str,
    precedence: u32,
    assoc: Assoc,
    effect: Option<MemEffect>,
    template: Option<&str>,
) -> Member {
    let arity = Arity::of(params.len());
    let mangled = mangle_operator(symbol, arity);

    Member::Bnd(Bnd {
        id: Some(stdlib_id(&mangled)),
        name: mangled.clone(),
        meta: Some(BindingMeta {
            origin: BindingOrigin::Operator,
            arity,
            precedence,
            assoc,
            original_name: symbol.to_string(),
            mangled_name: mangled,
        }),
        type_asc: None,
        type_spec: None,
        value: Expr::single(Term::Lambda(Lambda {
            params,
            ret_asc: Some(ty(ret)),
            type_spec: None,
            tail_recursive: false,
            position: Span::Synthetic,
            body: Box::new(native_body(effect, template)),
        })),
        doc: None,
        id_error: None,
        position: Span::Synthetic,
    })
}

fn int_binop(symbol: &str, precedence: u32, instruction: &str) -> Member {
    native_op(
        symbol,
        vec![param("a", "Int"), param("b", "Int")],
        "Int",
        precedence,
        Assoc::Left,
        None,
        Some(&format!("%result = {instruction} i64 %operand1, %operand2")),
    )
}

fn float_binop(symbol: &str, precedence: u32, instruction: &str) -> Member {
    native_op(
        symbol,
        vec![param("a", "Double"), param("b", "Double")],
        "Double",
        precedence,
        Assoc::Left,
        None,
        Some(&format!(
            "%result = {instruction} double %operand1, %operand2"
        )),
    )
}

fn int_cmp(symbol: &str, condition: &str) -> Member {
    native_op(
        symbol,
        vec![param("a", "Int"), param("b", "Int")],
        "Bool",
        50,
        Assoc::Left,
        None,
        Some(&format!(
            "%result = icmp {condition} i64 %operand1, %operand2"
        )),
    )
}

fn array_ops(prefix: &str, array_ty: &str, element_ty: &str) -> Vec<Member> {
    vec![
        native_fn(
            &format!("{prefix}_new"),
            vec![param("size", "Int")],
            array_ty,
            Some(MemEffect::Alloc),
            None,
        ),
        native_fn(
            &format!("{prefix}_get"),
            vec![param("a", array_ty), param("i", "Int")],
            element_ty,
            None,
            None,
        ),
        native_fn(
            &format!("{prefix}_set"),
            vec![param("a", array_ty), param("i", "Int"), param("v", element_ty)],
            "Unit",
            None,
            None,
        ),
        native_fn(
            &format!("{prefix}_len"),
            vec![param("a", array_ty)],
            "Int",
            None,
            None,
        ),
        native_fn(
            &format!("unsafe_{prefix}_get"),
            vec![param("a", array_ty), param("i", "Int")],
            element_ty,
            None,
            None,
        ),
        native_fn(
            &format!("unsafe_{prefix}_set"),
            vec![param("a", array_ty), param("i", "Int"), param("v", element_ty)],
            "Unit",
            None,
            None,
        ),
    ]
}

fn memory_hooks(ty_name: &str, with_clone: bool) -> Vec<Member> {
    let mut hooks = vec![native_fn(
        &format!("__free_{ty_name}"),
        vec![consuming_param("value", ty_name)],
        "Unit",
        None,
        None,
    )];

    if with_clone {
        hooks.push(native_fn(
            &format!("__clone_{ty_name}"),
            vec![param("value", ty_name)],
            ty_name,
            Some(MemEffect::Alloc),
            None,
        ));
    }

    hooks
}

/// The full prelude, in injection order: types first, then operators,
/// then functions, so that user code can reference any of them and the
/// reference resolver finds everything through the same index.
pub fn prelude_members() -> Vec<Member> {
    let mut members = vec![
        native_type("Int8", "i8"),
        native_type("Int16", "i16"),
        native_type("Int32", "i32"),
        native_type("Int64", "i64"),
        native_type("Float", "float"),
        native_type("Double", "double"),
        native_type("Bool", "i1"),
        native_type("Char", "i8"),
        native_type("SizeT", "i64"),
        native_type("Unit", "void"),
        native_heap_pointer("CharPtr", "i8"),
        alias("Int", "Int64"),
        alias("Byte", "Int8"),
        alias("Word", "Int8"),
        string_struct(),
        native_heap_pointer("IntArray", "i8"),
        native_heap_pointer("StringArray", "i8"),
        native_heap_pointer("FloatArray", "i8"),
        native_heap_pointer("Buffer", "i8"),
    ];

    // arithmetic
    members.push(int_binop("+", 60, "add"));
    members.push(int_binop("-", 60, "sub"));
    members.push(int_binop("*", 80, "mul"));
    members.push(int_binop("/", 80, "sdiv"));
    members.push(int_binop("%", 80, "srem"));
    members.push(float_binop("+.", 60, "fadd"));
    members.push(float_binop("-.", 60, "fsub"));
    members.push(float_binop("*.", 80, "fmul"));
    members.push(float_binop("/.", 80, "fdiv"));

    // comparisons
    members.push(int_cmp("==", "eq"));
    members.push(int_cmp("!=", "ne"));
    members.push(int_cmp("<", "slt"));
    members.push(int_cmp(">", "sgt"));
    members.push(int_cmp("<=", "sle"));
    members.push(int_cmp(">=", "sge"));

    // shifts
    members.push(int_binop("<<", 55, "shl"));
    members.push(int_binop(">>", 55, "ashr"));

    // logical
    members.push(native_op(
        "and",
        vec![param("a", "Bool"), param("b", "Bool")],
        "Bool",
        40,
        Assoc::Left,
        None,
        Some("%result = and i1 %operand1, %operand2"),
    ));
    members.push(native_op(
        "or",
        vec![param("a", "Bool"), param("b", "Bool")],
        "Bool",
        30,
        Assoc::Left,
        None,
        Some("%result = or i1 %operand1, %operand2"),
    ));
    members.push(native_op(
        "not",
        vec![param("a", "Bool")],
        "Bool",
        95,
        Assoc::Right,
        None,
        Some("%result = xor i1 %operand, true"),
    ));

    // unary sign operators
    members.push(native_op(
        "-",
        vec![param("a", "Int")],
        "Int",
        95,
        Assoc::Right,
        None,
        Some("%result = sub i64 0, %operand"),
    ));
    members.push(native_op(
        "+",
        vec![param("a", "Int")],
        "Int",
        95,
        Assoc::Right,
        None,
        Some("%result = add i64 0, %operand"),
    ));

    // string concatenation
    members.push(native_op(
        "++",
        vec![param("a", "String"), param("b", "String")],
        "String",
        61,
        Assoc::Right,
        Some(MemEffect::Alloc),
        None,
    ));

    // console I/O
    members.push(native_fn(
        "print",
        vec![param("s", "String")],
        "Unit",
        None,
        None,
    ));
    members.push(native_fn(
        "println",
        vec![param("s", "String")],
        "Unit",
        None,
        None,
    ));
    members.push(native_fn(
        "readline",
        vec![],
        "String",
        Some(MemEffect::Alloc),
        None,
    ));
    members.push(native_fn("mml_sys_flush", vec![], "Unit", None, None));

    // conversions and math
    members.push(native_fn(
        "concat",
        vec![param("a", "String"), param("b", "String")],
        "String",
        Some(MemEffect::Alloc),
        None,
    ));
    members.push(native_fn(
        "to_string",
        vec![param("n", "Int")],
        "String",
        Some(MemEffect::Alloc),
        None,
    ));
    members.push(native_fn(
        "str_to_int",
        vec![param("s", "String")],
        "Int",
        None,
        None,
    ));
    members.push(native_fn(
        "int_to_float",
        vec![param("n", "Int")],
        "Double",
        None,
        Some("%result = sitofp i64 %operand to double"),
    ));
    members.push(native_fn(
        "float_to_int",
        vec![param("f", "Double")],
        "Int",
        None,
        Some("%result = fptosi double %operand to i64"),
    ));
    members.push(native_fn(
        "sqrt",
        vec![param("f", "Double")],
        "Double",
        None,
        Some("%result = call double @llvm.sqrt.f64(double %operand)"),
    ));
    members.push(native_fn(
        "fabs",
        vec![param("f", "Double")],
        "Double",
        None,
        Some("%result = call double @llvm.fabs.f64(double %operand)"),
    ));

    // buffered I/O
    members.push(native_fn(
        "mkBuffer",
        vec![param("size", "Int")],
        "Buffer",
        Some(MemEffect::Alloc),
        None,
    ));
    members.push(native_fn(
        "buffer_write",
        vec![param("b", "Buffer"), param("s", "String")],
        "Unit",
        None,
        None,
    ));
    members.push(native_fn(
        "flush",
        vec![param("b", "Buffer")],
        "Unit",
        None,
        None,
    ));

    // file I/O
    members.push(native_fn(
        "open_file_read",
        vec![param("path", "String")],
        "Int",
        None,
        None,
    ));
    members.push(native_fn(
        "open_file_write",
        vec![param("path", "String")],
        "Int",
        None,
        None,
    ));
    members.push(native_fn(
        "close_file",
        vec![param("fd", "Int")],
        "Unit",
        None,
        None,
    ));
    members.push(native_fn(
        "read_line_fd",
        vec![param("fd", "Int")],
        "String",
        Some(MemEffect::Alloc),
        None,
    ));

    // arrays
    members.extend(array_ops("ar_int", "IntArray", "Int"));
    members.extend(array_ops("ar_str", "StringArray", "String"));
    members.extend(array_ops("ar_float", "FloatArray", "Double"));

    // memory runtime hooks
    members.extend(memory_hooks("String", true));
    members.extend(memory_hooks("IntArray", true));
    members.extend(memory_hooks("StringArray", true));
    members.extend(memory_hooks("FloatArray", true));
    members.extend(memory_hooks("Buffer", false));

    members
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_ids_are_stdlib_prefixed() {
        for member in prelude_members() {
            let id = member.stable_id().expect("prelude member without id");
            assert!(id.starts_with("stdlib::"), "unexpected id {id}");
        }
    }

    #[test]
    fn test_prelude_has_no_duplicate_ids() {
        let members = prelude_members();
        let mut ids: Vec<_> = members
            .iter()
            .filter_map(|m| m.stable_id().map(str::to_string))
            .collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn test_operator_table_shape() {
        let members = prelude_members();

        let find = |mangled: &str| {
            members
                .iter()
                .find_map(|m| match m {
                    Member::Bnd(bnd) if bnd.name == mangled => Some(bnd.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| panic!("missing operator {mangled}"))
        };

        let plus = find("op.plus.2");
        let meta = plus.meta.expect("operator meta missing");
        assert_eq!(meta.precedence, 60);
        assert_eq!(meta.assoc, Assoc::Left);

        let concat = find("op.plusplus.2");
        let meta = concat.meta.expect("operator meta missing");
        assert_eq!(meta.precedence, 61);
        assert_eq!(meta.assoc, Assoc::Right);

        // unary and binary minus coexist
        find("op.minus.1");
        find("op.minus.2");
    }

    #[test]
    fn test_allocating_entries_carry_effect() {
        let members = prelude_members();

        for name in ["readline", "concat", "to_string", "mkBuffer"] {
            let bnd = members
                .iter()
                .find_map(|m| match m {
                    Member::Bnd(bnd) if bnd.name == name => Some(bnd),
                    _ => None,
                })
                .unwrap_or_else(|| panic!("missing {name}"));

            let lambda = bnd.lambda().expect("native lambda missing");
            let Term::Native(native) = &lambda.body.terms[0] else {
                panic!("expected a native body for {name}");
            };
            assert_eq!(native.mem_effect, Some(MemEffect::Alloc));
        }
    }

    #[test]
    fn test_injector_prepends() {
        let module = Module::new("m", vec![]);
        let module = StdlibInjector.run(module, &mut vec![]);

        assert!(!module.members.is_empty());
        assert!(matches!(&module.members[0], Member::TypeDef(_)));
    }
}
