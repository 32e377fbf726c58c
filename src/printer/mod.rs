//! # Printer
//!
//! Renders a module back to surface syntax. On a freshly parsed module
//! the output re-parses to a structurally equal AST (spans aside), which
//! the round-trip tests rely on; on a fully processed module the output
//! is a readable approximation: rewritten applications print in prefix
//! form, since their operator shape lives in the binding metadata, not
//! the tree.

use crate::parser::ast::{
    Assoc, BindingMeta, BindingOrigin, Bnd, Expr, Member, MemEffect, Module, NativeImpl, Term,
    TypeAlias, TypeDef, TypeSpec, TypeStruct,
};

/// Render the module's members. Synthetic members (the injected prelude,
/// generated constructors and memory functions) are skipped unless asked
/// for.
pub fn print_module(module: &Module, include_synthetic: bool) -> String {
    let mut rendered = vec![];

    for member in &module.members {
        if member.position().is_synthetic() && !include_synthetic {
            continue;
        }
        rendered.push(print_member(member));
    }

    let mut output = rendered.join("\n\n");
    if !output.is_empty() {
        output.push('\n');
    }
    output
}

fn print_member(member: &Member) -> String {
    match member {
        Member::Bnd(bnd) => print_bnd(bnd),
        Member::TypeDef(def) => print_type_def(def),
        Member::TypeAlias(alias) => print_type_alias(alias),
        Member::TypeStruct(ts) => print_struct(ts),
        Member::MemberError(e) => e.raw.clone(),
        Member::Duplicate(dup) => print_member(&dup.original),
        Member::Invalid(invalid) => print_member(&invalid.original),
    }
}

fn doc_prefix(doc: &Option<String>) -> String {
    match doc {
        Some(doc) => format!("/** {doc} */\n"),
        None => String::new(),
    }
}

fn print_bnd(bnd: &Bnd) -> String {
    let doc = doc_prefix(&bnd.doc);

    match (&bnd.meta, bnd.lambda()) {
        (Some(meta), Some(lambda)) => {
            let params = lambda
                .params
                .iter()
                .map(|p| {
                    let tilde = if p.consuming { "~" } else { "" };
                    match &p.type_asc {
                        Some(spec) => format!("{tilde}{}: {}", p.name, print_type(spec)),
                        None => format!("{tilde}{}", p.name),
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");

            let ret = lambda
                .ret_asc
                .as_ref()
                .map(|spec| format!(": {}", print_type(spec)))
                .unwrap_or_default();

            let body = print_expr(&lambda.body);

            match meta.origin {
                BindingOrigin::Function => {
                    format!("{doc}fn {}({params}){ret} =\n  {body}\n;", meta.original_name)
                }
                BindingOrigin::Operator => {
                    let fixity = print_fixity(meta);
                    format!(
                        "{doc}op {}({params}){ret} {fixity} =\n  {body}\n;",
                        meta.original_name
                    )
                }
            }
        }
        _ => {
            let asc = bnd
                .type_asc
                .as_ref()
                .map(|spec| format!(": {}", print_type(spec)))
                .unwrap_or_default();
            format!("{doc}let {}{asc} = {};", bnd.name, print_expr(&bnd.value))
        }
    }
}

fn print_fixity(meta: &BindingMeta) -> String {
    let assoc = match meta.assoc {
        Assoc::Left => "left",
        Assoc::Right => "right",
        Assoc::None => "none",
    };
    format!("{} {assoc}", meta.precedence)
}

fn print_type_def(def: &TypeDef) -> String {
    format!(
        "{}type {} = {};",
        doc_prefix(&def.doc),
        def.name,
        print_type(&def.spec)
    )
}

fn print_type_alias(alias: &TypeAlias) -> String {
    format!(
        "{}type {} = {};",
        doc_prefix(&alias.doc),
        alias.name,
        print_type(&alias.aliased)
    )
}

fn print_struct(ts: &TypeStruct) -> String {
    let fields = ts
        .fields
        .iter()
        .map(|f| format!("{}: {}", f.name, print_type(&f.type_asc)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "{}struct {} {{ {fields} }};",
        doc_prefix(&ts.doc),
        ts.name
    )
}

pub fn print_expr(expr: &Expr) -> String {
    expr.terms
        .iter()
        .map(print_term)
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_term(term: &Term) -> String {
    match term {
        Term::Expr(inner) => format!("({})", print_expr(inner)),
        Term::Group(group) => format!("({})", print_expr(&group.inner)),
        Term::Cond(cond) => print_cond(cond, "if"),
        Term::App(app) => {
            let func = print_term(&app.func);
            let arg = print_arg(&app.arg);
            format!("{func} {arg}")
        }
        Term::Lambda(lambda) => print_expr(&lambda.body),
        Term::Ref(r) => {
            if r.consume {
                format!("~{}", r.name)
            } else {
                r.name.clone()
            }
        }
        Term::Select(select) => format!("{}.{}", print_term(&select.target), select.field),
        Term::Int(lit) => lit.value.to_string(),
        Term::Float(lit) => {
            if lit.value.fract() == 0.0 {
                format!("{:.1}", lit.value)
            } else {
                lit.value.to_string()
            }
        }
        Term::Str(lit) => format!("\"{}\"", escape(&lit.value)),
        Term::Bool(lit) => lit.value.to_string(),
        Term::Unit(_) => "()".to_string(),
        Term::Tuple(tuple) => {
            let elements = tuple
                .elements
                .iter()
                .map(print_expr)
                .collect::<Vec<_>>()
                .join(", ");
            format!("({elements})")
        }
        Term::Placeholder(_) => "_".to_string(),
        Term::Hole(_) => "???".to_string(),
        Term::Native(native) => print_native(native),
        Term::Data(data) => format!("(/* constructor of {} */)", data.struct_name),
        Term::Let(bind) => {
            let asc = bind
                .type_asc
                .as_ref()
                .map(|spec| format!(": {}", print_type(spec)))
                .unwrap_or_default();
            format!("let {}{asc} = {};", bind.name, print_expr(&bind.value))
        }
        Term::Invalid(invalid) => print_term(&invalid.original),
        Term::Error(e) => e.raw.clone(),
    }
}

/// An application argument needs parentheses when it is itself compound.
fn print_arg(arg: &Expr) -> String {
    if arg.terms.len() == 1 {
        match &arg.terms[0] {
            Term::App(_) | Term::Cond(_) | Term::Let(_) => format!("({})", print_expr(arg)),
            single => print_term(single),
        }
    } else {
        format!("({})", print_expr(arg))
    }
}

/// Conditionals print their nested else-conditionals as `elif` chains,
/// mirroring how the parser folded them.
fn print_cond(cond: &crate::parser::ast::Cond, keyword: &str) -> String {
    let condition = print_expr(&cond.condition);
    let then_branch = print_expr(&cond.then_branch);

    let else_part = match cond.else_branch.terms.as_slice() {
        [Term::Cond(nested)] => print_cond(nested, "elif"),
        _ => format!("else {}", print_expr(&cond.else_branch)),
    };

    format!("{keyword} {condition} then {then_branch} {else_part}")
}

fn print_native(native: &NativeImpl) -> String {
    let attrs = match native.mem_effect {
        Some(MemEffect::Alloc) => "[mem=alloc]".to_string(),
        Some(MemEffect::Static) => "[mem=static]".to_string(),
        None => String::new(),
    };
    let template = native
        .template
        .as_ref()
        .map(|t| format!(" \"{}\"", escape(t)))
        .unwrap_or_default();

    format!("@native{attrs}{template}")
}

pub fn print_type(spec: &TypeSpec) -> String {
    match spec {
        TypeSpec::Ref(r) => r.name.clone(),
        TypeSpec::Fn(f) => {
            if f.params.is_empty() {
                format!("() -> {}", print_type(&f.ret))
            } else {
                let params = f
                    .params
                    .iter()
                    .map(|p| match p {
                        TypeSpec::Fn(_) => format!("({})", print_type(p)),
                        _ => print_type(p),
                    })
                    .collect::<Vec<_>>()
                    .join(" -> ");
                format!("{params} -> {}", print_type(&f.ret))
            }
        }
        TypeSpec::Tuple(t) => {
            let elements = t
                .elements
                .iter()
                .map(print_type)
                .collect::<Vec<_>>()
                .join(", ");
            format!("({elements})")
        }
        TypeSpec::Scheme(s) => print_type(&s.body),
        TypeSpec::Variable(v) => v.name.clone(),
        TypeSpec::Application(a) => {
            let args = a
                .args
                .iter()
                .map(print_type)
                .collect::<Vec<_>>()
                .join(" ");
            format!("{} {args}", print_type(&a.constructor))
        }
        TypeSpec::NativePrimitive(p) => {
            format!("@native[t={}{}]", p.llvm_type, print_mem_attr(p.mem_effect))
        }
        TypeSpec::NativePointer(p) => {
            format!("@native[t=*{}{}]", p.llvm_type, print_mem_attr(p.mem_effect))
        }
        TypeSpec::NativeStruct(ns) => {
            let attrs = match ns.mem_effect {
                Some(MemEffect::Alloc) => "[mem=heap] ".to_string(),
                Some(MemEffect::Static) => "[mem=static] ".to_string(),
                None => " ".to_string(),
            };
            let fields = ns
                .fields
                .iter()
                .map(|f| format!("{}: {}", f.name, print_type(&f.spec)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("@native{attrs}{{ {fields} }}")
        }
        TypeSpec::Unit { .. } => "()".to_string(),
        TypeSpec::Invalid(invalid) => print_type(&invalid.original),
    }
}

fn print_mem_attr(effect: Option<MemEffect>) -> &'static str {
    match effect {
        Some(MemEffect::Alloc) => ", mem=heap",
        Some(MemEffect::Static) => ", mem=static",
        None => "",
    }
}

fn escape(raw: &str) -> String {
    raw.chars()
        .flat_map(|c| match c {
            '"' => vec!['\\', '"'],
            '\\' => vec!['\\', '\\'],
            '\n' => vec!['\\', 'n'],
            '\t' => vec!['\\', 't'],
            '\r' => vec!['\\', 'r'],
            other => vec![other],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_source;

    use super::*;

    fn round_trip(source: &str) {
        let first = parse_source("test", source).expect("first parse failed");
        let printed = print_module(&first, false);
        let second =
            parse_source("test", &printed).unwrap_or_else(|e| panic!("re-parse failed: {e}\n{printed}"));

        assert_eq!(first.members, second.members, "round trip diverged:\n{printed}");
    }

    #[test]
    fn test_round_trip_functions() {
        round_trip("fn add(a: Int, b: Int): Int = a + b;");
        round_trip("fn g(): Int = 42;");
        round_trip("fn f(a) = a;");
    }

    #[test]
    fn test_round_trip_operators() {
        round_trip("op **(a: Int, b: Int): Int 85 right = a * b;");
        round_trip("op !!(a: Bool): Bool = a;");
    }

    #[test]
    fn test_round_trip_let_and_types() {
        round_trip("let x = 42;");
        round_trip("let f: () -> Int = g;");
        round_trip("type MyInt = Int;");
        round_trip("type Handle = @native[t=*i8, mem=heap];");
        round_trip("struct User { name: String, age: Int };");
    }

    #[test]
    fn test_round_trip_bodies() {
        round_trip("fn main(): Unit = let s = \"he\\\"llo\\n\"; println s;");
        round_trip("fn f(a: Bool): Int = if a then 1 elif a then 2 else 3;");
        round_trip("fn f(u: User): String = u.name;");
        round_trip("fn f(): Unit = consume ~s;");
        round_trip("fn f(a: Int): Int = (a, 1.5, ???, _) x;");
    }

    #[test]
    fn test_round_trip_docs() {
        round_trip("/** adds numbers */\nfn add(a: Int, b: Int): Int = a + b;");
    }

    #[test]
    fn test_synthetic_members_are_skipped() {
        let module = parse_source("test", "struct User { name: String };").expect("parse failed");
        let printed = print_module(&module, false);

        // the companion constructor is synthetic and invisible
        assert_eq!(printed.matches("User").count(), 1);
    }
}
