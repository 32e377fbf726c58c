use std::collections::HashMap;

use crate::parser::ast::TypeSpec;

/// Lexical type scope for body checking: maps stable binding ids to their
/// established types. Frames stack innermost-last; lookups walk from the
/// end backwards. Module members are not stored here (they resolve
/// through the resolvables index), so the scope only ever holds the
/// current lambda's parameters and the `let` bindings seen so far.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    frames: Vec<HashMap<String, TypeSpec>>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope {
            frames: vec![HashMap::new()],
        }
    }

    pub fn enter(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn exit(&mut self) {
        self.frames.pop();
    }

    pub fn add(&mut self, id: impl ToString, spec: TypeSpec) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(id.to_string(), spec);
        }
    }

    pub fn resolve(&self, id: &str) -> Option<&TypeSpec> {
        self.frames.iter().rev().find_map(|frame| frame.get(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Span;
    use crate::parser::ast::TypeRef;

    use super::*;

    fn spec(name: &str) -> TypeSpec {
        TypeSpec::Ref(TypeRef {
            name: name.into(),
            resolved_id: None,
            position: Span::default(),
        })
    }

    #[test]
    fn test_inner_frame_shadows() {
        let mut scope = Scope::new();
        scope.add("m::bnd::f::param::a", spec("Int"));

        scope.enter();
        scope.add("m::bnd::f::param::a", spec("Bool"));
        assert!(matches!(
            scope.resolve("m::bnd::f::param::a"),
            Some(TypeSpec::Ref(TypeRef { name, .. })) if name == "Bool"
        ));

        scope.exit();
        assert!(matches!(
            scope.resolve("m::bnd::f::param::a"),
            Some(TypeSpec::Ref(TypeRef { name, .. })) if name == "Int"
        ));
    }

    #[test]
    fn test_unknown_id_is_none() {
        let scope = Scope::new();
        assert!(scope.resolve("m::bnd::missing").is_none());
    }
}
