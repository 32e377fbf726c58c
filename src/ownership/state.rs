use crate::parser::ast::TypeSpec;

/// The ownership state of a tracked binding within its lexical scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    /// This binding owns its heap value and must release it (or hand it
    /// on) before the scope ends.
    Owned,
    /// Ownership has been transferred away; any further use is an error.
    Moved,
    /// The value belongs to someone else; it must not be freed here and
    /// must not escape via return.
    Borrowed,
    /// Static data (literals): never freed, freely usable.
    Literal,
}

#[derive(Debug, Clone)]
pub struct BindingInfo {
    pub name: String,
    pub state: OwnershipState,
    pub type_spec: Option<TypeSpec>,
    /// For mixed conditional ownership: the id of the boolean witness
    /// binding that records whether this binding was allocated on the
    /// taken path.
    pub witness: Option<String>,
}

/// One lexical ownership scope: tracked bindings in declaration order
/// (cleanup runs in reverse). A temp wrapper scope owns only the
/// synthetic `__tmp_<n>` bindings of a single statement and never frees
/// anything inherited from the enclosing scope.
#[derive(Debug, Clone, Default)]
pub struct OwnershipScope {
    bindings: Vec<(String, BindingInfo)>,
    pub inside_temp_wrapper: bool,
}

impl OwnershipScope {
    pub fn new(inside_temp_wrapper: bool) -> OwnershipScope {
        OwnershipScope {
            bindings: vec![],
            inside_temp_wrapper,
        }
    }

    pub fn declare(&mut self, id: impl ToString, info: BindingInfo) {
        self.bindings.push((id.to_string(), info));
    }

    pub fn get(&self, id: &str) -> Option<&BindingInfo> {
        self.bindings
            .iter()
            .rev()
            .find(|(binding_id, _)| binding_id == id)
            .map(|(_, info)| info)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut BindingInfo> {
        self.bindings
            .iter_mut()
            .rev()
            .find(|(binding_id, _)| binding_id == id)
            .map(|(_, info)| info)
    }

    /// Tracked bindings in declaration order.
    pub fn locals(&self) -> impl Iterator<Item = (&String, &BindingInfo)> {
        self.bindings.iter().map(|(id, info)| (id, info))
    }
}

/// A stack of ownership scopes; lookups walk innermost-out.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<OwnershipScope>,
}

impl ScopeStack {
    pub fn push(&mut self, scope: OwnershipScope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) -> Option<OwnershipScope> {
        self.scopes.pop()
    }

    pub fn top_mut(&mut self) -> &mut OwnershipScope {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    pub fn top(&self) -> &OwnershipScope {
        self.scopes.last().expect("scope stack is never empty")
    }

    pub fn get(&self, id: &str) -> Option<&BindingInfo> {
        self.scopes.iter().rev().find_map(|scope| scope.get(id))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut BindingInfo> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, state: OwnershipState) -> BindingInfo {
        BindingInfo {
            name: name.into(),
            state,
            type_spec: None,
            witness: None,
        }
    }

    #[test]
    fn test_lookup_walks_outwards() {
        let mut stack = ScopeStack::default();
        let mut outer = OwnershipScope::new(false);
        outer.declare("m::bnd::f::let::s", info("s", OwnershipState::Owned));
        stack.push(outer);
        stack.push(OwnershipScope::new(true));

        assert_eq!(
            stack.get("m::bnd::f::let::s").map(|i| i.state),
            Some(OwnershipState::Owned)
        );
    }

    #[test]
    fn test_transition_to_moved() {
        let mut stack = ScopeStack::default();
        let mut scope = OwnershipScope::new(false);
        scope.declare("m::bnd::f::let::s", info("s", OwnershipState::Owned));
        stack.push(scope);

        stack.get_mut("m::bnd::f::let::s").expect("missing binding").state =
            OwnershipState::Moved;

        assert_eq!(
            stack.get("m::bnd::f::let::s").map(|i| i.state),
            Some(OwnershipState::Moved)
        );
    }

    #[test]
    fn test_locals_keep_declaration_order() {
        let mut scope = OwnershipScope::new(false);
        scope.declare("a", info("a", OwnershipState::Owned));
        scope.declare("b", info("b", OwnershipState::Borrowed));

        let order: Vec<_> = scope.locals().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }
}
