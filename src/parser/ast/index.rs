use std::collections::HashMap;

use super::{Bnd, LetBind, Member, Module, Param, StructField, Term, TypeAlias, TypeDef, TypeStruct};

/// A node that can be the target of a reference. The index stores clones
/// of the current node versions; cross-references in the AST are only ever
/// by stable id, never by pointer, so looking a node up here always yields
/// the latest instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolvable {
    Bnd(Bnd),
    Param(Param),
    Let(LetBind),
    StructField(StructField),
    TypeDef(TypeDef),
    TypeAlias(TypeAlias),
    TypeStruct(TypeStruct),
}

impl Resolvable {
    pub fn name(&self) -> &str {
        match self {
            Resolvable::Bnd(bnd) => &bnd.name,
            Resolvable::Param(param) => &param.name,
            Resolvable::Let(bind) => &bind.name,
            Resolvable::StructField(field) => &field.name,
            Resolvable::TypeDef(def) => &def.name,
            Resolvable::TypeAlias(alias) => &alias.name,
            Resolvable::TypeStruct(ts) => &ts.name,
        }
    }

    /// The computed type of the node, when a phase has established one.
    pub fn type_spec(&self) -> Option<&super::TypeSpec> {
        match self {
            Resolvable::Bnd(bnd) => bnd.type_spec.as_ref(),
            Resolvable::Param(param) => param.type_spec.as_ref(),
            Resolvable::Let(bind) => bind.type_spec.as_ref(),
            Resolvable::StructField(field) => field.type_spec.as_ref().or(Some(&field.type_asc)),
            Resolvable::TypeDef(def) => Some(&def.spec),
            Resolvable::TypeAlias(alias) => alias.type_spec.as_ref(),
            Resolvable::TypeStruct(_) => None,
        }
    }

    pub fn as_bnd(&self) -> Option<&Bnd> {
        match self {
            Resolvable::Bnd(bnd) => Some(bnd),
            _ => None,
        }
    }
}

/// Map from stable id to the current version of the node carrying it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvablesIndex {
    entries: HashMap<String, Resolvable>,
}

impl ResolvablesIndex {
    /// Walk a module and build a fresh index of everything that carries a
    /// stable id: members, their parameters and struct fields.
    pub fn build(module: &Module) -> ResolvablesIndex {
        let mut index = ResolvablesIndex::default();

        for member in &module.members {
            index.add_member(member);
        }

        index
    }

    fn add_member(&mut self, member: &Member) {
        match member {
            Member::Bnd(bnd) => self.add_bnd(bnd),
            Member::TypeDef(def) => {
                if let Some(id) = &def.id {
                    self.insert(id.clone(), Resolvable::TypeDef(def.clone()));
                }
            }
            Member::TypeAlias(alias) => {
                if let Some(id) = &alias.id {
                    self.insert(id.clone(), Resolvable::TypeAlias(alias.clone()));
                }
            }
            Member::TypeStruct(ts) => {
                if let Some(id) = &ts.id {
                    self.insert(id.clone(), Resolvable::TypeStruct(ts.clone()));
                }
                for field in &ts.fields {
                    if let Some(id) = &field.id {
                        self.insert(id.clone(), Resolvable::StructField(field.clone()));
                    }
                }
            }
            // error members are not resolvable, but the wrapped original
            // may still carry indexed children (e.g. a duplicate function
            // whose parameters are referenced from its own body)
            Member::Duplicate(dup) => self.add_member(&dup.original),
            Member::Invalid(invalid) => self.add_member(&invalid.original),
            Member::MemberError(_) => {}
        }
    }

    fn add_bnd(&mut self, bnd: &Bnd) {
        if let Some(id) = &bnd.id {
            self.insert(id.clone(), Resolvable::Bnd(bnd.clone()));
        }

        if let Some(Term::Lambda(lambda)) = bnd.value.terms.first() {
            for param in &lambda.params {
                if let Some(id) = &param.id {
                    self.insert(id.clone(), Resolvable::Param(param.clone()));
                }
            }
        }

        bnd.value.walk(&mut |term| {
            if let Term::Let(bind) = term {
                if let Some(id) = &bind.id {
                    self.insert(id.clone(), Resolvable::Let(bind.clone()));
                }
            }
        });
    }

    pub fn insert(&mut self, id: String, node: Resolvable) {
        self.entries.insert(id, node);
    }

    pub fn get(&self, id: &str) -> Option<&Resolvable> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
