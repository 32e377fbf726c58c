use serde::{Deserialize, Serialize};

use super::{Member, ResolvablesIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

/// A single translation unit: one source file. The member list keeps
/// source order (with injected prelude entries in front); the resolvables
/// index maps stable ids to the current version of every resolvable node
/// and is rebuilt whenever a phase replaces nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub visibility: Visibility,
    pub members: Vec<Member>,
    pub doc: Option<String>,
    pub source_path: Option<String>,
    #[serde(skip)]
    pub index: ResolvablesIndex,
}

impl Module {
    pub fn new(name: impl ToString, members: Vec<Member>) -> Module {
        Module {
            name: name.to_string(),
            visibility: Visibility::Public,
            members,
            doc: None,
            source_path: None,
            index: ResolvablesIndex::default(),
        }
    }

    /// All members that are plain bindings, in order.
    pub fn bindings(&self) -> impl Iterator<Item = &super::Bnd> {
        self.members.iter().filter_map(|member| match member {
            Member::Bnd(bnd) => Some(bnd),
            _ => None,
        })
    }
}
