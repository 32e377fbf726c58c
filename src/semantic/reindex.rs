use crate::parser::ast::{Module, ResolvablesIndex};

use super::{Phase, SemanticError};

/// Rebuilds the resolvables index from scratch. Runs after the memory
/// function generator (and any other late rewrite) so that the parameters
/// and members introduced there resolve through the index like everything
/// else.
pub struct ResolvablesReindexer;

impl Phase for ResolvablesReindexer {
    fn name(&self) -> &'static str {
        "ResolvablesReindexer"
    }

    fn run(&self, mut module: Module, _errors: &mut Vec<SemanticError>) -> Module {
        module.index = ResolvablesIndex::build(&module);
        log::debug!("reindexed {} resolvables", module.index.len());
        module
    }
}
