use parser::ast::Module;
use parser::ParserError;
use semantic::SemanticError;

pub mod lexer;
pub mod ownership;
pub mod parser;
pub mod printer;
pub mod semantic;
pub mod typechecker;

/// Compile one source file into a fully analyzed module: lex, parse with
/// recovery, then run the fixed semantic pipeline. The only hard failure
/// is a parse that produces no module at all; everything else accumulates
/// in the returned error vector while the module stays walkable.
pub fn compile_module(
    module_name: &str,
    source: &str,
) -> Result<(Module, Vec<SemanticError>), ParserError> {
    let module = parser::parse_source(module_name, source)?;
    Ok(semantic::run_pipeline(module))
}
