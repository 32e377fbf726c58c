//! # Semantic Pipeline
//!
//! A fixed sequence of phases over the shared AST, threading an
//! error-accumulating state. Each phase consumes the module and returns a
//! fresh one; the error vector only ever grows. No phase aborts on error:
//! offending subtrees are wrapped in `Invalid*` nodes so later phases can
//! skip them without re-reporting.
//!
//! ```text
//! Module ──▶ stdlib ──▶ parse errors ──▶ duplicates ──▶ ids ──▶ types
//!     ──▶ refs ──▶ rewrite ──▶ simplify ──▶ check ──▶ memgen
//!     ──▶ reindex ──▶ tailrec ──▶ ownership ──▶ Module (codegen-ready)
//! ```
//!
//! Cross-references between nodes are never pointers; they go through the
//! module's resolvables index by stable id. Phases that replace nodes
//! rebuild the index before handing the module on.

mod duplicates;
mod id_assign;
mod memgen;
mod parse_errors;
mod ref_resolver;
mod reindex;
mod rewriter;
mod simplifier;
mod stdlib;
mod tailrec;
mod type_resolver;

pub use self::duplicates::*;
pub use self::id_assign::*;
pub use self::memgen::*;
pub use self::parse_errors::*;
pub use self::ref_resolver::*;
pub use self::reindex::*;
pub use self::rewriter::*;
pub use self::simplifier::*;
pub use self::stdlib::*;
pub use self::tailrec::*;
pub use self::type_resolver::*;

use std::{error::Error, fmt::Display};

use crate::lexer::Span;
use crate::ownership::OwnershipAnalyzer;
use crate::parser::ast::Module;
use crate::typechecker::{TypeChecker, TypeError};

/// Errors accumulated across all semantic phases. Every variant carries
/// the span of the offending node and knows which phase reported it.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticError {
    MemberErrorFound {
        message: String,
        span: Span,
    },
    ParsingIdErrorFound {
        raw: String,
        message: String,
        span: Span,
    },
    DuplicateName {
        name: String,
        spans: Vec<Span>,
    },
    InvalidMemberFound {
        reason: String,
        span: Span,
    },
    UndefinedTypeRef {
        name: String,
        span: Span,
    },
    UndefinedRef {
        name: String,
        member: Option<String>,
        span: Span,
    },
    DanglingTerms {
        message: String,
        span: Span,
    },
    TypeCheckingError(TypeError),
    UseAfterMove {
        name: String,
        span: Span,
    },
    ConsumingParamNotLastUse {
        name: String,
        span: Span,
    },
    PartialApplicationWithConsuming {
        name: String,
        span: Span,
    },
    ConditionalOwnershipMismatch {
        name: String,
        span: Span,
    },
    BorrowEscapeViaReturn {
        name: String,
        span: Span,
    },
    InvalidMainSignature {
        found: String,
        span: Span,
    },
}

impl SemanticError {
    pub fn span(&self) -> Span {
        match self {
            SemanticError::MemberErrorFound { span, .. }
            | SemanticError::ParsingIdErrorFound { span, .. }
            | SemanticError::InvalidMemberFound { span, .. }
            | SemanticError::UndefinedTypeRef { span, .. }
            | SemanticError::UndefinedRef { span, .. }
            | SemanticError::DanglingTerms { span, .. }
            | SemanticError::UseAfterMove { span, .. }
            | SemanticError::ConsumingParamNotLastUse { span, .. }
            | SemanticError::PartialApplicationWithConsuming { span, .. }
            | SemanticError::ConditionalOwnershipMismatch { span, .. }
            | SemanticError::BorrowEscapeViaReturn { span, .. }
            | SemanticError::InvalidMainSignature { span, .. } => span.clone(),
            SemanticError::DuplicateName { spans, .. } => {
                spans.last().cloned().unwrap_or(Span::Synthetic)
            }
            SemanticError::TypeCheckingError(e) => e.span(),
        }
    }

    /// The phase that reported this error.
    pub fn phase(&self) -> &'static str {
        match self {
            SemanticError::MemberErrorFound { .. }
            | SemanticError::ParsingIdErrorFound { .. } => "ParsingErrorChecker",
            SemanticError::DuplicateName { .. } | SemanticError::InvalidMemberFound { .. } => {
                "DuplicateNameChecker"
            }
            SemanticError::UndefinedTypeRef { .. } => "TypeResolver",
            SemanticError::UndefinedRef { .. } => "RefResolver",
            SemanticError::DanglingTerms { .. } => "ExpressionRewriter",
            SemanticError::TypeCheckingError(_) | SemanticError::InvalidMainSignature { .. } => {
                "TypeChecker"
            }
            SemanticError::UseAfterMove { .. }
            | SemanticError::ConsumingParamNotLastUse { .. }
            | SemanticError::PartialApplicationWithConsuming { .. }
            | SemanticError::ConditionalOwnershipMismatch { .. }
            | SemanticError::BorrowEscapeViaReturn { .. } => "OwnershipAnalyzer",
        }
    }
}

impl Display for SemanticError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            SemanticError::MemberErrorFound { message, .. } => {
                format!("member failed to parse: {message}")
            }
            SemanticError::ParsingIdErrorFound { raw, message, .. } => {
                format!("invalid identifier '{raw}': {message}")
            }
            SemanticError::DuplicateName { name, spans } => {
                format!("'{name}' is declared {} times", spans.len())
            }
            SemanticError::InvalidMemberFound { reason, .. } => reason.clone(),
            SemanticError::UndefinedTypeRef { name, .. } => {
                format!("undefined type '{name}'")
            }
            SemanticError::UndefinedRef { name, member, .. } => match member {
                Some(member) => format!("undefined reference '{name}' in '{member}'"),
                None => format!("undefined reference '{name}'"),
            },
            SemanticError::DanglingTerms { message, .. } => {
                format!("dangling terms after rewriting: {message}")
            }
            SemanticError::TypeCheckingError(e) => e.to_string(),
            SemanticError::UseAfterMove { name, .. } => {
                format!("'{name}' is used after being moved")
            }
            SemanticError::ConsumingParamNotLastUse { name, .. } => {
                format!("'{name}' is consumed here but used again later")
            }
            SemanticError::PartialApplicationWithConsuming { name, .. } => {
                format!("'{name}' cannot be partially applied: it has a consuming parameter")
            }
            SemanticError::ConditionalOwnershipMismatch { name, .. } => {
                format!("'{name}' has incompatible ownership across conditional branches")
            }
            SemanticError::BorrowEscapeViaReturn { name, .. } => {
                format!("'{name}' is borrowed and cannot escape via return")
            }
            SemanticError::InvalidMainSignature { found, .. } => {
                format!("'main' must be '() -> Unit' or '() -> Int', found '{found}'")
            }
        };

        f.write_str(self.span().to_string(message).as_str())
    }
}

impl Error for SemanticError {}

/// A single pipeline phase: pure module-to-module transformation with an
/// error sink.
pub trait Phase {
    fn name(&self) -> &'static str;

    fn run(&self, module: Module, errors: &mut Vec<SemanticError>) -> Module;
}

/// Run the full fixed phase sequence over a freshly parsed module.
pub fn run_pipeline(module: Module) -> (Module, Vec<SemanticError>) {
    let phases: [&dyn Phase; 13] = [
        &StdlibInjector,
        &ParsingErrorChecker,
        &DuplicateNameChecker,
        &IdAssigner,
        &TypeResolver,
        &RefResolver,
        &ExpressionRewriter,
        &Simplifier,
        &TypeChecker,
        &MemoryFunctionGenerator,
        &ResolvablesReindexer,
        &TailRecursionDetector,
        &OwnershipAnalyzer,
    ];

    let mut errors = vec![];
    let mut module = module;

    for phase in phases {
        log::debug!(
            "running phase {} ({} members, {} errors so far)",
            phase.name(),
            module.members.len(),
            errors.len()
        );
        module = phase.run(module, &mut errors);
    }

    (module, errors)
}
