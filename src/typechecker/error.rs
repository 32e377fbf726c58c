use std::{error::Error, fmt::Display};

use crate::lexer::Span;
use crate::parser::ast::TypeSpec;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    MissingParameterType {
        function: String,
        param: String,
        span: Span,
    },
    MissingOperatorParameterType {
        operator: String,
        param: String,
        span: Span,
    },
    RecursiveFunctionMissingReturnType {
        function: String,
        span: Span,
    },
    TypeMismatch {
        expected: TypeSpec,
        actual: TypeSpec,
        /// the declaration that imposed the expectation, when known
        expected_by: Option<String>,
        span: Span,
    },
    OversaturatedApplication {
        span: Span,
    },
    InvalidApplication {
        actual: Option<TypeSpec>,
        span: Span,
    },
    InvalidSelection {
        actual: Option<TypeSpec>,
        field: String,
        span: Span,
    },
    UnknownField {
        struct_name: String,
        field: String,
        span: Span,
    },
    ConditionalBranchTypeMismatch {
        then_type: TypeSpec,
        else_type: TypeSpec,
        span: Span,
    },
    UnableToInfer {
        name: String,
        span: Span,
    },
    UntypedHoleInBinding {
        span: Span,
    },
}

impl TypeError {
    pub fn span(&self) -> Span {
        match self {
            TypeError::MissingParameterType { span, .. }
            | TypeError::MissingOperatorParameterType { span, .. }
            | TypeError::RecursiveFunctionMissingReturnType { span, .. }
            | TypeError::TypeMismatch { span, .. }
            | TypeError::OversaturatedApplication { span }
            | TypeError::InvalidApplication { span, .. }
            | TypeError::InvalidSelection { span, .. }
            | TypeError::UnknownField { span, .. }
            | TypeError::ConditionalBranchTypeMismatch { span, .. }
            | TypeError::UnableToInfer { span, .. }
            | TypeError::UntypedHoleInBinding { span } => span.clone(),
        }
    }
}

impl Display for TypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeError::MissingParameterType {
                function, param, ..
            } => f.write_fmt(format_args!(
                "parameter '{param}' of function '{function}' needs a type annotation"
            )),
            TypeError::MissingOperatorParameterType {
                operator, param, ..
            } => f.write_fmt(format_args!(
                "parameter '{param}' of operator '{operator}' needs a type annotation"
            )),
            TypeError::RecursiveFunctionMissingReturnType { function, .. } => {
                f.write_fmt(format_args!(
                    "recursive function '{function}' needs a declared return type"
                ))
            }
            TypeError::TypeMismatch {
                expected,
                actual,
                expected_by,
                ..
            } => match expected_by {
                Some(by) => f.write_fmt(format_args!(
                    "expected '{expected}' but got '{actual}' (expected by '{by}')"
                )),
                None => f.write_fmt(format_args!("expected '{expected}' but got '{actual}'")),
            },
            TypeError::OversaturatedApplication { .. } => {
                f.write_str("this application produces a value that is applied again")
            }
            TypeError::InvalidApplication { actual, .. } => match actual {
                Some(actual) => f.write_fmt(format_args!(
                    "'{actual}' is not a function and cannot be applied"
                )),
                None => f.write_str("this term is not a function and cannot be applied"),
            },
            TypeError::InvalidSelection { actual, field, .. } => match actual {
                Some(actual) => f.write_fmt(format_args!(
                    "'{actual}' is not a struct, so '.{field}' cannot be selected"
                )),
                None => f.write_fmt(format_args!("'.{field}' selected on a non-struct value")),
            },
            TypeError::UnknownField {
                struct_name, field, ..
            } => f.write_fmt(format_args!(
                "struct '{struct_name}' has no field '{field}'"
            )),
            TypeError::ConditionalBranchTypeMismatch {
                then_type,
                else_type,
                ..
            } => f.write_fmt(format_args!(
                "conditional branches disagree: then is '{then_type}', else is '{else_type}'"
            )),
            TypeError::UnableToInfer { name, .. } => {
                f.write_fmt(format_args!("unable to infer a type for '{name}'"))
            }
            TypeError::UntypedHoleInBinding { .. } => {
                f.write_str("hole '???' needs an expected type from its context")
            }
        }
    }
}

impl Error for TypeError {}
