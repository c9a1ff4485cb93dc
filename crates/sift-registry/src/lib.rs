//! Function registry: argument normalizers, function specs and the builtin catalog

use thiserror::Error;

pub mod args;
mod builtins;
pub mod function;
mod parse;
mod registry;
mod resolver;

pub use args::{ArgDefault, ArgMap, ArgValue, ArgumentKind, FunctionArg};
pub use function::{Emission, FunctionSpec, Template};
pub use parse::{function_alias, is_function, parse_arguments, parse_function, ParsedFunction};
pub use registry::{FunctionRegistry, ResolveContext, ResolvedFunction};
pub use resolver::{FieldResolver, ResolvedField, SchemaResolver};

/// A function declaration that violates the registry's invariants.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function already registered: {0}")]
    DuplicateFunction(String),

    #[error("{function}: argument {argument} is declared twice")]
    DuplicateArgument { function: String, argument: String },

    #[error("{function}: optional argument {argument} has no default")]
    MissingDefault { function: String, argument: String },

    #[error("{function}: template references undeclared argument {placeholder}")]
    UnknownPlaceholder { function: String, placeholder: String },

    #[error("Malformed template: {0}")]
    MalformedTemplate(String),
}
