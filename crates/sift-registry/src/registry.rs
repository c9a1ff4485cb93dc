//! Function lookup and resolution

use std::collections::HashMap;
use std::sync::LazyLock;

use sift_ir::{Expr, InvalidQuery, QueryError, RequestParams, ResultType};
use tracing::debug;

use crate::args::{ArgMap, ArgValue};
use crate::builtins;
use crate::function::FunctionSpec;
use crate::parse::{function_alias, parse_function};
use crate::resolver::FieldResolver;
use crate::RegistryError;

static BUILTIN: LazyLock<FunctionRegistry> = LazyLock::new(FunctionRegistry::default);

/// Everything a resolution needs besides the function text.
pub struct ResolveContext<'a> {
    pub params: &'a RequestParams,
    pub fields: &'a dyn FieldResolver,
    /// Private functions this request may call.
    pub acl: &'a [String],
}

/// A function call resolved to an aliased expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFunction {
    pub name: String,
    pub alias: String,
    /// The rendered expression, carrying `alias`.
    pub expr: Expr,
    pub arguments: ArgMap,
    pub result_type: Option<ResultType>,
    pub is_aggregate: bool,
    pub redundant_grouping: bool,
}

impl ResolvedFunction {
    /// Public fields passed as column arguments.
    pub fn argument_fields(&self) -> Vec<&str> {
        self.arguments.values().filter_map(ArgValue::field).collect()
    }
}

pub struct FunctionRegistry {
    functions: HashMap<&'static str, FunctionSpec>,
    version: String, // Semver for plan compatibility
}

impl FunctionRegistry {
    pub fn new(version: impl Into<String>) -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
            version: version.into(),
        };
        for spec in builtins::all() {
            registry.functions.insert(spec.name, spec);
        }
        registry
    }

    /// The shared builtin registry, built on first use.
    pub fn builtin() -> &'static FunctionRegistry {
        &BUILTIN
    }

    /// Add a function after checking its declaration.
    pub fn register(&mut self, spec: FunctionSpec) -> Result<(), RegistryError> {
        if self.functions.contains_key(spec.name) {
            return Err(RegistryError::DuplicateFunction(spec.name.to_string()));
        }
        spec.validate()?;
        self.functions.insert(spec.name, spec);
        Ok(())
    }

    /// Check every registered spec.
    pub fn validate(&self) -> Result<(), RegistryError> {
        self.functions.values().try_for_each(FunctionSpec::validate)
    }

    pub fn lookup(&self, name: &str) -> Result<&FunctionSpec, RegistryError> {
        self.functions
            .get(name)
            .ok_or_else(|| RegistryError::FunctionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Resolve `name(raw_args...)` into an aliased expression.
    pub fn resolve_function(
        &self,
        name: &str,
        raw_args: &[String],
        alias: Option<&str>,
        ctx: &ResolveContext<'_>,
    ) -> Result<ResolvedFunction, QueryError> {
        let spec = self
            .functions
            .get(name)
            .ok_or_else(|| InvalidQuery::UnknownFunction(name.to_string()))?;

        if spec.private && !ctx.acl.iter().any(|allowed| allowed == name) {
            return Err(QueryError::AccessDenied {
                function: name.to_string(),
            });
        }

        let padded = spec.pad_arguments(raw_args, ctx.params)?;

        let mut arguments = ArgMap::new();
        for (arg, raw) in spec.positional_args().zip(padded) {
            let value = match raw {
                Some(raw) => arg.normalize(name, &raw, ctx)?,
                None => ArgValue::Null,
            };
            arguments.insert(arg.name.to_string(), value);
        }

        for calculated in &spec.calculated_args {
            let value = (calculated.derive)(&arguments);
            arguments.insert(calculated.name.to_string(), value);
        }

        let alias = alias
            .map(str::to_string)
            .unwrap_or_else(|| function_alias(name, raw_args));
        let expr = spec.emission.render(&arguments, ctx.fields)?.with_alias(&alias);
        let result_type = spec.result_type_for(&arguments);

        debug!(function = name, alias = %alias, "Resolved function");

        Ok(ResolvedFunction {
            name: name.to_string(),
            alias,
            expr,
            arguments,
            result_type,
            is_aggregate: spec.emission.is_aggregate(),
            redundant_grouping: spec.redundant_grouping,
        })
    }

    /// Parse field text such as `p95(transaction.duration) as slow` and resolve it.
    pub fn resolve_field_text(&self, text: &str, ctx: &ResolveContext<'_>) -> Result<ResolvedFunction, QueryError> {
        let parsed = parse_function(text)?;
        self.resolve_function(&parsed.name, &parsed.arguments, parsed.alias.as_deref(), ctx)
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new("0.1.0")
    }
}
