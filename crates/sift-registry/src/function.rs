//! Function specs and the template AST they render through

use sift_ir::{Expr, InvalidQuery, QueryError, RequestParams, ResultType, Value};

use crate::args::{ArgMap, ArgValue, FunctionArg};
use crate::resolver::FieldResolver;
use crate::RegistryError;

/// A node of an expression template.
///
/// Templates render into [`Expr`] once arguments are normalized. Every
/// `Arg` reference is checked against the declared arguments when the
/// spec is registered.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Arg(&'static str),
    /// A storage column, used verbatim.
    Column(&'static str),
    /// A named alias expanded by the field resolver.
    Alias(&'static str),
    Literal(Value),
    Call {
        name: &'static str,
        params: Vec<Template>,
        args: Vec<Template>,
    },
    /// A call whose function name is the value of a condition argument.
    DynamicCall {
        name_arg: &'static str,
        args: Vec<Template>,
    },
}

pub fn arg(name: &'static str) -> Template {
    Template::Arg(name)
}

pub fn col(name: &'static str) -> Template {
    Template::Column(name)
}

pub fn alias(name: &'static str) -> Template {
    Template::Alias(name)
}

pub fn lit(value: impl Into<Value>) -> Template {
    Template::Literal(value.into())
}

pub fn call(name: &'static str, args: Vec<Template>) -> Template {
    Template::Call {
        name,
        params: vec![],
        args,
    }
}

pub fn param_call(name: &'static str, params: Vec<Template>, args: Vec<Template>) -> Template {
    Template::Call { name, params, args }
}

pub fn dynamic_call(name_arg: &'static str, args: Vec<Template>) -> Template {
    Template::DynamicCall { name_arg, args }
}

impl Template {
    pub fn render(&self, args: &ArgMap, fields: &dyn FieldResolver) -> Result<Expr, QueryError> {
        match self {
            Template::Arg(name) => Ok(lookup(args, name)?.to_expr()),
            Template::Column(name) => Ok(Expr::column(*name)),
            Template::Alias(name) => fields.resolve_alias(name),
            Template::Literal(value) => Ok(Expr::literal(value.clone())),
            Template::Call { name, params, args: children } => {
                let params = params
                    .iter()
                    .map(|p| p.render_param(args))
                    .collect::<Result<Vec<_>, _>>()?;
                // Each child stays one element, so a lone nested expression
                // is never spread into several arguments.
                let children = children
                    .iter()
                    .map(|c| c.render(args, fields))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::parametric(*name, params, children))
            }
            Template::DynamicCall { name_arg, args: children } => {
                let name = match lookup(args, name_arg)? {
                    ArgValue::Operator(op) => op.to_string(),
                    ArgValue::Str(s) => s.clone(),
                    other => {
                        return Err(QueryError::invalid(format!(
                            "{} is not a function name",
                            other.render()
                        )))
                    }
                };
                let children = children
                    .iter()
                    .map(|c| c.render(args, fields))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::call(name, children))
            }
        }
    }

    fn render_param(&self, args: &ArgMap) -> Result<Value, QueryError> {
        match self {
            Template::Literal(value) => Ok(value.clone()),
            Template::Arg(name) => lookup(args, name)?
                .to_value()
                .ok_or_else(|| QueryError::invalid(format!("{} cannot be a function parameter", name))),
            other => Err(QueryError::NotImplemented(format!(
                "parametric argument {:?}",
                other
            ))),
        }
    }

    /// Every argument name this template references.
    pub fn placeholders(&self, out: &mut Vec<&'static str>) {
        match self {
            Template::Arg(name) => out.push(*name),
            Template::Column(_) | Template::Alias(_) | Template::Literal(_) => {}
            Template::Call { params, args, .. } => {
                for t in params.iter().chain(args.iter()) {
                    t.placeholders(out);
                }
            }
            Template::DynamicCall { name_arg, args } => {
                out.push(*name_arg);
                for t in args {
                    t.placeholders(out);
                }
            }
        }
    }
}

fn lookup<'a>(args: &'a ArgMap, name: &str) -> Result<&'a ArgValue, QueryError> {
    args.get(name)
        .ok_or_else(|| QueryError::invalid(format!("missing argument {}", name)))
}

/// A pre-rendered SQL snippet with `{argument}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Placeholder(String),
}

impl FormatTemplate {
    pub fn parse(source: &str) -> Result<Self, RegistryError> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| RegistryError::MalformedTemplate(source.to_string()))?;
            let name = &rest[open + 1..close];
            if name.is_empty() {
                return Err(RegistryError::MalformedTemplate(source.to_string()));
            }
            segments.push(Segment::Placeholder(name.to_string()));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, args: &ArgMap) -> Result<String, QueryError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(name) => out.push_str(&lookup(args, name)?.render()),
            }
        }
        Ok(out)
    }
}

/// How a resolved function turns into an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// A row-level expression.
    Column(Template),
    Aggregate(Template),
    Transform(&'static str),
    /// Render `matched` when `condition` is non-null, `fallback` otherwise.
    ConditionalTransform {
        condition: &'static str,
        matched: Template,
        fallback: Template,
    },
}

impl Emission {
    pub fn is_aggregate(&self) -> bool {
        !matches!(self, Emission::Column(_))
    }

    pub fn render(&self, args: &ArgMap, fields: &dyn FieldResolver) -> Result<Expr, QueryError> {
        match self {
            Emission::Column(template) | Emission::Aggregate(template) => template.render(args, fields),
            Emission::Transform(source) => {
                let sql = FormatTemplate::parse(source)
                    .map_err(|e| QueryError::NotImplemented(e.to_string()))?
                    .render(args)?;
                Ok(Expr::Raw { sql, alias: None })
            }
            Emission::ConditionalTransform {
                condition,
                matched,
                fallback,
            } => {
                let use_match = !lookup(args, condition)?.is_null();
                if use_match {
                    matched.render(args, fields)
                } else {
                    fallback.render(args, fields)
                }
            }
        }
    }

    /// Argument names referenced anywhere in the emission.
    pub fn placeholders(&self) -> Result<Vec<String>, RegistryError> {
        let mut out = Vec::new();
        match self {
            Emission::Column(template) | Emission::Aggregate(template) => template.placeholders(&mut out),
            Emission::Transform(source) => {
                let template = FormatTemplate::parse(source)?;
                return Ok(template.placeholders().map(str::to_string).collect());
            }
            Emission::ConditionalTransform {
                condition,
                matched,
                fallback,
            } => {
                out.push(*condition);
                matched.placeholders(&mut out);
                fallback.placeholders(&mut out);
            }
        }
        Ok(out.into_iter().map(str::to_string).collect())
    }
}

/// An argument derived from the normalized values of earlier ones.
#[derive(Debug, Clone)]
pub struct CalculatedArg {
    pub name: &'static str,
    pub derive: fn(&ArgMap) -> ArgValue,
}

/// Computes a result type from the normalized arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultTypeRule {
    /// Same type as the named argument.
    SameAs(&'static str),
}

#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub required_args: Vec<FunctionArg>,
    pub optional_args: Vec<FunctionArg>,
    pub calculated_args: Vec<CalculatedArg>,
    pub emission: Emission,
    pub result_type_rule: Option<ResultTypeRule>,
    pub default_result_type: Option<ResultType>,
    /// Selecting this function makes grouping by its column argument redundant.
    pub redundant_grouping: bool,
    /// Only callable when named in the request's access list.
    pub private: bool,
}

impl FunctionSpec {
    pub fn new(name: &'static str, emission: Emission) -> Self {
        Self {
            name,
            required_args: vec![],
            optional_args: vec![],
            calculated_args: vec![],
            emission,
            result_type_rule: None,
            default_result_type: None,
            redundant_grouping: false,
            private: false,
        }
    }

    pub fn required(mut self, arg: FunctionArg) -> Self {
        self.required_args.push(arg);
        self
    }

    pub fn optional(mut self, arg: FunctionArg) -> Self {
        self.optional_args.push(arg);
        self
    }

    pub fn calculated(mut self, name: &'static str, derive: fn(&ArgMap) -> ArgValue) -> Self {
        self.calculated_args.push(CalculatedArg { name, derive });
        self
    }

    pub fn result_type(mut self, result_type: ResultType) -> Self {
        self.default_result_type = Some(result_type);
        self
    }

    pub fn result_type_from(mut self, argument: &'static str) -> Self {
        self.result_type_rule = Some(ResultTypeRule::SameAs(argument));
        self
    }

    pub fn redundant_grouping(mut self) -> Self {
        self.redundant_grouping = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    /// Required then optional arguments, in declaration order.
    pub fn positional_args(&self) -> impl Iterator<Item = &FunctionArg> {
        self.required_args.iter().chain(self.optional_args.iter())
    }

    pub fn total_args(&self) -> usize {
        self.required_args.len() + self.optional_args.len()
    }

    /// Check the spec's internal consistency.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut names: Vec<&str> = Vec::new();
        for arg in self.positional_args() {
            if names.contains(&arg.name) {
                return Err(RegistryError::DuplicateArgument {
                    function: self.name.to_string(),
                    argument: arg.name.to_string(),
                });
            }
            names.push(arg.name);
        }
        for arg in &self.optional_args {
            if arg.default.is_none() {
                return Err(RegistryError::MissingDefault {
                    function: self.name.to_string(),
                    argument: arg.name.to_string(),
                });
            }
        }
        for calc in &self.calculated_args {
            if names.contains(&calc.name) {
                return Err(RegistryError::DuplicateArgument {
                    function: self.name.to_string(),
                    argument: calc.name.to_string(),
                });
            }
            names.push(calc.name);
        }
        for placeholder in self.emission.placeholders()? {
            if !names.contains(&placeholder.as_str()) {
                return Err(RegistryError::UnknownPlaceholder {
                    function: self.name.to_string(),
                    placeholder: placeholder.to_string(),
                });
            }
        }
        if let Some(ResultTypeRule::SameAs(argument)) = self.result_type_rule {
            if !names.contains(&argument) {
                return Err(RegistryError::UnknownPlaceholder {
                    function: self.name.to_string(),
                    placeholder: argument.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check the supplied argument count and pad trailing optional arguments.
    ///
    /// `None` entries are null defaults.
    pub fn pad_arguments(
        &self,
        raw_args: &[String],
        params: &RequestParams,
    ) -> Result<Vec<Option<String>>, QueryError> {
        let required = self.required_args.len();
        let total = self.total_args();
        let given = raw_args.len();

        if given < required {
            return Err(InvalidQuery::TooFewArguments {
                function: self.name.to_string(),
                expected: required,
                given,
            }
            .into());
        }
        if given > total {
            return Err(InvalidQuery::TooManyArguments {
                function: self.name.to_string(),
                expected: total,
                given,
            }
            .into());
        }

        let mut padded: Vec<Option<String>> = raw_args.iter().cloned().map(Some).collect();
        for arg in self.optional_args.iter().skip(given - required) {
            let default = match &arg.default {
                Some(default) => default.provide(params)?,
                None => None,
            };
            padded.push(default);
        }
        Ok(padded)
    }

    /// Invoke the result-type rule, falling back to the declared default.
    pub fn result_type_for(&self, args: &ArgMap) -> Option<ResultType> {
        let from_rule = self.result_type_rule.and_then(|rule| match rule {
            ResultTypeRule::SameAs(name) => {
                let spec = self.positional_args().find(|a| a.name == name)?;
                args.get(name).and_then(|value| spec.type_of(value))
            }
        });
        from_rule.or(self.default_result_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{ArgDefault, ArgumentKind};

    #[test]
    fn test_format_template_placeholders() {
        let template = FormatTemplate::parse("countIf({condition}(timestamp, {middle}))").unwrap();
        assert_eq!(template.placeholders().collect::<Vec<_>>(), vec!["condition", "middle"]);

        let mut args = ArgMap::new();
        args.insert("condition".to_string(), ArgValue::Operator("greater"));
        args.insert("middle".to_string(), ArgValue::Number(5.0));
        assert_eq!(template.render(&args).unwrap(), "countIf(greater(timestamp, 5))");
    }

    #[test]
    fn test_format_template_unclosed() {
        assert!(FormatTemplate::parse("abs({column)").is_err());
    }

    #[test]
    fn test_validate_rejects_undeclared_placeholder() {
        let spec = FunctionSpec::new("broken", Emission::Aggregate(call("sum", vec![arg("column")])));
        assert!(matches!(
            spec.validate(),
            Err(RegistryError::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn test_validate_requires_defaults() {
        let spec = FunctionSpec::new("broken", Emission::Aggregate(call("count", vec![])))
            .optional(FunctionArg::new("column", ArgumentKind::IgnoredColumn));
        assert!(matches!(spec.validate(), Err(RegistryError::MissingDefault { .. })));

        let fixed = FunctionSpec::new("fixed", Emission::Aggregate(call("count", vec![])))
            .optional(FunctionArg::new("column", ArgumentKind::IgnoredColumn).with_default(ArgDefault::Null));
        assert!(fixed.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_arguments() {
        let spec = FunctionSpec::new("broken", Emission::Aggregate(call("sum", vec![arg("column")])))
            .required(FunctionArg::new("column", ArgumentKind::NumericColumn))
            .required(FunctionArg::new("column", ArgumentKind::NumericColumn));
        assert!(matches!(
            spec.validate(),
            Err(RegistryError::DuplicateArgument { .. })
        ));
    }
}
