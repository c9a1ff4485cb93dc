//! The builtin function catalog

use sift_ir::ResultType;

use crate::args::{ArgDefault, ArgMap, ArgValue, ArgumentKind, FunctionArg};
use crate::function::{alias, arg, call, col, dynamic_call, lit, param_call, Emission, FunctionSpec, Template};

const DEFAULT_DURATION: &str = "transaction.duration";

// Statuses that don't count as failures: ok, cancelled, unknown.
const NON_FAILURE_STATUSES: [i64; 3] = [0, 1, 2];

fn column(name: &'static str) -> FunctionArg {
    FunctionArg::new(name, ArgumentKind::Column { allowed: None })
}

fn numeric(name: &'static str) -> FunctionArg {
    FunctionArg::new(name, ArgumentKind::NumericColumn)
}

fn number(name: &'static str, min: Option<f64>, max: Option<f64>) -> FunctionArg {
    FunctionArg::new(
        name,
        ArgumentKind::NumberRange {
            min,
            max,
            integer: false,
        },
    )
}

fn integer(name: &'static str, min: Option<f64>) -> FunctionArg {
    FunctionArg::new(
        name,
        ArgumentKind::NumberRange {
            min,
            max: None,
            integer: true,
        },
    )
}

fn string(name: &'static str) -> FunctionArg {
    FunctionArg::new(name, ArgumentKind::StringLiteral { allowed: None })
}

fn condition() -> FunctionArg {
    FunctionArg::new("condition", ArgumentKind::ConditionOperator)
}

fn satisfaction() -> FunctionArg {
    FunctionArg::new(
        "satisfaction",
        ArgumentKind::NullableNumberRange {
            min: Some(0.0),
            max: None,
        },
    )
    .with_default(ArgDefault::Null)
}

fn tolerated(args: &ArgMap) -> ArgValue {
    match args.get("satisfaction") {
        Some(ArgValue::Number(satisfaction)) => ArgValue::Number(satisfaction * 4.0),
        _ => ArgValue::Null,
    }
}

/// `measurements[lcp]` for projects thresholded on LCP, `duration` otherwise.
fn threshold_metric() -> Template {
    call(
        "multiIf",
        vec![
            call(
                "equals",
                vec![
                    call("tupleElement", vec![alias("project_threshold_config"), lit(1i64)]),
                    lit("lcp"),
                ],
            ),
            col("measurements[lcp]"),
            col("duration"),
        ],
    )
}

fn threshold_value() -> Template {
    call("tupleElement", vec![alias("project_threshold_config"), lit(2i64)])
}

fn miserable_users(metric: Template, limit: Template) -> Template {
    call(
        "uniqIf",
        vec![col("user"), call("greater", vec![metric, limit])],
    )
}

fn misery_score(miserable: Template) -> Template {
    call(
        "ifNull",
        vec![
            call(
                "divide",
                vec![
                    call("plus", vec![miserable, arg("alpha")]),
                    call(
                        "plus",
                        vec![
                            call("uniq", vec![col("user")]),
                            call("plus", vec![arg("alpha"), arg("beta")]),
                        ],
                    ),
                ],
            ),
            lit(0i64),
        ],
    )
}

fn quantile(level: f64) -> Template {
    param_call("quantile", vec![lit(level)], vec![arg("column")])
}

fn percentile_shortcut(name: &'static str, aggregate: Template) -> FunctionSpec {
    FunctionSpec::new(name, Emission::Aggregate(aggregate))
        .optional(numeric("column").with_default(ArgDefault::Raw(DEFAULT_DURATION)))
        .result_type_from("column")
        .result_type(ResultType::Duration)
}

fn simple_aggregate(name: &'static str, function: &'static str) -> FunctionSpec {
    FunctionSpec::new(name, Emission::Aggregate(call(function, vec![arg("column")])))
        .required(numeric("column"))
        .result_type_from("column")
        .result_type(ResultType::Number)
}

pub(crate) fn all() -> Vec<FunctionSpec> {
    vec![
        FunctionSpec::new("count", Emission::Aggregate(call("count", vec![])))
            .optional(FunctionArg::new("column", ArgumentKind::IgnoredColumn).with_default(ArgDefault::Null))
            .result_type(ResultType::Integer),
        FunctionSpec::new("count_unique", Emission::Aggregate(call("uniq", vec![arg("column")])))
            .required(column("column"))
            .result_type(ResultType::Integer),
        FunctionSpec::new(
            "count_if",
            Emission::Aggregate(call(
                "countIf",
                vec![dynamic_call("condition", vec![arg("column"), arg("value")])],
            )),
        )
        .required(column("column"))
        .required(condition())
        .required(string("value"))
        .result_type(ResultType::Integer),
        FunctionSpec::new(
            "count_at_least",
            Emission::Aggregate(call(
                "countIf",
                vec![call("greaterOrEquals", vec![arg("column"), arg("threshold")])],
            )),
        )
        .required(numeric("column"))
        .required(number("threshold", None, None))
        .result_type(ResultType::Integer),
        FunctionSpec::new(
            "count_miserable",
            Emission::ConditionalTransform {
                condition: "satisfaction",
                matched: call(
                    "uniqIf",
                    vec![arg("column"), call("greater", vec![col("duration"), arg("tolerated")])],
                ),
                fallback: call(
                    "uniqIf",
                    vec![
                        arg("column"),
                        call(
                            "greater",
                            vec![threshold_metric(), call("multiply", vec![threshold_value(), lit(4i64)])],
                        ),
                    ],
                ),
            },
        )
        .required(FunctionArg::new(
            "column",
            ArgumentKind::Column {
                allowed: Some(&["user"]),
            },
        ))
        .optional(satisfaction())
        .calculated("tolerated", tolerated)
        .result_type(ResultType::Integer),
        FunctionSpec::new(
            "user_misery",
            Emission::ConditionalTransform {
                condition: "satisfaction",
                matched: misery_score(miserable_users(col("duration"), arg("tolerated"))),
                fallback: misery_score(miserable_users(
                    threshold_metric(),
                    call("multiply", vec![threshold_value(), lit(4i64)]),
                )),
            },
        )
        .optional(satisfaction())
        .optional(number("alpha", Some(0.0), None).with_default(ArgDefault::Raw("5.8875")))
        .optional(number("beta", Some(0.0), None).with_default(ArgDefault::Raw("111.3125")))
        .calculated("tolerated", tolerated)
        .result_type(ResultType::Number),
        FunctionSpec::new(
            "apdex",
            Emission::ConditionalTransform {
                condition: "satisfaction",
                matched: call("apdex", vec![col("duration"), arg("satisfaction")]),
                fallback: call("apdex", vec![threshold_metric(), threshold_value()]),
            },
        )
        .optional(satisfaction())
        .calculated("tolerated", tolerated)
        .result_type(ResultType::Number),
        FunctionSpec::new("failure_rate", Emission::Transform("failure_rate()")).result_type(ResultType::Percentage),
        FunctionSpec::new(
            "failure_count",
            Emission::Aggregate(call(
                "countIf",
                vec![call(
                    "notIn",
                    vec![
                        col("transaction_status"),
                        call("tuple", NON_FAILURE_STATUSES.iter().map(|s| lit(*s)).collect()),
                    ],
                )],
            )),
        )
        .result_type(ResultType::Integer),
        FunctionSpec::new("percentile", Emission::Aggregate(param_call("quantile", vec![arg("percentile")], vec![arg("column")])))
            .required(numeric("column"))
            .required(number("percentile", Some(0.0), Some(1.0)))
            .result_type_from("column")
            .result_type(ResultType::Duration),
        percentile_shortcut("p50", quantile(0.5)),
        percentile_shortcut("p75", quantile(0.75)),
        percentile_shortcut("p95", quantile(0.95)),
        percentile_shortcut("p99", quantile(0.99)),
        percentile_shortcut("p100", call("max", vec![arg("column")])),
        simple_aggregate("min", "min"),
        simple_aggregate("max", "max"),
        simple_aggregate("avg", "avg"),
        simple_aggregate("sum", "sum"),
        FunctionSpec::new("any", Emission::Aggregate(call("min", vec![arg("column")])))
            .required(column("column"))
            .result_type_from("column"),
        FunctionSpec::new("variance", Emission::Aggregate(call("varSamp", vec![arg("column")])))
            .required(numeric("column"))
            .result_type(ResultType::Number),
        FunctionSpec::new("stddev", Emission::Aggregate(call("stddevSamp", vec![arg("column")])))
            .required(numeric("column"))
            .result_type(ResultType::Number),
        FunctionSpec::new("last_seen", Emission::Aggregate(call("max", vec![col("timestamp")])))
            .result_type(ResultType::Date),
        FunctionSpec::new(
            "latest_event",
            Emission::Aggregate(call("argMax", vec![col("event_id"), col("timestamp")])),
        )
        .result_type(ResultType::String),
        FunctionSpec::new(
            "eps",
            Emission::Aggregate(call("divide", vec![call("count", vec![]), arg("interval")])),
        )
        .optional(FunctionArg::new("interval", ArgumentKind::IntervalFromParams).with_default(ArgDefault::WindowSeconds))
        .result_type(ResultType::Number),
        FunctionSpec::new(
            "epm",
            Emission::Aggregate(call(
                "divide",
                vec![call("count", vec![]), call("divide", vec![arg("interval"), lit(60i64)])],
            )),
        )
        .optional(FunctionArg::new("interval", ArgumentKind::IntervalFromParams).with_default(ArgDefault::WindowSeconds))
        .result_type(ResultType::Number),
        FunctionSpec::new(
            "histogram",
            Emission::Column(call(
                "plus",
                vec![
                    call(
                        "multiply",
                        vec![
                            call(
                                "floor",
                                vec![call(
                                    "divide",
                                    vec![
                                        call(
                                            "minus",
                                            vec![
                                                call("multiply", vec![arg("column"), arg("multiplier")]),
                                                arg("start_offset"),
                                            ],
                                        ),
                                        arg("bucket_size"),
                                    ],
                                )],
                            ),
                            arg("bucket_size"),
                        ],
                    ),
                    arg("start_offset"),
                ],
            )),
        )
        .required(numeric("column"))
        .required(integer("bucket_size", Some(1.0)))
        .required(integer("start_offset", None))
        .required(integer("multiplier", Some(1.0)))
        .result_type(ResultType::Number),
        FunctionSpec::new(
            "absolute_delta",
            Emission::Column(call("abs", vec![call("minus", vec![arg("column"), arg("target")])])),
        )
        .required(FunctionArg::new("column", ArgumentKind::DurationColumn))
        .required(number("target", None, None))
        .result_type(ResultType::Duration),
        FunctionSpec::new(
            "to_other",
            Emission::Column(call(
                "if",
                vec![
                    call("equals", vec![arg("column"), arg("value")]),
                    arg("this"),
                    arg("that"),
                ],
            )),
        )
        .required(column("column"))
        .required(string("value"))
        .optional(string("that").with_default(ArgDefault::Raw("others")))
        .optional(string("this").with_default(ArgDefault::Raw("current")))
        .result_type(ResultType::String),
        // Private: only reachable through an access list.
        FunctionSpec::new("array_join", Emission::Column(call("arrayJoin", vec![arg("column")])))
            .required(FunctionArg::new("column", ArgumentKind::StringArrayColumn))
            .result_type(ResultType::String)
            .redundant_grouping()
            .private(),
        FunctionSpec::new(
            "percentile_range",
            Emission::Transform("quantileIf({percentile})({column}, {condition}(timestamp, {middle}))"),
        )
        .required(numeric("column"))
        .required(number("percentile", Some(0.0), Some(1.0)))
        .required(condition())
        .required(FunctionArg::new("middle", ArgumentKind::DateLiteral))
        .result_type_from("column")
        .result_type(ResultType::Duration)
        .private(),
        FunctionSpec::new("avg_range", Emission::Transform("avgIf({column}, {condition}(timestamp, {middle}))"))
            .required(numeric("column"))
            .required(condition())
            .required(FunctionArg::new("middle", ArgumentKind::DateLiteral))
            .result_type_from("column")
            .result_type(ResultType::Duration)
            .private(),
        FunctionSpec::new("count_range", Emission::Transform("countIf({condition}(timestamp, {middle}))"))
            .required(condition())
            .required(FunctionArg::new("middle", ArgumentKind::DateLiteral))
            .result_type(ResultType::Integer)
            .private(),
        FunctionSpec::new(
            "compare_numeric_aggregate",
            Emission::Aggregate(dynamic_call("condition", vec![arg("aggregate_alias"), arg("value")])),
        )
        .required(FunctionArg::new("aggregate_alias", ArgumentKind::FunctionAlias))
        .required(condition())
        .required(number("value", None, None))
        .result_type(ResultType::Number)
        .private(),
        FunctionSpec::new(
            "absolute_correlation",
            Emission::Transform("abs(corr(toUnixTimestamp(timestamp), duration))"),
        )
        .result_type(ResultType::Number)
        .private(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let specs = all();
        let names: HashSet<_> = specs.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), specs.len());
    }

    #[test]
    fn test_every_spec_validates() {
        for spec in all() {
            spec.validate().unwrap_or_else(|e| panic!("{}: {}", spec.name, e));
        }
    }

    #[test]
    fn test_private_set() {
        let private: HashSet<_> = all().into_iter().filter(|s| s.private).map(|s| s.name).collect();
        let expected: HashSet<_> = [
            "array_join",
            "percentile_range",
            "avg_range",
            "count_range",
            "compare_numeric_aggregate",
            "absolute_correlation",
        ]
        .into_iter()
        .collect();
        assert_eq!(private, expected);
    }
}
