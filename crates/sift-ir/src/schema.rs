//! Events dataset schema: public field names and their storage columns

use crate::{ColumnKind, Expr, InvalidQuery, QueryError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDef {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

const fn field(name: &'static str, column: &'static str, kind: ColumnKind, nullable: bool) -> FieldDef {
    FieldDef {
        name,
        column,
        kind,
        nullable,
    }
}

const EVENT_FIELDS: &[FieldDef] = &[
    field("id", "event_id", ColumnKind::Uuid, false),
    field("project.id", "project_id", ColumnKind::Integer, false),
    field("timestamp", "timestamp", ColumnKind::Date, false),
    field("time", "time", ColumnKind::Date, false),
    field("event.type", "type", ColumnKind::String, false),
    field("type", "type", ColumnKind::String, false),
    field("message", "message", ColumnKind::String, false),
    field("title", "title", ColumnKind::String, false),
    field("culprit", "culprit", ColumnKind::String, true),
    field("location", "location", ColumnKind::String, true),
    field("platform", "platform", ColumnKind::String, true),
    field("environment", "environment", ColumnKind::String, true),
    field("release", "release", ColumnKind::String, true),
    field("dist", "dist", ColumnKind::String, true),
    field("user", "user", ColumnKind::String, true),
    field("user.id", "user_id", ColumnKind::String, true),
    field("user.email", "user_email", ColumnKind::String, true),
    field("user.username", "user_name", ColumnKind::String, true),
    field("user.ip", "ip_address", ColumnKind::String, true),
    field("sdk.name", "sdk_name", ColumnKind::String, true),
    field("sdk.version", "sdk_version", ColumnKind::String, true),
    field("http.method", "http_method", ColumnKind::String, true),
    field("http.referer", "http_referer", ColumnKind::String, true),
    field("transaction", "transaction_name", ColumnKind::String, false),
    field("transaction.duration", "duration", ColumnKind::Duration, false),
    field("transaction.op", "transaction_op", ColumnKind::String, true),
    field("transaction.status", "transaction_status", ColumnKind::Integer, false),
    field("issue.id", "group_id", ColumnKind::Integer, false),
    field("trace", "trace_id", ColumnKind::Uuid, true),
    field("trace.span", "span_id", ColumnKind::String, true),
    field("trace.parent_span", "parent_span_id", ColumnKind::String, true),
    field("error.type", "exception_stacks.type", ColumnKind::StringArray, false),
    field("error.value", "exception_stacks.value", ColumnKind::StringArray, false),
    field("error.mechanism", "exception_stacks.mechanism_type", ColumnKind::StringArray, false),
    field("error.handled", "exception_stacks.mechanism_handled", ColumnKind::StringArray, false),
    field("stack.filename", "exception_frames.filename", ColumnKind::StringArray, false),
    field("stack.function", "exception_frames.function", ColumnKind::StringArray, false),
    field("tags.key", "tags.key", ColumnKind::StringArray, false),
    field("tags.value", "tags.value", ColumnKind::StringArray, false),
];

/// Measurements reported without a unit; everything else is milliseconds.
const UNITLESS_MEASUREMENTS: &[&str] = &["cls", "frames_total", "frames_slow", "frames_frozen", "stall_count"];

/// A public field resolved to its storage column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    /// The name the user typed.
    pub field: String,
    pub column: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub is_tag: bool,
}

impl ColumnInfo {
    pub fn expr(&self) -> Expr {
        Expr::column(&self.column)
    }

    pub fn is_array(&self) -> bool {
        self.kind.is_array()
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// The discover events dataset.
    pub fn events() -> Self {
        Self::new(EVENT_FIELDS.to_vec())
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a public field name to a column.
    ///
    /// Names not in the schema fall back to measurements, span-op breakdowns
    /// and finally tags; anything that can't be a tag key is rejected.
    pub fn resolve(&self, name: &str) -> Result<ColumnInfo, QueryError> {
        if let Some(def) = self.find_field(name) {
            return Ok(ColumnInfo {
                field: name.to_string(),
                column: def.column.to_string(),
                kind: def.kind,
                nullable: def.nullable,
                is_tag: false,
            });
        }

        if let Some(measurement) = name.strip_prefix("measurements.") {
            if measurement.is_empty() || !is_tag_key(measurement) {
                return Err(InvalidQuery::UnknownField(name.to_string()).into());
            }
            let kind = if UNITLESS_MEASUREMENTS.contains(&measurement) {
                ColumnKind::Number
            } else {
                ColumnKind::Duration
            };
            return Ok(ColumnInfo {
                field: name.to_string(),
                column: format!("measurements[{}]", measurement.to_lowercase()),
                kind,
                nullable: true,
                is_tag: false,
            });
        }

        if let Some(op) = name.strip_prefix("spans.") {
            if op.is_empty() || !is_tag_key(op) {
                return Err(InvalidQuery::UnknownField(name.to_string()).into());
            }
            let key = if op == "total.time" {
                op.to_string()
            } else {
                format!("ops.{}", op)
            };
            return Ok(ColumnInfo {
                field: name.to_string(),
                column: format!("span_op_breakdowns[{}]", key),
                kind: ColumnKind::Duration,
                nullable: true,
                is_tag: false,
            });
        }

        let tag = name
            .strip_prefix("tags[")
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(name);
        if !tag.is_empty() && is_tag_key(tag) {
            return Ok(ColumnInfo {
                field: name.to_string(),
                column: format!("tags[{}]", tag),
                kind: ColumnKind::String,
                nullable: true,
                is_tag: true,
            });
        }

        Err(InvalidQuery::UnknownField(name.to_string()).into())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::events()
    }
}

fn is_tag_key(key: &str) -> bool {
    key.len() <= 200
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-' | '@'))
}
