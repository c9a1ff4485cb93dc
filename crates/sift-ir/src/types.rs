//! Type system for Sift IR

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of a resolved field or function result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Integer,
    Number,
    Percentage,
    Duration,
    Date,
    String,
    Boolean,
    Array,
}

impl ResultType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ResultType::Integer | ResultType::Number | ResultType::Percentage | ResultType::Duration
        )
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultType::Integer => "integer",
            ResultType::Number => "number",
            ResultType::Percentage => "percentage",
            ResultType::Duration => "duration",
            ResultType::Date => "date",
            ResultType::String => "string",
            ResultType::Boolean => "boolean",
            ResultType::Array => "array",
        };
        f.write_str(name)
    }
}

/// Storage kind of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    String,
    Integer,
    Number,
    Duration,
    Date,
    Boolean,
    Uuid,
    StringArray,
}

impl ColumnKind {
    pub fn result_type(self) -> ResultType {
        match self {
            ColumnKind::String | ColumnKind::Uuid => ResultType::String,
            ColumnKind::Integer => ResultType::Integer,
            ColumnKind::Number => ResultType::Number,
            ColumnKind::Duration => ResultType::Duration,
            ColumnKind::Date => ResultType::Date,
            ColumnKind::Boolean => ResultType::Boolean,
            ColumnKind::StringArray => ResultType::Array,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnKind::Integer | ColumnKind::Number | ColumnKind::Duration
        )
    }

    pub fn is_array(self) -> bool {
        matches!(self, ColumnKind::StringArray)
    }
}
