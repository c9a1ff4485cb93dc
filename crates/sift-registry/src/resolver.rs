//! Field lookup seam used while normalizing column arguments

use sift_ir::{ColumnInfo, ColumnKind, Expr, InvalidQuery, QueryError, Schema};

/// A public field resolved for use inside a function template.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub field: String,
    pub expr: Expr,
    /// Storage kind, when the field maps onto a single known column.
    pub kind: Option<ColumnKind>,
    pub nullable: bool,
    pub is_tag: bool,
}

impl From<ColumnInfo> for ResolvedField {
    fn from(info: ColumnInfo) -> Self {
        Self {
            expr: info.expr(),
            field: info.field,
            kind: Some(info.kind),
            nullable: info.nullable,
            is_tag: info.is_tag,
        }
    }
}

/// Resolve public field names and named alias expressions.
///
/// The query builder implements this on top of its alias catalog so that
/// function arguments such as `user.display` expand the same way a
/// selected column does.
pub trait FieldResolver {
    fn resolve_field(&self, name: &str) -> Result<ResolvedField, QueryError>;

    fn resolve_alias(&self, name: &str) -> Result<Expr, QueryError>;
}

/// Plain schema lookups with no aliases.
pub struct SchemaResolver<'a> {
    schema: &'a Schema,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }
}

impl FieldResolver for SchemaResolver<'_> {
    fn resolve_field(&self, name: &str) -> Result<ResolvedField, QueryError> {
        self.schema.resolve(name).map(ResolvedField::from)
    }

    fn resolve_alias(&self, name: &str) -> Result<Expr, QueryError> {
        Err(InvalidQuery::UnknownField(name.to_string()).into())
    }
}
