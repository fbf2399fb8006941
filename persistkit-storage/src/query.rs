//! Predicates, ordering, and pagination for [`Store::filter`](crate::Store::filter).
//!
//! Predicates may reference the primary key, indexed columns, and the two
//! timestamp columns. Everything compiles to parameterized SQL.

use crate::error::{StorageError, StorageResult};
use crate::schema::{quote, Column, ColumnRole, CompiledSchema};
use crate::store::StoredEntity;
use persistkit_model::Record;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default page size for [`FilterOptions`].
pub const DEFAULT_FILTER_LIMIT: usize = 10;

/// Default page size for [`ListQuery`].
pub const DEFAULT_LIST_LIMIT: usize = 100;

// ============================================================================
// Predicate
// ============================================================================

/// A composable boolean condition over physical columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Lt(String, Value),
    Le(String, Value),
    /// SQL `LIKE` pattern, case-insensitive for ASCII.
    Like(String, String),
    In(String, Vec<Value>),
    IsNull(String),
    IsNotNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Case-insensitive substring match across the searchable columns.
    Search(String),
}

impl Predicate {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::Eq(column.to_string(), value.into())
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Self {
        Self::Ne(column.to_string(), value.into())
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Self::Gt(column.to_string(), value.into())
    }

    pub fn ge(column: &str, value: impl Into<Value>) -> Self {
        Self::Ge(column.to_string(), value.into())
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Self::Lt(column.to_string(), value.into())
    }

    pub fn le(column: &str, value: impl Into<Value>) -> Self {
        Self::Le(column.to_string(), value.into())
    }

    pub fn like(column: &str, pattern: &str) -> Self {
        Self::Like(column.to_string(), pattern.to_string())
    }

    pub fn is_in<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: &str) -> Self {
        Self::IsNull(column.to_string())
    }

    pub fn is_not_null(column: &str) -> Self {
        Self::IsNotNull(column.to_string())
    }

    pub fn search(text: &str) -> Self {
        Self::Search(text.to_string())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Renders the predicate as a SQL expression, pushing bound values.
    pub(crate) fn to_sql(
        &self,
        schema: &CompiledSchema,
        params: &mut Vec<SqlValue>,
    ) -> StorageResult<String> {
        let compare = |column: &str, value: &Value, op: &str, params: &mut Vec<SqlValue>| {
            let col = filterable(schema, column)?;
            params.push(col.column_type.to_sql(column, value)?);
            Ok::<_, StorageError>(format!("{} {op} ?", quote(column)))
        };

        Ok(match self {
            Self::Eq(c, Value::Null) => format!("{} IS NULL", quote(&filterable(schema, c)?.name)),
            Self::Ne(c, Value::Null) => {
                format!("{} IS NOT NULL", quote(&filterable(schema, c)?.name))
            }
            Self::Eq(c, v) => compare(c, v, "=", params)?,
            Self::Ne(c, v) => compare(c, v, "<>", params)?,
            Self::Gt(c, v) => compare(c, v, ">", params)?,
            Self::Ge(c, v) => compare(c, v, ">=", params)?,
            Self::Lt(c, v) => compare(c, v, "<", params)?,
            Self::Le(c, v) => compare(c, v, "<=", params)?,
            Self::Like(c, pattern) => {
                let col = filterable(schema, c)?;
                params.push(SqlValue::Text(pattern.clone()));
                format!("{} LIKE ?", quote(&col.name))
            }
            Self::In(c, values) => {
                let col = filterable(schema, c)?;
                if values.is_empty() {
                    return Ok("0 = 1".to_string());
                }
                for v in values {
                    params.push(col.column_type.to_sql(c, v)?);
                }
                let marks = vec!["?"; values.len()].join(", ");
                format!("{} IN ({marks})", quote(&col.name))
            }
            Self::IsNull(c) => format!("{} IS NULL", quote(&filterable(schema, c)?.name)),
            Self::IsNotNull(c) => format!("{} IS NOT NULL", quote(&filterable(schema, c)?.name)),
            Self::And(parts) => join(parts, " AND ", "1 = 1", schema, params)?,
            Self::Or(parts) => join(parts, " OR ", "0 = 1", schema, params)?,
            Self::Not(inner) => format!("NOT ({})", inner.to_sql(schema, params)?),
            Self::Search(text) => search_sql(schema, text, params),
        })
    }
}

fn join(
    parts: &[Predicate],
    sep: &str,
    empty: &str,
    schema: &CompiledSchema,
    params: &mut Vec<SqlValue>,
) -> StorageResult<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let rendered = parts
        .iter()
        .map(|p| p.to_sql(schema, params).map(|sql| format!("({sql})")))
        .collect::<StorageResult<Vec<_>>>()?;
    Ok(rendered.join(sep))
}

fn search_sql(schema: &CompiledSchema, text: &str, params: &mut Vec<SqlValue>) -> String {
    let columns = schema.searchable_columns();
    if columns.is_empty() {
        return "0 = 1".to_string();
    }
    let pattern = format!("%{}%", escape_like(text));
    let clauses: Vec<String> = columns
        .iter()
        .map(|c| {
            params.push(SqlValue::Text(pattern.clone()));
            format!("{} LIKE ? ESCAPE '\\'", quote(c))
        })
        .collect();
    format!("({})", clauses.join(" OR "))
}

/// Escapes `LIKE` wildcards so user text matches literally.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Looks up a column a predicate or ordering may reference.
fn filterable<'a>(schema: &'a CompiledSchema, column: &str) -> StorageResult<&'a Column> {
    match schema.column(column) {
        Some(col) if col.role != ColumnRole::Overflow => Ok(col),
        _ => Err(StorageError::Validation(format!(
            "{} has no filterable column '{column}'",
            schema.entity
        ))),
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: Direction::Desc,
        }
    }

    /// Parses `"col"` (ascending) or `"-col"` (descending).
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        match spec.strip_prefix('-') {
            Some(column) => Self::desc(column.trim()),
            None => Self::asc(spec.strip_prefix('+').unwrap_or(spec)),
        }
    }
}

/// `ORDER BY` clause with the primary key appended as the final tie-break.
pub(crate) fn order_sql(schema: &CompiledSchema, order: &[OrderBy]) -> StorageResult<String> {
    let pk = &schema.primary_key().name;
    let mut terms = Vec::with_capacity(order.len() + 1);
    for o in order {
        let col = filterable(schema, &o.column)?;
        let dir = match o.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        terms.push(format!("{} {dir}", quote(&col.name)));
    }
    if !order.iter().any(|o| &o.column == pk) {
        terms.push(format!("{} ASC", quote(pk)));
    }
    Ok(terms.join(", "))
}

// ============================================================================
// Filter options / results
// ============================================================================

/// Options for [`Store::filter`](crate::Store::filter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    pub predicate: Option<Predicate>,
    pub order: Vec<OrderBy>,
    pub skip: usize,
    /// `None` returns every matching row.
    pub limit: Option<usize>,
    /// When false no count query runs and `total` is 0.
    pub include_total: bool,
    /// Return raw column maps instead of reconstructed entities.
    pub project_columns_only: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            predicate: None,
            order: Vec::new(),
            skip: 0,
            limit: Some(DEFAULT_FILTER_LIMIT),
            include_total: true,
            project_columns_only: true,
        }
    }
}

impl FilterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn include_total(mut self, include_total: bool) -> Self {
        self.include_total = include_total;
        self
    }

    pub fn entities(mut self) -> Self {
        self.project_columns_only = false;
        self
    }
}

/// One row of a filter result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterItem {
    /// Column name to value, overflow excluded.
    Columns(Map<String, Value>),
    Entity(StoredEntity),
}

impl FilterItem {
    pub fn as_entity(&self) -> Option<&StoredEntity> {
        match self {
            Self::Entity(e) => Some(e),
            Self::Columns(_) => None,
        }
    }

    pub fn as_columns(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Columns(c) => Some(c),
            Self::Entity(_) => None,
        }
    }

    pub fn into_entity(self) -> Option<StoredEntity> {
        match self {
            Self::Entity(e) => Some(e),
            Self::Columns(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterResult {
    pub items: Vec<FilterItem>,
    pub total: usize,
    pub skip: usize,
    pub limit: Option<usize>,
    pub fetched: usize,
}

impl FilterResult {
    pub(crate) fn empty(options: &FilterOptions, total: usize) -> Self {
        Self {
            items: Vec::new(),
            total,
            skip: options.skip,
            limit: options.limit,
            fetched: 0,
        }
    }
}

// ============================================================================
// List query
// ============================================================================

/// Simple listing: equality filters, optional search, one ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub filters: Record,
    pub search: Option<String>,
    /// `"field"` or `"-field"`.
    pub order_by: Option<String>,
    pub skip: usize,
    pub limit: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filters: Record::new(),
            search: None,
            order_by: None,
            skip: 0,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.insert(column.to_string(), value.into());
        self
    }

    pub fn search(mut self, text: &str) -> Self {
        self.search = Some(text.to_string());
        self
    }

    pub fn order_by(mut self, spec: &str) -> Self {
        self.order_by = Some(spec.to_string());
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub(crate) fn to_filter_options(&self) -> FilterOptions {
        let mut parts: Vec<Predicate> = self
            .filters
            .iter()
            .map(|(k, v)| Predicate::Eq(k.clone(), v.clone()))
            .collect();
        if let Some(text) = self.search.as_deref().filter(|t| !t.is_empty()) {
            parts.push(Predicate::search(text));
        }
        FilterOptions {
            predicate: (!parts.is_empty()).then_some(Predicate::And(parts)),
            order: self.order_by.as_deref().map(OrderBy::parse).into_iter().collect(),
            skip: self.skip,
            limit: Some(self.limit),
            include_total: true,
            project_columns_only: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn parse_order_direction() {
        assert_eq!(OrderBy::parse("-name"), OrderBy::desc("name"));
        assert_eq!(OrderBy::parse("name"), OrderBy::asc("name"));
        assert_eq!(OrderBy::parse("+name"), OrderBy::asc("name"));
    }

    #[test]
    fn and_flattens() {
        let p = Predicate::eq("a", 1).and(Predicate::eq("b", 2)).and(Predicate::eq("c", 3));
        assert!(matches!(p, Predicate::And(ref parts) if parts.len() == 3));
    }
}
