//! Adapters between the compiler and an external Datalog query executor.

use crate::ast::{Cardinality, PropertySchema, ResultRecord, ValueType};
use crate::datalog_compiler::CompiledQuery;
use crate::resolver::{LookupError, ReferenceResolver, TitleLookup, UnresolvedReference};
use crate::schema::SchemaLookup;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

/// A Datalog keyword such as `:user.property/rating-Ab1`, leading `:` optional
static KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:?[\w.*+!?<>=-]+(?:/[\w.*+!?<>=-]+)?$").expect("keyword pattern compiles")
});

/// Failure reported by the query executor, distinct from an empty result
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("query execution failed: {0}")]
    Failed(String),
    #[error("unexpected query response: {0}")]
    InvalidResponse(String),
}

/// Runs query text against a named graph.
///
/// Implementations pass the text through untouched; all escaping happens in
/// the compiler.
pub trait QueryExecutor {
    fn execute(&self, graph: &str, query: &str) -> Result<Vec<Value>, ExecutionError>;
}

/// Query for the title of the entity with `uuid`
pub fn title_query(uuid: &str) -> String {
    format!("[:find (pull ?b [:block/title]) :where [?b :block/uuid #uuid \"{uuid}\"]]")
}

/// Query for the schema entity whose `:db/ident` is `ident`.
///
/// Returns `None` when `ident` is not a keyword.
pub fn schema_query(ident: &str) -> Option<String> {
    let ident = ident.trim();
    if !KEYWORD.is_match(ident) {
        return None;
    }
    let keyword = ident.strip_prefix(':').unwrap_or(ident);
    Some(format!("[:find (pull ?p [*]) :where [?p :db/ident :{keyword}]]"))
}

/// A pulled row is either the entity map itself or a one-element tuple of it.
fn row_entity(row: &Value) -> Option<&Map<String, Value>> {
    match row {
        Value::Object(entity) => Some(entity),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    }
}

/// Reads `attribute` with or without the leading `:` of the keyword.
fn attribute<'v>(entity: &'v Map<String, Value>, name: &str) -> Option<&'v Value> {
    entity
        .get(name)
        .or_else(|| entity.get(&format!(":{name}")))
}

/// Title lookup that queries the graph for each uuid
pub struct GraphTitleLookup<'a, E: ?Sized> {
    executor: &'a E,
    graph: &'a str,
}

impl<'a, E: QueryExecutor + ?Sized> GraphTitleLookup<'a, E> {
    pub fn new(executor: &'a E, graph: &'a str) -> Self {
        Self { executor, graph }
    }
}

impl<E: QueryExecutor + ?Sized> TitleLookup for GraphTitleLookup<'_, E> {
    fn lookup_title(&self, uuid: &str) -> Result<Option<String>, LookupError> {
        let rows = self.executor.execute(self.graph, &title_query(uuid))?;
        Ok(rows
            .first()
            .and_then(row_entity)
            .and_then(|entity| attribute(entity, "block/title"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

/// Schema lookup that pulls the property entity from the graph
pub struct GraphSchemaLookup<E: ?Sized> {
    executor: Arc<E>,
    graph: String,
}

impl<E: QueryExecutor + ?Sized> GraphSchemaLookup<E> {
    pub fn new(executor: Arc<E>, graph: impl Into<String>) -> Self {
        Self {
            executor,
            graph: graph.into(),
        }
    }
}

impl<E: QueryExecutor + ?Sized> SchemaLookup for GraphSchemaLookup<E> {
    fn lookup(&self, ident: &str) -> Option<PropertySchema> {
        let Some(query) = schema_query(ident) else {
            tracing::debug!("skipping schema lookup for non-keyword ident {ident:?}");
            return None;
        };
        let rows = match self.executor.execute(&self.graph, &query) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!("schema lookup for {ident} failed: {e}");
                return None;
            }
        };
        let entity = rows.first().and_then(row_entity)?;
        let value_type: ValueType = attribute(entity, "db/valueType")
            .and_then(|v| serde_json::from_value(v.clone()).ok())?;
        let cardinality: Cardinality = attribute(entity, "db/cardinality")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        Some(PropertySchema {
            ident: ident.trim().to_string(),
            value_type,
            cardinality,
        })
    }
}

/// Records returned by one search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Resolved records, at most `limit` of them
    pub records: Vec<ResultRecord>,
    /// Number of records the query matched before the limit was applied
    pub total: usize,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Execute `query`, resolve the references in its records and apply `limit`.
pub fn run_search<E>(
    executor: &E,
    graph: &str,
    query: &CompiledQuery,
    resolver: &ReferenceResolver,
    limit: usize,
) -> Result<SearchOutcome, ExecutionError>
where
    E: QueryExecutor + Sync + ?Sized,
{
    let rows = executor.execute(graph, &query.raw)?;
    let records: Vec<ResultRecord> = rows.iter().filter_map(row_entity).cloned().collect();
    if records.len() != rows.len() {
        tracing::debug!(
            skipped = rows.len() - records.len(),
            "skipped rows without an entity"
        );
    }

    let lookup = GraphTitleLookup::new(executor, graph);
    let outcome = resolver.resolve(&records, &lookup);
    let total = outcome.records.len();
    let mut resolved = outcome.records;
    resolved.truncate(limit);

    Ok(SearchOutcome {
        records: resolved,
        total,
        unresolved: outcome.unresolved,
    })
}
