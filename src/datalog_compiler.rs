//! Datalog compiler that turns a filter tree into a `:find`/`:where` query.

use crate::ast::{FilterNode, GroupNode, MatchMode, Node};
use crate::clause::{ClauseBuilder, VariableScope};
use crate::entity::resolve_entity_type;
use crate::schema::SchemaLookup;
use crate::validate::is_valid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for clause generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Match the schema-less property `contains` operator case-insensitively.
    /// `false` keeps the host application's case-sensitive `includes?` form.
    pub case_insensitive_property_contains: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            case_insensitive_property_contains: true,
        }
    }
}

/// Result of compiling a filter tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledQuery {
    /// Standalone query text, handed to the query executor
    pub raw: String,
    /// The same query wrapped in `{:query ...}` for copy/paste into the host app
    pub wrapped: String,
}

/// Compiles filter trees into Datalog queries
#[derive(Clone, Default)]
pub struct DatalogCompiler {
    config: CompilerConfig,
    schema: Option<Arc<dyn SchemaLookup + Send + Sync>>,
}

impl DatalogCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        Self {
            config,
            schema: None,
        }
    }

    /// Set the schema lookup used for property filters without an attached schema
    pub fn set_schema_lookup(&mut self, lookup: Arc<dyn SchemaLookup + Send + Sync>) {
        self.schema = Some(lookup);
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    fn clause_builder(&self) -> ClauseBuilder<'_> {
        let builder = ClauseBuilder::new(self.config.case_insensitive_property_contains);
        match &self.schema {
            Some(schema) => builder.with_schema(schema.as_ref()),
            None => builder,
        }
    }

    /// Compile a filter tree. Returns `None` when the root is not a group or no
    /// filter in the tree produces a clause.
    pub fn compile(&self, root: &Node) -> Option<CompiledQuery> {
        match root {
            Node::Group(group) => self.compile_group(group),
            Node::Filter(_) => None,
        }
    }

    /// Compile a filter tree rooted at `root`
    pub fn compile_group(&self, root: &GroupNode) -> Option<CompiledQuery> {
        let all_filters = flatten_group(root);
        if all_filters.is_empty() {
            return None;
        }

        let valid_filters: Vec<&FilterNode> =
            all_filters.into_iter().filter(|f| is_valid(f)).collect();
        if valid_filters.is_empty() {
            return None;
        }

        let entity_type = resolve_entity_type(valid_filters.iter().copied());
        let entity_var = entity_type.variable();

        let builder = self.clause_builder();
        let where_section = combine_group(&builder, root, entity_var, &mut VariableScope::new())?;

        tracing::debug!(
            entity = ?entity_type,
            filters = valid_filters.len(),
            "compiled filter tree"
        );

        let find_clause = format!("(pull {entity_var} [*])");
        let raw = format!("[:find {find_clause}\n :where\n {where_section}]");
        let wrapped = format!("{{:query\n [:find {find_clause}\n  :where\n  {where_section}]}}");

        Some(CompiledQuery { raw, wrapped })
    }

    /// Combine the children of `group` into one clause bound to `entity_var`
    pub fn combine(&self, group: &GroupNode, entity_var: &str) -> Option<String> {
        combine_group(&self.clause_builder(), group, entity_var, &mut VariableScope::new())
    }
}

/// Collect every filter leaf of a tree, in document order
pub fn flatten_filters(node: &Node) -> Vec<&FilterNode> {
    match node {
        Node::Group(group) => flatten_group(group),
        Node::Filter(filter) => vec![filter],
    }
}

fn flatten_group(group: &GroupNode) -> Vec<&FilterNode> {
    let mut filters = Vec::new();
    collect_filters(group, &mut filters);
    filters
}

/// Recursively collect filter leaves
fn collect_filters<'a>(group: &'a GroupNode, filters: &mut Vec<&'a FilterNode>) {
    for child in &group.children {
        match child {
            Node::Group(inner) => collect_filters(inner, filters),
            Node::Filter(filter) => filters.push(filter),
        }
    }
}

/// Every clause of one query draws its helper variables from `vars`.
fn combine_group(
    builder: &ClauseBuilder<'_>,
    group: &GroupNode,
    entity_var: &str,
    vars: &mut VariableScope,
) -> Option<String> {
    let mut clauses = Vec::new();
    for child in &group.children {
        let clause = match child {
            Node::Group(inner) => combine_group(builder, inner, entity_var, vars),
            Node::Filter(filter) if is_valid(filter) => builder.build_scoped(filter, entity_var, vars),
            Node::Filter(_) => None,
        };
        clauses.extend(clause);
    }

    if clauses.is_empty() {
        return None;
    }

    let combined = match group.match_mode {
        MatchMode::All => combine_with_and(&clauses),
        MatchMode::Any => combine_with_or(&clauses, entity_var),
        MatchMode::None => combine_with_not(&clauses, entity_var),
    };
    Some(combined)
}

/// Sequential clauses are an implicit conjunction
fn combine_with_and(clauses: &[String]) -> String {
    clauses.join("\n ")
}

/// Combine clauses with an `or-join`, each clause set wrapped in one `and` branch
fn combine_with_or(clauses: &[String], entity_var: &str) -> String {
    if let [single] = clauses {
        return single.clone();
    }

    let branches: Vec<String> = clauses
        .iter()
        .map(|clause| {
            let lines: Vec<String> = clause.split('\n').map(|line| format!("  {line}")).collect();
            format!("(and\n{})", lines.join("\n"))
        })
        .collect();

    format!("(or-join [{entity_var}]\n {})", branches.join("\n "))
}

/// Exclude entities matching all of `clauses` together.
///
/// The entity variable is bound outside the `not-join` so the negation has a
/// set to subtract from.
fn combine_with_not(clauses: &[String], entity_var: &str) -> String {
    let combined = combine_with_and(clauses);
    format!("[{entity_var} :block/uuid]\n (not-join [{entity_var}]\n  {combined})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::schema::StaticSchemaLookup;
    use serde_json::json;
    use std::collections::HashMap;

    fn filter(node: FilterNode) -> Node {
        Node::Filter(node)
    }

    fn group(match_mode: MatchMode, children: Vec<Node>) -> Node {
        Node::Group(GroupNode::new(match_mode, children))
    }

    fn tag(value: &str) -> Node {
        filter(FilterNode::Tags(TagFilter {
            value: value.into(),
            include_extensions: false,
        }))
    }

    fn page_is(value: &str) -> Node {
        filter(FilterNode::Page(PageFilter {
            operator: PageOperator::Is,
            value: value.into(),
        }))
    }

    #[test]
    fn test_no_valid_filters_compiles_to_none() {
        let compiler = DatalogCompiler::new();

        assert_eq!(compiler.compile(&group(MatchMode::All, vec![])), None);
        assert_eq!(
            compiler.compile(&group(MatchMode::All, vec![tag("  "), filter(FilterNode::Unknown)])),
            None
        );
        assert_eq!(
            compiler.compile(&group(MatchMode::Any, vec![group(MatchMode::None, vec![tag("")])])),
            None
        );
    }

    #[test]
    fn test_unreadable_filter_drops_out_of_its_group() {
        let tree: Node = serde_json::from_value(json!({
            "type": "group",
            "matchMode": "all",
            "children": [
                { "kind": "page", "operator": null, "value": "x" },
                { "kind": "page", "operator": "matches", "value": "x" },
                { "kind": "property", "propertyName": "status", "operator": "is", "value": null },
                { "kind": "tags", "value": "work" }
            ]
        }))
        .unwrap();

        let query = DatalogCompiler::new().compile(&tree).unwrap();
        assert_eq!(
            query.raw,
            "[:find (pull ?p [*])\n :where\n [?p :block/tags ?t]\n [?t :block/title \"work\"]]"
        );
    }

    #[test]
    fn test_group_without_children_is_empty() {
        let tree: Node = serde_json::from_value(json!({ "type": "group" })).unwrap();
        assert_eq!(tree, Node::Group(GroupNode::default()));
        assert_eq!(DatalogCompiler::new().compile(&tree), None);

        let nested: Node = serde_json::from_value(json!({
            "type": "group",
            "matchMode": "any",
            "children": [{ "type": "group", "matchMode": "none" }, { "kind": "tags", "value": "work" }]
        }))
        .unwrap();
        let query = DatalogCompiler::new().compile(&nested).unwrap();
        assert!(query.raw.ends_with("[?b :block/tags ?t]\n [?t :block/title \"work\"]]"));
    }

    #[test]
    fn test_root_must_be_group() {
        let compiler = DatalogCompiler::new();
        assert_eq!(compiler.compile(&tag("work")), None);
    }

    #[test]
    fn test_unparseable_filters_drop_out() {
        let compiler = DatalogCompiler::new();
        let broken_range = filter(FilterNode::Between(BetweenFilter {
            start_date: "soon".to_string(),
            end_date: "later".to_string(),
            ..Default::default()
        }));

        // Valid but unparseable: nothing survives.
        assert_eq!(compiler.compile(&group(MatchMode::All, vec![broken_range.clone()])), None);

        // The rest of the group still compiles.
        let query = compiler
            .compile(&group(MatchMode::All, vec![broken_range, tag("work")]))
            .unwrap();
        assert!(query.raw.contains("[?t :block/title \"work\"]"));
        assert!(!query.raw.contains("?date"));
    }

    #[test]
    fn test_page_is_query() {
        let query = DatalogCompiler::new()
            .compile(&group(MatchMode::All, vec![page_is("Foo")]))
            .unwrap();
        assert_eq!(
            query.raw,
            "[:find (pull ?p [*])\n :where\n [?p :block/name \"Foo\"]]"
        );
        assert_eq!(
            query.wrapped,
            "{:query\n [:find (pull ?p [*])\n  :where\n  [?p :block/name \"Foo\"]]}"
        );
        assert!(!query.raw.contains("re-pattern"));
    }

    #[test]
    fn test_full_text_treats_dot_literally() {
        let query = DatalogCompiler::new()
            .compile(&group(
                MatchMode::All,
                vec![filter(FilterNode::FullText(FullTextFilter {
                    operator: FullTextOperator::Contains,
                    value: "a.b".into(),
                }))],
            ))
            .unwrap();

        // The string literal decodes to `(?i)a\.b`.
        assert!(query.raw.contains("(re-pattern \"(?i)a\\\\.b\")"));
        let decoded = regex::Regex::new("(?i)a\\.b").unwrap();
        assert!(decoded.is_match("xa.bx"));
        assert!(!decoded.is_match("axb"));
    }

    #[test]
    fn test_any_group_builds_or_join() {
        let query = DatalogCompiler::new()
            .compile(&group(MatchMode::Any, vec![tag("work"), tag("home")]))
            .unwrap();
        assert_eq!(
            query.raw,
            "[:find (pull ?b [*])\n :where\n (or-join [?b]\n (and\n  [?b :block/tags ?t]\n   [?t :block/title \"work\"])\n (and\n  [?b :block/tags ?t_2]\n   [?t_2 :block/title \"home\"]))]"
        );
        assert_eq!(query.raw.matches("(and").count(), 2);
    }

    #[test]
    fn test_any_group_with_single_survivor_is_unwrapped() {
        let query = DatalogCompiler::new()
            .compile(&group(MatchMode::Any, vec![tag("work"), tag(" ")]))
            .unwrap();
        assert!(!query.raw.contains("or-join"));
        assert!(query.raw.contains("[?b :block/tags ?t]"));
    }

    #[test]
    fn test_none_group_builds_not_join() {
        let query = DatalogCompiler::new()
            .compile(&group(MatchMode::None, vec![tag("archived")]))
            .unwrap();
        assert_eq!(
            query.raw,
            "[:find (pull ?b [*])\n :where\n [?b :block/uuid]\n (not-join [?b]\n  [?b :block/tags ?t]\n [?t :block/title \"archived\"])]"
        );
    }

    #[test]
    fn test_none_negates_conjunction_of_children() {
        let where_clause = DatalogCompiler::new()
            .combine(
                &GroupNode::new(MatchMode::None, vec![tag("a"), tag("b")]),
                "?b",
            )
            .unwrap();
        assert_eq!(where_clause.matches("not-join").count(), 1);
        assert!(where_clause.starts_with("[?b :block/uuid]"));
    }

    #[test]
    fn test_nested_groups() {
        let tree = group(
            MatchMode::All,
            vec![
                tag("work"),
                group(MatchMode::Any, vec![page_is("Alpha"), page_is("Beta")]),
                group(MatchMode::All, vec![]),
            ],
        );
        let query = DatalogCompiler::new().compile(&tree).unwrap();
        assert!(query.raw.starts_with("[:find (pull ?p [*])"));
        assert!(query.raw.contains("[?p :block/tags ?t]"));
        assert!(query.raw.contains("(or-join [?p]"));
        assert!(query.raw.contains("  [?p :block/name \"Alpha\"]"));
    }

    #[test]
    fn test_tags_and_between_end_to_end() {
        let tree: Node = serde_json::from_value(json!({
            "type": "group",
            "matchMode": "all",
            "children": [
                { "kind": "tags", "value": "work", "includeExtensions": false },
                {
                    "kind": "between",
                    "startDate": "2024-01-01",
                    "endDate": "2024-01-31",
                    "dateProperty": "created-at"
                }
            ]
        }))
        .unwrap();

        let query = DatalogCompiler::new().compile(&tree).unwrap();
        assert_eq!(
            query.raw,
            "[:find (pull ?b [*])\n :where\n [?b :block/tags ?t]\n [?t :block/title \"work\"]\n [?b :block/created-at ?date]\n [(>= ?date 1704067200000)]\n [(<= ?date 1706659200000)]]"
        );
    }

    #[test]
    fn test_task_end_to_end() {
        let tree: Node = serde_json::from_value(json!({
            "type": "group",
            "matchMode": "all",
            "children": [{
                "kind": "task",
                "value": ["Todo", "Doing"],
                "includeExtensions": false,
                "includeAllStatusProperties": false
            }]
        }))
        .unwrap();

        let query = DatalogCompiler::new().compile(&tree).unwrap();
        assert!(query.raw.contains(
            "[?b :block/tags ?t]\n [?t :block/title \"Task\"]\n [?b :logseq.property/status ?status]\n (or [?status :block/title \"Todo\"]\n [?status :block/title \"Doing\"])"
        ));
    }

    #[test]
    fn test_tags_and_task_bind_separate_tag_variables() {
        let tree: Node = serde_json::from_value(json!({
            "matchMode": "all",
            "children": [
                { "kind": "tags", "value": "work" },
                { "kind": "task", "value": "Todo" }
            ]
        }))
        .unwrap();

        let query = DatalogCompiler::new().compile(&tree).unwrap();
        assert_eq!(
            query.raw,
            "[:find (pull ?b [*])\n :where\n [?b :block/tags ?t]\n [?t :block/title \"work\"]\n [?b :block/tags ?t_2]\n [?t_2 :block/title \"Task\"]\n [?b :logseq.property/status ?status]\n [?status :block/title \"Todo\"]]"
        );
    }

    #[test]
    fn test_two_tags_under_all_bind_separate_variables() {
        let where_clause = DatalogCompiler::new()
            .combine(
                &GroupNode::new(MatchMode::All, vec![tag("work"), tag("urgent")]),
                "?b",
            )
            .unwrap();
        assert_eq!(
            where_clause,
            "[?b :block/tags ?t]\n [?t :block/title \"work\"]\n [?b :block/tags ?t_2]\n [?t_2 :block/title \"urgent\"]"
        );
    }

    #[test]
    fn test_variables_stay_distinct_across_nested_groups() {
        let due = filter(FilterNode::Property(PropertyFilter {
            property_name: "due".to_string(),
            property_schema: Some(PropertySchema {
                ident: ":user.property/due".to_string(),
                value_type: ValueType::Instant,
                cardinality: Cardinality::One,
            }),
            operator: PropertyOperator::Lt,
            value: "2024-02-01".into(),
            ..Default::default()
        }));
        let range = filter(FilterNode::Between(BetweenFilter {
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-31".to_string(),
            ..Default::default()
        }));
        let tree = group(
            MatchMode::All,
            vec![range, group(MatchMode::All, vec![due, tag("work")])],
        );

        let query = DatalogCompiler::new().compile(&tree).unwrap();
        assert!(query.raw.contains("[?b :block/created-at ?date]"));
        assert!(query.raw.contains("[?b :user.property/due ?date_2]\n [(< ?date_2 1706745600000)]"));
        assert_eq!(query.raw.matches("[?b :block/tags ?t]").count(), 1);
    }

    #[test]
    fn test_schema_lookup_is_consulted() {
        let mut schemas = HashMap::new();
        schemas.insert(
            "rating".to_string(),
            PropertySchema {
                ident: ":user.property/rating".to_string(),
                value_type: ValueType::Number,
                cardinality: Cardinality::One,
            },
        );
        let mut compiler = DatalogCompiler::new();
        compiler.set_schema_lookup(Arc::new(StaticSchemaLookup::new(schemas)));

        let query = compiler
            .compile(&group(
                MatchMode::All,
                vec![filter(FilterNode::Property(PropertyFilter {
                    property_name: "rating".to_string(),
                    operator: PropertyOperator::Gte,
                    value: "4".into(),
                    ..Default::default()
                }))],
            ))
            .unwrap();
        assert!(query.raw.contains("[(>= ?num 4)]"));
    }

    #[test]
    fn test_flatten_filters_in_order() {
        let tree = group(
            MatchMode::All,
            vec![tag("a"), group(MatchMode::None, vec![tag("b"), group(MatchMode::Any, vec![tag("c")])])],
        );
        let titles: Vec<&str> = flatten_filters(&tree)
            .into_iter()
            .filter_map(|f| match f {
                FilterNode::Tags(t) => t.value.as_single(),
                _ => None,
            })
            .collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }
}
