//! Translates a single validated filter into Datalog `:where` clauses.
//!
//! Every filter kind has its own builder. A builder returns `None` when a value
//! cannot be parsed (a number, a date); the filter then drops out of its group
//! instead of failing the whole compilation.

use crate::ast::{
    BetweenFilter, FilterNode, FilterValue, FullTextFilter, FullTextOperator, PageFilter,
    PageOperator, PageReferenceFilter, PriorityFilter, PropertyFilter, PropertyOperator,
    PropertySchema, TagFilter, TaskFilter, ValueType,
};
use crate::escape::{escape_literal, regex_pattern_literal};
use crate::schema::SchemaLookup;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// Title of the built-in task class.
const TASK_CLASS: &str = "Task";

const USER_PROPERTY_NAMESPACE: &str = ":user.property";
const BUILTIN_PROPERTY_NAMESPACE: &str = ":logseq.property";

/// Hands out logic variable names for one query.
///
/// Names are unique across every clause built with the same scope: the first
/// request for a name gets it bare (`?t`), later ones get a suffix (`?t_2`).
#[derive(Debug, Default)]
pub struct VariableScope {
    issued: HashMap<&'static str, usize>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A variable named after `base` that no earlier request received.
    pub fn fresh(&mut self, base: &'static str) -> String {
        let count = self.issued.entry(base).or_insert(0);
        *count += 1;
        match *count {
            1 => format!("?{base}"),
            n => format!("?{base}_{n}"),
        }
    }
}

/// Builds the clause text for one filter.
pub struct ClauseBuilder<'a> {
    case_insensitive_contains: bool,
    schema: Option<&'a dyn SchemaLookup>,
}

impl Default for ClauseBuilder<'_> {
    fn default() -> Self {
        Self::new(true)
    }
}

/// How a property filter is matched once its schema is known.
#[derive(Debug, Clone, PartialEq)]
enum PropertyPlan<'f> {
    Boolean { keyword: String },
    Ref { keyword: String },
    Number { keyword: String },
    Instant { keyword: String },
    /// No usable schema: probe the user and built-in namespaces by name.
    NamespaceProbe { name: &'f str },
}

impl<'a> ClauseBuilder<'a> {
    /// `case_insensitive_contains` selects regex matching for the schema-less
    /// property `contains` operator; `false` emits `clojure.string/includes?`.
    pub fn new(case_insensitive_contains: bool) -> Self {
        Self {
            case_insensitive_contains,
            schema: None,
        }
    }

    /// Consults `schema` for property filters that carry no schema of their own.
    pub fn with_schema(mut self, schema: &'a dyn SchemaLookup) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Build the clause for `filter` on its own, binding matches to `entity_var`.
    pub fn build(&self, filter: &FilterNode, entity_var: &str) -> Option<String> {
        self.build_scoped(filter, entity_var, &mut VariableScope::new())
    }

    /// Build the clause for `filter`, drawing helper variables from `vars` so
    /// that it can be joined with the other clauses of the same query.
    pub fn build_scoped(&self, filter: &FilterNode, entity_var: &str, vars: &mut VariableScope) -> Option<String> {
        let clause = match filter {
            FilterNode::Page(f) => build_page(f, entity_var, vars),
            FilterNode::Tags(f) => build_tags(f, entity_var, vars),
            FilterNode::FullText(f) => build_full_text(f, entity_var, vars),
            FilterNode::Property(f) => self.build_property(f, entity_var, vars),
            FilterNode::PageReference(f) => build_page_reference(f, entity_var, vars),
            FilterNode::Task(f) => build_task(f, entity_var, vars),
            FilterNode::Priority(f) => build_priority(f, entity_var, vars),
            FilterNode::Between(f) => build_between(f, entity_var, vars),
            FilterNode::Unknown => None,
        };

        if clause.is_none() {
            tracing::debug!(kind = ?filter.kind(), "filter produced no clause");
        }
        clause
    }

    fn build_property(&self, filter: &PropertyFilter, e: &str, vars: &mut VariableScope) -> Option<String> {
        if filter.operator == PropertyOperator::Unrecognized {
            return None;
        }
        let schema = self.resolve_schema(filter);
        match plan_property(filter, schema.as_ref()) {
            PropertyPlan::Boolean { keyword } => {
                let checked = filter.value.as_single()? == "checked";
                Some(format!("[{e} {keyword} {checked}]"))
            }
            PropertyPlan::Ref { keyword } => build_ref_property(e, &keyword, &filter.value, vars),
            PropertyPlan::Number { keyword } => {
                let number = parse_number(filter.value.as_single()?)?;
                let op = filter.operator.comparison_symbol()?;
                let num = vars.fresh("num");
                Some(format!("[{e} {keyword} {num}]\n [({op} {num} {number})]"))
            }
            PropertyPlan::Instant { keyword } => {
                let timestamp = parse_timestamp_millis(filter.value.as_single()?)?;
                let op = filter.operator.comparison_symbol()?;
                let date = vars.fresh("date");
                Some(format!("[{e} {keyword} {date}]\n [({op} {date} {timestamp})]"))
            }
            PropertyPlan::NamespaceProbe { name } => self.build_namespace_probe(filter, name, e, vars),
        }
    }

    fn resolve_schema(&self, filter: &PropertyFilter) -> Option<PropertySchema> {
        if let Some(schema) = &filter.property_schema {
            return Some(schema.clone());
        }
        let lookup = self.schema?;
        filter
            .property_ident
            .as_deref()
            .and_then(|ident| lookup.lookup(ident))
            .or_else(|| lookup.lookup(filter.property_name.trim()))
    }

    fn build_namespace_probe(
        &self,
        filter: &PropertyFilter,
        name: &str,
        e: &str,
        vars: &mut VariableScope,
    ) -> Option<String> {
        let user_prop = format!("{USER_PROPERTY_NAMESPACE}/{name}");
        let builtin_prop = format!("{BUILTIN_PROPERTY_NAMESPACE}/{name}");

        let mut branches = Vec::new();
        match filter.operator {
            PropertyOperator::Is => {
                for value in filter.value.values() {
                    let escaped = escape_literal(value);
                    branches.push(format!("[{e} {user_prop} \"{escaped}\"]"));
                    branches.push(format!("[{e} {builtin_prop} \"{escaped}\"]"));
                }
            }
            PropertyOperator::Contains => {
                let user_var = vars.fresh("v1");
                let builtin_var = vars.fresh("v2");
                let pattern = vars.fresh("pattern");
                for value in filter.value.values() {
                    branches.push(self.contains_branch(e, &user_prop, &user_var, &pattern, value));
                    branches.push(self.contains_branch(e, &builtin_prop, &builtin_var, &pattern, value));
                }
            }
            _ => return None,
        }

        if branches.is_empty() {
            return None;
        }
        Some(format!("(or-join [{e}]\n  {})", branches.join("\n  ")))
    }

    fn contains_branch(&self, e: &str, prop: &str, var: &str, pattern_var: &str, value: &str) -> String {
        if self.case_insensitive_contains {
            let pattern = regex_pattern_literal(value);
            format!(
                "(and [{e} {prop} {var}]\n       [(re-pattern \"(?i){pattern}\") {pattern_var}]\n       [(re-find {pattern_var} {var})])"
            )
        } else {
            let escaped = escape_literal(value);
            format!("(and [{e} {prop} {var}]\n       [(clojure.string/includes? {var} \"{escaped}\")])")
        }
    }
}

fn plan_property<'f>(filter: &'f PropertyFilter, schema: Option<&PropertySchema>) -> PropertyPlan<'f> {
    let probe = PropertyPlan::NamespaceProbe {
        name: filter.property_name.trim(),
    };
    let Some(schema) = schema.filter(|s| !s.ident.trim_start_matches(':').is_empty()) else {
        return probe;
    };

    let keyword = schema.keyword();
    match schema.value_type {
        ValueType::Boolean => PropertyPlan::Boolean { keyword },
        ValueType::Ref => PropertyPlan::Ref { keyword },
        ValueType::Number => PropertyPlan::Number { keyword },
        ValueType::Instant => PropertyPlan::Instant { keyword },
        ValueType::Text => probe,
    }
}

fn build_page(filter: &PageFilter, e: &str, vars: &mut VariableScope) -> Option<String> {
    let value = escape_literal(filter.value.as_single()?);
    let predicate = match filter.operator {
        PageOperator::Is => return Some(format!("[{e} :block/name \"{value}\"]")),
        PageOperator::Contains => "clojure.string/includes?",
        PageOperator::StartsWith => "clojure.string/starts-with?",
        PageOperator::EndsWith => "clojure.string/ends-with?",
        PageOperator::Unrecognized => return None,
    };
    let name = vars.fresh("name");
    Some(format!("[{e} :block/name {name}]\n [({predicate} {name} \"{value}\")]"))
}

/// Variables of a tag membership test: direct tag, tagging class and its parent
struct TagVars {
    tag: String,
    child: String,
    parent: String,
}

impl TagVars {
    fn fresh(vars: &mut VariableScope) -> Self {
        Self {
            tag: vars.fresh("t"),
            child: vars.fresh("child"),
            parent: vars.fresh("parent"),
        }
    }

    fn direct_branch(&self, e: &str, title: &str) -> String {
        let t = &self.tag;
        format!("(and [{e} :block/tags {t}]\n       [{t} :block/title \"{title}\"])")
    }

    fn extends_branch(&self, e: &str, title: &str) -> String {
        let TagVars { child, parent, .. } = self;
        format!(
            "(and [{e} :block/tags {child}]\n       [{child} :logseq.property.class/extends {parent}]\n       [{parent} :block/title \"{title}\"])"
        )
    }
}

fn direct_tag_clause(e: &str, t: &str, title: &str) -> String {
    format!("[{e} :block/tags {t}]\n [{t} :block/title \"{title}\"]")
}

fn build_tags(filter: &TagFilter, e: &str, vars: &mut VariableScope) -> Option<String> {
    let value = escape_literal(filter.value.as_single()?);
    if filter.include_extensions {
        let tag_vars = TagVars::fresh(vars);
        Some(format!(
            "(or-join [{e}]\n  {}\n  {})",
            tag_vars.direct_branch(e, &value),
            tag_vars.extends_branch(e, &value)
        ))
    } else {
        Some(direct_tag_clause(e, &vars.fresh("t"), &value))
    }
}

fn build_full_text(filter: &FullTextFilter, e: &str, vars: &mut VariableScope) -> Option<String> {
    let pattern = regex_pattern_literal(filter.value.as_single()?);
    let (anchored, matcher) = match filter.operator {
        FullTextOperator::Equals => (format!("^{pattern}$"), "re-matches"),
        FullTextOperator::Contains => (pattern, "re-find"),
        FullTextOperator::Unrecognized => return None,
    };
    let title = vars.fresh("title");
    let pattern_var = vars.fresh("pattern");
    Some(format!(
        "[{e} :block/title {title}]\n [(re-pattern \"(?i){anchored}\") {pattern_var}]\n [({matcher} {pattern_var} {title})]"
    ))
}

fn build_ref_property(e: &str, keyword: &str, value: &FilterValue, vars: &mut VariableScope) -> Option<String> {
    match value {
        FilterValue::Single(title) => {
            let escaped = escape_literal(title);
            let val = vars.fresh("val");
            Some(format!("[{e} {keyword} {val}]\n [{val} :block/title \"{escaped}\"]"))
        }
        FilterValue::Multiple(titles) if !titles.is_empty() => {
            let reference = vars.fresh("ref");
            let branches: Vec<String> = titles
                .iter()
                .map(|title| {
                    let escaped = escape_literal(title);
                    format!("(and [{e} {keyword} {reference}] [{reference} :block/title \"{escaped}\"])")
                })
                .collect();
            Some(format!("(or-join [{e}]\n  {})", branches.join("\n  ")))
        }
        FilterValue::Multiple(_) => None,
    }
}

fn build_page_reference(filter: &PageReferenceFilter, e: &str, vars: &mut VariableScope) -> Option<String> {
    let value = escape_literal(filter.value.as_single()?);
    let reference = vars.fresh("ref");
    Some(format!("[{e} :block/refs {reference}]\n [{reference} :block/name \"{value}\"]"))
}

/// Binds `attribute` to `var` and requires its title to be one of `titles`.
fn title_match(e: &str, attribute: &str, var: &str, titles: &[&str]) -> Option<String> {
    let escaped: Vec<String> = titles.iter().map(|t| escape_literal(t)).collect();
    match escaped.as_slice() {
        [] => None,
        [single] => Some(format!("[{e} {attribute} {var}]\n [{var} :block/title \"{single}\"]")),
        many => {
            let alternatives: Vec<String> = many
                .iter()
                .map(|title| format!("[{var} :block/title \"{title}\"]"))
                .collect();
            Some(format!("[{e} {attribute} {var}]\n (or {})", alternatives.join("\n ")))
        }
    }
}

fn build_task(filter: &TaskFilter, e: &str, vars: &mut VariableScope) -> Option<String> {
    let titles = filter.value.values();
    if titles.is_empty() {
        return None;
    }

    let membership = if !filter.include_extensions && !filter.include_all_status_properties {
        direct_tag_clause(e, &vars.fresh("t"), TASK_CLASS)
    } else {
        let tag_vars = TagVars::fresh(vars);
        let mut branches = vec![tag_vars.direct_branch(e, TASK_CLASS)];
        if filter.include_extensions {
            branches.push(tag_vars.extends_branch(e, TASK_CLASS));
        }
        if filter.include_all_status_properties {
            let tag = vars.fresh("tag");
            branches.push(format!(
                "(and [{e} :block/tags {tag}]\n       [{tag} :logseq.property.class/properties :logseq.property/status])"
            ));
        }
        format!("(or-join [{e}]\n  {})", branches.join("\n  "))
    };

    let status = title_match(e, ":logseq.property/status", &vars.fresh("status"), &titles)?;
    Some(format!("{membership}\n {status}"))
}

fn build_priority(filter: &PriorityFilter, e: &str, vars: &mut VariableScope) -> Option<String> {
    let titles = filter.value.values();
    if titles.is_empty() {
        return None;
    }
    title_match(e, ":logseq.property/priority", &vars.fresh("priority"), &titles)
}

fn build_between(filter: &BetweenFilter, e: &str, vars: &mut VariableScope) -> Option<String> {
    let start = parse_timestamp_millis(&filter.start_date)?;
    let end = parse_timestamp_millis(&filter.end_date)?;
    let attribute = filter.date_property.attribute();
    let date = vars.fresh("date");
    Some(format!(
        "[{e} {attribute} {date}]\n [(>= {date} {start})]\n [(<= {date} {end})]"
    ))
}

fn parse_number(input: &str) -> Option<f64> {
    input.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parses a date or date-time into epoch milliseconds.
///
/// Accepts `YYYY-MM-DD` (UTC midnight), RFC 3339, and `YYYY-MM-DDTHH:MM[:SS]`
/// read as UTC.
pub fn parse_timestamp_millis(input: &str) -> Option<i64> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
}
