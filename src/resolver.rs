//! Resolves `[[uuid]]` references embedded in result text to entity titles.
//!
//! ## 解析流程
//!
//! ```text
//! resolve()
//!   ├─ collect_references()   扫描文本字段, 收集去重后的 uuid
//!   ├─ lookup_titles()        每个 uuid 只查询一次 (顺序或受限并发)
//!   │    └─ 单个查询失败只记录日志, 不影响其余 uuid
//!   └─ rewrite_record()       把已解析的 [[uuid]] 替换为 [[标题]], 生成新记录
//! ```

use crate::ast::ResultRecord;
use crate::executor::ExecutionError;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};

/// `[[` + canonical lowercase dashed uuid + `]]`
static REFERENCE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12})\]\]")
        .expect("reference marker pattern compiles")
});

type LookupResult = (String, Result<Option<String>, LookupError>);

/// Error from a single title lookup
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("lookup failed: {0}")]
    Other(String),
}

/// Looks up the title of the entity with a given uuid.
///
/// `Ok(None)` means no titled entity carries that uuid.
pub trait TitleLookup {
    fn lookup_title(&self, uuid: &str) -> Result<Option<String>, LookupError>;
}

impl<F> TitleLookup for F
where
    F: Fn(&str) -> Result<Option<String>, LookupError>,
{
    fn lookup_title(&self, uuid: &str) -> Result<Option<String>, LookupError> {
        self(uuid)
    }
}

/// Configuration for reference resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Record field scanned for reference markers
    pub text_field: String,
    /// Maximum lookups in flight; 1 runs them one after another
    pub concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            text_field: "block/title".to_string(),
            concurrency: 1,
        }
    }
}

/// A referenced uuid that was left as-is in the output
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedReference {
    pub uuid: String,
    /// `None` when the lookup succeeded but found no title
    pub error: Option<LookupError>,
}

/// Result of resolving one batch of records
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub records: Vec<ResultRecord>,
    /// uuid → title for every reference that was resolved
    pub titles: HashMap<String, String>,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Rewrites reference markers in a batch of records
#[derive(Debug, Clone, Default)]
pub struct ReferenceResolver {
    config: ResolverConfig,
    /// Shared by every `resolve` call; `None` runs lookups sequentially
    pool: Option<Arc<ThreadPool>>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookups run on a pool of `config.concurrency` threads when it is above 1.
    pub fn with_config(config: ResolverConfig) -> Self {
        let pool = if config.concurrency > 1 {
            match ThreadPoolBuilder::new().num_threads(config.concurrency).build() {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    tracing::warn!("could not start lookup pool ({e}), resolving sequentially");
                    None
                }
            }
        } else {
            None
        };
        Self { config, pool }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve every reference marker in `records`.
    ///
    /// Each distinct uuid is looked up once. Input records are never modified;
    /// the outcome holds a new copy of every record.
    pub fn resolve<L>(&self, records: &[ResultRecord], lookup: &L) -> ResolveOutcome
    where
        L: TitleLookup + Sync,
    {
        let references = collect_references(records, &self.config.text_field);
        if references.is_empty() {
            return ResolveOutcome {
                records: records.to_vec(),
                titles: HashMap::new(),
                unresolved: Vec::new(),
            };
        }

        tracing::debug!(count = references.len(), "resolving uuid references");

        let ids: Vec<String> = references.into_iter().collect();
        let mut titles = HashMap::new();
        let mut unresolved = Vec::new();
        for (uuid, result) in self.lookup_titles(&ids, lookup) {
            match result {
                Ok(Some(title)) => {
                    titles.insert(uuid, title);
                }
                Ok(None) => unresolved.push(UnresolvedReference { uuid, error: None }),
                Err(error) => {
                    tracing::warn!("failed to resolve uuid {uuid}: {error}");
                    unresolved.push(UnresolvedReference {
                        uuid,
                        error: Some(error),
                    });
                }
            }
        }

        tracing::debug!(resolved = titles.len(), unresolved = unresolved.len(), "resolved uuid references");

        let records = records
            .iter()
            .map(|record| rewrite_record(record, &self.config.text_field, &titles))
            .collect();

        ResolveOutcome {
            records,
            titles,
            unresolved,
        }
    }

    fn lookup_titles<L>(&self, ids: &[String], lookup: &L) -> Vec<LookupResult>
    where
        L: TitleLookup + Sync,
    {
        let sequential = || -> Vec<LookupResult> {
            ids.iter()
                .map(|id| (id.clone(), lookup.lookup_title(id)))
                .collect()
        };

        match &self.pool {
            Some(pool) if ids.len() > 1 => pool.install(|| {
                ids.par_iter()
                    .map(|id| (id.clone(), lookup.lookup_title(id)))
                    .collect()
            }),
            _ => sequential(),
        }
    }
}

/// Distinct uuids referenced from `field` across all records
pub fn collect_references(records: &[ResultRecord], field: &str) -> BTreeSet<String> {
    records
        .iter()
        .filter_map(|record| record.get(field).and_then(Value::as_str))
        .flat_map(|text| REFERENCE_MARKER.captures_iter(text).map(|caps| caps[1].to_string()))
        .collect()
}

fn rewrite_record(record: &ResultRecord, field: &str, titles: &HashMap<String, String>) -> ResultRecord {
    let mut rewritten = record.clone();
    if titles.is_empty() {
        return rewritten;
    }
    if let Some(Value::String(text)) = record.get(field) {
        let resolved = REFERENCE_MARKER.replace_all(text, |caps: &Captures| match titles.get(&caps[1]) {
            Some(title) => format!("[[{title}]]"),
            None => caps[0].to_string(),
        });
        rewritten.insert(field.to_string(), Value::String(resolved.into_owned()));
    }
    rewritten
}
