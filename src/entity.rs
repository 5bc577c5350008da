//! Decides whether a query targets pages or blocks.

use crate::ast::{FilterKind, FilterNode};

/// Kind of entity bound by the compiled query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Page,
    Block,
}

impl EntityType {
    /// The logical variable the query binds for this entity type.
    pub fn variable(&self) -> &'static str {
        match self {
            EntityType::Page => "?p",
            EntityType::Block => "?b",
        }
    }
}

fn is_page_only(kind: FilterKind) -> bool {
    matches!(kind, FilterKind::Page)
}

fn is_block_only(kind: FilterKind) -> bool {
    matches!(kind, FilterKind::FullText | FilterKind::Task | FilterKind::Priority)
}

/// Resolves the entity type from the valid filters of a tree.
///
/// Block-only kinds win over page-only kinds; a set with neither also resolves
/// to blocks.
pub fn resolve_entity_type<'a, I>(filters: I) -> EntityType
where
    I: IntoIterator<Item = &'a FilterNode>,
{
    let mut has_page_only = false;
    let mut has_block_only = false;
    for filter in filters {
        let kind = filter.kind();
        has_page_only |= is_page_only(kind);
        has_block_only |= is_block_only(kind);
    }

    if has_block_only || !has_page_only {
        EntityType::Block
    } else {
        EntityType::Page
    }
}
