//! Structural checks deciding whether a filter carries enough input to compile.

use crate::ast::FilterNode;

/// Returns true when `filter` can contribute a clause.
///
/// Invalid filters are skipped by the compiler, never reported as errors.
pub fn is_valid(filter: &FilterNode) -> bool {
    match filter {
        FilterNode::Page(f) => f.value.is_present_single(),
        FilterNode::FullText(f) => f.value.is_present_single(),
        FilterNode::Tags(f) => f.value.is_present_single(),
        FilterNode::PageReference(f) => f.value.is_present_single(),
        FilterNode::Property(f) => !f.property_name.trim().is_empty() && f.value.is_present(),
        FilterNode::Task(f) => f.value.is_present(),
        FilterNode::Priority(f) => f.value.is_present(),
        FilterNode::Between(f) => !f.start_date.is_empty() && !f.end_date.is_empty(),
        FilterNode::Unknown => false,
    }
}
