//! Applicability filter: is a milestone relevant to a creator's content path?

use std::collections::BTreeSet;

use super::model::{ContentPath, Milestone};

/// Whether `milestone` applies to a creator on `content_path`.
///
/// An empty tag set applies to everyone, including creators with no path.
pub fn is_applicable(milestone: &Milestone, content_path: Option<ContentPath>) -> bool {
    applies(&milestone.applies_to, content_path)
}

/// Tag-set form of [`is_applicable`], for callers holding only the tags.
pub fn applies(applies_to: &BTreeSet<ContentPath>, content_path: Option<ContentPath>) -> bool {
    if applies_to.is_empty() {
        return true;
    }
    content_path.is_some_and(|path| applies_to.contains(&path))
}
