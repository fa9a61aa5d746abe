//! # Nesting rules
//!
//! Checked before any state changes, so a rejected move leaves every tree
//! untouched.
//!
//! ### Pages
//! - A page can't be its own parent or sit under one of its descendants
//! - The deepest page in the moved subtree must stay within the depth limit
//!
//! ### Blocks
//! - Parent is the page itself or a container block on the same page
//! - A block can't be nested in itself or in one of its descendants
//! - Nesting depth stays within the limit

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::model::{Block, Page};
use crate::tree::{depth_of, descendants_of};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0} cannot be its own parent")]
    SelfParent(String),

    #[error("Moving {id} under {parent} would create a cycle")]
    CycleDetected { id: String, parent: String },

    #[error("Nesting deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("Parent not found: {0}")]
    ParentNotFound(String),

    #[error("Parent {0} has not been saved yet")]
    ParentNotPersisted(String),

    #[error("Block type {0} cannot contain other blocks")]
    NotAContainer(String),

    #[error("Parent {parent} belongs to page {parent_page}, not {page}")]
    CrossPage {
        parent: String,
        parent_page: String,
        page: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Depth limits for the page and block hierarchies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestingRules {
    pub max_page_depth: usize,
    pub max_block_depth: usize,
}

impl Default for NestingRules {
    fn default() -> Self {
        Self {
            max_page_depth: 16,
            max_block_depth: 8,
        }
    }
}

/// Number of pages from the root down to `id` (a top-level page is 1)
fn page_depth(by_id: &HashMap<&str, &Page>, id: &str) -> usize {
    let mut depth = 0;
    let mut seen = HashSet::new();
    let mut current = by_id.get(id).copied();
    while let Some(page) = current {
        if !seen.insert(page.id.as_str()) {
            break;
        }
        depth += 1;
        current = page.parent_id.as_deref().and_then(|parent| by_id.get(parent).copied());
    }
    depth
}

/// Levels below `id` in the page tree (a leaf is 0)
fn page_height(pages: &[Page], id: &str) -> usize {
    let mut height = 0;
    let mut frontier = vec![id.to_string()];
    let mut seen: HashSet<String> = HashSet::from([id.to_string()]);
    loop {
        let next: Vec<String> = pages
            .iter()
            .filter(|page| {
                page.parent_id
                    .as_ref()
                    .is_some_and(|parent| frontier.contains(parent))
            })
            .filter(|page| seen.insert(page.id.clone()))
            .map(|page| page.id.clone())
            .collect();
        if next.is_empty() {
            return height;
        }
        height += 1;
        frontier = next;
    }
}

/// Check that `page_id` may move under `new_parent` (`None` = top level)
pub fn validate_page_parent(
    pages: &[Page],
    page_id: &str,
    new_parent: Option<&str>,
    rules: &NestingRules,
) -> Result<(), ValidationError> {
    let by_id: HashMap<&str, &Page> = pages.iter().map(|p| (p.id.as_str(), p)).collect();
    if !by_id.contains_key(page_id) {
        return Err(ValidationError::NotFound(page_id.to_string()));
    }

    let Some(parent) = new_parent else {
        return check_page_depth(pages, page_id, 0, rules);
    };

    if parent == page_id {
        return Err(ValidationError::SelfParent(page_id.to_string()));
    }
    if !by_id.contains_key(parent) {
        return Err(ValidationError::ParentNotFound(parent.to_string()));
    }

    // Walk up from the new parent; meeting the page means it's a descendant
    let mut seen = HashSet::new();
    let mut current = Some(parent);
    while let Some(id) = current {
        if id == page_id {
            return Err(ValidationError::CycleDetected {
                id: page_id.to_string(),
                parent: parent.to_string(),
            });
        }
        if !seen.insert(id) {
            break;
        }
        current = by_id.get(id).and_then(|page| page.parent_id.as_deref());
    }

    check_page_depth(pages, page_id, page_depth(&by_id, parent), rules)
}

fn check_page_depth(
    pages: &[Page],
    page_id: &str,
    parent_depth: usize,
    rules: &NestingRules,
) -> Result<(), ValidationError> {
    if parent_depth + 1 + page_height(pages, page_id) > rules.max_page_depth {
        return Err(ValidationError::TooDeep {
            max: rules.max_page_depth,
        });
    }
    Ok(())
}

/// Check that a block (existing `block_id`, or `None` for a new one) may
/// sit under `new_parent` on `page_id`
pub fn validate_block_parent(
    blocks: &[Block],
    page_id: &str,
    block_id: Option<&str>,
    new_parent: &str,
    rules: &NestingRules,
) -> Result<(), ValidationError> {
    if let Some(id) = block_id {
        if !blocks.iter().any(|block| block.id == id) {
            return Err(ValidationError::NotFound(id.to_string()));
        }
        if id == new_parent {
            return Err(ValidationError::SelfParent(id.to_string()));
        }
    }

    if new_parent == page_id {
        return Ok(());
    }

    let parent = blocks
        .iter()
        .find(|block| block.id == new_parent)
        .ok_or_else(|| ValidationError::ParentNotFound(new_parent.to_string()))?;

    if parent.page_id != page_id {
        return Err(ValidationError::CrossPage {
            parent: parent.id.clone(),
            parent_page: parent.page_id.clone(),
            page: page_id.to_string(),
        });
    }
    if !parent.block_type.is_container() {
        return Err(ValidationError::NotAContainer(parent.block_type.to_string()));
    }

    let subtree_height = match block_id {
        Some(id) => {
            let below = descendants_of(blocks, id);
            if below.contains(new_parent) {
                return Err(ValidationError::CycleDetected {
                    id: id.to_string(),
                    parent: new_parent.to_string(),
                });
            }
            below
                .iter()
                .map(|descendant| levels_between(blocks, descendant, id))
                .max()
                .unwrap_or(0)
        }
        None => 0,
    };

    if depth_of(blocks, new_parent) + 1 + subtree_height > rules.max_block_depth {
        return Err(ValidationError::TooDeep {
            max: rules.max_block_depth,
        });
    }
    Ok(())
}

/// Parent hops from `descendant` up to `ancestor`
fn levels_between(blocks: &[Block], descendant: &str, ancestor: &str) -> usize {
    depth_of(blocks, descendant).saturating_sub(depth_of(blocks, ancestor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockType;

    fn pages() -> Vec<Page> {
        vec![
            Page::new("root", "Root"),
            Page::new("a", "A").with_parent("root"),
            Page::new("b", "B").with_parent("a"),
            Page::new("other", "Other"),
        ]
    }

    #[test]
    fn test_page_self_parent() {
        let rules = NestingRules::default();
        assert_eq!(
            validate_page_parent(&pages(), "a", Some("a"), &rules),
            Err(ValidationError::SelfParent("a".into()))
        );
    }

    #[test]
    fn test_page_into_descendant() {
        let rules = NestingRules::default();
        let result = validate_page_parent(&pages(), "root", Some("b"), &rules);
        assert!(matches!(result, Err(ValidationError::CycleDetected { .. })));
    }

    #[test]
    fn test_page_valid_moves() {
        let rules = NestingRules::default();
        assert_eq!(validate_page_parent(&pages(), "b", Some("other"), &rules), Ok(()));
        assert_eq!(validate_page_parent(&pages(), "b", None, &rules), Ok(()));
        assert_eq!(
            validate_page_parent(&pages(), "b", Some("nowhere"), &rules),
            Err(ValidationError::ParentNotFound("nowhere".into()))
        );
    }

    #[test]
    fn test_page_depth_counts_moved_subtree() {
        let rules = NestingRules {
            max_page_depth: 3,
            max_block_depth: 8,
        };
        // root > a > b is 3 deep; hanging it under "other" makes 4
        assert_eq!(
            validate_page_parent(&pages(), "root", Some("other"), &rules),
            Err(ValidationError::TooDeep { max: 3 })
        );
        assert_eq!(validate_page_parent(&pages(), "a", Some("other"), &rules), Ok(()));
    }

    fn blocks() -> Vec<Block> {
        vec![
            Block::new("toggle", "p1", BlockType::ToggleList, "p1", 0),
            Block::new("inner", "p1", BlockType::ToggleList, "toggle", 0),
            Block::new("para", "p1", BlockType::Text, "p1", 1),
            Block::new("elsewhere", "p2", BlockType::TwoColumn, "p2", 0),
        ]
    }

    #[test]
    fn test_block_parent_rules() {
        let rules = NestingRules::default();
        let blocks = blocks();

        assert_eq!(validate_block_parent(&blocks, "p1", Some("para"), "toggle", &rules), Ok(()));
        assert_eq!(validate_block_parent(&blocks, "p1", None, "p1", &rules), Ok(()));
        assert_eq!(
            validate_block_parent(&blocks, "p1", None, "para", &rules),
            Err(ValidationError::NotAContainer("text".into()))
        );
        assert!(matches!(
            validate_block_parent(&blocks, "p1", None, "elsewhere", &rules),
            Err(ValidationError::CrossPage { .. })
        ));
        assert_eq!(
            validate_block_parent(&blocks, "p1", Some("toggle"), "toggle", &rules),
            Err(ValidationError::SelfParent("toggle".into()))
        );
        assert!(matches!(
            validate_block_parent(&blocks, "p1", Some("toggle"), "inner", &rules),
            Err(ValidationError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_block_depth_limit() {
        let rules = NestingRules {
            max_page_depth: 16,
            max_block_depth: 2,
        };
        let blocks = blocks();

        assert_eq!(validate_block_parent(&blocks, "p1", None, "inner", &rules), Err(ValidationError::TooDeep { max: 2 }));
        // toggle carries one nested level, so under another root container it is 3 deep
        let mut more = blocks.clone();
        more.push(Block::new("cols", "p1", BlockType::TwoColumn, "p1", 2));
        assert_eq!(
            validate_block_parent(&more, "p1", Some("toggle"), "cols", &rules),
            Err(ValidationError::TooDeep { max: 2 })
        );
        assert_eq!(validate_block_parent(&more, "p1", Some("para"), "cols", &rules), Ok(()));
    }
}
