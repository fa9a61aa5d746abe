//! Parent/child view over a page's flat block list

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{Block, Column, Positioned};

/// A page's blocks split into roots (direct children of the page) and
/// everything else. Both groups are sorted by `pos`.
#[derive(Debug, Clone, Default)]
pub struct Partition<'a> {
    pub roots: Vec<&'a Block>,
    pub children: Vec<&'a Block>,
}

impl<'a> Partition<'a> {
    pub fn children_of(&self, parent_id: &str) -> Vec<&'a Block> {
        children_of(&self.children, parent_id)
    }

    pub fn column_children(&self, parent_id: &str, column: Column) -> Vec<&'a Block> {
        column_children(&self.children, parent_id, column)
    }

    pub fn len(&self) -> usize {
        self.roots.len() + self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty() && self.children.is_empty()
    }
}

pub fn partition<'a>(blocks: &'a [Block], page_id: &str) -> Partition<'a> {
    let (mut roots, mut children): (Vec<&Block>, Vec<&Block>) =
        blocks.iter().partition(|block| block.parent_id == page_id);
    sort_siblings(&mut roots);
    sort_siblings(&mut children);
    Partition { roots, children }
}

pub fn children_of<'a>(children: &[&'a Block], parent_id: &str) -> Vec<&'a Block> {
    children
        .iter()
        .copied()
        .filter(|block| block.parent_id == parent_id)
        .collect()
}

/// Children of a two-column block that sit in `column`; untagged children
/// go left
pub fn column_children<'a>(children: &[&'a Block], parent_id: &str, column: Column) -> Vec<&'a Block> {
    children
        .iter()
        .copied()
        .filter(|block| block.parent_id == parent_id && block.column() == column)
        .collect()
}

/// Stable ascending sort by `pos`
pub fn sort_siblings<T: Positioned>(siblings: &mut [&T]) {
    siblings.sort_by_key(|item| item.pos());
}

/// Position that appends after every sibling
pub fn next_pos<T: Positioned>(siblings: &[&T]) -> i64 {
    siblings.iter().map(|item| item.pos()).max().map_or(0, |max| max + 1)
}

/// New sort key for one sibling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    pub id: String,
    pub from: i64,
    pub pos: i64,
}

/// Move the sibling at index `from` to index `to` (indices into the sorted
/// order) and return updates only for siblings whose `pos` changes. The
/// existing `pos` values are reused as slots, bumped where needed so they
/// are strictly increasing.
pub fn reorder<T: Positioned>(siblings: &[&T], from: usize, to: usize) -> Vec<PositionUpdate> {
    let mut order: Vec<&T> = siblings.to_vec();
    sort_siblings(&mut order);

    if from == to || from >= order.len() || to >= order.len() {
        return Vec::new();
    }

    let mut slots: Vec<i64> = order.iter().map(|item| item.pos()).collect();
    for i in 1..slots.len() {
        if slots[i] <= slots[i - 1] {
            slots[i] = slots[i - 1] + 1;
        }
    }

    let moved = order.remove(from);
    order.insert(to, moved);

    order
        .iter()
        .zip(slots)
        .filter(|(item, slot)| item.pos() != *slot)
        .map(|(item, slot)| PositionUpdate {
            id: item.id().to_string(),
            from: item.pos(),
            pos: slot,
        })
        .collect()
}

/// Ids of every block nested (at any depth) under `id`
pub fn descendants_of(blocks: &[Block], id: &str) -> HashSet<String> {
    let mut by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
    for block in blocks {
        by_parent
            .entry(block.parent_id.as_str())
            .or_default()
            .push(block.id.as_str());
    }

    let mut found = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
        for &child in by_parent.get(current).into_iter().flatten() {
            if found.insert(child.to_string()) {
                queue.push_back(child);
            }
        }
    }
    found
}

/// Blocks connected to the page root through existing parents. Blocks
/// under a deleted or missing parent are left out.
pub fn reachable<'a>(blocks: &'a [Block], page_id: &str) -> Vec<&'a Block> {
    let mut ids = descendants_of(blocks, page_id);
    ids.remove(page_id);
    blocks.iter().filter(|block| ids.contains(&block.id)).collect()
}

/// Blocks whose parent chain never reaches the page
pub fn orphans<'a>(blocks: &'a [Block], page_id: &str) -> Vec<&'a Block> {
    let ids = descendants_of(blocks, page_id);
    blocks.iter().filter(|block| !ids.contains(&block.id)).collect()
}

/// Number of block ancestors between `id` and the page (roots are depth 1)
pub fn depth_of(blocks: &[Block], id: &str) -> usize {
    let by_id: HashMap<&str, &Block> = blocks.iter().map(|b| (b.id.as_str(), b)).collect();
    let mut depth = 0;
    let mut seen = HashSet::new();
    let mut current = by_id.get(id).copied();
    while let Some(block) = current {
        if !seen.insert(block.id.as_str()) {
            break;
        }
        depth += 1;
        current = by_id.get(block.parent_id.as_str()).copied();
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockType;
    use serde_json::json;

    fn block(id: &str, parent: &str, pos: i64) -> Block {
        Block::new(id, "p1", BlockType::Text, parent, pos)
    }

    fn ids(blocks: &[&Block]) -> Vec<String> {
        blocks.iter().map(|b| b.id.clone()).collect()
    }

    #[test]
    fn test_partition_sorts_each_group() {
        let blocks = vec![
            block("b", "p1", 2),
            block("c", "t", 1),
            block("a", "p1", 1),
            block("t", "p1", 0),
            block("d", "t", 0),
        ];
        let view = partition(&blocks, "p1");

        assert_eq!(ids(&view.roots), ["t", "a", "b"]);
        assert_eq!(ids(&view.children), ["d", "c"]);
        assert_eq!(ids(&view.children_of("t")), ["d", "c"]);
        assert_eq!(view.len(), blocks.len());
    }

    #[test]
    fn test_sort_is_stable_for_equal_pos() {
        let blocks = vec![block("x", "p1", 1), block("y", "p1", 1), block("z", "p1", 0)];
        let view = partition(&blocks, "p1");
        assert_eq!(ids(&view.roots), ["z", "x", "y"]);
    }

    #[test]
    fn test_column_children_default_left() {
        let blocks = vec![
            block("l", "cols", 0).with_content(json!({"column": "left"})),
            block("r", "cols", 1).with_content(json!({"column": "right"})),
            block("u", "cols", 2),
        ];
        let refs: Vec<&Block> = blocks.iter().collect();

        assert_eq!(ids(&column_children(&refs, "cols", Column::Left)), ["l", "u"]);
        assert_eq!(ids(&column_children(&refs, "cols", Column::Right)), ["r"]);
    }

    #[test]
    fn test_next_pos() {
        let blocks = vec![block("a", "p1", 3), block("b", "p1", 7)];
        let refs: Vec<&Block> = blocks.iter().collect();
        assert_eq!(next_pos(&refs), 8);
        assert_eq!(next_pos::<Block>(&[]), 0);
    }

    #[test]
    fn test_reorder_minimal_updates() {
        let blocks: Vec<Block> = (0..5).map(|i| block(&format!("b{i}"), "p1", i)).collect();
        let refs: Vec<&Block> = blocks.iter().collect();

        let updates = reorder(&refs, 4, 3);
        assert_eq!(
            updates,
            vec![
                PositionUpdate { id: "b4".into(), from: 4, pos: 3 },
                PositionUpdate { id: "b3".into(), from: 3, pos: 4 },
            ]
        );
        assert!(reorder(&refs, 1, 1).is_empty());
        assert!(reorder(&refs, 9, 0).is_empty());
    }

    #[test]
    fn test_reorder_with_sparse_and_duplicate_pos() {
        let blocks = vec![block("a", "p1", 10), block("b", "p1", 10), block("c", "p1", 40)];
        let refs: Vec<&Block> = blocks.iter().collect();

        // slots become 10, 11, 40
        let updates = reorder(&refs, 2, 0);
        assert_eq!(
            updates,
            vec![
                PositionUpdate { id: "c".into(), from: 40, pos: 10 },
                PositionUpdate { id: "a".into(), from: 10, pos: 11 },
                PositionUpdate { id: "b".into(), from: 10, pos: 40 },
            ]
        );
    }

    #[test]
    fn test_reachability_skips_dangling_parents() {
        let blocks = vec![
            block("t", "p1", 0),
            block("inner", "t", 0),
            block("deeper", "inner", 0),
            block("lost", "gone", 0),
            block("lost-child", "lost", 0),
        ];

        assert_eq!(ids(&reachable(&blocks, "p1")), ["t", "inner", "deeper"]);
        assert_eq!(ids(&orphans(&blocks, "p1")), ["lost", "lost-child"]);
        assert_eq!(descendants_of(&blocks, "t").len(), 2);
        assert_eq!(depth_of(&blocks, "deeper"), 3);
        assert_eq!(depth_of(&blocks, "missing"), 0);
    }
}
