use std::{collections::HashSet, fmt::Write};

use crate::{api::CommentId, CommentNode};

pub struct Walk<'a> {
    stack: Vec<(usize, &'a CommentNode)>,
    visited: HashSet<*const CommentNode>,
}

/// Depth-first, pre-order walk over a forest, yielding each node with its
/// depth (0 for top-level comments). Every node is yielded once, including
/// nodes sharing an id with an earlier one.
pub fn walk_forest(forest: &[CommentNode]) -> Walk<'_> {
    Walk {
        stack: forest.iter().rev().map(|n| (0, n)).collect(),
        visited: HashSet::new(),
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a CommentNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((depth, node)) = self.stack.pop() {
            if !self.visited.insert(node as *const CommentNode) {
                continue;
            }
            self.stack
                .extend(node.replies.iter().rev().map(|r| (depth + 1, r)));
            return Some((depth, node));
        }
        None
    }
}

pub fn find_comment<'a>(forest: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
    walk_forest(forest).map(|(_, n)| n).find(|n| n.id == *id)
}

pub fn render_forest(forest: &[CommentNode]) -> String {
    let mut res = String::new();
    for (depth, node) in walk_forest(forest) {
        let indent = "    ".repeat(depth);
        // writing into a String cannot fail
        let _ = writeln!(
            res,
            "{indent}{} · {} · {}",
            node.display_name(),
            node.created_at.format("%Y-%m-%d %H:%M"),
            node.id.0,
        );
        for line in node.content.lines() {
            let _ = writeln!(res, "{indent}  {line}");
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::api::{PostId, UserId, Uuid};

    fn node(n: u128, replies: Vec<CommentNode>) -> CommentNode {
        CommentNode {
            id: CommentId(Uuid::from_u128(n)),
            content: format!("line {n}\nsecond line"),
            created_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            user_id: UserId(Uuid::from_u128(0xabcdef)),
            post_id: PostId(Uuid::from_u128(1)),
            parent_id: None,
            full_name: Some(String::from("Ada")),
            replies,
        }
    }

    #[test]
    fn walks_depth_first() {
        let forest = vec![
            node(1, vec![node(2, vec![node(3, vec![])]), node(4, vec![])]),
            node(5, vec![]),
        ];
        let order = walk_forest(&forest)
            .map(|(d, n)| (d, n.id.0.as_u128()))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(0, 1), (1, 2), (2, 3), (1, 4), (0, 5)]);
        assert_eq!(
            find_comment(&forest, &CommentId(Uuid::from_u128(3))).map(|n| n.id),
            Some(CommentId(Uuid::from_u128(3)))
        );
        assert!(find_comment(&forest, &CommentId(Uuid::from_u128(9))).is_none());
    }

    #[test]
    fn repeated_ids_are_all_rendered() {
        // a corrupted store could hand out the same id twice
        let forest = vec![node(1, vec![node(1, vec![node(2, vec![])])]), node(1, vec![])];
        let order = walk_forest(&forest)
            .map(|(d, n)| (d, n.id.0.as_u128()))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(0, 1), (1, 1), (2, 2), (0, 1)]);
        assert_eq!(render_forest(&forest).lines().count(), 12);
    }

    #[test]
    fn renders_indented() {
        let forest = vec![node(1, vec![node(2, vec![])])];
        let text = render_forest(&forest);
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("Ada · 2024-05-01 12:30 · "));
        assert_eq!(lines[1], "  line 1");
        assert!(lines[3].starts_with("    Ada · "));
        assert_eq!(lines[5], "      second line");
    }
}
