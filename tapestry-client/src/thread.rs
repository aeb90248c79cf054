use std::collections::{HashMap, HashSet};

use crate::api::{Comment, CommentId, PostId, Profile, Time, UserId};

/// Display names by author, as resolved from the profiles table
pub type NameLookup = HashMap<UserId, String>;

/// Builds a lookup from profiles, profiles without a name are left out
pub fn name_lookup(profiles: &[Profile]) -> NameLookup {
    profiles
        .iter()
        .filter_map(|p| p.full_name.clone().map(|name| (p.id, name)))
        .collect()
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub id: CommentId,
    pub content: String,
    pub created_at: Time,
    pub user_id: UserId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,

    /// Name of the author, None if they have no named profile
    pub full_name: Option<String>,

    /// Direct replies, in chronological order
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    fn new(c: &Comment, names: &NameLookup) -> CommentNode {
        CommentNode {
            id: c.id,
            content: c.content.clone(),
            created_at: c.created_at,
            user_id: c.user_id,
            post_id: c.post_id,
            parent_id: c.parent_id,
            full_name: names.get(&c.user_id).cloned(),
            replies: Vec::new(),
        }
    }

    pub fn display_name(&self) -> String {
        self.full_name
            .clone()
            .unwrap_or_else(|| self.user_id.placeholder_name())
    }

    pub fn reply_count(&self) -> usize {
        self.replies.len()
    }

    pub fn is_author(&self, user: &UserId) -> bool {
        self.user_id == *user
    }
}

impl Drop for CommentNode {
    // Long reply chains would overflow the stack if dropped recursively
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.replies);
        while let Some(mut n) = stack.pop() {
            stack.append(&mut n.replies);
        }
    }
}

/// Number of comments of a batch, independently of how they nest
pub fn count_comments(comments: &[Comment]) -> usize {
    comments.len()
}

/// Number of nodes in a forest, replies included
pub fn forest_len(forest: &[CommentNode]) -> usize {
    let mut stack = forest.iter().collect::<Vec<_>>();
    let mut len = 0;
    while let Some(n) = stack.pop() {
        len += 1;
        stack.extend(n.replies.iter());
    }
    len
}

/// Rebuilds the reply structure of the comments of one post.
///
/// `comments` must be sorted by creation date, oldest first: this order is
/// kept both for top-level comments and for the replies of each comment.
///
/// Every comment ends up exactly once in the result. Comments that cannot be
/// attached to their parent are shown at top-level instead of being dropped:
/// this covers replies whose parent is not part of the batch (usually because
/// it got deleted), comments replying to themselves, and reply cycles, which
/// get broken at their earliest comment.
pub fn build_comment_forest(comments: &[Comment], names: &NameLookup) -> Vec<CommentNode> {
    let mut index = HashMap::with_capacity(comments.len());
    for (i, c) in comments.iter().enumerate() {
        index.entry(c.id).or_insert(i);
    }

    let mut parents = comments
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let parent_id = c.parent_id?;
            match index.get(&parent_id) {
                Some(&p) if p != i => Some(p),
                Some(_) => {
                    tracing::warn!(
                        comment = ?c.id,
                        "comment replies to itself, showing it at top level"
                    );
                    None
                }
                None => {
                    tracing::warn!(
                        comment = ?c.id,
                        parent = ?parent_id,
                        "parent comment is missing, showing reply at top level"
                    );
                    None
                }
            }
        })
        .collect::<Vec<Option<usize>>>();

    let mut children = vec![Vec::new(); comments.len()];
    for (i, p) in parents.iter().enumerate() {
        if let Some(p) = p {
            children[*p].push(i);
        }
    }

    let mut placed = vec![false; comments.len()];
    let mut preorder = Vec::with_capacity(comments.len());
    for i in 0..comments.len() {
        if parents[i].is_none() {
            push_subtree(i, &children, &mut placed, &mut preorder);
        }
    }
    // Anything not placed yet is on a reply cycle or hangs below one
    for i in 0..comments.len() {
        if !placed[i] {
            let entry = cycle_entry(i, &parents);
            tracing::warn!(
                comment = ?comments[entry].id,
                "reply cycle detected, showing comment at top level"
            );
            if let Some(p) = parents[entry].take() {
                children[p].retain(|&c| c != entry);
            }
            push_subtree(entry, &children, &mut placed, &mut preorder);
        }
    }

    // Children come right after their parent in preorder, so walking it
    // backwards completes every subtree before its root is reached
    let mut replies = vec![Vec::new(); comments.len()];
    let mut roots = Vec::new();
    for &i in preorder.iter().rev() {
        let mut node = CommentNode::new(&comments[i], names);
        node.replies = std::mem::take(&mut replies[i]);
        node.replies.reverse();
        match parents[i] {
            Some(p) => replies[p].push(node),
            None => roots.push((i, node)),
        }
    }
    // Promoted cycle entries were pushed last, put them back in place
    roots.sort_by_key(|(i, _)| *i);
    roots.into_iter().map(|(_, node)| node).collect()
}

fn push_subtree(
    root: usize,
    children: &[Vec<usize>],
    placed: &mut [bool],
    preorder: &mut Vec<usize>,
) {
    let mut stack = vec![root];
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut placed[i], true) {
            continue;
        }
        preorder.push(i);
        stack.extend(children[i].iter().rev());
    }
}

/// Earliest comment of the cycle reached by walking up from `start`
fn cycle_entry(start: usize, parents: &[Option<usize>]) -> usize {
    let mut seen = HashSet::new();
    let mut cur = start;
    while seen.insert(cur) {
        match parents[cur] {
            Some(p) => cur = p,
            None => return cur,
        }
    }
    let mut earliest = cur;
    let mut member = parents[cur];
    while let Some(m) = member.filter(|&m| m != cur) {
        earliest = earliest.min(m);
        member = parents[m];
    }
    earliest
}
