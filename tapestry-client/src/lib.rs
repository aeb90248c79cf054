use std::collections::HashSet;

mod feed;
pub use feed::{PostFeed, PostView};

mod panel;
pub use panel::{
    fetch_comment_count, fetch_thread, CommentPanel, PanelEvent, RefreshTicket, ThreadSnapshot,
};

mod render;
pub use render::{find_comment, render_forest, walk_forest, Walk};

mod thread;
pub use thread::{
    build_comment_forest, count_comments, forest_len, name_lookup, CommentNode, NameLookup,
};

pub mod api {
    pub use tapestry_api::*;
}

/// Authors in order of first appearance, each listed once
fn distinct_authors(users: impl Iterator<Item = api::UserId>) -> Vec<api::UserId> {
    let mut seen = HashSet::new();
    users.filter(|u| seen.insert(*u)).collect()
}
