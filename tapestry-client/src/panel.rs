use crate::{
    api::{Comment, CommentId, Error, NewComment, PostId, Store, UserId},
    build_comment_forest, count_comments, distinct_authors, find_comment, name_lookup,
    CommentNode, NameLookup,
};

/// Everything needed to build the comment forest of one post
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadSnapshot {
    pub comments: Vec<Comment>,
    pub names: NameLookup,
}

impl ThreadSnapshot {
    pub fn build(&self) -> Vec<CommentNode> {
        build_comment_forest(&self.comments, &self.names)
    }
}

/// Fetches the comments of `post`, then the profiles of their authors
pub async fn fetch_thread<S: Store + ?Sized>(
    store: &S,
    post: PostId,
) -> Result<ThreadSnapshot, Error> {
    let comments = store.fetch_comments(post).await?;
    let authors = distinct_authors(comments.iter().map(|c| c.user_id));
    let names = match authors.is_empty() {
        true => NameLookup::new(),
        false => name_lookup(&store.fetch_profiles(&authors).await?),
    };
    tracing::debug!(?post, num_comments = comments.len(), "fetched thread");
    Ok(ThreadSnapshot { comments, names })
}

/// Comment count for the badge of a closed panel
pub async fn fetch_comment_count<S: Store + ?Sized>(
    store: &S,
    post: PostId,
) -> Result<usize, Error> {
    store.count_comments(post).await
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PanelEvent {
    Opened,
    Closed,
    CommentAdded,
    CommentDeleted,
}

/// Identifies one refresh of a panel; only the latest one gets applied
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RefreshTicket {
    post: PostId,
    generation: u64,
}

impl RefreshTicket {
    pub fn post(&self) -> PostId {
        self.post
    }
}

/// Comment section of one post
#[derive(Clone, Debug)]
pub struct CommentPanel {
    post: PostId,
    open: bool,
    generation: u64,
    forest: Vec<CommentNode>,
    comment_count: usize,
    error: Option<String>,
}

impl CommentPanel {
    pub fn new(post: PostId) -> CommentPanel {
        CommentPanel {
            post,
            open: false,
            generation: 0,
            forest: Vec::new(),
            comment_count: 0,
            error: None,
        }
    }

    pub fn post(&self) -> PostId {
        self.post
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn forest(&self) -> &[CommentNode] {
        &self.forest
    }

    pub fn comment_count(&self) -> usize {
        self.comment_count
    }

    pub fn set_comment_count(&mut self, count: usize) {
        self.comment_count = count;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Records the event, returning a ticket if the thread must be fetched again
    pub fn handle(&mut self, event: PanelEvent) -> Option<RefreshTicket> {
        match event {
            PanelEvent::Opened => self.open = true,
            PanelEvent::Closed => {
                self.open = false;
                return None;
            }
            PanelEvent::CommentAdded | PanelEvent::CommentDeleted if !self.open => return None,
            PanelEvent::CommentAdded | PanelEvent::CommentDeleted => (),
        }
        self.generation += 1;
        Some(RefreshTicket {
            post: self.post,
            generation: self.generation,
        })
    }

    /// Applies the result of the fetch started for `ticket`. Results of any
    /// ticket but the latest one are dropped, and false is returned.
    ///
    /// On error the previous forest stays displayed alongside the message.
    pub fn complete(
        &mut self,
        ticket: RefreshTicket,
        result: Result<ThreadSnapshot, Error>,
    ) -> bool {
        if ticket.post != self.post || ticket.generation != self.generation {
            tracing::debug!(?ticket, current = self.generation, "dropping stale thread fetch");
            return false;
        }
        match result {
            Ok(snapshot) => {
                self.comment_count = count_comments(&snapshot.comments);
                self.forest = snapshot.build();
                self.error = None;
            }
            Err(err) => {
                tracing::warn!(post = ?self.post, %err, "failed loading comments");
                self.error = Some(format!("Failed to load comments: {err}"));
            }
        }
        true
    }

    pub async fn on_event<S: Store + ?Sized>(&mut self, store: &S, event: PanelEvent) {
        if let Some(ticket) = self.handle(event) {
            self.run(store, ticket).await;
        }
    }

    /// Fetches the thread again, whatever happened since the last fetch
    pub async fn refresh<S: Store + ?Sized>(&mut self, store: &S) {
        self.generation += 1;
        let ticket = RefreshTicket {
            post: self.post,
            generation: self.generation,
        };
        self.run(store, ticket).await;
    }

    async fn run<S: Store + ?Sized>(&mut self, store: &S, ticket: RefreshTicket) {
        let res = fetch_thread(store, ticket.post).await;
        self.complete(ticket, res);
    }

    /// Posts a comment, or a reply to `parent`, then reloads the thread
    pub async fn add_comment<S: Store + ?Sized>(
        &mut self,
        store: &S,
        author: UserId,
        parent: Option<CommentId>,
        content: String,
    ) -> Result<Comment, Error> {
        let new = NewComment {
            post_id: self.post,
            user_id: author,
            content,
            parent_id: parent,
        };
        new.validate()?;
        let comment = match store.insert_comment(new).await {
            Ok(c) => c,
            Err(err) => {
                self.error = Some(format!("Failed to post comment: {err}"));
                return Err(err);
            }
        };
        self.on_event(store, PanelEvent::CommentAdded).await;
        Ok(comment)
    }

    /// Deletes a comment written by `viewer`, then reloads the thread
    pub async fn delete_comment<S: Store + ?Sized>(
        &mut self,
        store: &S,
        viewer: UserId,
        comment: CommentId,
    ) -> Result<(), Error> {
        let node = find_comment(&self.forest, &comment).ok_or(Error::NotFound(comment.0))?;
        if !node.is_author(&viewer) {
            return Err(Error::PermissionDenied);
        }
        if let Err(err) = store.delete_comment(viewer, comment).await {
            self.error = Some(format!("Failed to delete comment: {err}"));
            return Err(err);
        }
        self.on_event(store, PanelEvent::CommentDeleted).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tapestry_mock_server::MockServer;

    use super::*;
    use crate::api::{NewPost, Section, Uuid};

    async fn setup() -> (MockServer, UserId, UserId, PostId) {
        let mock = MockServer::new();
        let ada = mock.test_add_user("ada@example.org", Some("Ada")).await;
        let bob = mock.test_add_user("bob@example.org", None).await;
        let post = mock
            .insert_post(NewPost::new(ada, Section::Stem, String::from("growing")))
            .await
            .unwrap();
        (mock, ada, bob, post.id)
    }

    #[tokio::test]
    async fn opening_loads_the_thread() {
        let (mock, ada, bob, post) = setup().await;
        let mut panel = CommentPanel::new(post);
        assert_eq!(panel.handle(PanelEvent::CommentAdded), None);

        let first = panel
            .add_comment(&mock, ada, None, String::from("first"))
            .await
            .unwrap();
        // closed panels do not refetch
        assert!(panel.forest().is_empty());

        panel.on_event(&mock, PanelEvent::Opened).await;
        assert!(panel.is_open());
        assert_eq!(panel.comment_count(), 1);

        panel
            .add_comment(&mock, bob, Some(first.id), String::from("reply"))
            .await
            .unwrap();
        assert_eq!(panel.comment_count(), 2);
        let forest = panel.forest();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].full_name.as_deref(), Some("Ada"));
        assert_eq!(forest[0].replies[0].content, "reply");
        assert_eq!(forest[0].replies[0].full_name, None);
        assert_eq!(fetch_comment_count(&mock, post).await, Ok(2));
    }

    #[tokio::test]
    async fn empty_comments_are_refused() {
        let (mock, ada, _, post) = setup().await;
        let mut panel = CommentPanel::new(post);
        panel.on_event(&mock, PanelEvent::Opened).await;
        assert_eq!(
            panel.add_comment(&mock, ada, None, String::from(" \n ")).await,
            Err(Error::EmptyContent)
        );
        assert_eq!(mock.count_comments(post).await, Ok(0));
    }

    #[tokio::test]
    async fn only_authors_delete() {
        let (mock, ada, bob, post) = setup().await;
        let mut panel = CommentPanel::new(post);
        panel.on_event(&mock, PanelEvent::Opened).await;
        let root = panel
            .add_comment(&mock, ada, None, String::from("root"))
            .await
            .unwrap();
        let reply = panel
            .add_comment(&mock, bob, Some(root.id), String::from("reply"))
            .await
            .unwrap();

        assert_eq!(
            panel.delete_comment(&mock, bob, root.id).await,
            Err(Error::PermissionDenied)
        );
        assert_eq!(
            panel
                .delete_comment(&mock, bob, CommentId(Uuid::from_u128(3)))
                .await,
            Err(Error::NotFound(Uuid::from_u128(3)))
        );
        assert_eq!(mock.count_comments(post).await, Ok(2));

        // the reply outlives its parent and moves to the top level
        panel.delete_comment(&mock, ada, root.id).await.unwrap();
        assert_eq!(panel.comment_count(), 1);
        assert_eq!(panel.forest()[0].id, reply.id);
    }

    #[tokio::test]
    async fn stale_fetches_are_dropped() {
        let (mock, ada, _, post) = setup().await;
        let mut panel = CommentPanel::new(post);
        let older = panel.handle(PanelEvent::Opened).unwrap();
        let older_res = fetch_thread(&mock, post).await;

        mock.insert_comment(NewComment {
            post_id: post,
            user_id: ada,
            content: String::from("late"),
            parent_id: None,
        })
        .await
        .unwrap();
        let newer = panel.handle(PanelEvent::CommentAdded).unwrap();
        let newer_res = fetch_thread(&mock, post).await;

        assert!(panel.complete(newer, newer_res));
        assert!(!panel.complete(older, older_res));
        assert_eq!(panel.comment_count(), 1);
        assert_eq!(panel.forest()[0].content, "late");
    }

    #[tokio::test]
    async fn errors_keep_previous_forest() {
        let (mock, ada, _, post) = setup().await;
        let mut panel = CommentPanel::new(post);
        panel.on_event(&mock, PanelEvent::Opened).await;
        panel
            .add_comment(&mock, ada, None, String::from("kept"))
            .await
            .unwrap();

        let ticket = panel.handle(PanelEvent::CommentAdded).unwrap();
        assert!(panel.complete(ticket, Err(Error::Unknown(String::from("offline")))));
        assert_eq!(panel.forest().len(), 1);
        assert!(panel.error().unwrap().contains("offline"));
        panel.dismiss_error();
        assert_eq!(panel.error(), None);
    }

    #[tokio::test]
    async fn closing_keeps_the_count() {
        let (mock, ada, _, post) = setup().await;
        let mut panel = CommentPanel::new(post);
        panel.on_event(&mock, PanelEvent::Opened).await;
        panel
            .add_comment(&mock, ada, None, String::from("one"))
            .await
            .unwrap();
        panel.on_event(&mock, PanelEvent::Closed).await;
        assert!(!panel.is_open());
        assert_eq!(panel.comment_count(), 1);
    }

    #[tokio::test]
    async fn broken_threads_still_display() {
        let (mock, ada, _, post) = setup().await;
        let (a, b) = (CommentId(Uuid::new_v4()), CommentId(Uuid::new_v4()));
        let orphan = CommentId(Uuid::new_v4());
        for (id, parent) in [(a, b), (b, a), (orphan, CommentId(Uuid::nil()))] {
            mock.test_insert_raw_comment(Comment {
                id,
                content: String::from("raw"),
                created_at: chrono::Utc::now(),
                user_id: ada,
                post_id: post,
                parent_id: Some(parent),
            })
            .await;
        }
        let mut panel = CommentPanel::new(post);
        panel.on_event(&mock, PanelEvent::Opened).await;
        assert_eq!(panel.comment_count(), 3);
        let forest = panel.forest();
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].id, a);
        assert_eq!(forest[0].replies[0].id, b);
        assert_eq!(forest[0].full_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn refresh_picks_up_foreign_comments() {
        let (mock, ada, bob, post) = setup().await;
        let mut panel = CommentPanel::new(post);
        panel.on_event(&mock, PanelEvent::Opened).await;
        mock.insert_comment(NewComment {
            post_id: post,
            user_id: bob,
            content: String::from("from elsewhere"),
            parent_id: None,
        })
        .await
        .unwrap();
        assert!(panel.forest().is_empty());

        panel.refresh(&mock).await;
        assert_eq!(panel.forest()[0].content, "from elsewhere");
        assert!(!panel.forest()[0].is_author(&ada));
    }

    #[tokio::test]
    async fn deep_threads_open_and_reload() {
        let (mock, ada, _, post) = setup().await;
        let start = chrono::Utc::now();
        let mut parent = None;
        for n in 0..100_000 {
            let id = CommentId(Uuid::from_u128(0x5eed_0000 + n));
            mock.test_insert_raw_comment(Comment {
                id,
                content: String::from("deeper"),
                created_at: start + chrono::Duration::milliseconds(n as i64),
                user_id: ada,
                post_id: post,
                parent_id: parent,
            })
            .await;
            parent = Some(id);
        }
        let mut panel = CommentPanel::new(post);
        panel.on_event(&mock, PanelEvent::Opened).await;
        assert_eq!(panel.comment_count(), 100_000);
        assert_eq!(panel.forest().len(), 1);

        // the previous forest gets dropped when the new one comes in
        panel.refresh(&mock).await;
        assert_eq!(panel.comment_count(), 100_000);
        assert_eq!(crate::forest_len(panel.forest()), 100_000);
    }
}
