use futures::future;

use crate::{
    api::{Error, NewPost, Post, PostId, Section, Store, UserId},
    distinct_authors, name_lookup, NameLookup,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PostView {
    pub post: Post,
    pub full_name: Option<String>,
    pub comment_count: usize,
}

impl PostView {
    pub fn author_name(&self) -> String {
        self.full_name
            .clone()
            .unwrap_or_else(|| self.post.user_id.placeholder_name())
    }

    pub fn is_author(&self, user: &UserId) -> bool {
        self.post.user_id == *user
    }
}

/// Posts of one section (or of every section), newest first
#[derive(Clone, Debug)]
pub struct PostFeed {
    section: Option<Section>,
    posts: Vec<PostView>,
}

impl PostFeed {
    pub async fn fetch<S: Store + ?Sized>(
        store: &S,
        section: Option<Section>,
    ) -> Result<PostFeed, Error> {
        let posts = store.fetch_posts(section).await?;
        let authors = distinct_authors(posts.iter().map(|p| p.user_id));
        let names = match authors.is_empty() {
            true => NameLookup::new(),
            false => name_lookup(&store.fetch_profiles(&authors).await?),
        };
        let counts =
            future::try_join_all(posts.iter().map(|p| store.count_comments(p.id))).await?;
        tracing::debug!(?section, num_posts = posts.len(), "fetched post feed");
        Ok(PostFeed {
            section,
            posts: posts
                .into_iter()
                .zip(counts)
                .map(|(post, comment_count)| PostView {
                    full_name: names.get(&post.user_id).cloned(),
                    post,
                    comment_count,
                })
                .collect(),
        })
    }

    pub fn section(&self) -> Option<Section> {
        self.section
    }

    pub fn posts(&self) -> &[PostView] {
        &self.posts
    }

    /// Publishes a post, showing it on top of the feed if it belongs there
    pub async fn publish<S: Store + ?Sized>(
        &mut self,
        store: &S,
        new: NewPost,
    ) -> Result<Post, Error> {
        new.validate()?;
        let post = store.insert_post(new).await?;
        if self.section.map_or(true, |s| post.section == Some(s)) {
            // the post is stored already, a missing name only means a placeholder
            let full_name = match store.fetch_profiles(&[post.user_id]).await {
                Ok(profiles) => profiles.into_iter().find_map(|p| p.full_name),
                Err(err) => {
                    tracing::warn!(post = ?post.id, %err, "failed fetching the author name");
                    None
                }
            };
            self.posts.insert(
                0,
                PostView {
                    post: post.clone(),
                    full_name,
                    comment_count: 0,
                },
            );
        }
        Ok(post)
    }

    /// Deletes a post written by `viewer`
    pub async fn delete_post<S: Store + ?Sized>(
        &mut self,
        store: &S,
        viewer: UserId,
        post: PostId,
    ) -> Result<(), Error> {
        let view = self
            .posts
            .iter()
            .find(|p| p.post.id == post)
            .ok_or(Error::NotFound(post.0))?;
        if !view.is_author(&viewer) {
            return Err(Error::PermissionDenied);
        }
        store.delete_post(viewer, post).await?;
        self.posts.retain(|p| p.post.id != post);
        Ok(())
    }
}
