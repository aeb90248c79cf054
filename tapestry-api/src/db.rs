use async_trait::async_trait;

use crate::{
    AuthToken, Comment, CommentId, Error, NewComment, NewPhoto, NewPost, NewSession, NewUser,
    Post, PostId, Profile, ProfileUpdate, Section, UserId,
};

/// Rows of the posts, comments and profiles tables, plus photo storage
#[async_trait]
pub trait Store: Send + Sync {
    /// Comments of a post, oldest first
    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, Error>;
    async fn count_comments(&self, post: PostId) -> Result<usize, Error>;
    async fn insert_comment(&self, c: NewComment) -> Result<Comment, Error>;
    /// Only deletes the comment if `owner` wrote it, replies are left in place
    async fn delete_comment(&self, owner: UserId, c: CommentId) -> Result<(), Error>;

    /// Profiles of the listed users, missing profiles are simply absent
    async fn fetch_profiles(&self, users: &[UserId]) -> Result<Vec<Profile>, Error>;
    async fn upsert_profile(&self, user: UserId, p: ProfileUpdate) -> Result<Profile, Error>;

    /// Posts of a section (or of all sections), newest first
    async fn fetch_posts(&self, section: Option<Section>) -> Result<Vec<Post>, Error>;
    async fn insert_post(&self, p: NewPost) -> Result<Post, Error>;
    /// Only deletes the post if `owner` wrote it
    async fn delete_post(&self, owner: UserId, p: PostId) -> Result<(), Error>;

    /// Returns the public url of the stored photo
    async fn upload_photo(&self, owner: UserId, p: NewPhoto) -> Result<String, Error>;
    async fn fetch_photo(&self, name: &str) -> Result<Vec<u8>, Error>;
}

#[async_trait]
pub trait Identity: Send + Sync {
    async fn sign_up(&self, u: NewUser) -> Result<(), Error>;
    async fn sign_in(&self, s: NewSession) -> Result<AuthToken, Error>;
    async fn sign_out(&self, t: AuthToken) -> Result<(), Error>;
    async fn whoami(&self, t: AuthToken) -> Result<UserId, Error>;
}

pub trait Backend: Store + Identity {}

impl<T: Store + Identity> Backend for T {}
