use uuid::Uuid;

use crate::{Error, PostId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    pub created_at: Time,
    pub user_id: UserId,
    pub post_id: PostId,

    /// Comment this one replies to, None for a comment on the post itself
    pub parent_id: Option<CommentId>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub user_id: UserId,
    pub content: String,
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.content)
    }

    /// The store picks the id and creation date
    pub fn into_comment(self, id: CommentId, created_at: Time) -> Comment {
        Comment {
            id,
            content: self.content,
            created_at,
            user_id: self.user_id,
            post_id: self.post_id,
            parent_id: self.parent_id,
        }
    }
}
