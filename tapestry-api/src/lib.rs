use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
pub use auth::{verify_password, AuthToken, NewSession, NewUser, BCRYPT_COST};

mod comment;
pub use comment::{Comment, CommentId, NewComment};

mod db;
pub use db::{Backend, Identity, Store};

mod error;
pub use error::Error;

mod photo;
pub use photo::{validate_photo_name, NewPhoto};

mod post;
pub use post::{Category, NewPost, Post, PostId, Section};

mod user;
pub use user::{Profile, ProfileUpdate, UserId};

// Postgres refuses null bytes in TEXT columns, so they are rejected before
// reaching the store, whatever the store actually is
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// User-written text must still have something to show once trimmed
pub fn validate_content(s: &str) -> Result<(), Error> {
    validate_string(s)?;
    if s.trim().is_empty() {
        return Err(Error::EmptyContent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_validation() {
        assert_eq!(validate_content("hello"), Ok(()));
        assert_eq!(validate_content("  \n\t "), Err(Error::EmptyContent));
        assert_eq!(validate_content(""), Err(Error::EmptyContent));
        assert_eq!(
            validate_content("a\0b"),
            Err(Error::NullByteInString(String::from("a\0b")))
        );
    }
}
