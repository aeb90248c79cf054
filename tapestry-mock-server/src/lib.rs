use std::collections::{btree_map, BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tapestry_api::{
    validate_photo_name, verify_password, AuthToken, Comment, CommentId, Error, Identity,
    NewComment, NewPhoto, NewPost, NewSession, NewUser, Post, PostId, Profile, ProfileUpdate,
    Section, Store, Time, UserId, Uuid,
};
use tokio::sync::RwLock;

/// Password given to every user created by `test_add_user`
pub const TEST_PASSWORD: &str = "password";

/// In-memory backend behaving like the postgres one
pub struct MockServer {
    public_url: String,
    db: RwLock<MockDb>,
}

#[derive(Debug, Default)]
struct MockDb {
    users: BTreeMap<UserId, DbUser>,
    sessions: HashMap<AuthToken, UserId>,
    profiles: HashMap<UserId, Profile>,
    // both in insertion order
    posts: Vec<Post>,
    comments: Vec<Comment>,
    photos: HashMap<String, Vec<u8>>,
    last_time: Option<Time>,
}

#[derive(Debug)]
struct DbUser {
    email: String,
    pass_hash: String,
}

impl MockDb {
    /// Strictly increasing timestamps, so that ordering by date is stable
    fn now(&mut self) -> Time {
        let now = match self.last_time {
            Some(t) if t >= Utc::now() => t + Duration::milliseconds(1),
            _ => Utc::now(),
        };
        self.last_time = Some(now);
        now
    }

    fn create_user(&mut self, u: NewUser) -> Result<(), Error> {
        u.validate()?;
        if self.users.values().any(|db| db.email == u.email) {
            return Err(Error::EmailAlreadyUsed(u.email));
        }
        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbUser {
                    email: u.email.clone(),
                    pass_hash: u.initial_password_hash,
                });
                self.profiles.insert(
                    u.id,
                    Profile {
                        id: u.id,
                        full_name: u.full_name,
                        avatar_url: None,
                        email: Some(u.email),
                    },
                );
                Ok(())
            }
        }
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer::with_public_url(String::from("mock://tapestry"))
    }

    pub fn with_public_url(public_url: String) -> MockServer {
        MockServer {
            public_url,
            db: RwLock::new(MockDb::default()),
        }
    }

    /// Creates a user whose password is `TEST_PASSWORD`
    pub async fn test_add_user(&self, email: &str, full_name: Option<&str>) -> UserId {
        let id = UserId(Uuid::new_v4());
        let user = NewUser {
            id,
            email: String::from(email),
            full_name: full_name.map(String::from),
            // tests do not need a costly hash
            initial_password_hash: bcrypt::hash(TEST_PASSWORD, 4).expect("hashing password"),
        };
        self.db
            .write()
            .await
            .create_user(user)
            .unwrap_or_else(|e| panic!("adding test user {email:?}: {e}"));
        id
    }

    /// Inserts a comment as is, bypassing validation, to build broken threads
    pub async fn test_insert_raw_comment(&self, c: Comment) {
        self.db.write().await.comments.push(c);
    }

    /// Return the current number of users
    pub async fn test_num_users(&self) -> usize {
        self.db.read().await.users.len()
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

#[async_trait]
impl Store for MockServer {
    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, Error> {
        let db = self.db.read().await;
        let mut res = db
            .comments
            .iter()
            .filter(|c| c.post_id == post)
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by_key(|c| c.created_at);
        Ok(res)
    }

    async fn count_comments(&self, post: PostId) -> Result<usize, Error> {
        let db = self.db.read().await;
        Ok(db.comments.iter().filter(|c| c.post_id == post).count())
    }

    async fn insert_comment(&self, c: NewComment) -> Result<Comment, Error> {
        c.validate()?;
        let mut db = self.db.write().await;
        if !db.posts.iter().any(|p| p.id == c.post_id) {
            return Err(Error::NotFound(c.post_id.0));
        }
        if let Some(parent) = c.parent_id {
            if !db
                .comments
                .iter()
                .any(|o| o.id == parent && o.post_id == c.post_id)
            {
                return Err(Error::NotFound(parent.0));
            }
        }
        let now = db.now();
        let comment = c.into_comment(CommentId(Uuid::new_v4()), now);
        db.comments.push(comment.clone());
        Ok(comment)
    }

    async fn delete_comment(&self, owner: UserId, c: CommentId) -> Result<(), Error> {
        let mut db = self.db.write().await;
        let len = db.comments.len();
        // replies are kept, the way the comments table has no cascade
        db.comments
            .retain(|comment| !(comment.id == c && comment.user_id == owner));
        match db.comments.len() == len {
            true => Err(Error::NotFound(c.0)),
            false => Ok(()),
        }
    }

    async fn fetch_profiles(&self, users: &[UserId]) -> Result<Vec<Profile>, Error> {
        let db = self.db.read().await;
        Ok(users
            .iter()
            .filter_map(|u| db.profiles.get(u))
            .cloned()
            .collect())
    }

    async fn upsert_profile(&self, user: UserId, p: ProfileUpdate) -> Result<Profile, Error> {
        p.validate()?;
        let profile = p.into_profile(user);
        self.db
            .write()
            .await
            .profiles
            .insert(user, profile.clone());
        Ok(profile)
    }

    async fn fetch_posts(&self, section: Option<Section>) -> Result<Vec<Post>, Error> {
        let db = self.db.read().await;
        let mut res = db
            .posts
            .iter()
            .rev()
            .filter(|p| section.map_or(true, |s| p.section == Some(s)))
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by_key(|p| std::cmp::Reverse(p.created_at));
        Ok(res)
    }

    async fn insert_post(&self, p: NewPost) -> Result<Post, Error> {
        p.validate()?;
        let mut db = self.db.write().await;
        if !db.users.contains_key(&p.user_id) {
            return Err(Error::NotFound(p.user_id.0));
        }
        let now = db.now();
        let post = p.into_post(PostId(Uuid::new_v4()), now);
        db.posts.push(post.clone());
        Ok(post)
    }

    async fn delete_post(&self, owner: UserId, p: PostId) -> Result<(), Error> {
        let mut db = self.db.write().await;
        let len = db.posts.len();
        db.posts.retain(|post| !(post.id == p && post.user_id == owner));
        if db.posts.len() == len {
            return Err(Error::NotFound(p.0));
        }
        db.comments.retain(|c| c.post_id != p);
        Ok(())
    }

    async fn upload_photo(&self, owner: UserId, p: NewPhoto) -> Result<String, Error> {
        let mut db = self.db.write().await;
        let now = db.now();
        let name = p.storage_name(owner, now)?;
        tracing::debug!(?owner, %name, size = p.data.len(), "storing photo");
        db.photos.insert(name.clone(), p.data);
        Ok(format!("{}/photos/{}", self.public_url, name))
    }

    async fn fetch_photo(&self, name: &str) -> Result<Vec<u8>, Error> {
        validate_photo_name(name)?;
        let db = self.db.read().await;
        db.photos
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PhotoNotFound(String::from(name)))
    }
}

#[async_trait]
impl Identity for MockServer {
    async fn sign_up(&self, u: NewUser) -> Result<(), Error> {
        self.db.write().await.create_user(u)
    }

    async fn sign_in(&self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let mut db = self.db.write().await;
        let user = db
            .users
            .iter()
            .find(|(_, u)| u.email == s.email && verify_password(&s.password, &u.pass_hash))
            .map(|(id, _)| *id)
            .ok_or(Error::PermissionDenied)?;
        let tok = AuthToken(Uuid::new_v4());
        db.sessions.insert(tok, user);
        Ok(tok)
    }

    async fn sign_out(&self, t: AuthToken) -> Result<(), Error> {
        self.db
            .write()
            .await
            .sessions
            .remove(&t)
            .map(|_| ())
            .ok_or(Error::PermissionDenied)
    }

    async fn whoami(&self, t: AuthToken) -> Result<UserId, Error> {
        self.db
            .read()
            .await
            .sessions
            .get(&t)
            .copied()
            .ok_or(Error::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions() {
        let mock = MockServer::new();
        let ada = mock.test_add_user("ada@example.org", Some("Ada")).await;
        let bad = NewSession {
            email: String::from("ada@example.org"),
            password: String::from("wrong"),
        };
        assert_eq!(mock.sign_in(bad).await, Err(Error::PermissionDenied));

        let tok = mock
            .sign_in(NewSession {
                email: String::from("ada@example.org"),
                password: String::from(TEST_PASSWORD),
            })
            .await
            .unwrap();
        assert_eq!(mock.whoami(tok).await, Ok(ada));
        mock.sign_out(tok).await.unwrap();
        assert_eq!(mock.whoami(tok).await, Err(Error::PermissionDenied));
        assert_eq!(mock.sign_out(tok).await, Err(Error::PermissionDenied));
    }

    #[tokio::test]
    async fn sign_up_conflicts() {
        let mock = MockServer::new();
        let ada = mock.test_add_user("ada@example.org", None).await;
        let again = NewUser {
            id: UserId(Uuid::new_v4()),
            email: String::from("ada@example.org"),
            full_name: None,
            initial_password_hash: String::from("x"),
        };
        assert_eq!(
            mock.sign_up(again.clone()).await,
            Err(Error::EmailAlreadyUsed(String::from("ada@example.org")))
        );
        let same_id = NewUser {
            id: ada,
            email: String::from("other@example.org"),
            ..again
        };
        assert_eq!(mock.sign_up(same_id).await, Err(Error::UuidAlreadyUsed(ada.0)));
        assert_eq!(mock.test_num_users().await, 1);
        let profiles = mock.fetch_profiles(&[ada]).await.unwrap();
        assert_eq!(profiles[0].email.as_deref(), Some("ada@example.org"));
    }

    #[tokio::test]
    async fn deleting_a_post_drops_its_comments() {
        let mock = MockServer::new();
        let ada = mock.test_add_user("ada@example.org", None).await;
        let bob = mock.test_add_user("bob@example.org", None).await;
        let post = mock
            .insert_post(NewPost::new(ada, Section::Fruit, String::from("harvest")))
            .await
            .unwrap();
        let root = mock
            .insert_comment(NewComment {
                post_id: post.id,
                user_id: bob,
                content: String::from("nice"),
                parent_id: None,
            })
            .await
            .unwrap();
        mock.insert_comment(NewComment {
            post_id: post.id,
            user_id: ada,
            content: String::from("thanks"),
            parent_id: Some(root.id),
        })
        .await
        .unwrap();

        assert_eq!(
            mock.delete_comment(ada, root.id).await,
            Err(Error::NotFound(root.id.0))
        );
        mock.delete_comment(bob, root.id).await.unwrap();
        assert_eq!(
            mock.delete_comment(bob, root.id).await,
            Err(Error::NotFound(root.id.0))
        );
        let left = mock.fetch_comments(post.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].parent_id, Some(root.id));

        assert_eq!(
            mock.delete_post(bob, post.id).await,
            Err(Error::NotFound(post.id.0))
        );
        mock.delete_post(ada, post.id).await.unwrap();
        assert_eq!(mock.count_comments(post.id).await, Ok(0));
    }

    #[tokio::test]
    async fn replies_stay_within_their_post() {
        let mock = MockServer::new();
        let ada = mock.test_add_user("ada@example.org", None).await;
        let mut posts = Vec::new();
        for text in ["one", "two"] {
            let post = mock
                .insert_post(NewPost::new(ada, Section::Leaves, String::from(text)))
                .await
                .unwrap();
            posts.push(post.id);
        }
        let elsewhere = mock
            .insert_comment(NewComment {
                post_id: posts[0],
                user_id: ada,
                content: String::from("on the first post"),
                parent_id: None,
            })
            .await
            .unwrap();
        let reply = |parent: CommentId| NewComment {
            post_id: posts[1],
            user_id: ada,
            content: String::from("reply"),
            parent_id: Some(parent),
        };

        assert_eq!(
            mock.insert_comment(reply(elsewhere.id)).await,
            Err(Error::NotFound(elsewhere.id.0))
        );
        let missing = CommentId(Uuid::new_v4());
        assert_eq!(
            mock.insert_comment(reply(missing)).await,
            Err(Error::NotFound(missing.0))
        );
        assert_eq!(mock.count_comments(posts[1]).await, Ok(0));

        let root = mock
            .insert_comment(NewComment {
                parent_id: None,
                ..reply(missing)
            })
            .await
            .unwrap();
        assert!(mock.insert_comment(reply(root.id)).await.is_ok());
        assert_eq!(mock.count_comments(posts[1]).await, Ok(2));
    }

    #[tokio::test]
    async fn posts_newest_first() {
        let mock = MockServer::new();
        let ada = mock.test_add_user("ada@example.org", None).await;
        for text in ["a", "b", "c"] {
            mock.insert_post(NewPost::new(ada, Section::Roots, String::from(text)))
                .await
                .unwrap();
        }
        let posts = mock.fetch_posts(None).await.unwrap();
        let texts = posts.iter().map(|p| p.content.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["c", "b", "a"]);
        assert!(mock.fetch_posts(Some(Section::Stem)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn photos() {
        let mock = MockServer::new();
        let ada = mock.test_add_user("ada@example.org", None).await;
        let url = mock
            .upload_photo(
                ada,
                NewPhoto {
                    file_name: String::from("garden.JPG"),
                    data: vec![1, 2, 3],
                },
            )
            .await
            .unwrap();
        let name = url.rsplit('/').next().unwrap();
        assert!(name.ends_with(".jpg"));
        assert_eq!(mock.fetch_photo(name).await, Ok(vec![1, 2, 3]));
        assert_eq!(
            mock.fetch_photo("nope.png").await,
            Err(Error::PhotoNotFound(String::from("nope.png")))
        );
        assert!(matches!(
            mock.fetch_photo("../etc/passwd").await,
            Err(Error::InvalidFileName(_))
        ));
    }
}
