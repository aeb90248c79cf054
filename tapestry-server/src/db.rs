use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Row};
use tapestry_api::{
    validate_photo_name, verify_password, AuthToken, Comment, CommentId, Error as ApiError,
    Identity, NewComment, NewPhoto, NewPost, NewSession, NewUser, Post, PostId, Profile,
    ProfileUpdate, Section, Store, Time, UserId, Uuid,
};

use crate::Error;

/// Backend storing everything in postgres, see `migrations/` for the schema
pub struct PgBackend {
    pool: sqlx::PgPool,
    public_url: String,
}

type PgConn = sqlx::pool::PoolConnection<sqlx::Postgres>;

impl PgBackend {
    pub fn new(pool: sqlx::PgPool, public_url: String) -> PgBackend {
        PgBackend { pool, public_url }
    }

    async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(self.pool.acquire().await.context("acquiring db connection")?)
    }
}

fn comment_from_row(r: &PgRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: CommentId(r.try_get("id")?),
        content: r.try_get("content")?,
        created_at: r.try_get("created_at")?,
        user_id: UserId(r.try_get("user_id")?),
        post_id: PostId(r.try_get("post_id")?),
        parent_id: r.try_get::<Option<Uuid>, _>("parent_id")?.map(CommentId),
    })
}

fn post_from_row(r: &PgRow) -> anyhow::Result<Post> {
    let section = r
        .try_get::<Option<String>, _>("section")?
        .map(|s| s.parse::<Section>())
        .transpose()
        .context("parsing post section")?;
    Ok(Post {
        id: PostId(r.try_get("id")?),
        created_at: r.try_get("created_at")?,
        content: r.try_get("content")?,
        user_id: UserId(r.try_get("user_id")?),
        likes: r.try_get("likes")?,
        section,
        category: r.try_get("category")?,
        category_emoji: r.try_get("category_emoji")?,
        category_part: r.try_get("category_part")?,
        subcategory: r.try_get("subcategory")?,
        subcategory_emoji: r.try_get("subcategory_emoji")?,
        photo_url: r.try_get("photo_url")?,
    })
}

fn profile_from_row(r: &PgRow) -> anyhow::Result<Profile> {
    Ok(Profile {
        id: UserId(r.try_get("id")?),
        full_name: r.try_get("full_name")?,
        avatar_url: r.try_get("avatar_url")?,
        email: r.try_get("email")?,
    })
}

pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> Result<Vec<Comment>, Error> {
    let rows = sqlx::query(
        "
            SELECT id, content, created_at, user_id, post_id, parent_id
            FROM comments
            WHERE post_id = $1
            ORDER BY created_at ASC, seq ASC
        ",
    )
    .bind(post.0)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("fetching comments of {:?}", post))?;
    Ok(rows
        .iter()
        .map(comment_from_row)
        .collect::<anyhow::Result<Vec<_>>>()
        .context("parsing comment rows")?)
}

pub async fn count_comments(conn: &mut sqlx::PgConnection, post: PostId) -> Result<usize, Error> {
    let count: i64 = sqlx::query("SELECT COUNT(*) FROM comments WHERE post_id = $1")
        .bind(post.0)
        .fetch_one(&mut *conn)
        .await
        .and_then(|r| r.try_get(0))
        .with_context(|| format!("counting comments of {:?}", post))?;
    Ok(usize::try_from(count).context("comment count out of range")?)
}

pub async fn insert_comment(
    conn: &mut sqlx::PgConnection,
    c: NewComment,
) -> Result<Comment, Error> {
    c.validate()?;
    let post_exists = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
        .bind(c.post_id.0)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("checking post {:?} exists", c.post_id))?
        .is_some();
    if !post_exists {
        return Err(Error::Api(ApiError::NotFound(c.post_id.0)));
    }
    if let Some(parent) = c.parent_id {
        let parent_exists = sqlx::query("SELECT 1 FROM comments WHERE id = $1 AND post_id = $2")
            .bind(parent.0)
            .bind(c.post_id.0)
            .fetch_optional(&mut *conn)
            .await
            .with_context(|| format!("checking parent comment {:?} exists", parent))?
            .is_some();
        if !parent_exists {
            return Err(Error::Api(ApiError::NotFound(parent.0)));
        }
    }
    let comment = c.into_comment(CommentId(Uuid::new_v4()), Utc::now());
    sqlx::query(
        "
            INSERT INTO comments (id, created_at, content, user_id, post_id, parent_id)
            VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
        .bind(comment.id.0)
        .bind(comment.created_at)
        .bind(&comment.content)
        .bind(comment.user_id.0)
        .bind(comment.post_id.0)
        .bind(comment.parent_id.map(|p| p.0))
        .execute(&mut *conn)
        .await
        .with_context(|| format!("inserting comment {:?}", comment.id))?;
    Ok(comment)
}

pub async fn delete_comment(
    conn: &mut sqlx::PgConnection,
    owner: UserId,
    c: CommentId,
) -> Result<(), Error> {
    let res = sqlx::query("DELETE FROM comments WHERE id = $1 AND user_id = $2")
        .bind(c.0)
        .bind(owner.0)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("deleting comment {:?}", c))?;
    match res.rows_affected() {
        0 => Err(Error::Api(ApiError::NotFound(c.0))),
        _ => Ok(()),
    }
}

pub async fn fetch_profiles(
    conn: &mut sqlx::PgConnection,
    users: &[UserId],
) -> Result<Vec<Profile>, Error> {
    let ids = users.iter().map(|u| u.0).collect::<Vec<Uuid>>();
    let rows = sqlx::query(
        "SELECT id, full_name, avatar_url, email FROM profiles WHERE id = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("fetching {} profiles", ids.len()))?;
    Ok(rows
        .iter()
        .map(profile_from_row)
        .collect::<anyhow::Result<Vec<_>>>()
        .context("parsing profile rows")?)
}

pub async fn upsert_profile(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    p: ProfileUpdate,
) -> Result<Profile, Error> {
    p.validate()?;
    let profile = p.into_profile(user);
    sqlx::query(
        "
            INSERT INTO profiles VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET full_name = $2, avatar_url = $3, email = $4
        ",
    )
    .bind(user.0)
    .bind(&profile.full_name)
    .bind(&profile.avatar_url)
    .bind(&profile.email)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("upserting profile of {:?}", user))?;
    Ok(profile)
}

pub async fn fetch_posts(
    conn: &mut sqlx::PgConnection,
    section: Option<Section>,
) -> Result<Vec<Post>, Error> {
    let rows = sqlx::query(
        "
            SELECT *
            FROM posts
            WHERE $1::VARCHAR IS NULL OR section = $1
            ORDER BY created_at DESC, seq DESC
        ",
    )
    .bind(section.map(|s| s.as_str()))
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("fetching posts of section {:?}", section))?;
    Ok(rows
        .iter()
        .map(post_from_row)
        .collect::<anyhow::Result<Vec<_>>>()
        .context("parsing post rows")?)
}

pub async fn insert_post(conn: &mut sqlx::PgConnection, p: NewPost) -> Result<Post, Error> {
    p.validate()?;
    let post = p.into_post(PostId(Uuid::new_v4()), Utc::now());
    sqlx::query(
        "
            INSERT INTO posts (
                id, created_at, content, user_id, likes, section, category,
                category_emoji, category_part, subcategory, subcategory_emoji, photo_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ",
    )
    .bind(post.id.0)
    .bind(post.created_at)
    .bind(&post.content)
    .bind(post.user_id.0)
    .bind(post.likes)
    .bind(post.section.map(|s| s.as_str()))
    .bind(&post.category)
    .bind(&post.category_emoji)
    .bind(&post.category_part)
    .bind(&post.subcategory)
    .bind(&post.subcategory_emoji)
    .bind(&post.photo_url)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("inserting post {:?}", post.id))?;
    Ok(post)
}

pub async fn delete_post(
    conn: &mut sqlx::PgConnection,
    owner: UserId,
    p: PostId,
) -> Result<(), Error> {
    // comments go away with the post through ON DELETE CASCADE
    let res = sqlx::query("DELETE FROM posts WHERE id = $1 AND user_id = $2")
        .bind(p.0)
        .bind(owner.0)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("deleting post {:?}", p))?;
    match res.rows_affected() {
        0 => Err(Error::Api(ApiError::NotFound(p.0))),
        _ => Ok(()),
    }
}

pub async fn insert_photo(
    conn: &mut sqlx::PgConnection,
    owner: UserId,
    p: NewPhoto,
    mut at: Time,
) -> Result<String, Error> {
    // names carry the upload millisecond, move to the next free one on collision
    for _ in 0..PHOTO_NAME_ATTEMPTS {
        let name = p.storage_name(owner, at)?;
        let res = sqlx::query(
            "INSERT INTO photos VALUES ($1, $2, $3, $4) ON CONFLICT (name) DO NOTHING",
        )
        .bind(&name)
        .bind(owner.0)
        .bind(at)
        .bind(&p.data)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("storing photo {name:?}"))?;
        if res.rows_affected() == 1 {
            return Ok(name);
        }
        at += chrono::Duration::milliseconds(1);
    }
    Err(anyhow!("no free photo name for {:?} after {PHOTO_NAME_ATTEMPTS} attempts", owner).into())
}

const PHOTO_NAME_ATTEMPTS: usize = 16;

pub async fn fetch_photo(conn: &mut sqlx::PgConnection, name: &str) -> Result<Vec<u8>, Error> {
    validate_photo_name(name)?;
    let row = sqlx::query("SELECT data FROM photos WHERE name = $1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("fetching photo {name:?}"))?
        .ok_or_else(|| Error::Api(ApiError::PhotoNotFound(String::from(name))))?;
    Ok(row.try_get("data").context("reading photo data")?)
}

pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<(), Error> {
    u.validate()?;
    let mut t = sqlx::Connection::begin(&mut *conn)
        .await
        .context("starting transaction")?;
    let conflicts = sqlx::query("SELECT id, email FROM users WHERE id = $1 OR email = $2")
        .bind(u.id.0)
        .bind(&u.email)
        .fetch_all(&mut *t)
        .await
        .with_context(|| format!("checking for conflicts with {:?}", u.id))?;
    let emails = conflicts
        .iter()
        .map(|r| r.try_get::<String, _>("email"))
        .collect::<Result<Vec<_>, _>>()
        .context("reading conflicting user emails")?;
    if emails.contains(&u.email) {
        return Err(Error::Api(ApiError::EmailAlreadyUsed(u.email)));
    }
    if !emails.is_empty() {
        return Err(Error::Api(ApiError::UuidAlreadyUsed(u.id.0)));
    }
    sqlx::query("INSERT INTO users VALUES ($1, $2, $3)")
        .bind(u.id.0)
        .bind(&u.email)
        .bind(&u.initial_password_hash)
        .execute(&mut *t)
        .await
        .with_context(|| format!("inserting user {:?}", u.id))?;
    sqlx::query("INSERT INTO profiles VALUES ($1, $2, NULL, $3)")
        .bind(u.id.0)
        .bind(&u.full_name)
        .bind(&u.email)
        .execute(&mut *t)
        .await
        .with_context(|| format!("inserting profile of {:?}", u.id))?;
    t.commit().await.context("committing user creation")?;
    Ok(())
}

pub async fn login_user(
    conn: &mut sqlx::PgConnection,
    s: &NewSession,
) -> anyhow::Result<Option<AuthToken>> {
    let row = sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(&s.email)
        .fetch_optional(&mut *conn)
        .await
        .context("fetching user by email")?;
    let row = match row {
        Some(row) => row,
        None => return Ok(None),
    };
    let hash: String = row.try_get("password_hash")?;
    if !verify_password(&s.password, &hash) {
        return Ok(None);
    }
    let user: Uuid = row.try_get("id")?;
    let token = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query("INSERT INTO sessions VALUES ($1, $2, $3, $3)")
        .bind(token)
        .bind(user)
        .bind(now)
        .execute(&mut *conn)
        .await
        .context("inserting new session")?;
    Ok(Some(AuthToken(token)))
}

pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(&mut *conn)
        .await
        .context("deleting session")?;
    match res.rows_affected() {
        0 => Ok(false),
        1 => Ok(true),
        n => Err(anyhow!("deleted {n} sessions for a single token")),
    }
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let row = sqlx::query(
        "UPDATE sessions SET last_active = $1 WHERE id = $2 RETURNING user_id",
    )
    .bind(Utc::now())
    .bind(token.0)
    .fetch_optional(&mut *conn)
    .await
    .context("recovering session")?
    .ok_or(Error::permission_denied())?;
    Ok(UserId(row.try_get("user_id").context("reading session user")?))
}

#[async_trait]
impl Store for PgBackend {
    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, ApiError> {
        Ok(fetch_comments(&mut *self.acquire().await?, post).await?)
    }

    async fn count_comments(&self, post: PostId) -> Result<usize, ApiError> {
        Ok(count_comments(&mut *self.acquire().await?, post).await?)
    }

    async fn insert_comment(&self, c: NewComment) -> Result<Comment, ApiError> {
        Ok(insert_comment(&mut *self.acquire().await?, c).await?)
    }

    async fn delete_comment(&self, owner: UserId, c: CommentId) -> Result<(), ApiError> {
        Ok(delete_comment(&mut *self.acquire().await?, owner, c).await?)
    }

    async fn fetch_profiles(&self, users: &[UserId]) -> Result<Vec<Profile>, ApiError> {
        Ok(fetch_profiles(&mut *self.acquire().await?, users).await?)
    }

    async fn upsert_profile(&self, user: UserId, p: ProfileUpdate) -> Result<Profile, ApiError> {
        Ok(upsert_profile(&mut *self.acquire().await?, user, p).await?)
    }

    async fn fetch_posts(&self, section: Option<Section>) -> Result<Vec<Post>, ApiError> {
        Ok(fetch_posts(&mut *self.acquire().await?, section).await?)
    }

    async fn insert_post(&self, p: NewPost) -> Result<Post, ApiError> {
        Ok(insert_post(&mut *self.acquire().await?, p).await?)
    }

    async fn delete_post(&self, owner: UserId, p: PostId) -> Result<(), ApiError> {
        Ok(delete_post(&mut *self.acquire().await?, owner, p).await?)
    }

    async fn upload_photo(&self, owner: UserId, p: NewPhoto) -> Result<String, ApiError> {
        let name = insert_photo(&mut *self.acquire().await?, owner, p, Utc::now()).await?;
        Ok(format!("{}/photos/{}", self.public_url, name))
    }

    async fn fetch_photo(&self, name: &str) -> Result<Vec<u8>, ApiError> {
        Ok(fetch_photo(&mut *self.acquire().await?, name).await?)
    }
}

#[async_trait]
impl Identity for PgBackend {
    async fn sign_up(&self, u: NewUser) -> Result<(), ApiError> {
        Ok(create_user(&mut *self.acquire().await?, u).await?)
    }

    async fn sign_in(&self, s: NewSession) -> Result<AuthToken, ApiError> {
        s.validate()?;
        let mut conn = self.acquire().await?;
        login_user(&mut *conn, &s)
            .await
            .context("logging user in")
            .map_err(Error::from)?
            .ok_or(ApiError::PermissionDenied)
    }

    async fn sign_out(&self, t: AuthToken) -> Result<(), ApiError> {
        let mut conn = self.acquire().await?;
        match logout_user(&mut *conn, &t).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ApiError::PermissionDenied),
            Err(e) => Err(Error::Anyhow(e).into()),
        }
    }

    async fn whoami(&self, t: AuthToken) -> Result<UserId, ApiError> {
        Ok(recover_session(&mut *self.acquire().await?, t).await?)
    }
}
