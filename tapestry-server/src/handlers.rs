use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use tapestry_api::{
    AuthToken, Backend, Comment, CommentId, Identity, NewComment, NewPhoto, NewPost, NewSession,
    NewUser, Post, PostId, Profile, ProfileUpdate, Section, Store, UserId, Uuid,
};

use crate::{extractors::*, Error};

type Db = State<Arc<dyn Backend>>;

pub async fn signup(State(db): Db, Json(data): Json<NewUser>) -> Result<(), Error> {
    data.validate()?;
    db.sign_up(data).await?;
    Ok(())
}

pub async fn auth(State(db): Db, Json(data): Json<NewSession>) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(db.sign_in(data).await?))
}

pub async fn unauth(State(db): Db, user: PreAuth) -> Result<(), Error> {
    Ok(db.sign_out(user.0).await?)
}

pub async fn whoami(Auth(user): Auth) -> Json<UserId> {
    Json(user)
}

#[derive(serde::Deserialize)]
pub struct PostsQuery {
    section: Option<String>,
}

pub async fn fetch_posts(
    Auth(_): Auth,
    State(db): Db,
    Query(q): Query<PostsQuery>,
) -> Result<Json<Vec<Post>>, Error> {
    let section = q
        .section
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Section>())
        .transpose()?;
    Ok(Json(db.fetch_posts(section).await?))
}

pub async fn insert_post(
    Auth(user): Auth,
    State(db): Db,
    Json(p): Json<NewPost>,
) -> Result<Json<Post>, Error> {
    if p.user_id != user {
        return Err(Error::permission_denied());
    }
    Ok(Json(db.insert_post(p).await?))
}

pub async fn delete_post(
    Auth(user): Auth,
    State(db): Db,
    Path(post): Path<Uuid>,
) -> Result<(), Error> {
    Ok(db.delete_post(user, PostId(post)).await?)
}

pub async fn fetch_comments(
    Auth(_): Auth,
    State(db): Db,
    Path(post): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, Error> {
    Ok(Json(db.fetch_comments(PostId(post)).await?))
}

pub async fn count_comments(
    Auth(_): Auth,
    State(db): Db,
    Path(post): Path<Uuid>,
) -> Result<Json<usize>, Error> {
    Ok(Json(db.count_comments(PostId(post)).await?))
}

pub async fn insert_comment(
    Auth(user): Auth,
    State(db): Db,
    Json(c): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    if c.user_id != user {
        return Err(Error::permission_denied());
    }
    Ok(Json(db.insert_comment(c).await?))
}

pub async fn delete_comment(
    Auth(user): Auth,
    State(db): Db,
    Path(comment): Path<Uuid>,
) -> Result<(), Error> {
    Ok(db.delete_comment(user, CommentId(comment)).await?)
}

pub async fn fetch_profiles(
    Auth(_): Auth,
    State(db): Db,
    Json(users): Json<Vec<UserId>>,
) -> Result<Json<Vec<Profile>>, Error> {
    Ok(Json(db.fetch_profiles(&users).await?))
}

pub async fn upsert_profile(
    Auth(user): Auth,
    State(db): Db,
    Json(p): Json<ProfileUpdate>,
) -> Result<Json<Profile>, Error> {
    Ok(Json(db.upsert_profile(user, p).await?))
}

pub async fn upload_photo(
    Auth(user): Auth,
    State(db): Db,
    Json(p): Json<NewPhoto>,
) -> Result<Json<String>, Error> {
    tracing::debug!(?user, file_name = %p.file_name, size = p.data.len(), "photo upload");
    Ok(Json(db.upload_photo(user, p).await?))
}

pub async fn fetch_photo(
    State(db): Db,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let data = db.fetch_photo(&name).await?;
    let mime = match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, mime)], data))
}
