use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use tapestry_api::Backend;

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

use db::PgBackend;
use error::Error;
use extractors::AppState;

// photos travel base64-encoded inside json bodies
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "TAPESTRY_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Base url the server is reachable at, used to build photo urls
    #[structopt(long, env = "TAPESTRY_PUBLIC_URL", default_value = "http://localhost:3000")]
    public_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    let db = create_sqlx_pool(&opt.database_url)
        .await
        .with_context(|| format!("opening database {:?}", opt.database_url))?;
    MIGRATOR
        .run(&db)
        .await
        .context("running pending migrations")?;

    let public_url = String::from(opt.public_url.trim_end_matches('/'));
    let app = app(Arc::new(PgBackend::new(db, public_url)));

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .context("connecting to postgres")
}

pub fn app(backend: Arc<dyn Backend>) -> Router {
    use handlers::*;
    Router::new()
        .route("/api/signup", post(signup))
        .route("/api/auth", post(auth))
        .route("/api/unauth", post(unauth))
        .route("/api/whoami", get(whoami))
        .route("/api/posts", get(fetch_posts).post(insert_post))
        .route("/api/posts/:id", delete(delete_post))
        .route("/api/posts/:id/comments", get(fetch_comments))
        .route("/api/posts/:id/comment-count", get(count_comments))
        .route("/api/comments", post(insert_comment))
        .route("/api/comments/:id", delete(delete_comment))
        .route("/api/profiles", post(fetch_profiles))
        .route("/api/profile", put(upsert_profile))
        .route("/api/photos", post(upload_photo))
        .route("/photos/:name", get(fetch_photo))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(AppState { backend })
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
