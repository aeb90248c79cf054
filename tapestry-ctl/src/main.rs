use std::path::PathBuf;

use anyhow::{anyhow, Context};
use tapestry_client::{
    api::{
        AuthToken, CommentId, Identity, NewPhoto, NewPost, NewSession, NewUser, PostId,
        ProfileUpdate, Section, Store, UserId, Uuid,
    },
    fetch_thread, forest_len, render_forest, CommentPanel, PanelEvent, PostFeed,
};

mod http;
use http::HttpStore;

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create an account
    Signup {
        email: String,

        password: String,

        /// Name shown next to posts and comments
        #[structopt(long)]
        name: Option<String>,
    },

    /// Open a session, printing the token to put in TAPESTRY_TOKEN
    Login { email: String, password: String },

    /// Close the session of TAPESTRY_TOKEN
    Logout,

    /// Update the profile of the logged-in user
    SetProfile {
        #[structopt(long)]
        name: Option<String>,

        #[structopt(long)]
        avatar_url: Option<String>,
    },

    /// List posts, newest first
    Posts {
        /// One of roots, stem, leaves, bloom or fruit
        #[structopt(long)]
        section: Option<Section>,
    },

    /// Publish a post
    Post {
        section: Section,

        content: String,

        /// Category within the section, by name
        #[structopt(long)]
        category: Option<String>,

        /// Image file to attach
        #[structopt(long)]
        photo: Option<PathBuf>,
    },

    /// Delete one of your posts
    DeletePost { post: Uuid },

    /// Show the comment thread of a post
    Thread { post: Uuid },

    /// Comment on a post, or reply to a comment with --parent
    Comment {
        post: Uuid,

        text: String,

        #[structopt(long)]
        parent: Option<Uuid>,
    },

    /// Delete one of your comments
    DeleteComment { post: Uuid, comment: Uuid },
}

fn session_token() -> anyhow::Result<AuthToken> {
    let tok = std::env::var("TAPESTRY_TOKEN")
        .context("retrieving TAPESTRY_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing TAPESTRY_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

async fn logged_in(host: String) -> anyhow::Result<(HttpStore, UserId)> {
    let token = session_token()?;
    let store = HttpStore::new(host, Some(token));
    let me = store.whoami(token).await.context("checking session")?;
    Ok((store, me))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    match opt.cmd {
        Command::Signup {
            email,
            password,
            name,
        } => {
            let store = HttpStore::new(opt.host, None);
            let id = UserId(Uuid::new_v4());
            store
                .sign_up(NewUser::new(id, email, name, password))
                .await
                .context("signing up")?;
            println!("{}", id.0);
        }
        Command::Login { email, password } => {
            let store = HttpStore::new(opt.host, None);
            let tok = store
                .sign_in(NewSession { email, password })
                .await
                .context("logging in")?;
            println!("{}", tok.0);
        }
        Command::Logout => {
            let token = session_token()?;
            HttpStore::new(opt.host, Some(token))
                .sign_out(token)
                .await
                .context("logging out")?;
        }
        Command::SetProfile { name, avatar_url } => {
            let (store, me) = logged_in(opt.host).await?;
            let current = store
                .fetch_profiles(&[me])
                .await
                .context("fetching current profile")?
                .into_iter()
                .next();
            let update = ProfileUpdate {
                full_name: name.or_else(|| current.as_ref().and_then(|p| p.full_name.clone())),
                avatar_url: avatar_url
                    .or_else(|| current.as_ref().and_then(|p| p.avatar_url.clone())),
                email: current.and_then(|p| p.email),
            };
            store
                .upsert_profile(me, update)
                .await
                .context("updating profile")?;
        }
        Command::Posts { section } => {
            let (store, _) = logged_in(opt.host).await?;
            let feed = PostFeed::fetch(&store, section)
                .await
                .context("fetching posts")?;
            for view in feed.posts() {
                let p = &view.post;
                let section = p.section.map_or("", |s| s.emoji());
                println!(
                    "{} {} {} · {} · {} comments",
                    p.id.0,
                    section,
                    view.author_name(),
                    p.created_at.format("%Y-%m-%d %H:%M"),
                    view.comment_count,
                );
                for line in p.content.lines() {
                    println!("    {line}");
                }
            }
        }
        Command::Post {
            section,
            content,
            category,
            photo,
        } => {
            let (store, me) = logged_in(opt.host).await?;
            let mut new = NewPost::new(me, section, content);
            if let Some(name) = category {
                let cat = section.category(&name).ok_or_else(|| {
                    let known = section
                        .categories()
                        .iter()
                        .map(|c| c.name)
                        .collect::<Vec<_>>();
                    anyhow!("no category {name:?} in {section}, known are {known:?}")
                })?;
                new = new.with_category(cat);
            }
            new.validate()?;
            if let Some(path) = photo {
                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading photo {path:?}"))?;
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from)
                    .ok_or_else(|| anyhow!("photo path {path:?} has no usable file name"))?;
                let url = store
                    .upload_photo(me, NewPhoto { file_name, data })
                    .await
                    .context("uploading photo")?;
                new = new.with_photo(url);
            }
            let post = store.insert_post(new).await.context("publishing post")?;
            println!("{}", post.id.0);
        }
        Command::DeletePost { post } => {
            let (store, me) = logged_in(opt.host).await?;
            let mut feed = PostFeed::fetch(&store, None)
                .await
                .context("fetching posts")?;
            feed.delete_post(&store, me, PostId(post))
                .await
                .context("deleting post")?;
        }
        Command::Thread { post } => {
            let (store, _) = logged_in(opt.host).await?;
            let forest = fetch_thread(&store, PostId(post))
                .await
                .context("fetching thread")?
                .build();
            println!("{} comments", forest_len(&forest));
            print!("{}", render_forest(&forest));
        }
        Command::Comment { post, text, parent } => {
            let (store, me) = logged_in(opt.host).await?;
            let mut panel = CommentPanel::new(PostId(post));
            let comment = panel
                .add_comment(&store, me, parent.map(CommentId), text)
                .await
                .context("posting comment")?;
            println!("{}", comment.id.0);
        }
        Command::DeleteComment { post, comment } => {
            let (store, me) = logged_in(opt.host).await?;
            let mut panel = CommentPanel::new(PostId(post));
            panel.on_event(&store, PanelEvent::Opened).await;
            if let Some(err) = panel.error() {
                return Err(anyhow!("{err}"));
            }
            panel
                .delete_comment(&store, me, CommentId(comment))
                .await
                .context("deleting comment")?;
            println!("{} comments left", panel.comment_count());
        }
    }

    Ok(())
}
