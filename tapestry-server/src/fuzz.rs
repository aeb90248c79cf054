#![cfg(test)]

use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path, sync::Arc};

use axum::{
    extract::FromRequestParts,
    http::{self, request},
    Router,
};
use tapestry_api::{
    AuthToken, Comment, CommentId, Error as ApiError, Identity, NewComment, NewPhoto, NewPost,
    NewSession, NewUser, Post, PostId, Section, Store, UserId, Uuid,
};
use bolero::generator::{bolero_generator, TypeGenerator};
use tapestry_mock_server::{MockServer, TEST_PASSWORD};
use tower::{Service, ServiceExt};

use crate::{db::PgBackend, extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .for_each(move |v: &$typ| {
                    let () = runtime.block_on($fn(v.clone()));
                })
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server answers an empty body, which serde_json does not parse as ()
            return Ok(serde_json::from_slice(b"null").unwrap());
        }
        return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
            panic!("failed parsing resp body {body:?} of request {req_body:?}: {err}")
        }));
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<AuthToken>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {}", token.0)),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

fn mock_app() -> Router {
    app(Arc::new(MockServer::new()))
}

async fn signed_in(app: &mut Router, email: &str, name: Option<&str>) -> (UserId, AuthToken) {
    let user = NewUser {
        id: UserId(Uuid::new_v4()),
        email: String::from(email),
        full_name: name.map(String::from),
        initial_password_hash: bcrypt::hash(TEST_PASSWORD, 4).unwrap(),
    };
    let () = run_on_app(app, "POST", "/api/signup", None, &user)
        .await
        .unwrap();
    let session = NewSession {
        email: String::from(email),
        password: String::from(TEST_PASSWORD),
    };
    let token = run_on_app(app, "POST", "/api/auth", None, &session)
        .await
        .unwrap();
    (user.id, token)
}

#[tokio::test]
async fn session_lifecycle() {
    let mut app = mock_app();
    let (ada, token) = signed_in(&mut app, "ada@example.org", Some("Ada")).await;
    let me: Result<UserId, _> = run_on_app(&mut app, "GET", "/api/whoami", Some(token), &()).await;
    assert_eq!(me, Ok(ada));

    let bad = NewSession {
        email: String::from("ada@example.org"),
        password: String::from("nope"),
    };
    let res: Result<AuthToken, _> = run_on_app(&mut app, "POST", "/api/auth", None, &bad).await;
    assert_eq!(res, Err(ApiError::PermissionDenied));

    let () = run_on_app(&mut app, "POST", "/api/unauth", Some(token), &())
        .await
        .unwrap();
    let me: Result<UserId, _> = run_on_app(&mut app, "GET", "/api/whoami", Some(token), &()).await;
    assert_eq!(me, Err(ApiError::PermissionDenied));
    let me: Result<UserId, _> = run_on_app(&mut app, "GET", "/api/whoami", None, &()).await;
    assert_eq!(me, Err(ApiError::PermissionDenied));
}

#[tokio::test]
async fn comment_thread_over_http() {
    let mut app = mock_app();
    let (ada, ada_tok) = signed_in(&mut app, "ada@example.org", Some("Ada")).await;
    let (bob, bob_tok) = signed_in(&mut app, "bob@example.org", None).await;

    let post: Post = run_on_app(
        &mut app,
        "POST",
        "/api/posts",
        Some(ada_tok),
        &NewPost::new(ada, Section::Roots, String::from("family dinner")),
    )
    .await
    .unwrap();
    let forged: Result<Post, _> = run_on_app(
        &mut app,
        "POST",
        "/api/posts",
        Some(bob_tok),
        &NewPost::new(ada, Section::Roots, String::from("not mine")),
    )
    .await;
    assert_eq!(forged, Err(ApiError::PermissionDenied));

    let root: Comment = run_on_app(
        &mut app,
        "POST",
        "/api/comments",
        Some(bob_tok),
        &NewComment {
            post_id: post.id,
            user_id: bob,
            content: String::from("lovely"),
            parent_id: None,
        },
    )
    .await
    .unwrap();
    let reply: Comment = run_on_app(
        &mut app,
        "POST",
        "/api/comments",
        Some(ada_tok),
        &NewComment {
            post_id: post.id,
            user_id: ada,
            content: String::from("thank you"),
            parent_id: Some(root.id),
        },
    )
    .await
    .unwrap();
    let forged: Result<Comment, _> = run_on_app(
        &mut app,
        "POST",
        "/api/comments",
        Some(bob_tok),
        &NewComment {
            post_id: post.id,
            user_id: ada,
            content: String::from("not mine either"),
            parent_id: Some(root.id),
        },
    )
    .await;
    assert_eq!(forged, Err(ApiError::PermissionDenied));
    let empty: Result<Comment, _> = run_on_app(
        &mut app,
        "POST",
        "/api/comments",
        Some(ada_tok),
        &NewComment {
            post_id: post.id,
            user_id: ada,
            content: String::from("   "),
            parent_id: None,
        },
    )
    .await;
    assert_eq!(empty, Err(ApiError::EmptyContent));

    let comments_uri = format!("/api/posts/{}/comments", post.id.0);
    let comments: Vec<Comment> = run_on_app(&mut app, "GET", &comments_uri, Some(ada_tok), &())
        .await
        .unwrap();
    assert_eq!(comments, vec![root.clone(), reply.clone()]);

    // only bob may delete his comment, and the reply stays behind
    let delete_uri = format!("/api/comments/{}", root.id.0);
    let res: Result<(), _> = run_on_app(&mut app, "DELETE", &delete_uri, Some(ada_tok), &()).await;
    assert_eq!(res, Err(ApiError::NotFound(root.id.0)));
    let () = run_on_app(&mut app, "DELETE", &delete_uri, Some(bob_tok), &())
        .await
        .unwrap();
    let count_uri = format!("/api/posts/{}/comment-count", post.id.0);
    let count: usize = run_on_app(&mut app, "GET", &count_uri, Some(bob_tok), &())
        .await
        .unwrap();
    assert_eq!(count, 1);

    let profiles: Vec<tapestry_api::Profile> =
        run_on_app(&mut app, "POST", "/api/profiles", Some(bob_tok), &vec![ada, bob])
            .await
            .unwrap();
    assert_eq!(profiles[0].full_name.as_deref(), Some("Ada"));
    assert_eq!(profiles[1].full_name, None);
}

#[tokio::test]
async fn replies_must_share_the_post_of_their_parent() {
    let mut app = mock_app();
    let (ada, tok) = signed_in(&mut app, "ada@example.org", None).await;
    let mut posts = Vec::new();
    for text in ["first", "second"] {
        let post: Post = run_on_app(
            &mut app,
            "POST",
            "/api/posts",
            Some(tok),
            &NewPost::new(ada, Section::Bloom, String::from(text)),
        )
        .await
        .unwrap();
        posts.push(post.id);
    }
    let root: Comment = run_on_app(
        &mut app,
        "POST",
        "/api/comments",
        Some(tok),
        &NewComment {
            post_id: posts[0],
            user_id: ada,
            content: String::from("root"),
            parent_id: None,
        },
    )
    .await
    .unwrap();
    for parent in [root.id, CommentId(Uuid::new_v4())] {
        let res: Result<Comment, _> = run_on_app(
            &mut app,
            "POST",
            "/api/comments",
            Some(tok),
            &NewComment {
                post_id: posts[1],
                user_id: ada,
                content: String::from("misplaced"),
                parent_id: Some(parent),
            },
        )
        .await;
        assert_eq!(res, Err(ApiError::NotFound(parent.0)));
    }
    let count_uri = format!("/api/posts/{}/comment-count", posts[1].0);
    let count: usize = run_on_app(&mut app, "GET", &count_uri, Some(tok), &())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn posts_by_section() {
    let mut app = mock_app();
    let (ada, tok) = signed_in(&mut app, "ada@example.org", None).await;
    for (section, text) in [(Section::Stem, "work"), (Section::Fruit, "harvest")] {
        let _: Post = run_on_app(
            &mut app,
            "POST",
            "/api/posts",
            Some(tok),
            &NewPost::new(ada, section, String::from(text)),
        )
        .await
        .unwrap();
    }
    let stem: Vec<Post> = run_on_app(&mut app, "GET", "/api/posts?section=stem", Some(tok), &())
        .await
        .unwrap();
    assert_eq!(stem.len(), 1);
    assert_eq!(stem[0].content, "work");
    let all: Vec<Post> = run_on_app(&mut app, "GET", "/api/posts", Some(tok), &())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    let bad: Result<Vec<Post>, _> =
        run_on_app(&mut app, "GET", "/api/posts?section=trunk", Some(tok), &()).await;
    assert_eq!(bad, Err(ApiError::UnknownSection(String::from("trunk"))));

    let uri = format!("/api/posts/{}", all[0].id.0);
    let () = run_on_app(&mut app, "DELETE", &uri, Some(tok), &())
        .await
        .unwrap();
    let res: Result<(), _> = run_on_app(&mut app, "DELETE", &uri, Some(tok), &()).await;
    assert_eq!(res, Err(ApiError::NotFound(all[0].id.0)));
}

#[tokio::test]
async fn photos_are_served_back() {
    let mut app = mock_app();
    let (_, tok) = signed_in(&mut app, "ada@example.org", None).await;
    let photo = NewPhoto {
        file_name: String::from("leaf.png"),
        data: vec![0x89, b'P', b'N', b'G'],
    };
    let url: String = run_on_app(&mut app, "POST", "/api/photos", Some(tok), &photo)
        .await
        .unwrap();
    let path = url
        .strip_prefix("mock://tapestry")
        .expect("photo url under the mock public url");

    let req = request::Builder::new()
        .method("GET")
        .uri(path)
        .body(axum::body::Body::empty())
        .unwrap();
    app.ready().await.unwrap();
    let resp = app.call(req).await.unwrap();
    assert_eq!(resp.status(), http::StatusCode::OK);
    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "image/png");
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    assert_eq!(&body[..], &photo.data[..]);

    let missing: Result<Vec<u8>, _> =
        run_on_app(&mut app, "GET", "/photos/nothing.png", None, &()).await;
    assert_eq!(
        missing,
        Err(ApiError::PhotoNotFound(String::from("nothing.png")))
    );
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser {
        email: String,
        name: Option<String>,
    },
    Auth {
        uid: usize,
    },
    Unauth {
        sid: usize,
    },
    CreatePost {
        sid: usize,
        section: u8,
        content: String,
    },
    DeletePost {
        sid: usize,
        pid: usize,
    },
    CreateComment {
        sid: usize,
        pid: usize,
        parent: Option<usize>,
        content: String,
    },
    DeleteComment {
        sid: usize,
        cid: usize,
    },
    FetchThread {
        sid: usize,
        pid: usize,
    },
}

/// Ids picked by each side differ, so errors are compared without them
fn strip_ids<T>(res: Result<T, ApiError>) -> Result<T, ApiError> {
    res.map_err(|e| match e {
        ApiError::NotFound(_) => ApiError::NotFound(Uuid::nil()),
        e => e,
    })
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        strip_ids(app_res),
        strip_ids(mock_res),
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

struct Session {
    user: UserId,
    app: AuthToken,
    mock: AuthToken,
}

/// Runs the same operations through the http router and directly on a mock,
/// checking neither the http layer nor the backend behind it change any outcome
struct ComparativeFuzzer {
    app: Router,
    mock: MockServer,
    password_hash: String,
    users: Vec<String>,
    sessions: Vec<Session>,
    posts: Vec<(PostId, PostId)>,
    comments: Vec<(CommentId, CommentId)>,
}

impl ComparativeFuzzer {
    fn new(app: Router) -> ComparativeFuzzer {
        ComparativeFuzzer {
            app,
            mock: MockServer::new(),
            password_hash: bcrypt::hash(TEST_PASSWORD, 4).unwrap(),
            users: Vec::new(),
            sessions: Vec::new(),
            posts: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn session(&self, sid: usize) -> Option<&Session> {
        resize_int(sid, ..self.sessions.len()).map(|s| &self.sessions[s])
    }

    async fn create_user(&mut self, email: String, name: Option<String>) {
        let new_user = NewUser {
            id: UserId(Uuid::new_v4()),
            email: email.clone(),
            full_name: name,
            initial_password_hash: self.password_hash.clone(),
        };
        let app_res = run_on_app(&mut self.app, "POST", "/api/signup", None, &new_user).await;
        let mock_res = self.mock.sign_up(new_user).await;
        if mock_res.is_ok() {
            self.users.push(email);
        }
        compare("CreateUser", app_res, mock_res);
    }

    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser { email, name } => self.create_user(email, name).await,
            FuzzOp::Auth { uid } => {
                let uid = match resize_int(uid, ..self.users.len()) {
                    Some(uid) => uid,
                    None => {
                        self.create_user(String::from("user@example.org"), None).await;
                        0
                    }
                };
                let session = NewSession {
                    email: self.users[uid].clone(),
                    password: String::from(TEST_PASSWORD),
                };
                let app_tok: Result<AuthToken, _> =
                    run_on_app(&mut self.app, "POST", "/api/auth", None, &session).await;
                let mock_tok = self.mock.sign_in(session).await;
                if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                    let user = self.mock.whoami(mock).await.unwrap();
                    self.sessions.push(Session { user, app, mock });
                }
                compare("Auth", app_tok.map(|_| ()), mock_tok.map(|_| ()));
            }
            FuzzOp::Unauth { sid } => {
                if let Some(s) = resize_int(sid, ..self.sessions.len()) {
                    let s = self.sessions.remove(s);
                    let app_res =
                        run_on_app(&mut self.app, "POST", "/api/unauth", Some(s.app), &()).await;
                    compare("Unauth", app_res, self.mock.sign_out(s.mock).await);
                }
            }
            FuzzOp::CreatePost {
                sid,
                section,
                content,
            } => {
                if let Some(s) = self.session(sid) {
                    let section = Section::ALL[usize::from(section) % Section::ALL.len()];
                    let new_post = NewPost::new(s.user, section, content);
                    let app_tok = s.app;
                    let app_res: Result<Post, _> =
                        run_on_app(&mut self.app, "POST", "/api/posts", Some(app_tok), &new_post)
                            .await;
                    let mock_res = self.mock.insert_post(new_post).await;
                    if let (Ok(a), Ok(m)) = (&app_res, &mock_res) {
                        self.posts.push((a.id, m.id));
                    }
                    compare(
                        "CreatePost",
                        app_res.map(|p| p.content),
                        mock_res.map(|p| p.content),
                    );
                }
            }
            FuzzOp::DeletePost { sid, pid } => {
                let post = resize_int(pid, ..self.posts.len()).map(|p| self.posts[p]);
                if let (Some(s), Some((app_post, mock_post))) = (self.session(sid), post) {
                    let (user, app_tok) = (s.user, s.app);
                    let uri = format!("/api/posts/{}", app_post.0);
                    let app_res =
                        run_on_app(&mut self.app, "DELETE", &uri, Some(app_tok), &()).await;
                    let mock_res = self.mock.delete_post(user, mock_post).await;
                    compare("DeletePost", app_res, mock_res);
                }
            }
            FuzzOp::CreateComment {
                sid,
                pid,
                parent,
                content,
            } => {
                let post = resize_int(pid, ..self.posts.len()).map(|p| self.posts[p]);
                let parent = parent
                    .and_then(|c| resize_int(c, ..self.comments.len()))
                    .map(|c| self.comments[c]);
                if let (Some(s), Some((app_post, mock_post))) = (self.session(sid), post) {
                    let (user, app_tok) = (s.user, s.app);
                    let app_comment = NewComment {
                        post_id: app_post,
                        user_id: user,
                        content: content.clone(),
                        parent_id: parent.map(|(a, _)| a),
                    };
                    let mock_comment = NewComment {
                        post_id: mock_post,
                        user_id: user,
                        content,
                        parent_id: parent.map(|(_, m)| m),
                    };
                    let app_res: Result<Comment, _> = run_on_app(
                        &mut self.app,
                        "POST",
                        "/api/comments",
                        Some(app_tok),
                        &app_comment,
                    )
                    .await;
                    let mock_res = self.mock.insert_comment(mock_comment).await;
                    if let (Ok(a), Ok(m)) = (&app_res, &mock_res) {
                        self.comments.push((a.id, m.id));
                    }
                    compare(
                        "CreateComment",
                        app_res.map(|c| c.content),
                        mock_res.map(|c| c.content),
                    );
                }
            }
            FuzzOp::DeleteComment { sid, cid } => {
                let comment = resize_int(cid, ..self.comments.len()).map(|c| self.comments[c]);
                if let (Some(s), Some((app_comment, mock_comment))) = (self.session(sid), comment)
                {
                    let (user, app_tok) = (s.user, s.app);
                    let uri = format!("/api/comments/{}", app_comment.0);
                    let app_res =
                        run_on_app(&mut self.app, "DELETE", &uri, Some(app_tok), &()).await;
                    let mock_res = self.mock.delete_comment(user, mock_comment).await;
                    compare("DeleteComment", app_res, mock_res);
                }
            }
            FuzzOp::FetchThread { sid, pid } => {
                let post = resize_int(pid, ..self.posts.len()).map(|p| self.posts[p]);
                if let (Some(s), Some((app_post, mock_post))) = (self.session(sid), post) {
                    let app_tok = s.app;
                    let uri = format!("/api/posts/{}/comments", app_post.0);
                    let app_res: Result<Vec<Comment>, _> =
                        run_on_app(&mut self.app, "GET", &uri, Some(app_tok), &()).await;
                    let mock_res = self.mock.fetch_comments(mock_post).await;
                    let shape = |comments: Vec<Comment>| {
                        comments
                            .into_iter()
                            .map(|c| (c.user_id, c.content, c.parent_id.is_some()))
                            .collect::<Vec<_>>()
                    };
                    compare("FetchThread", app_res.map(shape), mock_res.map(shape));
                }
            }
        }
    }
}

#[tokio::test]
async fn cross_post_replies_fail_on_both_sides() {
    let mut fuzzer = ComparativeFuzzer::new(mock_app());
    let ops = vec![
        FuzzOp::Auth { uid: 0 },
        FuzzOp::CreatePost {
            sid: 0,
            section: 0,
            content: String::from("first"),
        },
        FuzzOp::CreatePost {
            sid: 0,
            section: 1,
            content: String::from("second"),
        },
        FuzzOp::CreateComment {
            sid: 0,
            pid: 0,
            parent: None,
            content: String::from("root"),
        },
        FuzzOp::CreateComment {
            sid: 0,
            pid: usize::MAX,
            parent: Some(0),
            content: String::from("reply on the other post"),
        },
        FuzzOp::FetchThread {
            sid: 0,
            pid: usize::MAX,
        },
    ];
    for op in ops {
        fuzzer.execute_fuzz_op(op).await;
    }
    assert_eq!(fuzzer.posts.len(), 2);
    assert_eq!(fuzzer.comments.len(), 1);
    assert_eq!(fuzzer.mock.count_comments(fuzzer.posts[1].1).await, Ok(0));
}

do_tokio_test!(compare_with_mock, Vec<FuzzOp>, |ops: Vec<FuzzOp>| async move {
    let mut fuzzer = ComparativeFuzzer::new(mock_app());
    for op in ops {
        fuzzer.execute_fuzz_op(op).await;
    }
});

fn build_pg_cluster(data: &Path) -> postgresfixture::cluster::Cluster {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    postgresfixture::cluster::Cluster::new(
        data,
        runtime.expect("postgresql seems to not be installed in path"),
    )
}

/// Spins up a throwaway postgres cluster with the migrations applied, and
/// runs `test` against it
fn with_test_db<F>(test: F)
where
    F: FnOnce(&tokio::runtime::Runtime, sqlx::PgPool) + std::panic::UnwindSafe,
{
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt::try_init();
    }
    let lockfile = tempfile::tempfile().expect("creating tempfile");
    let datadir = tempfile::tempdir().expect("creating tempdir");
    let datadir_path: &Path = datadir.as_ref();
    let cluster = build_pg_cluster(datadir_path);
    let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
    postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
        cluster.createdb("test_db").expect("creating test_db database");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed initializing tokio runtime");
        let pool = runtime.block_on(async move {
            let url = format!("postgresql://?host={datadir_path}&dbname=test_db");
            let pool = create_sqlx_pool(&url).await.expect("creating sqlx pool");
            MIGRATOR
                .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                .await
                .expect("failed applying migrations");
            pool
        });
        test(&runtime, pool)
    })
    .expect("coordinating spinup and shutdown of the pg cluster");
}

macro_rules! do_sqlx_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        #[ignore = "needs postgresql binaries in PATH"]
        fn $name() {
            with_test_db(|runtime, pool| {
                let runtime = AssertUnwindSafe(runtime);
                let pool = AssertUnwindSafe(pool);
                bolero::check!()
                    .with_type::<$typ>()
                    .for_each(move |v: &$typ| {
                        let res = {
                            let pool = pool.clone();
                            let v = v.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on($fn(pool, v))
                            }))
                        };
                        runtime.block_on(async {
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        if let Err(e) = res {
                            std::panic::resume_unwind(e);
                        }
                    })
            })
        }
    };
}

fn pg_app(pool: sqlx::PgPool) -> Router {
    app(Arc::new(PgBackend::new(pool, String::from("http://tapestry.test"))))
}

do_sqlx_test!(
    compare_postgres_with_mock,
    Vec<FuzzOp>,
    |pool: sqlx::PgPool, ops: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pg_app(pool));
        for op in ops {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);

#[test]
#[ignore = "needs postgresql binaries in PATH"]
fn postgres_backend() {
    with_test_db(|runtime, pool| {
        runtime.block_on(async move {
            let pg = PgBackend::new(pool.clone(), String::from("http://tapestry.test"));
            let hash = bcrypt::hash(TEST_PASSWORD, 4).unwrap();
            let new_user = |email: &str, name: Option<&str>| NewUser {
                id: UserId(Uuid::new_v4()),
                email: String::from(email),
                full_name: name.map(String::from),
                initial_password_hash: hash.clone(),
            };
            let ada = new_user("ada@example.org", Some("Ada"));
            let bob = new_user("bob@example.org", None);
            pg.sign_up(ada.clone()).await.unwrap();
            pg.sign_up(bob.clone()).await.unwrap();
            assert_eq!(
                pg.sign_up(new_user("ada@example.org", None)).await,
                Err(ApiError::EmailAlreadyUsed(String::from("ada@example.org")))
            );
            assert_eq!(
                pg.sign_up(NewUser {
                    email: String::from("other@example.org"),
                    ..ada.clone()
                })
                .await,
                Err(ApiError::UuidAlreadyUsed(ada.id.0))
            );
            let (ada, bob) = (ada.id, bob.id);

            let mut profiles = pg
                .fetch_profiles(&[ada, bob, UserId(Uuid::new_v4())])
                .await
                .unwrap();
            profiles.sort_by_key(|p| p.email.clone());
            assert_eq!(profiles.len(), 2);
            assert_eq!(profiles[0].full_name.as_deref(), Some("Ada"));
            assert_eq!(profiles[1].full_name, None);

            let mut posts = Vec::new();
            for text in ["one", "two"] {
                let post = pg
                    .insert_post(NewPost::new(ada, Section::Leaves, String::from(text)))
                    .await
                    .unwrap();
                posts.push(post.id);
            }
            let listed = pg.fetch_posts(Some(Section::Leaves)).await.unwrap();
            assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![posts[1], posts[0]]);
            assert_eq!(pg.fetch_posts(Some(Section::Roots)).await, Ok(vec![]));

            let comment = |post: PostId, user: UserId, parent: Option<CommentId>| NewComment {
                post_id: post,
                user_id: user,
                content: String::from("words"),
                parent_id: parent,
            };
            let root = pg.insert_comment(comment(posts[0], bob, None)).await.unwrap();
            let mut thread = vec![root.id];
            for _ in 0..8 {
                let c = pg
                    .insert_comment(comment(posts[0], ada, Some(root.id)))
                    .await
                    .unwrap();
                thread.push(c.id);
            }
            assert_eq!(
                pg.insert_comment(comment(posts[1], ada, Some(root.id))).await,
                Err(ApiError::NotFound(root.id.0))
            );
            let fetched = pg.fetch_comments(posts[0]).await.unwrap();
            assert_eq!(fetched.iter().map(|c| c.id).collect::<Vec<_>>(), thread);
            assert_eq!(pg.count_comments(posts[1]).await, Ok(0));

            assert_eq!(
                pg.delete_comment(ada, root.id).await,
                Err(ApiError::NotFound(root.id.0))
            );
            pg.delete_comment(bob, root.id).await.unwrap();
            assert_eq!(pg.count_comments(posts[0]).await, Ok(8));
            pg.delete_post(ada, posts[0]).await.unwrap();
            assert_eq!(pg.count_comments(posts[0]).await, Ok(0));

            // two uploads within the same millisecond get distinct names
            let at = chrono::Utc::now();
            let mut conn = pool.acquire().await.unwrap();
            let photo = |data: u8| NewPhoto {
                file_name: String::from("garden.png"),
                data: vec![data],
            };
            let first = db::insert_photo(&mut *conn, ada, photo(1), at).await.unwrap();
            let second = db::insert_photo(&mut *conn, ada, photo(2), at).await.unwrap();
            assert_ne!(first, second);
            assert_eq!(pg.fetch_photo(&first).await, Ok(vec![1]));
            assert_eq!(pg.fetch_photo(&second).await, Ok(vec![2]));
        })
    })
}
