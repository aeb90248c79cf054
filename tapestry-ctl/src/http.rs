use async_trait::async_trait;
use tapestry_client::api::{
    AuthToken, Comment, CommentId, Error, Identity, NewComment, NewPhoto, NewPost, NewSession,
    NewUser, Post, PostId, Profile, ProfileUpdate, Section, Store, UserId,
};

/// Backend reached through the http api of a running server
pub struct HttpStore {
    client: reqwest::Client,
    host: String,
    token: Option<AuthToken>,
}

fn unknown(err: reqwest::Error) -> Error {
    Error::Unknown(format!("http request failed: {err}"))
}

impl HttpStore {
    pub fn new(host: String, token: Option<AuthToken>) -> HttpStore {
        HttpStore {
            client: reqwest::Client::new(),
            host: String::from(host.trim_end_matches('/')),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, format!("{}{}", self.host, path));
        match self.token {
            Some(tok) => req.bearer_auth(tok.0),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let resp = req.send().await.map_err(unknown)?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.bytes().await.map_err(unknown)?;
        tracing::debug!(%status, ?body, "server returned an error");
        Err(Error::parse(&body)
            .unwrap_or_else(|e| Error::Unknown(format!("server answered {status}: {e:#}"))))
    }

    async fn json<T>(&self, req: reqwest::RequestBuilder) -> Result<T, Error>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        self.send(req).await?.json().await.map_err(unknown)
    }
}

#[async_trait]
impl Store for HttpStore {
    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, Error> {
        let path = format!("/api/posts/{}/comments", post.0);
        self.json(self.request(reqwest::Method::GET, &path)).await
    }

    async fn count_comments(&self, post: PostId) -> Result<usize, Error> {
        let path = format!("/api/posts/{}/comment-count", post.0);
        self.json(self.request(reqwest::Method::GET, &path)).await
    }

    async fn insert_comment(&self, c: NewComment) -> Result<Comment, Error> {
        self.json(self.request(reqwest::Method::POST, "/api/comments").json(&c))
            .await
    }

    async fn delete_comment(&self, _owner: UserId, c: CommentId) -> Result<(), Error> {
        let path = format!("/api/comments/{}", c.0);
        self.send(self.request(reqwest::Method::DELETE, &path))
            .await
            .map(|_| ())
    }

    async fn fetch_profiles(&self, users: &[UserId]) -> Result<Vec<Profile>, Error> {
        self.json(self.request(reqwest::Method::POST, "/api/profiles").json(users))
            .await
    }

    async fn upsert_profile(&self, _user: UserId, p: ProfileUpdate) -> Result<Profile, Error> {
        self.json(self.request(reqwest::Method::PUT, "/api/profile").json(&p))
            .await
    }

    async fn fetch_posts(&self, section: Option<Section>) -> Result<Vec<Post>, Error> {
        let path = match section {
            Some(s) => format!("/api/posts?section={s}"),
            None => String::from("/api/posts"),
        };
        self.json(self.request(reqwest::Method::GET, &path)).await
    }

    async fn insert_post(&self, p: NewPost) -> Result<Post, Error> {
        self.json(self.request(reqwest::Method::POST, "/api/posts").json(&p))
            .await
    }

    async fn delete_post(&self, _owner: UserId, p: PostId) -> Result<(), Error> {
        let path = format!("/api/posts/{}", p.0);
        self.send(self.request(reqwest::Method::DELETE, &path))
            .await
            .map(|_| ())
    }

    async fn upload_photo(&self, _owner: UserId, p: NewPhoto) -> Result<String, Error> {
        self.json(self.request(reqwest::Method::POST, "/api/photos").json(&p))
            .await
    }

    async fn fetch_photo(&self, name: &str) -> Result<Vec<u8>, Error> {
        let path = format!("/photos/{name}");
        let resp = self.send(self.request(reqwest::Method::GET, &path)).await?;
        Ok(resp.bytes().await.map_err(unknown)?.to_vec())
    }
}

#[async_trait]
impl Identity for HttpStore {
    async fn sign_up(&self, u: NewUser) -> Result<(), Error> {
        self.send(self.request(reqwest::Method::POST, "/api/signup").json(&u))
            .await
            .map(|_| ())
    }

    async fn sign_in(&self, s: NewSession) -> Result<AuthToken, Error> {
        self.json(self.request(reqwest::Method::POST, "/api/auth").json(&s))
            .await
    }

    async fn sign_out(&self, t: AuthToken) -> Result<(), Error> {
        let req = self
            .client
            .post(format!("{}/api/unauth", self.host))
            .bearer_auth(t.0);
        self.send(req).await.map(|_| ())
    }

    async fn whoami(&self, t: AuthToken) -> Result<UserId, Error> {
        let req = self
            .client
            .get(format!("{}/api/whoami", self.host))
            .bearer_auth(t.0);
        self.json(req).await
    }
}
