use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not found {0}")]
    NotFound(Uuid),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Email already used {0}")]
    EmailAlreadyUsed(String),

    #[error("Invalid email address {0:?}")]
    InvalidEmail(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Content is empty")]
    EmptyContent,

    #[error("Invalid file name {0:?}")]
    InvalidFileName(String),

    #[error("Unknown section {0:?}")]
    UnknownSection(String),

    #[error("Photo not found {0:?}")]
    PhotoNotFound(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::EmailAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::InvalidEmail(_) => StatusCode::BAD_REQUEST,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::EmptyContent => StatusCode::BAD_REQUEST,
            Error::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            Error::UnknownSection(_) => StatusCode::BAD_REQUEST,
            Error::PhotoNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::NotFound(u) => json!({
                "message": "not found",
                "type": "not-found",
                "uuid": u,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::EmailAlreadyUsed(e) => json!({
                "message": "email already used",
                "type": "conflict-email",
                "email": e,
            }),
            Error::InvalidEmail(e) => json!({
                "message": "invalid email address",
                "type": "invalid-email",
                "email": e,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::EmptyContent => json!({
                "message": "content is empty",
                "type": "empty-content",
            }),
            Error::InvalidFileName(n) => json!({
                "message": "invalid file name",
                "type": "invalid-file-name",
                "name": n,
            }),
            Error::UnknownSection(s) => json!({
                "message": "unknown section",
                "type": "unknown-section",
                "section": s,
            }),
            Error::PhotoNotFound(n) => json!({
                "message": "photo not found",
                "type": "photo-not-found",
                "name": n,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let string_field = |field: &str| -> anyhow::Result<String> {
            data.get(field)
                .and_then(|s| s.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error contents has no string field {field:?}"))
        };
        let uuid_field = || -> anyhow::Result<Uuid> {
            data.get("uuid")
                .and_then(|uuid| uuid.as_str())
                .and_then(|uuid| Uuid::from_str(uuid).ok())
                .ok_or_else(|| anyhow!("error contents has no proper uuid"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(string_field("message").unwrap_or_default()),
                "permission-denied" => Error::PermissionDenied,
                "not-found" => Error::NotFound(uuid_field()?),
                "conflict-uuid" => Error::UuidAlreadyUsed(uuid_field()?),
                "conflict-email" => Error::EmailAlreadyUsed(string_field("email")?),
                "invalid-email" => Error::InvalidEmail(string_field("email")?),
                "null-byte" => Error::NullByteInString(string_field("string")?),
                "empty-content" => Error::EmptyContent,
                "invalid-file-name" => Error::InvalidFileName(string_field("name")?),
                "unknown-section" => Error::UnknownSection(string_field("section")?),
                "photo-not-found" => Error::PhotoNotFound(string_field("name")?),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_back_what_it_sends() {
        let errors = [
            Error::Unknown(String::from("boom")),
            Error::PermissionDenied,
            Error::NotFound(Uuid::from_u128(7)),
            Error::UuidAlreadyUsed(Uuid::from_u128(8)),
            Error::EmailAlreadyUsed(String::from("a@b.c")),
            Error::InvalidEmail(String::from("nope")),
            Error::NullByteInString(String::from("a\0")),
            Error::EmptyContent,
            Error::InvalidFileName(String::from("../x")),
            Error::UnknownSection(String::from("trunk")),
            Error::PhotoNotFound(String::from("a.png")),
        ];
        for e in errors {
            assert_eq!(Error::parse(&e.contents()).unwrap(), e);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(Error::parse(b"not json").is_err());
        assert!(Error::parse(br#"{"type": "no-such-error"}"#).is_err());
        assert!(Error::parse(br#"{"type": "not-found"}"#).is_err());
    }
}
