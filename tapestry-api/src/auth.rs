use uuid::Uuid;

use crate::{Error, UserId, STUB_UUID};

pub const BCRYPT_COST: u32 = 10;

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    pub email: String,
    pub password: String,
}

impl NewSession {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.email)?;
        crate::validate_string(&self.password)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub email: String,

    /// Name shown next to posts and comments, copied into the profile
    pub full_name: Option<String>,

    pub initial_password_hash: String,
}

impl NewUser {
    pub fn new(
        id: UserId,
        email: String,
        full_name: Option<String>,
        initial_password: String,
    ) -> NewUser {
        NewUser {
            id,
            email,
            full_name,
            initial_password_hash: bcrypt::hash(initial_password, BCRYPT_COST)
                .expect("failed hashing password"),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.email)?;
        crate::validate_string(&self.initial_password_hash)?;
        if let Some(name) = &self.full_name {
            crate::validate_string(name)?;
        }
        match self.email.split_once('@') {
            Some((user, domain)) if !user.is_empty() && !domain.is_empty() => Ok(()),
            _ => Err(Error::InvalidEmail(self.email.clone())),
        }
    }
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> NewUser {
        NewUser {
            id: UserId::stub(),
            email: String::from(email),
            full_name: Some(String::from("Ada")),
            initial_password_hash: String::from("hash"),
        }
    }

    #[test]
    fn email_must_have_both_sides() {
        assert_eq!(user("ada@example.org").validate(), Ok(()));
        for bad in ["ada", "@example.org", "ada@", ""] {
            assert_eq!(
                user(bad).validate(),
                Err(Error::InvalidEmail(String::from(bad))),
                "{bad:?} was accepted"
            );
        }
    }

    #[test]
    fn password_hash_verifies() {
        let hash = bcrypt::hash("hunter2", 4).unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not a bcrypt hash"));
    }
}
