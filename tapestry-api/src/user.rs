use crate::{Error, STUB_UUID};

use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }

    /// Name to display for a user without a profile name
    pub fn placeholder_name(&self) -> String {
        let mut buf = Uuid::encode_buffer();
        let id = self.0.as_hyphenated().encode_lower(&mut buf);
        format!("User ({})", &id[..6])
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Profile {
    pub id: UserId,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        for s in [&self.full_name, &self.avatar_url, &self.email]
            .into_iter()
            .flatten()
        {
            crate::validate_string(s)?;
        }
        Ok(())
    }

    pub fn into_profile(self, id: UserId) -> Profile {
        Profile {
            id,
            full_name: self.full_name,
            avatar_url: self.avatar_url,
            email: self.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_uses_id_prefix() {
        let id = UserId(Uuid::from_u128(0xabcdef12_0000_0000_0000_000000000000));
        assert_eq!(id.placeholder_name(), "User (abcdef)");
    }
}
