use crate::{Error, Time, UserId};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewPhoto {
    /// Name of the file on the uploader's side, only its extension is kept
    pub file_name: String,

    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl NewPhoto {
    pub fn extension(&self) -> Result<&str, Error> {
        match self.file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
                Ok(ext)
            }
            _ => Err(Error::InvalidFileName(self.file_name.clone())),
        }
    }

    /// Name under which the photo gets stored: `<owner>-<unix millis>.<ext>`
    pub fn storage_name(&self, owner: UserId, at: Time) -> Result<String, Error> {
        let ext = self.extension()?.to_ascii_lowercase();
        Ok(format!("{}-{}.{}", owner.0, at.timestamp_millis(), ext))
    }
}

/// Names handed to `fetch_photo` come straight from urls, so only accept
/// what `storage_name` can produce
pub fn validate_photo_name(name: &str) -> Result<(), Error> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    match ok {
        true => Ok(()),
        false => Err(Error::InvalidFileName(String::from(name))),
    }
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::Uuid;

    fn photo(name: &str) -> NewPhoto {
        NewPhoto {
            file_name: String::from(name),
            data: vec![0xff, 0xd8, 0xff],
        }
    }

    #[test]
    fn storage_name_keeps_extension() {
        let owner = UserId(Uuid::from_u128(1));
        let at = chrono::Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let name = photo("holiday.JPG").storage_name(owner, at).unwrap();
        assert_eq!(
            name,
            "00000000-0000-0000-0000-000000000001-1700000000123.jpg"
        );
        assert_eq!(validate_photo_name(&name), Ok(()));
    }

    #[test]
    fn rejects_weird_names() {
        for bad in ["noext", "trailing.", "a.b/c", "x.p g"] {
            assert!(photo(bad).extension().is_err(), "{bad:?} was accepted");
        }
        for bad in ["", "../etc/passwd", ".hidden", "a/b.png"] {
            assert!(validate_photo_name(bad).is_err(), "{bad:?} was accepted");
        }
    }

    #[test]
    fn data_travels_as_base64() {
        let json = serde_json::to_value(photo("a.png")).unwrap();
        assert_eq!(json["data"], "/9j/");
        let back: NewPhoto = serde_json::from_value(json).unwrap();
        assert_eq!(back, photo("a.png"));
    }
}
