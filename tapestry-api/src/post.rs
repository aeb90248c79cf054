use std::{fmt, str::FromStr};

use uuid::Uuid;

use crate::{Error, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

/// Life-area a post is filed under
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Roots,
    Stem,
    Leaves,
    Bloom,
    Fruit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Category {
    pub name: &'static str,
    pub emoji: &'static str,
    pub description: &'static str,
}

const ROOTS_CATEGORIES: &[Category] = &[Category {
    name: "Roots",
    emoji: "🌱",
    description: "What inner healing needs your attention?",
}];

const STEM_CATEGORIES: &[Category] = &[Category {
    name: "Progress",
    emoji: "📚",
    description: "A milestone or learning moment",
}];

const LEAVES_CATEGORIES: &[Category] = &[
    Category {
        name: "Music",
        emoji: "🎵",
        description: "What are you listening to?",
    },
    Category {
        name: "Food",
        emoji: "🍽️",
        description: "What are you eating?",
    },
    Category {
        name: "Vibe",
        emoji: "✨",
        description: "How are you feeling?",
    },
    Category {
        name: "Moment",
        emoji: "📸",
        description: "Share a beautiful moment",
    },
    Category {
        name: "Update",
        emoji: "💭",
        description: "What are you up to?",
    },
];

const BLOOM_CATEGORIES: &[Category] = &[Category {
    name: "Insight",
    emoji: "✨",
    description: "A realization or meaningful thought",
}];

const FRUIT_CATEGORIES: &[Category] = &[
    Category {
        name: "contributions",
        emoji: "🎁",
        description: "Giving back and making a difference",
    },
    Category {
        name: "sharing",
        emoji: "🤝",
        description: "Collaboration and community building",
    },
    Category {
        name: "mentoring",
        emoji: "👥",
        description: "Guiding and supporting others",
    },
];

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Roots,
        Section::Stem,
        Section::Leaves,
        Section::Bloom,
        Section::Fruit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Roots => "roots",
            Section::Stem => "stem",
            Section::Leaves => "leaves",
            Section::Bloom => "bloom",
            Section::Fruit => "fruit",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Section::Roots => "Roots",
            Section::Stem => "Stem",
            Section::Leaves => "Leaves",
            Section::Bloom => "Bloom",
            Section::Fruit => "Fruit",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Section::Roots => "🌱",
            Section::Stem => "🌿",
            Section::Leaves => "🍃",
            Section::Bloom => "🌸",
            Section::Fruit => "🍎",
        }
    }

    pub fn categories(&self) -> &'static [Category] {
        match self {
            Section::Roots => ROOTS_CATEGORIES,
            Section::Stem => STEM_CATEGORIES,
            Section::Leaves => LEAVES_CATEGORIES,
            Section::Bloom => BLOOM_CATEGORIES,
            Section::Fruit => FRUIT_CATEGORIES,
        }
    }

    pub fn category(&self, name: &str) -> Option<&'static Category> {
        self.categories()
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = Error;

    fn from_str(s: &str) -> Result<Section, Error> {
        Section::ALL
            .into_iter()
            .find(|sec| sec.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownSection(String::from(s)))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub created_at: Time,
    pub content: String,
    pub user_id: UserId,
    pub likes: i64,

    /// None only for posts written before sections existed
    pub section: Option<Section>,
    pub category: Option<String>,
    pub category_emoji: Option<String>,
    pub category_part: Option<String>,
    pub subcategory: Option<String>,
    pub subcategory_emoji: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub user_id: UserId,
    pub content: String,
    pub section: Section,
    pub category: Option<String>,
    pub category_emoji: Option<String>,
    pub category_part: Option<String>,
    pub subcategory: Option<String>,
    pub subcategory_emoji: Option<String>,
    pub photo_url: Option<String>,
}

impl NewPost {
    pub fn new(user_id: UserId, section: Section, content: String) -> NewPost {
        NewPost {
            user_id,
            content,
            section,
            category: Some(String::from(section.title())),
            category_emoji: Some(String::from(section.emoji())),
            category_part: Some(String::from(section.title())),
            subcategory: None,
            subcategory_emoji: None,
            photo_url: None,
        }
    }

    pub fn with_category(mut self, category: &Category) -> NewPost {
        self.subcategory = Some(String::from(category.name));
        self.subcategory_emoji = Some(String::from(category.emoji));
        self
    }

    pub fn with_photo(mut self, url: String) -> NewPost {
        self.photo_url = Some(url);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.content)?;
        for s in [
            &self.category,
            &self.category_emoji,
            &self.category_part,
            &self.subcategory,
            &self.subcategory_emoji,
            &self.photo_url,
        ]
        .into_iter()
        .flatten()
        {
            crate::validate_string(s)?;
        }
        Ok(())
    }

    pub fn into_post(self, id: PostId, created_at: Time) -> Post {
        Post {
            id,
            created_at,
            content: self.content,
            user_id: self.user_id,
            likes: 0,
            section: Some(self.section),
            category: self.category,
            category_emoji: self.category_emoji,
            category_part: self.category_part,
            subcategory: self.subcategory,
            subcategory_emoji: self.subcategory_emoji,
            photo_url: self.photo_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_names_round_trip() {
        for s in Section::ALL {
            assert_eq!(s.as_str().parse::<Section>(), Ok(s));
            assert_eq!(
                serde_json::to_string(&s).unwrap(),
                format!("\"{}\"", s.as_str())
            );
        }
        assert_eq!("Bloom".parse::<Section>(), Ok(Section::Bloom));
        assert_eq!(
            "trunk".parse::<Section>(),
            Err(Error::UnknownSection(String::from("trunk")))
        );
    }

    #[test]
    fn every_section_has_categories() {
        for s in Section::ALL {
            assert!(!s.categories().is_empty(), "{s} has no category");
        }
        assert_eq!(
            Section::Leaves.category("music").map(|c| c.emoji),
            Some("🎵")
        );
        assert_eq!(Section::Fruit.category("music"), None);
    }

    #[test]
    fn new_post_carries_category() {
        let sharing = Section::Fruit.category("sharing").unwrap();
        let p = NewPost::new(UserId::stub(), Section::Fruit, String::from("hi"))
            .with_category(sharing);
        assert_eq!(p.category.as_deref(), Some("Fruit"));
        assert_eq!(p.subcategory.as_deref(), Some("sharing"));
        assert_eq!(p.subcategory_emoji.as_deref(), Some("🤝"));
        assert_eq!(p.validate(), Ok(()));

        let empty = NewPost::new(UserId::stub(), Section::Fruit, String::from("   "));
        assert_eq!(empty.validate(), Err(Error::EmptyContent));
    }
}
