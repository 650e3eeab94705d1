use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How a family member relates to the account holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// The account holder.
    #[serde(rename = "self")]
    Oneself,
    Spouse,
    Son,
    Daughter,
    Father,
    Mother,
    Brother,
    Sister,
    Grandfather,
    Grandmother,
    Other,
}

impl Relationship {
    pub const ALL: &[Relationship] = &[
        Relationship::Oneself,
        Relationship::Spouse,
        Relationship::Son,
        Relationship::Daughter,
        Relationship::Father,
        Relationship::Mother,
        Relationship::Brother,
        Relationship::Sister,
        Relationship::Grandfather,
        Relationship::Grandmother,
        Relationship::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Oneself => "self",
            Relationship::Spouse => "spouse",
            Relationship::Son => "son",
            Relationship::Daughter => "daughter",
            Relationship::Father => "father",
            Relationship::Mother => "mother",
            Relationship::Brother => "brother",
            Relationship::Sister => "sister",
            Relationship::Grandfather => "grandfather",
            Relationship::Grandmother => "grandmother",
            Relationship::Other => "other",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        Relationship::ALL.iter().copied().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::Oneself => f.write_str("Self"),
            other => {
                let name = other.as_str();
                let mut chars = name.chars();
                if let Some(first) = chars.next() {
                    write!(f, "{}{}", first.to_ascii_uppercase(), chars.as_str())?;
                }
                Ok(())
            }
        }
    }
}

/// A person whose records an account keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyMember {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub relationship: Relationship,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFamilyMember {
    pub name: String,
    pub relationship: Relationship,
    /// Optional so the account holder can be added before filling it in.
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
}

impl CreateFamilyMember {
    pub fn validate(&self) -> Result<(), crate::HeallinkError> {
        if self.name.trim().is_empty() {
            return Err(crate::HeallinkError::InvalidInput(
                "name and relationship are required".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFamilyMember {
    pub name: Option<String>,
    pub relationship: Option<Relationship>,
    pub date_of_birth: Option<NaiveDate>,
}
