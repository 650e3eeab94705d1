use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::{Attachment, NewAttachment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Checkup,
    Prescription,
    Vaccination,
    LabResult,
    Surgery,
    Imaging,
    #[default]
    Other,
}

impl RecordType {
    pub const ALL: &[RecordType] = &[
        RecordType::Checkup,
        RecordType::Prescription,
        RecordType::Vaccination,
        RecordType::LabResult,
        RecordType::Surgery,
        RecordType::Imaging,
        RecordType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Checkup => "checkup",
            RecordType::Prescription => "prescription",
            RecordType::Vaccination => "vaccination",
            RecordType::LabResult => "lab_result",
            RecordType::Surgery => "surgery",
            RecordType::Imaging => "imaging",
            RecordType::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RecordType::Checkup => "Checkup",
            RecordType::Prescription => "Prescription",
            RecordType::Vaccination => "Vaccination",
            RecordType::LabResult => "Lab Result",
            RecordType::Surgery => "Surgery",
            RecordType::Imaging => "Imaging",
            RecordType::Other => "Other",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "checkup" => Some(RecordType::Checkup),
            "prescription" => Some(RecordType::Prescription),
            "vaccination" => Some(RecordType::Vaccination),
            "lab_result" => Some(RecordType::LabResult),
            "surgery" => Some(RecordType::Surgery),
            "imaging" => Some(RecordType::Imaging),
            "other" => Some(RecordType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A medical record owned by one account, with its attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: String,
    pub account_id: String,
    /// Id of the family member the record is about.
    pub member: String,
    pub title: String,
    pub record_type: RecordType,
    pub doctor: String,
    pub record_date: NaiveDate,
    pub notes: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Bumped on every write; used as a compare-and-swap stamp.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HealthRecord {
    pub fn remote_ids(&self) -> Vec<String> {
        self.attachments.iter().map(|a| a.remote_id.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecord {
    pub member: String,
    pub title: String,
    #[serde(default)]
    pub record_type: RecordType,
    #[serde(default)]
    pub doctor: String,
    pub record_date: NaiveDate,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub files: Vec<NewAttachment>,
}

impl CreateRecord {
    pub fn validate(&self) -> Result<(), crate::HeallinkError> {
        if self.title.trim().is_empty() || self.member.trim().is_empty() {
            return Err(crate::HeallinkError::InvalidInput(
                "title, member, and record date are required".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub member: Option<String>,
    pub title: Option<String>,
    pub record_type: Option<RecordType>,
    pub doctor: Option<String>,
    pub record_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Body of a wholesale attachment replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceFiles {
    pub files: Vec<NewAttachment>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Body of a partial attachment removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveFiles {
    pub remote_ids: Vec<String>,
}

/// Outcome of removing attachments; counts reflect remote deletions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub deleted: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_parse_str_all() {
        for ty in RecordType::ALL {
            assert_eq!(RecordType::parse_str(ty.as_str()), Some(*ty));
        }
        assert_eq!(RecordType::parse_str("Lab Result"), None);
        assert_eq!(RecordType::parse_str(""), None);
    }

    #[test]
    fn record_type_display_uses_human_names() {
        assert_eq!(RecordType::LabResult.to_string(), "Lab Result");
        assert_eq!(RecordType::default(), RecordType::Other);
    }

    #[test]
    fn create_record_requires_title_and_member() {
        let mut input = CreateRecord {
            member: "Ada".into(),
            title: "Annual checkup".into(),
            record_type: RecordType::Checkup,
            doctor: String::new(),
            record_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            notes: String::new(),
            files: vec![],
        };
        assert!(input.validate().is_ok());

        input.title = "  ".into();
        assert!(input.validate().is_err());
    }

    #[test]
    fn create_record_defaults_from_json() {
        let input: CreateRecord = serde_json::from_str(
            r#"{"member":"m1","title":"Flu shot","record_date":"2026-01-15"}"#,
        )
        .unwrap();
        assert_eq!(input.record_type, RecordType::Other);
        assert!(input.files.is_empty());
        assert!(input.notes.is_empty());
    }
}
