use serde::{Deserialize, Serialize};

/// Outcome of one orphan sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub success: bool,
    /// Remote objects seen under the folder prefix.
    pub listed: usize,
    /// Distinct remote ids referenced by any record.
    pub referenced: usize,
    /// Unreferenced objects older than the grace period.
    pub orphaned: usize,
    pub deleted: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SweepReport {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}
