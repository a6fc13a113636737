use serde::{Deserialize, Serialize};

/// Completion record for one day of one curriculum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ModuleCompletion {
    pub curriculum_id: String,
    pub day_number: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl ModuleCompletion {
    pub fn matches(&self, curriculum_id: &str, day: u32) -> bool {
        self.curriculum_id == curriculum_id && self.day_number == day
    }
}
