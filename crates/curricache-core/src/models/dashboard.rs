//! Derived dashboard types.
//!
//! These are produced by [`crate::dashboard::aggregate`] and never come from
//! the remote store directly.

use serde::{Deserialize, Serialize};

use super::{Curriculum, CurriculumType, ModuleCompletion};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DashboardData {
    pub curricula: Vec<Curriculum>,
    pub daily_modules: Vec<DailyModuleSummary>,
    pub book_resources: Vec<BookResource>,
    pub other_resources: Vec<OtherResource>,
    pub module_completions: Vec<ModuleCompletion>,
}

impl DashboardData {
    /// Fraction of daily modules marked complete, 0.0 when there are none.
    pub fn completion_rate(&self) -> f64 {
        if self.daily_modules.is_empty() {
            return 0.0;
        }
        let done = self.daily_modules.iter().filter(|m| m.completed).count();
        done as f64 / self.daily_modules.len() as f64
    }

    pub fn modules_for<'a>(
        &'a self,
        curriculum_id: &'a str,
    ) -> impl Iterator<Item = &'a DailyModuleSummary> + 'a {
        self.daily_modules
            .iter()
            .filter(move |m| m.curriculum_id == curriculum_id)
    }
}

/// Time split for a module, chosen by curriculum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModuleTime {
    Text {
        primary_text: String,
        supplementary_materials: String,
    },
    Video {
        video_viewing: String,
        preparation: String,
        synthesis: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DailyModuleSummary {
    pub curriculum_id: String,
    pub curriculum_title: String,
    pub curriculum_type: CurriculumType,
    pub day: u32,
    pub date: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub primary_reading: Option<String>,
    pub video_title: Option<String>,
    pub video_url: Option<String>,
    pub time: ModuleTime,
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum BookKind {
    Primary,
    Supplementary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct BookResource {
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub year: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: BookKind,
    pub curriculum_id: String,
    pub curriculum_title: String,
    /// Day of the module that cites this book; `None` for primary resources.
    pub module_day: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum OtherKind {
    Paper,
    Resource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct OtherResource {
    pub title: String,
    pub author: Option<String>,
    pub journal: String,
    pub year: Option<String>,
    pub doi: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: OtherKind,
    pub curriculum_id: String,
    pub curriculum_title: String,
    pub module_day: u32,
}
