//! Curriculum records as returned by the remote store.
//!
//! Only the shape needed for caching and dashboard aggregation is modelled.
//! Unknown fields are ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Delivery format of a curriculum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum CurriculumType {
    #[default]
    Text,
    Video,
}

impl CurriculumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurriculumType::Text => "text",
            CurriculumType::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Curriculum {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub title: String,
    #[serde(rename = "type", default)]
    pub curriculum_type: CurriculumType,
    #[serde(default)]
    pub primary_resource_title: Option<String>,
    #[serde(default)]
    pub primary_resource_author: Option<String>,
    #[serde(default)]
    pub primary_resource_isbn: Option<String>,
    #[serde(default)]
    pub primary_resource_year: Option<String>,
    #[serde(default)]
    pub full_curriculum_data: Option<FullCurriculumData>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Curriculum {
    /// Daily modules, or an empty slice when the curriculum has no body yet.
    pub fn daily_modules(&self) -> &[DailyModule] {
        self.full_curriculum_data
            .as_ref()
            .map(|d| d.daily_modules.as_slice())
            .unwrap_or(&[])
    }

    pub fn module_count(&self) -> usize {
        self.daily_modules().len()
    }

    pub fn is_video(&self) -> bool {
        self.curriculum_type == CurriculumType::Video
    }

    /// Primary resource title, ignoring blank values.
    pub fn primary_title(&self) -> Option<&str> {
        self.primary_resource_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct FullCurriculumData {
    #[serde(default)]
    pub daily_modules: Vec<DailyModule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DailyModule {
    #[serde(default)]
    pub day: u32,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub time_allocation: Option<TimeAllocation>,
    #[serde(default)]
    pub primary_reading: Option<String>,
    #[serde(default)]
    pub video_title: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub supplementary_readings: Vec<SupplementaryReading>,
}

/// Suggested time split for a module. Text curricula use `primary_text` and
/// `supplementary_materials`; video curricula use the other three.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TimeAllocation {
    #[serde(default)]
    pub primary_text: Option<String>,
    #[serde(default)]
    pub supplementary_materials: Option<String>,
    #[serde(default)]
    pub video_viewing: Option<String>,
    #[serde(default)]
    pub preparation: Option<String>,
    #[serde(default)]
    pub synthesis: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SupplementaryReading {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
}
