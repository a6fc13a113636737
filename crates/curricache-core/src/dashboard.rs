//! Dashboard aggregation.
//!
//! Turns a user's curricula and module completions into the grouped
//! collections the dashboard renders. The function is pure: equal inputs
//! always give equal output, so results can be cached and compared.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate};

use crate::models::{
    BookKind, BookResource, Curriculum, CurriculumType, DailyModule, DailyModuleSummary,
    DashboardData, ModuleCompletion, ModuleTime, OtherKind, OtherResource, SupplementaryReading,
    TimeAllocation,
};

// ============================================================================
// Constants
// ============================================================================

/// Default reading time for the primary text of a text curriculum.
pub const DEFAULT_PRIMARY_TEXT_TIME: &str = "42 minutes";

/// Default time for supplementary materials in a text curriculum.
pub const DEFAULT_SUPPLEMENTARY_TIME: &str = "18 minutes";

/// Default viewing time for a video curriculum module.
pub const DEFAULT_VIDEO_VIEWING_TIME: &str = "45 minutes";

/// Default preparation time for a video curriculum module.
pub const DEFAULT_PREPARATION_TIME: &str = "5 minutes";

/// Default synthesis time for a video curriculum module.
pub const DEFAULT_SYNTHESIS_TIME: &str = "10 minutes";

/// Placeholder the generator writes when a reading has no ISBN or DOI.
const NOT_AVAILABLE: &str = "N/A";

/// Journal name used when a non-book reading names neither journal nor publisher.
const UNKNOWN_JOURNAL: &str = "Unknown";

/// Build dashboard data from curricula and completions.
pub fn aggregate(curricula: &[Curriculum], completions: &[ModuleCompletion]) -> DashboardData {
    let mut daily_modules = Vec::new();
    let mut book_resources = Vec::new();
    let mut other_resources = Vec::new();

    for curriculum in curricula {
        if !curriculum.is_video() {
            if let Some(title) = curriculum.primary_title() {
                book_resources.push(BookResource {
                    title: title.to_string(),
                    author: curriculum.primary_resource_author.clone(),
                    isbn: curriculum.primary_resource_isbn.clone(),
                    year: curriculum.primary_resource_year.clone(),
                    resource_type: BookKind::Primary,
                    curriculum_id: curriculum.id.clone(),
                    curriculum_title: curriculum.title.clone(),
                    module_day: None,
                });
            }
        }

        for module in curriculum.daily_modules() {
            daily_modules.push(summarize_module(curriculum, module, completions));

            for reading in &module.supplementary_readings {
                match classify_reading(curriculum, module.day, reading) {
                    Classified::Book(book) => book_resources.push(book),
                    Classified::Other(other) => other_resources.push(other),
                }
            }
        }
    }

    // Vec::sort_by is stable, so modules sharing a date keep curriculum order.
    daily_modules.sort_by(|a, b| compare_dates(a.date.as_deref(), b.date.as_deref()));

    DashboardData {
        curricula: curricula.to_vec(),
        daily_modules,
        book_resources,
        other_resources,
        module_completions: completions.to_vec(),
    }
}

fn summarize_module(
    curriculum: &Curriculum,
    module: &DailyModule,
    completions: &[ModuleCompletion],
) -> DailyModuleSummary {
    let completed = completions
        .iter()
        .any(|c| c.completed && c.matches(&curriculum.id, module.day));

    DailyModuleSummary {
        curriculum_id: curriculum.id.clone(),
        curriculum_title: curriculum.title.clone(),
        curriculum_type: curriculum.curriculum_type,
        day: module.day,
        date: module.date.clone(),
        title: module.title.clone(),
        description: module.description.clone(),
        primary_reading: module.primary_reading.clone(),
        video_title: module.video_title.clone(),
        video_url: module.video_url.clone(),
        time: module_time(curriculum.curriculum_type, module.time_allocation.as_ref()),
        completed,
    }
}

/// Pick the time fields that apply to the curriculum type, filling gaps with
/// the fixed defaults.
pub fn module_time(kind: CurriculumType, allocation: Option<&TimeAllocation>) -> ModuleTime {
    let field = |pick: fn(&TimeAllocation) -> &Option<String>, default: &str| {
        allocation
            .and_then(|a| pick(a).clone())
            .unwrap_or_else(|| default.to_string())
    };

    match kind {
        CurriculumType::Video => ModuleTime::Video {
            video_viewing: field(|a| &a.video_viewing, DEFAULT_VIDEO_VIEWING_TIME),
            preparation: field(|a| &a.preparation, DEFAULT_PREPARATION_TIME),
            synthesis: field(|a| &a.synthesis, DEFAULT_SYNTHESIS_TIME),
        },
        CurriculumType::Text => ModuleTime::Text {
            primary_text: field(|a| &a.primary_text, DEFAULT_PRIMARY_TEXT_TIME),
            supplementary_materials: field(
                |a| &a.supplementary_materials,
                DEFAULT_SUPPLEMENTARY_TIME,
            ),
        },
    }
}

enum Classified {
    Book(BookResource),
    Other(OtherResource),
}

fn is_available(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some(v) if v != NOT_AVAILABLE)
}

fn classify_reading(curriculum: &Curriculum, day: u32, reading: &SupplementaryReading) -> Classified {
    if is_available(&reading.isbn) {
        return Classified::Book(BookResource {
            title: reading.title.clone(),
            author: reading.author.clone(),
            isbn: reading.isbn.clone(),
            year: reading.year.clone(),
            resource_type: BookKind::Supplementary,
            curriculum_id: curriculum.id.clone(),
            curriculum_title: curriculum.title.clone(),
            module_day: Some(day),
        });
    }

    let resource_type = if reading.journal.is_some() {
        OtherKind::Paper
    } else {
        OtherKind::Resource
    };
    let journal = reading
        .journal
        .clone()
        .or_else(|| reading.publisher.clone())
        .unwrap_or_else(|| UNKNOWN_JOURNAL.to_string());
    let doi = if is_available(&reading.doi) {
        reading.doi.clone()
    } else {
        None
    };

    Classified::Other(OtherResource {
        title: reading.title.clone(),
        author: reading.author.clone(),
        journal,
        year: reading.year.clone(),
        doi,
        resource_type,
        curriculum_id: curriculum.id.clone(),
        curriculum_title: curriculum.title.clone(),
        module_day: day,
    })
}

/// Parse a module date. Accepts plain `YYYY-MM-DD` and RFC 3339 timestamps.
fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(date).ok().map(|dt| dt.date_naive()))
}

/// Ascending by date; undated or unparseable modules go last.
fn compare_dates(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a.and_then(parse_date), b.and_then(parse_date)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
