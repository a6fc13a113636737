//! Data models for curriculum entities.
//!
//! This module contains the data structures the cache stores and derives:
//!
//! - `Curriculum`, `DailyModule`, `SupplementaryReading`: records as the
//!   remote store returns them
//! - `ModuleCompletion`: per-day completion state for a user
//! - Dashboard types: `DashboardData`, `DailyModuleSummary`, `BookResource`,
//!   `OtherResource`

pub mod completion;
pub mod curriculum;
pub mod dashboard;

pub use completion::ModuleCompletion;
pub use curriculum::{
    Curriculum, CurriculumType, DailyModule, FullCurriculumData, SupplementaryReading,
    TimeAllocation,
};
pub use dashboard::{
    BookKind, BookResource, DailyModuleSummary, DashboardData, ModuleTime, OtherKind,
    OtherResource,
};
