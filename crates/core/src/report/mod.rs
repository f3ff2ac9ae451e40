//! # Report
//!
//! The versioned account-plan report and the merge rules that fold
//! fresh agent results into it.

pub mod merge;
pub mod model;

pub use merge::{apply_attempt, apply_chat_edit, merge_run, EditTarget, ReportIdentity, SectionEdit};
pub use model::{
    AttemptRecord, Citation, Report, ReportSections, SectionKind, SectionOrigin, SectionPayload,
    SectionResult, SectionSlot, SectionStatus,
};
