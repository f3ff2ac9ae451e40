pub mod compare_sessions;
pub mod db;
pub mod personas;
pub mod reports;

pub use db::DossierDb;

pub use compare_sessions::{
    CompareSession, CompareSessionStore, ComparisonPayload, Recommendation, RecommendationBasis,
    SectionDelta, SideBySide,
};
pub use personas::{Persona, PersonaDraft, PersonaManager, PersonaUpdate};
pub use reports::{CompanyRef, ReportRepository, SaveError, SqliteReportRepository};
