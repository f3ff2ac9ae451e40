//! # Dossier Core
//!
//! The "Brain" of the Dossier system - research orchestration, report
//! versioning, and account memory for persona-aware B2B account plans.
//!
//! ## Architecture
//!
//! - `agents/` - The six section agents (Fundamentals, Leadership, News,
//!   TechServices, Strategy, Visualization) behind one capability trait
//! - `report/` - The versioned Report model and the merge rules
//! - `orchestrator/` - Research / Chat / Compare orchestrators
//! - `memory/` - Append-only fact store scoped to (user, persona)
//! - `state/` - SQLite persistence: personas, reports, compare sessions
//! - `providers/` - Thin wrappers over external data APIs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dossier_core::orchestrator::{ResearchConfig, ResearchOrchestrator};
//!
//! let config = ResearchConfig::default();
//! let agents = config.build_agents(finance);
//! let orchestrator = ResearchOrchestrator::new(agents, reports, memory, config);
//! let report = orchestrator.run_full_research(&persona, &request, true).await?;
//! ```

pub mod agents;
pub mod company;
pub mod error;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod report;
pub mod state;
