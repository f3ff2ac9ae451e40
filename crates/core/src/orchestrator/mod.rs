//! # Orchestrators
//!
//! The three operations the outside world calls: run research, chat,
//! compare. Everything else in the crate exists to serve these.

pub mod chat;
pub mod compare;
pub mod events;
pub mod research;

pub use chat::{classify_message, ChatIntent, ChatOrchestrator};
pub use compare::{compare_reports, CompareConfig, CompareOrchestrator};
pub use events::{ResearchEvent, ResearchEventKind};
pub use research::{ResearchConfig, ResearchOrchestrator};
