//! # External Providers
//!
//! Thin wrappers over external data APIs. The orchestration core only
//! requires that every provider call resolves to success or failure
//! within a bounded time; the provider protocol itself stays in here.

pub mod finance;

pub use finance::{AlphaVantageFinance, FinanceProvider, PricePoint};
