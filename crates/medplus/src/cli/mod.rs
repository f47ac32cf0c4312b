//! CLI commands for the MedPlus harness.

pub mod harness;
pub mod output;
pub mod profile;
pub mod session;
