//! dhi-migrate engine - Dockerfile transformation to Docker Hardened Images.
//!
//! This crate parses a build file into a stage/instruction model, classifies
//! the application, runs the rewrite passes and renders the result with a
//! header describing every decision.
//!
//! ```ignore
//! use dhi_migrate_core::MigrateOptions;
//!
//! let migration = dhi_migrate_engine::migrate(source, "myorg/dhi-node:18-dev", &MigrateOptions::default())?;
//! std::fs::write("dhi.dockerfile", &migration.rendered)?;
//! ```

pub mod classify;
pub mod dockerfile;
pub mod log;
pub mod migrate;
pub mod reference;
pub mod rules;

// Re-export common types
pub use classify::{classify, Ecosystem, RuntimeProfile};
pub use dockerfile::{Arguments, Dockerfile, Form, Instruction, InstructionKind, Stage};
pub use log::{LogEntry, MigrationLog};
pub use migrate::{analyze, migrate, Migration};
pub use reference::ImageReference;
pub use rules::{Pass, PassContext, PassOutput, Pipeline, Targets, NO_CHANGE_PREFIX};
