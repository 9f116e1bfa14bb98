//! dhi-migrate CLI - Dockerfile migration to Docker Hardened Images.

pub mod commands;
pub mod output;
