//! Build-file model, parser and renderer.
//!
//! # Supported Instructions
//!
//! FROM, RUN, COPY, WORKDIR, USER, CMD, ENTRYPOINT, EXPOSE, ENV and VOLUME are
//! modelled. Every other keyword (ARG, LABEL, ADD, HEALTHCHECK, ...) is kept as
//! [`InstructionKind::Other`] and rendered back unchanged.

pub mod instruction;
pub mod parser;
pub mod render;

pub use instruction::{Arguments, Dockerfile, Form, Instruction, InstructionKind, Stage};
pub use parser::parse;
pub use render::{render, render_body, render_header};
