//! Core generation pipeline for protogen.
//!
//! This crate ties together dependency fetching, definition indexing,
//! include-path resolution and the external generator stages into the
//! end-to-end [`pipeline::Pipeline`].

pub mod includes;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod toolchain;
