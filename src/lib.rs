//! Tracerec - per-CPU kernel trace capture
//!
//! This library coordinates one recorder process per CPU that copies raw
//! ftrace buffers into temporary artifacts, stops them in a known order,
//! and assembles the artifacts into a single trace archive.

pub mod archive;
pub mod artifact;
pub mod assembly;
pub mod cli;
pub mod control;
pub mod cpus;
pub mod error;
pub mod extract;
pub mod manager;
pub mod recorder;
pub mod session;
pub mod signals;
pub mod worker;
