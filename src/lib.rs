//! Dependency-ordered builder for composite storage images.
//!
//! A build description declares a set of named images (flash chips, disk
//! images, filesystem images, archives) whose content may embed other
//! declared images as partitions. This crate turns that description into a
//! dependency-ordered plan and drives generation of each image exactly once,
//! after everything it references.
//!
//! # Architecture
//!
//! ```text
//! build description (TOML)
//!     │
//!     ├── config     — syntax-agnostic Section tree, size parsing
//!     ├── image      — Image/Partition model, flash geometries, catalog
//!     ├── handler    — pluggable per-type builders behind one trait
//!     ├── stage      — mountpoint staging under a run-scoped temp root
//!     └── build      — context, phase driver, scheduler, manifest
//! ```
//!
//! A run is strictly sequential: ingest, validate references, propagate
//! flash types, preflight host tools, stage mountpoints, run handler setup,
//! then generate every image in declaration order with dependencies first.
//! Configuration problems (a missing handler type, a dangling partition
//! reference, conflicting flash geometries) abort before any filesystem work
//! beyond the staging-area emptiness check.
//!
//! # Example
//!
//! ```rust,ignore
//! use image_builder::{run, BuildOptions};
//!
//! let opts = BuildOptions {
//!     config: "build.toml".into(),
//!     ..Default::default()
//! };
//! run(&opts)?;
//! ```

pub mod build;
pub mod config;
pub mod handler;
pub mod image;
pub mod preflight;
pub mod process;
pub mod stage;

pub use build::{check, run, BuildContext, BuildOptions};
pub use config::{load_config, parse_size, Section};
pub use handler::ImageHandler;
pub use image::{Image, Partition};
