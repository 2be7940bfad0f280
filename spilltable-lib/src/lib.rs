#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for spilltable
//!
//! This library buffers an unbounded stream of heterogeneously typed table rows, keeps a
//! configurable prefix in memory, and spills the remainder to a self-contained container
//! file once the memory threshold is exceeded. Closing a container yields a read-only,
//! repeatedly iterable [`ContainerTable`](container::ContainerTable) together with a
//! per-column domain summary computed while the rows streamed in.
//!
//! # Module Organization
//!
//! - [`data`]: Cell values, the type registry, rows and table specs
//! - [`container`]: The row-buffering storage engine
//! - [`settings`]: TOML-backed container settings
//! - [`commands`]: Command-line interface used by the `spilltable` binary

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod commands;
pub mod container;
pub mod data;
pub mod settings;

pub use crate::commands::{Host, run};
