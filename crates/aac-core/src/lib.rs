//! # aac-core
//!
//! Foundation types shared by every crate in the workspace:
//!
//! - [`spec::DatasetSpec`]: immutable description of one (dataset, subset)
//! - [`catalog`]: the built-in dataset descriptions (`AudioCaps`, `WavCaps`)
//! - [`types`]: expected files, file statuses, sample records
//! - [`layout::DatasetLayout`]: on-disk directory conventions
//! - [`table::IndexTable`]: the persisted per-subset record table
//! - [`retry`]: retry configuration and backoff math
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod catalog;
pub mod errors;
pub mod layout;
pub mod logging;
pub mod retry;
pub mod spec;
pub mod table;
pub mod types;

pub use catalog::{DatasetName, dataset_spec};
pub use errors::{CatalogError, IndexError};
pub use layout::DatasetLayout;
pub use spec::DatasetSpec;
pub use table::IndexTable;
pub use types::{ExpectedFile, FieldValue, FileStatus, FileTag, ResourceRef, SampleRecord};
