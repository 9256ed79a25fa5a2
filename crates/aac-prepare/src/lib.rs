//! # aac-prepare
//!
//! Everything that moves bytes onto disk for a dataset subset:
//!
//! - [`verify`]: presence, size, and checksum checks of expected files
//! - [`fetch`]: retrieval strategies (hub, URL, per-clip tools), retry, and batches
//! - [`extract`]: multi-part and spanned zip archives
//! - [`indexer`]: metadata parsing and caption aggregation
//! - [`prepare`]: the state machine tying the stages together
//!
//! External programs (yt-dlp, ffmpeg, zip) are spawned through
//! [`process::ProcessRunner`] so tests can substitute them.

#![deny(unsafe_code)]

pub mod errors;
pub mod extract;
pub mod fetch;
pub mod indexer;
pub mod prepare;
pub mod process;
pub mod verify;

pub use errors::{ExtractError, FetchError, PrepareError};
pub use fetch::{
    BatchReport, ExternalToolFetch, FetchFailure, FetchItem, FetchStrategy, Fetcher, HttpFetch,
    HubFetch, Strategies,
};
pub use prepare::{
    CheckReport, PrepareOptions, PrepareReport, PrepareState, Preparer, StageCounts,
};
pub use process::{ProcessOptions, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use verify::{StatusCounts, VerifyReport, verify};
