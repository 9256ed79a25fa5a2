//! # aac-access
//!
//! Read side of a prepared subset. [`CaptionDataset`] loads the persisted
//! index once and serves samples by position: captions and metadata from the
//! index, waveforms decoded from disk only when requested.

#![deny(unsafe_code)]

pub mod audio;
pub mod dataset;
pub mod errors;

pub use audio::{Waveform, load_audio};
pub use dataset::{AUDIO_FIELD, CaptionDataset, Item, ItemValue};
pub use errors::{AccessError, Result};
