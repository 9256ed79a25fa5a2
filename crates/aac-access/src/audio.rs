//! Audio decoding into `(channels, frames)` waveforms.
//!
//! Files are decoded with symphonia (FLAC, WAV, AAC/M4A) and, when the file
//! rate differs from the dataset rate, resampled per channel with rubato.

use std::fs::File;
use std::path::Path;

use ndarray::Array2;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::errors::{AccessError, Result};

/// Frames fed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Decoded audio of one file.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    /// Samples shaped `(channels, frames)`.
    pub samples: Array2<f32>,
    /// Sample rate of `samples`.
    pub sample_rate: u32,
}

impl Waveform {
    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of frames per channel.
    pub fn frames(&self) -> usize {
        self.samples.ncols()
    }

    /// Duration in seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Decode `path` and resample it to `target_rate`.
pub fn load_audio(path: &Path, target_rate: u32) -> Result<Waveform> {
    let (channels, source_rate) = decode_file(path)?;
    let channels = if source_rate == target_rate {
        channels
    } else {
        debug!(path = %path.display(), from = source_rate, to = target_rate, "resampling");
        resample(&channels, source_rate, target_rate)?
    };
    to_waveform(path, channels, target_rate)
}

/// Decode `path` into per-channel samples at the file's own rate.
pub fn decode_file(path: &Path) -> Result<(Vec<Vec<f32>>, u32)> {
    let decode_err = |reason: String| AccessError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| decode_err(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let _ = hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err(format!("probe failed: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("no audio track found".into()))?;
    let codec_params = track.codec_params.clone();
    let track_id = track.id;
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| decode_err("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(format!("codec init failed: {e}")))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(format!("packet read: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = %path.display(), error = e, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(decode_err(format!("decode: {e}"))),
        };

        let spec = *decoded.spec();
        let count = spec.channels.count();
        if channels.is_empty() {
            channels = vec![Vec::new(); count];
        }
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        for frame in buf.samples().chunks(count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
    }

    if channels.first().is_none_or(Vec::is_empty) {
        return Err(decode_err("no audio samples decoded".into()));
    }
    Ok((channels, source_rate))
}

/// Resample every channel from `from_rate` to `to_rate`.
///
/// Output length is `round(frames * to_rate / from_rate)`; the resampler's
/// startup delay is trimmed.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample(channels: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Result<Vec<Vec<f32>>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let frames = channels.first().map_or(0, Vec::len);
    if frames == 0 || from_rate == to_rate {
        return Ok(channels.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, channels.len())
            .map_err(|e| AccessError::Resample(format!("init: {e}")))?;

    let expected = (frames as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels.len()];

    let mut pos = 0;
    while pos < frames {
        let end = (pos + RESAMPLE_CHUNK).min(frames);
        let input: Vec<&[f32]> = channels.iter().map(|c| &c[pos..end]).collect();
        let block = if end - pos == RESAMPLE_CHUNK {
            resampler.process(input.as_slice(), None)
        } else {
            resampler.process_partial(Some(input.as_slice()), None)
        }
        .map_err(|e| AccessError::Resample(format!("process: {e}")))?;
        append_block(&mut output, block);
        pos = end;
    }

    // Flush the delay line.
    while output[0].len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| AccessError::Resample(format!("flush: {e}")))?;
        if block.first().is_none_or(Vec::is_empty) {
            break;
        }
        append_block(&mut output, block);
    }

    for channel in &mut output {
        let _ = channel.drain(..delay.min(channel.len()));
        channel.truncate(expected);
    }
    Ok(output)
}

fn append_block(output: &mut [Vec<f32>], block: Vec<Vec<f32>>) {
    for (out, channel) in output.iter_mut().zip(block) {
        out.extend_from_slice(&channel);
    }
}

fn to_waveform(path: &Path, channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Waveform> {
    let rows = channels.len();
    let cols = channels.first().map_or(0, Vec::len);
    let flat: Vec<f32> = channels.into_iter().flatten().collect();
    let samples = Array2::from_shape_vec((rows, cols), flat).map_err(|e| AccessError::Decode {
        path: path.to_path_buf(),
        reason: format!("ragged channels: {e}"),
    })?;
    Ok(Waveform {
        samples,
        sample_rate,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
