//! Audio file decoding
//!
//! Uses symphonia for WAV, AIFF, FLAC, MP3, OGG Vorbis and AAC. Decoded
//! audio is interleaved f32 at the file's own rate; the load job downmixes
//! and resamples it to the pipeline rate.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{OfflineError, OfflineResult};

/// Decoded PCM
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Frames per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Channel average
    pub fn to_mono(&self) -> Vec<f32> {
        rf_pitch::resample::downmix_interleaved(&self.samples, self.channels)
    }
}

/// Universal audio decoder using symphonia
pub struct AudioDecoder;

impl AudioDecoder {
    /// Decode the first audio track of a file
    pub fn decode(path: &Path) -> OfflineResult<DecodedAudio> {
        let file = File::open(path)
            .map_err(|e| OfflineError::Decode(format!("{}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| OfflineError::Decode(format!("Failed to probe format: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| OfflineError::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let mut sample_rate = codec_params.sample_rate.unwrap_or(rf_pitch::SAMPLE_RATE);
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| OfflineError::Decode(format!("Failed to create decoder: {}", e)))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut buffer: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(OfflineError::Decode(format!("Packet read error: {}", e)));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count();

                    let needed = decoded.capacity() * channels;
                    if buffer.as_ref().is_none_or(|b| b.capacity() < needed) {
                        buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = buffer.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        samples.extend_from_slice(buf.samples());
                    }
                }
                // Corrupt packets are skipped
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => {
                    return Err(OfflineError::Decode(format!("Decode error: {}", e)));
                }
            }
        }

        if samples.is_empty() {
            return Err(OfflineError::Decode(format!("{}: no audio samples", path.display())));
        }

        log::debug!(
            "Decoded {}: {} frames, {} ch, {} Hz",
            path.display(),
            samples.len() / channels.max(1),
            channels,
            sample_rate
        );

        Ok(DecodedAudio {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Get list of supported formats
    pub fn supported_formats() -> &'static [&'static str] {
        &["wav", "flac", "mp3", "ogg", "aac", "m4a", "aiff"]
    }
}

/// Write mono f32 samples as a 32-bit float WAV
pub fn write_wav_f32(path: &Path, samples: &[f32], sample_rate: u32) -> OfflineResult<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| OfflineError::Io(std::io::Error::other(e.to_string())))?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| OfflineError::Io(std::io::Error::other(e.to_string())))?;
    }
    writer
        .finalize()
        .map_err(|e| OfflineError::Io(std::io::Error::other(e.to_string())))?;
    Ok(())
}
