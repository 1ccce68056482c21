//! Sample sources and the decoded-sample arena
//!
//! A [`SampleSource`] turns a file path into a fully decoded, interleaved
//! [`SampleBuffer`]. Loading is blocking; the engine calls it from
//! `spawn_blocking`. Decoded buffers are held in a [`SampleArena`] keyed by
//! cue id, with a byte budget and least-recently-used eviction of buffers no
//! voice is playing.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer as DecodeBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Decoded audio, interleaved `f32`
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: usize,
    sample_rate: u32,
    samples: Vec<f32>,
}

impl SampleBuffer {
    /// Wrap interleaved samples; the length must be a whole number of frames
    pub fn new(channels: usize, sample_rate: u32, samples: Vec<f32>) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidState("Sample buffer needs at least one channel".to_string()));
        }
        if sample_rate == 0 {
            return Err(Error::InvalidState("Sample rate must be > 0".to_string()));
        }
        if samples.len() % channels != 0 {
            return Err(Error::InvalidState(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            channels,
            sample_rate,
            samples,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Approximate heap size, used for the arena budget
    pub fn byte_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }

    /// One interleaved frame
    #[inline]
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.channels)?;
        self.samples.get(start..start + self.channels)
    }

    /// Copy up to `length` frames starting at frame `offset` into `buffer`
    ///
    /// Returns the number of frames copied, limited by the end of the
    /// material and the size of `buffer`.
    pub fn read(&self, buffer: &mut [f32], offset: usize, length: usize) -> usize {
        let available = self.frames().saturating_sub(offset);
        let fits = buffer.len() / self.channels;
        let frames = length.min(available).min(fits);
        if frames == 0 {
            return 0;
        }
        let start = offset * self.channels;
        let count = frames * self.channels;
        buffer[..count].copy_from_slice(&self.samples[start..start + count]);
        frames
    }
}

/// Loader collaborator for audio material
pub trait SampleSource: Send + Sync {
    /// Decode the whole file; failures map to [`Error::LoadFailed`]
    fn load(&self, path: &Path) -> Result<SampleBuffer>;
}

/// File decoder backed by symphonia
#[derive(Debug, Default, Clone)]
pub struct SymphoniaSource;

impl SymphoniaSource {
    pub fn new() -> Self {
        Self
    }
}

impl SampleSource for SymphoniaSource {
    fn load(&self, path: &Path) -> Result<SampleBuffer> {
        debug!("Decoding {}", path.display());

        let file = std::fs::File::open(path).map_err(|e| Error::load_failed(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::load_failed(path, format!("unsupported format: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::load_failed(path, "no audio track"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::load_failed(path, "unknown sample rate"))?;
        let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::load_failed(path, format!("no decoder: {}", e)))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut scratch: Option<DecodeBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => {
                    warn!("Stream reset requested in {}; stopping decode", path.display());
                    break;
                }
                Err(e) => return Err(Error::load_failed(path, e)),
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    if channels == 0 {
                        channels = spec.channels.count();
                    }
                    let needed = decoded.capacity() * spec.channels.count();
                    if scratch.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                        scratch = Some(DecodeBuffer::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = scratch.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        samples.extend_from_slice(buf.samples());
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet in {}: {}", path.display(), e);
                }
                Err(e) => return Err(Error::load_failed(path, e)),
            }
        }

        if channels == 0 || samples.is_empty() {
            return Err(Error::load_failed(path, "no audio decoded"));
        }

        let buffer = SampleBuffer::new(channels, sample_rate, samples)
            .map_err(|e| Error::load_failed(path, e))?;
        info!(
            "Decoded {}: {} ch, {} Hz, {:.2}s",
            path.display(),
            buffer.channel_count(),
            buffer.sample_rate(),
            buffer.duration_seconds()
        );
        Ok(buffer)
    }
}

/// Preloaded buffers keyed by path
///
/// Serves material that is generated rather than read from disk.
#[derive(Debug, Default)]
pub struct MemorySource {
    buffers: RwLock<HashMap<PathBuf, Arc<SampleBuffer>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, buffer: SampleBuffer) {
        self.buffers.write().insert(path.into(), Arc::new(buffer));
    }
}

impl SampleSource for MemorySource {
    fn load(&self, path: &Path) -> Result<SampleBuffer> {
        self.buffers
            .read()
            .get(path)
            .map(|b| b.as_ref().clone())
            .ok_or_else(|| Error::load_failed(path, "not found"))
    }
}

struct ArenaEntry {
    buffer: Arc<SampleBuffer>,
    last_used: u64,
}

/// Decoded buffers per cue with a byte budget
///
/// A buffer counts as in use while anything besides the arena holds it
/// (a playing voice). Only unused buffers are evicted. A single buffer
/// larger than the budget is still admitted.
pub struct SampleArena {
    budget_bytes: usize,
    used_bytes: usize,
    clock: u64,
    entries: HashMap<Uuid, ArenaEntry>,
}

impl SampleArena {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            used_bytes: 0,
            clock: 0,
            entries: HashMap::new(),
        }
    }

    /// Store the buffer for `cue_id`, replacing any previous one
    pub fn insert(&mut self, cue_id: Uuid, buffer: SampleBuffer) -> Arc<SampleBuffer> {
        self.release(cue_id);

        let size = buffer.byte_size();
        self.evict_for(size);

        self.clock += 1;
        let buffer = Arc::new(buffer);
        self.used_bytes += size;
        self.entries.insert(
            cue_id,
            ArenaEntry {
                buffer: Arc::clone(&buffer),
                last_used: self.clock,
            },
        );
        buffer
    }

    /// Fetch and mark as recently used
    pub fn get(&mut self, cue_id: Uuid) -> Option<Arc<SampleBuffer>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(&cue_id).map(|entry| {
            entry.last_used = clock;
            Arc::clone(&entry.buffer)
        })
    }

    pub fn contains(&self, cue_id: Uuid) -> bool {
        self.entries.contains_key(&cue_id)
    }

    /// Drop the buffer for `cue_id`; playing voices keep their own reference
    pub fn release(&mut self, cue_id: Uuid) -> bool {
        match self.entries.remove(&cue_id) {
            Some(entry) => {
                self.used_bytes = self.used_bytes.saturating_sub(entry.buffer.byte_size());
                true
            }
            None => false,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_for(&mut self, incoming: usize) {
        while self.used_bytes + incoming > self.budget_bytes {
            let victim = self
                .entries
                .iter()
                .filter(|(_, entry)| Arc::strong_count(&entry.buffer) == 1)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id);

            match victim {
                Some(id) => {
                    debug!("Evicting decoded samples for cue {}", id);
                    self.release(id);
                }
                None => break,
            }
        }
    }
}
