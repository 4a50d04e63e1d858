use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, warn};

/// Output audio format of the live service: 24kHz mono 16-bit PCM
pub const RESPONSE_SAMPLE_RATE: u32 = 24_000;

/// Turns smaller than this are reported as probably silent
const MIN_AUDIBLE_BYTES: u64 = 1_000;

/// Configuration for per-turn recordings
#[derive(Debug, Clone)]
pub struct TurnRecorderConfig {
    /// Output directory for WAV files
    pub output_dir: PathBuf,

    /// Session label used in file names (e.g. "20251015_143000")
    pub session_label: String,

    /// Sample rate of received audio
    pub sample_rate: u32,
}

impl TurnRecorderConfig {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            session_label: chrono::Local::now().format("%Y%m%d_%H%M%S").to_string(),
            sample_rate: RESPONSE_SAMPLE_RATE,
        }
    }
}

/// Metadata for one recorded turn
#[derive(Debug, Clone)]
pub struct TurnRecording {
    /// Turn number (1-indexed)
    pub turn: usize,
    /// File path of the WAV file
    pub file_path: PathBuf,
    /// Number of samples written
    pub sample_count: usize,
    /// Size of the finished file in bytes
    pub file_size: u64,
}

/// Writes the model's audio to one WAV file per turn
pub struct TurnRecorder {
    config: TurnRecorderConfig,
    current: Option<TurnWriter>,
    turn: usize,
    /// Odd byte carried over between chunks
    pending_byte: Option<u8>,
}

impl TurnRecorder {
    pub fn new(config: TurnRecorderConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir).context("Failed to create recordings directory")?;

        info!(
            "Turn recorder initialized: {} ({} Hz)",
            config.output_dir.display(),
            config.sample_rate
        );

        Ok(Self {
            config,
            current: None,
            turn: 0,
            pending_byte: None,
        })
    }

    /// Append little-endian 16-bit PCM bytes to the current turn
    pub fn write_audio(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.current.is_none() {
            self.turn += 1;
            let path = self.config.output_dir.join(format!(
                "conversation_{}_round{}.wav",
                self.config.session_label, self.turn
            ));
            self.current = Some(TurnWriter::new(path, self.turn, self.config.sample_rate)?);
        }

        let mut data = Vec::with_capacity(bytes.len() + 1);
        data.extend(self.pending_byte.take());
        data.extend_from_slice(bytes);
        if data.len() % 2 == 1 {
            self.pending_byte = data.pop();
        }

        if let Some(writer) = &mut self.current {
            writer.write_pcm(&data)?;
        }
        Ok(())
    }

    /// Close the current turn's file. Returns `None` if no audio arrived.
    pub fn finish_turn(&mut self) -> Result<Option<TurnRecording>> {
        self.pending_byte = None;
        let Some(writer) = self.current.take() else {
            return Ok(None);
        };

        let recording = writer.finish()?;
        if recording.file_size > MIN_AUDIBLE_BYTES {
            info!(
                "Turn {} audio saved: {} ({} bytes)",
                recording.turn,
                recording.file_path.display(),
                recording.file_size
            );
        } else {
            warn!(
                "Turn {} audio is very small, probably silent: {}",
                recording.turn,
                recording.file_path.display()
            );
        }
        Ok(Some(recording))
    }

    /// Turns started so far
    pub fn turns(&self) -> usize {
        self.turn
    }
}

/// Writes a single turn to disk as WAV file
struct TurnWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    recording: TurnRecording,
}

impl TurnWriter {
    fn new(file_path: PathBuf, turn: usize, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&file_path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", file_path))?;

        Ok(Self {
            writer: Some(writer),
            recording: TurnRecording {
                turn,
                file_path,
                sample_count: 0,
                file_size: 0,
            },
        })
    }

    fn write_pcm(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for pair in bytes.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                    .context("Failed to write sample to WAV")?;
            }
            self.recording.sample_count += bytes.len() / 2;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<TurnRecording> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        self.recording.file_size = fs::metadata(&self.recording.file_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(self.recording.clone())
    }
}

impl Drop for TurnWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
