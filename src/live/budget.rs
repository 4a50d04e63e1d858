//! Client-side estimate of context-window usage.
//!
//! Costs are heuristic and only need to bound local history and keep
//! requests from growing without limit; they do not mirror the service's
//! tokenizer.

use serde::Serialize;
use tracing::debug;

use super::messages::{Content, MediaChunk, MediaKind, Part};

/// Estimated tokens of one realtime audio chunk
pub const AUDIO_CHUNK_TOKENS: u64 = 8;

/// Estimated tokens of one image/video frame
pub const IMAGE_FRAME_TOKENS: u64 = 258;

/// Compression starts above this share of the window
pub const COMPRESSION_THRESHOLD: f64 = 0.8;

/// Compression drops turns until usage is at or below this share
pub const COMPRESSION_TARGET: f64 = 0.6;

pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

pub fn estimate_part_tokens(part: &Part) -> u64 {
    let text = part.text.as_deref().map(estimate_text_tokens).unwrap_or(0);
    let media = match &part.inline_data {
        Some(blob) if blob.mime_type.starts_with("audio/") => AUDIO_CHUNK_TOKENS,
        Some(_) => IMAGE_FRAME_TOKENS,
        None => 0,
    };
    text + media
}

pub fn estimate_content_tokens(content: &Content) -> u64 {
    content.parts.iter().map(estimate_part_tokens).sum()
}

pub fn estimate_chunk_tokens(chunk: &MediaChunk) -> u64 {
    match chunk.kind {
        MediaKind::Audio => AUDIO_CHUNK_TOKENS,
        MediaKind::Image => IMAGE_FRAME_TOKENS,
    }
}

/// Who produced a retained turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Model,
}

/// Bookkeeping for one turn; payloads are not kept, only their cost
#[derive(Debug, Clone, Serialize)]
pub struct RetainedTurn {
    pub role: TurnRole,
    pub tokens: u64,
    /// Closed turns never absorb further units
    pub complete: bool,
}

/// Running token estimate for the active session
#[derive(Debug, Clone, Serialize)]
pub struct ContextBudget {
    used: u64,
    max: u64,
    turns: Vec<RetainedTurn>,
}

impl ContextBudget {
    pub fn new(max: u64) -> Self {
        Self {
            used: 0,
            max,
            turns: Vec::new(),
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn turns(&self) -> &[RetainedTurn] {
        &self.turns
    }

    /// Start over for a new session with a new window size.
    pub fn reset(&mut self, max: u64) {
        self.used = 0;
        self.max = max;
        self.turns.clear();
    }

    /// Seed the reserved first turn with the system instruction.
    pub fn reserve_system(&mut self, tokens: u64) {
        self.turns.insert(
            0,
            RetainedTurn {
                role: TurnRole::System,
                tokens,
                complete: true,
            },
        );
        self.used += tokens;
    }

    /// Account for one content unit. Consecutive units from the same role
    /// accumulate into the open turn.
    pub fn record(&mut self, role: TurnRole, tokens: u64) {
        self.used += tokens;
        match self.turns.last_mut() {
            Some(last) if last.role == role && !last.complete => last.tokens += tokens,
            _ => self.turns.push(RetainedTurn {
                role,
                tokens,
                complete: false,
            }),
        }
    }

    /// Close the open turn so the next unit starts a new one.
    pub fn close_turn(&mut self) {
        if let Some(last) = self.turns.last_mut() {
            last.complete = true;
        }
    }

    pub fn needs_compression(&self) -> bool {
        self.used as f64 > COMPRESSION_THRESHOLD * self.max as f64
    }

    /// Drop the oldest turns after the reserved first one until usage is at
    /// or below the target. Returns the number of tokens removed.
    pub fn compress(&mut self) -> u64 {
        if !self.needs_compression() {
            return 0;
        }

        let target = (COMPRESSION_TARGET * self.max as f64) as u64;
        let mut removed = 0;
        let mut drop_count = 0;
        for turn in self.turns.iter().skip(1) {
            if self.used - removed <= target {
                break;
            }
            removed += turn.tokens;
            drop_count += 1;
        }

        if drop_count > 0 {
            self.turns.drain(1..1 + drop_count);
            self.used -= removed;
            debug!(
                "Compressed context: dropped {} turns ({} tokens), now {}/{}",
                drop_count, removed, self.used, self.max
            );
        }

        removed
    }
}
