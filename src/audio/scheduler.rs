//! Gapless scheduling of inbound playback buffers
//!
//! Buffers arrive in small, irregular increments relative to the playback
//! clock. Starting each one "as soon as decoded" stutters; instead every
//! buffer is scheduled against a continuously advancing cursor so the
//! output reproduces one continuous stream as long as arrivals keep pace
//! with consumption.
//!
//! The scheduler is pure bookkeeping: it takes the playback clock's
//! current time as an argument and never touches audio hardware, so all
//! of its invariants are testable deterministically.

use std::collections::HashMap;

use super::codec::PlaybackBuffer;

/// A live playback handle bound to one scheduled buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    /// Identifier used to match completion and stop notifications
    pub id: u64,
    /// Start instant on the playback clock, in seconds
    pub start: f64,
    /// Buffer duration in seconds
    pub duration: f64,
}

/// Orders and times inbound buffers for gapless output
pub struct PlaybackScheduler {
    /// Projected next-free instant on the playback clock
    cursor: f64,
    /// Margin applied when re-anchoring after an underrun
    lookahead: f64,
    /// Currently scheduled sources, keyed by id
    sources: HashMap<u64, ScheduledSource>,
    next_id: u64,
}

impl PlaybackScheduler {
    /// Create a scheduler with the given lookahead margin in seconds
    #[must_use]
    pub fn new(lookahead: f64) -> Self {
        Self {
            cursor: 0.0,
            lookahead,
            sources: HashMap::new(),
            next_id: 0,
        }
    }

    /// Schedule a buffer against the cursor
    ///
    /// `now` is the playback clock's current time. If the cursor has
    /// fallen behind `now` (underrun: nothing queued through the present
    /// instant) it is re-anchored to `now + lookahead` before use. The
    /// buffer starts exactly at the cursor and the cursor advances by its
    /// duration.
    pub fn schedule(&mut self, buffer: &PlaybackBuffer, now: f64) -> ScheduledSource {
        if self.cursor < now {
            self.cursor = now + self.lookahead;
        }

        let source = ScheduledSource {
            id: self.next_id,
            start: self.cursor,
            duration: buffer.duration,
        };
        self.next_id += 1;
        self.cursor += buffer.duration;
        self.sources.insert(source.id, source);

        tracing::trace!(
            id = source.id,
            start = source.start,
            duration = source.duration,
            pending = self.sources.len(),
            "scheduled buffer"
        );

        source
    }

    /// Remove a source on its natural playback completion
    ///
    /// Returns false if the source was already removed (e.g. by an
    /// interruption racing the completion notification).
    pub fn complete(&mut self, id: u64) -> bool {
        self.sources.remove(&id).is_some()
    }

    /// Server-signaled interruption: discard everything still queued
    ///
    /// Clears the scheduled set and resets the cursor to `now` so
    /// subsequent buffers resume from the present instant. Returns the
    /// ids of the sources that must be forcibly stopped.
    pub fn interrupt(&mut self, now: f64) -> Vec<u64> {
        let stopped: Vec<u64> = self.sources.drain().map(|(id, _)| id).collect();
        self.cursor = now;

        tracing::debug!(discarded = stopped.len(), "interruption: cleared scheduled audio");
        stopped
    }

    /// Projected next-free instant on the playback clock
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of sources currently scheduled
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sources.len()
    }

    /// True when no decoded audio is pending playback
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.sources.is_empty()
    }
}
