//! Frame windower
//!
//! Per-session FIFO accumulating frames into chunks. Once the window holds
//! `chunk_size` frames it is offered to the heavy pipeline on every push. If
//! the gate stays busy the window keeps growing until it exceeds the overflow
//! limit, at which point the whole window is discarded. Discarding bounds
//! memory; the sender is never back-pressured.

use super::Frame;
use tracing::{debug, warn};

/// Outcome of a deferred hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOffer {
    /// Gate busy, frames kept for the next offer
    Retained { len: usize },
    /// Gate busy and the window overflowed; all frames discarded
    Dropped { len: usize },
}

#[derive(Debug)]
pub struct FrameWindow {
    frames: Vec<Frame>,
    chunk_size: usize,
    overflow_limit: usize,
    dropped_windows: u64,
}

impl FrameWindow {
    pub fn new(chunk_size: usize, overflow_limit: usize) -> Self {
        Self {
            frames: Vec::with_capacity(chunk_size),
            chunk_size,
            overflow_limit: overflow_limit.max(chunk_size),
            dropped_windows: 0,
        }
    }

    /// Append a frame; returns true when the window is ready for hand-off
    pub fn push(&mut self, frame: Frame) -> bool {
        self.frames.push(frame);
        self.is_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.frames.len() >= self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Hand the whole window off in arrival order and clear it
    pub fn take_chunk(&mut self) -> Vec<Frame> {
        let chunk = std::mem::replace(&mut self.frames, Vec::with_capacity(self.chunk_size));
        debug!("Window handed off {} frames", chunk.len());
        chunk
    }

    /// The gate was busy: keep the window, or drop it once past the limit
    pub fn defer(&mut self) -> WindowOffer {
        let len = self.frames.len();
        if len > self.overflow_limit {
            self.frames.clear();
            self.dropped_windows += 1;
            warn!(
                "Heavy pipeline busy, discarded window of {} frames (limit {})",
                len, self.overflow_limit
            );
            WindowOffer::Dropped { len }
        } else {
            WindowOffer::Retained { len }
        }
    }

    /// Number of windows discarded by the overflow policy
    pub fn dropped_windows(&self) -> u64 {
        self.dropped_windows
    }
}
