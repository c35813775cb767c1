//! Per-speaker rolling PCM buffer with an absolute-time offset clock (§3, §4.3).
//!
//! The buffer keeps at most [`MAX_RETAINED_SECS`] of audio. Once that's
//! exceeded the oldest [`TRUNCATE_SECS`] are dropped and `frames_offset`
//! advances by the same amount, so every sample's true position in the
//! speaker's stream is always `frames_offset + index / SAMPLE_RATE`.
//! `timestamp_offset` tracks how far the ASR driver has already consumed.

use std::sync::Mutex;

use streamcast_protocol::SAMPLE_RATE;
use tokio::sync::Notify;

const MAX_RETAINED_SECS: f64 = 60.0;
const TRUNCATE_SECS: f64 = 30.0;
const STALE_TAIL_SECS: f64 = 25.0;
const STALE_CLIP_MARGIN_SECS: f64 = 5.0;

struct Inner {
    samples: Vec<f32>,
    frames_offset: f64,
    timestamp_offset: f64,
}

pub struct AudioBuffer {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl AudioBuffer {
    pub fn new() -> Self {
        AudioBuffer {
            inner: Mutex::new(Inner {
                samples: Vec::new(),
                frames_offset: 0.0,
                timestamp_offset: 0.0,
            }),
            notify: Notify::new(),
        }
    }

    /// Append newly-received PCM, truncating the head if the retained
    /// window would exceed [`MAX_RETAINED_SECS`].
    pub fn append(&self, samples: &[f32]) {
        let mut inner = self.inner.lock().unwrap();
        let rate = SAMPLE_RATE as f64;
        if inner.samples.len() as f64 / rate > MAX_RETAINED_SECS {
            let drop_n = (TRUNCATE_SECS * rate) as usize;
            let drop_n = drop_n.min(inner.samples.len());
            inner.samples.drain(0..drop_n);
            inner.frames_offset += TRUNCATE_SECS;
            if inner.timestamp_offset < inner.frames_offset {
                inner.timestamp_offset = inner.frames_offset;
            }
        }
        inner.samples.extend_from_slice(samples);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Copy of the unread tail (from `timestamp_offset` onward) plus its
    /// duration in seconds.
    pub fn next_chunk(&self) -> (Vec<f32>, f64) {
        let inner = self.inner.lock().unwrap();
        let rate = SAMPLE_RATE as f64;
        let read_idx = ((inner.timestamp_offset - inner.frames_offset) * rate).max(0.0) as usize;
        let read_idx = read_idx.min(inner.samples.len());
        let tail = inner.samples[read_idx..].to_vec();
        let duration = tail.len() as f64 / rate;
        (tail, duration)
    }

    /// If the unread tail has grown past [`STALE_TAIL_SECS`] with no
    /// progress (no valid segment being committed), jump the read cursor
    /// forward so the driver doesn't fall permanently behind (§4.3).
    pub fn clip_if_stale(&self) {
        let mut inner = self.inner.lock().unwrap();
        let rate = SAMPLE_RATE as f64;
        let tail_secs =
            inner.samples.len() as f64 / rate - (inner.timestamp_offset - inner.frames_offset);
        if tail_secs > STALE_TAIL_SECS {
            let duration = inner.samples.len() as f64 / rate;
            inner.timestamp_offset = inner.frames_offset + duration - STALE_CLIP_MARGIN_SECS;
        }
    }

    pub fn advance_timestamp(&self, delta: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.timestamp_offset += delta;
    }

    pub fn frames_offset(&self) -> f64 {
        self.inner.lock().unwrap().frames_offset
    }

    pub fn timestamp_offset(&self) -> f64 {
        self.inner.lock().unwrap().timestamp_offset
    }

    pub fn is_caught_up(&self) -> bool {
        let (chunk, _) = self.next_chunk();
        chunk.is_empty()
    }

    /// Wait until there's unread audio to process, or the timeout elapses.
    /// 100ms polling is an acceptable implementation of this wait (§4.4).
    pub async fn wait_for_data(&self, poll_interval: std::time::Duration) {
        loop {
            if !self.is_caught_up() {
                return;
            }
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => return,
                _ = tokio::time::sleep(poll_interval) => {
                    if !self.is_caught_up() {
                        return;
                    }
                }
            }
        }
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_after_sixty_seconds_and_advances_offsets() {
        let buf = AudioBuffer::new();
        let rate = SAMPLE_RATE as usize;
        buf.append(&vec![0.0f32; rate * 61]);
        assert_eq!(buf.frames_offset(), 30.0);
        let (chunk, duration) = buf.next_chunk();
        assert!((duration - 31.0).abs() < 0.01, "got {duration}");
        assert_eq!(chunk.len(), rate * 31);
    }

    #[test]
    fn next_chunk_respects_timestamp_offset() {
        let buf = AudioBuffer::new();
        let rate = SAMPLE_RATE as usize;
        buf.append(&vec![0.0f32; rate * 2]);
        buf.advance_timestamp(1.0);
        let (chunk, duration) = buf.next_chunk();
        assert_eq!(chunk.len(), rate);
        assert!((duration - 1.0).abs() < 0.01);
    }

    #[test]
    fn clip_if_stale_jumps_cursor_forward() {
        let buf = AudioBuffer::new();
        let rate = SAMPLE_RATE as usize;
        buf.append(&vec![0.0f32; rate * 26]);
        buf.clip_if_stale();
        let ts = buf.timestamp_offset();
        assert!((ts - 21.0).abs() < 0.01, "got {ts}");
    }
}
