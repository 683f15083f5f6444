//! Input replay recording: a bounded event buffer persisted (format v8+)
//! with a SHA-256 trailer that must verify on load.

use sha2::{Digest, Sha256};

pub const REPLAY_EVENT_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayEvent {
    pub frame: u32,
    pub action_code: u32,
    pub value: i32,
}

#[derive(Debug, Default)]
pub struct ReplayBuffer {
    events: Vec<ReplayEvent>,
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Record one input event; silently dropped past the cap.
    pub fn record_input(&mut self, frame: u32, action_code: u32, value: i32) -> bool {
        if self.events.len() >= REPLAY_EVENT_CAP {
            return false;
        }
        self.events.push(ReplayEvent {
            frame,
            action_code,
            value,
        });
        true
    }

    pub fn events(&self) -> &[ReplayEvent] {
        &self.events
    }

    pub(crate) fn install(&mut self, events: Vec<ReplayEvent>) {
        self.events = events;
    }

    /// Canonical little-endian byte image of the event list.
    pub fn event_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.events.len() * 12);
        for e in &self.events {
            out.extend_from_slice(&e.frame.to_le_bytes());
            out.extend_from_slice(&e.action_code.to_le_bytes());
            out.extend_from_slice(&e.value.to_le_bytes());
        }
        out
    }

    /// SHA-256 over the canonical event bytes.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.event_bytes());
        hasher.finalize().into()
    }

    pub fn hash_hex(&self) -> String {
        self.hash().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_tracks_content() {
        let mut a = ReplayBuffer::new();
        a.record_input(1, 10, 0);
        a.record_input(2, 11, -1);
        let mut b = ReplayBuffer::new();
        b.record_input(1, 10, 0);
        b.record_input(2, 11, -1);
        assert_eq!(a.hash(), b.hash());
        b.record_input(3, 12, 5);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn cap_is_enforced() {
        let mut buf = ReplayBuffer::new();
        for i in 0..REPLAY_EVENT_CAP {
            assert!(buf.record_input(i as u32, 0, 0));
        }
        assert!(!buf.record_input(0, 0, 0));
        assert_eq!(buf.len(), REPLAY_EVENT_CAP);
    }

    #[test]
    fn hash_hex_is_64_chars() {
        let buf = ReplayBuffer::new();
        assert_eq!(buf.hash_hex().len(), 64);
    }
}
