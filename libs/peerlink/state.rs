//! Atomic connection state and metrics
//!
//! Lock-free snapshots of where the connection is in its
//! `closed → opening → opened → closing → closed` lifecycle, safe to read
//! from any task or thread.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Client connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Closed = 0,
    Opening = 1,
    Opened = 2,
    Closing = 3,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Opening,
            2 => LinkState::Opened,
            3 => LinkState::Closing,
            _ => LinkState::Closed,
        }
    }
}

/// Atomic cell holding a [`LinkState`]
pub struct AtomicLinkState(AtomicU8);

impl AtomicLinkState {
    pub fn new(state: LinkState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition only when the current state matches; the error carries
    /// the state that won the race
    pub fn compare_exchange(
        &self,
        current: LinkState,
        new: LinkState,
    ) -> Result<LinkState, LinkState> {
        self.0
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(LinkState::from_u8)
            .map_err(LinkState::from_u8)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.get() == LinkState::Closed
    }

    #[inline]
    pub fn is_opening(&self) -> bool {
        self.get() == LinkState::Opening
    }

    #[inline]
    pub fn is_opened(&self) -> bool {
        self.get() == LinkState::Opened
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.get() == LinkState::Closing
    }
}

/// Connection metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    pub connect_count: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnect_count: u64,
}

/// Lock-free metrics counters
#[derive(Default)]
pub struct AtomicLinkMetrics {
    connects: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
    reconnects: AtomicU64,
}

impl AtomicLinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_connects(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkMetrics {
        LinkMetrics {
            connect_count: self.connects.load(Ordering::Relaxed),
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_received: self.received.load(Ordering::Relaxed),
            reconnect_count: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
