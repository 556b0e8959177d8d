//! Connection state verification with debounce, sampling, and confirmation.
//!
//! Single-sample liveness reads on lossy serial and network endpoints are
//! noisy. A transition only commits after (1) a statistical sample of K reads
//! passes the mode-dependent acceptance rule and (2) the same raw verdict
//! repeats across a confirmation threshold of consecutive poll cycles. A
//! debounce window after each committed change suppresses re-verification
//! entirely.

use crate::adapter::DeviceAdapter;
use crate::config::VerifierConfig;
use dashmap::DashMap;
use gateway_types::{ConnectionState, Device, DeviceId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Committed state transition, sent to the adapter cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub device_id: DeviceId,
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[derive(Debug, Default)]
struct VerifyBook {
    /// Instant of the last committed transition
    last_change: Option<Instant>,
    /// Raw verdict awaiting confirmation
    pending: Option<ConnectionState>,
    confirmations: u32,
}

pub struct ConnectionStateVerifier {
    config: VerifierConfig,
    books: DashMap<DeviceId, VerifyBook>,
    events: mpsc::Sender<StateChangeEvent>,
}

impl ConnectionStateVerifier {
    pub fn new(config: VerifierConfig, events: mpsc::Sender<StateChangeEvent>) -> Self {
        Self {
            config,
            books: DashMap::new(),
            events,
        }
    }

    /// Whether the device is inside its post-transition debounce window.
    pub fn in_debounce(&self, device_id: &DeviceId) -> bool {
        self.books
            .get(device_id)
            .and_then(|book| book.last_change)
            .map(|at| at.elapsed() < Duration::from_millis(self.config.debounce_ms))
            .unwrap_or(false)
    }

    /// Apply the mode-dependent acceptance rule to one round of samples.
    ///
    /// Listener-mode devices: once connected, only a supermajority of misses
    /// declares disconnection; once disconnected, a single hit is enough.
    /// Client-mode devices need a supermajority either way.
    pub fn decide(
        &self,
        current: ConnectionState,
        listener: bool,
        hits: u32,
        misses: u32,
    ) -> ConnectionState {
        let total = hits + misses;
        let supermajority = self.config.supermajority_of(total);
        match (current, listener) {
            (ConnectionState::Connected, _) => {
                if misses >= supermajority {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Connected
                }
            }
            (_, true) => {
                if hits >= 1 {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                }
            }
            (_, false) => {
                if hits >= supermajority {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                }
            }
        }
    }

    /// Feed one raw verdict into the confirmation filter. Returns the new
    /// state once a transition commits.
    pub fn confirm(
        &self,
        device_id: &DeviceId,
        current: ConnectionState,
        verdict: ConnectionState,
    ) -> Option<ConnectionState> {
        let mut book = self.books.entry(device_id.clone()).or_default();

        if verdict == current {
            book.pending = None;
            book.confirmations = 0;
            return None;
        }

        if book.pending == Some(verdict) {
            book.confirmations += 1;
        } else {
            book.pending = Some(verdict);
            book.confirmations = 1;
        }
        debug!(
            device = %device_id,
            ?verdict,
            confirmations = book.confirmations,
            threshold = self.config.confirmation_threshold,
            "state verdict pending"
        );
        if book.confirmations < self.config.confirmation_threshold {
            return None;
        }

        book.pending = None;
        book.confirmations = 0;
        book.last_change = Some(Instant::now());
        drop(book);

        info!(device = %device_id, from = %current, to = %verdict, "connection state committed");
        let event = StateChangeEvent {
            device_id: device_id.clone(),
            from: current,
            to: verdict,
        };
        if self.events.try_send(event).is_err() {
            warn!(device = %device_id, "state-change channel full, event dropped");
        }
        Some(verdict)
    }

    /// Sample the adapter K times with short pauses.
    async fn sample(&self, adapter: &Arc<dyn DeviceAdapter>) -> (u32, u32) {
        let mut hits = 0;
        let mut misses = 0;
        for round in 0..self.config.samples {
            if adapter.is_connected().await {
                hits += 1;
            } else {
                misses += 1;
            }
            if round + 1 < self.config.samples {
                tokio::time::sleep(Duration::from_millis(self.config.sample_pause_ms)).await;
            }
        }
        (hits, misses)
    }

    /// One full verification round for a device. Returns the committed new
    /// state, if this round completed a transition.
    pub async fn verify(
        &self,
        device: &Device,
        adapter: &Arc<dyn DeviceAdapter>,
    ) -> Option<ConnectionState> {
        if self.in_debounce(&device.id) {
            debug!(device = %device.id, "inside debounce window, skipping verification");
            return None;
        }
        let (hits, misses) = self.sample(adapter).await;
        let verdict = self.decide(device.status, device.is_network_server(), hits, misses);
        self.confirm(&device.id, device.status, verdict)
    }

    /// Drop bookkeeping for a removed device.
    pub fn forget(&self, device_id: &DeviceId) {
        self.books.remove(device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> (ConnectionStateVerifier, mpsc::Receiver<StateChangeEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (ConnectionStateVerifier::new(VerifierConfig::default(), tx), rx)
    }

    #[test]
    fn client_mode_needs_supermajority_both_ways() {
        let (v, _rx) = verifier();
        // Disconnected, 2 of 3 hits: connected.
        assert_eq!(
            v.decide(ConnectionState::Disconnected, false, 2, 1),
            ConnectionState::Connected
        );
        // Disconnected, 1 of 3 hits: stays disconnected.
        assert_eq!(
            v.decide(ConnectionState::Disconnected, false, 1, 2),
            ConnectionState::Disconnected
        );
        // Connected, 2 of 3 misses: disconnected.
        assert_eq!(
            v.decide(ConnectionState::Connected, false, 1, 2),
            ConnectionState::Disconnected
        );
        // Connected, 1 of 3 misses: stays connected.
        assert_eq!(
            v.decide(ConnectionState::Connected, false, 2, 1),
            ConnectionState::Connected
        );
    }

    #[test]
    fn listener_mode_is_asymmetric() {
        let (v, _rx) = verifier();
        // Disconnected listener, single hit connects.
        assert_eq!(
            v.decide(ConnectionState::Disconnected, true, 1, 2),
            ConnectionState::Connected
        );
        // Connected listener survives a minority of misses.
        assert_eq!(
            v.decide(ConnectionState::Connected, true, 2, 1),
            ConnectionState::Connected
        );
        // Supermajority of misses disconnects even a listener.
        assert_eq!(
            v.decide(ConnectionState::Connected, true, 0, 3),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn error_state_follows_disconnected_rules() {
        let (v, _rx) = verifier();
        assert_eq!(
            v.decide(ConnectionState::Error, false, 3, 0),
            ConnectionState::Connected
        );
    }

    #[test]
    fn single_round_never_commits() {
        let (v, _rx) = verifier();
        let id = DeviceId::from("d1");
        assert_eq!(
            v.confirm(&id, ConnectionState::Disconnected, ConnectionState::Connected),
            None
        );
    }

    #[test]
    fn transition_commits_after_threshold_and_emits_event() {
        let (v, mut rx) = verifier();
        let id = DeviceId::from("d1");
        assert_eq!(
            v.confirm(&id, ConnectionState::Disconnected, ConnectionState::Connected),
            None
        );
        assert_eq!(
            v.confirm(&id, ConnectionState::Disconnected, ConnectionState::Connected),
            Some(ConnectionState::Connected)
        );
        let event = rx.try_recv().expect("event emitted");
        assert_eq!(event.from, ConnectionState::Disconnected);
        assert_eq!(event.to, ConnectionState::Connected);
    }

    #[test]
    fn flipping_verdict_resets_the_counter() {
        let (v, mut rx) = verifier();
        let id = DeviceId::from("d1");
        v.confirm(&id, ConnectionState::Disconnected, ConnectionState::Connected);
        // Agreeing verdict (same as committed state) resets everything.
        v.confirm(&id, ConnectionState::Disconnected, ConnectionState::Disconnected);
        // Needs the full threshold again.
        assert_eq!(
            v.confirm(&id, ConnectionState::Disconnected, ConnectionState::Connected),
            None
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn committed_change_opens_debounce_window() {
        let (v, _rx) = verifier();
        let id = DeviceId::from("d1");
        assert!(!v.in_debounce(&id));
        v.confirm(&id, ConnectionState::Disconnected, ConnectionState::Connected);
        v.confirm(&id, ConnectionState::Disconnected, ConnectionState::Connected);
        assert!(v.in_debounce(&id));
        v.forget(&id);
        assert!(!v.in_debounce(&id));
    }
}
