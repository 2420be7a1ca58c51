//! Client-side transaction engine: correlation, retransmission, timeout.
//!
//! Sans-IO. The caller owns the socket and drives the engine with
//! `handle_timeout` / `poll_transmit` / `poll_timeout` / `handle_receive`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::message::{StunMessage, TransId};
use crate::mux::is_stun;

/// Retransmission schedule for request transactions.
///
/// The gap after each send doubles from `initial_rto`; after the last of
/// `retries` sends the engine waits `last_wait_factor * initial_rto` before
/// giving up. The defaults total 39.5 s.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    pub initial_rto: Duration,
    /// Total number of transmissions, the initial send included.
    pub retries: usize,
    /// Wait after the final transmission, as a multiple of `initial_rto`.
    pub last_wait_factor: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            initial_rto: Duration::from_millis(500),
            retries: 7,
            last_wait_factor: 16,
        }
    }
}

impl TransactionConfig {
    /// The gap following the `send_count`:th transmission.
    pub fn resend_delay(&self, send_count: usize) -> Duration {
        if send_count == 0 {
            return Duration::ZERO;
        }
        if send_count >= self.retries {
            return self.initial_rto * self.last_wait_factor;
        }
        let exp = (send_count - 1).min(16) as u32;
        self.initial_rto * (1_u32 << exp)
    }

    /// Total time from first send until the transaction is abandoned.
    pub fn timeout_total(&self) -> Duration {
        (0..=self.retries).map(|n| self.resend_delay(n)).sum()
    }
}

/// An outgoing datagram the caller should put on the wire.
#[derive(Debug)]
pub struct Transmit {
    pub destination: SocketAddr,
    pub contents: Vec<u8>,
}

/// Engine events ready to be polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    /// The retransmission schedule for this transaction is exhausted.
    TimedOut(TransId),
}

#[derive(Debug)]
struct Pending {
    trans_id: TransId,
    destination: SocketAddr,
    packet: Vec<u8>,
    /// Transmissions so far.
    sends: usize,
    next_deadline: Instant,
}

/// Correlates requests with responses and drives retransmission.
#[derive(Debug, Default)]
pub struct Transactions {
    config: TransactionConfig,
    pending: Vec<Pending>,
    transmits: VecDeque<Transmit>,
    events: VecDeque<TransactionEvent>,
}

impl Transactions {
    pub fn new(config: TransactionConfig) -> Self {
        Transactions {
            config,
            pending: Vec::new(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Register a request and queue its first transmission.
    pub fn begin(
        &mut self,
        now: Instant,
        destination: SocketAddr,
        packet: Vec<u8>,
        trans_id: TransId,
    ) {
        debug!("Begin transaction {:?} -> {}", trans_id, destination);

        self.transmits.push_back(Transmit {
            destination,
            contents: packet.clone(),
        });
        self.pending.push(Pending {
            trans_id,
            destination,
            packet,
            sends: 1,
            next_deadline: now + self.config.resend_delay(1),
        });
    }

    pub fn is_pending(&self, trans_id: TransId) -> bool {
        self.pending.iter().any(|p| p.trans_id == trans_id)
    }

    /// Discard a pending transaction. Any late response for it will be
    /// dropped like other unsolicited traffic.
    pub fn cancel(&mut self, trans_id: TransId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.trans_id != trans_id);
        let removed = self.pending.len() != before;
        if removed {
            trace!("Cancelled transaction {:?}", trans_id);
        }
        removed
    }

    /// Queue retransmissions and expire transactions whose schedule ran out.
    pub fn handle_timeout(&mut self, now: Instant) {
        let config = &self.config;
        let transmits = &mut self.transmits;
        let events = &mut self.events;

        self.pending.retain_mut(|p| {
            while p.next_deadline <= now {
                if p.sends >= config.retries {
                    debug!("Transaction {:?} timed out", p.trans_id);
                    events.push_back(TransactionEvent::TimedOut(p.trans_id));
                    return false;
                }
                p.sends += 1;
                trace!("Retransmit {}/{} for {:?}", p.sends, config.retries, p.trans_id);
                transmits.push_back(Transmit {
                    destination: p.destination,
                    contents: p.packet.clone(),
                });
                p.next_deadline += config.resend_delay(p.sends);
            }
            true
        });
    }

    /// The next point in time `handle_timeout` needs to run.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.next_deadline).min()
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<TransactionEvent> {
        self.events.pop_front()
    }

    /// Feed an inbound datagram. Returns the transaction id when it resolves
    /// a pending transaction; that transaction is then forgotten, so at most
    /// one response per transaction is ever reported.
    pub fn handle_receive(
        &mut self,
        _now: Instant,
        source: SocketAddr,
        buf: &[u8],
    ) -> Option<TransId> {
        if !is_stun(buf, false) {
            trace!("Ignoring non-STUN datagram from {}", source);
            return None;
        }

        let message = match StunMessage::parse(buf) {
            Ok(v) => v,
            Err(e) => {
                debug!("Ignoring unparseable STUN from {}: {}", source, e);
                return None;
            }
        };

        if !message.class().is_response() {
            trace!("Ignoring non-response {:?} from {}", message.class(), source);
            return None;
        }

        let trans_id = message.trans_id();
        let idx = self.pending.iter().position(|p| p.trans_id == trans_id)?;

        let p = self.pending.remove(idx);
        debug!(
            "Transaction {:?} resolved by {:?} from {}",
            p.trans_id,
            message.class(),
            source
        );
        Some(p.trans_id)
    }
}
