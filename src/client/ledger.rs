//! In-flight QoS 1 publishes awaiting PUBACK
//!
//! Entries are scoped to one connection: the client clears the ledger on every
//! teardown and never re-sends on its own. Redelivery after a reconnect is the
//! broker's job under the QoS 1 contract.

use crate::error::LedgerError;
use crate::protocol::Publish;
use std::collections::HashMap;
use tokio::time::Instant;

/// One outstanding acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAck {
    pub packet_id: u16,
    pub message: Publish,
    pub created_at: Instant,
}

/// Packet id allocator and pending-acknowledgment table
#[derive(Debug)]
pub struct AckLedger {
    entries: HashMap<u16, PendingAck>,
    next_id: u16,
}

impl Default for AckLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AckLedger {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Next free packet id
    ///
    /// Ids increase monotonically and wrap from 65535 back to 1, skipping any
    /// id that is still in flight.
    pub fn allocate_id(&mut self) -> Result<u16, LedgerError> {
        if self.entries.len() >= usize::from(u16::MAX) {
            return Err(LedgerError::Exhausted);
        }

        loop {
            let candidate = self.next_id;
            self.next_id = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Record `message` as awaiting acknowledgment under `packet_id`
    pub fn track(&mut self, packet_id: u16, message: Publish) -> Result<(), LedgerError> {
        if packet_id == 0 {
            return Err(LedgerError::ZeroIdentifier);
        }
        if self.entries.contains_key(&packet_id) {
            return Err(LedgerError::DuplicateIdentifier(packet_id));
        }

        self.entries.insert(
            packet_id,
            PendingAck {
                packet_id,
                message,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Remove and return the entry for `packet_id`
    ///
    /// `None` means the broker acknowledged something this connection never
    /// sent, which the caller treats as a protocol violation.
    pub fn resolve(&mut self, packet_id: u16) -> Option<PendingAck> {
        self.entries.remove(&packet_id)
    }

    /// Drop every entry, returning how many were pending
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.entries.contains_key(&packet_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids currently in flight, ascending
    pub fn pending_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
