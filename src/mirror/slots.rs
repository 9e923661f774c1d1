//! Fixed-capacity transaction log.
//!
//! Each slot holds one outstanding RMAP transaction.  The slot index is the
//! transaction id carried in the command and echoed in the reply, so matching
//! a reply to its transaction is a direct lookup.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use alloc::vec;
use alloc::vec::Vec;

use crate::{Error, Result};

/// Largest number of slots, bounded by the 16-bit transaction id
pub const MAX_SLOTS: usize = 1 << 16;

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Remote to local
    Read,
    /// Local to remote
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Submitted,
}

/// What an in-use slot remembers about its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub transfer: Transfer,
    pub remote_addr: u32,
    /// Where read data lands in the local shadow.  `None` for writes.
    pub local_addr: Option<u32>,
    pub len: usize,
}

/// Table of outstanding transactions.
///
/// `pending()` always equals the number of slots grabbed and not yet
/// released.
#[derive(Debug, Clone)]
pub struct TransactionLog {
    slots: Vec<Option<Transaction>>,
    pending: usize,
}

impl TransactionLog {
    /// Create a log with `capacity` slots, between 1 and [`MAX_SLOTS`].
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_SLOTS {
            warn!("Invalid transaction log capacity {capacity}");
            return Err(Error::InvalidConfig);
        }
        Ok(Self {
            slots: vec![None; capacity],
            pending: 0,
        })
    }

    /// Claim the lowest free slot for `txn`, returning its id.
    ///
    /// Linear scan.  Capacities are small enough for this not to matter.
    pub fn grab(&mut self, txn: Transaction) -> Result<u16> {
        let Some(id) = self.slots.iter().position(Option::is_none) else {
            debug!("Transaction log exhausted, {} pending", self.pending);
            return Err(Error::Exhausted);
        };
        self.slots[id] = Some(txn);
        self.pending += 1;
        trace!("Grabbed slot {id} for {txn:?}");
        // capacity is bounded by MAX_SLOTS
        Ok(id as u16)
    }

    /// Free slot `id`, returning what it held.  Releasing a free or
    /// out-of-range slot does nothing.
    pub fn release(&mut self, id: usize) -> Option<Transaction> {
        let txn = self.slots.get_mut(id)?.take()?;
        self.pending -= 1;
        trace!("Released slot {id}");
        Some(txn)
    }

    /// Free every slot, returning how many were in use.
    pub fn reset(&mut self) -> usize {
        let abandoned = self.pending;
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.pending = 0;
        abandoned
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn state(&self, id: usize) -> SlotState {
        match self.slot(id) {
            Some(_) => SlotState::Submitted,
            None => SlotState::Idle,
        }
    }

    /// The transaction held by slot `id`, if it is in use
    pub fn slot(&self, id: usize) -> Option<&Transaction> {
        self.slots.get(id)?.as_ref()
    }

    /// In-use slots and their transactions, in id order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Transaction)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|txn| (id as u16, txn)))
    }
}
