//! Remote mirror manager.
//!
//! [`RemoteMirror`] keeps a local shadow of remote memory and moves data
//! between the two with RMAP transactions.  Submitting never waits: a
//! command is queued on the [`Link`] and a slot in the [`TransactionLog`]
//! records what to do with the reply.  [`RemoteMirror::drain_replies()`]
//! completes transactions whose replies have arrived, and
//! [`RemoteMirror::pending_count()`] reports how many are still in flight.
//!
//! ```rust,ignore
//! let mut mirror = RemoteMirror::new(link, shadow, LinkConfig::default())?;
//! mirror.submit_read(0x1000, SHADOW_BASE, 4)?;
//! while mirror.pending_count()? > 0 {
//!     // Bounded by the caller
//! }
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use alloc::vec;
use alloc::vec::Vec;

pub mod slots;

pub use slots::{MAX_SLOTS, SlotState, Transaction, TransactionLog, Transfer};

use crate::io::MemoryIo;
use crate::link::Link;
use crate::rmap::{CommandCode, MAX_DATA_LEN, RmapPacket};
use crate::{Error, Result};

const WRITE_CODE: CommandCode = CommandCode::WriteIncrementingReply;
const READ_CODE: CommandCode = CommandCode::ReadIncrementing;

/// Addressing and sizing for the link to one remote target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Logical address of the remote target
    pub target: u8,
    /// Our own logical address, used by the target to address replies
    pub initiator: u8,
    /// Destination key expected by the target
    pub key: u8,
    /// SpaceWire path to the target.  Empty for logical addressing.
    pub dest_path: Vec<u8>,
    /// Path the target uses to reach us, a multiple of 4 bytes with leading
    /// zero padding.  Empty for logical addressing.
    pub reply_path: Vec<u8>,
    /// Number of transactions that may be outstanding at once
    pub slots: usize,
    /// Largest payload of a single transaction.  Longer transfers are split
    /// by [`RemoteMirror::sync_to_remote()`] and
    /// [`RemoteMirror::sync_from_remote()`].
    pub max_payload: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target: 0xFE,
            initiator: 0xFE,
            key: 0,
            dest_path: Vec::new(),
            reply_path: Vec::new(),
            slots: 8,
            max_payload: 4096,
        }
    }
}

impl LinkConfig {
    /// Check the configuration against what `link` can carry.
    pub fn validate<L: Link>(&self, link: &L) -> Result<()> {
        if self.slots == 0 || self.slots > MAX_SLOTS || self.slots > link.tx_capacity() {
            warn!(
                "{} slots invalid for link with {} TX descriptors",
                self.slots,
                link.tx_capacity()
            );
            return Err(Error::InvalidConfig);
        }

        if self.max_payload == 0
            || self.max_payload > MAX_DATA_LEN as usize
            || self.max_payload > link.max_data_len()
        {
            warn!("Maximum payload {} invalid", self.max_payload);
            return Err(Error::InvalidConfig);
        }

        // The largest header this configuration produces is a command
        let mut largest = RmapPacket::command(WRITE_CODE);
        largest
            .set_path(&self.dest_path)?
            .set_reply_path(&self.reply_path)?;
        if largest.header_size() > link.max_header_len() {
            warn!(
                "Command header of {} bytes exceeds link limit {}",
                largest.header_size(),
                link.max_header_len()
            );
            return Err(Error::InvalidConfig);
        }

        Ok(())
    }
}

/// Counters kept by [`RemoteMirror`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MirrorStats {
    /// Commands handed to the link
    pub submitted: u64,
    /// Transactions completed by a matching reply, including failures
    pub completed: u64,
    /// Completed transactions whose reply carried a non-zero status
    pub failed: u64,
    /// Outstanding transactions dropped by [`RemoteMirror::reset()`]
    pub abandoned: u64,
    /// Well-formed packets that did not match an outstanding transaction
    pub unmatched: u64,
    /// Packets that failed to parse
    pub malformed: u64,
}

/// Local shadow of a remote target's memory, kept in step over RMAP.
pub struct RemoteMirror<L: Link, M: MemoryIo> {
    cfg: LinkConfig,
    link: L,
    shadow: M,
    log: TransactionLog,
    stats: MirrorStats,
}

impl<L: Link, M: MemoryIo> RemoteMirror<L, M> {
    pub fn new(link: L, shadow: M, cfg: LinkConfig) -> Result<Self> {
        cfg.validate(&link)?;
        let log = TransactionLog::new(cfg.slots)?;

        debug!(
            "Created remote mirror for target {:#04x}, {} slots",
            cfg.target, cfg.slots
        );

        Ok(Self {
            cfg,
            link,
            shadow,
            log,
            stats: MirrorStats::default(),
        })
    }

    /// Write `data` to the target at `remote_addr`, returning the
    /// transaction id.
    ///
    /// If the link refuses the command the slot stays claimed and the error
    /// is returned.  Use [`Self::release_slot()`] or [`Self::reset()`] to
    /// give it up.
    pub fn submit_write(&mut self, remote_addr: u32, data: &[u8]) -> Result<u16> {
        self.check_payload(data.len())?;
        check_span(remote_addr, data.len())?;

        let txn = Transaction {
            transfer: Transfer::Write,
            remote_addr,
            local_addr: None,
            len: data.len(),
        };
        self.submit(txn, |pkt| pkt.set_data(data).map(|_| ()))
    }

    /// Read `len` bytes from the target at `remote_addr` into the shadow at
    /// `local_addr`, returning the transaction id.  The shadow is only
    /// updated once the reply is drained.
    ///
    /// Link failures leave the slot claimed, as for [`Self::submit_write()`].
    pub fn submit_read(&mut self, remote_addr: u32, local_addr: u32, len: usize) -> Result<u16> {
        self.check_payload(len)?;
        check_span(remote_addr, len)?;
        self.shadow.check_range(local_addr, len)?;

        let txn = Transaction {
            transfer: Transfer::Read,
            remote_addr,
            local_addr: Some(local_addr),
            len,
        };
        self.submit(txn, |pkt| pkt.set_data_len(len as u32).map(|_| ()))
    }

    /// Push `len` bytes of the shadow at `local_addr` to `remote_addr`,
    /// split into transactions of at most `max_payload` bytes.  Returns the
    /// number of transactions submitted.
    ///
    /// Both ranges are checked before anything is submitted.  If a later
    /// transaction fails, for example with [`Error::Exhausted`], the error is
    /// returned and the transactions already submitted stay outstanding.
    /// They complete as normal and are counted by [`Self::pending()`].
    pub fn sync_to_remote(&mut self, local_addr: u32, remote_addr: u32, len: usize) -> Result<usize> {
        check_span(remote_addr, len)?;
        check_span(local_addr, len)?;
        self.shadow.check_range(local_addr, len)?;

        let mut buf = vec![0u8; len.min(self.cfg.max_payload)];
        let mut submitted = 0;
        for offset in (0..len).step_by(self.cfg.max_payload) {
            let size = (len - offset).min(self.cfg.max_payload);
            let chunk = &mut buf[..size];
            self.shadow.read_bytes(local_addr + offset as u32, chunk)?;
            self.submit_write(remote_addr + offset as u32, chunk)?;
            submitted += 1;
        }

        debug!("Submitted {submitted} writes for {len} bytes to {remote_addr:#010x}");
        Ok(submitted)
    }

    /// Pull `len` bytes from `remote_addr` into the shadow at `local_addr`,
    /// split into transactions of at most `max_payload` bytes.  Returns the
    /// number of transactions submitted.
    ///
    /// Partial failures behave as for [`Self::sync_to_remote()`].
    pub fn sync_from_remote(&mut self, remote_addr: u32, local_addr: u32, len: usize) -> Result<usize> {
        check_span(remote_addr, len)?;
        check_span(local_addr, len)?;
        self.shadow.check_range(local_addr, len)?;

        let mut submitted = 0;
        for offset in (0..len).step_by(self.cfg.max_payload) {
            let size = (len - offset).min(self.cfg.max_payload);
            self.submit_read(
                remote_addr + offset as u32,
                local_addr + offset as u32,
                size,
            )?;
            submitted += 1;
        }

        debug!("Submitted {submitted} reads for {len} bytes from {remote_addr:#010x}");
        Ok(submitted)
    }

    /// Process every packet the link has received, returning how many were
    /// consumed.  Never waits.
    ///
    /// Replies release their slot, and read data is copied into the shadow.
    /// Packets that fail to parse or match no outstanding transaction are
    /// logged and dropped without touching any slot.
    pub fn drain_replies(&mut self) -> Result<usize> {
        let mut consumed = 0;
        loop {
            let size = self.link.receive(None)?;
            if size == 0 {
                break;
            }

            let mut buf = vec![0u8; size];
            let len = self.link.receive(Some(&mut buf))?;
            if len == 0 {
                break;
            }
            buf.truncate(len);
            consumed += 1;

            match RmapPacket::parse(&buf) {
                Ok(pkt) => self.complete(&pkt),
                Err(e) => {
                    warn!("Dropping malformed packet of {len} bytes: {e}");
                    self.stats.malformed += 1;
                }
            }
        }

        if consumed > 0 {
            trace!("Drained {consumed} packets, {} pending", self.log.pending());
        }
        Ok(consumed)
    }

    /// Drain replies, then return the number of outstanding transactions.
    pub fn pending_count(&mut self) -> Result<usize> {
        self.drain_replies()?;
        Ok(self.log.pending())
    }

    /// Outstanding transactions, without draining
    pub fn pending(&self) -> usize {
        self.log.pending()
    }

    /// Give up on transaction `id` without waiting for its reply.  A reply
    /// arriving later is treated as unmatched.  Does nothing if the slot is
    /// not in use.
    pub fn release_slot(&mut self, id: usize) {
        if self.log.release(id).is_some() {
            debug!("Transaction {id} cancelled");
        }
    }

    /// Abandon every outstanding transaction, returning how many there were.
    pub fn reset(&mut self) -> usize {
        let abandoned = self.log.reset();
        if abandoned > 0 {
            warn!("Abandoned {abandoned} outstanding transactions");
        }
        self.stats.abandoned += abandoned as u64;
        abandoned
    }

    pub fn config(&self) -> &LinkConfig {
        &self.cfg
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn stats(&self) -> MirrorStats {
        self.stats
    }

    pub fn shadow(&self) -> &M {
        &self.shadow
    }

    pub fn shadow_mut(&mut self) -> &mut M {
        &mut self.shadow
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn check_payload(&self, len: usize) -> Result<()> {
        if len > self.cfg.max_payload {
            debug!("Payload of {len} bytes exceeds {}", self.cfg.max_payload);
            return Err(Error::PayloadTooLarge);
        }
        Ok(())
    }

    // Claim a slot, build the command for it and hand it to the link
    fn submit<F>(&mut self, txn: Transaction, fill: F) -> Result<u16>
    where
        F: FnOnce(&mut RmapPacket) -> Result<()>,
    {
        let code = match txn.transfer {
            Transfer::Read => READ_CODE,
            Transfer::Write => WRITE_CODE,
        };

        let tr_id = self.log.grab(txn)?;

        let built = self
            .command(code, tr_id, txn.remote_addr)
            .and_then(|mut pkt| fill(&mut pkt).map(|_| pkt));
        let pkt = match built {
            Ok(pkt) => pkt,
            Err(e) => {
                // Nothing was sent
                self.log.release(tr_id as usize);
                return Err(e);
            }
        };

        let header = pkt.header_bytes();
        if let Err(e) = self.link.send(&header, pkt.path().len(), pkt.data()) {
            warn!("Failed to send transaction {tr_id}: {e}");
            return Err(e);
        }

        self.stats.submitted += 1;
        trace!(
            "Submitted {:?} of {} bytes at {:#010x} as transaction {tr_id}",
            txn.transfer, txn.len, txn.remote_addr
        );
        Ok(tr_id)
    }

    fn command(&self, code: CommandCode, tr_id: u16, remote_addr: u32) -> Result<RmapPacket> {
        let mut pkt = RmapPacket::command(code);
        pkt.set_dst(self.cfg.target)
            .set_src(self.cfg.initiator)
            .set_key(self.cfg.key)
            .set_tr_id(tr_id)
            .set_addr(remote_addr);
        pkt.set_path(&self.cfg.dest_path)?
            .set_reply_path(&self.cfg.reply_path)?;
        Ok(pkt)
    }

    // Match a parsed packet to its transaction and complete it
    fn complete(&mut self, reply: &RmapPacket) {
        if reply.is_command() {
            warn!("Dropping RMAP command from {:#04x}", reply.src());
            self.stats.unmatched += 1;
            return;
        }

        let id = reply.tr_id() as usize;
        let Some(txn) = self.log.slot(id).copied() else {
            warn!("Dropping reply for transaction {id}, not outstanding");
            self.stats.unmatched += 1;
            return;
        };

        let is_write = reply.instruction().is_write();
        if is_write != (txn.transfer == Transfer::Write) {
            warn!(
                "Dropping reply for transaction {id}, code {:?} does not match {:?}",
                reply.instruction().code(),
                txn.transfer
            );
            self.stats.unmatched += 1;
            return;
        }

        if reply.status() != 0 {
            warn!(
                "Transaction {id} at {:#010x} failed, status {:#04x}",
                txn.remote_addr,
                reply.status()
            );
            self.stats.failed += 1;
        } else if let Some(local_addr) = txn.local_addr {
            let data = reply.data();
            if data.len() != txn.len {
                warn!(
                    "Transaction {id} returned {} bytes, expected {}",
                    data.len(),
                    txn.len
                );
            }
            let len = data.len().min(txn.len);
            if let Err(e) = self.shadow.write_bytes(local_addr, &data[..len]) {
                error!("Failed to update shadow at {local_addr:#010x}: {e}");
            }
        }

        self.log.release(id);
        self.stats.completed += 1;
    }
}

// Range of `len` bytes at `addr` must not run past the end of the 32-bit
// address space
fn check_span(addr: u32, len: usize) -> Result<()> {
    let Some(last) = len.checked_sub(1) else {
        return Ok(());
    };
    u32::try_from(last)
        .ok()
        .and_then(|last| addr.checked_add(last))
        .map(|_| ())
        .ok_or(Error::OutOfBounds { addr, len })
}
