//! Transport boundary between the RMAP layer and a SpaceWire link.
//!
//! [`Link`] is what the mirror needs from a link: queue a packet, and
//! collect received packets without blocking.  [`DescriptorLink`]
//! implements it on top of a pair of descriptor rings.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::MemoryIo;
use crate::ring::{DmaControl, RingStats, RxConfig, RxRing, TxConfig, TxRing};
use crate::{Error, Result};

/// Non-blocking packet link.
pub trait Link {
    /// Queue a packet for transmission.
    ///
    /// The header CRC is appended by the link, computed over `header`
    /// excluding its first `non_crc_len` bytes.  If `data` is not empty it
    /// follows the header CRC, with its own CRC appended.
    ///
    /// Returns [`Error::NoDescriptorAvailable`] if the link cannot accept
    /// the packet now.  The caller keeps ownership of its data and may retry.
    fn send(&mut self, header: &[u8], non_crc_len: usize, data: &[u8]) -> Result<()>;

    /// Collect a received packet.
    ///
    /// With `None`, returns the size of the next pending packet without
    /// consuming it.  With a buffer, copies the next packet into it and
    /// returns its size.  Returns 0 if nothing is pending.  Empty packets
    /// are discarded and never reported.
    fn receive(&mut self, buf: Option<&mut [u8]>) -> Result<usize>;

    /// Maximum number of packets that can be queued for transmission at once
    fn tx_capacity(&self) -> usize;

    /// Largest header accepted by [`Self::send()`]
    fn max_header_len(&self) -> usize {
        usize::MAX
    }

    /// Largest payload accepted by [`Self::send()`]
    fn max_data_len(&self) -> usize {
        usize::MAX
    }
}

/// [`Link`] backed by a TX and an RX descriptor ring in memory reached
/// through `I`, with `C` used to nudge the link controller.
pub struct DescriptorLink<I: MemoryIo, C: DmaControl> {
    io: I,
    dma: C,
    tx: TxRing,
    rx: RxRing,
}

impl<I: MemoryIo, C: DmaControl> DescriptorLink<I, C> {
    /// Build both descriptor tables and arm every RX descriptor.
    pub fn new(mut io: I, mut dma: C, tx_cfg: TxConfig, rx_cfg: RxConfig) -> Result<Self> {
        let tx = TxRing::new(&mut io, tx_cfg)?;
        let mut rx = RxRing::new(&mut io, rx_cfg)?;
        rx.arm(&mut io, &mut dma)?;

        debug!(
            "Created descriptor link, {} TX and {} RX descriptors",
            tx.capacity(),
            rx.capacity()
        );

        Ok(Self { io, dma, tx, rx })
    }

    /// Reclaim completed TX descriptors, as an interrupt handler would.
    pub fn reclaim_tx(&mut self) -> Result<usize> {
        self.tx.reclaim(&mut self.io)
    }

    /// Discard the next received packet, if any.
    pub fn drop_rx(&mut self) -> Result<bool> {
        self.rx.drop_packet(&mut self.io, &mut self.dma)
    }

    pub fn tx(&self) -> &TxRing {
        &self.tx
    }

    pub fn rx(&self) -> &RxRing {
        &self.rx
    }

    pub fn tx_stats(&self) -> RingStats {
        self.tx.stats()
    }

    pub fn rx_stats(&self) -> RingStats {
        self.rx.stats()
    }

    /// Access the shared memory directly
    pub fn io(&self) -> &I {
        &self.io
    }

    /// Mutable access to the shared memory, for example to simulate the
    /// hardware side
    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    pub fn dma_mut(&mut self) -> &mut C {
        &mut self.dma
    }

    // Size of the oldest received packet.  Empty packets are dropped here,
    // re-arming their descriptors, so a 0 from receive() only ever means
    // nothing is pending.
    fn next_packet(&mut self) -> Result<Option<usize>> {
        loop {
            match self.rx.poll(&mut self.io)? {
                Some(0) => {
                    debug!("Dropping empty RX packet");
                    self.rx.drop_packet(&mut self.io, &mut self.dma)?;
                }
                pending => return Ok(pending),
            }
        }
    }
}

impl<I: MemoryIo, C: DmaControl> Link for DescriptorLink<I, C> {
    fn send(&mut self, header: &[u8], non_crc_len: usize, data: &[u8]) -> Result<()> {
        self.tx
            .enqueue(&mut self.io, &mut self.dma, header, data, non_crc_len)
    }

    fn receive(&mut self, buf: Option<&mut [u8]>) -> Result<usize> {
        let Some(len) = self.next_packet()? else {
            return Ok(0);
        };
        match buf {
            None => Ok(len),
            Some(buf) => match self.rx.fetch(&mut self.io, &mut self.dma, buf) {
                Err(Error::NoData) => Ok(0),
                result => result,
            },
        }
    }

    fn tx_capacity(&self) -> usize {
        self.tx.capacity()
    }

    fn max_header_len(&self) -> usize {
        self.tx.config().header_size
    }

    fn max_data_len(&self) -> usize {
        self.tx.config().data_size
    }
}
