//! Simulated RDCU target and link hardware for integration tests.
//!
//! [`SimulatedRdcu`] plays both the GRSPW2-style DMA engine and the remote
//! device: it walks the TX descriptor table in hardware order, assembles each
//! packet as it would appear on the wire, executes RMAP commands against its
//! own memory and writes the replies into the RX descriptor table.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;

use rdcu_rmap::crc::crc8;
use rdcu_rmap::io::{BufferIo, MemoryIo};
use rdcu_rmap::link::DescriptorLink;
use rdcu_rmap::mirror::{LinkConfig, RemoteMirror};
use rdcu_rmap::ring::{
    NoDmaControl, RxConfig, RxDescriptor, RxFlags, TxConfig, TxDescriptor, TxFlags,
};
use rdcu_rmap::rmap::RmapPacket;

/// Base of the memory shared between the host and the link hardware
pub const SHARED_BASE: u32 = 0x4000_0000;
pub const SHARED_SIZE: usize = 0x4000;

/// Base of the host's shadow of RDCU memory
pub const SHADOW_BASE: u32 = 0x2000_0000;
pub const SHADOW_SIZE: usize = 0x2000;

/// RDCU memory as seen over RMAP
pub const RDCU_MEM_BASE: u32 = 0;
pub const RDCU_MEM_SIZE: usize = 0x4000;

pub const RDCU_ADDRESS: u8 = 0xFE;
pub const TX_DESCRIPTORS: usize = 8;
pub const RX_DESCRIPTORS: usize = 8;
pub const MAX_PAYLOAD: usize = 256;

// RMAP reply status codes
pub const STATUS_INVALID_KEY: u8 = 3;
pub const STATUS_NOT_AUTHORISED: u8 = 10;
pub const STATUS_INVALID_TARGET: u8 = 12;

pub type TestLink = DescriptorLink<BufferIo, NoDmaControl>;
pub type TestMirror = RemoteMirror<TestLink, BufferIo>;

pub fn tx_config() -> TxConfig {
    TxConfig {
        desc_base: SHARED_BASE,
        buf_base: SHARED_BASE + 0x800,
        capacity: TX_DESCRIPTORS,
        header_size: 64,
        data_size: MAX_PAYLOAD,
        irq: false,
    }
}

pub fn rx_config() -> RxConfig {
    RxConfig {
        desc_base: SHARED_BASE + 0x400,
        buf_base: SHARED_BASE + 0x2000,
        capacity: RX_DESCRIPTORS,
        packet_size: 512,
        irq: false,
    }
}

pub fn link() -> TestLink {
    DescriptorLink::new(
        BufferIo::new(SHARED_BASE, SHARED_SIZE),
        NoDmaControl,
        tx_config(),
        rx_config(),
    )
    .unwrap()
}

pub fn link_config() -> LinkConfig {
    LinkConfig {
        slots: TX_DESCRIPTORS,
        max_payload: MAX_PAYLOAD,
        ..LinkConfig::default()
    }
}

pub fn mirror() -> TestMirror {
    RemoteMirror::new(
        link(),
        BufferIo::new(SHADOW_BASE, SHADOW_SIZE),
        link_config(),
    )
    .unwrap()
}

/// A read reply as the RDCU would send it
pub fn read_reply(tr_id: u16, data: &[u8]) -> Vec<u8> {
    let mut cmd = RmapPacket::command(rdcu_rmap::rmap::CommandCode::ReadIncrementing);
    cmd.set_dst(RDCU_ADDRESS)
        .set_src(0xFE)
        .set_tr_id(tr_id)
        .set_data_len(data.len() as u32)
        .unwrap();
    let mut reply = RmapPacket::reply_to(&cmd);
    reply.set_data(data).unwrap();
    reply.frame()
}

pub struct SimulatedRdcu {
    /// RDCU memory
    pub memory: BufferIo,
    pub address: u8,
    pub key: u8,
    /// Execute commands but never answer
    pub mute: bool,
    /// Every packet seen on the wire, routing bytes stripped
    pub wire: Vec<Vec<u8>>,
    /// Commands executed
    pub executed: usize,
    tx_next: usize,
    rx_next: usize,
    backlog: VecDeque<Vec<u8>>,
}

impl SimulatedRdcu {
    pub fn new() -> Self {
        Self {
            memory: BufferIo::new(RDCU_MEM_BASE, RDCU_MEM_SIZE),
            address: RDCU_ADDRESS,
            key: 0,
            mute: false,
            wire: Vec::new(),
            executed: 0,
            tx_next: 0,
            rx_next: 0,
            backlog: Vec::new().into(),
        }
    }

    /// Queue a raw packet for delivery to the host
    pub fn inject(&mut self, frame: Vec<u8>) {
        self.backlog.push_back(frame);
    }

    /// Packets waiting for a free RX descriptor
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    /// Transmit every enabled TX descriptor, execute what was sent and
    /// deliver as many replies as the RX ring has room for.  Returns the
    /// number of packets transmitted.
    pub fn service(&mut self, link: &mut TestLink) -> usize {
        let cfg = link.tx().config().clone();
        let mut sent = 0;

        loop {
            let io = link.io_mut();
            let desc = cfg.desc_addr(self.tx_next);
            let ctrl = io.read_u32(desc + TxDescriptor::ctrl_offset()).unwrap();
            let flags = TxFlags::from_bits_truncate(ctrl);
            if !flags.contains(TxFlags::ENABLE) {
                break;
            }

            let hdr_len = (ctrl & 0xFF) as usize;
            let non_crc_len = ((ctrl >> 8) & 0x0F) as usize;
            let hdr_addr = io.read_u32(desc + TxDescriptor::hdr_addr_offset()).unwrap();
            let data_len = io.read_u32(desc + TxDescriptor::data_len_offset()).unwrap() as usize;
            let data_addr = io.read_u32(desc + TxDescriptor::data_addr_offset()).unwrap();

            let mut header = vec![0u8; hdr_len];
            io.read_bytes(hdr_addr, &mut header).unwrap();
            let mut data = vec![0u8; data_len];
            io.read_bytes(data_addr, &mut data).unwrap();

            // Routers consume the path
            let mut frame = header[non_crc_len..].to_vec();
            if flags.contains(TxFlags::HEADER_CRC) {
                frame.push(crc8(&frame));
            }
            if !data.is_empty() {
                frame.extend_from_slice(&data);
                if flags.contains(TxFlags::DATA_CRC) {
                    frame.push(crc8(&data));
                }
            }

            io.write_u32(
                desc + TxDescriptor::ctrl_offset(),
                (flags - TxFlags::ENABLE).bits() | (ctrl & 0x0FFF),
            )
            .unwrap();
            self.tx_next = if flags.contains(TxFlags::WRAP) {
                0
            } else {
                self.tx_next + 1
            };
            sent += 1;

            if let Some(reply) = self.execute(&frame) {
                if !self.mute {
                    self.backlog.push_back(reply);
                }
            }
            self.wire.push(frame);
        }

        self.deliver(link);
        sent
    }

    /// Write queued packets into armed RX descriptors, in hardware order.
    /// Returns the number delivered.
    pub fn deliver(&mut self, link: &mut TestLink) -> usize {
        let cfg = link.rx().config().clone();
        let io = link.io_mut();
        let mut delivered = 0;

        while let Some(frame) = self.backlog.front() {
            let desc = cfg.desc_addr(self.rx_next);
            let ctrl = io.read_u32(desc + RxDescriptor::ctrl_offset()).unwrap();
            let flags = RxFlags::from_bits_truncate(ctrl);
            if !flags.contains(RxFlags::ENABLE) {
                break;
            }

            let pkt_addr = io.read_u32(desc + RxDescriptor::pkt_addr_offset()).unwrap();
            let len = frame.len().min(cfg.packet_size);
            io.write_bytes(pkt_addr, &frame[..len]).unwrap();

            let mut done = flags - RxFlags::ENABLE;
            if len < frame.len() {
                done |= RxFlags::TRUNCATED;
            }
            io.write_u32(desc + RxDescriptor::ctrl_offset(), done.bits() | len as u32)
                .unwrap();

            self.rx_next = if flags.contains(RxFlags::WRAP) {
                0
            } else {
                self.rx_next + 1
            };
            self.backlog.pop_front();
            delivered += 1;
        }

        delivered
    }

    /// Complete the next armed RX descriptor with an error end of packet
    /// and nothing received, as after a link error mid-packet.  Returns
    /// false if no descriptor is armed.
    pub fn deliver_empty(&mut self, link: &mut TestLink) -> bool {
        let cfg = link.rx().config().clone();
        let io = link.io_mut();
        let desc = cfg.desc_addr(self.rx_next);
        let ctrl = io.read_u32(desc + RxDescriptor::ctrl_offset()).unwrap();
        let flags = RxFlags::from_bits_truncate(ctrl);
        if !flags.contains(RxFlags::ENABLE) {
            return false;
        }

        let done = (flags - RxFlags::ENABLE) | RxFlags::EEP;
        io.write_u32(desc + RxDescriptor::ctrl_offset(), done.bits())
            .unwrap();
        self.rx_next = if flags.contains(RxFlags::WRAP) {
            0
        } else {
            self.rx_next + 1
        };
        true
    }

    // Run a command, returning the reply frame if one is due
    fn execute(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let cmd = match RmapPacket::parse(frame) {
            Ok(cmd) if cmd.is_command() => cmd,
            _ => return None,
        };
        let instruction = cmd.instruction();
        let mut reply = RmapPacket::reply_to(&cmd);

        if cmd.dst() != self.address {
            reply.set_status(STATUS_INVALID_TARGET);
        } else if cmd.key() != self.key {
            reply.set_status(STATUS_INVALID_KEY);
        } else if instruction.is_write() {
            if self.memory.write_bytes(cmd.addr(), cmd.data()).is_err() {
                reply.set_status(STATUS_NOT_AUTHORISED);
            }
        } else {
            let mut data = vec![0u8; cmd.data_len() as usize];
            match self.memory.read_bytes(cmd.addr(), &mut data) {
                Ok(()) => {
                    reply.set_data(&data).unwrap();
                }
                Err(_) => {
                    reply.set_status(STATUS_NOT_AUTHORISED);
                }
            }
        }
        self.executed += 1;

        instruction.wants_reply().then(|| reply.frame())
    }
}
