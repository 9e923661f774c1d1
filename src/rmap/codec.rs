//! RMAP wire codec.
//!
//! Header layout, all multi-byte fields big-endian:
//!
//! ```text
//! [dest path]* [dst] [0x01] [instruction] [key/status] [reply path]* [src] [tr_id:2]
//!   commands:      [0x00] [addr:4]
//!   read replies:  [0x00]
//!   [data_len:3]   - except write replies and write commands without reply
//! ```
//!
//! The header CRC is not part of the serialized header - link hardware
//! appends it over everything after the routing path, followed by the data
//! and its CRC.  [`RmapPacket::frame()`] produces the complete bytes as the
//! far end receives them, which is also what [`RmapPacket::parse()`]
//! accepts.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::crc::crc8;
use crate::rmap::{Instruction, PROTOCOL_ID, ParseError, RmapPacket};
use crate::{Error, Result};

// Byte offsets common to every shape
const IDX_DST: usize = 0;
const IDX_PROTOCOL_ID: usize = 1;
const IDX_INSTRUCTION: usize = 2;
const IDX_KEY: usize = 3;
const IDX_REPLY_PATH: usize = 4;

// Enough to read the instruction byte and key
const MIN_PREAMBLE: usize = 4;

impl RmapPacket {
    /// Exact number of bytes [`Self::serialize()`] writes for this packet.
    pub fn header_size(&self) -> usize {
        let rpath_len = if self.instruction.is_command() {
            self.rpath.len()
        } else {
            0
        };
        self.path.len() + rpath_len + self.instruction.fixed_header_size()
    }

    /// Serialize the header into `out`, returning the number of bytes
    /// written.  `out` must hold at least [`Self::header_size()`] bytes.
    pub fn serialize(&self, out: &mut [u8]) -> Result<usize> {
        let size = self.header_size();
        if out.len() < size {
            return Err(Error::BufferTooSmall);
        }
        let written = self.write_header(out);
        debug_assert_eq!(written, size);
        Ok(written)
    }

    /// Serialize the header into a new buffer
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut header = vec![0u8; self.header_size()];
        self.write_header(&mut header);
        header
    }

    /// The packet as the target receives it: header without the routing
    /// path, header CRC, then data and data CRC if this shape carries data
    /// and the payload is not empty.
    pub fn frame(&self) -> Vec<u8> {
        let mut frame = self.header_bytes().split_off(self.path.len());
        frame.push(crc8(&frame));
        if self.instruction.carries_data() && !self.data.is_empty() {
            frame.extend_from_slice(&self.data);
            frame.push(crc8(&self.data));
        }
        frame
    }

    /// Parse a received packet.  The buffer starts at the destination
    /// logical address, as routing bytes have been consumed on the way.
    ///
    /// Both CRCs are checked.  Bytes beyond the end of the packet are
    /// accepted with a warning.
    ///
    /// Expects the packet as it appears on the wire, i.e. the output of
    /// [`Self::frame()`].  [`Self::serialize()`] output carries no header
    /// CRC and is rejected as truncated.
    pub fn parse(buf: &[u8]) -> core::result::Result<RmapPacket, ParseError> {
        if buf.len() < MIN_PREAMBLE {
            return Err(ParseError::Truncated {
                need: MIN_PREAMBLE,
                got: buf.len(),
            });
        }
        if buf[IDX_PROTOCOL_ID] != PROTOCOL_ID {
            return Err(ParseError::ProtocolId(buf[IDX_PROTOCOL_ID]));
        }

        let instruction = Instruction::from_byte(buf[IDX_INSTRUCTION])?;
        let rpath_len = if instruction.is_command() {
            instruction.reply_addr_len() as usize * 4
        } else {
            0
        };
        let hdr_size = instruction.fixed_header_size() + rpath_len;
        check_len(buf, hdr_size + 1)?;

        let mut pkt = RmapPacket::command(instruction.code());
        pkt.instruction = instruction;
        pkt.dst = buf[IDX_DST];
        pkt.key = buf[IDX_KEY];

        let mut n = IDX_REPLY_PATH;
        pkt.rpath = buf[n..n + rpath_len].to_vec();
        n += rpath_len;

        pkt.src = buf[n];
        pkt.tr_id = u16::from_be_bytes([buf[n + 1], buf[n + 2]]);
        n += 3;

        if instruction.is_command() {
            // Extended address byte is unused
            pkt.addr = u32::from_be_bytes([buf[n + 1], buf[n + 2], buf[n + 3], buf[n + 4]]);
            n += 5;
        } else if !instruction.is_write() {
            // Reserved byte
            n += 1;
        }

        if instruction.has_data_length() {
            pkt.data_len = u32::from_be_bytes([0, buf[n], buf[n + 1], buf[n + 2]]);
            n += 3;
        }
        debug_assert_eq!(n, hdr_size);

        pkt.header_crc = buf[n];
        let expected = crc8(&buf[..n]);
        if pkt.header_crc != expected {
            return Err(ParseError::HeaderCrc {
                expected,
                found: pkt.header_crc,
            });
        }
        n += 1;

        if instruction.carries_data() {
            let data_end = if instruction.has_data_length() {
                if pkt.data_len == 0 {
                    None
                } else {
                    let end = n + pkt.data_len as usize;
                    check_len(buf, end + 1)?;
                    Some(end)
                }
            } else if buf.len() > n {
                // No length field - the payload runs up to the trailing CRC
                Some(buf.len() - 1)
            } else {
                None
            };

            if let Some(end) = data_end {
                pkt.data = buf[n..end].to_vec();
                pkt.data_len = pkt.data.len() as u32;
                pkt.data_crc = buf[end];
                let expected = crc8(&pkt.data);
                if pkt.data_crc != expected {
                    return Err(ParseError::DataCrc {
                        expected,
                        found: pkt.data_crc,
                    });
                }
                n = end + 1;
            }
        }

        if buf.len() > n {
            warn!(
                "RMAP packet tr_id {} has {} trailing bytes, ignoring",
                pkt.tr_id,
                buf.len() - n
            );
        }

        trace!(
            "Parsed RMAP {} {:?} tr_id {} data_len {}",
            if instruction.is_command() {
                "command"
            } else {
                "reply"
            },
            instruction.code(),
            pkt.tr_id,
            pkt.data_len
        );

        Ok(pkt)
    }

    fn write_header(&self, out: &mut [u8]) -> usize {
        let mut n = 0;
        let mut put = |bytes: &[u8]| {
            out[n..n + bytes.len()].copy_from_slice(bytes);
            n += bytes.len();
        };

        put(&self.path);
        put(&[
            self.dst,
            PROTOCOL_ID,
            self.instruction.to_byte(),
            self.key,
        ]);
        if self.instruction.is_command() {
            put(&self.rpath);
        }
        put(&[self.src]);
        put(&self.tr_id.to_be_bytes());

        if self.instruction.is_command() {
            put(&[0x00]);
            put(&self.addr.to_be_bytes());
        } else if !self.instruction.is_write() {
            put(&[0x00]);
        }

        if self.instruction.has_data_length() {
            put(&self.data_len.to_be_bytes()[1..]);
        }

        n
    }
}

fn check_len(buf: &[u8], need: usize) -> core::result::Result<(), ParseError> {
    if buf.len() < need {
        Err(ParseError::Truncated {
            need,
            got: buf.len(),
        })
    } else {
        Ok(())
    }
}
