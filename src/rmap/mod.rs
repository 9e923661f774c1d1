//! RMAP packets, as defined by ECSS-E-ST-50-52C.
//!
//! An [`RmapPacket`] is the logical view of a command or reply.  Packets are
//! built with the `set_*()` methods, which validate every field as it is set,
//! so a packet that exists is always serializable.  See [`codec`] for the
//! translation to and from wire bytes.
//!
//! Packets own no persistent state - build one per transaction, serialize it
//! and drop it.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod codec;

use alloc::vec::Vec;

use crate::{Error, Result};

/// RMAP protocol identifier
pub const PROTOCOL_ID: u8 = 0x01;

/// Maximum length of the destination (routing) path
pub const MAX_PATH_LEN: usize = 15;

/// Maximum length of the reply path - the instruction field holds at most
/// three 4-byte words
pub const MAX_REPLY_PATH_LEN: usize = 12;

/// Largest value of the 24-bit data length field
pub const MAX_DATA_LEN: u32 = 0x00FF_FFFF;

// Command code bits
const CMD_BIT_INC: u8 = 1 << 0;
const CMD_BIT_REPLY: u8 = 1 << 1;
const CMD_BIT_VERIFY: u8 = 1 << 2;
const CMD_BIT_WRITE: u8 = 1 << 3;

// Instruction byte layout
const INSTR_RESERVED: u8 = 1 << 7;
const INSTR_COMMAND: u8 = 1 << 6;
const INSTR_CODE_SHIFT: u8 = 2;
const INSTR_CODE_MASK: u8 = 0x0F;
const INSTR_REPLY_ADDR_MASK: u8 = 0x03;

/// The 11 legal RMAP command codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    ReadSingle = 0x2,
    ReadIncrementing = 0x3,
    ReadModifyWrite = 0x7,
    WriteSingle = 0x8,
    WriteIncrementing = 0x9,
    WriteSingleReply = 0xA,
    WriteIncrementingReply = 0xB,
    WriteSingleVerify = 0xC,
    WriteIncrementingVerify = 0xD,
    WriteSingleVerifyReply = 0xE,
    WriteIncrementingVerifyReply = 0xF,
}

impl CommandCode {
    /// Every legal command code, in code order
    pub const ALL: [CommandCode; 11] = [
        CommandCode::ReadSingle,
        CommandCode::ReadIncrementing,
        CommandCode::ReadModifyWrite,
        CommandCode::WriteSingle,
        CommandCode::WriteIncrementing,
        CommandCode::WriteSingleReply,
        CommandCode::WriteIncrementingReply,
        CommandCode::WriteSingleVerify,
        CommandCode::WriteIncrementingVerify,
        CommandCode::WriteSingleVerifyReply,
        CommandCode::WriteIncrementingVerifyReply,
    ];

    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub const fn is_write(self) -> bool {
        self.bits() & CMD_BIT_WRITE != 0
    }

    pub const fn is_verify(self) -> bool {
        self.bits() & CMD_BIT_VERIFY != 0
    }

    pub const fn wants_reply(self) -> bool {
        self.bits() & CMD_BIT_REPLY != 0
    }

    pub const fn is_increment(self) -> bool {
        self.bits() & CMD_BIT_INC != 0
    }

    pub const fn is_read_modify_write(self) -> bool {
        matches!(self, CommandCode::ReadModifyWrite)
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        CommandCode::ALL
            .iter()
            .copied()
            .find(|c| c.bits() == code)
            .ok_or(Error::InvalidCommand(code))
    }
}

/// Decoded RMAP instruction byte.
///
/// Bit 7 is reserved, bit 6 distinguishes commands from replies, bits 5..2
/// hold the [`CommandCode`] (write, verify, reply, increment) and bits 1..0
/// the reply address length in 4-byte words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    code: CommandCode,
    command: bool,
    reply_addr_len: u8,
}

impl Instruction {
    /// `reply_addr_len` is in words and is truncated to the 2-bit field.
    pub const fn new(code: CommandCode, command: bool, reply_addr_len: u8) -> Self {
        Self {
            code,
            command,
            reply_addr_len: reply_addr_len & INSTR_REPLY_ADDR_MASK,
        }
    }

    /// Decode a wire instruction byte.  The reserved bit must be clear and the
    /// command code one of the legal codes.
    pub fn from_byte(byte: u8) -> core::result::Result<Self, ParseError> {
        if byte & INSTR_RESERVED != 0 {
            return Err(ParseError::Instruction(byte));
        }
        let code = CommandCode::try_from((byte >> INSTR_CODE_SHIFT) & INSTR_CODE_MASK)
            .map_err(|_| ParseError::Instruction(byte))?;
        Ok(Self::new(
            code,
            byte & INSTR_COMMAND != 0,
            byte & INSTR_REPLY_ADDR_MASK,
        ))
    }

    pub const fn to_byte(self) -> u8 {
        let mut byte = (self.code.bits() & INSTR_CODE_MASK) << INSTR_CODE_SHIFT;
        if self.command {
            byte |= INSTR_COMMAND;
        }
        byte | self.reply_addr_len
    }

    pub const fn code(&self) -> CommandCode {
        self.code
    }

    pub const fn is_command(&self) -> bool {
        self.command
    }

    pub const fn is_reply(&self) -> bool {
        !self.command
    }

    pub const fn is_write(&self) -> bool {
        self.code.is_write()
    }

    pub const fn is_verify(&self) -> bool {
        self.code.is_verify()
    }

    pub const fn wants_reply(&self) -> bool {
        self.code.wants_reply()
    }

    pub const fn is_increment(&self) -> bool {
        self.code.is_increment()
    }

    /// Reply address length in 4-byte words
    pub const fn reply_addr_len(&self) -> u8 {
        self.reply_addr_len
    }

    /// Whether the 24-bit data length field is on the wire for this shape.
    ///
    /// Write replies have none, and a write command that does not request a
    /// reply omits it as well.
    pub(crate) const fn has_data_length(&self) -> bool {
        !(self.is_write() && (self.is_reply() || !self.wants_reply()))
    }

    /// Whether a data field and data CRC follow the header CRC.
    pub(crate) const fn carries_data(&self) -> bool {
        if self.command {
            self.is_write() || self.code.is_read_modify_write()
        } else {
            !self.is_write()
        }
    }

    /// Header size excluding routing path, reply path and header CRC
    pub(crate) const fn fixed_header_size(&self) -> usize {
        match (self.command, self.is_write()) {
            (true, true) if !self.wants_reply() => HDR_SIZE_WRITE_CMD_NO_REPLY,
            (true, _) => HDR_SIZE_CMD,
            (false, true) => HDR_SIZE_WRITE_REPLY,
            (false, false) => HDR_SIZE_READ_REPLY,
        }
    }
}

// Header sizes, excluding paths and the header CRC
pub(crate) const HDR_SIZE_CMD: usize = 15;
pub(crate) const HDR_SIZE_WRITE_CMD_NO_REPLY: usize = 12;
pub(crate) const HDR_SIZE_READ_REPLY: usize = 11;
pub(crate) const HDR_SIZE_WRITE_REPLY: usize = 7;

/// Reasons a received buffer is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Buffer shorter than its header or declared data require
    #[error("truncated packet ({got} bytes, need {need})")]
    Truncated { need: usize, got: usize },
    /// Protocol identifier is not RMAP
    #[error("protocol id {0:#04x} is not RMAP")]
    ProtocolId(u8),
    /// Reserved bit set or illegal command code
    #[error("invalid instruction byte {0:#04x}")]
    Instruction(u8),
    /// Header CRC mismatch
    #[error("header CRC {found:#04x}, expected {expected:#04x}")]
    HeaderCrc { expected: u8, found: u8 },
    /// Data CRC mismatch
    #[error("data CRC {found:#04x}, expected {expected:#04x}")]
    DataCrc { expected: u8, found: u8 },
}

/// Logical RMAP command or reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmapPacket {
    path: Vec<u8>,
    dst: u8,
    instruction: Instruction,
    key: u8,
    rpath: Vec<u8>,
    src: u8,
    tr_id: u16,
    addr: u32,
    data_len: u32,
    data: Vec<u8>,
    header_crc: u8,
    data_crc: u8,
}

impl RmapPacket {
    /// Create a command packet with the given code.  All other fields start
    /// zeroed and empty.
    pub fn command(code: CommandCode) -> Self {
        Self {
            path: Vec::new(),
            dst: 0,
            instruction: Instruction::new(code, true, 0),
            key: 0,
            rpath: Vec::new(),
            src: 0,
            tr_id: 0,
            addr: 0,
            data_len: 0,
            data: Vec::new(),
            header_crc: 0,
            data_crc: 0,
        }
    }

    /// Create the reply a target would send for `command`.
    ///
    /// Logical addresses are swapped, the transaction id and command code are
    /// kept, and the routing path is the command's reply path with its
    /// leading zero padding removed.  Status is 0 (success) and there is no
    /// data; use [`Self::set_status()`] and [`Self::set_data()`] as required.
    pub fn reply_to(command: &RmapPacket) -> Self {
        let padding = command.rpath.iter().take_while(|&&b| b == 0).count();
        Self {
            path: command.rpath[padding..].to_vec(),
            dst: command.src,
            instruction: Instruction::new(
                command.instruction.code(),
                false,
                command.instruction.reply_addr_len(),
            ),
            key: 0,
            rpath: Vec::new(),
            src: command.dst,
            tr_id: command.tr_id,
            addr: 0,
            data_len: 0,
            data: Vec::new(),
            header_crc: 0,
            data_crc: 0,
        }
    }

    /// Set the command code.  Setting a code always makes this a command.
    pub fn set_cmd(&mut self, code: u8) -> Result<&mut Self> {
        let code = CommandCode::try_from(code)?;
        self.instruction = Instruction::new(code, true, (self.rpath.len() / 4) as u8);
        Ok(self)
    }

    pub fn set_dst(&mut self, dst: u8) -> &mut Self {
        self.dst = dst;
        self
    }

    pub fn set_src(&mut self, src: u8) -> &mut Self {
        self.src = src;
        self
    }

    pub fn set_key(&mut self, key: u8) -> &mut Self {
        self.key = key;
        self
    }

    /// Replies carry a status byte where commands carry the key
    pub fn set_status(&mut self, status: u8) -> &mut Self {
        self.key = status;
        self
    }

    pub fn set_tr_id(&mut self, tr_id: u16) -> &mut Self {
        self.tr_id = tr_id;
        self
    }

    pub fn set_addr(&mut self, addr: u32) -> &mut Self {
        self.addr = addr;
        self
    }

    /// Set the routing path prepended to the packet.  Routers consume these
    /// bytes, so they are not covered by the header CRC.
    pub fn set_path(&mut self, path: &[u8]) -> Result<&mut Self> {
        if path.len() > MAX_PATH_LEN {
            return Err(Error::PathTooLong(path.len()));
        }
        self.path = path.to_vec();
        Ok(self)
    }

    /// Set the path the target uses to route its reply.  Must be a multiple
    /// of 4 bytes - pad with leading zeros as required.
    pub fn set_reply_path(&mut self, rpath: &[u8]) -> Result<&mut Self> {
        if rpath.len() > MAX_REPLY_PATH_LEN {
            return Err(Error::ReplyPathTooLong(rpath.len()));
        }
        if rpath.len() % 4 != 0 {
            return Err(Error::ReplyPathNotAligned(rpath.len()));
        }
        self.rpath = rpath.to_vec();
        self.instruction = Instruction::new(
            self.instruction.code(),
            self.instruction.is_command(),
            (rpath.len() / 4) as u8,
        );
        Ok(self)
    }

    /// Set the data length field without a payload, as used by read commands.
    pub fn set_data_len(&mut self, len: u32) -> Result<&mut Self> {
        if len > MAX_DATA_LEN {
            return Err(Error::DataTooLong(len as usize));
        }
        self.data_len = len;
        Ok(self)
    }

    /// Set the payload, and the data length to match.
    pub fn set_data(&mut self, data: &[u8]) -> Result<&mut Self> {
        if data.len() > MAX_DATA_LEN as usize {
            return Err(Error::DataTooLong(data.len()));
        }
        self.data = data.to_vec();
        self.data_len = data.len() as u32;
        Ok(self)
    }

    pub fn instruction(&self) -> Instruction {
        self.instruction
    }

    pub fn is_command(&self) -> bool {
        self.instruction.is_command()
    }

    pub fn dst(&self) -> u8 {
        self.dst
    }

    pub fn src(&self) -> u8 {
        self.src
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn status(&self) -> u8 {
        self.key
    }

    pub fn tr_id(&self) -> u16 {
        self.tr_id
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }

    pub fn reply_path(&self) -> &[u8] {
        &self.rpath
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Header CRC as received.  Zero on packets that were built locally.
    pub fn header_crc(&self) -> u8 {
        self.header_crc
    }

    /// Data CRC as received.  Zero on packets that were built locally, or
    /// that carried no data.
    pub fn data_crc(&self) -> u8 {
        self.data_crc
    }
}
