// JDB - JVM Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Packet framing and typed payload access.

use super::constants::{HEADER_LEN, REPLY_FLAG};
use crate::TargetError;

/// Widths, in bytes, of the variable-sized identifiers used by the target.
///
/// Negotiated once per connection through `VirtualMachine.IDSizes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSizes {
    /// fieldID width
    pub field_id: usize,
    /// methodID width
    pub method_id: usize,
    /// objectID width (also threadID, stringID, ...)
    pub object_id: usize,
    /// referenceTypeID width
    pub reference_type_id: usize,
    /// frameID width
    pub frame_id: usize,
}

impl Default for IdSizes {
    fn default() -> Self {
        Self { field_id: 8, method_id: 8, object_id: 8, reference_type_id: 8, frame_id: 8 }
    }
}

/// An executable location as JDWP encodes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct JdwpLocation {
    /// Type tag of the declaring type
    pub type_tag: u8,
    /// Declaring reference type
    pub class_id: u64,
    /// Method within the declaring type
    pub method_id: u64,
    /// Bytecode index within the method
    pub index: u64,
}

/// A command packet, sent by the debugger or (for events) by the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    /// Packet id
    pub id: u32,
    /// Command set
    pub command_set: u8,
    /// Command within the set
    pub command: u8,
    /// Payload
    pub data: Vec<u8>,
}

/// A reply packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPacket {
    /// Id of the command this reply answers
    pub id: u32,
    /// JDWP error code, `0` on success
    pub error_code: u16,
    /// Payload
    pub data: Vec<u8>,
}

/// Any packet on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Command packet
    Command(CommandPacket),
    /// Reply packet
    Reply(ReplyPacket),
}

impl CommandPacket {
    /// Encode the packet including its header.
    pub fn encode(&self) -> Vec<u8> {
        let len = HEADER_LEN + self.data.len();
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out.extend_from_slice(&self.id.to_be_bytes());
        out.push(0);
        out.push(self.command_set);
        out.push(self.command);
        out.extend_from_slice(&self.data);
        out
    }
}

impl ReplyPacket {
    /// Encode the packet including its header.
    pub fn encode(&self) -> Vec<u8> {
        let len = HEADER_LEN + self.data.len();
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out.extend_from_slice(&self.id.to_be_bytes());
        out.push(REPLY_FLAG);
        out.extend_from_slice(&self.error_code.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

impl Packet {
    /// Total packet length announced by a header.
    pub fn announced_len(header: &[u8; HEADER_LEN]) -> usize {
        u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize
    }

    /// Build a packet from its header and payload.
    pub fn from_parts(header: &[u8; HEADER_LEN], data: Vec<u8>) -> Self {
        let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if header[8] & REPLY_FLAG != 0 {
            let error_code = u16::from_be_bytes([header[9], header[10]]);
            Self::Reply(ReplyPacket { id, error_code, data })
        } else {
            Self::Command(CommandPacket { id, command_set: header[9], command: header[10], data })
        }
    }
}

/// Builder for command payloads.
#[derive(Debug)]
pub struct PacketWriter {
    sizes: IdSizes,
    buf: Vec<u8>,
}

impl PacketWriter {
    /// Create an empty writer using the given identifier widths.
    pub fn new(sizes: IdSizes) -> Self {
        Self { sizes, buf: Vec::new() }
    }

    /// Append a byte.
    pub fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    /// Append a signed 32-bit integer.
    pub fn i32(mut self, value: i32) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append an unsigned 64-bit integer.
    pub fn u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn string(mut self, value: &str) -> Self {
        self.buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    fn id(mut self, width: usize, value: u64) -> Self {
        let bytes = value.to_be_bytes();
        self.buf.extend_from_slice(&bytes[bytes.len() - width.min(8)..]);
        self
    }

    /// Append an objectID (thread, string, array, ...).
    pub fn object_id(self, value: u64) -> Self {
        let width = self.sizes.object_id;
        self.id(width, value)
    }

    /// Append a referenceTypeID.
    pub fn reference_type_id(self, value: u64) -> Self {
        let width = self.sizes.reference_type_id;
        self.id(width, value)
    }

    /// Append a methodID.
    pub fn method_id(self, value: u64) -> Self {
        let width = self.sizes.method_id;
        self.id(width, value)
    }

    /// Append a frameID.
    pub fn frame_id(self, value: u64) -> Self {
        let width = self.sizes.frame_id;
        self.id(width, value)
    }

    /// Append a location.
    pub fn location(self, location: &JdwpLocation) -> Self {
        self.u8(location.type_tag)
            .reference_type_id(location.class_id)
            .method_id(location.method_id)
            .u64(location.index)
    }

    /// Finish and return the payload.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a reply or event payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    sizes: IdSizes,
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a reader over `data` using the given identifier widths.
    pub fn new(sizes: IdSizes, data: &'a [u8]) -> Self {
        Self { sizes, data, pos: 0 }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TargetError> {
        if self.remaining() < n {
            return Err(TargetError::Protocol(format!(
                "needed {n} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a byte.
    pub fn u8(&mut self) -> Result<u8, TargetError> {
        Ok(self.take(1)?[0])
    }

    /// Read a boolean.
    pub fn bool(&mut self) -> Result<bool, TargetError> {
        Ok(self.u8()? != 0)
    }

    /// Read an unsigned 16-bit integer.
    pub fn u16(&mut self) -> Result<u16, TargetError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a signed 32-bit integer.
    pub fn i32(&mut self) -> Result<i32, TargetError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a signed 64-bit integer.
    pub fn i64(&mut self) -> Result<i64, TargetError> {
        Ok(self.u64()? as i64)
    }

    /// Read an unsigned 64-bit integer.
    pub fn u64(&mut self) -> Result<u64, TargetError> {
        self.id(8)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String, TargetError> {
        let len = self.i32()?;
        let len = usize::try_from(len)
            .map_err(|_| TargetError::Protocol(format!("negative string length {len}")))?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| TargetError::Protocol(format!("invalid UTF-8 in string: {e}")))
    }

    /// Read a non-negative element count.
    pub fn count(&mut self) -> Result<usize, TargetError> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| TargetError::Protocol(format!("negative count {n}")))
    }

    fn id(&mut self, width: usize) -> Result<u64, TargetError> {
        if width == 0 || width > 8 {
            return Err(TargetError::Protocol(format!("unsupported identifier width {width}")));
        }
        Ok(self.take(width)?.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Read an objectID.
    pub fn object_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.object_id)
    }

    /// Read a referenceTypeID.
    pub fn reference_type_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.reference_type_id)
    }

    /// Read a methodID.
    pub fn method_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.method_id)
    }

    /// Read a frameID.
    pub fn frame_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.frame_id)
    }

    /// Read a location.
    pub fn location(&mut self) -> Result<JdwpLocation, TargetError> {
        Ok(JdwpLocation {
            type_tag: self.u8()?,
            class_id: self.reference_type_id()?,
            method_id: self.method_id()?,
            index: self.u64()?,
        })
    }
}
