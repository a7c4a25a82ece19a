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

//! Decoding of `Event.Composite` packets.

use tracing::warn;

use super::{constants::event_kinds, packet::PacketReader, JdwpLocation};
use crate::TargetError;

/// A single event inside a composite event packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JdwpEvent {
    /// The VM finished initializing.
    VmStart {
        /// Originating request, `0` for automatic events
        request_id: i32,
        /// Initial thread
        thread: u64,
    },
    /// The VM is terminating.
    VmDeath {
        /// Originating request, `0` for automatic events
        request_id: i32,
    },
    /// A step request completed.
    SingleStep {
        /// Originating request
        request_id: i32,
        /// Stepping thread
        thread: u64,
        /// Where the thread stopped
        location: JdwpLocation,
    },
    /// A breakpoint was hit.
    Breakpoint {
        /// Originating request
        request_id: i32,
        /// Thread that hit the breakpoint
        thread: u64,
        /// Breakpoint location
        location: JdwpLocation,
    },
    /// A class was prepared (loaded and linked).
    ClassPrepare {
        /// Originating request
        request_id: i32,
        /// Thread that caused the load
        thread: u64,
        /// Type tag of the prepared type
        ref_type_tag: u8,
        /// Prepared type
        type_id: u64,
        /// JNI signature of the prepared type
        signature: String,
        /// Class status bits
        status: i32,
    },
    /// A class was unloaded.
    ClassUnload {
        /// Originating request
        request_id: i32,
        /// JNI signature of the unloaded type
        signature: String,
    },
    /// A thread started.
    ThreadStart {
        /// Originating request
        request_id: i32,
        /// Started thread
        thread: u64,
    },
    /// A thread ended.
    ThreadDeath {
        /// Originating request
        request_id: i32,
        /// Ended thread
        thread: u64,
    },
    /// An event kind the engine never requests. Its payload length is
    /// unknown, so decoding of the containing set stops here.
    Unsupported {
        /// Raw event kind
        kind: u8,
        /// Originating request
        request_id: i32,
    },
}

/// An ordered group of events delivered together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSet {
    /// Suspend policy the target applied when delivering the set
    pub suspend_policy: u8,
    /// Events in delivery order
    pub events: Vec<JdwpEvent>,
}

impl EventSet {
    /// Decode the payload of an `Event.Composite` command.
    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, TargetError> {
        let suspend_policy = reader.u8()?;
        let count = reader.count()?;
        let mut events = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            let event = decode_event(reader)?;
            let unsupported = matches!(event, JdwpEvent::Unsupported { .. });
            events.push(event);
            if unsupported {
                warn!(
                    remaining = reader.remaining(),
                    "Stopping event set decoding at an unsupported event kind"
                );
                break;
            }
        }

        Ok(Self { suspend_policy, events })
    }
}

fn decode_event(reader: &mut PacketReader<'_>) -> Result<JdwpEvent, TargetError> {
    let kind = reader.u8()?;
    let request_id = reader.i32()?;

    let event = match kind {
        event_kinds::VM_START => JdwpEvent::VmStart { request_id, thread: reader.object_id()? },
        event_kinds::VM_DEATH => JdwpEvent::VmDeath { request_id },
        event_kinds::SINGLE_STEP => JdwpEvent::SingleStep {
            request_id,
            thread: reader.object_id()?,
            location: reader.location()?,
        },
        event_kinds::BREAKPOINT => JdwpEvent::Breakpoint {
            request_id,
            thread: reader.object_id()?,
            location: reader.location()?,
        },
        event_kinds::CLASS_PREPARE => JdwpEvent::ClassPrepare {
            request_id,
            thread: reader.object_id()?,
            ref_type_tag: reader.u8()?,
            type_id: reader.reference_type_id()?,
            signature: reader.string()?,
            status: reader.i32()?,
        },
        event_kinds::CLASS_UNLOAD => {
            JdwpEvent::ClassUnload { request_id, signature: reader.string()? }
        }
        event_kinds::THREAD_START => {
            JdwpEvent::ThreadStart { request_id, thread: reader.object_id()? }
        }
        event_kinds::THREAD_DEATH => {
            JdwpEvent::ThreadDeath { request_id, thread: reader.object_id()? }
        }
        kind => JdwpEvent::Unsupported { kind, request_id },
    };

    Ok(event)
}
