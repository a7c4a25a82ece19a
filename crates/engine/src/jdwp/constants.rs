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

//! JDWP command sets, commands and protocol constants.

/// Handshake string exchanged verbatim by both sides right after connecting.
pub const HANDSHAKE: &[u8; 14] = b"JDWP-Handshake";

/// Size of a packet header: length, id, flags and either command set + command or error code.
pub const HEADER_LEN: usize = 11;

/// Flag marking a reply packet.
pub const REPLY_FLAG: u8 = 0x80;

/// Command set identifiers
pub mod command_sets {
    /// VirtualMachine
    pub const VIRTUAL_MACHINE: u8 = 1;
    /// ReferenceType
    pub const REFERENCE_TYPE: u8 = 2;
    /// Method
    pub const METHOD: u8 = 6;
    /// ObjectReference
    pub const OBJECT_REFERENCE: u8 = 9;
    /// StringReference
    pub const STRING_REFERENCE: u8 = 10;
    /// ThreadReference
    pub const THREAD_REFERENCE: u8 = 11;
    /// ArrayReference
    pub const ARRAY_REFERENCE: u8 = 13;
    /// EventRequest
    pub const EVENT_REQUEST: u8 = 15;
    /// StackFrame
    pub const STACK_FRAME: u8 = 16;
    /// Event (sent by the target)
    pub const EVENT: u8 = 64;
}

/// VirtualMachine commands (set 1)
pub mod vm_commands {
    /// Version
    pub const VERSION: u8 = 1;
    /// ClassesBySignature
    pub const CLASSES_BY_SIGNATURE: u8 = 2;
    /// Dispose
    pub const DISPOSE: u8 = 6;
    /// IDSizes
    pub const ID_SIZES: u8 = 7;
    /// Resume
    pub const RESUME: u8 = 9;
}

/// ReferenceType commands (set 2)
pub mod reference_type_commands {
    /// Signature
    pub const SIGNATURE: u8 = 1;
    /// Methods
    pub const METHODS: u8 = 5;
}

/// Method commands (set 6)
pub mod method_commands {
    /// LineTable
    pub const LINE_TABLE: u8 = 1;
    /// VariableTable
    pub const VARIABLE_TABLE: u8 = 2;
}

/// ObjectReference commands (set 9)
pub mod object_commands {
    /// ReferenceType
    pub const REFERENCE_TYPE: u8 = 1;
}

/// StringReference commands (set 10)
pub mod string_commands {
    /// Value
    pub const VALUE: u8 = 1;
}

/// ThreadReference commands (set 11)
pub mod thread_commands {
    /// Frames
    pub const FRAMES: u8 = 6;
}

/// ArrayReference commands (set 13)
pub mod array_commands {
    /// Length
    pub const LENGTH: u8 = 1;
}

/// EventRequest commands (set 15)
pub mod event_request_commands {
    /// Set
    pub const SET: u8 = 1;
    /// Clear
    pub const CLEAR: u8 = 2;
}

/// StackFrame commands (set 16)
pub mod stack_frame_commands {
    /// GetValues
    pub const GET_VALUES: u8 = 1;
}

/// Event commands (set 64)
pub mod event_commands {
    /// Composite
    pub const COMPOSITE: u8 = 100;
}

/// Event kinds
pub mod event_kinds {
    /// SingleStep
    pub const SINGLE_STEP: u8 = 1;
    /// Breakpoint
    pub const BREAKPOINT: u8 = 2;
    /// ThreadStart
    pub const THREAD_START: u8 = 6;
    /// ThreadDeath
    pub const THREAD_DEATH: u8 = 7;
    /// ClassPrepare
    pub const CLASS_PREPARE: u8 = 8;
    /// ClassUnload
    pub const CLASS_UNLOAD: u8 = 9;
    /// VMStart
    pub const VM_START: u8 = 90;
    /// VMDeath
    pub const VM_DEATH: u8 = 99;
}

/// Event request modifier kinds
pub mod modifier_kinds {
    /// ClassMatch
    pub const CLASS_MATCH: u8 = 5;
    /// LocationOnly
    pub const LOCATION_ONLY: u8 = 7;
    /// Step
    pub const STEP: u8 = 10;
}

/// Suspend policies
pub mod suspend_policy {
    /// Suspend nothing
    pub const NONE: u8 = 0;
    /// Suspend the event thread
    pub const EVENT_THREAD: u8 = 1;
    /// Suspend the whole VM
    pub const ALL: u8 = 2;
}

/// Step sizes
pub mod step_sizes {
    /// Step by source line
    pub const LINE: i32 = 1;
}

/// Step depths
pub mod step_depths {
    /// Step into calls
    pub const INTO: i32 = 0;
    /// Step over calls
    pub const OVER: i32 = 1;
    /// Step out of the current method
    pub const OUT: i32 = 2;
}

/// Type tags used in locations and reference type replies
pub mod type_tags {
    /// Class
    pub const CLASS: u8 = 1;
}

/// JDWP error codes the engine reacts to
pub mod error_codes {
    /// Class has no line table or variable table
    pub const ABSENT_INFORMATION: u16 = 101;
    /// Target VM is dead
    pub const VM_DEAD: u16 = 112;
}
