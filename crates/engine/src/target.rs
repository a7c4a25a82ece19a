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

//! The narrow capability the engine needs from a debug target.
//!
//! [`Target`] exposes only the event kinds and operations the event loop
//! consumes. Everything else the wire protocol can report is folded into
//! [`TargetEvent::Other`] at the boundary. The JDWP implementation lives in
//! [`crate::jvm`]; tests drive the engine through a scripted implementation.

use std::fmt::Display;

use jdb_common::StepDepth;

use crate::{jdwp::JdwpLocation, TargetError};

/// Identifier of a thread in the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Identifier of an event request (breakpoint, step, unit-load watch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub i32);

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// A loaded unit in the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UnitRef {
    /// Fully-qualified unit name, e.g. `com.example.Main`
    pub name: String,
    /// Target-side identity of the unit; opaque to the engine
    pub id: u64,
}

impl UnitRef {
    /// Create a new unit reference.
    pub fn new(name: impl Into<String>, id: u64) -> Self {
        Self { name: name.into(), id }
    }
}

/// Opaque executable location, as the target understands it.
pub type CodeLocation = JdwpLocation;

/// A described location: where a thread is, in source terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Unit the location belongs to
    pub unit: String,
    /// Method the location belongs to
    pub method: String,
    /// Source line, when the unit carries line information
    pub line: Option<u32>,
    /// Raw location
    pub code: CodeLocation,
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}.{}:{line}", self.unit, self.method),
            None => write!(f, "{}.{}", self.unit, self.method),
        }
    }
}

/// A stack frame of a suspended thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRef {
    /// Target-side frame identity, only valid while the thread stays suspended
    pub id: u64,
    /// Where the frame is executing
    pub code: CodeLocation,
}

/// A variable visible in a frame, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSlot {
    /// Declared name
    pub name: String,
    /// Declared type signature
    pub signature: String,
    /// Slot index within the frame
    pub slot: i32,
}

/// Event kinds the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    /// A watched unit finished loading.
    UnitLoaded(UnitRef),
    /// A thread hit an armed breakpoint.
    BreakpointHit {
        /// Thread that stopped
        thread: ThreadId,
        /// Where it stopped
        location: Location,
    },
    /// A step request completed.
    StepCompleted {
        /// Thread that stopped
        thread: ThreadId,
        /// Where it stopped
        location: Location,
    },
    /// The target process is terminating.
    Terminated,
    /// The connection to the target was lost.
    Disconnected,
    /// Anything else; logged and ignored by the event loop.
    Other(String),
}

/// Operations the engine performs against a target.
///
/// All of these mutate or query the target, so they are only ever called
/// from the thread that owns the session (the event loop thread, or the
/// caller during setup before the loop starts).
pub trait Target {
    /// Ask to be told when `unit` loads.
    fn watch_unit(&mut self, unit: &str) -> Result<RequestId, TargetError>;

    /// Instances of `unit` that are already loaded.
    fn loaded_units(&mut self, unit: &str) -> Result<Vec<UnitRef>, TargetError>;

    /// First executable location of `line` in `unit`, if the line has code.
    fn resolve_line(
        &mut self,
        unit: &UnitRef,
        line: u32,
    ) -> Result<Option<CodeLocation>, TargetError>;

    /// Enable a breakpoint at `location`.
    fn set_breakpoint(&mut self, location: &CodeLocation) -> Result<RequestId, TargetError>;

    /// Enable a single-line step request on `thread`.
    fn create_step(&mut self, thread: ThreadId, depth: StepDepth)
        -> Result<RequestId, TargetError>;

    /// Disable and delete a step request.
    fn clear_step(&mut self, request: RequestId) -> Result<(), TargetError>;

    /// Block until the next ordered batch of events arrives.
    fn next_event_batch(&mut self) -> Result<Vec<TargetEvent>, TargetError>;

    /// Resume the whole target.
    fn resume(&mut self) -> Result<(), TargetError>;

    /// Frames of a suspended thread, innermost first.
    fn frames(&mut self, thread: ThreadId) -> Result<Vec<FrameRef>, TargetError>;

    /// Describe a raw location in source terms.
    fn describe(&mut self, code: &CodeLocation) -> Result<Location, TargetError>;

    /// Variables visible at the frame's current location.
    fn visible_variables(&mut self, frame: &FrameRef) -> Result<Vec<VariableSlot>, TargetError>;

    /// Read and render one variable.
    fn read_variable(
        &mut self,
        thread: ThreadId,
        frame: &FrameRef,
        variable: &VariableSlot,
    ) -> Result<String, TargetError>;

    /// Release protocol resources. Called once, at session end.
    fn dispose(&mut self) -> Result<(), TargetError>;
}
