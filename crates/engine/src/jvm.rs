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

//! JVM target: the [`Target`] capability implemented over JDWP.
//!
//! This is the Target Connector. [`JvmTarget::attach`] opens the connection;
//! the rest of the type translates the engine's operations into JDWP commands
//! and the target's events into [`TargetEvent`]s. Reference-type signatures,
//! method lists, line tables and variable tables never change once a class is
//! prepared, so they are cached for the lifetime of the session.

use std::{collections::HashMap, time::Duration};

use jdb_common::StepDepth;
use tracing::{debug, info, warn};

use crate::{
    jdwp::{
        constants::{
            array_commands, command_sets, error_codes, event_kinds, event_request_commands,
            method_commands, modifier_kinds, object_commands, reference_type_commands,
            stack_frame_commands, step_depths, step_sizes, string_commands, suspend_policy,
            thread_commands, vm_commands,
        },
        signature_to_name, tag_for_signature, tags, unit_signature, JdwpConnection, JdwpEvent,
        PacketReader, Value,
    },
    CodeLocation, FrameRef, Location, RequestId, Target, TargetError, TargetEvent, ThreadId,
    UnitRef, VariableSlot,
};

/// Class status bit set once a class is prepared.
const CLASS_STATUS_PREPARED: i32 = 2;

#[derive(Debug, Clone)]
struct MethodInfo {
    id: u64,
    name: String,
}

/// Line table of one method, sorted by code index.
#[derive(Debug, Clone, Default)]
struct LineTable {
    entries: Vec<(u64, u32)>,
}

impl LineTable {
    fn first_index_of(&self, line: u32) -> Option<u64> {
        self.entries.iter().filter(|(_, l)| *l == line).map(|(index, _)| *index).min()
    }

    fn line_at(&self, index: u64) -> Option<u32> {
        self.entries.iter().take_while(|(start, _)| *start <= index).last().map(|(_, line)| *line)
    }
}

#[derive(Debug, Clone)]
struct VariableEntry {
    code_index: u64,
    length: u64,
    name: String,
    signature: String,
    slot: i32,
}

/// A JVM attached over JDWP.
#[derive(Debug)]
pub struct JvmTarget {
    connection: JdwpConnection,
    type_names: HashMap<u64, String>,
    methods: HashMap<u64, Vec<MethodInfo>>,
    line_tables: HashMap<(u64, u64), Option<LineTable>>,
    variable_tables: HashMap<(u64, u64), Vec<VariableEntry>>,
}

impl JvmTarget {
    /// Attach to the JVM listening at `host:port`.
    ///
    /// There is no retry: a failure here is terminal for the attempt.
    pub fn attach(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self, TargetError> {
        let mut connection = JdwpConnection::connect(host, port, timeout)?;

        match connection.version() {
            Ok(version) => info!(
                endpoint = %connection.endpoint(),
                vm = %version.vm_name,
                version = %version.vm_version,
                jdwp = %format!("{}.{}", version.jdwp_major, version.jdwp_minor),
                "Attached to target VM"
            ),
            Err(e) => warn!(
                endpoint = %connection.endpoint(),
                error = %e,
                "Attached, but the target did not report its version"
            ),
        }

        Ok(Self::from_connection(connection))
    }

    /// Wrap an already established connection.
    pub fn from_connection(connection: JdwpConnection) -> Self {
        Self {
            connection,
            type_names: HashMap::new(),
            methods: HashMap::new(),
            line_tables: HashMap::new(),
            variable_tables: HashMap::new(),
        }
    }

    fn request(
        &mut self,
        command_set: u8,
        command: u8,
        name: &'static str,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, TargetError> {
        self.connection.request(command_set, command, name, data)
    }

    fn set_event_request(
        &mut self,
        event_kind: u8,
        modifiers: Vec<u8>,
        modifier_count: i32,
    ) -> Result<RequestId, TargetError> {
        let mut data = self
            .connection
            .writer()
            .u8(event_kind)
            .u8(suspend_policy::ALL)
            .i32(modifier_count)
            .finish();
        data.extend_from_slice(&modifiers);

        let reply = self.request(
            command_sets::EVENT_REQUEST,
            event_request_commands::SET,
            "EventRequest.Set",
            data,
        )?;
        let mut reader = PacketReader::new(self.connection.id_sizes(), &reply);
        Ok(RequestId(reader.i32()?))
    }

    fn type_name(&mut self, type_id: u64) -> Result<String, TargetError> {
        if let Some(name) = self.type_names.get(&type_id) {
            return Ok(name.clone());
        }

        let data = self.connection.writer().reference_type_id(type_id).finish();
        let reply = self.request(
            command_sets::REFERENCE_TYPE,
            reference_type_commands::SIGNATURE,
            "ReferenceType.Signature",
            data,
        )?;
        let signature = PacketReader::new(self.connection.id_sizes(), &reply).string()?;

        let name = signature_to_name(&signature);
        self.type_names.insert(type_id, name.clone());
        Ok(name)
    }

    fn methods_of(&mut self, type_id: u64) -> Result<Vec<MethodInfo>, TargetError> {
        if let Some(methods) = self.methods.get(&type_id) {
            return Ok(methods.clone());
        }

        let data = self.connection.writer().reference_type_id(type_id).finish();
        let reply = self.request(
            command_sets::REFERENCE_TYPE,
            reference_type_commands::METHODS,
            "ReferenceType.Methods",
            data,
        )?;

        let mut reader = PacketReader::new(self.connection.id_sizes(), &reply);
        let count = reader.count()?;
        let mut methods = Vec::with_capacity(count);
        for _ in 0..count {
            let id = reader.method_id()?;
            let name = reader.string()?;
            let _signature = reader.string()?;
            let _modifiers = reader.i32()?;
            methods.push(MethodInfo { id, name });
        }

        self.methods.insert(type_id, methods.clone());
        Ok(methods)
    }

    /// `Ok(None)` when the method has no line information.
    fn line_table(
        &mut self,
        type_id: u64,
        method_id: u64,
    ) -> Result<Option<LineTable>, TargetError> {
        if let Some(table) = self.line_tables.get(&(type_id, method_id)) {
            return Ok(table.clone());
        }

        let data =
            self.connection.writer().reference_type_id(type_id).method_id(method_id).finish();
        let table = match self.request(
            command_sets::METHOD,
            method_commands::LINE_TABLE,
            "Method.LineTable",
            data,
        ) {
            Ok(reply) => {
                let mut reader = PacketReader::new(self.connection.id_sizes(), &reply);
                let _start = reader.i64()?;
                let _end = reader.i64()?;
                let count = reader.count()?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let index = reader.u64()?;
                    let line = reader.i32()?;
                    if let Ok(line) = u32::try_from(line) {
                        entries.push((index, line));
                    }
                }
                entries.sort_unstable();
                Some(LineTable { entries })
            }
            Err(TargetError::Command { code: error_codes::ABSENT_INFORMATION, .. }) => None,
            Err(e) => return Err(e),
        };

        self.line_tables.insert((type_id, method_id), table.clone());
        Ok(table)
    }

    fn variable_table(
        &mut self,
        type_id: u64,
        method_id: u64,
    ) -> Result<Vec<VariableEntry>, TargetError> {
        if let Some(table) = self.variable_tables.get(&(type_id, method_id)) {
            return Ok(table.clone());
        }

        let data =
            self.connection.writer().reference_type_id(type_id).method_id(method_id).finish();
        let reply = match self.request(
            command_sets::METHOD,
            method_commands::VARIABLE_TABLE,
            "Method.VariableTable",
            data,
        ) {
            Ok(reply) => reply,
            Err(TargetError::Command { code: error_codes::ABSENT_INFORMATION, .. }) => {
                return Err(TargetError::Absent(
                    "method has no variable table (compiled without -g)".to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        let mut reader = PacketReader::new(self.connection.id_sizes(), &reply);
        let _arg_count = reader.i32()?;
        let count = reader.count()?;
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            table.push(VariableEntry {
                code_index: reader.u64()?,
                name: reader.string()?,
                signature: reader.string()?,
                length: u64::from(reader.i32()? as u32),
                slot: reader.i32()?,
            });
        }

        self.variable_tables.insert((type_id, method_id), table.clone());
        Ok(table)
    }

    /// Describe a location, falling back to placeholders when the target
    /// cannot tell us where it is. The stop still happens either way.
    fn describe_or_placeholder(&mut self, code: &CodeLocation) -> Location {
        match self.describe(code) {
            Ok(location) => location,
            Err(e) => {
                warn!(error = %e, class = code.class_id, "Failed to describe event location");
                Location {
                    unit: format!("<class {:#x}>", code.class_id),
                    method: "<unknown>".to_string(),
                    line: None,
                    code: *code,
                }
            }
        }
    }

    fn translate(&mut self, event: JdwpEvent) -> TargetEvent {
        match event {
            JdwpEvent::VmStart { thread, .. } => {
                TargetEvent::Other(format!("VM started on thread {thread:#x}"))
            }
            JdwpEvent::VmDeath { .. } => TargetEvent::Terminated,
            JdwpEvent::SingleStep { thread, location, .. } => TargetEvent::StepCompleted {
                thread: ThreadId(thread),
                location: self.describe_or_placeholder(&location),
            },
            JdwpEvent::Breakpoint { thread, location, .. } => TargetEvent::BreakpointHit {
                thread: ThreadId(thread),
                location: self.describe_or_placeholder(&location),
            },
            JdwpEvent::ClassPrepare { type_id, signature, .. } => {
                let name = signature_to_name(&signature);
                self.type_names.insert(type_id, name.clone());
                TargetEvent::UnitLoaded(UnitRef::new(name, type_id))
            }
            JdwpEvent::ClassUnload { signature, .. } => {
                TargetEvent::Other(format!("unit {} unloaded", signature_to_name(&signature)))
            }
            JdwpEvent::ThreadStart { thread, .. } => {
                TargetEvent::Other(format!("thread {thread:#x} started"))
            }
            JdwpEvent::ThreadDeath { thread, .. } => {
                TargetEvent::Other(format!("thread {thread:#x} ended"))
            }
            JdwpEvent::Unsupported { kind, .. } => {
                TargetEvent::Other(format!("unsupported event kind {kind}"))
            }
        }
    }

    fn render(&mut self, value: Value) -> Result<String, TargetError> {
        if let Some(rendered) = value.render_primitive() {
            return Ok(rendered);
        }
        let Value::Object { tag, id } = value else {
            return Err(TargetError::Protocol(format!("cannot render {value:?}")));
        };

        if tag == tags::STRING {
            let data = self.connection.writer().object_id(id).finish();
            let reply = self.request(
                command_sets::STRING_REFERENCE,
                string_commands::VALUE,
                "StringReference.Value",
                data,
            )?;
            let text = PacketReader::new(self.connection.id_sizes(), &reply).string()?;
            return Ok(format!("{text:?}"));
        }

        let data = self.connection.writer().object_id(id).finish();
        let reply = self.request(
            command_sets::OBJECT_REFERENCE,
            object_commands::REFERENCE_TYPE,
            "ObjectReference.ReferenceType",
            data,
        )?;
        let mut reader = PacketReader::new(self.connection.id_sizes(), &reply);
        let _type_tag = reader.u8()?;
        let type_id = reader.reference_type_id()?;
        let mut type_name = self.type_name(type_id)?;

        if tag == tags::ARRAY {
            let data = self.connection.writer().object_id(id).finish();
            let reply = self.request(
                command_sets::ARRAY_REFERENCE,
                array_commands::LENGTH,
                "ArrayReference.Length",
                data,
            )?;
            let length = PacketReader::new(self.connection.id_sizes(), &reply).i32()?;
            if let Some(element) = type_name.strip_suffix("[]").map(str::to_string) {
                type_name = format!("{element}[{length}]");
            }
        }

        Ok(format!("instance of {type_name}(id={id})"))
    }
}

impl Target for JvmTarget {
    fn watch_unit(&mut self, unit: &str) -> Result<RequestId, TargetError> {
        let modifiers =
            self.connection.writer().u8(modifier_kinds::CLASS_MATCH).string(unit).finish();
        let request = self.set_event_request(event_kinds::CLASS_PREPARE, modifiers, 1)?;
        debug!(unit, %request, "Watching unit loads");
        Ok(request)
    }

    fn loaded_units(&mut self, unit: &str) -> Result<Vec<UnitRef>, TargetError> {
        let data = self.connection.writer().string(&unit_signature(unit)).finish();
        let reply = self.request(
            command_sets::VIRTUAL_MACHINE,
            vm_commands::CLASSES_BY_SIGNATURE,
            "VirtualMachine.ClassesBySignature",
            data,
        )?;

        let mut reader = PacketReader::new(self.connection.id_sizes(), &reply);
        let count = reader.count()?;
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            let _type_tag = reader.u8()?;
            let type_id = reader.reference_type_id()?;
            let status = reader.i32()?;
            if status & CLASS_STATUS_PREPARED != 0 {
                self.type_names.insert(type_id, unit.to_string());
                units.push(UnitRef::new(unit, type_id));
            }
        }
        Ok(units)
    }

    fn resolve_line(
        &mut self,
        unit: &UnitRef,
        line: u32,
    ) -> Result<Option<CodeLocation>, TargetError> {
        for method in self.methods_of(unit.id)? {
            let Some(table) = self.line_table(unit.id, method.id)? else {
                continue;
            };
            if let Some(index) = table.first_index_of(line) {
                return Ok(Some(CodeLocation {
                    type_tag: crate::jdwp::constants::type_tags::CLASS,
                    class_id: unit.id,
                    method_id: method.id,
                    index,
                }));
            }
        }
        Ok(None)
    }

    fn set_breakpoint(&mut self, location: &CodeLocation) -> Result<RequestId, TargetError> {
        let modifiers =
            self.connection.writer().u8(modifier_kinds::LOCATION_ONLY).location(location).finish();
        self.set_event_request(event_kinds::BREAKPOINT, modifiers, 1)
    }

    fn create_step(
        &mut self,
        thread: ThreadId,
        depth: StepDepth,
    ) -> Result<RequestId, TargetError> {
        let depth = match depth {
            StepDepth::Into => step_depths::INTO,
            StepDepth::Over => step_depths::OVER,
            StepDepth::Out => step_depths::OUT,
        };
        let modifiers = self
            .connection
            .writer()
            .u8(modifier_kinds::STEP)
            .object_id(thread.0)
            .i32(step_sizes::LINE)
            .i32(depth)
            .finish();
        self.set_event_request(event_kinds::SINGLE_STEP, modifiers, 1)
    }

    fn clear_step(&mut self, request: RequestId) -> Result<(), TargetError> {
        let data = self.connection.writer().u8(event_kinds::SINGLE_STEP).i32(request.0).finish();
        self.request(
            command_sets::EVENT_REQUEST,
            event_request_commands::CLEAR,
            "EventRequest.Clear",
            data,
        )?;
        Ok(())
    }

    fn next_event_batch(&mut self) -> Result<Vec<TargetEvent>, TargetError> {
        let set = match self.connection.next_event_set() {
            Ok(set) => set,
            Err(e) if e.is_disconnect() => return Ok(vec![TargetEvent::Disconnected]),
            Err(TargetError::MalformedEvents(reason)) => {
                warn!(%reason, "Skipping undecodable event set");
                return Ok(vec![TargetEvent::Other(format!("malformed event set: {reason}"))]);
            }
            Err(e) => return Err(e),
        };

        debug!(policy = set.suspend_policy, events = set.events.len(), "Received event set");
        let mut batch = Vec::with_capacity(set.events.len());
        for event in set.events {
            batch.push(self.translate(event));
        }
        Ok(batch)
    }

    fn resume(&mut self) -> Result<(), TargetError> {
        self.request(
            command_sets::VIRTUAL_MACHINE,
            vm_commands::RESUME,
            "VirtualMachine.Resume",
            Vec::new(),
        )?;
        Ok(())
    }

    fn frames(&mut self, thread: ThreadId) -> Result<Vec<FrameRef>, TargetError> {
        let data = self.connection.writer().object_id(thread.0).i32(0).i32(-1).finish();
        let reply = self.request(
            command_sets::THREAD_REFERENCE,
            thread_commands::FRAMES,
            "ThreadReference.Frames",
            data,
        )?;

        let mut reader = PacketReader::new(self.connection.id_sizes(), &reply);
        let count = reader.count()?;
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(FrameRef { id: reader.frame_id()?, code: reader.location()? });
        }
        Ok(frames)
    }

    fn describe(&mut self, code: &CodeLocation) -> Result<Location, TargetError> {
        let unit = self.type_name(code.class_id)?;
        let method = self
            .methods_of(code.class_id)?
            .into_iter()
            .find(|m| m.id == code.method_id)
            .map(|m| m.name)
            .unwrap_or_else(|| "<unknown>".to_string());
        let line = self
            .line_table(code.class_id, code.method_id)?
            .and_then(|table| table.line_at(code.index));

        Ok(Location { unit, method, line, code: *code })
    }

    fn visible_variables(&mut self, frame: &FrameRef) -> Result<Vec<VariableSlot>, TargetError> {
        let table = self.variable_table(frame.code.class_id, frame.code.method_id)?;
        let index = frame.code.index;

        Ok(table
            .into_iter()
            .filter(|v| v.code_index <= index && index < v.code_index.saturating_add(v.length))
            .map(|v| VariableSlot { name: v.name, signature: v.signature, slot: v.slot })
            .collect())
    }

    fn read_variable(
        &mut self,
        thread: ThreadId,
        frame: &FrameRef,
        variable: &VariableSlot,
    ) -> Result<String, TargetError> {
        let data = self
            .connection
            .writer()
            .object_id(thread.0)
            .frame_id(frame.id)
            .i32(1)
            .i32(variable.slot)
            .u8(tag_for_signature(&variable.signature))
            .finish();
        let reply = self.request(
            command_sets::STACK_FRAME,
            stack_frame_commands::GET_VALUES,
            "StackFrame.GetValues",
            data,
        )?;

        let mut reader = PacketReader::new(self.connection.id_sizes(), &reply);
        if reader.count()? != 1 {
            return Err(TargetError::Protocol("expected exactly one value".to_string()));
        }
        let value = Value::read_tagged(&mut reader)?;
        self.render(value)
    }

    fn dispose(&mut self) -> Result<(), TargetError> {
        self.connection.dispose()
    }
}
