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

//! Test doubles for driving the engine without a JVM.
//!
//! [`ScriptedTarget`] replays prepared event batches and records every
//! operation the engine performs against it. [`RecordingNotifier`] records
//! what would have been shown to the user and can answer each stop with a
//! prepared command, which keeps event loop tests single-threaded.
//!
//! Both types share their state behind an `Arc`, so a clone kept by the test
//! still observes the instance that was moved into the event loop.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use jdb_common::{Command, FrameSnapshot, StepDepth, VariableSnapshot};
use parking_lot::{Condvar, Mutex};

use crate::{
    CodeLocation, ExecutionController, FrameRef, Location, Notifier, RequestId, Target,
    TargetError, TargetEvent, ThreadId, UnitRef, VariableSlot,
};

#[derive(Debug, Default)]
struct ScriptState {
    batches: VecDeque<Result<Vec<TargetEvent>, TargetError>>,
    lines: HashMap<String, BTreeSet<u32>>,
    loaded: HashMap<String, Vec<UnitRef>>,
    frames: Vec<Option<FrameSnapshot>>,
    variables: Vec<(String, Option<String>)>,

    fail_watch: bool,
    fail_breakpoints: bool,
    fail_step_creation: bool,
    fail_frames: bool,
    fail_variable_table: bool,
    fail_resume: bool,
    fail_dispose: bool,

    next_request: i32,
    watched: Vec<String>,
    breakpoints: Vec<RequestId>,
    live_steps: Vec<RequestId>,
    created_steps: Vec<(RequestId, ThreadId, StepDepth)>,
    cleared_steps: Vec<RequestId>,
    max_live_steps: usize,
    resumes: usize,
    disposals: usize,
    operations: Vec<String>,
}

impl ScriptState {
    fn next_request(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }
}

/// In-memory [`Target`] that replays scripted event batches.
///
/// When the script runs out of batches the target reports a disconnect, so
/// an event loop driven by it always terminates.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTarget {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTarget {
    /// Empty script: no units, no frames, no events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `unit` executable code at `lines`.
    pub fn with_lines(self, unit: &str, lines: &[u32]) -> Self {
        self.state.lock().lines.entry(unit.to_string()).or_default().extend(lines);
        self
    }

    /// Report `unit` as already loaded, with executable code at `lines`.
    pub fn with_loaded_unit(self, unit: UnitRef, lines: &[u32]) -> Self {
        let name = unit.name.clone();
        self.state.lock().loaded.entry(name.clone()).or_default().push(unit);
        self.with_lines(&name, lines)
    }

    /// Append an event batch to the script.
    pub fn with_batch(self, batch: Vec<TargetEvent>) -> Self {
        self.state.lock().batches.push_back(Ok(batch));
        self
    }

    /// Append a batch pull that fails with `error`.
    pub fn with_failing_batch(self, error: TargetError) -> Self {
        self.state.lock().batches.push_back(Err(error));
        self
    }

    /// Frames of every thread, innermost first.
    pub fn with_frames(self, frames: Vec<FrameSnapshot>) -> Self {
        self.state.lock().frames.extend(frames.into_iter().map(Some));
        self
    }

    /// Append a frame that cannot be described.
    pub fn with_broken_frame(self) -> Self {
        self.state.lock().frames.push(None);
        self
    }

    /// Append a readable variable to the top frame.
    pub fn with_variable(self, name: &str, value: &str) -> Self {
        self.state.lock().variables.push((name.to_string(), Some(value.to_string())));
        self
    }

    /// Append a visible variable whose value cannot be read.
    pub fn with_unreadable_variable(self, name: &str) -> Self {
        self.state.lock().variables.push((name.to_string(), None));
        self
    }

    /// Make unit-load watches fail.
    pub fn fail_watch(self) -> Self {
        self.state.lock().fail_watch = true;
        self
    }

    /// Make breakpoint requests fail.
    pub fn fail_breakpoints(self) -> Self {
        self.state.lock().fail_breakpoints = true;
        self
    }

    /// Make step requests fail.
    pub fn fail_step_creation(self) -> Self {
        self.state.lock().fail_step_creation = true;
        self
    }

    /// Make frame listing fail.
    pub fn fail_frames(self) -> Self {
        self.state.lock().fail_frames = true;
        self
    }

    /// Make variable tables absent.
    pub fn fail_variable_table(self) -> Self {
        self.state.lock().fail_variable_table = true;
        self
    }

    /// Make resume fail as if the target went away.
    pub fn fail_resume(self) -> Self {
        self.state.lock().fail_resume = true;
        self
    }

    /// Make dispose fail as if the connection were already closed.
    pub fn fail_dispose(self) -> Self {
        self.state.lock().fail_dispose = true;
        self
    }

    /// Units watched for loads, in order.
    pub fn watched_units(&self) -> Vec<String> {
        self.state.lock().watched.clone()
    }

    /// Requests of armed breakpoints, in order.
    pub fn breakpoint_requests(&self) -> Vec<RequestId> {
        self.state.lock().breakpoints.clone()
    }

    /// Step requests currently enabled.
    pub fn live_steps(&self) -> Vec<RequestId> {
        self.state.lock().live_steps.clone()
    }

    /// Every step request ever created.
    pub fn created_steps(&self) -> Vec<(RequestId, ThreadId, StepDepth)> {
        self.state.lock().created_steps.clone()
    }

    /// Step requests cleared, in order.
    pub fn cleared_steps(&self) -> Vec<RequestId> {
        self.state.lock().cleared_steps.clone()
    }

    /// Highest number of step requests that were ever enabled at once.
    pub fn max_live_steps(&self) -> usize {
        self.state.lock().max_live_steps
    }

    /// Number of resumes.
    pub fn resume_count(&self) -> usize {
        self.state.lock().resumes
    }

    /// Number of disposals.
    pub fn dispose_count(&self) -> usize {
        self.state.lock().disposals
    }

    /// Batches not yet pulled.
    pub fn remaining_batches(&self) -> usize {
        self.state.lock().batches.len()
    }

    /// Log of mutating operations, e.g. `["pull", "arm", "resume"]`.
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().operations.clone()
    }
}

impl Target for ScriptedTarget {
    fn watch_unit(&mut self, unit: &str) -> Result<RequestId, TargetError> {
        let mut state = self.state.lock();
        if state.fail_watch {
            return Err(TargetError::Command { command: "EventRequest.Set", code: 112 });
        }
        state.watched.push(unit.to_string());
        state.operations.push("watch".to_string());
        Ok(state.next_request())
    }

    fn loaded_units(&mut self, unit: &str) -> Result<Vec<UnitRef>, TargetError> {
        Ok(self.state.lock().loaded.get(unit).cloned().unwrap_or_default())
    }

    fn resolve_line(
        &mut self,
        unit: &UnitRef,
        line: u32,
    ) -> Result<Option<CodeLocation>, TargetError> {
        let state = self.state.lock();
        let has_code = state.lines.get(&unit.name).is_some_and(|lines| lines.contains(&line));
        Ok(has_code.then(|| CodeLocation {
            type_tag: 1,
            class_id: unit.id,
            method_id: 1,
            index: u64::from(line),
        }))
    }

    fn set_breakpoint(&mut self, _location: &CodeLocation) -> Result<RequestId, TargetError> {
        let mut state = self.state.lock();
        if state.fail_breakpoints {
            return Err(TargetError::Command { command: "EventRequest.Set", code: 24 });
        }
        let request = state.next_request();
        state.breakpoints.push(request);
        state.operations.push("arm".to_string());
        Ok(request)
    }

    fn create_step(
        &mut self,
        thread: ThreadId,
        depth: StepDepth,
    ) -> Result<RequestId, TargetError> {
        let mut state = self.state.lock();
        if state.fail_step_creation {
            return Err(TargetError::Command { command: "EventRequest.Set", code: 10 });
        }
        let request = state.next_request();
        state.live_steps.push(request);
        state.created_steps.push((request, thread, depth));
        state.max_live_steps = state.max_live_steps.max(state.live_steps.len());
        state.operations.push("step".to_string());
        Ok(request)
    }

    fn clear_step(&mut self, request: RequestId) -> Result<(), TargetError> {
        let mut state = self.state.lock();
        state.live_steps.retain(|live| *live != request);
        state.cleared_steps.push(request);
        state.operations.push("clear-step".to_string());
        Ok(())
    }

    fn next_event_batch(&mut self) -> Result<Vec<TargetEvent>, TargetError> {
        let mut state = self.state.lock();
        state.operations.push("pull".to_string());
        state.batches.pop_front().unwrap_or_else(|| Ok(vec![TargetEvent::Disconnected]))
    }

    fn resume(&mut self) -> Result<(), TargetError> {
        let mut state = self.state.lock();
        if state.fail_resume {
            return Err(TargetError::Disconnected);
        }
        state.resumes += 1;
        state.operations.push("resume".to_string());
        Ok(())
    }

    fn frames(&mut self, _thread: ThreadId) -> Result<Vec<FrameRef>, TargetError> {
        let state = self.state.lock();
        if state.fail_frames {
            return Err(TargetError::Command { command: "ThreadReference.Frames", code: 10 });
        }
        Ok((0..state.frames.len() as u64)
            .map(|depth| FrameRef {
                id: depth,
                code: CodeLocation { method_id: depth, ..Default::default() },
            })
            .collect())
    }

    fn describe(&mut self, code: &CodeLocation) -> Result<Location, TargetError> {
        let state = self.state.lock();
        match state.frames.get(code.method_id as usize) {
            Some(Some(frame)) => Ok(Location {
                unit: frame.unit.clone(),
                method: frame.method.clone(),
                line: frame.line,
                code: *code,
            }),
            _ => Err(TargetError::Command { command: "Method.LineTable", code: 23 }),
        }
    }

    fn visible_variables(&mut self, _frame: &FrameRef) -> Result<Vec<VariableSlot>, TargetError> {
        let state = self.state.lock();
        if state.fail_variable_table {
            return Err(TargetError::Absent("no variable table".to_string()));
        }
        Ok(state
            .variables
            .iter()
            .enumerate()
            .map(|(slot, (name, _))| VariableSlot {
                name: name.clone(),
                signature: "I".to_string(),
                slot: slot as i32,
            })
            .collect())
    }

    fn read_variable(
        &mut self,
        _thread: ThreadId,
        _frame: &FrameRef,
        variable: &VariableSlot,
    ) -> Result<String, TargetError> {
        let state = self.state.lock();
        match state.variables.get(variable.slot as usize) {
            Some((_, Some(value))) => Ok(value.clone()),
            _ => Err(TargetError::Command { command: "StackFrame.GetValues", code: 35 }),
        }
    }

    fn dispose(&mut self) -> Result<(), TargetError> {
        let mut state = self.state.lock();
        state.disposals += 1;
        state.operations.push("dispose".to_string());
        if state.fail_dispose {
            return Err(TargetError::Disconnected);
        }
        Ok(())
    }
}

/// Something the engine asked the user interface to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A line was highlighted.
    Highlight(PathBuf, u32),
    /// Highlights and variable display were cleared.
    ClearHighlights,
    /// Variables were shown.
    Variables(Vec<VariableSnapshot>),
    /// A call stack was shown.
    CallStack(Vec<FrameSnapshot>),
}

#[derive(Debug)]
struct Responder {
    controller: Arc<ExecutionController>,
    commands: Mutex<VecDeque<Command>>,
}

/// [`Notifier`] that records every notification.
#[derive(Debug, Clone)]
pub struct RecordingNotifier {
    shared: Arc<(Mutex<Vec<Notification>>, Condvar)>,
    responder: Option<Arc<Responder>>,
    highlight_result: bool,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingNotifier {
    /// Notifier that accepts every highlight.
    pub fn new() -> Self {
        Self { shared: Arc::default(), responder: None, highlight_result: true }
    }

    /// Answer each stop with the next of `commands` once the call stack is
    /// shown. When the commands run out, stops are answered with
    /// [`Command::None`].
    pub fn answering(
        mut self,
        controller: Arc<ExecutionController>,
        commands: impl IntoIterator<Item = Command>,
    ) -> Self {
        self.responder = Some(Arc::new(Responder {
            controller,
            commands: Mutex::new(commands.into_iter().collect()),
        }));
        self
    }

    /// Report every highlight as failed.
    pub fn rejecting_highlights(mut self) -> Self {
        self.highlight_result = false;
        self
    }

    /// Everything recorded so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.0.lock().clone()
    }

    /// Highlights recorded so far.
    pub fn highlights(&self) -> Vec<(PathBuf, u32)> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Highlight(path, line) => Some((path, line)),
                _ => None,
            })
            .collect()
    }

    /// How many times highlights were cleared.
    pub fn clear_count(&self) -> usize {
        self.notifications().iter().filter(|n| **n == Notification::ClearHighlights).count()
    }

    /// The most recent variable display.
    pub fn last_variables(&self) -> Option<Vec<VariableSnapshot>> {
        self.notifications().into_iter().rev().find_map(|n| match n {
            Notification::Variables(variables) => Some(variables),
            _ => None,
        })
    }

    /// Block until `predicate` holds for the recorded notifications, or
    /// `timeout` elapses. Returns whether the predicate held.
    pub fn wait_for(
        &self,
        predicate: impl Fn(&[Notification]) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, condvar) = &*self.shared;
        let mut recorded = lock.lock();
        loop {
            if predicate(&recorded) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            condvar.wait_for(&mut recorded, deadline - now);
        }
    }

    fn record(&self, notification: Notification) {
        let (lock, condvar) = &*self.shared;
        lock.lock().push(notification);
        condvar.notify_all();
    }
}

impl Notifier for RecordingNotifier {
    fn highlight_line(&mut self, path: &Path, line: u32) -> bool {
        if self.highlight_result {
            self.record(Notification::Highlight(path.to_path_buf(), line));
        }
        self.highlight_result
    }

    fn clear_highlights(&mut self) {
        self.record(Notification::ClearHighlights);
    }

    fn show_variables(&mut self, variables: &[VariableSnapshot]) {
        self.record(Notification::Variables(variables.to_vec()));
    }

    fn show_call_stack(&mut self, frames: &[FrameSnapshot]) {
        self.record(Notification::CallStack(frames.to_vec()));

        if let Some(responder) = &self.responder {
            let command = responder.commands.lock().pop_front().unwrap_or_default();
            responder.controller.send_command(command);
        }
    }
}
