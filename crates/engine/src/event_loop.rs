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

//! The event loop: the session's state machine.
//!
//! The loop pulls one ordered batch of events at a time and handles each in
//! delivery order. A breakpoint hit or completed step stops the loop until
//! a command arrives through the [`ExecutionController`]; a unit load arms
//! pending breakpoints; termination or disconnect ends the session. After a
//! batch is drained, and unless the session ended, the target is resumed.
//!
//! The loop owns the target, the breakpoint registry and the step state, and
//! runs on a single thread, so every operation that mutates the target is
//! issued from that thread.
//!
//! ```text
//!            stop event                 command
//!  Running ─────────────▶ Stopped ─────────────────▶ Running
//!     │                                                 │
//!     └──── terminated / disconnected ──▶ Terminated ◀──┘
//! ```

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use jdb_common::Command;
use tracing::{debug, error, info, warn};

use crate::{
    inspector, BreakpointRegistry, CodeLocation, ExecutionController, GateOutcome, Location,
    Notifier, SessionError, SourceLocator, StepState, Target, TargetEvent, ThreadId,
};

/// State of the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// The target runs; the loop waits for events.
    Running,
    /// The target is suspended at a stop; the loop waits for a command.
    Stopped,
    /// The session is over. Absorbing.
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Where the target last stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopPoint {
    /// Thread that stopped
    pub thread: ThreadId,
    /// Where it stopped
    pub location: Location,
}

/// The session's event loop.
pub struct EventLoop<T, N, L> {
    target: T,
    registry: BreakpointRegistry,
    controller: Arc<ExecutionController>,
    steps: StepState,
    notifier: N,
    locator: L,
    state: LoopState,
    last_stop: Option<StopPoint>,
    finished: Arc<AtomicBool>,
}

impl<T, N, L> fmt::Debug for EventLoop<T, N, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("state", &self.state)
            .field("last_stop", &self.last_stop)
            .field("steps", &self.steps)
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T: Target, N: Notifier, L: SourceLocator> EventLoop<T, N, L> {
    /// Create a loop in the [`LoopState::Running`] state.
    ///
    /// The registry is expected to be prepared already: watches are set up
    /// before the first batch is pulled.
    pub fn new(
        target: T,
        registry: BreakpointRegistry,
        controller: Arc<ExecutionController>,
        notifier: N,
        locator: L,
    ) -> Self {
        Self {
            target,
            registry,
            controller,
            steps: StepState::default(),
            notifier,
            locator,
            state: LoopState::Running,
            last_stop: None,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that becomes `true` once the session is over.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    /// Current state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Breakpoint registry.
    pub fn registry(&self) -> &BreakpointRegistry {
        &self.registry
    }

    /// Step state.
    pub fn steps(&self) -> &StepState {
        &self.steps
    }

    /// Where the target last stopped.
    pub fn last_stop(&self) -> Option<&StopPoint> {
        self.last_stop.as_ref()
    }

    /// Run until the session ends.
    ///
    /// Target termination and disconnect are a normal end. A failure to pull
    /// or resume is reported after the same cleanup.
    pub fn run(&mut self) -> Result<(), SessionError> {
        info!("Event loop started");

        while self.state != LoopState::Terminated {
            let batch = match self.target.next_event_batch() {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Failed to read events from target");
                    self.terminate("event stream failed");
                    return Err(SessionError::Protocol(e));
                }
            };

            self.process_batch(batch);
            if self.state == LoopState::Terminated {
                break;
            }

            if let Err(e) = self.target.resume() {
                if e.is_disconnect() {
                    self.terminate("target went away while resuming");
                    break;
                }
                error!(error = %e, "Failed to resume target");
                self.terminate("resume failed");
                return Err(SessionError::Protocol(e));
            }
        }

        info!("Event loop finished");
        Ok(())
    }

    /// Handle one batch in delivery order. Events after a terminal event are
    /// dropped.
    pub fn process_batch(&mut self, batch: Vec<TargetEvent>) {
        let total = batch.len();
        // A breakpoint and a step completing at the same place arrive together
        let mut stopped_at: Option<(ThreadId, CodeLocation)> = None;

        for (index, event) in batch.into_iter().enumerate() {
            if self.state == LoopState::Terminated {
                debug!(dropped = total - index, "Dropping events after termination");
                return;
            }

            if let TargetEvent::BreakpointHit { thread, location }
            | TargetEvent::StepCompleted { thread, location } = &event
            {
                let key = (*thread, location.code);
                if stopped_at == Some(key) {
                    debug!(%thread, %location, "Coalescing duplicate stop");
                    continue;
                }
                stopped_at = Some(key);
            }

            self.handle_event(event);
        }
    }

    /// Handle a single event.
    pub fn handle_event(&mut self, event: TargetEvent) {
        if self.state == LoopState::Terminated {
            debug!(?event, "Ignoring event after termination");
            return;
        }

        match event {
            TargetEvent::BreakpointHit { thread, location } => {
                info!(%thread, %location, "Breakpoint hit");
                self.stop(thread, location);
            }
            TargetEvent::StepCompleted { thread, location } => {
                info!(%thread, %location, "Step completed");
                self.stop(thread, location);
            }
            TargetEvent::UnitLoaded(unit) => {
                debug!(unit = %unit.name, "Unit loaded");
                self.registry.on_unit_loaded(&mut self.target, &unit);
            }
            TargetEvent::Terminated => self.terminate("target terminated"),
            TargetEvent::Disconnected => self.terminate("target disconnected"),
            TargetEvent::Other(description) => debug!(event = %description, "Ignoring event"),
        }
    }

    fn stop(&mut self, thread: ThreadId, location: Location) {
        self.state = LoopState::Stopped;
        self.last_stop = Some(StopPoint { thread, location: location.clone() });

        // Installed first so a command sent while the stop is being shown
        // still releases it
        let waiter = self.controller.install_gate();

        self.highlight(&location);
        let variables = inspector::snapshot(&mut self.target, thread);
        self.notifier.show_variables(&variables);
        let frames = inspector::call_stack(&mut self.target, thread);
        self.notifier.show_call_stack(&frames);

        if waiter.wait() == GateOutcome::Abandoned {
            debug!("Gate abandoned without a command");
        }
        let command = self.controller.take_command();
        self.apply(command, thread);

        self.state = LoopState::Running;
    }

    fn highlight(&mut self, location: &Location) {
        let Some(path) = self.locator.resolve(&location.unit) else {
            warn!(unit = %location.unit, "No source file found for stop location");
            return;
        };
        let Some(line) = location.line else {
            warn!(%location, "Stop location carries no line information");
            return;
        };
        if !self.notifier.highlight_line(&path, line) {
            warn!(path = %path.display(), line, "Failed to highlight stop line");
        }
    }

    fn apply(&mut self, command: Command, thread: ThreadId) {
        debug!(%command, %thread, "Applying command");
        match command {
            Command::StepInto | Command::StepOver | Command::StepOut => {
                if let Some(depth) = command.step_depth() {
                    self.steps.create_step_request(&mut self.target, thread, depth);
                }
            }
            Command::Continue => {
                self.steps.clear_step_request(&mut self.target);
                self.notifier.clear_highlights();
                self.notifier.show_variables(&[]);
            }
            Command::None => {}
        }
    }

    fn terminate(&mut self, reason: &str) {
        if self.state == LoopState::Terminated {
            return;
        }
        self.state = LoopState::Terminated;
        info!(reason, "Session ending");

        if !self.finished.swap(true, Ordering::SeqCst) {
            self.notifier.clear_highlights();
        }
        if let Err(e) = self.target.dispose() {
            debug!(error = %e, "Dispose failed, target already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{Notification, RecordingNotifier, ScriptedTarget},
        TargetError, UnitRef,
    };
    use jdb_common::{logging::ensure_test_logging, BreakpointSpec, FrameSnapshot, StepDepth};
    use std::{collections::HashMap, path::PathBuf};

    type TestLoop = EventLoop<ScriptedTarget, RecordingNotifier, HashMap<String, PathBuf>>;

    fn location(unit: &str, line: u32) -> Location {
        Location {
            unit: unit.to_string(),
            method: "run".to_string(),
            line: Some(line),
            code: CodeLocation { class_id: 1, method_id: 1, index: u64::from(line), type_tag: 1 },
        }
    }

    fn hit(unit: &str, line: u32) -> TargetEvent {
        TargetEvent::BreakpointHit { thread: ThreadId(1), location: location(unit, line) }
    }

    fn stepped(unit: &str, line: u32) -> TargetEvent {
        TargetEvent::StepCompleted { thread: ThreadId(1), location: location(unit, line) }
    }

    fn sources() -> HashMap<String, PathBuf> {
        HashMap::from([("a.Main".to_string(), PathBuf::from("/src/a/Main.java"))])
    }

    fn build(
        target: &ScriptedTarget,
        breakpoints: &[(&str, u32)],
        commands: Vec<Command>,
    ) -> (TestLoop, RecordingNotifier) {
        ensure_test_logging(None);
        let controller = Arc::new(ExecutionController::new());
        let notifier = RecordingNotifier::new().answering(Arc::clone(&controller), commands);
        let mut target = target.clone();
        let mut registry = BreakpointRegistry::new(
            breakpoints.iter().map(|(unit, line)| BreakpointSpec::new(*unit, *line)),
        );
        registry.prepare(&mut target).unwrap();

        let event_loop = EventLoop::new(target, registry, controller, notifier.clone(), sources());
        (event_loop, notifier)
    }

    #[test]
    fn test_starts_running() {
        let (event_loop, _) = build(&ScriptedTarget::new(), &[], vec![]);
        assert_eq!(event_loop.state(), LoopState::Running);
        assert!(!event_loop.finished_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_shows_state_and_resumes_after_batch() {
        let target = ScriptedTarget::new()
            .with_frames(vec![FrameSnapshot {
                unit: "a.Main".to_string(),
                method: "run".to_string(),
                line: Some(10),
            }])
            .with_variable("x", "42")
            .with_batch(vec![hit("a.Main", 10)]);
        let (mut event_loop, notifier) = build(&target, &[], vec![Command::None]);

        event_loop.run().unwrap();

        let notifications = notifier.notifications();
        assert_eq!(notifications[0], Notification::Highlight(PathBuf::from("/src/a/Main.java"), 10));
        assert_eq!(
            notifications[1],
            Notification::Variables(vec![jdb_common::VariableSnapshot::new("x", "42")])
        );
        assert!(matches!(notifications[2], Notification::CallStack(ref frames) if frames.len() == 1));
        assert_eq!(event_loop.last_stop().unwrap().location.line, Some(10));
        assert_eq!(target.operations(), vec!["pull", "resume", "pull", "dispose"]);
    }

    #[test]
    fn test_unknown_source_still_stops() {
        let target = ScriptedTarget::new().with_batch(vec![hit("b.Elsewhere", 3)]);
        let (mut event_loop, notifier) = build(&target, &[], vec![Command::Continue]);

        event_loop.run().unwrap();

        assert!(notifier.highlights().is_empty());
        assert!(notifier
            .notifications()
            .iter()
            .any(|n| matches!(n, Notification::CallStack(_))));
        assert_eq!(event_loop.last_stop().unwrap().location.unit, "b.Elsewhere");
    }

    #[test]
    fn test_rejected_highlight_still_stops() {
        ensure_test_logging(None);
        let controller = Arc::new(ExecutionController::new());
        let notifier = RecordingNotifier::new()
            .rejecting_highlights()
            .answering(Arc::clone(&controller), [Command::Continue]);
        let target = ScriptedTarget::new().with_batch(vec![hit("a.Main", 4)]);
        let mut event_loop = EventLoop::new(
            target.clone(),
            BreakpointRegistry::default(),
            controller,
            notifier.clone(),
            sources(),
        );

        event_loop.run().unwrap();

        assert!(notifier.highlights().is_empty());
        assert_eq!(target.resume_count(), 1);
    }

    #[test]
    fn test_no_dangling_watches() {
        // A breakpoint whose unit never loads is never referenced
        let target = ScriptedTarget::new()
            .with_lines("a.Main", &[10])
            .with_lines("b.Never", &[1])
            .with_batch(vec![TargetEvent::UnitLoaded(UnitRef::new("a.Main", 1))])
            .with_batch(vec![hit("a.Main", 10)])
            .with_batch(vec![TargetEvent::Terminated]);
        let (mut event_loop, _) =
            build(&target, &[("a.Main", 10), ("b.Never", 1)], vec![Command::Continue]);

        event_loop.run().unwrap();

        assert_eq!(target.breakpoint_requests().len(), 1);
        assert!(event_loop.registry().is_armed("a.Main", 10));
        assert!(!event_loop.registry().is_armed("b.Never", 1));
        assert!(!event_loop.registry().is_loaded("b.Never"));
        assert_eq!(event_loop.registry().pending(), vec![&BreakpointSpec::new("b.Never", 1)]);
        assert!(target.created_steps().is_empty());
        assert_eq!(event_loop.state(), LoopState::Terminated);
        assert!(event_loop.finished_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn test_single_step_request() {
        let target = ScriptedTarget::new()
            .with_batch(vec![hit("a.Main", 10)])
            .with_batch(vec![stepped("a.Main", 11)])
            .with_batch(vec![stepped("a.Main", 12)])
            .with_batch(vec![stepped("a.Main", 20)])
            .with_batch(vec![TargetEvent::Terminated]);
        let (mut event_loop, _) = build(
            &target,
            &[],
            vec![Command::StepOver, Command::StepInto, Command::StepOut, Command::StepOver],
        );

        event_loop.run().unwrap();

        let created = target.created_steps();
        let depths: Vec<_> = created.iter().map(|(_, _, depth)| *depth).collect();
        assert_eq!(depths, vec![StepDepth::Over, StepDepth::Into, StepDepth::Out, StepDepth::Over]);
        assert_eq!(target.max_live_steps(), 1);
        assert_eq!(target.live_steps().len(), 1);

        // Each new step cleared its predecessor before being created
        let requests: Vec<_> = created.iter().map(|(request, _, _)| *request).collect();
        assert_eq!(target.cleared_steps(), requests[..3].to_vec());
        let ops = target.operations();
        let steps_and_clears: Vec<_> =
            ops.iter().filter(|op| *op == "step" || *op == "clear-step").collect();
        assert_eq!(
            steps_and_clears,
            vec!["step", "clear-step", "step", "clear-step", "step", "clear-step", "step"]
        );
    }

    #[test]
    fn test_continue_clears_stepping() {
        let target = ScriptedTarget::new()
            .with_variable("i", "0")
            .with_batch(vec![hit("a.Main", 10)])
            .with_batch(vec![stepped("a.Main", 11)]);
        let (mut event_loop, notifier) =
            build(&target, &[], vec![Command::StepOver, Command::Continue]);

        event_loop.handle_event(hit("a.Main", 10));
        assert!(event_loop.steps().active().is_some());
        assert_eq!(target.live_steps().len(), 1);

        event_loop.handle_event(stepped("a.Main", 11));
        assert_eq!(event_loop.steps().active(), None);
        assert!(target.live_steps().is_empty());
        assert_eq!(notifier.last_variables(), Some(vec![]));
        assert_eq!(notifier.notifications().last(), Some(&Notification::Variables(vec![])));
        assert_eq!(notifier.clear_count(), 1);
        assert_eq!(event_loop.state(), LoopState::Running);
    }

    #[test]
    fn test_arming_precedes_hit() {
        let target = ScriptedTarget::new().with_lines("A", &[10]);
        let (mut event_loop, _) = build(&target, &[("A", 10)], vec![Command::Continue]);
        assert!(!event_loop.registry().is_armed("A", 10));

        event_loop.handle_event(TargetEvent::UnitLoaded(UnitRef::new("A", 7)));
        assert!(event_loop.registry().is_armed("A", 10));
        assert_eq!(target.operations().last().map(String::as_str), Some("arm"));

        event_loop.handle_event(hit("A", 10));
        assert_eq!(event_loop.last_stop().unwrap().location.unit, "A");
    }

    #[test]
    fn test_arming_precedes_hit_in_one_batch() {
        let target = ScriptedTarget::new()
            .with_lines("A", &[10])
            .with_batch(vec![TargetEvent::UnitLoaded(UnitRef::new("A", 7)), hit("A", 10)]);
        let (mut event_loop, notifier) = build(&target, &[("A", 10)], vec![Command::Continue]);

        event_loop.run().unwrap();

        let ops = target.operations();
        let arm = ops.iter().position(|op| op == "arm").unwrap();
        let resume = ops.iter().position(|op| op == "resume").unwrap();
        assert!(arm < resume);
        assert!(notifier.notifications().iter().any(|n| matches!(n, Notification::CallStack(_))));
    }

    #[test]
    fn test_terminal_idempotence() {
        let target = ScriptedTarget::new().with_lines("a.Main", &[3]).with_batch(vec![
            TargetEvent::Terminated,
            hit("a.Main", 3),
            TargetEvent::UnitLoaded(UnitRef::new("a.Main", 1)),
            TargetEvent::Disconnected,
        ]);
        let (mut event_loop, notifier) = build(&target, &[("a.Main", 3)], vec![]);
        let finished = event_loop.finished_flag();

        event_loop.run().unwrap();

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(notifier.clear_count(), 1);
        assert_eq!(notifier.notifications(), vec![Notification::ClearHighlights]);
        assert!(event_loop.last_stop().is_none());
        assert!(!event_loop.registry().is_loaded("a.Main"));
        assert_eq!(target.dispose_count(), 1);
        assert_eq!(target.resume_count(), 0);

        // Absorbing
        event_loop.handle_event(TargetEvent::Terminated);
        event_loop.handle_event(hit("a.Main", 3));
        assert_eq!(event_loop.state(), LoopState::Terminated);
        assert_eq!(notifier.clear_count(), 1);
        assert_eq!(target.dispose_count(), 1);
    }

    #[test]
    fn test_partial_failure_is_not_fatal() {
        let target = ScriptedTarget::new()
            .with_lines("a.Main", &[5, 12])
            .with_batch(vec![TargetEvent::UnitLoaded(UnitRef::new("a.Main", 1))])
            .with_batch(vec![hit("a.Main", 12)])
            .with_batch(vec![TargetEvent::Terminated]);
        let (mut event_loop, notifier) =
            build(&target, &[("a.Main", 5), ("a.Main", 7), ("a.Main", 12)], vec![Command::Continue]);

        event_loop.run().unwrap();

        assert!(event_loop.registry().is_armed("a.Main", 5));
        assert!(event_loop.registry().is_armed("a.Main", 12));
        assert!(!event_loop.registry().is_armed("a.Main", 7));
        assert_eq!(notifier.highlights(), vec![(PathBuf::from("/src/a/Main.java"), 12)]);
        assert_eq!(event_loop.state(), LoopState::Terminated);
    }

    #[test]
    fn test_duplicate_stop_in_batch_is_coalesced() {
        let target = ScriptedTarget::new()
            .with_batch(vec![stepped("a.Main", 10), hit("a.Main", 10)]);
        let (mut event_loop, notifier) = build(&target, &[], vec![Command::Continue]);

        event_loop.run().unwrap();

        assert_eq!(notifier.highlights().len(), 1);
    }

    #[test]
    fn test_other_events_are_ignored() {
        let target = ScriptedTarget::new()
            .with_batch(vec![TargetEvent::Other("thread started".to_string())])
            .with_batch(vec![TargetEvent::Terminated]);
        let (mut event_loop, notifier) = build(&target, &[], vec![]);

        event_loop.run().unwrap();

        assert_eq!(target.resume_count(), 1);
        assert_eq!(notifier.notifications(), vec![Notification::ClearHighlights]);
    }

    #[test]
    fn test_event_stream_failure_cleans_up() {
        let target =
            ScriptedTarget::new().with_failing_batch(TargetError::Protocol("truncated".into()));
        let (mut event_loop, notifier) = build(&target, &[], vec![]);

        let result = event_loop.run();

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(event_loop.state(), LoopState::Terminated);
        assert_eq!(notifier.clear_count(), 1);
        assert_eq!(target.dispose_count(), 1);
    }

    #[test]
    fn test_disconnect_while_resuming_is_normal() {
        let target = ScriptedTarget::new()
            .fail_resume()
            .with_batch(vec![TargetEvent::Other("vm start".to_string())]);
        let (mut event_loop, notifier) = build(&target, &[], vec![]);

        event_loop.run().unwrap();

        assert_eq!(event_loop.state(), LoopState::Terminated);
        assert_eq!(notifier.clear_count(), 1);
        assert_eq!(target.remaining_batches(), 0);
    }
}
