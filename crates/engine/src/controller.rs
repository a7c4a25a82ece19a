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

//! Execution controller: how commands get from the user to a stopped target.
//!
//! The controller is the only piece of session state shared across threads.
//! A user-facing thread calls [`ExecutionController::send_command`]; the event
//! loop installs a gate at every stop, parks on it, and takes the command once
//! released.
//!
//! The mailbox holds a single command. Two sends before the loop consumes one
//! collapse into the later of the two. A command sent while the target is
//! running is kept and releases the next stop immediately.

use std::sync::atomic::{AtomicU8, Ordering};

use jdb_common::{Command, StepDepth};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{gate, GateSignal, GateWaiter, RequestId, Target, ThreadId};

const EMPTY: u8 = 0;

fn encode(command: Command) -> u8 {
    match command {
        Command::None => EMPTY,
        Command::StepInto => 1,
        Command::StepOver => 2,
        Command::StepOut => 3,
        Command::Continue => 4,
    }
}

fn decode(slot: u8) -> Command {
    match slot {
        1 => Command::StepInto,
        2 => Command::StepOver,
        3 => Command::StepOut,
        4 => Command::Continue,
        _ => Command::None,
    }
}

/// Shared handle through which commands reach the event loop.
#[derive(Debug, Default)]
pub struct ExecutionController {
    mailbox: AtomicU8,
    gate: Mutex<Option<GateSignal>>,
}

impl ExecutionController {
    /// Create a controller with an empty mailbox and no gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a command, overwriting any command not yet consumed, and
    /// release the installed gate if there is one. Never blocks on the
    /// event loop.
    pub fn send_command(&self, command: Command) {
        self.mailbox.store(encode(command), Ordering::SeqCst);
        debug!(%command, "Command queued");

        let signal = self.gate.lock().take();
        if let Some(signal) = signal {
            signal.signal();
        }
    }

    /// Command waiting in the mailbox, without consuming it.
    pub fn peek_command(&self) -> Command {
        decode(self.mailbox.load(Ordering::SeqCst))
    }

    /// Read and clear the mailbox. Event loop only.
    pub fn take_command(&self) -> Command {
        decode(self.mailbox.swap(EMPTY, Ordering::SeqCst))
    }

    /// Install a fresh gate and return its waiting half. Event loop only.
    ///
    /// If a command is already waiting, the gate is released on the spot.
    pub fn install_gate(&self) -> GateWaiter {
        let (signal, waiter) = gate();

        let mut slot = self.gate.lock();
        if self.mailbox.load(Ordering::SeqCst) != EMPTY {
            drop(slot);
            signal.signal();
        } else if slot.replace(signal).is_some() {
            warn!("Replacing a gate that was never released");
        }
        waiter
    }

    /// Whether a gate is installed and not yet released.
    pub fn is_waiting(&self) -> bool {
        self.gate.lock().is_some()
    }
}

/// The session's single step request. Owned by the event loop.
#[derive(Debug, Default)]
pub struct StepState {
    current: Option<RequestId>,
}

impl StepState {
    /// Create a step request on `thread`, cancelling the previous one first.
    ///
    /// Failures are logged; the target then simply runs to the next
    /// breakpoint.
    pub fn create_step_request<T: Target + ?Sized>(
        &mut self,
        target: &mut T,
        thread: ThreadId,
        depth: StepDepth,
    ) -> Option<RequestId> {
        self.clear_step_request(target);

        match target.create_step(thread, depth) {
            Ok(request) => {
                debug!(%thread, ?depth, %request, "Step request created");
                self.current = Some(request);
                Some(request)
            }
            Err(e) => {
                warn!(%thread, ?depth, error = %e, "Failed to create step request");
                None
            }
        }
    }

    /// Disable and discard the existing step request, if any.
    pub fn clear_step_request<T: Target + ?Sized>(&mut self, target: &mut T) {
        if let Some(request) = self.current.take() {
            if let Err(e) = target.clear_step(request) {
                warn!(%request, error = %e, "Failed to clear step request");
            }
        }
    }

    /// The live step request.
    pub fn active(&self) -> Option<RequestId> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::ScriptedTarget, GateOutcome};
    use jdb_common::logging::ensure_test_logging;
    use std::{sync::Arc, thread};

    #[test]
    fn test_mailbox_encoding_is_lossless() {
        for command in [
            Command::StepInto,
            Command::StepOver,
            Command::StepOut,
            Command::Continue,
            Command::None,
        ] {
            assert_eq!(decode(encode(command)), command);
        }
    }

    #[test]
    fn test_take_clears_mailbox() {
        let controller = ExecutionController::new();
        controller.send_command(Command::StepOver);

        assert_eq!(controller.peek_command(), Command::StepOver);
        assert_eq!(controller.take_command(), Command::StepOver);
        assert_eq!(controller.take_command(), Command::None);
    }

    #[test]
    fn test_last_write_wins() {
        ensure_test_logging(None);
        let controller = ExecutionController::new();

        controller.send_command(Command::StepInto);
        controller.send_command(Command::Continue);

        assert_eq!(controller.take_command(), Command::Continue);
    }

    #[test]
    fn test_send_releases_installed_gate() {
        let controller = Arc::new(ExecutionController::new());
        let waiter = controller.install_gate();
        assert!(controller.is_waiting());

        let sender = Arc::clone(&controller);
        let handle = thread::spawn(move || sender.send_command(Command::StepOut));

        assert_eq!(waiter.wait(), GateOutcome::Released);
        handle.join().unwrap();
        assert!(!controller.is_waiting());
        assert_eq!(controller.take_command(), Command::StepOut);
    }

    #[test]
    fn test_command_sent_before_gate_is_not_lost() {
        let controller = ExecutionController::new();
        controller.send_command(Command::Continue);

        let waiter = controller.install_gate();
        assert!(!controller.is_waiting());
        assert_eq!(waiter.wait(), GateOutcome::Released);
        assert_eq!(controller.take_command(), Command::Continue);
    }

    #[test]
    fn test_concurrent_senders_deliver_one_of_their_commands() {
        let controller = Arc::new(ExecutionController::new());
        let waiter = controller.install_gate();

        let handles: Vec<_> = [Command::StepInto, Command::StepOver, Command::Continue]
            .into_iter()
            .map(|command| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || controller.send_command(command))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(waiter.wait(), GateOutcome::Released);
        let taken = controller.take_command();
        assert!(matches!(taken, Command::StepInto | Command::StepOver | Command::Continue));
        assert_eq!(controller.take_command(), Command::None);
    }

    #[test]
    fn test_step_request_replaces_previous() {
        ensure_test_logging(None);
        let mut target = ScriptedTarget::new();
        let mut steps = StepState::default();

        let first = steps.create_step_request(&mut target, ThreadId(1), StepDepth::Over);
        let second = steps.create_step_request(&mut target, ThreadId(1), StepDepth::Into);

        assert!(first.is_some());
        assert_ne!(first, second);
        assert_eq!(steps.active(), second);
        assert_eq!(target.cleared_steps(), vec![first.unwrap()]);
        assert_eq!(target.live_steps(), vec![second.unwrap()]);
    }

    #[test]
    fn test_clear_step_request() {
        let mut target = ScriptedTarget::new();
        let mut steps = StepState::default();

        steps.clear_step_request(&mut target);
        assert!(target.cleared_steps().is_empty());

        steps.create_step_request(&mut target, ThreadId(7), StepDepth::Out);
        steps.clear_step_request(&mut target);
        assert_eq!(steps.active(), None);
        assert!(target.live_steps().is_empty());
    }

    #[test]
    fn test_failed_step_creation_leaves_no_request() {
        ensure_test_logging(None);
        let mut target = ScriptedTarget::new().fail_step_creation();
        let mut steps = StepState::default();

        assert_eq!(steps.create_step_request(&mut target, ThreadId(1), StepDepth::Over), None);
        assert_eq!(steps.active(), None);
    }
}
