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

//! One-shot synchronization gate.
//!
//! The event loop parks on a [`GateWaiter`] while the target is stopped, and
//! the controller holds the matching [`GateSignal`]. Both halves are consumed
//! on use, so a gate can be waited on and released at most once. Dropping the
//! signal without firing it also releases the waiter, which then learns the
//! gate was abandoned rather than released.

use tokio::sync::oneshot;

/// Create a fresh gate.
pub fn gate() -> (GateSignal, GateWaiter) {
    let (tx, rx) = oneshot::channel();
    (GateSignal { tx }, GateWaiter { rx })
}

/// Releasing half of a gate.
#[derive(Debug)]
pub struct GateSignal {
    tx: oneshot::Sender<()>,
}

impl GateSignal {
    /// Release the waiter. Returns `false` if the waiter is already gone.
    pub fn signal(self) -> bool {
        self.tx.send(()).is_ok()
    }
}

/// How a wait on a gate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// The signal half fired.
    Released,
    /// The signal half was dropped without firing.
    Abandoned,
}

/// Waiting half of a gate.
#[derive(Debug)]
pub struct GateWaiter {
    rx: oneshot::Receiver<()>,
}

impl GateWaiter {
    /// Block the current thread until the gate is released or abandoned.
    ///
    /// Must not be called from within an async runtime; the event loop runs
    /// on its own OS thread.
    pub fn wait(self) -> GateOutcome {
        match self.rx.blocking_recv() {
            Ok(()) => GateOutcome::Released,
            Err(_) => GateOutcome::Abandoned,
        }
    }
}
