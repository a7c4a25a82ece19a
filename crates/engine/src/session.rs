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

//! Debug sessions.
//!
//! A session is created once per attach. Everything it needs (target,
//! breakpoint registry, controller, notifier, locator) is created here and
//! handed to the event loop, which then runs on its own named thread. The
//! caller keeps a [`SessionHandle`] to send commands and observe completion.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use jdb_common::{BreakpointSpec, Command, Config};
use tracing::{debug, error, info};

use crate::{
    BreakpointRegistry, EventLoop, ExecutionController, JvmTarget, Notifier, SessionError,
    SourceLocator, Target,
};

/// Name of the event loop thread.
pub const EVENT_LOOP_THREAD_NAME: &str = "jdb-event-loop";

/// Where and how to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachOptions {
    /// Host of the debug endpoint
    pub host: String,
    /// Port of the debug endpoint
    pub port: u16,
    /// Connect and handshake timeout; `None` waits indefinitely
    pub connect_timeout: Option<Duration>,
}

impl AttachOptions {
    /// Options for `host:port` with no timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, connect_timeout: None }
    }

    /// Options taken from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    controller: Arc<ExecutionController>,
    finished: Arc<AtomicBool>,
    thread: JoinHandle<Result<(), SessionError>>,
}

impl SessionHandle {
    /// Send a command to the session. Never blocks.
    pub fn send_command(&self, command: Command) {
        self.controller.send_command(command);
    }

    /// The session's controller, for callers that outlive the handle.
    pub fn controller(&self) -> Arc<ExecutionController> {
        Arc::clone(&self.controller)
    }

    /// Whether the target is stopped and waiting for a command.
    pub fn is_stopped(&self) -> bool {
        self.controller.is_waiting()
    }

    /// Whether the session is over.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Wait for the event loop thread to exit and return its result.
    pub fn join(self) -> Result<(), SessionError> {
        self.thread.join().map_err(|_| SessionError::Panicked)?
    }
}

/// Prepare breakpoints on an attached target and start its event loop.
///
/// Watches for every unit with declared breakpoints are registered before the
/// loop starts. If that fails the target is released and the notifier is
/// cleared.
pub fn spawn_session<T, N, L>(
    mut target: T,
    breakpoints: Vec<BreakpointSpec>,
    mut notifier: N,
    locator: L,
) -> Result<SessionHandle, SessionError>
where
    T: Target + Send + 'static,
    N: Notifier + 'static,
    L: SourceLocator + 'static,
{
    let mut registry = BreakpointRegistry::new(breakpoints);
    if let Err(e) = registry.prepare(&mut target) {
        error!(error = %e, "Failed to set up breakpoint watches");
        notifier.clear_highlights();
        if let Err(e) = target.dispose() {
            debug!(error = %e, "Dispose failed after setup error");
        }
        return Err(SessionError::Setup(e));
    }

    let controller = Arc::new(ExecutionController::new());
    let mut event_loop =
        EventLoop::new(target, registry, Arc::clone(&controller), notifier, locator);
    let finished = event_loop.finished_flag();

    let thread = thread::Builder::new()
        .name(EVENT_LOOP_THREAD_NAME.to_string())
        .spawn(move || event_loop.run())
        .map_err(SessionError::Spawn)?;

    Ok(SessionHandle { controller, finished, thread })
}

/// Attach to a JVM and start a session on it.
///
/// An attach failure is terminal: the notifier is cleared and the error is
/// returned, with no retry.
pub fn start_session<N, L>(
    options: &AttachOptions,
    breakpoints: Vec<BreakpointSpec>,
    mut notifier: N,
    locator: L,
) -> Result<SessionHandle, SessionError>
where
    N: Notifier + 'static,
    L: SourceLocator + 'static,
{
    info!(host = %options.host, port = options.port, "Attaching to target");
    let target = match JvmTarget::attach(&options.host, options.port, options.connect_timeout) {
        Ok(target) => target,
        Err(e) => {
            error!(error = %e, "Attach failed");
            notifier.clear_highlights();
            return Err(SessionError::Attach(e));
        }
    };

    spawn_session(target, breakpoints, notifier, locator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{Notification, RecordingNotifier, ScriptedTarget},
        CodeLocation, Location, TargetEvent, ThreadId, UnitRef,
    };
    use jdb_common::logging::ensure_test_logging;
    use std::{collections::HashMap, net::TcpListener, path::PathBuf};

    const WAIT: Duration = Duration::from_secs(5);

    fn hit(line: u32) -> TargetEvent {
        TargetEvent::BreakpointHit {
            thread: ThreadId(3),
            location: Location {
                unit: "a.Main".to_string(),
                method: "main".to_string(),
                line: Some(line),
                code: CodeLocation { class_id: 1, method_id: 1, index: u64::from(line), type_tag: 1 },
            },
        }
    }

    fn sources() -> HashMap<String, PathBuf> {
        HashMap::from([("a.Main".to_string(), PathBuf::from("/src/a/Main.java"))])
    }

    fn highlighted(line: u32) -> impl Fn(&[Notification]) -> bool {
        move |notifications| {
            notifications.iter().any(|n| matches!(n, Notification::Highlight(_, l) if *l == line))
        }
    }

    #[test]
    fn test_session_waits_for_commands() {
        ensure_test_logging(None);
        let target = ScriptedTarget::new()
            .with_lines("a.Main", &[8])
            .with_batch(vec![TargetEvent::UnitLoaded(UnitRef::new("a.Main", 1)), hit(8)])
            .with_batch(vec![hit(9)])
            .with_batch(vec![TargetEvent::Terminated]);
        let notifier = RecordingNotifier::new();

        let session = spawn_session(
            target.clone(),
            vec![BreakpointSpec::new("a.Main", 8)],
            notifier.clone(),
            sources(),
        )
        .unwrap();

        assert!(notifier.wait_for(highlighted(8), WAIT));
        assert!(!session.is_finished());
        session.send_command(Command::StepOver);

        assert!(notifier.wait_for(highlighted(9), WAIT));
        session.send_command(Command::Continue);

        session.join().unwrap();
        assert_eq!(target.created_steps().len(), 1);
        assert!(target.live_steps().is_empty());
        assert_eq!(target.dispose_count(), 1);
    }

    #[test]
    fn test_finished_flag() {
        ensure_test_logging(None);
        let target = ScriptedTarget::new().with_batch(vec![TargetEvent::Terminated]);
        let session =
            spawn_session(target, vec![], RecordingNotifier::new(), sources()).unwrap();

        let controller = session.controller();
        let finished = Arc::clone(&session.finished);
        session.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert!(!controller.is_waiting());
    }

    #[test]
    fn test_setup_failure() {
        ensure_test_logging(None);
        let target = ScriptedTarget::new().fail_watch();
        let notifier = RecordingNotifier::new();

        let result = spawn_session(
            target.clone(),
            vec![BreakpointSpec::new("a.Main", 1)],
            notifier.clone(),
            sources(),
        );

        assert!(matches!(result, Err(SessionError::Setup(_))));
        assert_eq!(notifier.clear_count(), 1);
        assert_eq!(target.dispose_count(), 1);
    }

    #[test]
    fn test_setup_failure_keeps_setup_error_when_dispose_fails() {
        ensure_test_logging(None);
        let target = ScriptedTarget::new().fail_watch().fail_dispose();
        let notifier = RecordingNotifier::new();

        let result = spawn_session(
            target.clone(),
            vec![BreakpointSpec::new("a.Main", 1)],
            notifier.clone(),
            sources(),
        );

        assert!(matches!(result, Err(SessionError::Setup(ref e)) if !e.is_disconnect()));
        assert_eq!(notifier.clear_count(), 1);
        assert_eq!(target.dispose_count(), 1);
    }

    #[test]
    fn test_attach_failure() {
        ensure_test_logging(None);
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let notifier = RecordingNotifier::new();

        let options = AttachOptions::new("127.0.0.1", port)
            .with_connect_timeout(Some(Duration::from_secs(2)));
        let result = start_session(&options, vec![], notifier.clone(), sources());

        assert!(matches!(result, Err(SessionError::Attach(_))));
        assert_eq!(notifier.notifications(), vec![Notification::ClearHighlights]);
    }

    #[test]
    fn test_attach_options_from_config() {
        let config = Config::default().with_host("10.0.0.2".to_string()).with_port(8000);
        let options = AttachOptions::from_config(&config);
        assert_eq!(options.host, "10.0.0.2");
        assert_eq!(options.port, 8000);
        assert_eq!(options.connect_timeout, config.connect_timeout());
    }
}
