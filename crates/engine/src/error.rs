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

//! Error types of the debugging engine.
//!
//! [`TargetError`] covers everything that can go wrong while talking to the
//! target process. [`SessionError`] is what a session reports to its caller;
//! only attach failures and unrecoverable protocol errors end up there, all
//! per-breakpoint and per-variable failures are logged and swallowed.

use std::io;

use thiserror::Error;

/// Failure while communicating with the target.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The debug endpoint could not be reached or refused the handshake.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connection {
        /// `host:port` of the endpoint
        endpoint: String,
        /// Human-readable reason
        reason: String,
    },

    /// The connection was closed by the target.
    #[error("target disconnected")]
    Disconnected,

    /// The target answered a command with a JDWP error code.
    #[error("{command} failed with JDWP error {code}{}", describe_error_code(.code))]
    Command {
        /// Name of the failed command, e.g. `ReferenceType.Methods`
        command: &'static str,
        /// Raw JDWP error code
        code: u16,
    },

    /// A packet did not have the expected shape.
    #[error("malformed packet: {0}")]
    Protocol(String),

    /// An event set arrived intact but its payload could not be decoded.
    #[error("malformed event set: {0}")]
    MalformedEvents(String),

    /// The requested information does not exist in the target, e.g. a class
    /// compiled without a variable table.
    #[error("absent information: {0}")]
    Absent(String),

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TargetError {
    /// Whether the error means the target is gone for good.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

fn describe_error_code(code: &u16) -> &'static str {
    match *code {
        10 => " (invalid thread)",
        13 => " (thread not suspended)",
        20 => " (invalid object)",
        21 => " (invalid class)",
        22 => " (class not prepared)",
        23 => " (invalid method id)",
        24 => " (invalid location)",
        30 => " (invalid frame id)",
        35 => " (invalid slot)",
        41 => " (not found)",
        99 => " (not implemented)",
        101 => " (absent information)",
        102 => " (invalid event type)",
        112 => " (VM dead)",
        _ => "",
    }
}

/// Error reported by a debug session to its caller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Attaching to the target failed; the session never started.
    #[error("attach failed: {0}")]
    Attach(#[source] TargetError),

    /// Setting up breakpoint watches failed before the event loop started.
    #[error("session setup failed: {0}")]
    Setup(#[source] TargetError),

    /// The event stream broke while the session was running.
    #[error("protocol failure during session: {0}")]
    Protocol(#[source] TargetError),

    /// The event loop thread could not be started.
    #[error("failed to spawn event loop thread: {0}")]
    Spawn(#[source] io::Error),

    /// The event loop thread panicked.
    #[error("event loop thread panicked")]
    Panicked,
}
