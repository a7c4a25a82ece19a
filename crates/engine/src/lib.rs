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

//! JDB Engine - attach to a JVM and drive a debug session
//!
//! The engine connects to a JVM's JDWP endpoint, arms breakpoints as their
//! units load, and runs an event loop that stops on breakpoint hits and
//! completed steps until the user sends a command. Presentation is left to
//! the host through the [`Notifier`] and [`SourceLocator`] capabilities.

pub mod error;
pub use error::*;

pub mod jdwp;

pub mod target;
pub use target::*;

pub mod jvm;
pub use jvm::*;

pub mod registry;
pub use registry::*;

pub mod gate;
pub use gate::*;

pub mod controller;
pub use controller::*;

pub mod inspector;

pub mod notifier;
pub use notifier::*;

pub mod event_loop;
pub use event_loop::*;

pub mod session;
pub use session::*;

pub mod test_utils;
