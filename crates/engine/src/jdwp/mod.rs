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

//! Java Debug Wire Protocol transport.
//!
//! This module implements the subset of JDWP the engine consumes:
//!
//! - **Connection** ([`connection`]) - TCP connect, handshake, ID-size
//!   negotiation and reply correlation
//! - **Packets** ([`packet`]) - big-endian packet framing plus typed readers
//!   and writers that honor the negotiated ID widths
//! - **Events** ([`events`]) - decoding of `Event.Composite` packets
//! - **Values** ([`value`]) - tagged values returned by stack frames
//! - **Constants** ([`constants`]) - command sets, commands and event kinds
//!
//! The connection is strictly single-owner: it is moved into the event loop
//! thread and never shared, so there is no locking around the socket.

pub mod connection;
pub mod constants;
pub mod events;
pub mod packet;
pub mod value;

pub use connection::*;
pub use events::*;
pub use packet::*;
pub use value::*;
