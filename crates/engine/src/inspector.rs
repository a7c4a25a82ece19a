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

//! State inspector: what a stopped thread looks like.
//!
//! Both operations are best effort. A frame or variable that cannot be read
//! is logged and left out; the rest of the snapshot is still returned.

use jdb_common::{FrameSnapshot, VariableSnapshot};
use tracing::warn;

use crate::{Target, ThreadId};

/// Variables visible in the top frame of `thread`, rendered for display.
pub fn snapshot<T: Target + ?Sized>(target: &mut T, thread: ThreadId) -> Vec<VariableSnapshot> {
    let frame = match target.frames(thread) {
        Ok(frames) => match frames.into_iter().next() {
            Some(frame) => frame,
            None => {
                warn!(%thread, "Stopped thread has no frames");
                return Vec::new();
            }
        },
        Err(e) => {
            warn!(%thread, error = %e, "Failed to read frames");
            return Vec::new();
        }
    };

    let slots = match target.visible_variables(&frame) {
        Ok(slots) => slots,
        Err(e) => {
            warn!(%thread, error = %e, "Failed to list visible variables");
            return Vec::new();
        }
    };

    let mut variables = Vec::with_capacity(slots.len());
    for slot in slots {
        match target.read_variable(thread, &frame, &slot) {
            Ok(value) => variables.push(VariableSnapshot::new(slot.name, value)),
            Err(e) => warn!(%thread, variable = %slot.name, error = %e, "Failed to read variable"),
        }
    }
    variables
}

/// Call stack of `thread`, innermost frame first.
pub fn call_stack<T: Target + ?Sized>(target: &mut T, thread: ThreadId) -> Vec<FrameSnapshot> {
    let frames = match target.frames(thread) {
        Ok(frames) => frames,
        Err(e) => {
            warn!(%thread, error = %e, "Failed to read frames");
            return Vec::new();
        }
    };

    frames
        .iter()
        .enumerate()
        .filter_map(|(depth, frame)| match target.describe(&frame.code) {
            Ok(location) => Some(FrameSnapshot {
                unit: location.unit,
                method: location.method,
                line: location.line,
            }),
            Err(e) => {
                warn!(%thread, depth, error = %e, "Failed to describe frame");
                None
            }
        })
        .collect()
}
