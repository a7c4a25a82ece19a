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

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A visible variable of the stopped frame, rendered for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariableSnapshot {
    /// Variable name as declared in source.
    pub name: String,
    /// Rendered value.
    pub value: String,
}

impl VariableSnapshot {
    /// Create a new variable snapshot.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

impl Display for VariableSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// One frame of the stopped thread's call stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameSnapshot {
    /// Fully-qualified name of the unit the frame executes in.
    pub unit: String,
    /// Name of the executing method.
    pub method: String,
    /// Current source line, if the unit carries line information.
    pub line: Option<u32>,
}

impl FrameSnapshot {
    /// Presentation string, e.g. `com.example.Main.run(42)`.
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl Display for FrameSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}.{}({line})", self.unit, self.method),
            None => write!(f, "{}.{}(unknown line)", self.unit, self.method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_description() {
        let frame =
            FrameSnapshot { unit: "a.B".to_string(), method: "run".to_string(), line: Some(12) };
        assert_eq!(frame.description(), "a.B.run(12)");

        let frame = FrameSnapshot { line: None, ..frame };
        assert_eq!(frame.description(), "a.B.run(unknown line)");
    }
}
