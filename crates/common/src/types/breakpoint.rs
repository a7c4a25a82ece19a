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

use std::{fmt::Display, str::FromStr};

use eyre::{bail, eyre, Error, Result};
use serde::{Deserialize, Serialize};

/// A user-declared source breakpoint, supplied once before a session starts.
///
/// The owning unit is the fully-qualified name of the class the line belongs
/// to (e.g. `com.example.Main`). Lines are 1-based, as in source files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointSpec {
    /// Fully-qualified name of the owning unit.
    pub unit: String,
    /// Line number in the unit's source file (1-based).
    pub line: u32,
}

impl BreakpointSpec {
    /// Create a new breakpoint declaration.
    pub fn new(unit: impl Into<String>, line: u32) -> Self {
        Self { unit: unit.into(), line }
    }
}

impl Display for BreakpointSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.unit, self.line)
    }
}

impl FromStr for BreakpointSpec {
    type Err = Error;

    /// Parses a breakpoint declaration.
    /// Format: `<unit>:<line>`, e.g. `com.example.Main:42`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let Some((unit, line)) = trimmed.rsplit_once(':') else {
            bail!("Invalid breakpoint format. Expected <unit>:<line>, got: {s}");
        };

        let unit = unit.trim();
        if unit.is_empty() {
            bail!("Breakpoint unit name is empty: {s}");
        }

        let line = line.trim().parse::<u32>().map_err(|e| eyre!("Invalid line number: {e}"))?;
        if line == 0 {
            bail!("Line numbers start at 1: {s}");
        }

        Ok(Self { unit: unit.to_string(), line })
    }
}
