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

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Execution command issued by the controlling actor while the target is stopped.
///
/// The event loop matches on every variant; there is no fall-through case.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    /// Step to the next line, descending into called routines.
    StepInto,
    /// Step to the next line without descending into called routines.
    StepOver,
    /// Run until the current routine returns.
    StepOut,
    /// Resume free execution until the next breakpoint.
    Continue,
    /// Woken with nothing to do.
    #[default]
    None,
}

impl Command {
    /// Boundary string for this command; `None` maps to the empty string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepInto => "step-into",
            Self::StepOver => "step-over",
            Self::StepOut => "step-out",
            Self::Continue => "continue",
            Self::None => "",
        }
    }

    /// Step granularity requested by this command, if it is a step.
    pub fn step_depth(&self) -> Option<StepDepth> {
        match self {
            Self::StepInto => Some(StepDepth::Into),
            Self::StepOver => Some(StepDepth::Over),
            Self::StepOut => Some(StepDepth::Out),
            Self::Continue | Self::None => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("<none>"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Error returned when a string is not part of the command vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command `{0}`, expected one of: step-into, step-over, step-out, continue")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    /// Parses the boundary vocabulary plus the short aliases accepted on the
    /// command line. An empty string means "no command yet".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "step-into" | "into" | "si" | "s" => Ok(Self::StepInto),
            "step-over" | "over" | "next" | "so" | "n" => Ok(Self::StepOver),
            "step-out" | "out" | "finish" | "f" => Ok(Self::StepOut),
            "continue" | "cont" | "c" => Ok(Self::Continue),
            "" => Ok(Self::None),
            _ => Err(UnknownCommand(s.trim().to_string())),
        }
    }
}

/// Step granularity. Every depth steps by a single source line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StepDepth {
    /// Descend into called routines.
    Into,
    /// Do not descend into called routines.
    Over,
    /// Run until the current routine returns.
    Out,
}
