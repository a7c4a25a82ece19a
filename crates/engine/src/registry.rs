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

//! Breakpoint registry: declared breakpoints and their arming lifecycle.
//!
//! A breakpoint is declared against a unit and a line. Until its unit loads
//! it is *pending*; once the unit loads and the line resolves to executable
//! code it is *armed* with a request on the target, and stays armed for the
//! rest of the session. Lines that do not resolve stay pending and are
//! reported, never fatal.
//!
//! The registry is owned by whoever drives the target: the session during
//! setup, then the event loop thread.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use jdb_common::BreakpointSpec;
use tracing::{debug, info, warn};

use crate::{CodeLocation, RequestId, Target, TargetError, UnitRef};

/// Target-side state of an armed breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedBreakpoint {
    /// Request that enables the breakpoint
    pub request: RequestId,
    /// Executable location it is armed at
    pub location: CodeLocation,
}

/// Declared breakpoints and which of them are armed.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    breakpoints: BTreeMap<BreakpointSpec, Option<ArmedBreakpoint>>,
    watched: HashSet<String>,
    loaded: BTreeSet<String>,
}

impl BreakpointRegistry {
    /// Create a registry from declarations. Duplicates collapse into one.
    pub fn new(specs: impl IntoIterator<Item = BreakpointSpec>) -> Self {
        Self {
            breakpoints: specs.into_iter().map(|spec| (spec, None)).collect(),
            ..Default::default()
        }
    }

    /// Units that have at least one declared breakpoint.
    pub fn units(&self) -> BTreeSet<&str> {
        self.breakpoints.keys().map(|spec| spec.unit.as_str()).collect()
    }

    /// Register interest in `unit` loading. Idempotent per unit.
    pub fn watch<T: Target + ?Sized>(
        &mut self,
        target: &mut T,
        unit: &str,
    ) -> Result<(), TargetError> {
        if self.watched.contains(unit) {
            return Ok(());
        }
        target.watch_unit(unit)?;
        self.watched.insert(unit.to_string());
        Ok(())
    }

    /// Watch every unit with declared breakpoints, then arm breakpoints of
    /// units the target has already loaded.
    ///
    /// Only a failed watch is an error: the breakpoints of that unit could
    /// never be armed.
    pub fn prepare<T: Target + ?Sized>(&mut self, target: &mut T) -> Result<(), TargetError> {
        let units: Vec<String> = self.units().into_iter().map(str::to_string).collect();

        for unit in &units {
            self.watch(target, unit)?;
        }

        for unit in &units {
            match target.loaded_units(unit) {
                Ok(loaded) => {
                    for unit_ref in loaded {
                        self.on_unit_loaded(target, &unit_ref);
                    }
                }
                Err(e) => warn!(unit = %unit, error = %e, "Failed to query already loaded units"),
            }
        }

        info!(
            watched = self.watched.len(),
            armed = self.armed().len(),
            pending = self.pending().len(),
            "Breakpoints prepared"
        );
        Ok(())
    }

    /// Arm every pending breakpoint of a unit that just loaded.
    ///
    /// Returns how many breakpoints were newly armed. A breakpoint that is
    /// already armed is left alone, so the same unit loading again (e.g.
    /// through another class loader) never arms twice.
    pub fn on_unit_loaded<T: Target + ?Sized>(&mut self, target: &mut T, unit: &UnitRef) -> usize {
        self.loaded.insert(unit.name.clone());

        let mut armed = 0;
        for (spec, state) in self.breakpoints.iter_mut() {
            if spec.unit != unit.name || state.is_some() {
                continue;
            }

            let location = match target.resolve_line(unit, spec.line) {
                Ok(Some(location)) => location,
                Ok(None) => {
                    warn!(breakpoint = %spec, "No executable code at line, breakpoint stays pending");
                    continue;
                }
                Err(e) => {
                    warn!(breakpoint = %spec, error = %e, "Failed to resolve breakpoint line");
                    continue;
                }
            };

            match target.set_breakpoint(&location) {
                Ok(request) => {
                    debug!(breakpoint = %spec, %request, "Breakpoint armed");
                    *state = Some(ArmedBreakpoint { request, location });
                    armed += 1;
                }
                Err(e) => warn!(breakpoint = %spec, error = %e, "Failed to arm breakpoint"),
            }
        }

        if armed > 0 {
            info!(unit = %unit.name, armed, "Unit loaded, breakpoints armed");
        }
        armed
    }

    /// Whether the breakpoint at `unit:line` is armed.
    pub fn is_armed(&self, unit: &str, line: u32) -> bool {
        self.armed_at(unit, line).is_some()
    }

    /// Target-side state of the breakpoint at `unit:line`, if armed.
    pub fn armed_at(&self, unit: &str, line: u32) -> Option<&ArmedBreakpoint> {
        self.breakpoints.get(&BreakpointSpec::new(unit, line)).and_then(Option::as_ref)
    }

    /// Declared breakpoints not yet armed.
    pub fn pending(&self) -> Vec<&BreakpointSpec> {
        self.breakpoints.iter().filter(|(_, state)| state.is_none()).map(|(spec, _)| spec).collect()
    }

    /// Declared breakpoints that are armed.
    pub fn armed(&self) -> Vec<&BreakpointSpec> {
        self.breakpoints.iter().filter(|(_, state)| state.is_some()).map(|(spec, _)| spec).collect()
    }

    /// Whether a load of `unit` has been observed.
    pub fn is_loaded(&self, unit: &str) -> bool {
        self.loaded.contains(unit)
    }

    /// Whether `unit` is being watched for loads.
    pub fn is_watched(&self, unit: &str) -> bool {
        self.watched.contains(unit)
    }
}
