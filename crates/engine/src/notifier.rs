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

//! Capabilities the engine consumes from its host.
//!
//! The engine never renders anything itself. Where the target stopped, what
//! its variables hold and what the call stack looks like are pushed to a
//! [`Notifier`]; mapping a unit name to a source file is delegated to a
//! [`SourceLocator`]. Both are moved into the event loop thread.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use jdb_common::{Config, FrameSnapshot, VariableSnapshot};
use tracing::trace;

/// Receiver of everything the user should see.
pub trait Notifier: Send {
    /// Highlight `line` of the file at `path`. Returns `false` if the line
    /// could not be shown.
    fn highlight_line(&mut self, path: &Path, line: u32) -> bool;

    /// Remove any execution highlight and variable display.
    fn clear_highlights(&mut self);

    /// Show the variables of the stopped frame.
    fn show_variables(&mut self, variables: &[VariableSnapshot]);

    /// Show the call stack of the stopped thread, innermost first.
    fn show_call_stack(&mut self, frames: &[FrameSnapshot]);
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn highlight_line(&mut self, path: &Path, line: u32) -> bool {
        (**self).highlight_line(path, line)
    }

    fn clear_highlights(&mut self) {
        (**self).clear_highlights()
    }

    fn show_variables(&mut self, variables: &[VariableSnapshot]) {
        (**self).show_variables(variables)
    }

    fn show_call_stack(&mut self, frames: &[FrameSnapshot]) {
        (**self).show_call_stack(frames)
    }
}

/// Maps a unit name to the source file that defines it.
pub trait SourceLocator: Send {
    /// Path of the source file of `unit`, if one can be found.
    fn resolve(&self, unit: &str) -> Option<PathBuf>;
}

impl SourceLocator for HashMap<String, PathBuf> {
    fn resolve(&self, unit: &str) -> Option<PathBuf> {
        self.get(unit).cloned()
    }
}

/// Looks up sources under a list of root directories, following the
/// package-to-directory convention: `a.b.C$Inner` lives in `a/b/C.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoots {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl SourceRoots {
    /// Create a locator searching `roots`, trying each of `extensions` in order.
    pub fn new(roots: Vec<PathBuf>, extensions: Vec<String>) -> Self {
        Self { roots, extensions }
    }

    /// Locator configured from the source roots and extensions of `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.source_roots.clone(), config.source_extensions.clone())
    }

    /// Paths that may hold `unit`, relative to a root, in lookup order.
    fn relative_candidates(&self, unit: &str) -> Vec<PathBuf> {
        let outer = unit.split('$').next().unwrap_or(unit);
        let relative = outer.replace('.', "/");

        let mut candidates: Vec<PathBuf> =
            self.extensions.iter().map(|ext| PathBuf::from(format!("{relative}.{ext}"))).collect();

        // Kotlin top-level functions compile into a `FileKt` facade unit
        if let Some(facade) = relative.strip_suffix("Kt") {
            candidates.push(PathBuf::from(format!("{facade}.kt")));
        }
        candidates
    }
}

impl Default for SourceRoots {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SourceLocator for SourceRoots {
    fn resolve(&self, unit: &str) -> Option<PathBuf> {
        let candidates = self.relative_candidates(unit);
        for root in &self.roots {
            for candidate in &candidates {
                let path = root.join(candidate);
                trace!(unit, path = %path.display(), "Probing source candidate");
                if path.is_file() {
                    return Some(path);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "class X {}\n").unwrap();
    }

    #[test]
    fn test_resolves_nested_units_to_outer_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("com/example/Main.java");
        touch(&file);

        let locator =
            SourceRoots::new(vec![dir.path().to_path_buf()], vec!["java".to_string()]);
        assert_eq!(locator.resolve("com.example.Main"), Some(file.clone()));
        assert_eq!(locator.resolve("com.example.Main$Worker$1"), Some(file));
        assert_eq!(locator.resolve("com.example.Missing"), None);
    }

    #[test]
    fn test_roots_and_extensions_are_searched_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(&second.path().join("app/Util.kt"));
        touch(&second.path().join("app/Util.java"));

        let locator = SourceRoots::new(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            vec!["java".to_string(), "kt".to_string()],
        );
        assert_eq!(locator.resolve("app.Util"), Some(second.path().join("app/Util.java")));
    }

    #[test]
    fn test_kotlin_facade_unit() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("app/Main.kt"));

        let locator = SourceRoots::new(vec![dir.path().to_path_buf()], vec!["kt".to_string()]);
        assert_eq!(locator.resolve("app.MainKt"), Some(dir.path().join("app/Main.kt")));
    }

    #[test]
    fn test_map_locator() {
        let mut map = HashMap::new();
        map.insert("a.B".to_string(), PathBuf::from("/src/a/B.java"));
        assert_eq!(map.resolve("a.B"), Some(PathBuf::from("/src/a/B.java")));
        assert_eq!(map.resolve("a.C"), None);
    }
}
