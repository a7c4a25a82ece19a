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

//! Stdout renderings of what the engine reports at a stop.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use jdb_common::{FrameSnapshot, VariableSnapshot};
use jdb_engine::Notifier;
use serde::Serialize;
use tracing::{debug, warn};

/// Source listing of `line` with `context` lines on each side, the current
/// line marked with `=>`. `None` if the line is not in the source.
pub fn render_source(source: &str, line: u32, context: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let current = usize::try_from(line).ok()?.checked_sub(1)?;
    if current >= lines.len() {
        return None;
    }

    let first = current.saturating_sub(context);
    let last = (current + context).min(lines.len() - 1);
    let width = (last + 1).to_string().len();

    let mut out = String::new();
    for (index, text) in lines.iter().enumerate().take(last + 1).skip(first) {
        let marker = if index == current { "=>" } else { "  " };
        out.push_str(&format!("{marker} {:>width$} | {text}\n", index + 1));
    }
    Some(out)
}

/// Human-readable notifier.
#[derive(Debug)]
pub struct TextNotifier<W> {
    out: W,
    context: usize,
}

impl TextNotifier<io::Stdout> {
    /// Notifier printing to stdout.
    pub fn stdout(context: usize) -> Self {
        Self::new(io::stdout(), context)
    }
}

impl<W: Write + Send> TextNotifier<W> {
    /// Notifier printing to `out`, with `context` source lines around a stop.
    pub fn new(out: W, context: usize) -> Self {
        Self { out, context }
    }

    /// Give back the writer.
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|()| self.out.flush()) {
            warn!(error = %e, "Failed to write to output");
        }
    }
}

impl<W: Write + Send> Notifier for TextNotifier<W> {
    fn highlight_line(&mut self, path: &Path, line: u32) -> bool {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cannot read source file");
                return false;
            }
        };
        let Some(listing) = render_source(&source, line, self.context) else {
            return false;
        };

        self.emit(&format!("\n{}:{line}\n{listing}", path.display()));
        true
    }

    fn clear_highlights(&mut self) {
        self.emit("(running)\n");
    }

    fn show_variables(&mut self, variables: &[VariableSnapshot]) {
        if variables.is_empty() {
            return;
        }
        let mut out = String::from("Variables:\n");
        for variable in variables {
            out.push_str(&format!("  {variable}\n"));
        }
        self.emit(&out);
    }

    fn show_call_stack(&mut self, frames: &[FrameSnapshot]) {
        let mut out = String::from("Call stack:\n");
        for (depth, frame) in frames.iter().enumerate() {
            out.push_str(&format!("  #{depth} {frame}\n"));
        }
        self.emit(&out);
    }
}

/// One message of the JSON output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum Message<'a> {
    Highlight { path: &'a Path, line: u32 },
    ClearHighlights,
    Variables { variables: &'a [VariableSnapshot] },
    CallStack { frames: &'a [FrameSnapshot] },
}

/// Machine-readable notifier: one JSON object per line.
#[derive(Debug)]
pub struct JsonNotifier<W> {
    out: W,
}

impl JsonNotifier<io::Stdout> {
    /// Notifier printing to stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonNotifier<W> {
    /// Notifier printing to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Give back the writer.
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, message: &Message<'_>) -> bool {
        let written = serde_json::to_writer(&mut self.out, message)
            .map_err(io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        match written {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to write to output");
                false
            }
        }
    }
}

impl<W: Write + Send> Notifier for JsonNotifier<W> {
    fn highlight_line(&mut self, path: &Path, line: u32) -> bool {
        self.emit(&Message::Highlight { path, line })
    }

    fn clear_highlights(&mut self) {
        self.emit(&Message::ClearHighlights);
    }

    fn show_variables(&mut self, variables: &[VariableSnapshot]) {
        self.emit(&Message::Variables { variables });
    }

    fn show_call_stack(&mut self, frames: &[FrameSnapshot]) {
        self.emit(&Message::CallStack { frames });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SOURCE: &str = "package a;\nclass Main {\n  void run() {\n    int x = 1;\n  }\n}\n";

    #[test]
    fn test_render_source_marks_current_line() {
        let listing = render_source(SOURCE, 4, 1).unwrap();
        assert_eq!(listing, "   3 |   void run() {\n=> 4 |     int x = 1;\n   5 |   }\n");
    }

    #[test]
    fn test_render_source_clamps_context() {
        let listing = render_source(SOURCE, 1, 5).unwrap();
        assert!(listing.starts_with("=> 1 | package a;"));
        assert_eq!(listing.lines().count(), 6);
    }

    #[test]
    fn test_render_source_out_of_range() {
        assert_eq!(render_source(SOURCE, 0, 2), None);
        assert_eq!(render_source(SOURCE, 7, 2), None);
    }

    #[test]
    fn test_text_highlight_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Main.java");
        fs::write(&path, SOURCE).unwrap();

        let mut notifier = TextNotifier::new(Vec::new(), 0);
        assert!(notifier.highlight_line(&path, 4));
        assert!(!notifier.highlight_line(&path, 40));
        assert!(!notifier.highlight_line(&dir.path().join("Missing.java"), 1));

        let out = String::from_utf8(notifier.into_inner()).unwrap();
        assert!(out.contains("=> 4 |     int x = 1;"));
    }

    #[test]
    fn test_text_variables_and_stack() {
        let mut notifier = TextNotifier::new(Vec::new(), 0);
        notifier.show_variables(&[]);
        notifier.show_variables(&[VariableSnapshot::new("x", "1")]);
        notifier.show_call_stack(&[FrameSnapshot {
            unit: "a.Main".to_string(),
            method: "run".to_string(),
            line: Some(4),
        }]);

        let out = String::from_utf8(notifier.into_inner()).unwrap();
        assert_eq!(out, "Variables:\n  x = 1\nCall stack:\n  #0 a.Main.run(4)\n");
    }

    #[test]
    fn test_json_messages() {
        let mut notifier = JsonNotifier::new(Vec::new());
        assert!(notifier.highlight_line(&PathBuf::from("/src/a/Main.java"), 4));
        notifier.show_variables(&[VariableSnapshot::new("x", "1")]);
        notifier.clear_highlights();

        let out = String::from_utf8(notifier.into_inner()).unwrap();
        let messages: Vec<serde_json::Value> =
            out.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(messages[0]["event"], "highlight");
        assert_eq!(messages[0]["line"], 4);
        assert_eq!(messages[1]["variables"][0]["name"], "x");
        assert_eq!(messages[2]["event"], "clear-highlights");
    }
}
