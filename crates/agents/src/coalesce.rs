//! Verbose-mode tool event coalescing.
//!
//! With session verbose on, tool activity is mirrored to the chat surface
//! as metadata lines. Successive events for the same tool within the merge
//! window batch into one message instead of spamming the chat.

use clawdis_common::types::Verbosity;

/// Merge window for successive same-tool events.
pub const MERGE_WINDOW_MS: u64 = 1_000;

/// Preview length cap for `full` verbosity.
pub const PREVIEW_MAX_CHARS: usize = 200;

/// Tools whose result previews are shown under `full` verbosity.
const PREVIEW_TOOLS: &[&str] = &["bash", "read", "edit", "write", "attach"];

#[derive(Debug)]
struct PendingBatch {
    tool: String,
    args: Vec<String>,
    previews: Vec<String>,
    last_event_ms: u64,
}

/// Stateful coalescer; one per run. Feed tool events with their arrival
/// time, flush lines out as batches close.
#[derive(Debug)]
pub struct ToolCoalescer {
    verbosity: Verbosity,
    pending: Option<PendingBatch>,
}

impl ToolCoalescer {
    #[must_use]
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            pending: None,
        }
    }

    /// Feed a `tool_start`. Returns a finished metadata line when this event
    /// closes the previous batch.
    pub fn on_tool_start(&mut self, tool: &str, arg: Option<&str>, now_ms: u64) -> Option<String> {
        if self.verbosity == Verbosity::Off {
            return None;
        }
        let mut flushed = None;
        let same_batch = self
            .pending
            .as_ref()
            .is_some_and(|p| p.tool == tool && now_ms.saturating_sub(p.last_event_ms) <= MERGE_WINDOW_MS);
        if !same_batch {
            flushed = self.flush();
            self.pending = Some(PendingBatch {
                tool: tool.to_string(),
                args: Vec::new(),
                previews: Vec::new(),
                last_event_ms: now_ms,
            });
        }
        if let Some(p) = self.pending.as_mut() {
            if let Some(arg) = arg.filter(|a| !a.is_empty()) {
                p.args.push(arg.to_string());
            }
            p.last_event_ms = now_ms;
        }
        flushed
    }

    /// Feed a `tool_end`. Previews only register under `full` and only for
    /// the curated tool set.
    pub fn on_tool_end(&mut self, tool: &str, preview: Option<&str>, now_ms: u64) -> Option<String> {
        if self.verbosity == Verbosity::Off {
            return None;
        }
        let same_batch = self
            .pending
            .as_ref()
            .is_some_and(|p| p.tool == tool && now_ms.saturating_sub(p.last_event_ms) <= MERGE_WINDOW_MS);
        if !same_batch {
            return self.flush();
        }
        if let Some(p) = self.pending.as_mut() {
            p.last_event_ms = now_ms;
            if self.verbosity == Verbosity::Full
                && PREVIEW_TOOLS.contains(&tool)
                && let Some(preview) = preview.filter(|s| !s.is_empty())
            {
                p.previews.push(truncate(preview, PREVIEW_MAX_CHARS));
            }
        }
        None
    }

    /// Close and render the pending batch, if any.
    pub fn flush(&mut self) -> Option<String> {
        let batch = self.pending.take()?;
        let mut line = match batch.args.len() {
            0 => format!("[🛠️ {}]", batch.tool),
            1 => format!("[🛠️ {} {}]", batch.tool, batch.args[0]),
            _ => format!("[🛠️ {}] {}", batch.tool, batch.args.join(", ")),
        };
        for preview in &batch.previews {
            line.push_str("\n→ ");
            line.push_str(preview);
        }
        Some(line)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_emits_nothing() {
        let mut c = ToolCoalescer::new(Verbosity::Off);
        assert!(c.on_tool_start("bash", Some("ls"), 0).is_none());
        assert!(c.flush().is_none());
    }

    #[test]
    fn single_tool_call_renders_inline_arg() {
        let mut c = ToolCoalescer::new(Verbosity::On);
        assert!(c.on_tool_start("bash", Some("ls -la"), 0).is_none());
        assert_eq!(c.flush().unwrap(), "[🛠️ bash ls -la]");
    }

    #[test]
    fn same_tool_within_window_merges() {
        let mut c = ToolCoalescer::new(Verbosity::On);
        assert!(c.on_tool_start("read", Some("a.rs"), 0).is_none());
        assert!(c.on_tool_start("read", Some("b.rs"), 400).is_none());
        assert!(c.on_tool_start("read", Some("c.rs"), 900).is_none());
        assert_eq!(c.flush().unwrap(), "[🛠️ read] a.rs, b.rs, c.rs");
    }

    #[test]
    fn tool_change_flushes_previous_batch() {
        let mut c = ToolCoalescer::new(Verbosity::On);
        assert!(c.on_tool_start("read", Some("a.rs"), 0).is_none());
        let flushed = c.on_tool_start("bash", Some("cargo fmt"), 100).unwrap();
        assert_eq!(flushed, "[🛠️ read a.rs]");
        assert_eq!(c.flush().unwrap(), "[🛠️ bash cargo fmt]");
    }

    #[test]
    fn window_expiry_starts_new_batch() {
        let mut c = ToolCoalescer::new(Verbosity::On);
        assert!(c.on_tool_start("read", Some("a.rs"), 0).is_none());
        let flushed = c.on_tool_start("read", Some("b.rs"), 1_500).unwrap();
        assert_eq!(flushed, "[🛠️ read a.rs]");
    }

    #[test]
    fn full_mode_attaches_truncated_previews() {
        let mut c = ToolCoalescer::new(Verbosity::Full);
        c.on_tool_start("bash", Some("cat big.txt"), 0);
        let long = "x".repeat(300);
        assert!(c.on_tool_end("bash", Some(&long), 100).is_none());
        let line = c.flush().unwrap();
        assert!(line.starts_with("[🛠️ bash cat big.txt]\n→ "));
        assert!(line.chars().count() < 260);
        assert!(line.ends_with('…'));
    }

    #[test]
    fn on_mode_ignores_previews() {
        let mut c = ToolCoalescer::new(Verbosity::On);
        c.on_tool_start("bash", Some("ls"), 0);
        c.on_tool_end("bash", Some("file1\nfile2"), 50);
        assert_eq!(c.flush().unwrap(), "[🛠️ bash ls]");
    }

    #[test]
    fn uncurated_tools_never_preview() {
        let mut c = ToolCoalescer::new(Verbosity::Full);
        c.on_tool_start("webfetch", Some("example.com"), 0);
        c.on_tool_end("webfetch", Some("<html>"), 50);
        assert_eq!(c.flush().unwrap(), "[🛠️ webfetch example.com]");
    }
}
