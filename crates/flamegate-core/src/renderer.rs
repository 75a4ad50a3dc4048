//! Flame-graph renderer collaborator
//!
//! Turns one cycle's raw stack samples into a rendered SVG by piping the
//! raw file through an external renderer (stackvis by default).

use std::path::Path;

use crate::supervisor::ProcessSpec;

/// Builds the rendering invocation for one capture cycle.
pub trait FlameRenderer: Send + Sync {
    /// Invocation that reads `raw_path` on stdin and writes the rendered
    /// image to `svg_path`.
    fn render_spec(&self, raw_path: &Path, svg_path: &Path) -> ProcessSpec;
}

/// stackvis-style renderer: `stackvis dtrace flamegraph-svg < raw > svg`.
pub struct StackvisRenderer {
    command: String,
    args: Vec<String>,
}

impl StackvisRenderer {
    /// Renderer with the stock stackvis argument form.
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_args(
            command,
            vec!["dtrace".to_string(), "flamegraph-svg".to_string()],
        )
    }

    /// Renderer with explicit arguments (used when the configured tool is
    /// not stackvis).
    pub fn with_args(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl FlameRenderer for StackvisRenderer {
    fn render_spec(&self, raw_path: &Path, svg_path: &Path) -> ProcessSpec {
        ProcessSpec::new(self.command.as_str())
            .args(self.args.iter().cloned())
            .stdin_file(raw_path)
            .stdout_file(svg_path)
    }
}
