//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag), one object per line while running
//! - Quiet mode for scripting (--quiet flag)

use chrono::{Local, Utc};

use labsync_core::render::GROUP_PALETTE;
use labsync_core::sync::ConnectionState;
use labsync_core::{ContentItem, EditOp, ExperimentState};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print one state publication: the edits, then the list they produce
    pub fn print_update(&self, state: &ExperimentState, script: &[EditOp], list: &[ContentItem]) {
        match self.format {
            OutputFormat::Human => {
                println!();
                println!(
                    "── [{}] {:?}, {} edit(s) ──",
                    Local::now().format("%H:%M:%S"),
                    state.phase,
                    script.len()
                );
                for op in script {
                    println!("  {}", describe_op(op));
                }
                println!();
                for line in render_lines(list) {
                    println!("{}", line);
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "update",
                        "at": Utc::now().to_rfc3339(),
                        "state": state,
                        "edits": script,
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    pub fn print_status(&self, state: ConnectionState) {
        match self.format {
            OutputFormat::Human => {
                println!("[{}] {}", Local::now().format("%H:%M:%S"), status_label(state));
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "status",
                        "at": Utc::now().to_rfc3339(),
                        "status": format!("{:?}", state),
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an error; shown in every mode
    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"event": "error", "at": Utc::now().to_rfc3339(), "message": message})
                );
            }
            _ => eprintln!("⚠ {}", message),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for input
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn status_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "Disconnected",
        ConnectionState::Connecting => "Connecting...",
        ConnectionState::Open => "Connected",
        ConnectionState::Closing => "Closing...",
        ConnectionState::Faulted => "Connection error",
        ConnectionState::Reconnecting => "Connection lost, retrying shortly",
    }
}

/// One-line description of an edit
pub fn describe_op(op: &EditOp) -> String {
    match op {
        EditOp::Insert { index, item } => format!("+ {:>2} {}", index, summarize(item)),
        EditOp::Remove { index } => format!("- {:>2}", index),
        EditOp::Update { index, item } => format!("~ {:>2} {}", index, summarize(item)),
        EditOp::Move { from, to } => format!("> {:>2} -> {}", from, to),
    }
}

fn summarize(item: &ContentItem) -> String {
    match item {
        ContentItem::Heading { text } => format!("heading \"{}\"", truncate(text, 40)),
        ContentItem::Field(field) => {
            format!("field {} = {}", field.hint, truncate(&field.value, 30))
        }
        ContentItem::FieldGroup { title, fields, .. } => {
            format!("group \"{}\" ({} field(s))", title, fields.len())
        }
        ContentItem::Image(image) => format!("image {}", truncate(&image.url, 50)),
        ContentItem::Choices(choices) => format!("choices [{}]", choices.options.join(", ")),
        ContentItem::Spacer { width, height } => format!("spacer {}x{}", width, height),
    }
}

/// Text rendering of a render list
pub fn render_lines(list: &[ContentItem]) -> Vec<String> {
    let mut lines = Vec::new();

    for item in list {
        match item {
            ContentItem::Heading { text } => {
                lines.push(format!("## {}", text));
            }
            ContentItem::Field(field) => {
                lines.push(format!("  {}: {}", field.hint, field.value));
            }
            ContentItem::FieldGroup {
                title,
                fields,
                color_index,
            } => {
                let color = GROUP_PALETTE[color_index % GROUP_PALETTE.len()];
                lines.push(format!("  ┌ {} ({})", title, color));
                for field in fields {
                    lines.push(format!("  │ {}: {}", field.hint, field.value));
                }
                lines.push("  └".to_string());
            }
            ContentItem::Image(image) => {
                lines.push(format!("  [image] {}", image.url));
            }
            ContentItem::Choices(choices) => {
                for (i, option) in choices.options.iter().enumerate() {
                    lines.push(format!("  [{}] {}", i + 1, option));
                }
            }
            ContentItem::Spacer { .. } => {
                lines.push(String::new());
            }
        }
    }

    lines
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
