//! Table rendering for step snapshots.
//!
//! Four fixed-width columns: script disassembly (with a `>` marker on the
//! instruction about to run), then stack, alt stack and witness, each top
//! first. Values wider than a column are cut in the middle, keeping the
//! last few characters.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::core::assembler::disassemble;
use crate::core::script_debug::StepSnapshot;
use crate::core::stack::StackItem;

pub const DEFAULT_COLUMN_WIDTH: usize = 40;
pub const DEFAULT_MAX_ROWS: usize = 25;

/// Trailing characters kept when a value is cut.
const KEEP_TAIL: usize = 4;
const ELLIPSIS: &str = "...";
const VERIFIED_MARKER: &str = "witness program verified OK";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading tag file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing tags: {0}")]
    Json(#[from] serde_json::Error),
}

/// Display labels for known values: hex data or opcode mnemonics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(HashMap<String, String>);

impl Tags {
    /// Parse a JSON object of `{"<hex>": "<label>"}`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let map: HashMap<String, String> = serde_json::from_str(json)?;
        Ok(Tags(
            map.into_iter()
                .map(|(key, label)| (normalize_key(key), label))
                .collect(),
        ))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn insert(&mut self, key: impl Into<String>, label: impl Into<String>) {
        self.0.insert(normalize_key(key.into()), label.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Hex keys match case-insensitively; mnemonics are kept as written.
fn normalize_key(key: String) -> String {
    if key.chars().all(|c| c.is_ascii_hexdigit()) {
        key.to_lowercase()
    } else {
        key
    }
}

/// Renderer settings, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    pub column_width: usize,
    pub max_rows: usize,
    pub tags: Tags,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            column_width: DEFAULT_COLUMN_WIDTH,
            max_rows: DEFAULT_MAX_ROWS,
            tags: Tags::default(),
        }
    }
}

/// Turns snapshots into text tables. Pure: the same snapshot always renders
/// to the same string.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Renderer { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render a snapshot as lines joined by `\n`, without a trailing newline.
    pub fn render(&self, snapshot: &StepSnapshot) -> String {
        let width = self.config.column_width.max(ELLIPSIS.len() + KEEP_TAIL + 1);
        let max_rows = self.config.max_rows.max(1);

        let mut script: Vec<String> = disassemble(&snapshot.script)
            .into_iter()
            .map(|token| self.label(&token))
            .collect();
        // End of script: the marker sits on an empty row below the last opcode.
        if snapshot.pc >= script.len() {
            script.push(String::new());
        }
        let cursor = snapshot.pc.min(script.len().saturating_sub(1));
        // Scroll so the cursor stays inside the visible rows.
        let first = (cursor + 1).saturating_sub(max_rows);
        let script: Vec<String> = script
            .into_iter()
            .enumerate()
            .skip(first)
            .map(|(i, token)| {
                let marker = if i == cursor { '>' } else { ' ' };
                format!("{} {}", marker, self.fit(&token, width - 2))
            })
            .collect();

        let stack = self.stack_column(&snapshot.stack, width);
        let altstack = self.stack_column(&snapshot.altstack, width);
        let witness: Vec<String> = snapshot
            .witness
            .iter()
            .flatten()
            .rev()
            .map(|el| self.fit(&self.label(&StackItem::from(el.as_slice()).to_string()), width))
            .collect();

        let columns = [script, stack, altstack, witness];
        let rows = columns
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .min(max_rows);

        let mut lines = Vec::with_capacity(rows + 3);
        if snapshot.verified_marker {
            lines.push(VERIFIED_MARKER.to_string());
        }
        lines.push(join_row(
            ["script", "stack", "alt stack", "witness"]
                .iter()
                .map(|h| format!("{:<width$}", h, width = width)),
        ));
        lines.push("-".repeat(width * 4 + 3 * 3));
        for row in 0..rows {
            lines.push(join_row(columns.iter().map(|col| {
                let cell = col.get(row).map(String::as_str).unwrap_or("");
                format!("{:<width$}", cell, width = width)
            })));
        }
        lines.join("\n")
    }

    /// Stack items top first.
    fn stack_column(&self, items: &[StackItem], width: usize) -> Vec<String> {
        items
            .iter()
            .rev()
            .map(|item| self.fit(&self.label(&item.to_string()), width))
            .collect()
    }

    fn label(&self, value: &str) -> String {
        self.config
            .tags
            .get(value)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string())
    }

    fn fit(&self, value: &str, width: usize) -> String {
        truncate_middle(value, width)
    }
}

fn join_row(cells: impl Iterator<Item = String>) -> String {
    cells.collect::<Vec<_>>().join(" | ").trim_end().to_string()
}

/// Cut `value` to at most `width` characters, keeping the head and the last
/// few characters around an ellipsis.
pub fn truncate_middle(value: &str, width: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= width {
        return value.to_string();
    }
    if width <= ELLIPSIS.len() + KEEP_TAIL {
        return chars[..width].iter().collect();
    }
    let head = width - ELLIPSIS.len() - KEEP_TAIL;
    let mut out: String = chars[..head].iter().collect();
    out.push_str(ELLIPSIS);
    out.extend(&chars[chars.len() - KEEP_TAIL..]);
    out
}
