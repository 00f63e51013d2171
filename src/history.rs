//! Command history for ampl-console
//!
//! Stores committed commands and the browse cursor used by arrow-key
//! navigation. Optionally persisted to `~/.ampl-console/history`.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

/// Default maximum number of history entries
pub const HISTORY_LIMIT: usize = 1000;

/// A single history entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    /// The command text
    pub command: String,
    /// Unix timestamp of the commit
    pub timestamp: u64,
}

/// Command history storage
pub struct CommandHistory {
    /// All entries (newest last)
    entries: Vec<HistoryEntry>,
    /// Browse position; `entries.len()` means a fresh line
    cursor: usize,
    /// File path for persistence
    file_path: Option<PathBuf>,
    /// Maximum entries
    max_entries: usize,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHistory {
    /// Create an in-memory history
    pub fn new() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }

    pub fn with_limit(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            file_path: None,
            max_entries: max_entries.max(1),
        }
    }

    /// Create a history backed by a file, loading existing entries
    pub fn persistent(path: PathBuf, max_entries: usize) -> Self {
        let mut history = Self::with_limit(max_entries);
        history.file_path = Some(path);
        history.load();
        history
    }

    /// Default history file path
    pub fn default_path() -> Option<PathBuf> {
        crate::config::app_dir().map(|dir| dir.join("history"))
    }

    /// Load history from file
    fn load(&mut self) {
        let Some(path) = self.file_path.clone() else {
            return;
        };
        if !path.exists() {
            return;
        }
        match fs::read_to_string(&path) {
            Ok(content) => {
                for line in content.lines() {
                    // "<timestamp>;<command>"
                    if let Some((ts_str, cmd)) = line.split_once(';') {
                        if let Ok(timestamp) = ts_str.parse::<u64>() {
                            if !cmd.trim().is_empty() {
                                self.entries.push(HistoryEntry {
                                    command: cmd.to_string(),
                                    timestamp,
                                });
                            }
                        }
                    }
                }
                self.truncate();
                debug!("Loaded {} history entries", self.entries.len());
            }
            Err(e) => warn!("Failed to read history {}: {}", path.display(), e),
        }
        self.cursor = self.entries.len();
    }

    /// Save history to file
    fn save(&self) {
        let Some(path) = &self.file_path else {
            return;
        };
        let content: String = self
            .entries
            .iter()
            .map(|e| format!("{};{}\n", e.timestamp, e.command))
            .collect();
        if let Err(e) = fs::write(path, content) {
            warn!("Failed to write history {}: {}", path.display(), e);
        }
    }

    /// Record a committed command and return to a fresh line
    pub fn push(&mut self, command: String) {
        // Multi-line entries would break the file format
        let command = if command.contains(['\r', '\n']) {
            command.replace(['\r', '\n'], " ")
        } else {
            command
        };
        self.entries.push(HistoryEntry {
            command,
            timestamp: unix_now(),
        });
        self.truncate();
        self.cursor = self.entries.len();
        self.save();
    }

    fn truncate(&mut self) {
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }

    /// Step back one entry. `None` when already at the oldest.
    pub fn older(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(|e| e.command.as_str())
    }

    /// Step forward one entry. `None` means the cursor is back on a fresh line.
    pub fn newer(&mut self) -> Option<&str> {
        if self.cursor + 1 < self.entries.len() {
            self.cursor += 1;
            self.entries.get(self.cursor).map(|e| e.command.as_str())
        } else {
            self.reset_cursor();
            None
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = self.entries.len();
    }

    #[allow(dead_code)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[allow(dead_code)]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
