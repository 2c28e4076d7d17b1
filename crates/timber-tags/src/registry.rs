//! The tag registry.
//!
//! This module provides:
//! - [`TagRegistry`] — Loads tag-map files, answers lookups from a
//!   copy-on-write snapshot, serializes mutation, persists and rotates
//! - [`TagEntry`] / [`TagSnapshot`] — The table and its rows
//!
//! Registration is idempotent: asking for an existing `(name, format)`
//! pair returns its id; asking for a known name with a different format
//! is a conflict.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::TagError;
use crate::file::{format_tag_file, parse_tag_file};
use crate::Result;

/// First id handed out to dynamically registered tags.
const DYNAMIC_RANGE_START: u32 = 100_000;

/// One tag binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    /// Tag name.
    pub name: String,
    /// Format descriptor; empty when none was declared.
    pub format: String,
}

/// An immutable view of the whole table.
#[derive(Debug, Default)]
pub struct TagSnapshot {
    by_id: BTreeMap<u32, TagEntry>,
    by_name: HashMap<String, u32>,
}

impl TagSnapshot {
    fn from_table(by_id: BTreeMap<u32, TagEntry>) -> Self {
        let by_name = by_id
            .iter()
            .map(|(id, entry)| (entry.name.clone(), *id))
            .collect();
        Self { by_id, by_name }
    }

    /// Looks up a binding by id.
    #[must_use]
    pub fn get_by_id(&self, id: u32) -> Option<&TagEntry> {
        self.by_id.get(&id)
    }

    /// Looks up an id by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// The registry. Cheap to share behind an `Arc`.
pub struct TagRegistry {
    /// Read-only base files loaded on every (re)init.
    base_files: Vec<PathBuf>,
    /// The file dynamic registrations persist to. Also reloaded.
    writable_file: Option<PathBuf>,
    snapshot: RwLock<Arc<TagSnapshot>>,
}

impl TagRegistry {
    /// An empty, file-less registry.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            base_files: Vec::new(),
            writable_file: None,
            snapshot: RwLock::new(Arc::new(TagSnapshot::default())),
        }
    }

    /// Loads a registry from the given base files plus one writable
    /// file. Missing files are treated as empty; malformed files fail.
    ///
    /// # Errors
    ///
    /// Propagates I/O and parse failures from the files that do exist.
    pub fn load(base_files: Vec<PathBuf>, writable_file: Option<PathBuf>) -> Result<Self> {
        let registry = Self {
            base_files,
            writable_file,
            snapshot: RwLock::new(Arc::new(TagSnapshot::default())),
        };
        registry.reinit()?;
        Ok(registry)
    }

    /// The current table. Readers hold this snapshot for as long as they
    /// like without blocking writers.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TagSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Looks up a binding by id.
    #[must_use]
    pub fn get_by_id(&self, id: u32) -> Option<TagEntry> {
        self.snapshot().get_by_id(id).cloned()
    }

    /// Looks up an id by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<u32> {
        self.snapshot().get_by_name(name)
    }

    /// Returns the id bound to `(name, format)`, allocating one in the
    /// dynamic range if the name is new.
    ///
    /// # Errors
    ///
    /// [`TagError::Conflict`] when `name` is bound to a different
    /// format; [`TagError::Exhausted`] when the dynamic range is full;
    /// I/O errors from persisting the writable file.
    pub fn register(&self, name: &str, format: &str) -> Result<u32> {
        let mut guard = self.snapshot.write();

        if let Some(id) = guard.get_by_name(name) {
            let existing = guard.get_by_id(id).cloned().unwrap_or(TagEntry {
                name: name.to_string(),
                format: String::new(),
            });
            if existing.format == format {
                return Ok(id);
            }
            return Err(TagError::Conflict(format!(
                "name '{name}' is bound to format '{}'",
                existing.format
            )));
        }

        let mut by_id = guard.by_id.clone();
        let id = next_free_id(&by_id)?;
        by_id.insert(
            id,
            TagEntry {
                name: name.to_string(),
                format: format.to_string(),
            },
        );
        self.persist(&by_id)?;
        *guard = Arc::new(TagSnapshot::from_table(by_id));
        debug!(id, name, format, "registered event tag");
        Ok(id)
    }

    /// Re-reads every file and swaps the snapshot in one step. Dynamic
    /// registrations already persisted survive through the writable
    /// file; the writable file is rewritten in canonical form.
    ///
    /// # Errors
    ///
    /// Propagates I/O and parse failures.
    pub fn reinit(&self) -> Result<()> {
        let mut by_id = BTreeMap::new();
        for path in self.base_files.iter().chain(self.writable_file.iter()) {
            match fs::read_to_string(path) {
                Ok(contents) => {
                    for (id, entry) in parse_tag_file(&contents)? {
                        if let Some(previous) = by_id.insert(id, entry) {
                            warn!(id, name = %previous.name, "tag id redefined by later file");
                        }
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "tag file absent, skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.persist(&by_id)?;
        let mut guard = self.snapshot.write();
        *guard = Arc::new(TagSnapshot::from_table(by_id));
        info!(entries = guard.len(), "tag dictionary loaded");
        Ok(())
    }

    /// Rewrites the writable file from `by_id`, atomically via a
    /// temporary sibling.
    fn persist(&self, by_id: &BTreeMap<u32, TagEntry>) -> Result<()> {
        let Some(path) = &self.writable_file else {
            return Ok(());
        };
        let rendered = format_tag_file(by_id);
        let tmp = temp_sibling(path);
        fs::write(&tmp, rendered)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("tags"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}

fn next_free_id(by_id: &BTreeMap<u32, TagEntry>) -> Result<u32> {
    let mut candidate = by_id
        .range(DYNAMIC_RANGE_START..)
        .next_back()
        .map_or(DYNAMIC_RANGE_START, |(id, _)| id.saturating_add(1));
    if candidate == u32::MAX {
        // The tail of the range is occupied; scan for a hole.
        candidate = (DYNAMIC_RANGE_START..u32::MAX)
            .find(|id| !by_id.contains_key(id))
            .ok_or(TagError::Exhausted)?;
    }
    Ok(candidate)
}
