//! Daemon configuration.
//!
//! Loaded from a JSON file (`timberd run --config <path>`) or built from
//! defaults. Quota overrides are keyed by partition name and validated
//! against the closed partition set at load time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use timber_proto::Partition;
use timber_store::{BufferBackend, StoreConfig, MAX_QUOTA, MIN_QUOTA};

use crate::error::ServerError;
use crate::Result;

/// Configuration for one daemon instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Directory the three sockets are created in.
    pub socket_dir: PathBuf,
    /// Partition storage backend.
    pub backend: BufferBackend,
    /// Per-partition quota overrides in bytes, keyed by partition name.
    pub quotas: HashMap<String, usize>,
    /// Cap on concurrently registered subscriptions.
    pub max_subscriptions: usize,
    /// Uids allowed to write the security partition, and to read or
    /// clear it administratively.
    pub security_uids: Vec<u32>,
    /// Read-only tag-map files loaded at startup and on `reinit`.
    pub tag_files: Vec<PathBuf>,
    /// The tag-map file dynamic registrations persist to.
    pub writable_tag_file: Option<PathBuf>,
    /// Kernel ring line source, followed into the kernel partition.
    pub kmsg_source: Option<PathBuf>,
    /// Audit line source, followed into the security partition.
    pub audit_source: Option<PathBuf>,
    /// Mirror audit records into the main partition as well.
    pub audit_to_main: bool,
    /// Mirror audit records into the events partition as well.
    pub audit_to_events: bool,
    /// Datagram socket for the trusted-execution sidecar; its records
    /// land in the kernel partition regardless of their header.
    pub sidecar_socket: Option<String>,
    /// Emit a synthetic record on a subscription when it lost records
    /// to eviction.
    pub chatty: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from("/run/timber"),
            backend: BufferBackend::default(),
            quotas: HashMap::new(),
            max_subscriptions: 1024,
            security_uids: vec![0, 1000],
            tag_files: vec![PathBuf::from("/etc/timber/event-tags")],
            writable_tag_file: Some(PathBuf::from("/data/misc/logd/event-log-tags")),
            kmsg_source: None,
            audit_source: None,
            audit_to_main: true,
            audit_to_events: true,
            sidecar_socket: None,
            chatty: true,
        }
    }
}

impl DaemonConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// I/O failures, JSON failures, and validation failures, each with
    /// the offending detail.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks partition names and quota ranges.
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        for (name, bytes) in &self.quotas {
            name.parse::<Partition>()
                .map_err(|_| ServerError::Config(format!("unknown partition '{name}'")))?;
            if !(MIN_QUOTA..=MAX_QUOTA).contains(bytes) {
                return Err(ServerError::Config(format!(
                    "quota for '{name}' outside [{MIN_QUOTA}, {MAX_QUOTA}]"
                )));
            }
        }
        if self.max_subscriptions == 0 {
            return Err(ServerError::Config("max_subscriptions is zero".into()));
        }
        Ok(())
    }

    /// The store configuration this daemon configuration describes.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        let mut store = StoreConfig {
            backend: self.backend,
            max_subscriptions: self.max_subscriptions,
            security_uids: self.security_uids.clone(),
            ..StoreConfig::default()
        };
        for (name, bytes) in &self.quotas {
            if let Ok(partition) = name.parse::<Partition>() {
                store.quotas[partition.id() as usize] = *bytes;
            }
        }
        store
    }

    /// Path of the producer datagram socket.
    #[must_use]
    pub fn ingest_socket(&self) -> PathBuf {
        self.socket_dir.join("ingest.sock")
    }

    /// Path of the reader stream socket.
    #[must_use]
    pub fn reader_socket(&self) -> PathBuf {
        self.socket_dir.join("reader.sock")
    }

    /// Path of the administrative socket.
    #[must_use]
    pub fn control_socket(&self) -> PathBuf {
        self.socket_dir.join("control.sock")
    }

    /// Path of the sidecar socket, when configured.
    #[must_use]
    pub fn sidecar_socket_path(&self) -> Option<PathBuf> {
        self.sidecar_socket
            .as_ref()
            .map(|name| self.socket_dir.join(name))
    }
}
