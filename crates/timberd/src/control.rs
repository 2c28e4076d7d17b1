//! The administrative socket.
//!
//! Line-oriented text RPC: the peer sends one command per line and gets
//! a newline-terminated reply. Unknown or malformed commands answer
//! `Invalid` and leave the connection open; `exit` (or EOF) closes it.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use timber_proto::{ControlCommand, Partition};
use timber_store::LogStore;
use timber_tags::TagRegistry;

use crate::Result;

/// Longest accepted command line, in bytes.
const MAX_COMMAND_LINE: u64 = 4096;

/// The administrative endpoint.
pub struct ControlEndpoint {
    store: Arc<LogStore>,
    tags: Arc<TagRegistry>,
}

impl ControlEndpoint {
    /// Creates the endpoint.
    #[must_use]
    pub fn new(store: Arc<LogStore>, tags: Arc<TagRegistry>) -> Self {
        Self { store, tags }
    }

    /// Accepts connections on `listener` until the listener fails.
    ///
    /// # Errors
    ///
    /// Fatal accept errors; per-connection errors are contained.
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        info!("control endpoint serving");
        loop {
            let (stream, _addr) = listener.accept().await?;
            let store = Arc::clone(&self.store);
            let tags = Arc::clone(&self.tags);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(store, tags, stream).await {
                    debug!(%err, "control connection ended");
                }
            });
        }
    }
}

async fn handle_connection(
    store: Arc<LogStore>,
    tags: Arc<TagRegistry>,
    stream: UnixStream,
) -> Result<()> {
    let peer_uid = stream.peer_cred().ok().map(|c| c.uid());
    let privileged =
        peer_uid.is_some_and(|uid| uid == 0 || store.security_uids().contains(&uid));

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let mut line = String::new();
        let n = (&mut reader)
            .take(MAX_COMMAND_LINE)
            .read_line(&mut line)
            .await?;
        if n == 0 {
            return Ok(());
        }

        let command: ControlCommand = match line.trim().parse() {
            Ok(command) => command,
            Err(_) => {
                write_half.write_all(b"Invalid\n").await?;
                continue;
            }
        };

        if command == ControlCommand::Exit {
            return Ok(());
        }

        let reply = dispatch(&store, &tags, privileged, command);
        write_half.write_all(reply.as_bytes()).await?;
        if !reply.ends_with('\n') {
            write_half.write_all(b"\n").await?;
        }
    }
}

fn dispatch(
    store: &LogStore,
    tags: &TagRegistry,
    privileged: bool,
    command: ControlCommand,
) -> String {
    match command {
        ControlCommand::GetStatistics(partitions) => store.statistics_dump(&partitions),
        ControlCommand::Clear { partition, uid } => {
            if partition == Partition::Security && !privileged {
                "Permission denied".to_string()
            } else {
                store.clear(partition, uid);
                "success".to_string()
            }
        }
        ControlCommand::GetLogSize(partition) => store.quota(partition).to_string(),
        ControlCommand::SetLogSize(partition, bytes) => {
            match store.set_quota(partition, bytes) {
                Ok(()) => "success".to_string(),
                Err(err) => err.to_string(),
            }
        }
        ControlCommand::GetLogSizeUsed(partition) => store.used_bytes(partition).to_string(),
        ControlCommand::GetPruneList => store.prune_list_string(),
        ControlCommand::SetPruneList(spec) => match store.set_prune_list(&spec) {
            Ok(()) => "success".to_string(),
            Err(err) => err.to_string(),
        },
        ControlCommand::GetEventTag { name, format } => match tags.register(&name, &format) {
            Ok(id) => format!("{id}\t{name}\t{format}"),
            Err(err) => err.to_string(),
        },
        ControlCommand::Reinit => match tags.reinit() {
            Ok(()) => "success".to_string(),
            Err(err) => err.to_string(),
        },
        // Exit is handled by the connection loop.
        ControlCommand::Exit => String::new(),
    }
}
