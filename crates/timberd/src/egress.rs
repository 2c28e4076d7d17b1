//! The reader stream socket.
//!
//! One connection is one subscription: the peer sends a single request
//! line, the endpoint registers a subscription and streams framed
//! records until the subscription finishes, the peer disconnects, or
//! the daemon shuts down. A slow peer stalls only its own task; the
//! store keeps evicting underneath it and the gap surfaces as a drop
//! count (and, when enabled, a synthetic `chatty` record).

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info};

use timber_proto::{encode_frame, Partition, ReadRequest};
use timber_store::{chatty_record, LogStore, StoreError, SubscriptionHandle};

use crate::Result;

/// Longest accepted request line, in bytes.
const MAX_REQUEST_LINE: u64 = 1024;

/// The reader endpoint.
pub struct EgressEndpoint {
    store: Arc<LogStore>,
    chatty: bool,
}

impl EgressEndpoint {
    /// Creates the endpoint.
    #[must_use]
    pub fn new(store: Arc<LogStore>, chatty: bool) -> Self {
        Self { store, chatty }
    }

    /// Accepts connections on `listener` until the listener fails.
    ///
    /// # Errors
    ///
    /// Fatal accept errors; per-connection errors are contained.
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        info!("reader endpoint serving");
        loop {
            let (stream, _addr) = listener.accept().await?;
            let store = Arc::clone(&self.store);
            let chatty = self.chatty;
            tokio::spawn(async move {
                if let Err(err) = handle_reader(store, stream, chatty).await {
                    debug!(%err, "reader connection ended");
                }
            });
        }
    }
}

async fn handle_reader(store: Arc<LogStore>, stream: UnixStream, chatty: bool) -> Result<()> {
    let peer_uid = stream.peer_cred().ok().map(|c| c.uid());

    let (read_half, mut write_half) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read_half)
        .take(MAX_REQUEST_LINE)
        .read_line(&mut line)
        .await?;

    let request: ReadRequest = match line.trim().parse() {
        Ok(request) => request,
        Err(err) => {
            debug!(%err, "bad reader request");
            return Ok(());
        }
    };

    // Reading the security partition needs the same approval as
    // writing it.
    if request.mask.contains(Partition::Security)
        && !peer_uid.is_some_and(|uid| store.security_uids().contains(&uid))
    {
        write_half.write_all(b"permission denied\n").await?;
        return Ok(());
    }

    let handle = match store.subscribe(&request, chatty) {
        Ok(handle) => handle,
        Err(err @ StoreError::TooManySubscriptions(_)) => {
            write_half.write_all(format!("{err}\n").as_bytes()).await?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let result = stream_records(&store, &handle, &mut write_half).await;
    store.unsubscribe(&handle);
    result
}

async fn stream_records(
    store: &LogStore,
    handle: &SubscriptionHandle,
    writer: &mut (impl AsyncWriteExt + Unpin),
) -> Result<()> {
    let mut tail: watch::Receiver<u64> = store.tail_receiver();

    loop {
        let batch = store.fetch_batch(handle);

        if batch.dropped > 0 && handle.state().wants_chatty() {
            let partition = handle
                .state()
                .mask()
                .iter()
                .next()
                .unwrap_or(Partition::Main);
            let notice = chatty_record(partition, batch.dropped);
            writer.write_all(&encode_frame(&notice)).await?;
        }

        for record in &batch.records {
            writer.write_all(&encode_frame(record)).await?;
        }

        if batch.finished || handle.is_cancelled() {
            break;
        }

        if batch.caught_up && batch.records.is_empty() && batch.dropped == 0 {
            // Caught up: wait for the tail to move, a cancel, or the
            // requested idle deadline.
            let wait = async {
                tokio::select! {
                    changed = tail.changed() => changed.is_ok(),
                    () = handle.state().cancelled_wait() => true,
                }
            };
            let keep_going = match handle.state().idle_timeout() {
                Some(deadline) => match tokio::time::timeout(deadline, wait).await {
                    Ok(alive) => alive,
                    Err(_elapsed) => false,
                },
                None => wait.await,
            };
            if !keep_going {
                break;
            }
            if handle.is_cancelled() {
                break;
            }
        }
    }
    Ok(())
}
