//! The producer datagram socket.
//!
//! Each datagram is one record. The endpoint runs on a dedicated native
//! thread because it blocks in `recvmsg`; the sender's uid and pid come
//! from the `SCM_CREDENTIALS` control message that `SO_PASSCRED` makes
//! the kernel attach. Malformed datagrams are dropped and counted — a
//! datagram socket has no connection to fail.

use std::os::fd::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use nix::cmsg_space;
use nix::errno::Errno;
use nix::sys::socket::{
    recvmsg, setsockopt, sockopt::PassCred, ControlMessageOwned, MsgFlags, UnixAddr,
    UnixCredentials,
};
use std::io::IoSliceMut;
use tracing::{debug, info, warn};

use timber_proto::{IngestHeader, Partition, INGEST_HEADER_SIZE, MAX_DATAGRAM_PAYLOAD};
use timber_store::{LogStore, StoreError};

use crate::Result;

/// How often the serving thread checks the stop flag while idle.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Counters the endpoint maintains for statistics and tests.
#[derive(Debug, Default)]
pub struct IngestCounters {
    /// Datagrams accepted into the store.
    pub accepted: AtomicU64,
    /// Datagrams dropped for framing errors.
    pub malformed: AtomicU64,
    /// Datagrams rejected by the store (permission, validation).
    pub rejected: AtomicU64,
}

/// One bound ingest socket and its serving thread.
pub struct IngestEndpoint {
    counters: Arc<IngestCounters>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl IngestEndpoint {
    /// Binds `path` and starts serving. When `fixed_partition` is set,
    /// every datagram lands there regardless of its header (the trusted
    /// sidecar socket works this way).
    ///
    /// # Errors
    ///
    /// Bind or socket-option failures.
    pub fn bind(
        store: Arc<LogStore>,
        path: &Path,
        fixed_partition: Option<Partition>,
    ) -> Result<Self> {
        let _ = std::fs::remove_file(path);
        let socket = UnixDatagram::bind(path)?;
        setsockopt(&socket, PassCred, &true).map_err(std::io::Error::from)?;
        socket.set_read_timeout(Some(IDLE_POLL))?;
        info!(path = %path.display(), "ingest socket bound");

        let counters = Arc::new(IngestCounters::default());
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let counters = Arc::clone(&counters);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("timber-ingest".to_string())
                .spawn(move || serve(&socket, &store, &counters, &stop, fixed_partition))?
        };

        Ok(Self {
            counters,
            stop,
            thread: Some(thread),
        })
    }

    /// The endpoint's counters.
    #[must_use]
    pub fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    /// Stops the serving thread and waits for it.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for IngestEndpoint {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn serve(
    socket: &UnixDatagram,
    store: &LogStore,
    counters: &IngestCounters,
    stop: &AtomicBool,
    fixed_partition: Option<Partition>,
) {
    let mut buf = vec![0u8; INGEST_HEADER_SIZE + MAX_DATAGRAM_PAYLOAD];
    let mut cmsg = cmsg_space!(UnixCredentials);

    while !stop.load(Ordering::Acquire) {
        cmsg.clear();
        let mut iov = [IoSliceMut::new(&mut buf)];
        let received = match recvmsg::<UnixAddr>(
            socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg),
            MsgFlags::empty(),
        ) {
            Ok(msg) => {
                let creds = msg
                    .cmsgs()
                    .ok()
                    .into_iter()
                    .flatten()
                    .find_map(|c| match c {
                        ControlMessageOwned::ScmCredentials(creds) => Some(creds),
                        _ => None,
                    });
                Some((msg.bytes, creds))
            }
            Err(Errno::EAGAIN | Errno::EINTR) => None,
            Err(err) => {
                warn!(%err, "ingest recvmsg failed");
                None
            }
        };

        if let Some((bytes, creds)) = received {
            accept_datagram(store, counters, fixed_partition, &buf[..bytes], creds);
        }
    }
    debug!("ingest thread stopping");
}

/// Parses and stores one datagram. Split out so tests can drive the
/// path without a socket.
pub fn accept_datagram(
    store: &LogStore,
    counters: &IngestCounters,
    fixed_partition: Option<Partition>,
    datagram: &[u8],
    creds: Option<UnixCredentials>,
) {
    let Some(creds) = creds else {
        // Without credentials there is no principal to attribute the
        // record to; the kernel always supplies them under SO_PASSCRED.
        counters.malformed.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let (header, payload) = match IngestHeader::parse(datagram) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(%err, "dropping malformed datagram");
            counters.malformed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let partition = fixed_partition.unwrap_or(header.partition);
    let uid = creds.uid();
    let pid = u32::try_from(creds.pid()).unwrap_or(0);

    match store.log(
        partition,
        header.realtime,
        uid,
        pid,
        u32::from(header.tid),
        payload.to_vec(),
    ) {
        Ok(_) => {
            counters.accepted.fetch_add(1, Ordering::Relaxed);
        }
        Err(err @ StoreError::PermissionDenied(_)) => {
            debug!(%err, "rejected datagram");
            counters.rejected.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            debug!(%err, "store refused datagram");
            counters.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }
}
