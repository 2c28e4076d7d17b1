//! Partition storage backends.
//!
//! This module provides:
//! - [`PartitionBuffer`] — The capability every backend implements:
//!   append, targeted eviction, range collection, byte accounting
//! - [`SimpleBuffer`] — One allocation per record, cheap eviction
//! - [`SerializedBuffer`] — Records packed back-to-back into chunks,
//!   far fewer allocations at the cost of copy-on-read
//! - [`BufferBackend`] — Configuration selector between the two
//!
//! Records inside a buffer are strictly ordered by sequence; every
//! method relies on that.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use timber_proto::{Partition, Record, Timestamp};

/// Capacity of one serialized chunk, in encoded bytes.
const CHUNK_CAPACITY: usize = 64 * 1024;

/// Fixed size of one encoded entry header inside a serialized chunk.
const ENTRY_HEADER: usize = 30;

/// The storage capability a partition exposes to the store.
///
/// Implementations hold records in ascending sequence order and account
/// usage in [`Record::wire_size`] bytes.
pub trait PartitionBuffer: Send + Sync {
    /// The partition this buffer stores.
    fn partition(&self) -> Partition;

    /// Appends a record. The caller guarantees ascending sequences.
    fn append(&mut self, record: Arc<Record>);

    /// Currently resident bytes.
    fn byte_usage(&self) -> usize;

    /// Currently resident records.
    fn record_count(&self) -> usize;

    /// Sequence of the oldest resident record.
    fn oldest_sequence(&self) -> Option<u64>;

    /// Evicts the oldest record.
    fn evict_oldest(&mut self) -> Option<Arc<Record>>;

    /// Evicts the oldest record matching `pred`.
    fn evict_oldest_matching(&mut self, pred: &dyn Fn(&Record) -> bool) -> Option<Arc<Record>>;

    /// Evicts every record matching `pred`, oldest first.
    fn evict_all_matching(&mut self, pred: &dyn Fn(&Record) -> bool) -> Vec<Arc<Record>>;

    /// Collects up to `limit` records with sequence in `[start, stop]`,
    /// in ascending sequence order.
    fn collect_range(&self, start: u64, stop: u64, limit: usize) -> Vec<Arc<Record>>;
}

/// Which backend a store uses for its partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferBackend {
    /// [`SimpleBuffer`].
    Simple,
    /// [`SerializedBuffer`].
    #[default]
    Serialized,
}

impl BufferBackend {
    /// Constructs a buffer of this backend for `partition`.
    #[must_use]
    pub fn make(self, partition: Partition) -> Box<dyn PartitionBuffer> {
        match self {
            Self::Simple => Box::new(SimpleBuffer::new(partition)),
            Self::Serialized => Box::new(SerializedBuffer::new(partition)),
        }
    }
}

/// A deque of individually allocated records.
pub struct SimpleBuffer {
    partition: Partition,
    records: VecDeque<Arc<Record>>,
    bytes: usize,
}

impl SimpleBuffer {
    /// Creates an empty buffer for `partition`.
    #[must_use]
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            records: VecDeque::new(),
            bytes: 0,
        }
    }

    fn remove_at(&mut self, index: usize) -> Option<Arc<Record>> {
        let record = self.records.remove(index)?;
        self.bytes -= record.wire_size();
        Some(record)
    }
}

impl PartitionBuffer for SimpleBuffer {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn append(&mut self, record: Arc<Record>) {
        self.bytes += record.wire_size();
        self.records.push_back(record);
    }

    fn byte_usage(&self) -> usize {
        self.bytes
    }

    fn record_count(&self) -> usize {
        self.records.len()
    }

    fn oldest_sequence(&self) -> Option<u64> {
        self.records.front().map(|r| r.sequence)
    }

    fn evict_oldest(&mut self) -> Option<Arc<Record>> {
        self.remove_at(0)
    }

    fn evict_oldest_matching(&mut self, pred: &dyn Fn(&Record) -> bool) -> Option<Arc<Record>> {
        let index = self.records.iter().position(|r| pred(r))?;
        self.remove_at(index)
    }

    fn evict_all_matching(&mut self, pred: &dyn Fn(&Record) -> bool) -> Vec<Arc<Record>> {
        let mut evicted = Vec::new();
        let mut kept = VecDeque::with_capacity(self.records.len());
        for record in self.records.drain(..) {
            if pred(&record) {
                self.bytes -= record.wire_size();
                evicted.push(record);
            } else {
                kept.push_back(record);
            }
        }
        self.records = kept;
        evicted
    }

    fn collect_range(&self, start: u64, stop: u64, limit: usize) -> Vec<Arc<Record>> {
        let mut out = Vec::new();
        for record in &self.records {
            if record.sequence > stop || out.len() >= limit {
                break;
            }
            if record.sequence >= start {
                out.push(Arc::clone(record));
            }
        }
        out
    }
}

/// Records encoded back-to-back into fixed-capacity chunks.
///
/// Entry layout inside a chunk:
///
/// ```text
/// le64 sequence | le32 sec | le32 nsec | le32 uid | le32 pid | le32 tid
/// le16 payload_len | payload
/// ```
///
/// The partition is stored once on the buffer. Evicting the head is an
/// offset bump; evicting from the middle rewrites one chunk.
pub struct SerializedBuffer {
    partition: Partition,
    chunks: VecDeque<Chunk>,
    bytes: usize,
    records: usize,
}

struct Chunk {
    data: Vec<u8>,
    /// Offset of the first live entry.
    head: usize,
    records: usize,
}

impl Chunk {
    fn new() -> Self {
        Self {
            data: Vec::with_capacity(CHUNK_CAPACITY),
            head: 0,
            records: 0,
        }
    }
}

fn encode_entry(data: &mut Vec<u8>, record: &Record) {
    data.extend_from_slice(&record.sequence.to_le_bytes());
    data.extend_from_slice(&record.realtime.sec.to_le_bytes());
    data.extend_from_slice(&record.realtime.nsec.to_le_bytes());
    data.extend_from_slice(&record.uid.to_le_bytes());
    data.extend_from_slice(&record.pid.to_le_bytes());
    data.extend_from_slice(&record.tid.to_le_bytes());
    let len = u16::try_from(record.payload.len()).unwrap_or(u16::MAX);
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&record.payload);
}

fn decode_entry(partition: Partition, data: &[u8], offset: usize) -> (Record, usize) {
    let word32 = |at: usize| {
        u32::from_le_bytes([
            data[offset + at],
            data[offset + at + 1],
            data[offset + at + 2],
            data[offset + at + 3],
        ])
    };
    let mut seq_bytes = [0u8; 8];
    seq_bytes.copy_from_slice(&data[offset..offset + 8]);
    let len = usize::from(u16::from_le_bytes([data[offset + 28], data[offset + 29]]));
    let payload_at = offset + ENTRY_HEADER;
    (
        Record {
            sequence: u64::from_le_bytes(seq_bytes),
            partition,
            realtime: Timestamp::new(word32(8), word32(12)),
            uid: word32(16),
            pid: word32(20),
            tid: word32(24),
            payload: data[payload_at..payload_at + len].to_vec(),
        },
        payload_at + len,
    )
}

impl SerializedBuffer {
    /// Creates an empty buffer for `partition`.
    #[must_use]
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            chunks: VecDeque::new(),
            bytes: 0,
            records: 0,
        }
    }

    /// Walks entries as `(chunk_index, offset, record)` until `visit`
    /// returns `false`.
    fn walk(&self, mut visit: impl FnMut(usize, usize, Record) -> bool) {
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            let mut offset = chunk.head;
            while offset < chunk.data.len() {
                let (record, next) = decode_entry(self.partition, &chunk.data, offset);
                if !visit(chunk_index, offset, record) {
                    return;
                }
                offset = next;
            }
        }
    }

    /// Removes the entry at `offset` in chunk `chunk_index` by rewriting
    /// the chunk's live region without it.
    fn remove_entry(&mut self, chunk_index: usize, offset: usize) -> Arc<Record> {
        let chunk = &mut self.chunks[chunk_index];
        let (record, next) = decode_entry(self.partition, &chunk.data, offset);

        if offset == chunk.head {
            chunk.head = next;
        } else {
            let mut rebuilt = Vec::with_capacity(chunk.data.len() - chunk.head - (next - offset));
            rebuilt.extend_from_slice(&chunk.data[chunk.head..offset]);
            rebuilt.extend_from_slice(&chunk.data[next..]);
            chunk.data = rebuilt;
            chunk.head = 0;
        }
        chunk.records -= 1;
        if chunk.records == 0 {
            let _ = self.chunks.remove(chunk_index);
        }

        self.bytes -= record.wire_size();
        self.records -= 1;
        Arc::new(record)
    }
}

impl PartitionBuffer for SerializedBuffer {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn append(&mut self, record: Arc<Record>) {
        let needed = ENTRY_HEADER + record.payload.len();
        let fits = self
            .chunks
            .back()
            .is_some_and(|c| c.data.len() + needed <= CHUNK_CAPACITY);
        if !fits {
            self.chunks.push_back(Chunk::new());
        }
        let chunk = self.chunks.back_mut().expect("chunk just ensured");
        encode_entry(&mut chunk.data, &record);
        chunk.records += 1;
        self.bytes += record.wire_size();
        self.records += 1;
    }

    fn byte_usage(&self) -> usize {
        self.bytes
    }

    fn record_count(&self) -> usize {
        self.records
    }

    fn oldest_sequence(&self) -> Option<u64> {
        let chunk = self.chunks.front()?;
        let (record, _) = decode_entry(self.partition, &chunk.data, chunk.head);
        Some(record.sequence)
    }

    fn evict_oldest(&mut self) -> Option<Arc<Record>> {
        if self.chunks.is_empty() {
            return None;
        }
        let head = self.chunks[0].head;
        Some(self.remove_entry(0, head))
    }

    fn evict_oldest_matching(&mut self, pred: &dyn Fn(&Record) -> bool) -> Option<Arc<Record>> {
        let mut found = None;
        self.walk(|chunk_index, offset, record| {
            if pred(&record) {
                found = Some((chunk_index, offset));
                false
            } else {
                true
            }
        });
        let (chunk_index, offset) = found?;
        Some(self.remove_entry(chunk_index, offset))
    }

    fn evict_all_matching(&mut self, pred: &dyn Fn(&Record) -> bool) -> Vec<Arc<Record>> {
        let mut evicted = Vec::new();
        let mut rebuilt: VecDeque<Chunk> = VecDeque::new();
        for chunk in std::mem::take(&mut self.chunks) {
            let mut offset = chunk.head;
            while offset < chunk.data.len() {
                let (record, next) = decode_entry(self.partition, &chunk.data, offset);
                offset = next;
                if pred(&record) {
                    self.bytes -= record.wire_size();
                    self.records -= 1;
                    evicted.push(Arc::new(record));
                } else {
                    let needed = ENTRY_HEADER + record.payload.len();
                    let fits = rebuilt
                        .back()
                        .is_some_and(|c: &Chunk| c.data.len() + needed <= CHUNK_CAPACITY);
                    if !fits {
                        rebuilt.push_back(Chunk::new());
                    }
                    let target = rebuilt.back_mut().expect("chunk just ensured");
                    encode_entry(&mut target.data, &record);
                    target.records += 1;
                }
            }
        }
        self.chunks = rebuilt;
        evicted
    }

    fn collect_range(&self, start: u64, stop: u64, limit: usize) -> Vec<Arc<Record>> {
        let mut out = Vec::new();
        self.walk(|_, _, record| {
            if record.sequence > stop || out.len() >= limit {
                return false;
            }
            if record.sequence >= start {
                out.push(Arc::new(record));
            }
            true
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timber_proto::{text_payload, Priority};

    fn record(sequence: u64, uid: u32, message: &str) -> Arc<Record> {
        Arc::new(Record {
            sequence,
            partition: Partition::Main,
            realtime: Timestamp::new(u32::try_from(sequence).unwrap_or(0), 0),
            uid,
            pid: uid + 1,
            tid: uid + 2,
            payload: text_payload(Priority::Info, "test", message),
        })
    }

    fn backends() -> Vec<Box<dyn PartitionBuffer>> {
        vec![
            BufferBackend::Simple.make(Partition::Main),
            BufferBackend::Serialized.make(Partition::Main),
        ]
    }

    #[test]
    fn append_accounts_bytes_and_records() {
        for mut buffer in backends() {
            let r = record(1, 1000, "hello");
            buffer.append(Arc::clone(&r));
            buffer.append(record(2, 1000, "world"));
            assert_eq!(buffer.record_count(), 2);
            assert_eq!(buffer.byte_usage(), r.wire_size() * 2);
            assert_eq!(buffer.oldest_sequence(), Some(1));
        }
    }

    #[test]
    fn evict_oldest_is_fifo() {
        for mut buffer in backends() {
            for seq in 1..=5 {
                buffer.append(record(seq, 1000, "x"));
            }
            let evicted = buffer.evict_oldest().expect("nonempty");
            assert_eq!(evicted.sequence, 1);
            assert_eq!(buffer.oldest_sequence(), Some(2));
            assert_eq!(buffer.record_count(), 4);
        }
    }

    #[test]
    fn evict_oldest_matching_skips_non_matches() {
        for mut buffer in backends() {
            buffer.append(record(1, 1000, "a"));
            buffer.append(record(2, 2000, "b"));
            buffer.append(record(3, 1000, "c"));

            let evicted = buffer
                .evict_oldest_matching(&|r| r.uid == 2000)
                .expect("match");
            assert_eq!(evicted.sequence, 2);
            assert_eq!(buffer.record_count(), 2);

            let remaining = buffer.collect_range(0, u64::MAX, usize::MAX);
            let sequences: Vec<u64> = remaining.iter().map(|r| r.sequence).collect();
            assert_eq!(sequences, vec![1, 3]);
        }
    }

    #[test]
    fn evict_oldest_matching_returns_none_without_match() {
        for mut buffer in backends() {
            buffer.append(record(1, 1000, "a"));
            assert!(buffer.evict_oldest_matching(&|r| r.uid == 9).is_none());
            assert_eq!(buffer.record_count(), 1);
        }
    }

    #[test]
    fn evict_all_matching_clears_by_uid() {
        for mut buffer in backends() {
            for seq in 1..=6 {
                let uid = if seq % 2 == 0 { 2000 } else { 1000 };
                buffer.append(record(seq, uid, "m"));
            }
            let evicted = buffer.evict_all_matching(&|r| r.uid == 2000);
            assert_eq!(evicted.len(), 3);
            assert!(evicted.iter().all(|r| r.uid == 2000));
            assert_eq!(buffer.record_count(), 3);

            let remaining = buffer.collect_range(0, u64::MAX, usize::MAX);
            assert!(remaining.iter().all(|r| r.uid == 1000));
        }
    }

    #[test]
    fn collect_range_respects_bounds_and_limit() {
        for mut buffer in backends() {
            for seq in 1..=10 {
                buffer.append(record(seq, 1000, "m"));
            }
            let collected = buffer.collect_range(3, 8, usize::MAX);
            let sequences: Vec<u64> = collected.iter().map(|r| r.sequence).collect();
            assert_eq!(sequences, vec![3, 4, 5, 6, 7, 8]);

            let limited = buffer.collect_range(3, 8, 2);
            assert_eq!(limited.len(), 2);
            assert_eq!(limited[0].sequence, 3);
        }
    }

    #[test]
    fn serialized_round_trips_fields() {
        let mut buffer = SerializedBuffer::new(Partition::Radio);
        let original = Arc::new(Record {
            sequence: 42,
            partition: Partition::Radio,
            realtime: Timestamp::new(7, 8),
            uid: 1,
            pid: 2,
            tid: 3,
            payload: vec![1, 2, 3, 4],
        });
        buffer.append(Arc::clone(&original));
        let collected = buffer.collect_range(0, u64::MAX, 1);
        assert_eq!(*collected[0], *original);
    }

    #[test]
    fn serialized_spans_chunks() {
        let mut buffer = SerializedBuffer::new(Partition::Main);
        // Each entry is ~1 KiB, so this spans several 64 KiB chunks.
        let big = "x".repeat(1000);
        for seq in 1..=200 {
            buffer.append(record(seq, 1000, &big));
        }
        assert!(buffer.chunks.len() > 1);
        assert_eq!(buffer.record_count(), 200);

        // Eviction across the chunk boundary keeps order.
        for expected in 1..=100 {
            assert_eq!(buffer.evict_oldest().expect("record").sequence, expected);
        }
        assert_eq!(buffer.oldest_sequence(), Some(101));
        assert_eq!(buffer.record_count(), 100);
    }

    #[test]
    fn serialized_mid_chunk_removal_rewrites_chunk() {
        let mut buffer = SerializedBuffer::new(Partition::Main);
        for seq in 1..=10 {
            buffer.append(record(seq, if seq == 5 { 2000 } else { 1000 }, "m"));
        }
        let evicted = buffer
            .evict_oldest_matching(&|r| r.uid == 2000)
            .expect("match");
        assert_eq!(evicted.sequence, 5);

        let sequences: Vec<u64> = buffer
            .collect_range(0, u64::MAX, usize::MAX)
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 6, 7, 8, 9, 10]);
    }
}
