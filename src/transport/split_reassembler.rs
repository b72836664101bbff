use crate::error::MalformedPacket;
use crate::transport::connected_message::{ConnectedMessage, SplitInfo};
use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

struct SplitAssemblyBuffer {
    slots: Vec<Option<Bytes>>,
    num_received: u32,
    last_activity: Instant,
    reliable: bool,
}

impl SplitAssemblyBuffer {
    fn new(count: u32, reliable: bool, now: Instant) -> SplitAssemblyBuffer {
        SplitAssemblyBuffer {
            slots: vec![None; count as usize],
            num_received: 0,
            last_activity: now,
            reliable,
        }
    }

    fn is_complete(&self) -> bool {
        self.num_received as usize == self.slots.len()
    }

    fn assemble(self) -> Bytes {
        let len = self.slots.iter()
            .flatten()
            .map(|s| s.len())
            .sum();
        let mut buf = BytesMut::with_capacity(len);
        for slot in self.slots.iter().flatten() {
            buf.put_slice(slot);
        }
        buf.freeze()
    }
}

/// split messages discarded by [SplitReassembler::evict_expired]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct EvictedSplits {
    pub num_reliable: usize,
    pub num_unreliable: usize,
}

/// Collects the fragments of split messages, keyed by split id, and hands out the complete
///  message once all fragments are there.
///
/// Memory is bounded in two ways: a split message that makes no progress for the configured
///  timeout is discarded, and a fragment that would start a split message beyond the maximum
///  number of concurrent ones is not accepted. Callers check [SplitReassembler::has_room_for]
///  before acknowledging a fragment, so the peer resends refused fragments later.
pub struct SplitReassembler {
    max_split_count: u32,
    max_concurrent_splits: usize,
    timeout: Duration,
    buffers: FxHashMap<u16, SplitAssemblyBuffer>,
}

impl SplitReassembler {
    pub fn new(max_split_count: u32, max_concurrent_splits: usize, timeout: Duration) -> SplitReassembler {
        SplitReassembler {
            max_split_count,
            max_concurrent_splits,
            timeout,
            buffers: FxHashMap::default(),
        }
    }

    pub fn num_pending(&self) -> usize {
        self.buffers.len()
    }

    /// Adds a fragment. This returns the reassembled message (without split info) if this
    ///  fragment completed it, and `None` if fragments are still missing.
    ///
    /// A fragment that repeats an index overwrites the previous fragment with that index.
    pub fn add_fragment(&mut self, message: ConnectedMessage, now: Instant) -> Result<Option<ConnectedMessage>, MalformedPacket> {
        let split = match message.split {
            Some(split) => split,
            None => return Ok(Some(message)),
        };
        self.validate(&split)?;

        if !self.has_room_for(&split) {
            warn!("too many concurrent split messages - dropping fragment {} of split {}", split.index, split.id);
            return Err(MalformedPacket::invalid("concurrent split id", split.id));
        }

        let reliable = message.reliability.is_reliable();
        let buffer = self.buffers
            .entry(split.id)
            .or_insert_with(|| SplitAssemblyBuffer::new(split.count, reliable, now));

        if buffer.slots.len() != split.count as usize {
            warn!("fragment for split {} announces {} fragments, previous fragments announced {} - dropping", split.id, split.count, buffer.slots.len());
            return Err(MalformedPacket::invalid("split count", split.count));
        }

        let slot = &mut buffer.slots[split.index as usize];
        if slot.is_none() {
            buffer.num_received += 1;
        }
        else {
            trace!("duplicate fragment {} for split {}", split.index, split.id);
        }
        *slot = Some(message.payload.clone());
        buffer.last_activity = now;

        if !buffer.is_complete() {
            return Ok(None);
        }

        let buffer = match self.buffers.remove(&split.id) {
            Some(b) => b,
            None => return Ok(None),
        };
        debug!("reassembled split {} from {} fragments", split.id, split.count);

        Ok(Some(ConnectedMessage {
            reliability: message.reliability,
            reliable_message_number: None,
            sequencing_index: message.sequencing_index,
            ordering: message.ordering,
            split: None,
            payload: buffer.assemble(),
        }))
    }

    fn validate(&self, split: &SplitInfo) -> Result<(), MalformedPacket> {
        if split.count == 0 || split.count > self.max_split_count {
            return Err(MalformedPacket::invalid("split count", split.count));
        }
        if split.index >= split.count {
            return Err(MalformedPacket::invalid("split index", split.index));
        }
        Ok(())
    }

    /// `true` if a fragment for this split can be stored, i.e. it belongs to a split message
    ///  that is already being reassembled, or there is room for another one
    pub fn has_room_for(&self, split: &SplitInfo) -> bool {
        self.buffers.contains_key(&split.id) || self.buffers.len() < self.max_concurrent_splits
    }

    /// Discards all split messages without progress for the configured timeout
    pub fn evict_expired(&mut self, now: Instant) -> EvictedSplits {
        let timeout = self.timeout;
        let mut evicted = EvictedSplits::default();
        self.buffers.retain(|id, b| {
            if now.saturating_duration_since(b.last_activity) < timeout {
                return true;
            }
            debug!("split {} timed out with {} of {} fragments - discarding", id, b.num_received, b.slots.len());
            if b.reliable {
                evicted.num_reliable += 1;
            }
            else {
                evicted.num_unreliable += 1;
            }
            false
        });
        evicted
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
