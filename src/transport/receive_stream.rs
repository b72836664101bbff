use crate::transport::config::RakNetConfig;
use crate::transport::connected_message::{ConnectedMessage, NUM_ORDERING_CHANNELS};
use crate::transport::datagram::{AckList, Datagram};
use crate::transport::split_reassembler::{EvictedSplits, SplitReassembler};
use crate::transport::u24::U24;
use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// A gap in datagram sequence numbers bigger than this is not NAKed number by number, the
///  receiver just skips ahead
const MAX_NAK_GAP: u32 = AckList::MAX_RANGE_SPAN;

/// reliable message numbers further ahead of the oldest missing one than this are not accepted
const MAX_RELIABLE_WINDOW: u32 = 1 << 16;

/// What a data datagram means for the caller: whether it needs to be acknowledged, which
///  preceding datagrams are missing, and the complete payloads that are ready for delivery
///  (in delivery order).
///
/// A datagram with reliable content that could not be accepted is not acknowledged, so that
///  the peer resends it. Messages from it that were accepted are filtered as duplicates then.
#[derive(Debug, Default)]
pub struct ReceivedDatagram {
    pub needs_ack: bool,
    pub nak: AckList,
    pub payloads: Vec<Bytes>,
}

/// Tracks which reliable message numbers were received, to filter duplicates caused by resends.
///  Everything before `start` was received; `received` holds numbers after it.
#[derive(Default)]
struct ReliableWindow {
    start: U24,
    received: FxHashSet<U24>,
}

impl ReliableWindow {
    fn is_duplicate(&self, n: U24) -> bool {
        (n != self.start && !n.is_newer_than(self.start)) || self.received.contains(&n)
    }

    fn is_too_far_ahead(&self, n: U24) -> bool {
        n.distance_from(self.start) >= MAX_RELIABLE_WINDOW
    }

    /// returns `false` for a duplicate
    fn insert(&mut self, n: U24) -> bool {
        if self.is_duplicate(n) {
            return false;
        }
        self.received.insert(n);
        while self.received.remove(&self.start) {
            self.start = self.start.next();
        }
        true
    }
}

#[derive(Default)]
struct OrderingChannel {
    expected_index: U24,
    held: FxHashMap<U24, Bytes>,
    highest_sequencing_index: Option<U24>,
}

/// The receiving half of a session: it decides about ACKs and NAKs, filters duplicates,
///  reassembles split messages and restores order on ordered channels.
pub struct ReceiveStream {
    max_held_ordered_messages: usize,
    expected_sequence_number: U24,
    reliable_window: ReliableWindow,
    splits: SplitReassembler,
    channels: Vec<OrderingChannel>,
}

impl ReceiveStream {
    pub fn new(config: &RakNetConfig) -> ReceiveStream {
        ReceiveStream {
            max_held_ordered_messages: config.max_held_ordered_messages,
            expected_sequence_number: U24::ZERO,
            reliable_window: ReliableWindow::default(),
            splits: SplitReassembler::new(config.max_split_count, config.max_concurrent_splits, config.split_reassembly_timeout),
            channels: (0..NUM_ORDERING_CHANNELS).map(|_| OrderingChannel::default()).collect(),
        }
    }

    pub fn on_datagram(&mut self, datagram: Datagram, now: Instant) -> ReceivedDatagram {
        let sequence_number = datagram.sequence_number();
        let mut result = ReceivedDatagram {
            needs_ack: datagram.contains_reliable(),
            nak: self.track_sequence_number(sequence_number),
            payloads: Vec::new(),
        };

        for message in datagram.messages {
            if let Some(n) = message.reliable_message_number {
                if self.reliable_window.is_duplicate(n) {
                    trace!("duplicate reliable message #{} - dropping", n);
                    continue;
                }
                if !self.has_room_for(&message) {
                    debug!("no room for reliable message #{} - not acknowledging datagram #{}", n, sequence_number);
                    result.needs_ack = false;
                    continue;
                }
                self.reliable_window.insert(n);
            }
            else if !self.has_room_for(&message) {
                debug!("no room for unreliable message - dropping");
                continue;
            }

            let message = match self.splits.add_fragment(message, now) {
                Ok(Some(m)) => m,
                Ok(None) => continue,
                Err(e) => {
                    warn!("dropping fragment: {}", e);
                    continue;
                }
            };

            self.deliver(message, &mut result.payloads);
        }
        result
    }

    /// Whether a message can be processed without discarding it later: its reliable message
    ///  number is inside the window, a fragment's split can be buffered, and an ordered message
    ///  ahead of the expected index can be held.
    fn has_room_for(&self, message: &ConnectedMessage) -> bool {
        if let Some(n) = message.reliable_message_number {
            if self.reliable_window.is_too_far_ahead(n) {
                warn!("reliable message number {} is too far ahead of {}", n, self.reliable_window.start);
                return false;
            }
        }
        if let Some(split) = &message.split {
            if !self.splits.has_room_for(split) {
                return false;
            }
        }
        match message.ordering {
            Some(ordering) if !message.reliability.is_sequenced() => {
                let channel = &self.channels[ordering.channel as usize];
                let must_be_held = ordering.index.is_newer_than(channel.expected_index);
                if must_be_held && channel.held.len() >= self.max_held_ordered_messages {
                    debug!("too many out-of-order messages on channel {}, cannot hold #{}", ordering.channel, ordering.index);
                    return false;
                }
                true
            }
            _ => true,
        }
    }

    fn track_sequence_number(&mut self, sequence_number: U24) -> AckList {
        let expected = self.expected_sequence_number;
        if sequence_number == expected {
            self.expected_sequence_number = expected.next();
            return AckList::default();
        }
        if !sequence_number.is_newer_than(expected) {
            trace!("datagram #{} arrived late or repeatedly, expected #{}", sequence_number, expected);
            return AckList::default();
        }

        self.expected_sequence_number = sequence_number.next();

        let gap = sequence_number.distance_from(expected);
        if gap > MAX_NAK_GAP {
            warn!("gap of {} datagrams before #{} - not requesting resends", gap, sequence_number);
            return AckList::default();
        }
        debug!("datagrams #{} to #{} are missing", expected, sequence_number - 1);
        AckList::from_sequence_numbers((0..gap).map(|i| expected + i))
    }

    fn deliver(&mut self, message: ConnectedMessage, out: &mut Vec<Bytes>) {
        let ConnectedMessage { reliability, sequencing_index, ordering, payload, .. } = message;

        let ordering = match ordering {
            Some(o) => o,
            None => {
                out.push(payload);
                return;
            }
        };
        let channel = &mut self.channels[ordering.channel as usize];

        if reliability.is_sequenced() {
            let index = sequencing_index.unwrap_or_default();
            match channel.highest_sequencing_index {
                Some(highest) if !index.is_newer_than(highest) => {
                    trace!("stale sequenced message #{} on channel {} - dropping", index, ordering.channel);
                }
                _ => {
                    channel.highest_sequencing_index = Some(index);
                    out.push(payload);
                }
            }
            return;
        }

        if ordering.index == channel.expected_index {
            out.push(payload);
            channel.expected_index = channel.expected_index.next();
            while let Some(held) = channel.held.remove(&channel.expected_index) {
                out.push(held);
                channel.expected_index = channel.expected_index.next();
            }
        }
        else if ordering.index.is_newer_than(channel.expected_index) {
            trace!("holding message #{} on channel {}, waiting for #{}", ordering.index, ordering.channel, channel.expected_index);
            channel.held.insert(ordering.index, payload);
        }
        else {
            trace!("stale ordered message #{} on channel {} - dropping", ordering.index, ordering.channel);
        }
    }

    pub fn evict_expired_splits(&mut self, now: Instant) -> EvictedSplits {
        self.splits.evict_expired(now)
    }

    pub fn clear(&mut self) {
        self.splits.clear();
        for channel in &mut self.channels {
            channel.held.clear();
        }
    }
}
