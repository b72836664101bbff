use crate::error::{MalformedPacket, TransportError};
use crate::transport::config::RakNetConfig;
use crate::transport::connected_message::{ConnectedMessage, OrderingInfo, SplitInfo, NUM_ORDERING_CHANNELS};
use crate::transport::datagram::{AckList, Datagram};
use crate::transport::datagram_header::DatagramHeader;
use crate::transport::reliability::Reliability;
use crate::transport::send_pipeline::SendPipeline;
use crate::transport::u24::U24;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// a packet waiting to be framed
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub payload: Bytes,
    pub reliability: Reliability,
    pub channel: u8,
}

impl OutgoingMessage {
    pub fn new(payload: Bytes, reliability: Reliability) -> OutgoingMessage {
        OutgoingMessage { payload, reliability, channel: 0 }
    }
}

struct RetainedDatagram {
    buf: Bytes,
    first_sent: Instant,
    last_sent: Instant,
    num_resends: u32,
}

pub struct SendStreamConfig {
    pub resend_timeout: Duration,
    pub max_split_count: u32,
    pub max_retained_datagrams: usize,
}

impl From<&RakNetConfig> for SendStreamConfig {
    fn from(config: &RakNetConfig) -> Self {
        SendStreamConfig {
            resend_timeout: config.resend_timeout,
            max_split_count: config.max_split_count,
            max_retained_datagrams: config.max_retained_datagrams,
        }
    }
}

/// everything framing assigns to outgoing datagrams and messages
#[derive(Debug, Clone, Copy, Default)]
struct FramingCounters {
    next_sequence_number: U24,
    next_reliable_message_number: U24,
    ordering_indexes: [U24; NUM_ORDERING_CHANNELS as usize],
    sequencing_indexes: [U24; NUM_ORDERING_CHANNELS as usize],
    next_split_id: u16,
}

impl FramingCounters {
    fn next_reliable_message_number(&mut self, reliability: Reliability) -> Option<U24> {
        if reliability.is_reliable() {
            Some(self.next_reliable_message_number.post_increment())
        }
        else {
            None
        }
    }
}

/// The sending half of a session: it frames packets into datagrams, assigning all the counters
///  in the process, and keeps datagrams with reliable content until they are acknowledged.
///
/// Reliable and unreliable messages never share a datagram, so that resending a datagram never
///  duplicates unreliable content.
pub struct SendStream {
    config: SendStreamConfig,
    send_pipeline: Arc<SendPipeline>,
    peer_addr: SocketAddr,
    mtu_size: u16,
    counters: FramingCounters,
    retained: FxHashMap<U24, RetainedDatagram>,
}

impl SendStream {
    pub fn new(config: SendStreamConfig, send_pipeline: Arc<SendPipeline>, peer_addr: SocketAddr, mtu_size: u16) -> SendStream {
        SendStream {
            config,
            send_pipeline,
            peer_addr,
            mtu_size,
            counters: FramingCounters::default(),
            retained: FxHashMap::default(),
        }
    }

    pub fn mtu_size(&self) -> u16 {
        self.mtu_size
    }

    pub fn set_mtu_size(&mut self, mtu_size: u16) {
        self.mtu_size = mtu_size;
    }

    pub fn num_retained(&self) -> usize {
        self.retained.len()
    }

    pub async fn send_message(&mut self, message: OutgoingMessage, now: Instant) -> Result<(), TransportError> {
        self.send_messages(vec![message], now).await
    }

    /// Frames the messages into as few datagrams as possible and sends them
    pub async fn send_messages(&mut self, messages: Vec<OutgoingMessage>, now: Instant) -> Result<(), TransportError> {
        let datagrams = self.frame(messages)?;
        for datagram in datagrams {
            let buf = datagram.encode();
            trace!("sending datagram #{} with {} messages to {:?}", datagram.sequence_number(), datagram.messages.len(), self.peer_addr);

            self.send_pipeline.do_send_packet(self.peer_addr, &buf).await;

            if datagram.contains_reliable() {
                self.retain(datagram.sequence_number(), buf, now);
            }
        }
        Ok(())
    }

    fn retain(&mut self, sequence_number: U24, buf: Bytes, now: Instant) {
        if self.retained.len() >= self.config.max_retained_datagrams {
            let oldest = self.retained.iter()
                .min_by_key(|(_, r)| r.first_sent)
                .map(|(&n, _)| n);
            if let Some(oldest) = oldest {
                warn!("too many unacknowledged datagrams for {:?} - giving up on #{}", self.peer_addr, oldest);
                self.retained.remove(&oldest);
            }
        }

        self.retained.insert(sequence_number, RetainedDatagram {
            buf,
            first_sent: now,
            last_sent: now,
            num_resends: 0,
        });
    }

    /// Turns messages into datagrams, assigning sequence numbers, reliable message numbers,
    ///  ordering / sequencing indexes and split ids. No I/O happens here.
    ///
    /// This is all or nothing: if any of the messages can not be framed, no counter is
    ///  consumed, so a failed send leaves no gap that the peer would wait for.
    pub fn frame(&mut self, messages: Vec<OutgoingMessage>) -> Result<Vec<Datagram>, TransportError> {
        let mut counters = self.counters;
        let datagrams = self.frame_with(&mut counters, messages)?;
        self.counters = counters;
        Ok(datagrams)
    }

    fn frame_with(&self, counters: &mut FramingCounters, messages: Vec<OutgoingMessage>) -> Result<Vec<Datagram>, TransportError> {
        let max_len = RakNetConfig::max_datagram_len(self.mtu_size);

        let mut result = Vec::new();
        let mut reliable_wip = DatagramBuilder::default();
        let mut unreliable_wip = DatagramBuilder::default();

        for message in messages {
            for framed in self.frame_message(counters, message)? {
                let wip = if framed.reliability.is_reliable() {
                    &mut reliable_wip
                }
                else {
                    &mut unreliable_wip
                };

                if !wip.fits(&framed, max_len) {
                    if let Some(datagram) = wip.take(&mut counters.next_sequence_number) {
                        result.push(datagram);
                    }
                }
                wip.push(framed);
            }
        }

        result.extend(reliable_wip.take(&mut counters.next_sequence_number));
        result.extend(unreliable_wip.take(&mut counters.next_sequence_number));
        Ok(result)
    }

    fn frame_message(&self, counters: &mut FramingCounters, message: OutgoingMessage) -> Result<Vec<ConnectedMessage>, TransportError> {
        let OutgoingMessage { payload, mut reliability, channel } = message;
        if payload.is_empty() {
            return Err(MalformedPacket::Empty.into());
        }
        if channel >= NUM_ORDERING_CHANNELS {
            return Err(MalformedPacket::invalid("ordering channel", channel).into());
        }

        let needs_split = payload.len() > RakNetConfig::max_unsplit_payload_len(self.mtu_size, reliability);
        if needs_split && !reliability.is_reliable() {
            // fragments of a split message must not get lost individually
            reliability = match reliability {
                Reliability::UnreliableSequenced => Reliability::ReliableSequenced,
                _ => Reliability::Reliable,
            };
            debug!("upgrading oversized unreliable message to {:?}", reliability);
        }

        let fragment_len = RakNetConfig::max_fragment_len(self.mtu_size, reliability);
        let count = payload.len().div_ceil(fragment_len);
        if needs_split && count > self.config.max_split_count as usize {
            warn!("message of {} bytes would need {} fragments, maximum is {}", payload.len(), count, self.config.max_split_count);
            return Err(MalformedPacket::invalid("split count", count as u64).into());
        }

        let ch = channel as usize;
        let sequencing_index = if reliability.is_sequenced() {
            Some(counters.sequencing_indexes[ch].post_increment())
        }
        else {
            None
        };
        let ordering = if reliability.is_ordered() {
            Some(OrderingInfo { index: counters.ordering_indexes[ch].post_increment(), channel })
        }
        else if reliability.is_sequenced() {
            Some(OrderingInfo { index: counters.ordering_indexes[ch], channel })
        }
        else {
            None
        };

        if !needs_split {
            return Ok(vec![ConnectedMessage {
                reliability,
                reliable_message_number: counters.next_reliable_message_number(reliability),
                sequencing_index,
                ordering,
                split: None,
                payload,
            }]);
        }

        let split_id = counters.next_split_id;
        counters.next_split_id = counters.next_split_id.wrapping_add(1);
        trace!("splitting message of {} bytes into {} fragments, split id {}", payload.len(), count, split_id);

        let mut result = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * fragment_len;
            let end = (start + fragment_len).min(payload.len());
            result.push(ConnectedMessage {
                reliability,
                reliable_message_number: counters.next_reliable_message_number(reliability),
                sequencing_index,
                ordering,
                split: Some(SplitInfo { count: count as u32, id: split_id, index: index as u32 }),
                payload: payload.slice(start..end),
            });
        }
        Ok(result)
    }

    pub fn on_ack(&mut self, acks: &AckList) {
        for sequence_number in acks.iter() {
            if self.retained.remove(&sequence_number).is_none() {
                trace!("ACK for datagram #{} that is not retained", sequence_number);
            }
        }
    }

    pub async fn on_nak(&mut self, naks: &AckList, now: Instant) {
        for sequence_number in naks.iter() {
            if let Some(retained) = self.retained.get_mut(&sequence_number) {
                debug!("NAK: resending datagram #{} to {:?}", sequence_number, self.peer_addr);
                retained.last_sent = now;
                retained.num_resends += 1;
                self.send_pipeline.do_send_packet(self.peer_addr, &retained.buf).await;
            }
            else {
                trace!("NAK for datagram #{} that is not retained", sequence_number);
            }
        }
    }

    /// resends all retained datagrams that were not acknowledged within the resend timeout
    pub async fn resend_expired(&mut self, now: Instant) {
        for (sequence_number, retained) in self.retained.iter_mut() {
            if now.saturating_duration_since(retained.last_sent) < self.config.resend_timeout {
                continue;
            }
            debug!("resending unacknowledged datagram #{} to {:?} (resend #{})", sequence_number, self.peer_addr, retained.num_resends + 1);
            retained.last_sent = now;
            retained.num_resends += 1;
            self.send_pipeline.do_send_packet(self.peer_addr, &retained.buf).await;
        }
    }

    pub fn clear(&mut self) {
        self.retained.clear();
    }
}

#[derive(Default)]
struct DatagramBuilder {
    messages: Vec<ConnectedMessage>,
    len: usize,
}

impl DatagramBuilder {
    fn fits(&self, message: &ConnectedMessage, max_len: usize) -> bool {
        DatagramHeader::DATA_HEADER_LEN + self.len + message.encoded_len() <= max_len
    }

    fn push(&mut self, message: ConnectedMessage) {
        self.len += message.encoded_len();
        self.messages.push(message);
    }

    fn take(&mut self, next_sequence_number: &mut U24) -> Option<Datagram> {
        if self.messages.is_empty() {
            return None;
        }
        self.len = 0;
        Some(Datagram::new(next_sequence_number.post_increment(), std::mem::take(&mut self.messages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::receive_stream::ReceiveStream;
    use crate::transport::send_pipeline::MockSendSocket;
    use rstest::rstest;

    const PEER: ([u8; 4], u16) = ([127, 0, 0, 1], 19132);

    fn config() -> SendStreamConfig {
        SendStreamConfig {
            resend_timeout: Duration::from_millis(1000),
            max_split_count: 1024,
            max_retained_datagrams: 16,
        }
    }

    fn send_stream(send_socket: MockSendSocket) -> SendStream {
        SendStream::new(config(), Arc::new(SendPipeline::new(Arc::new(send_socket))), SocketAddr::from(PEER), 1447)
    }

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>())
    }

    #[test]
    fn test_frame_assigns_counters() {
        let mut send_stream = send_stream(MockSendSocket::new());

        let datagrams = send_stream.frame(vec![
            OutgoingMessage::new(payload(10), Reliability::ReliableOrdered),
            OutgoingMessage::new(payload(10), Reliability::ReliableOrdered),
            OutgoingMessage::new(payload(10), Reliability::Unreliable),
        ]).unwrap();

        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].sequence_number(), U24::from_raw(0));
        assert_eq!(datagrams[0].messages.len(), 2);
        assert_eq!(datagrams[0].messages[0].reliable_message_number, Some(U24::from_raw(0)));
        assert_eq!(datagrams[0].messages[1].reliable_message_number, Some(U24::from_raw(1)));
        assert_eq!(datagrams[0].messages[0].ordering, Some(OrderingInfo { index: U24::from_raw(0), channel: 0 }));
        assert_eq!(datagrams[0].messages[1].ordering, Some(OrderingInfo { index: U24::from_raw(1), channel: 0 }));

        assert_eq!(datagrams[1].sequence_number(), U24::from_raw(1));
        assert_eq!(datagrams[1].messages[0].reliable_message_number, None);

        let more = send_stream.frame(vec![OutgoingMessage::new(payload(10), Reliability::Reliable)]).unwrap();
        assert_eq!(more[0].sequence_number(), U24::from_raw(2));
        assert_eq!(more[0].messages[0].reliable_message_number, Some(U24::from_raw(2)));
    }

    #[test]
    fn test_sequence_numbers_wrap() {
        let mut send_stream = send_stream(MockSendSocket::new());
        send_stream.counters.next_sequence_number = U24::MAX;
        send_stream.counters.next_reliable_message_number = U24::MAX;

        let datagrams = send_stream.frame(vec![
            OutgoingMessage::new(payload(1000), Reliability::Reliable),
            OutgoingMessage::new(payload(1000), Reliability::Reliable),
        ]).unwrap();

        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].sequence_number(), U24::MAX);
        assert_eq!(datagrams[1].sequence_number(), U24::ZERO);
        assert_eq!(datagrams[1].messages[0].reliable_message_number, Some(U24::ZERO));
    }

    #[rstest]
    #[case::small(1447, 100)]
    #[case::exactly_unsplit(1447, 1419 - 4 - 10)]
    #[case::one_more_than_unsplit(1447, 1419 - 4 - 10 + 1)]
    #[case::chunk_sized(1447, 83_200)]
    #[case::small_mtu(576, 5000)]
    fn test_mtu_bound(#[case] mtu_size: u16, #[case] len: usize) {
        let mut send_stream = send_stream(MockSendSocket::new());
        send_stream.set_mtu_size(mtu_size);

        let datagrams = send_stream.frame(vec![
            OutgoingMessage::new(payload(len), Reliability::ReliableOrdered),
            OutgoingMessage::new(payload(7), Reliability::Unreliable),
        ]).unwrap();

        for datagram in &datagrams {
            assert!(datagram.encode().len() <= (mtu_size - 28) as usize);
        }

        let total_payload: usize = datagrams.iter()
            .flat_map(|d| d.messages.iter())
            .map(|m| m.payload.len())
            .sum();
        assert_eq!(total_payload, len + 7);
    }

    #[test]
    fn test_split_fragments_share_ordering_and_split_id() {
        let mut send_stream = send_stream(MockSendSocket::new());
        let datagrams = send_stream.frame(vec![OutgoingMessage::new(payload(5000), Reliability::ReliableOrdered)]).unwrap();

        let fragments = datagrams.iter()
            .flat_map(|d| d.messages.iter())
            .collect::<Vec<_>>();
        assert_eq!(fragments.len(), 4);
        for (i, fragment) in fragments.iter().enumerate() {
            let split = fragment.split.unwrap();
            assert_eq!(split.id, 0);
            assert_eq!(split.count, 4);
            assert_eq!(split.index, i as u32);
            assert_eq!(fragment.ordering, Some(OrderingInfo { index: U24::ZERO, channel: 0 }));
            assert_eq!(fragment.reliable_message_number, Some(U24::from_raw(i as u32)));
        }

        let next = send_stream.frame(vec![OutgoingMessage::new(payload(5000), Reliability::ReliableOrdered)]).unwrap();
        assert_eq!(next[0].messages[0].split.unwrap().id, 1);
    }

    #[test]
    fn test_oversized_unreliable_is_upgraded() {
        let mut send_stream = send_stream(MockSendSocket::new());
        let datagrams = send_stream.frame(vec![OutgoingMessage::new(payload(3000), Reliability::Unreliable)]).unwrap();
        assert!(datagrams.iter().all(|d| d.messages.iter().all(|m| m.reliability == Reliability::Reliable)));
    }

    #[rstest]
    #[case::empty(OutgoingMessage::new(Bytes::new(), Reliability::Reliable))]
    #[case::bad_channel(OutgoingMessage { payload: Bytes::from_static(b"x"), reliability: Reliability::ReliableOrdered, channel: 32 })]
    fn test_invalid_messages(#[case] message: OutgoingMessage) {
        assert!(send_stream(MockSendSocket::new()).frame(vec![message]).is_err());
    }

    #[test]
    fn test_too_many_fragments() {
        let mut send_stream = send_stream(MockSendSocket::new());
        send_stream.config.max_split_count = 2;
        assert!(send_stream.frame(vec![OutgoingMessage::new(payload(5000), Reliability::Reliable)]).is_err());
    }

    #[rstest]
    #[case::alone(vec![])]
    #[case::after_valid_messages(vec![
        OutgoingMessage::new(payload(10), Reliability::ReliableOrdered),
        OutgoingMessage::new(payload(10), Reliability::UnreliableSequenced),
        OutgoingMessage::new(payload(3000), Reliability::ReliableOrdered),
    ])]
    fn test_failed_frame_consumes_no_counters(#[case] mut batch: Vec<OutgoingMessage>) {
        let mut send_stream = send_stream(MockSendSocket::new());
        send_stream.config.max_split_count = 3;
        send_stream.frame(vec![OutgoingMessage::new(payload(10), Reliability::ReliableOrdered)]).unwrap();

        batch.push(OutgoingMessage::new(payload(5000), Reliability::ReliableOrdered));
        assert!(send_stream.frame(batch).is_err());

        let datagrams = send_stream.frame(vec![OutgoingMessage::new(payload(6), Reliability::ReliableOrdered)]).unwrap();
        assert_eq!(datagrams[0].sequence_number(), U24::from_raw(1));
        let message = &datagrams[0].messages[0];
        assert_eq!(message.reliable_message_number, Some(U24::from_raw(1)));
        assert_eq!(message.ordering, Some(OrderingInfo { index: U24::from_raw(1), channel: 0 }));

        let next = send_stream.frame(vec![OutgoingMessage::new(payload(3000), Reliability::ReliableOrdered)]).unwrap();
        assert_eq!(next[0].messages[0].split.unwrap().id, 0);
    }

    #[test]
    fn test_ordered_channel_survives_failed_send() {
        let mut send_stream = send_stream(MockSendSocket::new());
        let mut receive_stream = ReceiveStream::new(&RakNetConfig::default_client());
        let now = Instant::now();

        assert!(send_stream.frame(vec![OutgoingMessage::new(payload(2_000_000), Reliability::ReliableOrdered)]).is_err());

        let mut delivered = Vec::new();
        for datagram in send_stream.frame(vec![OutgoingMessage::new(payload(6), Reliability::ReliableOrdered)]).unwrap() {
            delivered.extend(receive_stream.on_datagram(datagram, now).payloads);
        }
        assert_eq!(delivered, vec![payload(6)]);
    }

    #[test]
    fn test_sequenced_indexes() {
        let mut send_stream = send_stream(MockSendSocket::new());
        let datagrams = send_stream.frame(vec![
            OutgoingMessage::new(payload(3), Reliability::UnreliableSequenced),
            OutgoingMessage::new(payload(3), Reliability::UnreliableSequenced),
            OutgoingMessage { payload: payload(3), reliability: Reliability::UnreliableSequenced, channel: 2 },
        ]).unwrap();
        let messages = &datagrams[0].messages;
        assert_eq!(messages[0].sequencing_index, Some(U24::from_raw(0)));
        assert_eq!(messages[1].sequencing_index, Some(U24::from_raw(1)));
        assert_eq!(messages[2].sequencing_index, Some(U24::from_raw(0)));
        assert_eq!(messages[2].ordering.unwrap().channel, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reliable_datagrams_are_retained_until_acked() {
        let mut send_socket = MockSendSocket::new();
        send_socket.expect_do_send_packet()
            .times(2)
            .return_const(());

        let mut send_stream = send_stream(send_socket);
        send_stream.send_messages(vec![
            OutgoingMessage::new(payload(10), Reliability::Reliable),
            OutgoingMessage::new(payload(10), Reliability::Unreliable),
        ], Instant::now()).await.unwrap();

        assert_eq!(send_stream.num_retained(), 1);
        send_stream.on_ack(&AckList::single(U24::from_raw(1)));
        assert_eq!(send_stream.num_retained(), 1);
        send_stream.on_ack(&AckList::single(U24::from_raw(0)));
        assert_eq!(send_stream.num_retained(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nak_resends_exact_bytes() {
        let expected = Datagram::new(U24::ZERO, vec![ConnectedMessage {
            reliability: Reliability::Reliable,
            reliable_message_number: Some(U24::ZERO),
            sequencing_index: None,
            ordering: None,
            split: None,
            payload: payload(5),
        }]).encode().to_vec();

        let mut send_socket = MockSendSocket::new();
        send_socket.expect_do_send_packet()
            .withf(move |addr, buf| addr == &SocketAddr::from(PEER) && buf == expected.as_slice())
            .times(2)
            .return_const(());

        let mut send_stream = send_stream(send_socket);
        send_stream.send_message(OutgoingMessage::new(payload(5), Reliability::Reliable), Instant::now()).await.unwrap();
        send_stream.on_nak(&AckList::single(U24::ZERO), Instant::now()).await;

        // not retained: ignored
        send_stream.on_nak(&AckList::single(U24::from_raw(9)), Instant::now()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_on_timeout() {
        let mut send_socket = MockSendSocket::new();
        send_socket.expect_do_send_packet()
            .withf(|addr, _| addr == &SocketAddr::from(PEER))
            .times(3)
            .return_const(());

        let mut send_stream = send_stream(send_socket);
        send_stream.send_message(OutgoingMessage::new(payload(5), Reliability::ReliableOrdered), Instant::now()).await.unwrap();

        tokio::time::advance(Duration::from_millis(999)).await;
        send_stream.resend_expired(Instant::now()).await;

        tokio::time::advance(Duration::from_millis(1)).await;
        send_stream.resend_expired(Instant::now()).await;

        tokio::time::advance(Duration::from_millis(500)).await;
        send_stream.resend_expired(Instant::now()).await;

        tokio::time::advance(Duration::from_millis(500)).await;
        send_stream.resend_expired(Instant::now()).await;

        send_stream.on_ack(&AckList::single(U24::ZERO));
        tokio::time::advance(Duration::from_millis(5000)).await;
        send_stream.resend_expired(Instant::now()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_is_bounded() {
        let mut send_socket = MockSendSocket::new();
        send_socket.expect_do_send_packet()
            .return_const(());

        let mut send_stream = send_stream(send_socket);
        for _ in 0..20 {
            send_stream.send_message(OutgoingMessage::new(payload(5), Reliability::Reliable), Instant::now()).await.unwrap();
            tokio::time::advance(Duration::from_millis(1)).await;
        }
        assert_eq!(send_stream.num_retained(), 16);
        assert!(!send_stream.retained.contains_key(&U24::ZERO));
        assert!(send_stream.retained.contains_key(&U24::from_raw(19)));
    }
}
