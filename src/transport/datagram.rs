use crate::error::{MalformedPacket, TransportError};
use crate::transport::connected_message::ConnectedMessage;
use crate::transport::datagram_header::DatagramHeader;
use crate::transport::u24::U24;
use crate::util::buf_ext::BufExt;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A data datagram: a header with a sequence number, followed by one or more framed messages
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Datagram {
    pub header: DatagramHeader,
    pub messages: Vec<ConnectedMessage>,
}

impl Datagram {
    pub fn new(sequence_number: U24, messages: Vec<ConnectedMessage>) -> Datagram {
        Datagram {
            header: DatagramHeader::data(sequence_number),
            messages,
        }
    }

    pub fn sequence_number(&self) -> U24 {
        match self.header {
            DatagramHeader::Data { sequence_number, .. } => sequence_number,
            DatagramHeader::Ack | DatagramHeader::Nak => U24::ZERO,
        }
    }

    pub fn contains_reliable(&self) -> bool {
        self.messages.iter()
            .any(|m| m.reliability.is_reliable())
    }

    pub fn encoded_len(&self) -> usize {
        DatagramHeader::DATA_HEADER_LEN + self.messages.iter().map(|m| m.encoded_len()).sum::<usize>()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.header.ser(&mut buf);
        for message in &self.messages {
            message.ser(&mut buf);
        }
        buf.freeze()
    }
}

/// A set of datagram sequence numbers, stored as inclusive ranges. This is the body of both
///  ACK and NAK datagrams:
///
/// ```ascii
/// 0: number of records (u16 BE)
/// *: records:
///    0: single flag (u8): 1 if the record is a single number, 0 for a range
///    1: start (u24 LE)
///    4: end (u24 LE), inclusive - only if not single
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct AckList {
    ranges: Vec<(U24, U24)>,
}

impl AckList {
    /// A range that covers more sequence numbers than this is rejected as malformed rather than
    ///  being expanded.
    pub const MAX_RANGE_SPAN: u32 = 1 << 16;

    /// Builds the list from sequence numbers, merging consecutive numbers into ranges. Numbers
    ///  are expected in ascending (wrap-around) order.
    pub fn from_sequence_numbers(numbers: impl IntoIterator<Item = U24>) -> AckList {
        let mut ranges: Vec<(U24, U24)> = Vec::new();
        for n in numbers {
            match ranges.last_mut() {
                Some((_, end)) if end.next() == n => *end = n,
                Some((_, end)) if *end == n => {}
                _ => ranges.push((n, n)),
            }
        }
        AckList { ranges }
    }

    pub fn single(n: U24) -> AckList {
        AckList { ranges: vec![(n, n)] }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[(U24, U24)] {
        &self.ranges
    }

    pub fn iter(&self) -> impl Iterator<Item = U24> + '_ {
        self.ranges.iter()
            .flat_map(|(start, end)| {
                let len = end.distance_from(*start) + 1;
                (0..len).map(move |i| *start + i)
            })
    }

    pub fn encode_ack(&self) -> Bytes {
        self.encode(DatagramHeader::Ack)
    }

    pub fn encode_nak(&self) -> Bytes {
        self.encode(DatagramHeader::Nak)
    }

    fn encode(&self, header: DatagramHeader) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + 7 * self.ranges.len());
        header.ser(&mut buf);
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.ranges.len() as u16);
        for (start, end) in &self.ranges {
            if start == end {
                buf.put_u8(1);
                start.ser(buf);
            }
            else {
                buf.put_u8(0);
                start.ser(buf);
                end.ser(buf);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> Result<AckList, MalformedPacket> {
        let num_records = buf.try_read_u16()?;
        let mut ranges = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            let is_single = buf.try_read_u8()? != 0;
            let start = U24::deser(buf)?;
            let end = if is_single {
                start
            }
            else {
                U24::deser(buf)?
            };

            let span = end.distance_from(start);
            if span >= Self::MAX_RANGE_SPAN {
                return Err(MalformedPacket::invalid("ack range span", span));
            }
            ranges.push((start, end));
        }
        Ok(AckList { ranges })
    }
}

/// Everything that can arrive as a connected-mode datagram
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum IncomingDatagram {
    Data(Datagram),
    Ack(AckList),
    Nak(AckList),
}

impl IncomingDatagram {
    pub fn decode(mut buf: &[u8]) -> Result<IncomingDatagram, TransportError> {
        let header = DatagramHeader::deser(&mut buf)?;
        match header {
            DatagramHeader::Ack => Ok(IncomingDatagram::Ack(AckList::deser(&mut buf)?)),
            DatagramHeader::Nak => Ok(IncomingDatagram::Nak(AckList::deser(&mut buf)?)),
            DatagramHeader::Data { .. } => {
                let mut messages = Vec::new();
                while buf.has_remaining() {
                    messages.push(ConnectedMessage::deser(&mut buf)?);
                }
                if messages.is_empty() {
                    return Err(MalformedPacket::Empty.into());
                }
                Ok(IncomingDatagram::Data(Datagram { header, messages }))
            }
        }
    }
}
