use crate::error::MalformedPacket;
use crate::transport::reliability::Reliability;
use crate::transport::u24::U24;
use crate::util::buf_ext::BufExt;
use bytes::{Buf, BufMut, Bytes};

/// number of independent ordering channels
pub const NUM_ORDERING_CHANNELS: u8 = 32;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct OrderingInfo {
    pub index: U24,
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SplitInfo {
    pub count: u32,
    pub id: u16,
    pub index: u32,
}

/// A single framed message inside a data datagram: either a complete packet or one fragment
///  of a split packet.
///
/// ```ascii
/// 0: flags: reliability << 5 | 0x10 if split
/// 1: payload length in bits (u16 BE)
/// *: reliable message number (u24 LE)                       - if reliable
/// *: sequencing index (u24 LE)                              - if sequenced
/// *: ordering index (u24 LE), channel (u8)                  - if ordered or sequenced
/// *: fragment count (u32 BE), split id (u16 BE), index (u32 BE) - if split
/// *: payload
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectedMessage {
    pub reliability: Reliability,
    pub reliable_message_number: Option<U24>,
    pub sequencing_index: Option<U24>,
    pub ordering: Option<OrderingInfo>,
    pub split: Option<SplitInfo>,
    pub payload: Bytes,
}

impl ConnectedMessage {
    const FLAG_SPLIT: u8 = 0x10;

    pub fn header_len(reliability: Reliability, is_split: bool) -> usize {
        let mut result = 1 + 2;
        if reliability.is_reliable() {
            result += 3;
        }
        if reliability.is_sequenced() {
            result += 3;
        }
        if reliability.has_ordering_info() {
            result += 4;
        }
        if is_split {
            result += 4 + 2 + 4;
        }
        result
    }

    pub fn encoded_len(&self) -> usize {
        Self::header_len(self.reliability, self.split.is_some()) + self.payload.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let mut flags = u8::from(self.reliability) << 5;
        if self.split.is_some() {
            flags |= Self::FLAG_SPLIT;
        }
        buf.put_u8(flags);
        buf.put_u16((self.payload.len() * 8) as u16);

        if self.reliability.is_reliable() {
            self.reliable_message_number.unwrap_or_default().ser(buf);
        }
        if self.reliability.is_sequenced() {
            self.sequencing_index.unwrap_or_default().ser(buf);
        }
        if self.reliability.has_ordering_info() {
            let ordering = self.ordering.unwrap_or(OrderingInfo { index: U24::ZERO, channel: 0 });
            ordering.index.ser(buf);
            buf.put_u8(ordering.channel);
        }
        if let Some(split) = &self.split {
            buf.put_u32(split.count);
            buf.put_u16(split.id);
            buf.put_u32(split.index);
        }
        buf.put_slice(&self.payload);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<ConnectedMessage, MalformedPacket> {
        let flags = buf.try_read_u8()?;
        let reliability = Reliability::try_from(flags >> 5)
            .map_err(|_| MalformedPacket::invalid("reliability", flags >> 5))?;
        let is_split = flags & Self::FLAG_SPLIT != 0;

        let len_bits = buf.try_read_u16()?;
        if len_bits == 0 {
            return Err(MalformedPacket::invalid("message length", len_bits));
        }
        let len = (len_bits as usize).div_ceil(8);

        let reliable_message_number = if reliability.is_reliable() {
            Some(U24::deser(buf)?)
        }
        else {
            None
        };
        let sequencing_index = if reliability.is_sequenced() {
            Some(U24::deser(buf)?)
        }
        else {
            None
        };
        let ordering = if reliability.has_ordering_info() {
            let index = U24::deser(buf)?;
            let channel = buf.try_read_u8()?;
            if channel >= NUM_ORDERING_CHANNELS {
                return Err(MalformedPacket::invalid("ordering channel", channel));
            }
            Some(OrderingInfo { index, channel })
        }
        else {
            None
        };
        let split = if is_split {
            Some(SplitInfo {
                count: buf.try_read_u32()?,
                id: buf.try_read_u16()?,
                index: buf.try_read_u32()?,
            })
        }
        else {
            None
        };

        let payload = buf.try_read_bytes(len)?;

        Ok(ConnectedMessage {
            reliability,
            reliable_message_number,
            sequencing_index,
            ordering,
            split,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    fn msg(reliability: Reliability, rel: Option<u32>, seq: Option<u32>, ord: Option<(u32, u8)>, split: Option<(u32, u16, u32)>, payload: &[u8]) -> ConnectedMessage {
        ConnectedMessage {
            reliability,
            reliable_message_number: rel.map(U24::from_raw),
            sequencing_index: seq.map(U24::from_raw),
            ordering: ord.map(|(index, channel)| OrderingInfo { index: U24::from_raw(index), channel }),
            split: split.map(|(count, id, index)| SplitInfo { count, id, index }),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[rstest]
    #[case::unreliable(msg(Reliability::Unreliable, None, None, None, None, &[0x00, 1]), vec![0x00, 0,16, 0x00, 1])]
    #[case::reliable(msg(Reliability::Reliable, Some(5), None, None, None, &[0x09]), vec![0x40, 0,8, 5,0,0, 0x09])]
    #[case::reliable_ordered(msg(Reliability::ReliableOrdered, Some(1), None, Some((2, 0)), None, &[0x82]), vec![0x60, 0,8, 1,0,0, 2,0,0, 0, 0x82])]
    #[case::unreliable_sequenced(msg(Reliability::UnreliableSequenced, None, Some(7), Some((3, 1)), None, &[0x95]), vec![0x20, 0,8, 7,0,0, 3,0,0, 1, 0x95])]
    #[case::reliable_sequenced(msg(Reliability::ReliableSequenced, Some(1), Some(2), Some((3, 4)), None, &[0x95]), vec![0x80, 0,8, 1,0,0, 2,0,0, 3,0,0, 4, 0x95])]
    #[case::split(msg(Reliability::ReliableOrdered, Some(9), None, Some((0, 0)), Some((3, 0x0102, 2)), &[0xba, 1]), vec![0x70, 0,16, 9,0,0, 0,0,0, 0, 0,0,0,3, 1,2, 0,0,0,2, 0xba, 1])]
    fn test_ser_deser(#[case] message: ConnectedMessage, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        message.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(message.encoded_len(), expected.len());

        let mut b: &[u8] = &expected;
        assert_eq!(ConnectedMessage::deser(&mut b).unwrap(), message);
        assert!(b.is_empty());
    }

    #[test]
    fn test_bit_length_rounds_up() {
        let mut b: &[u8] = &[0x00, 0,9, 1,2];
        let message = ConnectedMessage::deser(&mut b).unwrap();
        assert_eq!(message.payload.as_ref(), &[1, 2]);
    }

    #[rstest]
    #[case::zero_length(vec![0x00, 0,0])]
    #[case::payload_too_short(vec![0x00, 0,24, 1,2])]
    #[case::missing_reliable_number(vec![0x40, 0,8, 1])]
    #[case::channel_out_of_range(vec![0x60, 0,8, 1,0,0, 2,0,0, 32, 0x82])]
    #[case::truncated_split_info(vec![0x10, 0,8, 0,0,0,3, 1])]
    fn test_malformed(#[case] input: Vec<u8>) {
        let mut b: &[u8] = &input;
        assert!(ConnectedMessage::deser(&mut b).is_err());
    }

    #[rstest]
    #[case::unreliable(Reliability::Unreliable, false, 3)]
    #[case::reliable(Reliability::Reliable, false, 6)]
    #[case::reliable_ordered(Reliability::ReliableOrdered, false, 10)]
    #[case::reliable_sequenced(Reliability::ReliableSequenced, false, 13)]
    #[case::reliable_ordered_split(Reliability::ReliableOrdered, true, 20)]
    fn test_header_len(#[case] reliability: Reliability, #[case] is_split: bool, #[case] expected: usize) {
        assert_eq!(ConnectedMessage::header_len(reliability, is_split), expected);
    }
}
