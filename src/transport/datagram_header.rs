use crate::error::{MalformedPacket, TransportError};
use crate::transport::u24::U24;
use crate::util::buf_ext::BufExt;
use bytes::{Buf, BufMut};

/// The first byte(s) of every connected-mode datagram:
///
/// ```ascii
/// 0: flags
///    0x80 valid
///    0x40 ACK
///    0x20 NAK, if not ACK
///    0x10 packet pair      (data only)
///    0x08 continuous send  (data only)
///    0x04 needs B and AS   (data only)
/// 1: sequence number (u24 LE), data only
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DatagramHeader {
    Data {
        sequence_number: U24,
        packet_pair: bool,
        continuous_send: bool,
        needs_b_and_as: bool,
    },
    Ack,
    Nak,
}

impl DatagramHeader {
    pub const FLAG_VALID: u8 = 0x80;
    pub const FLAG_ACK: u8 = 0x40;
    pub const FLAG_NAK: u8 = 0x20;
    pub const FLAG_PACKET_PAIR: u8 = 0x10;
    pub const FLAG_CONTINUOUS_SEND: u8 = 0x08;
    pub const FLAG_NEEDS_B_AND_AS: u8 = 0x04;

    pub const DATA_HEADER_LEN: usize = 4;

    /// header for regular outgoing data datagrams, i.e. flags 0x84
    pub fn data(sequence_number: U24) -> DatagramHeader {
        DatagramHeader::Data {
            sequence_number,
            packet_pair: false,
            continuous_send: false,
            needs_b_and_as: true,
        }
    }

    pub fn is_datagram_flags(first_byte: u8) -> bool {
        first_byte & Self::FLAG_VALID != 0
    }

    pub fn flags(&self) -> u8 {
        match self {
            DatagramHeader::Data { packet_pair, continuous_send, needs_b_and_as, .. } => {
                let mut flags = Self::FLAG_VALID;
                if *packet_pair { flags |= Self::FLAG_PACKET_PAIR; }
                if *continuous_send { flags |= Self::FLAG_CONTINUOUS_SEND; }
                if *needs_b_and_as { flags |= Self::FLAG_NEEDS_B_AND_AS; }
                flags
            }
            DatagramHeader::Ack => Self::FLAG_VALID | Self::FLAG_ACK,
            DatagramHeader::Nak => Self::FLAG_VALID | Self::FLAG_NAK,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags());
        if let DatagramHeader::Data { sequence_number, .. } = self {
            sequence_number.ser(buf);
        }
    }

    pub fn deser(buf: &mut impl Buf) -> Result<DatagramHeader, TransportError> {
        if !buf.has_remaining() {
            return Err(MalformedPacket::Empty.into());
        }
        let flags = buf.get_u8();

        if flags & Self::FLAG_VALID == 0 {
            return Err(TransportError::InvalidHeader(flags));
        }
        if flags & Self::FLAG_ACK != 0 {
            // NB: 0x20 means 'has B and AS' on an ACK, which we don't evaluate
            return Ok(DatagramHeader::Ack);
        }
        if flags & Self::FLAG_NAK != 0 {
            return Ok(DatagramHeader::Nak);
        }

        let sequence_number = U24::from_raw(buf.try_read_u24_le()?);
        Ok(DatagramHeader::Data {
            sequence_number,
            packet_pair: flags & Self::FLAG_PACKET_PAIR != 0,
            continuous_send: flags & Self::FLAG_CONTINUOUS_SEND != 0,
            needs_b_and_as: flags & Self::FLAG_NEEDS_B_AND_AS != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::regular_data(DatagramHeader::data(U24::from_raw(0x010203)), vec![0x84, 3,2,1])]
    #[case::all_data_flags(DatagramHeader::Data { sequence_number: U24::ZERO, packet_pair: true, continuous_send: true, needs_b_and_as: true }, vec![0x9c, 0,0,0])]
    #[case::plain_data(DatagramHeader::Data { sequence_number: U24::MAX, packet_pair: false, continuous_send: false, needs_b_and_as: false }, vec![0x80, 0xff,0xff,0xff])]
    #[case::ack(DatagramHeader::Ack, vec![0xc0])]
    #[case::nak(DatagramHeader::Nak, vec![0xa0])]
    fn test_ser_deser(#[case] header: DatagramHeader, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &expected;
        assert_eq!(DatagramHeader::deser(&mut b).unwrap(), header);
        assert!(b.is_empty());
    }

    #[test]
    fn test_ack_with_b_and_as() {
        let mut b: &[u8] = &[0xe0];
        assert_eq!(DatagramHeader::deser(&mut b).unwrap(), DatagramHeader::Ack);
    }

    #[rstest]
    #[case::no_valid_bit(vec![0x40], 0x40)]
    #[case::zero(vec![0x00, 1,2,3], 0x00)]
    #[case::offline_id(vec![0x1c], 0x1c)]
    fn test_invalid(#[case] input: Vec<u8>, #[case] flags: u8) {
        let mut b: &[u8] = &input;
        match DatagramHeader::deser(&mut b) {
            Err(TransportError::InvalidHeader(f)) => assert_eq!(f, flags),
            other => panic!("expected invalid header, got {:?}", other),
        }
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::short_sequence_number(vec![0x84, 1, 2])]
    fn test_truncated(#[case] input: Vec<u8>) {
        let mut b: &[u8] = &input;
        assert!(matches!(DatagramHeader::deser(&mut b), Err(TransportError::MalformedPacket(_))));
    }
}
