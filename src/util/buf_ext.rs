use crate::error::MalformedPacket;
use crate::protocol::OFFLINE_MAGIC;
use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Address family value RakNet writes for IPv6 addresses (Windows' AF_INET6)
const AF_INET6: u16 = 23;

pub const MAX_STRING_LEN: usize = u16::MAX as usize;

macro_rules! get_try_impl {
    ($try_getter: ident, $ty:ty, $getter: ident) => {
        fn $try_getter(&mut self) -> Result<$ty, MalformedPacket> {
            self.check_remaining(std::mem::size_of::<$ty>())?;
            Ok(self.$getter())
        }
    }
}

/// Bounds-checked reads for everything that arrives over the wire. Nothing in here panics on
///  short input, it returns [MalformedPacket::Truncated] instead.
pub trait BufExt: bytes::Buf {
    fn check_remaining(&self, needed: usize) -> Result<(), MalformedPacket> {
        if self.remaining() < needed {
            return Err(MalformedPacket::Truncated { needed, remaining: self.remaining() });
        }
        Ok(())
    }

    get_try_impl!(try_read_u8, u8, get_u8);
    get_try_impl!(try_read_u16, u16, get_u16);
    get_try_impl!(try_read_u32, u32, get_u32);
    get_try_impl!(try_read_u64, u64, get_u64);
    get_try_impl!(try_read_i16, i16, get_i16);
    get_try_impl!(try_read_i32, i32, get_i32);
    get_try_impl!(try_read_i64, i64, get_i64);
    get_try_impl!(try_read_f32, f32, get_f32);

    fn try_read_u24_le(&mut self) -> Result<u32, MalformedPacket> {
        self.check_remaining(3)?;
        Ok(self.get_uint_le(3) as u32)
    }

    fn try_read_bytes(&mut self, len: usize) -> Result<Bytes, MalformedPacket> {
        self.check_remaining(len)?;
        Ok(self.copy_to_bytes(len))
    }

    /// u16 (BE) length prefixed UTF-8
    fn try_read_string(&mut self) -> Result<String, MalformedPacket> {
        let len = self.try_read_u16()? as usize;
        let raw = self.try_read_bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| MalformedPacket::InvalidString)
    }

    /// u32 (BE) length prefixed
    fn try_read_byte_array(&mut self) -> Result<Bytes, MalformedPacket> {
        let len = self.try_read_u32()? as usize;
        self.try_read_bytes(len)
    }

    fn try_read_magic(&mut self) -> Result<(), MalformedPacket> {
        let raw = self.try_read_bytes(OFFLINE_MAGIC.len())?;
        if raw.as_ref() != OFFLINE_MAGIC {
            return Err(MalformedPacket::BadMagic);
        }
        Ok(())
    }

    fn try_read_address(&mut self) -> Result<SocketAddr, MalformedPacket> {
        match self.try_read_u8()? {
            4 => {
                self.check_remaining(6)?;
                let mut octets = [0u8; 4];
                for o in octets.iter_mut() {
                    *o = !self.get_u8();
                }
                let port = self.get_u16();
                Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port)))
            }
            6 => {
                self.check_remaining(2 + 2 + 4 + 16 + 4)?;
                let _family = self.get_u16_le();
                let port = self.get_u16();
                let flow_info = self.get_u32();
                let mut octets = [0u8; 16];
                self.copy_to_slice(&mut octets);
                let scope_id = self.get_u32();
                Ok(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(octets), port, flow_info, scope_id)))
            }
            other => Err(MalformedPacket::invalid("address version", other)),
        }
    }
}

pub trait BufMutExt: bytes::BufMut {
    fn put_u24_le(&mut self, v: u32) {
        self.put_uint_le(v as u64 & 0xff_ffff, 3);
    }

    /// u16 (BE) length prefixed UTF-8, so strings longer than [MAX_STRING_LEN] bytes can not
    ///  be written
    fn put_string(&mut self, s: &str) -> Result<(), MalformedPacket> {
        if s.len() > MAX_STRING_LEN {
            return Err(MalformedPacket::StringTooLong(s.len()));
        }
        self.put_u16(s.len() as u16);
        self.put_slice(s.as_bytes());
        Ok(())
    }

    fn put_byte_array(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.put_slice(data);
    }

    fn put_magic(&mut self) {
        self.put_slice(&OFFLINE_MAGIC);
    }

    fn put_address(&mut self, addr: &SocketAddr) {
        match addr {
            SocketAddr::V4(addr) => {
                self.put_u8(4);
                for o in addr.ip().octets() {
                    self.put_u8(!o);
                }
                self.put_u16(addr.port());
            }
            SocketAddr::V6(addr) => {
                self.put_u8(6);
                self.put_u16_le(AF_INET6);
                self.put_u16(addr.port());
                self.put_u32(addr.flowinfo());
                self.put_slice(&addr.ip().octets());
                self.put_u32(addr.scope_id());
            }
        }
    }
}

impl <T: bytes::Buf> BufExt for T {
}

impl <T: bytes::BufMut> BufMutExt for T {
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, vec![0,0,0])]
    #[case::one(1, vec![1,0,0])]
    #[case::mixed(0x123456, vec![0x56,0x34,0x12])]
    #[case::max(0xff_ffff, vec![0xff,0xff,0xff])]
    fn test_u24_le(#[case] value: u32, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        buf.put_u24_le(value);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &expected;
        assert_eq!(b.try_read_u24_le().unwrap(), value);
        assert!(b.is_empty());
    }

    #[rstest]
    #[case::v4(SocketAddr::from(([127,0,0,1], 19132)), vec![4, 0x80,0xff,0xff,0xfe, 0x4a,0xbc])]
    #[case::v4_zero(SocketAddr::from(([0,0,0,0], 0)), vec![4, 0xff,0xff,0xff,0xff, 0,0])]
    fn test_address(#[case] addr: SocketAddr, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        buf.put_address(&addr);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &expected;
        assert_eq!(b.try_read_address().unwrap(), addr);
    }

    #[test]
    fn test_address_v6() {
        let addr: SocketAddr = "[fe80::1]:19132".parse().unwrap();
        let mut buf = BytesMut::new();
        buf.put_address(&addr);
        assert_eq!(buf.len(), 29);

        let mut b: &[u8] = &buf;
        assert_eq!(b.try_read_address().unwrap(), addr);
    }

    #[rstest]
    #[case::u8(vec![], 1, |b: &mut &[u8]| b.try_read_u8().map(|_| ()))]
    #[case::u24(vec![1,2], 3, |b: &mut &[u8]| b.try_read_u24_le().map(|_| ()))]
    #[case::string_len(vec![0], 2, |b: &mut &[u8]| b.try_read_string().map(|_| ()))]
    #[case::string_body(vec![0,5, b'a', b'b'], 5, |b: &mut &[u8]| b.try_read_string().map(|_| ()))]
    #[case::address(vec![4, 1,2,3], 6, |b: &mut &[u8]| b.try_read_address().map(|_| ()))]
    fn test_truncated(#[case] input: Vec<u8>, #[case] needed: usize, #[case] read: fn(&mut &[u8]) -> Result<(), MalformedPacket>) {
        let mut b: &[u8] = &input;
        match read(&mut b) {
            Err(MalformedPacket::Truncated { needed: n, .. }) => assert_eq!(n, needed),
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_string() {
        let mut buf = BytesMut::new();
        buf.put_string("Client12").unwrap();
        assert_eq!(buf.as_ref(), b"\0\x08Client12");

        let mut b: &[u8] = &buf;
        assert_eq!(b.try_read_string().unwrap(), "Client12");
    }

    #[rstest]
    #[case::longest(MAX_STRING_LEN, true)]
    #[case::one_too_long(MAX_STRING_LEN + 1, false)]
    #[case::way_too_long(70_000, false)]
    fn test_string_length_limit(#[case] len: usize, #[case] fits: bool) {
        let s = "x".repeat(len);
        let mut buf = BytesMut::new();
        match buf.put_string(&s) {
            Ok(()) => {
                assert!(fits);
                let mut b: &[u8] = &buf;
                assert_eq!(b.try_read_string().unwrap(), s);
            }
            Err(e) => {
                assert!(!fits);
                assert_eq!(e, MalformedPacket::StringTooLong(len));
                assert!(buf.is_empty());
            }
        }
    }

    #[test]
    fn test_invalid_utf8() {
        let mut b: &[u8] = &[0, 2, 0xc3, 0x28];
        assert_eq!(b.try_read_string(), Err(MalformedPacket::InvalidString));
    }

    #[test]
    fn test_magic() {
        let mut buf = BytesMut::new();
        buf.put_magic();
        let mut b: &[u8] = &buf;
        assert!(b.try_read_magic().is_ok());

        let mut wrong = OFFLINE_MAGIC;
        wrong[3] = 1;
        let mut b: &[u8] = &wrong;
        assert_eq!(b.try_read_magic(), Err(MalformedPacket::BadMagic));
    }
}
