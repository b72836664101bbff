use crate::error::MalformedPacket;
use crate::util::buf_ext::{BufExt, BufMutExt};
use bytes::{Buf, BufMut};
use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

/// A 24 bit counter with wrap-around semantics, used for datagram sequence numbers, reliable
///  message numbers, sequencing and ordering indexes.
///
/// Comparison ('newer than') uses serial number arithmetic: `a` is newer than `b` if the forward
///  distance from `b` to `a` is less than half the number space. The derived `Ord` on the other
///  hand is plain numeric order and only there for deterministic iteration.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct U24(u32);

impl Display for U24 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl U24 {
    pub const ZERO: U24 = U24(0);
    pub const MAX: U24 = U24(0xff_ffff);
    const MODULUS: u32 = 1 << 24;
    const HALF: u32 = 1 << 23;

    pub fn from_raw(value: u32) -> Self {
        Self(value & 0xff_ffff)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> U24 {
        *self + 1
    }

    /// forward distance from `other` to `self`, i.e. how many times `next()` takes `other` to `self`
    pub fn distance_from(&self, other: U24) -> u32 {
        self.0.wrapping_sub(other.0) & (Self::MODULUS - 1)
    }

    pub fn is_newer_than(&self, other: U24) -> bool {
        let d = self.distance_from(other);
        d != 0 && d < Self::HALF
    }

    /// returns the value and moves the counter forward
    pub fn post_increment(&mut self) -> U24 {
        let result = *self;
        *self += 1;
        result
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u24_le(self.0);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<U24, MalformedPacket> {
        Ok(U24(buf.try_read_u24_le()?))
    }
}

impl Add<u32> for U24 {
    type Output = U24;

    fn add(self, rhs: u32) -> U24 {
        U24::from_raw(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for U24 {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for U24 {
    type Output = U24;

    fn sub(self, rhs: u32) -> U24 {
        U24::from_raw(self.0.wrapping_sub(rhs))
    }
}
