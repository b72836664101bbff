use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Delivery guarantee of a single framed message, encoded in the top three bits of the
///  message's flag byte.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Reliability {
    Unreliable = 0,
    UnreliableSequenced = 1,
    Reliable = 2,
    ReliableOrdered = 3,
    ReliableSequenced = 4,
    UnreliableWithAckReceipt = 5,
    ReliableWithAckReceipt = 6,
    ReliableOrderedWithAckReceipt = 7,
}

impl Reliability {
    /// reliable messages carry a reliable message number, and datagrams containing them are
    ///  acknowledged and retained for resending
    pub fn is_reliable(&self) -> bool {
        matches!(self,
            Reliability::Reliable
            | Reliability::ReliableOrdered
            | Reliability::ReliableSequenced
            | Reliability::ReliableWithAckReceipt
            | Reliability::ReliableOrderedWithAckReceipt)
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, Reliability::ReliableOrdered | Reliability::ReliableOrderedWithAckReceipt)
    }

    pub fn is_sequenced(&self) -> bool {
        matches!(self, Reliability::UnreliableSequenced | Reliability::ReliableSequenced)
    }

    /// ordered and sequenced messages both carry an ordering index and channel
    pub fn has_ordering_info(&self) -> bool {
        self.is_ordered() || self.is_sequenced()
    }
}
