use std::fmt;
use std::ops::BitOr;
use strum::{Display, EnumIter};

/// Logical message kinds. The discriminant is the 4-bit wire code carried in
/// the high nibble of the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum MessageKind {
    // Client → Server
    FullClient = 0b0001,
    AudioOnlyClient = 0b0010,

    // Server → Client
    FullServer = 0b1001,
    AudioOnlyServer = 0b1011,
    FrontEndResult = 0b1100,
    Error = 0b1111,
}

const ALL_KINDS: [MessageKind; 6] = [
    MessageKind::FullClient,
    MessageKind::AudioOnlyClient,
    MessageKind::FullServer,
    MessageKind::AudioOnlyServer,
    MessageKind::FrontEndResult,
    MessageKind::Error,
];

/// Reverse lookup table indexed by wire code, built at compile time.
const KIND_BY_CODE: [Option<MessageKind>; 16] = build_kind_table();

const fn build_kind_table() -> [Option<MessageKind>; 16] {
    let mut table = [None; 16];
    let mut i = 0;
    while i < ALL_KINDS.len() {
        let kind = ALL_KINDS[i];
        table[kind as usize] = Some(kind);
        i += 1;
    }
    table
}

impl MessageKind {
    /// 4-bit wire code for this kind.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up a kind from its wire code. Returns `None` for unmapped codes.
    pub fn from_code(code: u8) -> Option<Self> {
        KIND_BY_CODE.get(code as usize).copied().flatten()
    }

    /// Audio-only kinds are the only ones that carry a sequence field.
    pub const fn is_audio_only(self) -> bool {
        matches!(self, MessageKind::AudioOnlyClient | MessageKind::AudioOnlyServer)
    }
}

/// The flag nibble of the second header byte.
///
/// The low two bits encode sequence semantics, bit 2 signals that an event
/// field follows.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    pub const NO_SEQ: Self = Self(0b0000);
    pub const POSITIVE_SEQ: Self = Self(0b0001);
    pub const LAST_NO_SEQ: Self = Self(0b0010);
    pub const NEGATIVE_SEQ: Self = Self(0b0011);
    pub const WITH_EVENT: Self = Self(0b0100);

    const SEQUENCE_MASK: u8 = 0b0011;
    const NIBBLE_MASK: u8 = 0b1111;

    /// Build flags from raw bits; anything above the low nibble is dropped.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::NIBBLE_MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn has_event(self) -> bool {
        self.0 & Self::WITH_EVENT.0 != 0
    }

    pub const fn sequence_bits(self) -> u8 {
        self.0 & Self::SEQUENCE_MASK
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageFlags({:#06b})", self.0)
    }
}

/// One logical protocol unit.
///
/// Which optional fields appear on the wire is decided by `kind`, `flags`
/// and `event`; see [`crate::protocol::FrameCodec`] for the exact rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub flags: MessageFlags,
    pub event: Option<i32>,
    pub session_id: Option<String>,
    pub connect_id: Option<String>,
    pub sequence: Option<i32>,
    pub error_code: Option<u32>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageKind, flags: MessageFlags) -> Self {
        Self {
            kind,
            flags,
            event: None,
            session_id: None,
            connect_id: None,
            sequence: None,
            error_code: None,
            payload: Vec::new(),
        }
    }

    /// Attach an event code. Sets the `WITH_EVENT` flag so the two never drift apart.
    pub fn with_event(mut self, event: i32) -> Self {
        self.event = Some(event);
        self.flags = self.flags | MessageFlags::WITH_EVENT;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_connect_id(mut self, connect_id: impl Into<String>) -> Self {
        self.connect_id = Some(connect_id.into());
        self
    }

    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_error_code(mut self, error_code: u32) -> Self {
        self.error_code = Some(error_code);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_registry_is_bidirectional() {
        for kind in MessageKind::iter() {
            assert_eq!(MessageKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(MessageKind::iter().count(), ALL_KINDS.len());
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(MessageKind::FullClient.code(), 0b0001);
        assert_eq!(MessageKind::AudioOnlyClient.code(), 0b0010);
        assert_eq!(MessageKind::FullServer.code(), 0b1001);
        assert_eq!(MessageKind::AudioOnlyServer.code(), 0b1011);
        assert_eq!(MessageKind::FrontEndResult.code(), 0b1100);
        assert_eq!(MessageKind::Error.code(), 0b1111);
    }

    #[test]
    fn test_unmapped_codes() {
        for code in [0u8, 3, 4, 5, 6, 7, 8, 10, 13, 14, 16, 255] {
            assert_eq!(MessageKind::from_code(code), None, "code {}", code);
        }
    }

    #[test]
    fn test_flag_bits() {
        let flags = MessageFlags::WITH_EVENT | MessageFlags::POSITIVE_SEQ;
        assert_eq!(flags.bits(), 0b0101);
        assert!(flags.has_event());
        assert_eq!(flags.sequence_bits(), 0b01);
        assert!(flags.contains(MessageFlags::WITH_EVENT));
        assert!(!MessageFlags::NEGATIVE_SEQ.has_event());
        assert_eq!(MessageFlags::from_bits(0xF4).bits(), 0x04);
    }

    #[test]
    fn test_with_event_sets_flag() {
        let message = Message::new(MessageKind::FullClient, MessageFlags::NO_SEQ).with_event(1);
        assert!(message.flags.has_event());
        assert_eq!(message.event, Some(1));
    }
}
