use super::message::MessageFlags;

/// Decides from the flag bits whether a sequence field is on the wire.
///
/// A [`crate::protocol::FrameCodec`] holds exactly one policy and consults it
/// when encoding and when decoding.
pub type SequencePolicy = fn(MessageFlags) -> bool;

/// Default policy: a sequence follows for `PositiveSeq` (01) and `NegativeSeq` (11).
pub fn contains_sequence(flags: MessageFlags) -> bool {
    let bits = flags.sequence_bits();
    bits == MessageFlags::POSITIVE_SEQ.bits() || bits == MessageFlags::NEGATIVE_SEQ.bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_bits() {
        assert!(!contains_sequence(MessageFlags::NO_SEQ));
        assert!(contains_sequence(MessageFlags::POSITIVE_SEQ));
        assert!(!contains_sequence(MessageFlags::LAST_NO_SEQ));
        assert!(contains_sequence(MessageFlags::NEGATIVE_SEQ));
    }

    #[test]
    fn test_event_bit_is_ignored() {
        assert!(contains_sequence(
            MessageFlags::WITH_EVENT | MessageFlags::POSITIVE_SEQ
        ));
        assert!(!contains_sequence(MessageFlags::WITH_EVENT));
        assert!(!contains_sequence(
            MessageFlags::WITH_EVENT | MessageFlags::LAST_NO_SEQ
        ));
    }
}
