use super::compression::Compression;
use super::events;
use super::header::{FrameHeader, ProtocolConfig, Serialization};
use super::message::{Message, MessageFlags, MessageKind};
use super::sequence::{contains_sequence, SequencePolicy};
use super::ProtocolError;

/// Encodes [`Message`]s to frames and decodes frames back.
///
/// Field order on the wire:
/// 1. header (`header_size_words * 4` bytes, three fixed bytes then zero padding)
/// 2. sequence, for audio-only kinds when the sequence policy says so
/// 3. error code, for `Error` frames
/// 4. event, then session ID (non-reserved events) or connect ID (50/51/52)
/// 5. payload length and payload bytes (after compression)
#[derive(Clone)]
pub struct FrameCodec {
    config: ProtocolConfig,
    sequence_policy: SequencePolicy,
}

impl FrameCodec {
    pub fn new(config: ProtocolConfig) -> Result<Self, ProtocolError> {
        Self::with_sequence_policy(config, contains_sequence)
    }

    pub fn with_sequence_policy(
        config: ProtocolConfig,
        sequence_policy: SequencePolicy,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        Ok(Self {
            config,
            sequence_policy,
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Same policy, different header settings.
    pub fn with_config(&self, config: ProtocolConfig) -> Result<Self, ProtocolError> {
        Self::with_sequence_policy(config, self.sequence_policy)
    }

    fn writes_sequence(&self, kind: MessageKind, flags: MessageFlags) -> bool {
        kind.is_audio_only() && (self.sequence_policy)(flags)
    }

    /// Check that the optional fields line up with what the wire layout will carry.
    pub fn validate(&self, message: &Message) -> Result<(), ProtocolError> {
        let invalid = |reason: String| Err(ProtocolError::InvalidMessage(reason));

        if message.event.is_some() != message.flags.has_event() {
            return invalid(format!(
                "event {:?} does not match flags {:?}",
                message.event, message.flags
            ));
        }

        match message.event {
            Some(event) if events::carries_connect_id(event) => {
                if message.connect_id.is_none() {
                    return invalid(format!("event {} requires a connect ID", event));
                }
                if message.session_id.is_some() {
                    return invalid(format!("event {} cannot carry a session ID", event));
                }
            }
            Some(event) if events::is_reserved(event) => {
                if message.session_id.is_some() || message.connect_id.is_some() {
                    return invalid(format!("event {} carries no session or connect ID", event));
                }
            }
            Some(event) => {
                if message.session_id.as_deref().map_or(true, str::is_empty) {
                    return invalid(format!("event {} requires a non-empty session ID", event));
                }
                if message.connect_id.is_some() {
                    return invalid(format!("event {} cannot carry a connect ID", event));
                }
            }
            None => {
                if message.session_id.is_some() || message.connect_id.is_some() {
                    return invalid("session or connect ID without an event".to_string());
                }
            }
        }

        let writes_sequence = self.writes_sequence(message.kind, message.flags);
        if writes_sequence != message.sequence.is_some() {
            return invalid(format!(
                "{} with flags {:?} {} a sequence",
                message.kind,
                message.flags,
                if writes_sequence { "requires" } else { "cannot carry" }
            ));
        }

        if (message.kind == MessageKind::Error) != message.error_code.is_some() {
            return invalid(format!(
                "error code is carried by Error frames only, got {} with {:?}",
                message.kind, message.error_code
            ));
        }

        Ok(())
    }

    /// Serialize a message into one frame.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        self.validate(message)?;

        let payload = self.config.compression.compress(&message.payload)?;
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

        let header_len = self.config.header_len();
        let mut frame = Vec::with_capacity(header_len + 24 + payload.len());

        frame.push((self.config.version << 4) | self.config.header_size_words);
        frame.push((message.kind.code() << 4) | message.flags.bits());
        frame.push((self.config.serialization.code() << 4) | self.config.compression.code());
        frame.resize(header_len, 0);

        if self.writes_sequence(message.kind, message.flags) {
            if let Some(sequence) = message.sequence {
                frame.extend_from_slice(&sequence.to_be_bytes());
            }
        }

        if message.kind == MessageKind::Error {
            if let Some(error_code) = message.error_code {
                frame.extend_from_slice(&error_code.to_be_bytes());
            }
        }

        if let Some(event) = message.event {
            frame.extend_from_slice(&event.to_be_bytes());
            if !events::is_reserved(event) {
                write_string(&mut frame, message.session_id.as_deref().unwrap_or_default())?;
            }
            if events::carries_connect_id(event) {
                write_string(&mut frame, message.connect_id.as_deref().unwrap_or_default())?;
            }
        }

        frame.extend_from_slice(&payload_len.to_be_bytes());
        frame.extend_from_slice(&payload);

        log::trace!(
            "Encoded {} frame (event={:?}, {} payload bytes, {} total)",
            message.kind,
            message.event,
            payload.len(),
            frame.len()
        );
        Ok(frame)
    }

    /// Parse one frame into a message.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, ProtocolError> {
        self.decode_frame(bytes).map(|(_, message)| message)
    }

    /// Parse one frame, also returning the header settings it was sent with.
    pub fn decode_frame(&self, bytes: &[u8]) -> Result<(FrameHeader, Message), ProtocolError> {
        let mut reader = FrameReader::new(bytes);

        let fixed = reader.take(3, "header")?;
        let version = fixed[0] >> 4;
        let header_size_words = fixed[0] & 0x0F;
        let type_code = fixed[1] >> 4;
        let flags = MessageFlags::from_bits(fixed[1]);
        let serialization_code = fixed[2] >> 4;
        let compression_code = fixed[2] & 0x0F;

        let kind =
            MessageKind::from_code(type_code).ok_or(ProtocolError::UnknownMessageType(type_code))?;
        if header_size_words == 0 {
            return Err(ProtocolError::InvalidHeaderSize(header_size_words));
        }
        reader.take(header_size_words as usize * 4 - 3, "header padding")?;

        let header = FrameHeader {
            version,
            header_size_words,
            serialization: Serialization::from_code(serialization_code),
            compression: Compression::from_code(compression_code)?,
        };

        let mut message = Message::new(kind, flags);

        if self.writes_sequence(kind, flags) {
            message.sequence = Some(reader.read_i32("sequence")?);
        }

        if kind == MessageKind::Error {
            message.error_code = Some(reader.read_u32("error code")?);
        }

        if flags.has_event() {
            let event = reader.read_i32("event")?;
            message.event = Some(event);
            if !events::is_reserved(event) {
                message.session_id = Some(reader.read_string("session id")?);
            }
            if events::carries_connect_id(event) {
                message.connect_id = Some(reader.read_string("connect id")?);
            }
        }

        let payload = reader.read_bytes("payload")?;
        message.payload = header.compression.decompress(payload)?;

        if reader.remaining() > 0 {
            log::trace!(
                "Ignoring {} trailing bytes after {} frame",
                reader.remaining(),
                kind
            );
        }

        Ok((header, message))
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Cursor over a frame that reports which field ran out of bytes.
struct FrameReader<'a> {
    bytes: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        if self.bytes.len() < len {
            return Err(ProtocolError::MalformedFrame {
                field,
                needed: len,
                available: self.bytes.len(),
            });
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self, field: &'static str) -> Result<i32, ProtocolError> {
        let b = self.take(4, field)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_bytes(&mut self, field: &'static str) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_u32(field)? as usize;
        Ok(self.take(len, field)?.to_vec())
    }

    fn read_string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let bytes = self.read_bytes(field)?;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidString { field })
    }
}

fn write_string(buffer: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    let bytes = s.as_bytes();
    let len = u32::try_from(bytes.len()).map_err(|_| {
        ProtocolError::InvalidMessage(format!("identifier of {} bytes", bytes.len()))
    })?;
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(bytes);
    Ok(())
}
