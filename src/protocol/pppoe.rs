//! PPPoE Discovery codec - RFC 2516 (tags from RFC 4638 included)
//!
//! Zero-copy frame parsing plus a builder for the client-side
//! discovery packets. Tags decode to [`Tag`] variants so call sites
//! match on tag kinds instead of juggling raw type codes.

use crate::{Error, Result};

/// PPPoE Discovery EtherType
pub const PPPOE_DISCOVERY_ETHERTYPE: u16 = 0x8863;

/// PPPoE Session EtherType
pub const PPPOE_SESSION_ETHERTYPE: u16 = 0x8864;

/// PPPoE header size (ver/type + code + session_id + length)
pub const PPPOE_HEADER_SIZE: usize = 6;

/// PPPoE version (must be 1)
pub const PPPOE_VERSION: u8 = 1;

/// PPPoE type (must be 1)
pub const PPPOE_TYPE: u8 = 1;

/// Standard PPPoE MTU: 1500 minus the PPPoE and PPP headers
pub const PPPOE_MTU: u16 = 1492;

/// Tag header size (type + length)
pub const TAG_HEADER_SIZE: usize = 4;

/// Largest discovery payload that fits a standard 1500-byte link MTU.
/// The builder treats running past this as a programming error.
pub const MAX_DISCOVERY_PAYLOAD: usize = 1500 - PPPOE_HEADER_SIZE;

/// PPPoE Discovery codes
pub mod codes {
    /// Active Discovery Initiation (broadcast from client)
    pub const PADI: u8 = 0x09;
    /// Active Discovery Offer (unicast from server)
    pub const PADO: u8 = 0x07;
    /// Active Discovery Request (unicast to server)
    pub const PADR: u8 = 0x19;
    /// Active Discovery Session-confirmation (assigns session_id)
    pub const PADS: u8 = 0x65;
    /// Active Discovery Terminate
    pub const PADT: u8 = 0xa7;
}

/// PPPoE tag types used in Discovery packets
pub mod tags {
    /// End of list
    pub const END_OF_LIST: u16 = 0x0000;
    /// Service name (empty = any service)
    pub const SERVICE_NAME: u16 = 0x0101;
    /// Access Concentrator name
    pub const AC_NAME: u16 = 0x0102;
    /// Host unique identifier (used to match responses)
    pub const HOST_UNIQ: u16 = 0x0103;
    /// AC cookie (must be echoed back verbatim)
    pub const AC_COOKIE: u16 = 0x0104;
    /// Relay session ID (must be echoed back verbatim)
    pub const RELAY_SESSION_ID: u16 = 0x0110;
    /// PPP maximum payload (RFC 4638)
    pub const PPP_MAX_PAYLOAD: u16 = 0x0120;
    /// Service name error
    pub const SERVICE_NAME_ERROR: u16 = 0x0201;
    /// AC system error
    pub const AC_SYSTEM_ERROR: u16 = 0x0202;
    /// Generic error
    pub const GENERIC_ERROR: u16 = 0x0203;
}

/// A decoded discovery tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag<'a> {
    EndOfList,
    ServiceName(&'a [u8]),
    AcName(&'a [u8]),
    HostUniq(&'a [u8]),
    AcCookie(&'a [u8]),
    RelaySessionId(&'a [u8]),
    PppMaxPayload(&'a [u8]),
    ServiceNameError(&'a [u8]),
    AcSystemError(&'a [u8]),
    GenericError(&'a [u8]),
    Unknown { tag_type: u16, data: &'a [u8] },
}

impl<'a> Tag<'a> {
    fn decode(tag_type: u16, data: &'a [u8]) -> Self {
        match tag_type {
            tags::END_OF_LIST => Tag::EndOfList,
            tags::SERVICE_NAME => Tag::ServiceName(data),
            tags::AC_NAME => Tag::AcName(data),
            tags::HOST_UNIQ => Tag::HostUniq(data),
            tags::AC_COOKIE => Tag::AcCookie(data),
            tags::RELAY_SESSION_ID => Tag::RelaySessionId(data),
            tags::PPP_MAX_PAYLOAD => Tag::PppMaxPayload(data),
            tags::SERVICE_NAME_ERROR => Tag::ServiceNameError(data),
            tags::AC_SYSTEM_ERROR => Tag::AcSystemError(data),
            tags::GENERIC_ERROR => Tag::GenericError(data),
            _ => Tag::Unknown { tag_type, data },
        }
    }

    /// The on-wire tag type code.
    pub fn tag_type(&self) -> u16 {
        match self {
            Tag::EndOfList => tags::END_OF_LIST,
            Tag::ServiceName(_) => tags::SERVICE_NAME,
            Tag::AcName(_) => tags::AC_NAME,
            Tag::HostUniq(_) => tags::HOST_UNIQ,
            Tag::AcCookie(_) => tags::AC_COOKIE,
            Tag::RelaySessionId(_) => tags::RELAY_SESSION_ID,
            Tag::PppMaxPayload(_) => tags::PPP_MAX_PAYLOAD,
            Tag::ServiceNameError(_) => tags::SERVICE_NAME_ERROR,
            Tag::AcSystemError(_) => tags::AC_SYSTEM_ERROR,
            Tag::GenericError(_) => tags::GENERIC_ERROR,
            Tag::Unknown { tag_type, .. } => *tag_type,
        }
    }

    /// The tag value bytes.
    pub fn data(&self) -> &'a [u8] {
        match self {
            Tag::EndOfList => &[],
            Tag::ServiceName(d)
            | Tag::AcName(d)
            | Tag::HostUniq(d)
            | Tag::AcCookie(d)
            | Tag::RelaySessionId(d)
            | Tag::PppMaxPayload(d)
            | Tag::ServiceNameError(d)
            | Tag::AcSystemError(d)
            | Tag::GenericError(d)
            | Tag::Unknown { data: d, .. } => d,
        }
    }

    /// Error tag name for diagnostics, or None for non-error tags.
    pub fn error_name(&self) -> Option<&'static str> {
        match self {
            Tag::ServiceNameError(_) => Some("Service-Name-Error"),
            Tag::AcSystemError(_) => Some("AC-System-Error"),
            Tag::GenericError(_) => Some("Generic-Error"),
            _ => None,
        }
    }
}

/// Parsed PPPoE discovery frame (zero-copy reference)
#[derive(Debug)]
pub struct PppoeFrame<'a> {
    buffer: &'a [u8],
}

impl<'a> PppoeFrame<'a> {
    /// Parse a PPPoE frame from the Ethernet payload.
    ///
    /// Rejects frames whose declared length runs past the bytes
    /// actually received (the "bogus length" case), and frames with a
    /// version/type other than 1/1.
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < PPPOE_HEADER_SIZE {
            return Err(Error::Parse("PPPoE frame too short".into()));
        }

        let frame = Self { buffer };

        if frame.version() != PPPOE_VERSION || frame.frame_type() != PPPOE_TYPE {
            return Err(Error::Parse(format!(
                "invalid PPPoE version/type: {}/{}",
                frame.version(),
                frame.frame_type()
            )));
        }

        let payload_len = frame.length() as usize;
        if buffer.len() < PPPOE_HEADER_SIZE + payload_len {
            return Err(Error::Parse(format!(
                "bogus PPPoE length field ({})",
                payload_len
            )));
        }

        Ok(frame)
    }

    /// Version (4 bits, should be 1)
    pub fn version(&self) -> u8 {
        (self.buffer[0] >> 4) & 0x0f
    }

    /// Type (4 bits, should be 1)
    pub fn frame_type(&self) -> u8 {
        self.buffer[0] & 0x0f
    }

    /// Code (PADI, PADO, PADR, PADS or PADT)
    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    /// Session ID, host order (0 throughout discovery, assigned by PADS)
    pub fn session_id(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Declared payload length
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// Payload, bounded by the declared length (trailing Ethernet
    /// padding is excluded)
    pub fn payload(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[PPPOE_HEADER_SIZE..PPPOE_HEADER_SIZE + len]
    }

    /// Iterate over decoded tags in the payload
    pub fn tags(&self) -> TagIterator<'a> {
        TagIterator {
            data: self.payload(),
            offset: 0,
        }
    }

    /// Find the first tag of a given type
    pub fn find_tag(&self, tag_type: u16) -> Option<&'a [u8]> {
        self.tags()
            .find(|tag| tag.tag_type() == tag_type)
            .map(|tag| tag.data())
    }
}

/// Iterator over decoded PPPoE tags
///
/// A tag whose declared length runs past the payload window terminates
/// the walk; so does an End-of-List tag.
pub struct TagIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for TagIterator<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + TAG_HEADER_SIZE > self.data.len() {
            return None;
        }

        let tag_type = u16::from_be_bytes([self.data[self.offset], self.data[self.offset + 1]]);
        let tag_len =
            u16::from_be_bytes([self.data[self.offset + 2], self.data[self.offset + 3]]) as usize;

        if tag_type == tags::END_OF_LIST {
            return None;
        }

        let data_start = self.offset + TAG_HEADER_SIZE;
        let data_end = data_start + tag_len;

        if data_end > self.data.len() {
            // Runaway tag: truncate the walk
            return None;
        }

        self.offset = data_end;
        Some(Tag::decode(tag_type, &self.data[data_start..data_end]))
    }
}

/// Builder for PPPoE discovery frames
#[derive(Debug, Default)]
pub struct PppoeBuilder {
    code: u8,
    session_id: u16,
    payload: Vec<u8>,
}

impl PppoeBuilder {
    /// Create a builder for discovery packets (defaults to PADI)
    pub fn discovery() -> Self {
        Self {
            code: codes::PADI,
            session_id: 0,
            payload: Vec::new(),
        }
    }

    /// Set the code
    pub fn code(mut self, code: u8) -> Self {
        self.code = code;
        self
    }

    /// Set the session ID (only meaningful for PADT)
    pub fn session_id(mut self, session_id: u16) -> Self {
        self.session_id = session_id;
        self
    }

    /// Append a raw tag.
    ///
    /// Panics if the tag would not fit the discovery payload window;
    /// callers only ever append a bounded set of tags, so running out
    /// of room is a mis-sized buffer, not a runtime condition.
    pub fn tag(mut self, tag_type: u16, data: &[u8]) -> Self {
        assert!(
            self.payload.len() + TAG_HEADER_SIZE + data.len() <= MAX_DISCOVERY_PAYLOAD,
            "discovery payload overflow"
        );
        self.payload.extend_from_slice(&tag_type.to_be_bytes());
        self.payload
            .extend_from_slice(&(data.len() as u16).to_be_bytes());
        self.payload.extend_from_slice(data);
        self
    }

    /// Add a service name tag
    pub fn service_name(self, name: &[u8]) -> Self {
        self.tag(tags::SERVICE_NAME, name)
    }

    /// Add an empty service name tag (accept any service)
    pub fn service_name_any(self) -> Self {
        self.tag(tags::SERVICE_NAME, &[])
    }

    /// Add a host unique tag
    pub fn host_uniq(self, uniq: &[u8]) -> Self {
        self.tag(tags::HOST_UNIQ, uniq)
    }

    /// Add a PPP max payload tag (RFC 4638)
    pub fn ppp_max_payload(self, mru: u16) -> Self {
        self.tag(tags::PPP_MAX_PAYLOAD, &mru.to_be_bytes())
    }

    /// Add a generic error tag carrying a human-readable reason
    pub fn generic_error(self, message: &str) -> Self {
        self.tag(tags::GENERIC_ERROR, message.as_bytes())
    }

    /// Build the PPPoE frame
    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(PPPOE_HEADER_SIZE + self.payload.len());

        frame.push((PPPOE_VERSION << 4) | PPPOE_TYPE);
        frame.push(self.code);
        frame.extend_from_slice(&self.session_id.to_be_bytes());
        frame.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(&self.payload);

        frame
    }
}
