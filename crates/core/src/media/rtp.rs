use std::cmp::Ordering;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::fec::FecPacket;
use crate::error::{Error, Result};

/// Size of the fixed RTP header, excluding the CSRC list.
pub const RTP_HEADER_SIZE: usize = 12;

/// RTP protocol version written by this crate.
pub const RTP_VERSION: u8 = 2;

/// RTP payload types understood by the stack.
///
/// JPEG uses the static type 26 (RFC 3551 §6); FEC uses 127. Any other
/// 7-bit value is carried as [`Unknown`](Self::Unknown) so it survives a
/// round trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Jpeg,
    Fec,
    Unknown(u8),
}

impl PayloadType {
    pub const fn from_code(code: u8) -> Self {
        match code & 0x7f {
            26 => PayloadType::Jpeg,
            127 => PayloadType::Fec,
            other => PayloadType::Unknown(other),
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            PayloadType::Jpeg => 26,
            PayloadType::Fec => 127,
            PayloadType::Unknown(code) => code & 0x7f,
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadType::Jpeg => write!(f, "JPEG"),
            PayloadType::Fec => write!(f, "FEC"),
            PayloadType::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                  CSRC list (CC entries, 32 bits)              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The CSRC count is not stored separately; it is the length of
/// [`csrc`](Self::csrc), at most 15.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: PayloadType,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
}

impl RtpHeader {
    pub fn new(payload_type: PayloadType, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    pub fn csrc_count(&self) -> u8 {
        self.csrc.len() as u8
    }

    /// Header length on the wire, CSRC list included.
    pub fn size(&self) -> usize {
        RTP_HEADER_SIZE + 4 * self.csrc.len()
    }

    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(Error::MalformedPacket("shorter than RTP header"));
        }

        let csrc_count = (data[0] & 0x0f) as usize;
        let size = RTP_HEADER_SIZE + 4 * csrc_count;
        if data.len() < size {
            return Err(Error::MalformedPacket("shorter than CSRC list"));
        }

        let csrc = data[RTP_HEADER_SIZE..size]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            version: (data[0] >> 6) & 0b11,
            padding: data[0] & 0x20 != 0,
            extension: data[0] & 0x10 != 0,
            marker: data[1] & 0x80 != 0,
            payload_type: PayloadType::from_code(data[1]),
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            csrc,
        })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(
            (self.version & 0b11) << 6
                | (self.padding as u8) << 5
                | (self.extension as u8) << 4
                | (self.csrc_count() & 0x0f),
        );
        buf.put_u8((self.marker as u8) << 7 | self.payload_type.code());
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }
    }

    /// Presentation order between two packets of the same stream.
    ///
    /// Packets with the same sequence number are equal. Otherwise they are
    /// ordered by timestamp using serial-number arithmetic (RFC 1982), so a
    /// timestamp that wrapped past `u32::MAX` still sorts after its
    /// predecessor.
    pub fn presentation_cmp(&self, other: &RtpHeader) -> Ordering {
        if self.sequence_number == other.sequence_number {
            return Ordering::Equal;
        }
        (self.timestamp.wrapping_sub(other.timestamp) as i32).cmp(&0)
    }
}

/// A media packet: RTP header plus a zero-copy view of its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RegularPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Parse a datagram. The payload shares `data`'s allocation.
    pub fn parse(data: Bytes) -> Result<Self> {
        let header = RtpHeader::parse(&data)?;
        let payload = data.slice(header.size()..);
        Ok(Self { header, payload })
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.size() + self.payload.len());
        self.header.write(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn payload_type(&self) -> PayloadType {
        self.header.payload_type
    }

    /// Length of the bytes covered by FEC protection: CSRC list and payload
    /// (RFC 5109 §7.3).
    pub(crate) fn protected_len(&self) -> usize {
        4 * self.header.csrc.len() + self.payload.len()
    }

    pub(crate) fn protected_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.header
            .csrc
            .iter()
            .flat_map(|c| c.to_be_bytes())
            .chain(self.payload.iter().copied())
    }
}

/// Any packet the codec can decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpPacket {
    Regular(RegularPacket),
    Fec(FecPacket),
}

impl RtpPacket {
    /// Decode a datagram, branching on its payload type.
    ///
    /// Fails with [`Error::MalformedPacket`] on truncated input or an
    /// unknown payload type.
    pub fn parse(data: Bytes) -> Result<Self> {
        match classify(&data) {
            None => Err(Error::MalformedPacket("shorter than RTP header")),
            Some(PayloadType::Unknown(_)) => Err(Error::MalformedPacket("unknown payload type")),
            Some(PayloadType::Fec) => Ok(RtpPacket::Fec(FecPacket::parse(data)?)),
            Some(PayloadType::Jpeg) => Ok(RtpPacket::Regular(RegularPacket::parse(data)?)),
        }
    }

    pub fn serialize(&self) -> Bytes {
        match self {
            RtpPacket::Regular(p) => p.serialize(),
            RtpPacket::Fec(p) => p.serialize(),
        }
    }

    pub fn header(&self) -> &RtpHeader {
        match self {
            RtpPacket::Regular(p) => &p.header,
            RtpPacket::Fec(p) => &p.header,
        }
    }

    pub fn sequence_number(&self) -> u16 {
        self.header().sequence_number
    }
}

impl From<RegularPacket> for RtpPacket {
    fn from(packet: RegularPacket) -> Self {
        RtpPacket::Regular(packet)
    }
}

impl From<FecPacket> for RtpPacket {
    fn from(packet: FecPacket) -> Self {
        RtpPacket::Fec(packet)
    }
}

/// Read only the payload-type field, without validating the rest.
pub fn classify(data: &[u8]) -> Option<PayloadType> {
    data.get(1).map(|b| PayloadType::from_code(*b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(seq: u16, ts: u32, payload: &'static [u8]) -> RegularPacket {
        RegularPacket::new(
            RtpHeader::new(PayloadType::Jpeg, seq, ts, 0xAABBCCDD),
            Bytes::from_static(payload),
        )
    }

    #[test]
    fn header_layout() {
        let mut packet = make_packet(0x1234, 0x01020304, b"xyz");
        packet.header.marker = true;
        let buf = packet.serialize();

        assert_eq!(buf.len(), 15);
        assert_eq!(buf[0] >> 6, 2, "version must be 2");
        assert_eq!(buf[1], 0x80 | 26);
        assert_eq!(&buf[2..4], &[0x12, 0x34]);
        assert_eq!(&buf[4..8], &[1, 2, 3, 4]);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&buf[12..], b"xyz");
    }

    #[test]
    fn flags_and_csrc_survive_round_trip() {
        let mut packet = make_packet(65535, u32::MAX, b"payload");
        packet.header.padding = true;
        packet.header.extension = true;
        packet.header.csrc = vec![1, 0xDEADBEEF];

        let parsed = RtpPacket::parse(packet.serialize()).unwrap();
        assert_eq!(parsed, RtpPacket::Regular(packet));
    }

    #[test]
    fn payload_is_zero_copy() {
        let data = make_packet(1, 2, b"abcdef").serialize();
        let parsed = RegularPacket::parse(data.clone()).unwrap();
        assert_eq!(parsed.payload.as_ptr(), data[RTP_HEADER_SIZE..].as_ptr());
    }

    #[test]
    fn rejects_short_packets() {
        assert!(matches!(
            RtpPacket::parse(Bytes::from_static(&[0x80, 26, 0, 1])),
            Err(Error::MalformedPacket(_))
        ));
        // CC=2 announces 8 CSRC bytes that are not there
        let mut short = vec![0x82, 26];
        short.extend_from_slice(&[0; 10]);
        assert!(RtpPacket::parse(Bytes::from(short)).is_err());
        assert!(RtpPacket::parse(Bytes::new()).is_err());
    }

    #[test]
    fn rejects_unknown_payload_type() {
        let mut packet = make_packet(1, 1, b"x");
        packet.header.payload_type = PayloadType::Unknown(96);
        let data = packet.serialize();
        assert_eq!(classify(&data), Some(PayloadType::Unknown(96)));
        assert!(RtpPacket::parse(data).is_err());
    }

    #[test]
    fn payload_type_codes() {
        assert_eq!(PayloadType::from_code(26), PayloadType::Jpeg);
        assert_eq!(PayloadType::from_code(127), PayloadType::Fec);
        assert_eq!(PayloadType::from_code(0x80 | 26), PayloadType::Jpeg);
        assert_eq!(PayloadType::from_code(5).code(), 5);
    }

    #[test]
    fn ordering_by_timestamp() {
        let a = make_packet(10, 100, b"");
        let b = make_packet(11, 140, b"");
        assert_eq!(a.header.presentation_cmp(&b.header), Ordering::Less);
        assert_eq!(b.header.presentation_cmp(&a.header), Ordering::Greater);

        let same_seq = make_packet(10, 999, b"");
        assert_eq!(a.header.presentation_cmp(&same_seq.header), Ordering::Equal);
    }

    #[test]
    fn ordering_across_timestamp_wrap() {
        let before = make_packet(1, u32::MAX - 10, b"");
        let after = make_packet(2, 30, b"");
        assert_eq!(before.header.presentation_cmp(&after.header), Ordering::Less);
    }
}
