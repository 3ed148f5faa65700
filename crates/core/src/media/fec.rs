//! XOR forward error correction (RFC 5109 §7), level 0 only.
//!
//! A FEC packet protects a run of 2–16 consecutive media packets. Each
//! recovery field is the XOR of that field across the protected packets;
//! the protection payload is the byte-wise XOR of their CSRC lists and
//! payloads, shorter ones implicitly zero-padded to the longest. Any single
//! missing packet of the group can then be rebuilt from the FEC packet and
//! the others.
//!
//! ```text
//! FEC header (10 bytes)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |E|L|P|X|  CC   |M| PT recovery |            SN base            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          TS recovery                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        length recovery        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!
//! Level 0 header (4 bytes), then `Protection Length` bytes of XOR data
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |       Protection Length       |             mask              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The E and L bits are always zero: no extension, 16-bit mask.

use bytes::{BufMut, Bytes, BytesMut};

use super::rtp::{PayloadType, RTP_VERSION, RegularPacket, RtpHeader};
use crate::error::{Error, Result};

/// Smallest FEC group the sender builds.
pub const FEC_MIN_GROUP: usize = 2;
/// Largest FEC group; bounded by the 16-bit level-0 mask.
pub const FEC_MAX_GROUP: usize = 16;

const FEC_HEADER_SIZE: usize = 10;
const FEC_LEVEL_0_HEADER_SIZE: usize = 4;

/// Level-0 protection: which packets are covered, and their XOR.
///
/// Bit 15 of `mask` covers `sequence_number_base`, bit 14 the next
/// sequence number, and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecProtection {
    mask: u16,
    payload: Bytes,
}

impl FecProtection {
    pub fn new(mask: u16, payload: Bytes) -> Result<Self> {
        if mask == 0 {
            return Err(Error::InvalidFecGroup("mask must not be 0".into()));
        }
        if payload.is_empty() {
            return Err(Error::InvalidFecGroup("payload must not be empty".into()));
        }
        if payload.len() > u16::MAX as usize {
            return Err(Error::InvalidFecGroup(format!(
                "protection length {} exceeds {}",
                payload.len(),
                u16::MAX
            )));
        }
        Ok(Self { mask, payload })
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// A parity packet (payload type 127).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecPacket {
    pub header: RtpHeader,
    pub padding_recovery: bool,
    pub extension_recovery: bool,
    pub csrc_count_recovery: u8,
    pub marker_recovery: bool,
    pub payload_type_recovery: u8,
    pub sequence_number_base: u16,
    pub timestamp_recovery: u32,
    pub length_recovery: u16,
    pub protection: FecProtection,
}

/// Running XOR of the recovery fields.
#[derive(Default)]
struct Accumulator {
    padding: bool,
    extension: bool,
    csrc_count: u8,
    marker: bool,
    payload_type: u8,
    timestamp: u32,
    length: u16,
}

impl Accumulator {
    fn absorb(&mut self, packet: &RegularPacket, block: &mut [u8]) {
        let header = &packet.header;
        self.padding ^= header.padding;
        self.extension ^= header.extension;
        self.csrc_count ^= header.csrc_count();
        self.marker ^= header.marker;
        self.payload_type ^= header.payload_type.code();
        self.timestamp ^= header.timestamp;
        self.length ^= packet.protected_len() as u16;

        for (dst, src) in block.iter_mut().zip(packet.protected_bytes()) {
            *dst ^= src;
        }
    }
}

impl FecPacket {
    /// Build the FEC packet protecting `group`.
    ///
    /// `group` must hold 2–16 packets with consecutive sequence numbers.
    /// The FEC packet carries the last packet's timestamp and its own
    /// `sequence_number`.
    pub fn build(group: &[RegularPacket], sequence_number: u16, ssrc: u32) -> Result<Self> {
        let (first, last) = match (group.first(), group.last()) {
            (Some(first), Some(last)) if (FEC_MIN_GROUP..=FEC_MAX_GROUP).contains(&group.len()) => {
                (first, last)
            }
            _ => {
                return Err(Error::InvalidFecGroup(format!(
                    "group size {} outside [{}, {}]",
                    group.len(),
                    FEC_MIN_GROUP,
                    FEC_MAX_GROUP
                )));
            }
        };

        let base = first.sequence_number();
        for (offset, packet) in group.iter().enumerate() {
            if packet.sequence_number() != base.wrapping_add(offset as u16) {
                return Err(Error::InvalidFecGroup(format!(
                    "sequence number {} is not consecutive from base {}",
                    packet.sequence_number(),
                    base
                )));
            }
        }

        let protection_len = group.iter().map(RegularPacket::protected_len).max().unwrap_or(0);
        if protection_len > u16::MAX as usize {
            return Err(Error::InvalidFecGroup(format!(
                "protection length {} exceeds {}",
                protection_len,
                u16::MAX
            )));
        }

        let mut acc = Accumulator::default();
        let mut block = vec![0u8; protection_len];
        for packet in group {
            acc.absorb(packet, &mut block);
        }

        let mask = u16::MAX << (FEC_MAX_GROUP - group.len());
        let protection = FecProtection::new(mask, Bytes::from(block))?;

        Ok(Self {
            header: RtpHeader::new(PayloadType::Fec, sequence_number, last.timestamp(), ssrc),
            padding_recovery: acc.padding,
            extension_recovery: acc.extension,
            csrc_count_recovery: acc.csrc_count,
            marker_recovery: acc.marker,
            payload_type_recovery: acc.payload_type,
            sequence_number_base: base,
            timestamp_recovery: acc.timestamp,
            length_recovery: acc.length,
            protection,
        })
    }

    pub fn parse(data: Bytes) -> Result<Self> {
        let header = RtpHeader::parse(&data)?;
        let start = header.size();
        let fec = &data[start..];

        if fec.len() < FEC_HEADER_SIZE + FEC_LEVEL_0_HEADER_SIZE {
            return Err(Error::MalformedPacket("shorter than FEC header"));
        }

        let protection_len = u16::from_be_bytes([fec[10], fec[11]]) as usize;
        let mask = u16::from_be_bytes([fec[12], fec[13]]);
        let payload_start = start + FEC_HEADER_SIZE + FEC_LEVEL_0_HEADER_SIZE;

        if data.len() < payload_start + protection_len {
            return Err(Error::MalformedPacket("shorter than FEC protection length"));
        }
        if mask == 0 || protection_len == 0 {
            return Err(Error::MalformedPacket("empty FEC protection"));
        }

        Ok(Self {
            padding_recovery: fec[0] & 0x20 != 0,
            extension_recovery: fec[0] & 0x10 != 0,
            csrc_count_recovery: fec[0] & 0x0f,
            marker_recovery: fec[1] & 0x80 != 0,
            payload_type_recovery: fec[1] & 0x7f,
            sequence_number_base: u16::from_be_bytes([fec[2], fec[3]]),
            timestamp_recovery: u32::from_be_bytes([fec[4], fec[5], fec[6], fec[7]]),
            length_recovery: u16::from_be_bytes([fec[8], fec[9]]),
            protection: FecProtection {
                mask,
                payload: data.slice(payload_start..payload_start + protection_len),
            },
            header,
        })
    }

    pub fn serialize(&self) -> Bytes {
        let payload = &self.protection.payload;
        let mut buf = BytesMut::with_capacity(
            self.header.size() + FEC_HEADER_SIZE + FEC_LEVEL_0_HEADER_SIZE + payload.len(),
        );

        self.header.write(&mut buf);

        buf.put_u8(
            (self.padding_recovery as u8) << 5
                | (self.extension_recovery as u8) << 4
                | (self.csrc_count_recovery & 0x0f),
        );
        buf.put_u8((self.marker_recovery as u8) << 7 | (self.payload_type_recovery & 0x7f));
        buf.put_u16(self.sequence_number_base);
        buf.put_u32(self.timestamp_recovery);
        buf.put_u16(self.length_recovery);

        buf.put_u16(payload.len() as u16);
        buf.put_u16(self.protection.mask);
        buf.put_slice(payload);

        buf.freeze()
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    /// Whether the mask covers `sequence_number`.
    pub fn protects(&self, sequence_number: u16) -> bool {
        let offset = sequence_number.wrapping_sub(self.sequence_number_base) as usize;
        offset < FEC_MAX_GROUP && self.protection.mask & (0x8000 >> offset) != 0
    }

    /// Rebuild the single protected packet missing from `known`.
    ///
    /// Returns `None` when nothing is missing or when two or more protected
    /// packets are missing. The rebuilt packet takes the SSRC of this FEC
    /// packet.
    pub fn recover<'a, I>(&self, known: I) -> Option<RegularPacket>
    where
        I: IntoIterator<Item = &'a RegularPacket>,
    {
        let base = self.sequence_number_base;
        let mut slots: [Option<&RegularPacket>; FEC_MAX_GROUP] = [None; FEC_MAX_GROUP];
        for packet in known {
            if self.protects(packet.sequence_number()) {
                let offset = packet.sequence_number().wrapping_sub(base) as usize;
                slots[offset] = Some(packet);
            }
        }

        let mut acc = Accumulator {
            padding: self.padding_recovery,
            extension: self.extension_recovery,
            csrc_count: self.csrc_count_recovery,
            marker: self.marker_recovery,
            payload_type: self.payload_type_recovery,
            timestamp: self.timestamp_recovery,
            length: self.length_recovery,
        };
        let mut block = self.protection.payload.to_vec();
        let mut missing = None;

        for (offset, slot) in slots.iter().enumerate() {
            if self.protection.mask & (0x8000 >> offset) == 0 {
                continue;
            }
            match slot {
                Some(packet) => acc.absorb(packet, &mut block),
                None if missing.is_none() => missing = Some(base.wrapping_add(offset as u16)),
                None => return None,
            }
        }

        let sequence_number = missing?;

        let length = acc.length as usize;
        let csrc_len = 4 * (acc.csrc_count & 0x0f) as usize;
        if length > block.len() || csrc_len > length {
            tracing::debug!(
                seq = sequence_number,
                length,
                protection = block.len(),
                "recovered length inconsistent with protection"
            );
            return None;
        }
        block.truncate(length);

        let csrc = block[..csrc_len]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let payload = Bytes::from(block).slice(csrc_len..);

        let header = RtpHeader {
            version: RTP_VERSION,
            padding: acc.padding,
            extension: acc.extension,
            marker: acc.marker,
            payload_type: PayloadType::from_code(acc.payload_type),
            sequence_number,
            timestamp: acc.timestamp,
            ssrc: self.header.ssrc,
            csrc,
        };

        Some(RegularPacket::new(header, payload))
    }
}
