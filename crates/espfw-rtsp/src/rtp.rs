//! RTP packetization of JPEG frames (RFC 3550, RFC 2435).

use crate::jpeg::JpegFrame;

/// Static payload type for JPEG.
pub const PAYLOAD_TYPE: u8 = 26;
/// RTP clock for video.
pub const CLOCK_RATE: u32 = 90_000;
/// Largest payload carried by a single packet.
pub const MAX_PAYLOAD: usize = 1400;

const RTP_HEADER_LEN: usize = 12;
const JPEG_HEADER_LEN: usize = 8;
const QTABLE_HEADER_LEN: usize = 4;
/// Q values of 128 and above announce in-band quantization tables.
const DYNAMIC_Q: u8 = 255;

/// Fixed RTP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(0x80);
        out.push(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < RTP_HEADER_LEN || data[0] >> 6 != 2 {
            return None;
        }
        Some(Self {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}

/// Splits JPEG frames into RTP packets for one stream.
#[derive(Debug, Clone)]
pub struct JpegPacketizer {
    ssrc: u32,
    sequence: u16,
}

impl JpegPacketizer {
    pub fn new(ssrc: u32) -> Self {
        Self { ssrc, sequence: 0 }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number of the next packet.
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// RTP timestamp for a millisecond clock reading.
    pub fn timestamp(now_ms: u32) -> u32 {
        now_ms.wrapping_mul(CLOCK_RATE / 1000)
    }

    /// Packetize one frame. Every returned buffer is a complete RTP packet.
    pub fn packetize(&mut self, frame: &JpegFrame<'_>, now_ms: u32) -> Vec<Vec<u8>> {
        let timestamp = Self::timestamp(now_ms);
        let table_len: usize = frame.qtables.iter().map(|t| t.len()).sum();
        let mut packets = Vec::new();
        let mut offset = 0usize;

        while offset < frame.scan.len() || packets.is_empty() {
            let first = offset == 0;
            let mut room = MAX_PAYLOAD - JPEG_HEADER_LEN;
            if first {
                room -= QTABLE_HEADER_LEN + table_len;
            }
            let chunk = &frame.scan[offset..frame.scan.len().min(offset + room)];
            let last = offset + chunk.len() >= frame.scan.len();

            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + MAX_PAYLOAD);
            RtpHeader {
                marker: last,
                payload_type: PAYLOAD_TYPE,
                sequence: self.sequence,
                timestamp,
                ssrc: self.ssrc,
            }
            .write(&mut packet);

            // Type-specific byte, then a 24-bit fragment offset.
            packet.push(0);
            packet.extend_from_slice(&(offset as u32).to_be_bytes()[1..]);
            packet.push(frame.kind);
            packet.push(DYNAMIC_Q);
            packet.push((frame.width / 8) as u8);
            packet.push((frame.height / 8) as u8);

            if first {
                packet.push(0); // MBZ
                packet.push(0); // precision: all 8-bit
                packet.extend_from_slice(&(table_len as u16).to_be_bytes());
                for table in &frame.qtables {
                    packet.extend_from_slice(table);
                }
            }
            packet.extend_from_slice(chunk);

            packets.push(packet);
            self.sequence = self.sequence.wrapping_add(1);
            offset += chunk.len();
        }
        packets
    }
}
