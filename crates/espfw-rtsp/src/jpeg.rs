//! Baseline JPEG parsing for the RTP/JPEG payload format.
//!
//! RFC 2435 does not carry JPEG headers on the wire. The receiver rebuilds
//! them from the image type, size and quantization tables, so only the
//! entropy-coded scan and those parameters are extracted here.

/// Largest width or height representable in the RTP/JPEG header.
pub const MAX_DIMENSION: u16 = 2040;

/// Errors raised while parsing a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JpegError {
    #[error("Missing start of image marker")]
    MissingSoi,
    #[error("Frame truncated")]
    Truncated,
    #[error("Progressive JPEG is not supported")]
    Progressive,
    #[error("Unsupported frame type 0x{0:02x}")]
    UnsupportedFrame(u8),
    #[error("Restart intervals are not supported")]
    RestartInterval,
    #[error("Only 8-bit quantization tables are supported")]
    QuantizationPrecision,
    #[error("Unsupported sampling 0x{0:02x}")]
    UnsupportedSampling(u8),
    #[error("Frame {width}x{height} exceeds {max} pixels", max = MAX_DIMENSION)]
    TooLarge { width: u16, height: u16 },
    #[error("No quantization tables")]
    MissingTables,
    #[error("No frame header")]
    MissingFrameHeader,
    #[error("No scan data")]
    MissingScan,
}

/// The parts of a JPEG image that go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegFrame<'a> {
    pub width: u16,
    pub height: u16,
    /// RTP/JPEG type: 0 for 4:2:2, 1 for 4:2:0.
    pub kind: u8,
    /// Luma then chroma table, zig-zag order.
    pub qtables: Vec<&'a [u8]>,
    pub scan: &'a [u8],
}

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF0: u8 = 0xC0;
const DHT: u8 = 0xC4;
const DAC: u8 = 0xCC;
const DQT: u8 = 0xDB;
const DRI: u8 = 0xDD;
const SOS: u8 = 0xDA;

/// Parse a baseline JPEG.
pub fn parse(data: &[u8]) -> Result<JpegFrame<'_>, JpegError> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != SOI {
        return Err(JpegError::MissingSoi);
    }

    let mut tables: [Option<&[u8]>; 4] = [None; 4];
    let mut header: Option<(u16, u16, u8)> = None;
    let mut pos = 2;

    loop {
        // Markers may be padded with extra 0xFF bytes.
        while pos < data.len() && data[pos] == 0xFF && data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        if pos + 1 >= data.len() {
            return Err(JpegError::MissingScan);
        }
        if data[pos] != 0xFF {
            return Err(JpegError::Truncated);
        }
        let marker = data[pos + 1];
        pos += 2;

        match marker {
            0x01 | 0xD0..=0xD7 => continue,
            EOI => return Err(JpegError::MissingScan),
            _ => {}
        }

        let segment = segment(data, pos)?;
        match marker {
            DQT => read_tables(segment, &mut tables)?,
            SOF0 => header = Some(read_frame_header(segment)?),
            0xC2 | 0xC6 | 0xCA | 0xCE => return Err(JpegError::Progressive),
            0xC1..=0xCF if marker != DHT && marker != DAC => {
                return Err(JpegError::UnsupportedFrame(marker))
            }
            DRI => {
                if segment.len() >= 2 && u16::from_be_bytes([segment[0], segment[1]]) != 0 {
                    return Err(JpegError::RestartInterval);
                }
            }
            SOS => {
                let (width, height, kind) = header.ok_or(JpegError::MissingFrameHeader)?;
                let scan_start = pos + segment.len() + 2;
                let scan_end = find_eoi(data, scan_start);
                if scan_end <= scan_start {
                    return Err(JpegError::MissingScan);
                }
                let qtables = collect_tables(&tables)?;
                return Ok(JpegFrame {
                    width,
                    height,
                    kind,
                    qtables,
                    scan: &data[scan_start..scan_end],
                });
            }
            _ => {}
        }
        pos += segment.len() + 2;
    }
}

/// Segment payload after the two length bytes.
fn segment(data: &[u8], pos: usize) -> Result<&[u8], JpegError> {
    if pos + 2 > data.len() {
        return Err(JpegError::Truncated);
    }
    let len = usize::from(u16::from_be_bytes([data[pos], data[pos + 1]]));
    if len < 2 || pos + len > data.len() {
        return Err(JpegError::Truncated);
    }
    Ok(&data[pos + 2..pos + len])
}

fn read_tables<'a>(mut segment: &'a [u8], tables: &mut [Option<&'a [u8]>; 4]) -> Result<(), JpegError> {
    while !segment.is_empty() {
        let pq_tq = segment[0];
        if pq_tq >> 4 != 0 {
            return Err(JpegError::QuantizationPrecision);
        }
        if segment.len() < 65 {
            return Err(JpegError::Truncated);
        }
        tables[usize::from(pq_tq & 0x03)] = Some(&segment[1..65]);
        segment = &segment[65..];
    }
    Ok(())
}

fn read_frame_header(segment: &[u8]) -> Result<(u16, u16, u8), JpegError> {
    if segment.len() < 6 {
        return Err(JpegError::Truncated);
    }
    let height = u16::from_be_bytes([segment[1], segment[2]]);
    let width = u16::from_be_bytes([segment[3], segment[4]]);
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(JpegError::TooLarge { width, height });
    }

    let components = usize::from(segment[5]);
    if components != 3 || segment.len() < 6 + components * 3 {
        return Err(JpegError::UnsupportedSampling(segment[5]));
    }
    let kind = match segment[7] {
        0x21 => 0,
        0x22 => 1,
        other => return Err(JpegError::UnsupportedSampling(other)),
    };
    for chroma in [10, 13] {
        if segment[chroma] != 0x11 {
            return Err(JpegError::UnsupportedSampling(segment[chroma]));
        }
    }
    Ok((width, height, kind))
}

fn collect_tables<'a>(tables: &[Option<&'a [u8]>; 4]) -> Result<Vec<&'a [u8]>, JpegError> {
    let luma = tables[0].or(tables[1]).ok_or(JpegError::MissingTables)?;
    let chroma = tables[1].unwrap_or(luma);
    Ok(vec![luma, chroma])
}

/// End of the entropy-coded data: the last EOI marker, or the end of input.
fn find_eoi(data: &[u8], from: usize) -> usize {
    if from >= data.len() {
        return from;
    }
    data[from..]
        .windows(2)
        .rposition(|w| w == [0xFF, EOI])
        .map(|i| from + i)
        .unwrap_or(data.len())
}

#[cfg(test)]
pub(crate) mod testing {
    /// A minimal baseline JPEG with `scan_len` bytes of scan data.
    pub fn sample_jpeg(width: u16, height: u16, sampling: u8, scan_len: usize) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, b'J', b'F']);
        jpeg.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x84]);
        jpeg.push(0x00);
        jpeg.extend((0..64).map(|i| i as u8 + 1));
        jpeg.push(0x01);
        jpeg.extend((0..64).map(|i| i as u8 + 100));
        jpeg.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        jpeg.extend_from_slice(&height.to_be_bytes());
        jpeg.extend_from_slice(&width.to_be_bytes());
        jpeg.extend_from_slice(&[0x03, 0x01, sampling, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
        jpeg.extend_from_slice(&[
            0xFF, 0xDA, 0x00, 0x0C, 0x03, 0x01, 0x00, 0x02, 0x11, 0x03, 0x11, 0x00, 0x3F, 0x00,
        ]);
        jpeg.extend((0..scan_len).map(|i| (i % 200) as u8));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }
}

#[cfg(test)]
mod tests {
    use super::testing::sample_jpeg;
    use super::*;

    #[test]
    fn test_parse_422() {
        let data = sample_jpeg(640, 480, 0x21, 1000);
        let frame = parse(&data).unwrap();
        assert_eq!((frame.width, frame.height, frame.kind), (640, 480, 0));
        assert_eq!(frame.scan.len(), 1000);
        assert_eq!(frame.qtables.len(), 2);
        assert_eq!(frame.qtables[0][0], 1);
        assert_eq!(frame.qtables[1][0], 100);
    }

    #[test]
    fn test_parse_420() {
        let data = sample_jpeg(800, 600, 0x22, 10);
        assert_eq!(parse(&data).unwrap().kind, 1);
    }

    #[test]
    fn test_rejects() {
        assert_eq!(parse(b"not a jpeg"), Err(JpegError::MissingSoi));
        assert_eq!(
            parse(&sample_jpeg(2048, 480, 0x21, 10)),
            Err(JpegError::TooLarge {
                width: 2048,
                height: 480
            })
        );
        assert_eq!(
            parse(&sample_jpeg(640, 480, 0x11, 10)),
            Err(JpegError::UnsupportedSampling(0x11))
        );

        let mut progressive = sample_jpeg(640, 480, 0x21, 10);
        let sof = progressive.windows(2).position(|w| w == [0xFF, 0xC0]).unwrap();
        progressive[sof + 1] = 0xC2;
        assert_eq!(parse(&progressive), Err(JpegError::Progressive));
    }

    #[test]
    fn test_rejects_restart_interval() {
        let mut data = sample_jpeg(640, 480, 0x21, 10);
        let sof = data.windows(2).position(|w| w == [0xFF, 0xC0]).unwrap();
        data.splice(sof..sof, [0xFF, 0xDD, 0x00, 0x04, 0x00, 0x08]);
        assert_eq!(parse(&data), Err(JpegError::RestartInterval));

        // A zero interval disables restarts.
        let mut data = sample_jpeg(640, 480, 0x21, 10);
        data.splice(sof..sof, [0xFF, 0xDD, 0x00, 0x04, 0x00, 0x00]);
        assert!(parse(&data).is_ok());
    }

    #[test]
    fn test_truncated() {
        let data = sample_jpeg(640, 480, 0x21, 10);
        assert_eq!(parse(&data[..50]), Err(JpegError::Truncated));
    }
}
