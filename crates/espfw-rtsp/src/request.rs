//! RTSP request parsing.

use crate::error::RtspError;
use std::fmt;

/// Request methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    Other(String),
}

impl Method {
    fn parse(s: &str) -> Self {
        match s {
            "OPTIONS" => Method::Options,
            "DESCRIBE" => Method::Describe,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "PAUSE" => Method::Pause,
            "TEARDOWN" => Method::Teardown,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::Other(other) => other,
        };
        f.write_str(name)
    }
}

/// Transport requested in a SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSpec {
    /// RTP interleaved on the RTSP connection.
    Tcp { rtp_channel: u8, rtcp_channel: u8 },
    /// RTP to client ports over UDP.
    Udp { rtp_port: u16, rtcp_port: u16 },
}

impl TransportSpec {
    /// Parse a `Transport` header, taking the first usable alternative.
    pub fn parse(header: &str) -> Option<Self> {
        header.split(',').find_map(Self::parse_one)
    }

    fn parse_one(spec: &str) -> Option<Self> {
        let mut parts = spec.trim().split(';');
        let profile = parts.next()?.trim();
        let params: Vec<&str> = parts.map(str::trim).collect();
        let param = |name: &str| {
            params
                .iter()
                .find_map(|p| p.strip_prefix(name).and_then(|v| v.strip_prefix('=')))
        };

        match profile {
            "RTP/AVP/TCP" => {
                let (rtp, rtcp) = match param("interleaved") {
                    Some(range) => parse_range::<u8>(range)?,
                    None => (0, 1),
                };
                Some(TransportSpec::Tcp {
                    rtp_channel: rtp,
                    rtcp_channel: rtcp,
                })
            }
            "RTP/AVP" | "RTP/AVP/UDP" => {
                let (rtp, rtcp) = parse_range::<u16>(param("client_port")?)?;
                Some(TransportSpec::Udp {
                    rtp_port: rtp,
                    rtcp_port: rtcp,
                })
            }
            _ => None,
        }
    }
}

/// Parse `a-b` or a lone `a`, which means `a-(a+1)`. Values that do not
/// fit `T` make the range unusable.
fn parse_range<T: TryFrom<u32>>(range: &str) -> Option<(T, T)> {
    let (a, b) = match range.split_once('-') {
        Some((a, b)) => (a.trim().parse::<u32>().ok()?, b.trim().parse::<u32>().ok()?),
        None => {
            let a = range.trim().parse::<u32>().ok()?;
            (a, a.checked_add(1)?)
        }
    };
    Some((T::try_from(a).ok()?, T::try_from(b).ok()?))
}

/// A parsed RTSP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Parse the head of a request (everything up to the blank line).
    pub fn parse(text: &str) -> Result<Self, RtspError> {
        let mut lines = text.split("\r\n");
        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| RtspError::BadRequest("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let (method, uri, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(u), Some(v)) => (m, u, v),
            _ => return Err(RtspError::BadRequest(request_line.to_string())),
        };
        if !version.starts_with("RTSP/") {
            return Err(RtspError::BadRequest(format!("unsupported version {version}")));
        }

        let mut headers = Vec::new();
        for line in lines.take_while(|l| !l.is_empty()) {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        Ok(Self {
            method: Method::parse(method),
            uri: uri.to_string(),
            headers,
        })
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.parse().ok())
    }

    /// Session id without parameters such as `;timeout=60`.
    pub fn session(&self) -> Option<&str> {
        self.header("Session")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    pub fn transport(&self) -> Option<TransportSpec> {
        self.header("Transport").and_then(TransportSpec::parse)
    }

    /// Path part of the URI, e.g. `/mjpeg/1` for `rtsp://host:8554/mjpeg/1`.
    pub fn path(&self) -> &str {
        let rest = match self.uri.split_once("://") {
            Some((_, rest)) => match rest.find('/') {
                Some(i) => &rest[i..],
                None => "/",
            },
            None => self.uri.as_str(),
        };
        rest.split('?').next().unwrap_or(rest)
    }
}

/// Largest request, head and body together, a client may send.
pub const MAX_REQUEST: usize = 4096;

/// Length of the first complete request in `buf`, including any body
/// announced by `Content-Length`. `Ok(None)` means more bytes are needed.
///
/// Fails once the request can no longer fit in [`MAX_REQUEST`].
pub fn request_len(buf: &[u8]) -> Result<Option<usize>, RtspError> {
    let too_large = || RtspError::RequestTooLarge { max: MAX_REQUEST };
    let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return if buf.len() > MAX_REQUEST {
            Err(too_large())
        } else {
            Ok(None)
        };
    };
    let head_end = head_end + 4;
    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|e| RtspError::BadRequest(e.to_string()))?;
    let body = match head
        .split("\r\n")
        .filter_map(|l| l.split_once(':'))
        .find(|(n, _)| n.trim().eq_ignore_ascii_case("Content-Length"))
    {
        Some((_, v)) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| RtspError::BadRequest(format!("Content-Length {}", v.trim())))?,
        None => 0,
    };
    let total = head_end
        .checked_add(body)
        .filter(|&total| total <= MAX_REQUEST)
        .ok_or_else(too_large)?;
    Ok((buf.len() >= total).then_some(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETUP: &str = "SETUP rtsp://10.0.0.5:8554/mjpeg/1/track1 RTSP/1.0\r\n\
        CSeq: 3\r\n\
        Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\
        User-Agent: test\r\n\r\n";

    #[test]
    fn test_parse_request() {
        let req = Request::parse(SETUP).unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(req.cseq(), Some(3));
        assert_eq!(req.path(), "/mjpeg/1/track1");
        assert_eq!(req.header("user-agent"), Some("test"));
        assert_eq!(
            req.transport(),
            Some(TransportSpec::Tcp {
                rtp_channel: 0,
                rtcp_channel: 1
            })
        );
    }

    #[test]
    fn test_unknown_method_and_bad_lines() {
        let req = Request::parse("GET_PARAMETER rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 9\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Other("GET_PARAMETER".into()));

        assert!(Request::parse("").is_err());
        assert!(Request::parse("OPTIONS *\r\n\r\n").is_err());
        assert!(Request::parse("OPTIONS * HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_session_header() {
        let req =
            Request::parse("PLAY rtsp://h/mjpeg/1 RTSP/1.0\r\nSession: ABCD;timeout=60\r\n\r\n")
                .unwrap();
        assert_eq!(req.session(), Some("ABCD"));
    }

    #[test]
    fn test_path_forms() {
        let parse = |uri: &str| {
            Request::parse(&format!("OPTIONS {uri} RTSP/1.0\r\n\r\n"))
                .unwrap()
                .path()
                .to_string()
        };
        assert_eq!(parse("rtsp://h:8554/mjpeg/1?x=1"), "/mjpeg/1");
        assert_eq!(parse("rtsp://h:8554"), "/");
        assert_eq!(parse("*"), "*");
    }

    #[test]
    fn test_udp_transport() {
        assert_eq!(
            TransportSpec::parse("RTP/AVP;unicast;client_port=5000-5001"),
            Some(TransportSpec::Udp {
                rtp_port: 5000,
                rtcp_port: 5001
            })
        );
        assert_eq!(
            TransportSpec::parse("RTP/SAVP;unicast;client_port=1-2, RTP/AVP/TCP;interleaved=2-3"),
            Some(TransportSpec::Tcp {
                rtp_channel: 2,
                rtcp_channel: 3
            })
        );
        assert_eq!(TransportSpec::parse("RTP/AVP;multicast"), None);
    }

    #[test]
    fn test_transport_range_limits() {
        assert_eq!(
            TransportSpec::parse("RTP/AVP/TCP;interleaved=254"),
            Some(TransportSpec::Tcp {
                rtp_channel: 254,
                rtcp_channel: 255
            })
        );
        assert_eq!(TransportSpec::parse("RTP/AVP/TCP;interleaved=255"), None);
        assert_eq!(TransportSpec::parse("RTP/AVP/TCP;interleaved=0-256"), None);
        assert_eq!(TransportSpec::parse("RTP/AVP;client_port=65535"), None);
        assert_eq!(TransportSpec::parse("RTP/AVP;client_port=4294967295"), None);
        assert_eq!(TransportSpec::parse("RTP/AVP;client_port=70000-70001"), None);
    }

    #[test]
    fn test_request_len() {
        assert_eq!(request_len(b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n").unwrap(), None);
        let full = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\nNEXT";
        assert_eq!(request_len(full).unwrap(), Some(full.len() - 4));

        let with_body = b"SET_PARAMETER * RTSP/1.0\r\nContent-Length: 4\r\n\r\nab";
        assert_eq!(request_len(with_body).unwrap(), None);
        let with_body = b"SET_PARAMETER * RTSP/1.0\r\nContent-Length: 4\r\n\r\nabcd";
        assert_eq!(request_len(with_body).unwrap(), Some(with_body.len()));
    }

    #[test]
    fn test_request_len_rejects_oversized() {
        let huge = b"OPTIONS * RTSP/1.0\r\nContent-Length: 18446744073709551615\r\n\r\n";
        assert!(matches!(
            request_len(huge),
            Err(RtspError::RequestTooLarge { max: MAX_REQUEST })
        ));

        let large = b"OPTIONS * RTSP/1.0\r\nContent-Length: 5000\r\n\r\n";
        assert!(matches!(
            request_len(large),
            Err(RtspError::RequestTooLarge { .. })
        ));

        let garbage = b"OPTIONS * RTSP/1.0\r\nContent-Length: lots\r\n\r\n";
        assert!(matches!(request_len(garbage), Err(RtspError::BadRequest(_))));

        let endless = vec![b'A'; MAX_REQUEST + 1];
        assert!(request_len(&endless).is_err());
    }
}
