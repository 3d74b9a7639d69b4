//! RTSP responses.

use std::fmt::Write as _;

/// Methods listed in the `Public` header of OPTIONS replies.
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN";

const SERVER_NAME: &str = "espfw-rtsp";

/// An RTSP/1.0 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Option<(String, String)>,
}

impl Response {
    pub fn new(status: u16, reason: &'static str, cseq: Option<u32>) -> Self {
        let mut headers = Vec::new();
        if let Some(cseq) = cseq {
            headers.push(("CSeq".to_string(), cseq.to_string()));
        }
        headers.push(("Server".to_string(), SERVER_NAME.to_string()));
        Self {
            status,
            reason,
            headers,
            body: None,
        }
    }

    pub fn ok(cseq: Option<u32>) -> Self {
        Self::new(200, "OK", cseq)
    }

    pub fn bad_request(cseq: Option<u32>) -> Self {
        Self::new(400, "Bad Request", cseq)
    }

    pub fn not_found(cseq: Option<u32>) -> Self {
        Self::new(404, "Stream Not Found", cseq)
    }

    pub fn session_not_found(cseq: Option<u32>) -> Self {
        Self::new(454, "Session Not Found", cseq)
    }

    pub fn invalid_state(cseq: Option<u32>) -> Self {
        Self::new(455, "Method Not Valid in This State", cseq)
    }

    pub fn unsupported_transport(cseq: Option<u32>) -> Self {
        Self::new(461, "Unsupported Transport", cseq)
    }

    pub fn not_implemented(cseq: Option<u32>) -> Self {
        Self::new(501, "Not Implemented", cseq)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<String>) -> Self {
        self.body = Some((content_type.to_string(), body.into()));
        self
    }

    /// Serialize the status line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        let _ = write!(out, "RTSP/1.0 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        match &self.body {
            Some((content_type, body)) => {
                let _ = write!(
                    out,
                    "Content-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
                    content_type,
                    body.len(),
                    body
                );
            }
            None => out.push_str("\r\n"),
        }
        out.into_bytes()
    }
}
