//! # espfw-rtsp
//!
//! Streams camera frames as MJPEG over RTSP.
//!
//! The streaming task serves one client at a time from a single thread. It
//! polls the client socket, answers RTSP requests and pushes a frame every
//! pacing period while the client is playing.
//!
//! - [`request`], [`response`] and [`sdp`]: the RTSP 1.0 text protocol
//! - [`jpeg`] and [`rtp`]: RTP/JPEG payload format (RFC 2435)
//! - [`session`]: one connected client
//! - [`server`]: the accept/poll/push loop and its control handle

pub mod error;
pub mod jpeg;
pub mod request;
pub mod response;
pub mod rtp;
pub mod sdp;
pub mod server;
pub mod session;

pub use error::RtspError;
pub use server::{FramePacer, RtspHandle, RtspServer, DEFAULT_FRAME_PERIOD};
pub use session::RtspSession;

/// Path the stream is served on.
pub const STREAM_PATH: &str = "/mjpeg/1";

/// Client URL for a device reachable at `host`.
pub fn stream_url(host: &str, port: u16) -> String {
    format!("rtsp://{host}:{port}{STREAM_PATH}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        assert_eq!(
            stream_url("192.168.0.31", 8554),
            "rtsp://192.168.0.31:8554/mjpeg/1"
        );
    }
}
