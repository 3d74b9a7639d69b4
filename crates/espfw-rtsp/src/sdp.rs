//! Session description for the MJPEG stream.

use crate::rtp::{CLOCK_RATE, PAYLOAD_TYPE};

/// Control attribute of the single video track.
pub const TRACK_CONTROL: &str = "track1";

/// SDP body for a DESCRIBE reply.
pub fn describe(session_version: u64, server_ip: &str) -> String {
    format!(
        "v=0\r\n\
         o=- {session_version} 1 IN IP4 {server_ip}\r\n\
         s=espfw MJPEG stream\r\n\
         c=IN IP4 0.0.0.0\r\n\
         t=0 0\r\n\
         a=control:*\r\n\
         m=video 0 RTP/AVP {PAYLOAD_TYPE}\r\n\
         a=rtpmap:{PAYLOAD_TYPE} JPEG/{CLOCK_RATE}\r\n\
         a=control:{TRACK_CONTROL}\r\n"
    )
}
