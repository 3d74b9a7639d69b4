use espfw_core::{CameraError, Frame, FrameSource};
use espfw_rtsp::rtp::RtpHeader;
use espfw_rtsp::{RtspServer, DEFAULT_FRAME_PERIOD};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

const SCAN_LEN: usize = 3000;
const LARGE_SCAN_LEN: usize = 400 * 1024;

#[derive(Clone)]
struct StillCamera {
    scan_len: usize,
}

impl FrameSource for StillCamera {
    fn is_ready(&self) -> bool {
        true
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        Ok(Frame {
            data: still_jpeg(self.scan_len),
            width: 16,
            height: 16,
        })
    }
}

fn still_jpeg(scan_len: usize) -> Vec<u8> {
    let mut jpeg = vec![0xFF, 0xD8];
    for id in 0..2u8 {
        jpeg.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, id]);
        jpeg.extend(std::iter::repeat(id + 1).take(64));
    }
    jpeg.extend_from_slice(&[
        0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00, 0x10, 0x00, 0x10, 0x03, 0x01, 0x21, 0x00, 0x02, 0x11,
        0x01, 0x03, 0x11, 0x01,
    ]);
    jpeg.extend_from_slice(&[
        0xFF, 0xDA, 0x00, 0x0C, 0x03, 0x01, 0x00, 0x02, 0x11, 0x03, 0x11, 0x00, 0x3F, 0x00,
    ]);
    jpeg.extend(std::iter::repeat(0x12).take(scan_len));
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
    cseq: u32,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        Self {
            stream,
            buffer: Vec::new(),
            cseq: 0,
        }
    }

    fn fill(&mut self, deadline: Instant) {
        let mut chunk = [0u8; 4096];
        assert!(Instant::now() < deadline, "timed out waiting for server");
        if let Ok(n) = self.stream.read(&mut chunk) {
            assert!(n > 0, "server closed connection");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn request(&mut self, method: &str, uri: &str, headers: &[&str]) -> String {
        self.cseq += 1;
        let mut req = format!("{method} {uri} RTSP/1.0\r\nCSeq: {}\r\n", self.cseq);
        for header in headers {
            req.push_str(header);
            req.push_str("\r\n");
        }
        req.push_str("\r\n");
        self.stream.write_all(req.as_bytes()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            // Skip interleaved packets that arrive ahead of the reply.
            while self.buffer.first() == Some(&b'$') && self.buffer.len() >= 4 {
                let len = 4 + u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
                if self.buffer.len() < len {
                    break;
                }
                self.buffer.drain(..len);
            }
            if let Ok(Some(len)) = espfw_rtsp::request::request_len(&self.buffer) {
                let reply: Vec<u8> = self.buffer.drain(..len).collect();
                return String::from_utf8(reply).unwrap();
            }
            self.fill(deadline);
        }
    }

    fn rtp_packet(&mut self) -> (u8, Vec<u8>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if self.buffer.len() >= 4 {
                assert_eq!(self.buffer[0], b'$');
                let len = 4 + u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
                if self.buffer.len() >= len {
                    let packet: Vec<u8> = self.buffer.drain(..len).collect();
                    return (packet[1], packet[4..].to_vec());
                }
            }
            self.fill(deadline);
        }
    }
}

fn header<'a>(reply: &'a str, name: &str) -> Option<&'a str> {
    reply
        .split("\r\n")
        .filter_map(|l| l.split_once(':'))
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim())
}

#[test]
fn test_stream_session() {
    let camera = StillCamera { scan_len: SCAN_LEN };
    let handle = RtspServer::spawn(0, camera, DEFAULT_FRAME_PERIOD).unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], handle.local_addr().port()));
    let url = format!("rtsp://127.0.0.1:{}/mjpeg/1", addr.port());

    let mut client = Client::connect(addr);

    let reply = client.request("OPTIONS", &url, &[]);
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");
    assert_eq!(header(&reply, "CSeq"), Some("1"));
    assert!(header(&reply, "Public").unwrap().contains("DESCRIBE"));

    let reply = client.request("DESCRIBE", &url, &["Accept: application/sdp"]);
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");
    assert!(reply.contains("m=video 0 RTP/AVP 26\r\n"));
    assert_eq!(header(&reply, "Content-Base"), Some(format!("{url}/").as_str()));

    let other = format!("rtsp://127.0.0.1:{}/other", addr.port());
    let reply = client.request("DESCRIBE", &other, &[]);
    assert!(reply.starts_with("RTSP/1.0 404"), "{reply}");

    let reply = client.request("GET_PARAMETER", &url, &[]);
    assert!(reply.starts_with("RTSP/1.0 501"), "{reply}");

    let reply = client.request(
        "SETUP",
        &format!("{url}/track1"),
        &["Transport: RTP/AVP/TCP;unicast;interleaved=0-1"],
    );
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");
    assert_eq!(
        header(&reply, "Transport"),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );
    let session = header(&reply, "Session")
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let session_header = format!("Session: {session}");
    let reply = client.request("PLAY", &url, &[&session_header]);
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");

    // Collect one complete frame, starting at a fragment with offset 0.
    let mut scan = Vec::new();
    let mut fragments = 0;
    let mut last_seq: Option<u16> = None;
    loop {
        let (channel, packet) = client.rtp_packet();
        assert_eq!(channel, 0);
        let rtp = RtpHeader::parse(&packet).unwrap();
        assert_eq!(rtp.payload_type, 26);
        if let Some(prev) = last_seq {
            assert_eq!(rtp.sequence, prev.wrapping_add(1));
        }
        last_seq = Some(rtp.sequence);

        let payload = &packet[12..];
        let offset = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]) as usize;
        if offset == 0 {
            scan.clear();
            fragments = 0;
            assert_eq!(&payload[4..8], &[0, 255, 2, 2]);
            scan.extend_from_slice(&payload[8 + 4 + 128..]);
        } else {
            assert_eq!(offset, scan.len());
            scan.extend_from_slice(&payload[8..]);
        }
        fragments += 1;
        if rtp.marker && scan.len() == SCAN_LEN {
            break;
        }
    }
    assert_eq!(fragments, 3);
    assert!(scan.iter().all(|&b| b == 0x12));

    let reply = client.request("TEARDOWN", &url, &[&session_header]);
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");
    drop(client);

    // The task goes back to accepting.
    let mut second = Client::connect(addr);
    let reply = second.request("OPTIONS", &url, &[]);
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");

    handle.stop();
    wait_finished(&handle);
    handle.join().unwrap();
}

fn wait_finished(handle: &espfw_rtsp::RtspHandle) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "RTSP task did not stop");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_stop_with_stalled_client() {
    let camera = StillCamera {
        scan_len: LARGE_SCAN_LEN,
    };
    let handle = RtspServer::spawn(0, camera, DEFAULT_FRAME_PERIOD).unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], handle.local_addr().port()));
    let url = format!("rtsp://127.0.0.1:{}/mjpeg/1", addr.port());

    let mut client = Client::connect(addr);
    let reply = client.request(
        "SETUP",
        &format!("{url}/track1"),
        &["Transport: RTP/AVP/TCP;unicast;interleaved=0-1"],
    );
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");
    let session = header(&reply, "Session")
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    let reply = client.request("PLAY", &url, &[&format!("Session: {session}")]);
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");

    // The client never reads again, so the socket buffers fill up.
    std::thread::sleep(Duration::from_secs(2));
    handle.stop();
    wait_finished(&handle);
    handle.join().unwrap();
    drop(client);
}

#[test]
fn test_hostile_setup_keeps_task_alive() {
    let camera = StillCamera { scan_len: SCAN_LEN };
    let handle = RtspServer::spawn(0, camera, DEFAULT_FRAME_PERIOD).unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], handle.local_addr().port()));
    let url = format!("rtsp://127.0.0.1:{}/mjpeg/1", addr.port());

    let mut client = Client::connect(addr);
    let reply = client.request(
        "SETUP",
        &format!("{url}/track1"),
        &["Transport: RTP/AVP/TCP;interleaved=255"],
    );
    assert!(reply.starts_with("RTSP/1.0 461"), "{reply}");
    let reply = client.request("OPTIONS", &url, &["Content-Length: 18446744073709551615"]);
    assert!(reply.starts_with("RTSP/1.0 400"), "{reply}");
    drop(client);

    // The task survives and serves the next client.
    let mut second = Client::connect(addr);
    let reply = second.request("OPTIONS", &url, &[]);
    assert!(reply.starts_with("RTSP/1.0 200 OK"), "{reply}");
    assert!(!handle.is_finished());

    handle.stop();
    wait_finished(&handle);
    handle.join().unwrap();
}
