//! One connected RTSP client.

use crate::jpeg;
use crate::request::{request_len, Method, Request, TransportSpec};
use crate::response::{Response, PUBLIC_METHODS};
use crate::rtp::JpegPacketizer;
use crate::{sdp, STREAM_PATH};
use espfw_core::FrameSource;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read poll interval on the client socket.
const POLL_TIMEOUT: Duration = Duration::from_millis(1);
/// A client that takes longer than this to accept a write is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_millis(250);

enum Delivery {
    Interleaved { channel: u8 },
    Udp { socket: UdpSocket, peer: SocketAddr },
}

/// A single client: its control connection, transport and play state.
pub struct RtspSession<C> {
    stream: TcpStream,
    camera: C,
    id: String,
    version: u64,
    packetizer: JpegPacketizer,
    delivery: Option<Delivery>,
    buffer: Vec<u8>,
    playing: bool,
    stopped: bool,
}

impl<C: FrameSource> RtspSession<C> {
    pub fn new(stream: TcpStream, camera: C) -> std::io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        stream.set_nodelay(true)?;

        let uuid = uuid::Uuid::new_v4();
        let bits = uuid.as_u128();
        let id = uuid.simple().to_string()[..16].to_uppercase();
        Ok(Self {
            stream,
            camera,
            id,
            version: (bits >> 64) as u64 & 0x7FFF_FFFF_FFFF_FFFF,
            packetizer: JpegPacketizer::new(bits as u32),
            delivery: None,
            buffer: Vec::new(),
            playing: false,
            stopped: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Read what the client sent and answer every complete request.
    pub fn handle_requests(&mut self) {
        if self.stopped {
            return;
        }

        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("RTSP client disconnected");
                    self.stopped = true;
                    return;
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("RTSP read failed: {}", e);
                    self.stopped = true;
                    return;
                }
            }
        }

        while !self.stopped {
            // Interleaved data from the client, usually RTCP reports.
            if self.buffer.first() == Some(&b'$') {
                if self.buffer.len() < 4 {
                    break;
                }
                let len = 4 + usize::from(u16::from_be_bytes([self.buffer[2], self.buffer[3]]));
                if self.buffer.len() < len {
                    break;
                }
                self.buffer.drain(..len);
                continue;
            }

            let len = match request_len(&self.buffer) {
                Ok(Some(len)) => len,
                Ok(None) => break,
                Err(e) => {
                    warn!("{}, closing", e);
                    self.buffer.clear();
                    self.send(&Response::bad_request(None).to_bytes());
                    self.playing = false;
                    self.stopped = true;
                    break;
                }
            };
            let raw: Vec<u8> = self.buffer.drain(..len).collect();
            let response = match std::str::from_utf8(&raw)
                .map_err(|e| crate::RtspError::BadRequest(e.to_string()))
                .and_then(Request::parse)
            {
                Ok(request) => self.answer(&request),
                Err(e) => {
                    warn!("{}", e);
                    Response::bad_request(None)
                }
            };
            self.send(&response.to_bytes());
        }
    }

    fn answer(&mut self, request: &Request) -> Response {
        let cseq = request.cseq();
        debug!("RTSP {} {}", request.method, request.uri);

        if matches!(
            request.method,
            Method::Play | Method::Pause | Method::Teardown
        ) {
            if let Some(session) = request.session() {
                if session != self.id {
                    return Response::session_not_found(cseq);
                }
            }
        }

        match &request.method {
            Method::Options => Response::ok(cseq).header("Public", PUBLIC_METHODS),
            Method::Describe => {
                if !is_stream_path(request.path()) {
                    return Response::not_found(cseq);
                }
                let local = self.local_ip();
                let base = format!("{}/", request.uri.trim_end_matches('/'));
                Response::ok(cseq)
                    .header("Content-Base", base)
                    .body("application/sdp", sdp::describe(self.version, &local))
            }
            Method::Setup => self.setup(request),
            Method::Play => {
                if self.delivery.is_none() {
                    return Response::invalid_state(cseq);
                }
                self.playing = true;
                info!("RTSP session {} playing", self.id);
                Response::ok(cseq)
                    .header("Session", self.id.clone())
                    .header("Range", "npt=0.000-")
            }
            Method::Pause => {
                self.playing = false;
                Response::ok(cseq).header("Session", self.id.clone())
            }
            Method::Teardown => {
                self.playing = false;
                self.stopped = true;
                Response::ok(cseq).header("Session", self.id.clone())
            }
            Method::Other(_) => Response::not_implemented(cseq),
        }
    }

    fn setup(&mut self, request: &Request) -> Response {
        let cseq = request.cseq();
        if !is_stream_path(request.path()) {
            return Response::not_found(cseq);
        }
        let Some(spec) = request.transport() else {
            return Response::unsupported_transport(cseq);
        };

        let transport = match spec {
            TransportSpec::Tcp {
                rtp_channel,
                rtcp_channel,
            } => {
                self.delivery = Some(Delivery::Interleaved {
                    channel: rtp_channel,
                });
                format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}")
            }
            TransportSpec::Udp { rtp_port, rtcp_port } => {
                let peer = match self.stream.peer_addr() {
                    Ok(addr) => SocketAddr::new(addr.ip(), rtp_port),
                    Err(e) => {
                        warn!("RTSP peer address unavailable: {}", e);
                        return Response::unsupported_transport(cseq);
                    }
                };
                let socket = match UdpSocket::bind((self.local_ip().as_str(), 0)) {
                    Ok(socket) => socket,
                    Err(e) => {
                        warn!("RTP socket bind failed: {}", e);
                        return Response::unsupported_transport(cseq);
                    }
                };
                let server_port = socket.local_addr().map(|a| a.port()).unwrap_or(0);
                self.delivery = Some(Delivery::Udp { socket, peer });
                format!(
                    "RTP/AVP;unicast;client_port={rtp_port}-{rtcp_port};server_port={server_port}-{}",
                    server_port.wrapping_add(1)
                )
            }
        };

        Response::ok(cseq)
            .header("Transport", transport)
            .header("Session", format!("{};timeout=60", self.id))
    }

    /// Capture a frame and send it while playing.
    pub fn broadcast_current_frame(&mut self, now_ms: u32) {
        if !self.playing || self.stopped {
            return;
        }
        if !self.camera.is_ready() {
            return;
        }

        let frame = match self.camera.capture() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        let parsed = match jpeg::parse(&frame.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping frame: {}", e);
                return;
            }
        };

        let packets = self.packetizer.packetize(&parsed, now_ms);
        let channel = match &self.delivery {
            Some(Delivery::Interleaved { channel }) => *channel,
            Some(Delivery::Udp { socket, peer }) => {
                for packet in &packets {
                    if let Err(e) = socket.send_to(packet, peer) {
                        warn!("RTP send failed: {}", e);
                        return;
                    }
                }
                return;
            }
            None => return,
        };

        for packet in packets {
            let mut framed = Vec::with_capacity(packet.len() + 4);
            framed.push(b'$');
            framed.push(channel);
            framed.extend_from_slice(&(packet.len() as u16).to_be_bytes());
            framed.extend_from_slice(&packet);
            if !self.send(&framed) {
                return;
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> bool {
        match self.stream.write_all(data) {
            Ok(()) => true,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                warn!("RTSP client stopped reading, dropping it");
                self.playing = false;
                self.stopped = true;
                false
            }
            Err(e) => {
                warn!("RTSP write failed: {}", e);
                self.playing = false;
                self.stopped = true;
                false
            }
        }
    }

    fn local_ip(&self) -> String {
        self.stream
            .local_addr()
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|_| "0.0.0.0".to_string())
    }
}

/// `/mjpeg/1` itself or a track below it.
fn is_stream_path(path: &str) -> bool {
    path.strip_prefix(STREAM_PATH)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
