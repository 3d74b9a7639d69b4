//! The RTSP streaming task.

use crate::error::RtspError;
use crate::session::RtspSession;
use espfw_core::FrameSource;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Time between frames pushed to a playing client.
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(50);

const LOOP_SLEEP: Duration = Duration::from_millis(10);
const ACCEPT_PAUSE: Duration = Duration::from_millis(100);

/// Decides when the next frame is due on a wrapping millisecond clock.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period_ms: u32,
    last_ms: u32,
}

impl FramePacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period_ms: u32::try_from(period.as_millis()).unwrap_or(u32::MAX),
            last_ms: 0,
        }
    }

    /// Whether a frame is due at `now_ms`. A clock that went backwards
    /// counts as due so the stream never stalls after a rollover.
    pub fn due(&mut self, now_ms: u32) -> bool {
        if now_ms < self.last_ms || now_ms.wrapping_sub(self.last_ms) > self.period_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }
}

/// Entry point for the streaming task.
pub struct RtspServer;

impl RtspServer {
    /// Bind `port` and start serving frames from `camera` on a new thread
    /// with the platform's default stack.
    pub fn spawn<C>(port: u16, camera: C, frame_period: Duration) -> Result<RtspHandle, RtspError>
    where
        C: FrameSource + Clone + 'static,
    {
        Self::spawn_with_stack(port, camera, frame_period, None)
    }

    /// Like [`RtspServer::spawn`], with an explicit stack size for targets
    /// whose default thread stack is too small.
    pub fn spawn_with_stack<C>(
        port: u16,
        camera: C,
        frame_period: Duration,
        stack_size: Option<usize>,
    ) -> Result<RtspHandle, RtspError>
    where
        C: FrameSource + Clone + 'static,
    {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let mut builder = thread::Builder::new().name("rtsp".into());
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }
        let thread = builder
            .spawn({
                let stop = Arc::clone(&stop);
                move || serve(listener, camera, frame_period, stop)
            })
            .map_err(RtspError::Spawn)?;

        info!("RTSP task up and running");
        Ok(RtspHandle {
            stop,
            thread: Some(thread),
            local_addr,
        })
    }
}

fn serve<C>(listener: TcpListener, camera: C, frame_period: Duration, stop: Arc<AtomicBool>)
where
    C: FrameSource + Clone,
{
    let start = Instant::now();
    let mut pacer = FramePacer::new(frame_period);
    let mut session: Option<RtspSession<C>> = None;

    loop {
        if let Some(client) = session.as_mut() {
            client.handle_requests();

            let now_ms = start.elapsed().as_millis() as u32;
            if pacer.due(now_ms) {
                client.broadcast_current_frame(now_ms);
            }

            if client.is_stopped() {
                info!("RTSP client closed connection");
                session = None;
            }
        } else {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("RTSP client started connection");
                    match RtspSession::new(stream, camera.clone()) {
                        Ok(client) => {
                            tracing::debug!("RTSP session {} for {}", client.session_id(), peer);
                            session = Some(client);
                        }
                        Err(e) => warn!("Failed to set up RTSP session: {}", e),
                    }
                    thread::sleep(ACCEPT_PAUSE);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => warn!("RTSP accept failed: {}", e),
            }
        }

        if stop.load(Ordering::Acquire) {
            if session.take().is_some() {
                info!("Shut down RTSP server requested.");
            }
            return;
        }

        thread::sleep(LOOP_SLEEP);
    }
}

/// Control handle for a running streaming task.
pub struct RtspHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl RtspHandle {
    /// Ask the task to exit after its current loop step.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the task to exit.
    pub fn join(mut self) -> Result<(), RtspError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| RtspError::TaskPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for RtspHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
