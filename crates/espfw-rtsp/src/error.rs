use crate::jpeg::JpegError;

/// Errors raised by the RTSP task.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to start RTSP task: {0}")]
    Spawn(std::io::Error),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Request larger than {max} bytes")]
    RequestTooLarge { max: usize },
    #[error(transparent)]
    Jpeg(#[from] JpegError),
    #[error("RTSP task panicked")]
    TaskPanicked,
}
