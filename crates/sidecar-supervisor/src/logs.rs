//! Sidecar stdout/stderr capture.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub(crate) type SidecarLogTask = JoinHandle<()>;

/// Drain `stream` line by line into tracing events tagged with the child's
/// pid and stream name, so the child never blocks on a full pipe.
pub(crate) fn spawn_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    pid: u32,
    stream_name: &'static str,
) -> SidecarLogTask {
    spawn_buffered_reader(BufReader::new(stream), pid, stream_name)
}

/// Same as [`spawn_reader`] for a reader that already holds buffered bytes,
/// such as stdout after the readiness byte.
pub(crate) fn spawn_buffered_reader(
    mut reader: impl AsyncBufReadExt + Unpin + Send + 'static,
    pid: u32,
    stream_name: &'static str,
) -> SidecarLogTask {
    tokio::spawn(async move {
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let trimmed = text.trim_end_matches(['\r', '\n']);
                    if trimmed.is_empty() {
                        continue;
                    }
                    info!(
                        runtime = "sidecar",
                        pid,
                        stream = stream_name,
                        line = %trimmed,
                        "sidecar log line"
                    );
                }
                Err(err) => {
                    warn!(
                        runtime = "sidecar",
                        pid,
                        stream = stream_name,
                        error = %err,
                        "sidecar log stream read failed"
                    );
                    break;
                }
            }
        }

        debug!(pid, stream = stream_name, "sidecar log stream ended");
    })
}
