//! MJPEG live view over `multipart/x-mixed-replace`

use std::sync::Arc;
use std::time::Duration;

use frame_source::FrameSource;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Part separator
pub const BOUNDARY: &str = "frame";

/// Stream pacing and bounds
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub fps: u32,
    pub max_duration: Duration,
    pub jpeg_quality: u8,
    /// A single part that cannot be written within this ends the stream
    pub write_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            fps: 10,
            max_duration: Duration::from_secs(300),
            jpeg_quality: 80,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    ClientGone,
    MaxDuration,
    Shutdown,
}

/// Response head; no `Content-Length`, the body runs until we close
pub fn stream_headers() -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={}\r\n\
         Connection: close\r\n\
         Cache-Control: no-cache, no-store, must-revalidate\r\n\
         Pragma: no-cache\r\n\
         Access-Control-Allow-Origin: *\r\n\r\n",
        BOUNDARY
    )
    .into_bytes()
}

/// One multipart part wrapping a JPEG
pub fn frame_chunk(jpeg: &[u8]) -> Vec<u8> {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut out = Vec::with_capacity(head.len() + jpeg.len() + 2);
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    out
}

/// Write frames until the client leaves, the time cap is hit or the
/// server shuts down. Encoding runs on the blocking pool.
///
/// Every write races the deadline, the shutdown watch and
/// `write_timeout`, so a client that stops reading cannot hold the
/// stream open.
pub async fn serve<W>(
    writer: &mut W,
    frames: Arc<dyn FrameSource>,
    settings: &StreamSettings,
    mut shutdown: watch::Receiver<bool>,
) -> StreamEnd
where
    W: AsyncWrite + Unpin,
{
    let deadline = Instant::now() + settings.max_duration;
    if !write_part(writer, &stream_headers(), settings, deadline, &mut shutdown).await {
        return StreamEnd::ClientGone;
    }

    let period = Duration::from_millis(1000 / u64::from(settings.fps.max(1)));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    let end = loop {
        if *shutdown.borrow() {
            break StreamEnd::Shutdown;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = sleep_until(deadline) => break StreamEnd::MaxDuration,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break StreamEnd::Shutdown;
                }
                continue;
            }
        }

        let Some(frame) = frames.latest_frame() else {
            continue;
        };
        let quality = settings.jpeg_quality;
        let jpeg = match tokio::task::spawn_blocking(move || frame.encode_jpeg(quality)).await {
            Ok(Ok(jpeg)) => jpeg,
            Ok(Err(e)) => {
                warn!("Frame encode failed: {}", e);
                continue;
            }
            Err(e) => {
                warn!("Encode task failed: {}", e);
                continue;
            }
        };

        if !write_part(writer, &frame_chunk(&jpeg), settings, deadline, &mut shutdown).await {
            break StreamEnd::ClientGone;
        }
        sent += 1;
    };

    info!("Stream ended after {} frames: {:?}", sent, end);
    if end != StreamEnd::ClientGone {
        let _ = timeout(settings.write_timeout, writer.shutdown()).await;
    }
    debug!("Stream writer released");
    end
}

/// Write and flush one part; false if the client is gone or stalled
async fn write_part<W>(
    writer: &mut W,
    bytes: &[u8],
    settings: &StreamSettings,
    deadline: Instant,
    shutdown: &mut watch::Receiver<bool>,
) -> bool
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    };
    tokio::select! {
        result = timeout(settings.write_timeout, write) => match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Stream write failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Stream client stalled for {:?}, dropping it", settings.write_timeout);
                false
            }
        },
        _ = sleep_until(deadline) => {
            debug!("Stream deadline reached mid-write");
            false
        }
        _ = shutdown.changed() => {
            debug!("Shutdown during stream write");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_source::TestPattern;

    #[test]
    fn test_headers() {
        let head = String::from_utf8(stream_headers()).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: multipart/x-mixed-replace; boundary=frame\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
        assert!(!head.contains("Content-Length"));
    }

    #[test]
    fn test_chunk_layout() {
        let jpeg = [0xFFu8, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
        let chunk = frame_chunk(&jpeg);
        let head = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 6\r\n\r\n";
        assert!(chunk.starts_with(head));
        assert_eq!(&chunk[head.len()..head.len() + 6], &jpeg);
        assert!(chunk.ends_with(b"\r\n"));
        assert_eq!(chunk.len(), head.len() + 6 + 2);
    }

    #[tokio::test]
    async fn test_serve_stops_at_max_duration() {
        let frames: Arc<dyn FrameSource> = Arc::new(TestPattern::new(32, 24));
        let settings = StreamSettings {
            fps: 20,
            max_duration: Duration::from_millis(250),
            jpeg_quality: 70,
            write_timeout: Duration::from_secs(1),
        };
        let (_tx, rx) = watch::channel(false);
        let mut out: Vec<u8> = Vec::new();

        let end = serve(&mut out, frames, &settings, rx).await;
        assert_eq!(end, StreamEnd::MaxDuration);

        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.matches("--frame\r\n").count() >= 1);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let frames: Arc<dyn FrameSource> = Arc::new(TestPattern::new(16, 16));
        let (tx, rx) = watch::channel(false);
        let mut out: Vec<u8> = Vec::new();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
            tx
        });
        let end = serve(&mut out, frames, &StreamSettings::default(), rx).await;
        assert_eq!(end, StreamEnd::Shutdown);
        let _ = stopper.await;
    }

    /// Client holds the connection open but never reads
    fn stalled_pipe() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
        tokio::io::duplex(64)
    }

    #[tokio::test]
    async fn test_stalled_client_released_at_max_duration() {
        let frames: Arc<dyn FrameSource> = Arc::new(TestPattern::new(64, 48));
        let settings = StreamSettings {
            max_duration: Duration::from_millis(200),
            write_timeout: Duration::from_secs(60),
            ..StreamSettings::default()
        };
        let (_tx, rx) = watch::channel(false);
        let (_client, mut server_side) = stalled_pipe();

        let end = tokio::time::timeout(
            Duration::from_secs(3),
            serve(&mut server_side, frames, &settings, rx),
        )
        .await
        .expect("stalled stream outlived its time cap");
        assert_eq!(end, StreamEnd::ClientGone);
    }

    #[tokio::test]
    async fn test_stalled_client_released_by_write_timeout() {
        let frames: Arc<dyn FrameSource> = Arc::new(TestPattern::new(64, 48));
        let settings = StreamSettings {
            max_duration: Duration::from_secs(300),
            write_timeout: Duration::from_millis(100),
            ..StreamSettings::default()
        };
        let (_tx, rx) = watch::channel(false);
        let (_client, mut server_side) = stalled_pipe();

        let end = tokio::time::timeout(
            Duration::from_secs(3),
            serve(&mut server_side, frames, &settings, rx),
        )
        .await
        .expect("stalled stream ignored the write timeout");
        assert_eq!(end, StreamEnd::ClientGone);
    }

    #[tokio::test]
    async fn test_stalled_client_released_on_shutdown() {
        let frames: Arc<dyn FrameSource> = Arc::new(TestPattern::new(64, 48));
        let settings = StreamSettings {
            max_duration: Duration::from_secs(300),
            write_timeout: Duration::from_secs(60),
            ..StreamSettings::default()
        };
        let (tx, rx) = watch::channel(false);
        let (_client, mut server_side) = stalled_pipe();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
            tx
        });
        let end = tokio::time::timeout(
            Duration::from_secs(3),
            serve(&mut server_side, frames, &settings, rx),
        )
        .await
        .expect("stalled stream ignored shutdown");
        assert_eq!(end, StreamEnd::ClientGone);
        let _ = stopper.await;
    }
}
