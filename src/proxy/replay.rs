//! Request body recording for retransmission.

use std::convert::Infallible;
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::{Body, Bytes, HttpBody};
use futures_util::stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingStatus {
    InProgress,
    Complete,
    Abandoned,
}

#[derive(Debug)]
struct Recording {
    chunks: Vec<Bytes>,
    size: usize,
    status: RecordingStatus,
}

/// Keeps the chunks of a body as they stream past, up to `limit` bytes.
///
/// Chunks are forwarded unchanged and in order; the recording only holds
/// extra references to them. Past the limit, or if the source fails, the
/// recording is abandoned and the body can no longer be replayed.
#[derive(Debug)]
pub struct BodyRecorder {
    limit: usize,
    recording: Mutex<Recording>,
}

impl BodyRecorder {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            recording: Mutex::new(Recording {
                chunks: Vec::new(),
                size: 0,
                status: RecordingStatus::InProgress,
            }),
        })
    }

    /// Wrap `body` so every chunk read from it is also recorded.
    ///
    /// The recording completes as soon as the source reports its end or has
    /// yielded its declared length. A client that stops reading at
    /// `Content-Length` never polls for the end of the stream.
    pub fn tee(self: &Arc<Self>, body: Body) -> Body {
        let recorder = Arc::clone(self);
        let declared = body.size_hint().exact();
        if body.is_end_stream() {
            recorder.finish();
        }

        let chunks = stream::unfold(
            (body, recorder, 0u64),
            move |(mut body, recorder, mut read)| async move {
                loop {
                    match poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await {
                        Some(Ok(frame)) => {
                            // Trailers are not replayed.
                            let Ok(chunk) = frame.into_data() else {
                                continue;
                            };
                            read += chunk.len() as u64;
                            recorder.record(&chunk);
                            if body.is_end_stream() || declared == Some(read) {
                                recorder.finish();
                            }
                            return Some((Ok(chunk), (body, recorder, read)));
                        }
                        Some(Err(e)) => {
                            recorder.abandon();
                            return Some((Err(e), (body, recorder, read)));
                        }
                        None => {
                            recorder.finish();
                            return None;
                        }
                    }
                }
            },
        );
        Body::from_stream(chunks)
    }

    /// True once the source body has been read to its end within the limit.
    pub fn is_complete(&self) -> bool {
        self.lock().status == RecordingStatus::Complete
    }

    /// A fresh body with the recorded chunks, if the recording is complete.
    pub fn replay(&self) -> Option<Body> {
        let recording = self.lock();
        if recording.status != RecordingStatus::Complete {
            return None;
        }
        if recording.chunks.is_empty() {
            return Some(Body::empty());
        }
        let chunks = recording.chunks.clone();
        Some(Body::from_stream(stream::iter(
            chunks.into_iter().map(Ok::<_, Infallible>),
        )))
    }

    fn record(&self, chunk: &Bytes) {
        let mut recording = self.lock();
        if recording.status != RecordingStatus::InProgress {
            return;
        }
        recording.size += chunk.len();
        if recording.size > self.limit {
            tracing::debug!(limit = self.limit, "Request body exceeds replay limit");
            recording.chunks.clear();
            recording.status = RecordingStatus::Abandoned;
        } else {
            recording.chunks.push(chunk.clone());
        }
    }

    fn finish(&self) {
        let mut recording = self.lock();
        if recording.status == RecordingStatus::InProgress {
            recording.status = RecordingStatus::Complete;
        }
    }

    fn abandon(&self) {
        let mut recording = self.lock();
        recording.chunks.clear();
        recording.status = RecordingStatus::Abandoned;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
