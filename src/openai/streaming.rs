use super::responses::ChatCompletionChunk;
use axum::response::sse::Event;
use flume::Receiver;
use futures::{FutureExt, Stream};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, PartialEq)]
pub enum StreamingStatus {
    Uninitialized,
    Started,
    Interrupted,
    Stopped,
}

pub enum ChatResponse {
    Chunk(ChatCompletionChunk),
    Done, //finish flag
}

/// SSE body of a streaming completion. Dropping it (client gone) drops
/// `hangup`, which the generation task watches to stop consuming the engine.
pub struct Streamer {
    pub rx: Receiver<ChatResponse>,
    pub status: StreamingStatus,
    pub hangup: Option<oneshot::Sender<()>>,
}

impl Streamer {
    pub fn new(rx: Receiver<ChatResponse>, hangup: oneshot::Sender<()>) -> Self {
        Self {
            rx,
            status: StreamingStatus::Uninitialized,
            hangup: Some(hangup),
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        match self.status {
            StreamingStatus::Stopped | StreamingStatus::Interrupted => {}
            StreamingStatus::Uninitialized => debug!("Client left before the first chunk"),
            StreamingStatus::Started => debug!("Client left mid-stream"),
        }
    }
}

impl Stream for Streamer {
    type Item = Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if matches!(
            self.status,
            StreamingStatus::Stopped | StreamingStatus::Interrupted
        ) {
            return Poll::Ready(None);
        }

        let recv_result = self.rx.recv_async().poll_unpin(cx);

        match recv_result {
            Poll::Ready(Ok(resp)) => match resp {
                ChatResponse::Chunk(response) => {
                    if self.status != StreamingStatus::Started {
                        self.status = StreamingStatus::Started;
                    }
                    Poll::Ready(Some(Event::default().json_data(response)))
                }
                ChatResponse::Done => {
                    self.status = StreamingStatus::Stopped;
                    Poll::Ready(Some(Ok(Event::default().data(DONE_SENTINEL))))
                }
            },
            Poll::Ready(Err(flume::RecvError::Disconnected)) => {
                warn!("Generation task went away before [DONE] ({:?})", self.status);
                self.status = StreamingStatus::Interrupted;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
