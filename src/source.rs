//! Uniform chunk sequence over the different shapes a response body can come in
//!
//! Whatever produced the bytes, [`ByteSource::into_chunks`] hands back a single
//! [`ChunkStream`]: finite, consumed once, in order. A new request is needed
//! for a new sequence.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::TryStreamExt;
use http_body_util::BodyDataStream;
use tokio::{io::AsyncRead, sync::mpsc};
use tokio_util::io::ReaderStream;

use crate::{
    errors::{Error, Result},
    utf8_stream::Utf8Stream,
};

/// Boxed stream of raw body chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Stream of UTF-8 text chunks, ready for the [parser][crate::parser]
pub type TextStream = Utf8Stream<ChunkStream>;

/// The producer side of a [`ByteSource::Channel`]
pub type ChunkSender = mpsc::Sender<Result<Bytes>>;

/// Where the bytes of an event stream come from. The variant is picked once when the stream is
/// opened and erased by [`ByteSource::into_chunks`].
pub enum ByteSource {
    /// Pull-based reader
    Reader(Pin<Box<dyn AsyncRead + Send>>),
    /// Push-based asynchronous sequence
    Stream(ChunkStream),
    /// Event-driven producer feeding a channel
    Channel(mpsc::Receiver<Result<Bytes>>),
    /// Body of an HTTP response
    Response(reqwest::Response),
}

impl core::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self {
            ByteSource::Reader(_) => "Reader",
            ByteSource::Stream(_) => "Stream",
            ByteSource::Channel(_) => "Channel",
            ByteSource::Response(_) => "Response",
        };
        f.debug_tuple("ByteSource").field(&kind).finish()
    }
}

impl ByteSource {
    pub fn reader(reader: impl AsyncRead + Send + 'static) -> Self {
        Self::Reader(Box::pin(reader))
    }

    pub fn stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = core::result::Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<Error> + 'static,
    {
        Self::Stream(Box::pin(
            stream
                .map_ok(Into::<Bytes>::into)
                .map_err(Into::<Error>::into),
        ))
    }

    /// Creates a channel-backed source; whatever is pushed into the returned sender comes out of
    /// the stream, which ends once every sender is dropped
    pub fn channel(capacity: usize) -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::Channel(rx))
    }

    /// Erases the source into a [`ChunkStream`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyBody`] when the response declares a zero-length body, an event
    /// stream that can never yield a frame.
    pub fn into_chunks(self) -> Result<ChunkStream> {
        match self {
            ByteSource::Reader(reader) => {
                Ok(Box::pin(ReaderStream::new(reader).map_err(Error::Io)))
            }
            ByteSource::Stream(stream) => Ok(stream),
            ByteSource::Channel(rx) => Ok(Box::pin(ChannelStream { rx })),
            ByteSource::Response(response) => {
                if response.content_length() == Some(0) {
                    return Err(Error::EmptyBody);
                }
                Ok(Box::pin(
                    BodyDataStream::new(reqwest::Body::from(response)).map_err(Error::Transport),
                ))
            }
        }
    }

    /// [`into_chunks`][Self::into_chunks] followed by UTF-8 decoding
    pub fn into_text(self) -> Result<TextStream> {
        self.into_chunks().map(Utf8Stream::new)
    }
}

impl From<reqwest::Response> for ByteSource {
    fn from(response: reqwest::Response) -> Self {
        Self::Response(response)
    }
}

struct ChannelStream {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl Stream for ChannelStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.rx.poll_recv(cx)
    }
}
