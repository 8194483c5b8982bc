use bytes::BytesMut;
use bytes_utils::Str;

use core::pin::Pin;
use core::task::ready;
use futures_core::stream::Stream;
use futures_core::task::{Context, Poll};
use pin_project_lite::pin_project;

use crate::errors::Error;

pin_project! {
    /// Turns a stream of byte chunks into a stream of UTF-8 [`Str`]s, holding back a multi-byte
    /// sequence split across chunks until the rest of it arrives
    pub struct Utf8Stream<S> {
        #[pin]
        state: Utf8StreamState<S>,
    }
}

pin_project! {
    #[project = Utf8StreamProjection]
    enum Utf8StreamState<S> {
        Active { #[pin] stream: S, buffer: BytesMut },
        Terminated,
    }
}

impl<S> Utf8Stream<S> {
    pub fn new(stream: S) -> Self {
        let state = Utf8StreamState::Active {
            stream,
            buffer: BytesMut::new(),
        };
        Self { state }
    }
}

impl<S, B> Stream for Utf8Stream<S>
where
    S: Stream<Item = Result<B, Error>>,
    B: AsRef<[u8]>,
{
    type Item = Result<Str, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        let (stream_res, buffer) = match this.state.as_mut().project() {
            Utf8StreamProjection::Active { stream, buffer } => {
                (ready!(stream.poll_next(cx)), buffer)
            }
            Utf8StreamProjection::Terminated => return Poll::Ready(None),
        };

        match stream_res {
            Some(Ok(bytes)) => {
                buffer.extend_from_slice(bytes.as_ref());

                match str::from_utf8(buffer) {
                    Ok(_) => {
                        // Safety: we just checked the buffer is valid utf8
                        let byte_str =
                            unsafe { Str::from_inner_unchecked(buffer.split().freeze()) };
                        Poll::Ready(Some(Ok(byte_str)))
                    }
                    // a byte that can never start or continue a codepoint, waiting won't fix it
                    Err(e) if e.error_len().is_some() => {
                        this.state.set(Utf8StreamState::Terminated);
                        Poll::Ready(Some(Err(Error::Utf8(e))))
                    }
                    Err(e) => {
                        let valid_to = e.valid_up_to();
                        let valid_utf8 = buffer.split_to(valid_to).freeze();
                        // Safety: we just split off the valid section of utf8
                        let byte_str = unsafe { Str::from_inner_unchecked(valid_utf8) };
                        Poll::Ready(Some(Ok(byte_str)))
                    }
                }
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => {
                // split is O(1), this drops the borrow on the buffer so the state can change
                let buffer = buffer.split().freeze();
                this.state.set(Utf8StreamState::Terminated);

                if buffer.is_empty() {
                    Poll::Ready(None)
                } else {
                    match str::from_utf8(&buffer) {
                        Ok(_) => {
                            // Safety: we just checked the buffer is valid utf8
                            let byte_str = unsafe { Str::from_inner_unchecked(buffer) };
                            Poll::Ready(Some(Ok(byte_str)))
                        }
                        Err(e) => Poll::Ready(Some(Err(Error::Utf8(e)))),
                    }
                }
            }
        }
    }
}
