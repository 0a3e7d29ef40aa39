//! Exclusive, sequential call channel over one connection.
//!
//! One call is outstanding at a time. Replies are read in issuance order,
//! one newline-delimited frame per reply.
//!
//! ```text
//!   RpcChannel ──call()──────────▶ Value
//!              ──call_streaming()─▶ ReplyStream<'_> (borrows the channel)
//!              ──upgrade(self)────▶ (Value, RawConnection)  (consumes it)
//! ```
//!
//! Any transport failure, timeout or protocol violation poisons the channel:
//! the position in the byte stream is no longer known, so every later call
//! fails with [`Error::ChannelPoisoned`] until the owner reconnects. An
//! application-level error reply leaves the channel usable.

use super::protocol::{Call, Reply};
use crate::constants::MAX_FRAME_LEN;
use crate::error::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    ReadBuf,
};
use tracing::{debug, warn};

/// Byte stream a channel can run over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

type Stream = BufReader<Box<dyn Connection>>;

/// Protocol channel owning one connection.
pub struct RpcChannel {
    stream: Stream,
    timeout: Option<Duration>,
    poisoned: bool,
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("timeout", &self.timeout)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl RpcChannel {
    /// Wraps a connected byte stream. No deadline is applied by default.
    pub fn new(connection: impl Connection + 'static) -> Self {
        Self {
            stream: BufReader::new(Box::new(connection)),
            timeout: None,
            poisoned: false,
        }
    }

    /// Sets the per-reply deadline. `None` waits indefinitely.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-reply deadline.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns true once the channel is unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Issues a call and waits for its single reply.
    ///
    /// # Errors
    ///
    /// Transport and protocol failures poison the channel. An error reply is
    /// returned as [`Error::Remote`].
    pub async fn call(&mut self, method: &str, parameters: Value) -> Result<Value> {
        let call = Call::new(method, parameters);
        let exchanged = self.exchange(&call).await;
        let reply = self.guard(exchanged)?;
        if reply.continues {
            self.poisoned = true;
            return Err(Error::Protocol(format!(
                "'{method}' returned a continued reply to a single call"
            )));
        }
        reply.into_result()
    }

    /// Issues a call that accepts a stream of replies.
    ///
    /// The returned stream borrows the channel until dropped.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be written.
    pub async fn call_streaming(
        &mut self,
        method: &str,
        parameters: Value,
    ) -> Result<ReplyStream<'_>> {
        self.call_replies(Call::streaming(method, parameters)).await
    }

    /// Issues any non-upgrading call and reads its replies as a stream.
    ///
    /// A call without `more` is answered by a single terminal reply, so the
    /// stream yields nothing and [`ReplyStream::terminal`] holds the reply.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be written or asks for an upgrade.
    pub async fn call_replies(&mut self, call: Call) -> Result<ReplyStream<'_>> {
        if call.upgrade {
            return Err(Error::Protocol(format!(
                "'{}' requests an upgrade; use RpcChannel::upgrade",
                call.method
            )));
        }
        let sent = self.send(&call).await;
        self.guard(sent)?;
        Ok(ReplyStream {
            channel: self,
            method: call.method,
            finished: false,
            terminal: None,
        })
    }

    /// Issues an upgrading call; after the reply the connection is raw.
    ///
    /// Consumes the channel. There is no way back to protocol mode.
    ///
    /// # Errors
    ///
    /// Fails like [`RpcChannel::call`]; the connection is dropped on error.
    pub async fn upgrade(
        mut self,
        method: &str,
        parameters: Value,
    ) -> Result<(Value, RawConnection)> {
        let call = Call::upgrading(method, parameters);
        let reply = self.exchange(&call).await?;
        if reply.continues {
            return Err(Error::Protocol(format!(
                "'{method}' returned a continued reply to an upgrade"
            )));
        }
        let value = reply.into_result()?;
        debug!("Connection upgraded to raw mode by '{}'", method);
        Ok((value, RawConnection::new(self.stream)))
    }

    // =========================================================================
    // Framing
    // =========================================================================

    async fn exchange(&mut self, call: &Call) -> Result<Reply> {
        self.send(call).await?;
        self.read_reply(&call.method).await
    }

    async fn send(&mut self, call: &Call) -> Result<()> {
        if self.poisoned {
            return Err(Error::ChannelPoisoned);
        }
        let line = call.to_json_line()?;
        let stream = &mut self.stream;
        deadline(self.timeout, &call.method, async move {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    async fn read_reply(&mut self, method: &str) -> Result<Reply> {
        if self.poisoned {
            return Err(Error::ChannelPoisoned);
        }
        let frame = deadline(self.timeout, method, read_frame(&mut self.stream, method)).await?;
        let text = std::str::from_utf8(&frame)
            .map_err(|e| Error::Protocol(format!("reply to '{method}' is not UTF-8: {e}")))?;
        Reply::from_json(text)
    }

    /// Marks the channel poisoned on any failure other than an error reply.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && !matches!(e, Error::Remote { .. })
            && !self.poisoned
        {
            warn!("Channel poisoned: {}", e);
            self.poisoned = true;
        }
        result
    }
}

async fn deadline<T>(
    timeout: Option<Duration>,
    method: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| Error::Timeout {
                operation: method.to_string(),
                duration,
            })?,
        None => fut.await,
    }
}

async fn read_frame(stream: &mut Stream, method: &str) -> Result<Vec<u8>> {
    let mut frame = Vec::new();
    let n = stream
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_until(b'\n', &mut frame)
        .await?;
    if n == 0 {
        return Err(Error::ConnectionClosed {
            method: method.to_string(),
        });
    }
    if frame.last() != Some(&b'\n') {
        if frame.len() > MAX_FRAME_LEN {
            return Err(Error::Protocol(format!(
                "reply to '{method}' exceeds {MAX_FRAME_LEN} bytes"
            )));
        }
        return Err(Error::ConnectionClosed {
            method: method.to_string(),
        });
    }
    frame.pop();
    Ok(frame)
}

// =============================================================================
// Reply Stream
// =============================================================================

/// Lazy sequence of continued replies to one streaming call.
///
/// Yields the payload of every reply flagged `continues`. The first reply
/// without the flag ends the stream; its payload is kept as
/// [`ReplyStream::terminal`] and not yielded. Dropping an unfinished stream
/// poisons the channel.
pub struct ReplyStream<'a> {
    channel: &'a mut RpcChannel,
    method: String,
    finished: bool,
    terminal: Option<Value>,
}

impl ReplyStream<'_> {
    /// Next continued payload, or `None` once the stream has ended.
    ///
    /// # Errors
    ///
    /// An error reply ends the stream and is returned as [`Error::Remote`].
    /// Transport failures end the stream and poison the channel.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        if self.finished {
            return Ok(None);
        }
        let read = self.channel.read_reply(&self.method).await;
        let reply = match self.channel.guard(read) {
            Ok(reply) => reply,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };
        if let Some(err) = reply.error {
            self.finished = true;
            if reply.continues {
                // Further chunks may still be in flight for this call.
                warn!("Channel poisoned: '{}' sent a continued error reply", self.method);
                self.channel.poisoned = true;
            }
            return Err(err.into());
        }
        if reply.continues {
            Ok(Some(reply.parameters))
        } else {
            self.finished = true;
            self.terminal = Some(reply.parameters);
            Ok(None)
        }
    }

    /// Payload of the final, non-continued reply once the stream has ended.
    #[must_use]
    pub fn terminal(&self) -> Option<&Value> {
        self.terminal.as_ref()
    }

    /// Takes the terminal payload.
    pub fn take_terminal(&mut self) -> Option<Value> {
        self.terminal.take()
    }

    /// Returns true once no further replies will be read.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Method this stream belongs to.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Drop for ReplyStream<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Stream for '{}' dropped before its end", self.method);
            self.channel.poisoned = true;
        }
    }
}

// =============================================================================
// Raw Connection
// =============================================================================

/// Connection after an upgrade: plain bytes in both directions.
///
/// Bytes the service sent right after its reply and that were already
/// buffered are delivered first.
pub struct RawConnection {
    inner: Stream,
}

impl RawConnection {
    fn new(inner: Stream) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawConnection")
            .field("buffered", &self.inner.buffer().len())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for RawConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncBufRead for RawConnection {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().inner).consume(amt);
    }
}

impl AsyncWrite for RawConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
