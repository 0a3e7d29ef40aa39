//! Raw file transfer over an upgraded channel.
//!
//! # Send
//!
//! ```text
//! Client                                   Service
//!   |  SendFile {type:"", length:N} upgrade   |
//!   |---------------------------------------->|
//!   |  reply                                  |
//!   |<----------------------------------------|
//!   |  N raw bytes                            |
//!   |---------------------------------------->|
//!   |  "<temp-name>:"                         |
//!   |<----------------------------------------|
//! ```
//!
//! # Receive
//!
//! ```text
//!   |  ReceiveFile {path, delete} upgrade     |
//!   |---------------------------------------->|
//!   |  reply {len: N}                         |
//!   |<----------------------------------------|
//!   |  N raw bytes                            |
//!   |<----------------------------------------|
//! ```
//!
//! Both directions consume the channel. The caller connects again for any
//! further calls.

use crate::constants::{MAX_TRANSFER_ACK_LEN, TRANSFER_ACK_DELIMITER};
use crate::error::{Error, Result};
use crate::rpc::RpcChannel;
use crate::rpc::protocol::methods;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ReceiveReply {
    len: u64,
}

/// Sends a local file to the service and returns the service-side name.
///
/// # Errors
///
/// - [`Error::TransferLengthMismatch`] if the file shrinks while it is copied
/// - [`Error::TransferFraming`] if the connection closes before the
///   acknowledgement delimiter, or the acknowledgement is oversized
pub async fn send_file(channel: RpcChannel, source: &Path) -> Result<String> {
    let file = tokio::fs::File::open(source).await?;
    let length = file.metadata().await?.len();
    debug!("Sending {} ({} bytes) over upgraded connection", source.display(), length);

    let (_, mut conn) = channel
        .upgrade(methods::SEND_FILE, json!({ "type": "", "length": length }))
        .await?;

    let mut reader = file.take(length);
    let copied = tokio::io::copy(&mut reader, &mut conn).await?;
    if copied != length {
        return Err(Error::TransferLengthMismatch {
            expected: length,
            actual: copied,
        });
    }
    conn.flush().await?;
    debug!("File transfer complete for {}", source.display());

    let mut ack = Vec::new();
    (&mut conn)
        .take(MAX_TRANSFER_ACK_LEN as u64)
        .read_until(TRANSFER_ACK_DELIMITER, &mut ack)
        .await?;
    if ack.last() != Some(&TRANSFER_ACK_DELIMITER) {
        return Err(if ack.len() >= MAX_TRANSFER_ACK_LEN {
            Error::TransferFraming(format!(
                "acknowledgement exceeds {MAX_TRANSFER_ACK_LEN} bytes"
            ))
        } else {
            Error::TransferFraming("connection closed before acknowledgement".to_string())
        });
    }

    let name = String::from_utf8(ack)
        .map_err(|_| Error::TransferFraming("acknowledgement is not UTF-8".to_string()))?;
    Ok(name.replace(char::from(TRANSFER_ACK_DELIMITER), ""))
}

/// Fetches a file from the service into `dest` and returns its length.
///
/// With `delete`, the service removes its copy once sent.
///
/// # Errors
///
/// [`Error::TransferLengthMismatch`] if the connection ends before the
/// declared length arrived. The partial destination file is removed.
pub async fn receive_file(
    channel: RpcChannel,
    remote_path: &str,
    dest: &Path,
    delete: bool,
) -> Result<u64> {
    let (reply, conn) = channel
        .upgrade(
            methods::RECEIVE_FILE,
            json!({ "path": remote_path, "delete": delete }),
        )
        .await?;
    let ReceiveReply { len } = serde_json::from_value(reply)?;
    debug!("Receiving {} ({} bytes) into {}", remote_path, len, dest.display());

    let file = tokio::fs::File::create(dest).await?;
    match copy_exact(conn, file, len).await {
        Ok(()) => Ok(len),
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(dest).await {
                warn!("Failed to remove partial file {}: {}", dest.display(), rm);
            }
            Err(e)
        }
    }
}

async fn copy_exact(
    conn: crate::rpc::RawConnection,
    file: tokio::fs::File,
    len: u64,
) -> Result<()> {
    let mut reader = conn.take(len);
    let mut writer = BufWriter::new(file);
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    if copied != len {
        return Err(Error::TransferLengthMismatch {
            expected: len,
            actual: copied,
        });
    }
    writer.into_inner().sync_all().await?;
    Ok(())
}
