//! Tests for the remote protocol channel.
//!
//! Validates single calls, reply streams, poisoning after transport
//! failures, deadlines and connection upgrades.

mod common;

use common::channel_pair;
use podbridge::rpc::{Reply, RemoteErrorCode};
use podbridge::{Error, ErrorKind};
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncReadExt;

// =============================================================================
// Single Calls
// =============================================================================

#[tokio::test]
async fn test_call_returns_reply_parameters() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        let call = peer.expect_call("StopContainer").await;
        assert_eq!(call.parameters["name"], "web");
        assert!(!call.more);
        peer.send(Reply::ok(json!({"container": "abc"}))).await;
        peer
    });

    let reply = channel
        .call("StopContainer", json!({"name": "web"}))
        .await
        .unwrap();
    assert_eq!(reply["container"], "abc");
    assert!(!channel.is_poisoned());
    server.await.unwrap();
}

#[tokio::test]
async fn test_error_reply_keeps_channel_usable() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("StopContainer").await;
        peer.send(Reply::failure(RemoteErrorCode::NoSuchContainer, "ghost"))
            .await;
        peer.expect_call("StopContainer").await;
        peer.send(Reply::ok(json!({}))).await;
        peer
    });

    let err = channel
        .call("StopContainer", json!({"name": "ghost"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchEntity);
    assert!(matches!(err, Error::Remote { .. }));
    assert!(!channel.is_poisoned());

    assert!(channel.call("StopContainer", json!({})).await.is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn test_continued_reply_to_single_call_poisons() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("ListPods").await;
        peer.send(Reply::chunk(json!({}))).await;
        peer
    });

    let err = channel.call("ListPods", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(channel.is_poisoned());
    server.await.unwrap();
}

// =============================================================================
// Streams
// =============================================================================

#[tokio::test]
async fn test_stream_yields_continued_payloads_only() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        let call = peer.expect_call("GetEvents").await;
        assert!(call.more);
        for n in 0..3 {
            peer.send(Reply::chunk(json!({"n": n}))).await;
        }
        peer.send(Reply::ok(json!({"done": true}))).await;
        peer
    });

    let mut stream = channel
        .call_streaming("GetEvents", json!({}))
        .await
        .unwrap();
    let mut seen = Vec::new();
    while let Some(payload) = stream.next().await.unwrap() {
        seen.push(payload["n"].as_i64().unwrap());
    }
    assert_eq!(seen, vec![0, 1, 2]);
    assert!(stream.is_finished());
    assert_eq!(stream.terminal(), Some(&json!({"done": true})));
    drop(stream);
    assert!(!channel.is_poisoned());
    server.await.unwrap();
}

#[tokio::test]
async fn test_dropping_unfinished_stream_poisons() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("GetEvents").await;
        peer.send(Reply::chunk(json!({"n": 0}))).await;
        peer.send(Reply::chunk(json!({"n": 1}))).await;
        peer
    });

    {
        let mut stream = channel
            .call_streaming("GetEvents", json!({}))
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_some());
    }
    assert!(channel.is_poisoned());
    let err = channel.call("ListPods", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ChannelPoisoned));
    server.await.unwrap();
}

#[tokio::test]
async fn test_stream_error_reply_ends_stream() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("GetEvents").await;
        peer.send(Reply::chunk(json!({"n": 0}))).await;
        peer.send(Reply::failure(RemoteErrorCode::Internal, "boom"))
            .await;
        peer
    });

    let mut stream = channel
        .call_streaming("GetEvents", json!({}))
        .await
        .unwrap();
    assert!(stream.next().await.unwrap().is_some());
    let err = stream.next().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(stream.is_finished());
    assert!(stream.next().await.unwrap().is_none());
    drop(stream);
    assert!(!channel.is_poisoned());
    server.await.unwrap();
}

#[tokio::test]
async fn test_continued_error_reply_poisons() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("GetEvents").await;
        let mut reply = Reply::failure(RemoteErrorCode::Internal, "partial");
        reply.continues = true;
        peer.send(reply).await;
        peer.send(Reply::chunk(json!({"n": 1}))).await;
        peer
    });

    let mut stream = channel
        .call_streaming("GetEvents", json!({}))
        .await
        .unwrap();
    let err = stream.next().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert!(stream.is_finished());
    drop(stream);
    assert!(channel.is_poisoned());

    let err = channel.call("ListPods", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ChannelPoisoned));
    server.await.unwrap();
}

// =============================================================================
// Transport Failures
// =============================================================================

#[tokio::test]
async fn test_eof_mid_call_is_connection_closed() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("StopPod").await;
        peer.close().await;
    });

    let err = channel.call("StopPod", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed { .. }));
    assert!(err.is_transport());
    assert!(channel.is_poisoned());
    server.await.unwrap();
}

#[tokio::test]
async fn test_partial_frame_before_eof_is_connection_closed() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("StopPod").await;
        peer.write_raw(br#"{"parameters":"#).await;
        peer.close().await;
    });

    let err = channel.call("StopPod", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
    server.await.unwrap();
}

#[tokio::test]
async fn test_malformed_reply_poisons() {
    let (mut channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("ListPods").await;
        peer.write_raw(b"not json\n").await;
        peer
    });

    let err = channel.call("ListPods", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(channel.is_poisoned());
    server.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_timeout_poisons_channel() {
    let (channel, mut peer) = channel_pair();
    let mut channel = channel.with_timeout(Some(Duration::from_millis(50)));
    let server = tokio::spawn(async move {
        peer.expect_call("StopPod").await;
        // Never replies.
        peer
    });

    let err = channel.call("StopPod", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(channel.is_poisoned());
    assert!(matches!(
        channel.call("StopPod", json!({})).await,
        Err(Error::ChannelPoisoned)
    ));
    let _peer = server.await.unwrap();
}

// =============================================================================
// Upgrade
// =============================================================================

#[tokio::test]
async fn test_upgrade_switches_to_raw_bytes() {
    let (channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        let call = peer.expect_call("ReceiveFile").await;
        assert!(call.upgrade);
        // Reply and raw bytes in one write, so both land in one buffer.
        let mut bytes = Reply::ok(json!({"len": 5})).to_json_line().unwrap().into_bytes();
        bytes.extend_from_slice(b"hello");
        peer.write_raw(&bytes).await;
        peer.close().await;
    });

    let (reply, mut raw) = channel
        .upgrade("ReceiveFile", json!({"path": "/tmp/x"}))
        .await
        .unwrap();
    assert_eq!(reply["len"], 5);
    let mut data = Vec::new();
    raw.read_to_end(&mut data).await.unwrap();
    assert_eq!(data, b"hello");
    server.await.unwrap();
}

#[tokio::test]
async fn test_upgrade_error_reply_is_remote_error() {
    let (channel, mut peer) = channel_pair();
    let server = tokio::spawn(async move {
        peer.expect_call("ReceiveFile").await;
        peer.send(Reply::failure(RemoteErrorCode::InvalidArgument, "no path"))
            .await;
    });

    let err = channel
        .upgrade("ReceiveFile", json!({"path": ""}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    server.await.unwrap();
}
