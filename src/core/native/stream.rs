// src/core/native/stream.rs

//! Transport setup for one node: TCP or TLS, then the AUTH / SELECT / SETNAME handshake.

use super::ConnectParams;
use super::tls::TlsSetup;
use crate::core::RediscopeError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_util::codec::Framed;
use tracing::debug;

pub(super) enum NodeStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for NodeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            NodeStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NodeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            NodeStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            NodeStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            NodeStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

pub(super) type NodeFramed = Framed<NodeStream, RespFrameCodec>;

/// Connects, optionally upgrades to TLS, and runs the handshake.
pub(super) async fn establish(
    params: &ConnectParams,
    tls: Option<&TlsSetup>,
) -> Result<NodeFramed, RediscopeError> {
    let address = params.endpoint.to_string();
    let tcp = tokio::time::timeout(
        params.connect_timeout,
        TcpStream::connect((params.endpoint.host.as_str(), params.endpoint.port)),
    )
    .await?
    .map_err(|e| RediscopeError::ConnectionFailed(format!("{address}: {e}")))?;
    tcp.set_nodelay(true)?;

    let stream = match tls {
        Some(tls) => {
            let stream = tls
                .connector
                .connect(tls.server_name.clone(), tcp)
                .await
                .map_err(|e| RediscopeError::Tls(format!("handshake with {address} failed: {e}")))?;
            NodeStream::Tls(Box::new(stream))
        }
        None => NodeStream::Tcp(tcp),
    };

    let mut framed = Framed::new(stream, RespFrameCodec);
    tokio::time::timeout(params.connect_timeout, handshake(&mut framed, params)).await??;
    debug!("Connection to {address} is ready");
    Ok(framed)
}

async fn handshake(framed: &mut NodeFramed, params: &ConnectParams) -> Result<(), RediscopeError> {
    if let Some(password) = &params.password {
        let mut args = vec![Bytes::from_static(b"AUTH")];
        if let Some(username) = &params.username {
            args.push(Bytes::from(username.clone()));
        }
        args.push(Bytes::from(password.clone()));
        call(framed, args).await?.into_result()?;
    }

    if params.db != 0 {
        call(framed, vec!["SELECT".into(), params.db.to_string().into()])
            .await?
            .into_result()?;
    }

    if let Some(name) = &params.connection_name {
        // Servers with CLIENT disabled by ACL still work; only the name is lost.
        let reply = call(
            framed,
            vec!["CLIENT".into(), "SETNAME".into(), Bytes::from(name.clone())],
        )
        .await?;
        if let RespFrame::Error(message) = reply {
            debug!("CLIENT SETNAME refused: {message}");
        }
    }
    Ok(())
}

/// Writes one command and reads its reply on a connection that has no other user.
pub(super) async fn call(
    framed: &mut NodeFramed,
    args: Vec<Bytes>,
) -> Result<RespFrame, RediscopeError> {
    framed.send(RespFrame::command(args)).await?;
    match framed.next().await {
        Some(frame) => frame,
        None => Err(RediscopeError::ServerClosedConnection),
    }
}
