// src/core/strategy/readiness.rs

//! Turns a stream of lifecycle events into one settled outcome.

use crate::core::RediscopeError;
use crate::core::native::{LifecycleEvent, LifecycleEvents};
use crate::core::ssh::{TunnelEvent, TunnelEvents};
use tracing::{debug, warn};

/// Waits until a pending connection becomes ready or fails for good.
///
/// The function returns exactly once, so later events (an `End` after an `Error`,
/// say) cannot settle the attempt a second time. On success the event channel is
/// handed back so the caller can keep observing the connection.
pub(crate) async fn wait_until_ready(
    mut events: LifecycleEvents,
    use_retry: bool,
    mut tunnel: Option<&mut TunnelEvents>,
) -> Result<LifecycleEvents, RediscopeError> {
    let mut last_error: Option<RediscopeError> = None;

    loop {
        let tunnel_event = async {
            match tunnel.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            event = events.recv() => match event {
                Some(LifecycleEvent::Ready) => return Ok(events),
                Some(LifecycleEvent::Connect) => debug!("Transport connected, waiting for handshake"),
                Some(LifecycleEvent::Error(e)) => {
                    if !use_retry || e.is_topology_mismatch() {
                        return Err(e);
                    }
                    debug!("Connection attempt failed, waiting for retry: {e}");
                    last_error = Some(e);
                }
                Some(LifecycleEvent::Reconnecting { attempt, delay }) => {
                    debug!("Reconnecting (attempt {attempt}) in {delay:?}");
                    last_error = None;
                }
                Some(LifecycleEvent::End) | None => {
                    return Err(last_error.unwrap_or(RediscopeError::ServerClosedConnection));
                }
            },
            event = tunnel_event => {
                match event {
                    Some(TunnelEvent::Error(e)) => warn!("SSH tunnel failed: {e}"),
                    Some(TunnelEvent::Closed) | None => warn!("SSH tunnel closed"),
                }
                return Err(RediscopeError::TunnelConnectionLost);
            }
        }
    }
}

/// Logs what happens to a connection after it became ready.
pub(crate) async fn follow_lifecycle(client_id: String, mut events: LifecycleEvents) {
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::Error(e) => warn!("Client {client_id}: {e}"),
            LifecycleEvent::Reconnecting { attempt, delay } => {
                debug!("Client {client_id} reconnecting (attempt {attempt}) in {delay:?}")
            }
            LifecycleEvent::End => {
                debug!("Client {client_id} connection ended");
                break;
            }
            LifecycleEvent::Connect | LifecycleEvent::Ready => {
                debug!("Client {client_id}: {event:?}")
            }
        }
    }
}
