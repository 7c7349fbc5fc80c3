use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    TcpListener::bind(addr).await.map_err(|err| Error::io("listen tcp", err))
}

/// Accept loop. Every connection is handled in its own task; a failing or
/// panicking handler is logged and never stops the loop. Returns once the
/// token is cancelled, dropping the listener and aborting open connections.
pub(crate) async fn listen<F, Fut>(listener: TcpListener,
                                   cancellation_token: CancellationToken,
                                   handler: F) -> anyhow::Result<()>
    where F: Fn(TcpStream, SocketAddr) -> Fut,
          Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    let local_addr = listener.local_addr().context("listener local addr")?;
    let mut connections = JoinSet::new();
    log::debug!("Start listening on {}", local_addr);
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                log::debug!("Listener on {} will be stopped", local_addr);
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        log::warn!("accept tcp on {}: {}", local_addr, err);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let handling = handler(stream, peer_addr);
                connections.spawn(async move {
                    if let Err(err) = handling.await {
                        log::warn!("handle conn from {}: {}", peer_addr, err);
                    }
                });
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = finished {
                    if err.is_panic() {
                        log::error!("recover from panic in connection handler on {}: {}", local_addr, err);
                    }
                }
            }
        }
    }
}

/// Runs one I/O step under both the operation deadline and the node's token.
/// A timeout and a cancellation are reported as distinct errors.
pub(crate) async fn bounded<T, F>(cancellation_token: &CancellationToken,
                                  op: &'static str,
                                  timeout: Duration,
                                  fut: F) -> Result<T, Error>
    where F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancellation_token.cancelled() => Err(Error::Cancelled { op }),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::io(op, err)),
            Err(_) => Err(Error::Timeout { op, timeout }),
        },
    }
}

pub(crate) async fn dial(cancellation_token: &CancellationToken,
                         addr: SocketAddr,
                         timeout: Duration) -> Result<TcpStream, Error> {
    let stream = bounded(cancellation_token, "connect", timeout, TcpStream::connect(addr)).await?;
    if let Err(err) = stream.set_nodelay(true) {
        log::debug!("set nodelay on conn to {}: {}", addr, err);
    }
    Ok(stream)
}

/// Fire-and-forget delivery of one frame.
pub(crate) async fn send_only(cancellation_token: &CancellationToken,
                              addr: SocketAddr,
                              out: &[u8],
                              timeout: Duration) -> Result<(), Error> {
    let mut stream = dial(cancellation_token, addr, timeout).await?;
    bounded(cancellation_token, "write to conn", timeout, stream.write_all(out)).await?;
    bounded(cancellation_token, "shutdown conn", timeout, stream.shutdown()).await?;
    Ok(())
}

/// Sends one frame and waits up to `reply_timeout` for the single reply byte.
pub(crate) async fn send_and_await_reply(cancellation_token: &CancellationToken,
                                         addr: SocketAddr,
                                         out: &[u8],
                                         timeout: Duration,
                                         reply_timeout: Duration) -> Result<u8, Error> {
    let mut stream = dial(cancellation_token, addr, timeout).await?;
    bounded(cancellation_token, "write to conn", timeout, stream.write_all(out)).await?;
    bounded(cancellation_token, "read reply", reply_timeout, stream.read_u8()).await
}
