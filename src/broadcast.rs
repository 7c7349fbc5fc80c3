use std::net::SocketAddr;

use tokio::task::JoinSet;

use crate::error::{BroadcastError, Error};
use crate::message::Message;
use crate::network;
use crate::swim::Node;

impl Node {
    /// Sends `msg` to every alive peer not in `excluding`, all at once, and
    /// waits for every send. Failures are collected, not short-circuited.
    pub(crate) async fn broadcast(&self, msg: &Message, excluding: &[SocketAddr]) -> Result<(), Error> {
        let out = msg.encode()?;
        let targets = self.members.snapshot_alive(excluding);
        log::debug!("Broadcast {} to {} member(s), me: {}", msg.message_type(), targets.len(), self.me());

        let mut sends = JoinSet::new();
        for target in targets {
            let out = out.clone();
            let cancellation_token = self.cancellation_token.clone();
            let timeout = self.config.io_timeout;
            sends.spawn(async move {
                let addr = target.addr();
                (addr, network::send_only(&cancellation_token, addr, &out, timeout).await)
            });
        }

        let mut failures = Vec::new();
        while let Some(finished) = sends.join_next().await {
            match finished {
                Ok((_, Ok(()))) => {}
                Ok((addr, Err(err))) => failures.push((addr, err)),
                Err(err) => log::error!("broadcast send task failed: {}", err),
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(Error::Broadcast(BroadcastError { kind: msg.message_type(), failures }))
    }
}
