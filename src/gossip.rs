//! Failure detection. Every tick a random share of the alive and suspected
//! peers is pinged; a peer that misses its direct ping is suspected and
//! probed once more through a third peer before it is declared dead.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::error::Error;
use crate::membership_list::{Member, MemberState};
use crate::message::{Message, MessageType};
use crate::network;
use crate::swim::Node;

pub(crate) trait SelectionStrategy: Sync + Send {
    /// Up to `k` distinct members of `pool`.
    fn select(&self, pool: &[Member], k: usize) -> Vec<Member>;
}

/// Uniform sampling without replacement.
pub(crate) struct RandomSelectionStrategy;

impl SelectionStrategy for RandomSelectionStrategy {
    fn select(&self, pool: &[Member], k: usize) -> Vec<Member> {
        pool.choose_multiple(&mut rand::thread_rng(), k).copied().collect()
    }
}

/// Number of targets per tick: `ratio` percent of the pool, rounded up, at
/// least one for a non-empty pool.
pub(crate) fn fanout(ratio: u8, pool_len: usize) -> usize {
    if pool_len == 0 {
        return 0;
    }
    (pool_len * ratio as usize).div_ceil(100).clamp(1, pool_len)
}

impl Node {
    /// Runs gossip ticks until the node is cancelled. A tick never overlaps
    /// the next one.
    pub(crate) async fn schedule(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.gossip_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    log::debug!("Probe loop of {} will be stopped", self.me());
                    return;
                }
                _ = ticker.tick() => {
                    match self.gossip().await {
                        Ok(()) => {}
                        Err(err) if err.is_cancelled() => {
                            log::debug!("Probe loop of {} will be stopped", self.me());
                            return;
                        }
                        Err(err) => log::warn!("gossip tick: {}, me: {}", err, self.me()),
                    }
                }
            }
        }
    }

    /// One tick: probe the selected targets concurrently and wait for all.
    pub(crate) async fn gossip(self: &Arc<Self>) -> Result<(), Error> {
        let pool = self.members.probe_pool();
        if pool.is_empty() {
            return Ok(());
        }
        let targets = self.selection_strategy.select(&pool, fanout(self.config.gossip_ratio, pool.len()));

        let mut probes = JoinSet::new();
        for target in targets {
            let node = Arc::clone(self);
            probes.spawn(async move { node.probe(target.addr()).await });
        }
        while let Some(finished) = probes.join_next().await {
            match finished {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_cancelled() => {
                    probes.shutdown().await;
                    return Err(err);
                }
                Ok(Err(err)) => log::debug!("probe: {}, me: {}", err, self.me()),
                Err(err) => log::error!("probe task failed: {}, me: {}", err, self.me()),
            }
        }
        Ok(())
    }

    async fn probe(&self, target: SocketAddr) -> Result<(), Error> {
        match self.ping(target).await {
            Ok(()) => {
                self.apply(self.members.set_state(MemberState::Alive, &[target]));
                Ok(())
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                log::debug!("Wasn't able to probe {}: {}, me: {}", target, err, self.me());
                self.suspect(target).await
            }
        }
    }

    // Single suspicion round: one indirect probe through a random alive peer.
    async fn suspect(&self, target: SocketAddr) -> Result<(), Error> {
        self.apply(self.members.set_state(MemberState::Suspect, &[target]));
        let relays = self.members.snapshot_alive(&[target]);
        let confirmed_alive = match self.selection_strategy.select(&relays, 1).first() {
            None => {
                log::debug!("No member left to ask about {}, me: {}", target, self.me());
                false
            }
            Some(relay) => match self.indirect_ping(relay.addr(), target).await {
                Ok(()) => true,
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    log::debug!("Indirect probe of {} via {} failed: {}", target, relay.addr(), err);
                    false
                }
            },
        };
        if confirmed_alive {
            self.apply(self.members.set_state(MemberState::Alive, &[target]));
            return Ok(());
        }

        self.apply(self.members.set_state(MemberState::Dead, &[target]));
        let announcement = Message::Dead { sender: self.me(), target };
        match self.broadcast(&announcement, &[target]).await {
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                log::warn!("broadcasting dead member {}: {}, me: {}", target, err, self.me());
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Direct ping awaiting an ack within the io timeout.
    pub(crate) async fn ping(&self, addr: SocketAddr) -> Result<(), Error> {
        let out = Message::Ping { sender: self.me() }.encode()?;
        let timeout = self.config.io_timeout;
        let reply = network::send_and_await_reply(&self.cancellation_token, addr, &out, timeout, timeout).await?;
        expect_ack("ping", reply)?;
        self.observer.pinged();
        Ok(())
    }

    // The relay runs its own direct ping before answering, hence the doubled
    // reply budget.
    async fn indirect_ping(&self, relay: SocketAddr, suspect: SocketAddr) -> Result<(), Error> {
        let out = Message::IndirectPing { sender: self.me(), suspect }.encode()?;
        let timeout = self.config.io_timeout;
        let reply = network::send_and_await_reply(&self.cancellation_token, relay, &out, timeout, timeout * 2)
            .await?;
        expect_ack("indirect ping", reply)
    }
}

fn expect_ack(op: &'static str, reply: u8) -> Result<(), Error> {
    if reply == MessageType::Ack.get_code() {
        Ok(())
    } else {
        Err(Error::NotAcked { op, reply })
    }
}
