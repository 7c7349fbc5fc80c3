use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Error;
use crate::gossip::{RandomSelectionStrategy, SelectionStrategy};
use crate::membership_list::{Member, MembershipList, Transition};
use crate::message::Message;
use crate::network;
use crate::observer::{Instrumented, Metrics};

/// State shared by the accept loop, the gossip loop and every probe task.
pub(crate) struct Node {
    pub(crate) config: Config,
    pub(crate) members: MembershipList,
    pub(crate) observer: Instrumented,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) selection_strategy: Box<dyn SelectionStrategy>,
}

impl Node {
    pub(crate) fn new(config: Config, me: SocketAddr, cancellation_token: CancellationToken) -> Node {
        let observer = Instrumented::new(me, config.observer.clone());
        Node {
            config,
            members: MembershipList::new(me),
            observer,
            cancellation_token,
            selection_strategy: Box::new(RandomSelectionStrategy),
        }
    }

    pub(crate) fn me(&self) -> SocketAddr {
        self.members.me().addr()
    }

    /// Fires observer hooks for the transitions the store actually applied.
    pub(crate) fn apply(&self, transitions: Vec<Transition>) {
        for transition in transitions {
            log::debug!("{} {} -> {}, me: {}", transition.addr, transition.from, transition.to, self.me());
            if transition.joined() {
                self.observer.on_join(transition.addr);
            } else if transition.departed() {
                self.observer.on_leave(transition.addr);
            }
        }
    }

    pub(crate) async fn send(&self, addr: SocketAddr, msg: &Message) -> Result<(), Error> {
        let out = msg.encode()?;
        network::send_only(&self.cancellation_token, addr, &out, self.config.io_timeout).await
    }
}

/// A running member of the group. Dropping it stops the background tasks.
pub struct Membership {
    node: Arc<Node>,
    stopped: AtomicBool,
}

impl Membership {
    /// Binds the listener, then starts the accept loop and the gossip loop.
    /// `me()` is valid as soon as this returns.
    pub async fn new(config: Config) -> Result<Membership, Error> {
        config.validate()?;
        let listener = network::bind(SocketAddr::new(config.bind_addr, config.port)).await?;
        let me = listener.local_addr().map_err(|err| Error::io("listener local addr", err))?;
        let cancellation_token = CancellationToken::new();
        let node = Arc::new(Node::new(config, me, cancellation_token.clone()));

        let gossiping = node.clone();
        tokio::spawn(async move { gossiping.schedule().await });

        let handler_node = node.clone();
        tokio::spawn(async move {
            let handler = move |mut stream: tokio::net::TcpStream, _peer: SocketAddr| {
                let node = handler_node.clone();
                async move { node.stream(&mut stream).await }
            };
            if let Err(err) = network::listen(listener, cancellation_token, handler).await {
                log::error!("listen tcp on {}: {:#}", me, err);
            }
        });

        log::info!("Member {} started", me);
        Ok(Membership { node, stopped: AtomicBool::new(false) })
    }

    /// Announces this node to each seed in turn. Fails on the first seed that
    /// cannot be reached.
    pub async fn join<S: AsRef<str>>(&self, seeds: &[S]) -> Result<(), Error> {
        for seed in seeds {
            if self.is_stopped() {
                return Err(Error::Stopped);
            }
            let seed = resolve(seed.as_ref()).await?;
            if seed == self.node.me() {
                log::warn!("Skip joining myself {}", seed);
                continue;
            }
            let request = Message::JoinRequest { sender: self.node.me() };
            self.node.send(seed, &request).await
                .map_err(|err| Error::Join { seed, source: Box::new(err) })?;
            self.node.apply(self.node.members.upsert([Member::alive(seed)]));
        }
        Ok(())
    }

    /// Tells every alive peer that this node leaves. The local view is kept.
    pub async fn leave(&self) -> Result<(), Error> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        let request = Message::LeaveRequest { sender: self.node.me() };
        self.node.broadcast(&request, &[]).await
    }

    /// Cancels the background tasks without waiting for in-flight probes.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.node.cancellation_token.cancel();
        self.node.observer.on_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn me(&self) -> Member {
        self.node.members.me()
    }

    /// Alive peers plus myself.
    pub fn members(&self) -> Vec<Member> {
        let mut members = self.node.members.snapshot_alive(&[]);
        members.push(self.me());
        members
    }

    /// Every known peer in any state, myself excluded.
    pub fn peers(&self) -> Vec<Member> {
        self.node.members.snapshot()
    }

    pub fn member(&self, addr: SocketAddr) -> Option<Member> {
        self.node.members.get(addr)
    }

    pub fn metrics(&self) -> Metrics {
        self.node.observer.metrics()
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.node.cancellation_token.cancel();
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, Error> {
    if let Ok(addr) = addr.parse() {
        return Ok(addr);
    }
    tokio::net::lookup_host(addr)
        .await
        .map_err(|source| Error::Resolve { addr: addr.to_owned(), source })?
        .next()
        .ok_or_else(|| Error::UnresolvedAddress(addr.to_owned()))
}
