//! SWIM style group membership over TCP.
//!
//! Each [`Membership`] keeps its own view of the group. Peers are probed with
//! randomly targeted pings every gossip tick; a peer that misses a ping is
//! suspected and checked once more through a third peer before it is declared
//! dead. Joins, leaves and deaths are disseminated to all alive peers.
//!
//! ```no_run
//! # async fn run() -> Result<(), swim_membership::Error> {
//! use swim_membership::{Config, Membership};
//!
//! let seed = Membership::new(Config::default()).await?;
//! let node = Membership::new(Config::default()).await?;
//! node.join(&[seed.me().addr().to_string()]).await?;
//!
//! node.leave().await?;
//! node.stop();
//! # Ok(())
//! # }
//! ```

mod broadcast;
mod config;
mod dispatch;
mod error;
mod gossip;
mod membership_list;
mod message;
mod network;
mod observer;
mod swim;

pub use config::{
    Config, DEFAULT_GOSSIP_INTERVAL, DEFAULT_GOSSIP_RATIO, DEFAULT_IO_TIMEOUT, DEFAULT_MAX_SUSPICION_COUNT,
};
pub use error::{BroadcastError, CodecError, Error, Result};
pub use membership_list::{Member, MemberState, MembershipList, Transition};
pub use message::{Message, MessageType, ADDR_CHUNK_LEN, MAX_ADDR_LEN};
pub use observer::{MembershipObserver, Metrics, NoopObserver};
pub use swim::Membership;
