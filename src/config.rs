use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::observer::{MembershipObserver, NoopObserver};

pub const DEFAULT_MAX_SUSPICION_COUNT: u32 = 5;
pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_GOSSIP_RATIO: u8 = 20;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Config {
    /// Also the address this node advertises to peers, so it must be dialable.
    pub bind_addr: IpAddr,
    /// 0 binds an ephemeral port.
    pub port: u16,
    /// Reserved for multi-round suspicion. A suspect currently gets exactly one
    /// indirect probe.
    pub max_suspicion_count: u32,
    /// Defines frequency of probing. By increasing the frequency we increase the dissemination speed.
    pub gossip_interval: Duration,
    /// Percent of the probe pool pinged per tick.
    pub gossip_ratio: u8,
    /// Deadline of every single network operation.
    pub io_timeout: Duration,
    pub observer: Arc<dyn MembershipObserver>,
}

impl Config {
    pub fn with_port(mut self, port: u16) -> Config {
        self.port = port;
        self
    }

    pub fn with_gossip_interval(mut self, interval: Duration) -> Config {
        self.gossip_interval = interval;
        self
    }

    pub fn with_gossip_ratio(mut self, ratio: u8) -> Config {
        self.gossip_ratio = ratio;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Config {
        self.io_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn MembershipObserver>) -> Config {
        self.observer = observer;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.bind_addr.is_unspecified() {
            return Err(Error::InvalidConfig(format!(
                "bind address {} cannot be dialed by peers",
                self.bind_addr
            )));
        }
        if self.gossip_interval.is_zero() {
            return Err(Error::InvalidConfig("gossip interval must be positive".to_owned()));
        }
        if self.io_timeout.is_zero() {
            return Err(Error::InvalidConfig("io timeout must be positive".to_owned()));
        }
        if !(1..=100).contains(&self.gossip_ratio) {
            return Err(Error::InvalidConfig(format!(
                "gossip ratio {} is not a percentage in 1..=100",
                self.gossip_ratio
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            max_suspicion_count: DEFAULT_MAX_SUSPICION_COUNT,
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
            gossip_ratio: DEFAULT_GOSSIP_RATIO,
            io_timeout: DEFAULT_IO_TIMEOUT,
            observer: Arc::new(NoopObserver),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("max_suspicion_count", &self.max_suspicion_count)
            .field("gossip_interval", &self.gossip_interval)
            .field("gossip_ratio", &self.gossip_ratio)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gossip_interval, Duration::from_millis(20));
        assert_eq!(config.io_timeout, Duration::from_millis(100));
        assert_eq!(config.gossip_ratio, 20);
        assert_eq!(config.port, 0);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            Config::default().with_gossip_ratio(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::default().with_gossip_ratio(101).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(Config::default().with_gossip_interval(Duration::ZERO).validate().is_err());
        assert!(Config::default().with_io_timeout(Duration::ZERO).validate().is_err());
        assert!(Config::default().with_gossip_ratio(100).validate().is_ok());
    }

    #[test]
    fn rejects_wildcard_bind_address() {
        for wildcard in [IpAddr::V4(Ipv4Addr::UNSPECIFIED), IpAddr::V6(Ipv6Addr::UNSPECIFIED)] {
            let config = Config { bind_addr: wildcard, ..Config::default() };
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))), "{wildcard}");
        }
        let config = Config { bind_addr: IpAddr::V6(Ipv6Addr::LOCALHOST), ..Config::default() };
        assert!(config.validate().is_ok());
    }
}
