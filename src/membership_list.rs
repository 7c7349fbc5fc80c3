use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Local view of one peer. Identity is the address.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Member {
    addr: SocketAddr,
    state: MemberState,
    since: Instant,
}

impl Member {
    pub fn alive(addr: SocketAddr) -> Member {
        Member::new(addr, MemberState::Alive)
    }

    fn new(addr: SocketAddr, state: MemberState) -> Member {
        Member { addr, state, since: Instant::now() }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> MemberState {
        self.state
    }

    /// When the record last changed state.
    pub fn since(&self) -> Instant {
        self.since
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum MemberState {
    Unknown,
    Alive,
    Suspect,
    Dead,
    Left,
}

impl MemberState {
    /// Alive or suspected; such peers are still probed.
    pub fn is_active(&self) -> bool {
        matches!(self, MemberState::Alive | MemberState::Suspect)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MemberState::Dead | MemberState::Left)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Unknown => "unknown",
            MemberState::Alive => "alive",
            MemberState::Suspect => "suspect",
            MemberState::Dead => "dead",
            MemberState::Left => "left",
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied state change, as reported back by the store.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Transition {
    pub addr: SocketAddr,
    pub from: MemberState,
    pub to: MemberState,
}

impl Transition {
    /// The peer (re)entered the alive set.
    pub fn joined(&self) -> bool {
        !self.from.is_active() && self.to == MemberState::Alive
    }

    /// The peer dropped out of the probed set.
    pub fn departed(&self) -> bool {
        self.from.is_active() && self.to.is_terminal()
    }
}

/// Authoritative peer table of one node. The own record lives apart from the
/// peers and never shows up among them.
#[derive(Debug)]
pub struct MembershipList {
    me: Member,
    others: RwLock<HashMap<SocketAddr, Member>>,
}

impl MembershipList {
    pub fn new(my_addr: SocketAddr) -> MembershipList {
        MembershipList { me: Member::alive(my_addr), others: RwLock::new(HashMap::new()) }
    }

    pub fn me(&self) -> Member {
        self.me
    }

    /// Moves the named, known and non-terminal peers to `state`. Unknown
    /// addresses are skipped, never materialized.
    pub fn set_state(&self, state: MemberState, addrs: &[SocketAddr]) -> Vec<Transition> {
        let mut others = self.write();
        let now = Instant::now();
        let mut applied = Vec::new();
        for addr in addrs {
            let Some(current) = others.get_mut(addr) else {
                continue;
            };
            if current.state.is_terminal() {
                continue;
            }
            let from = current.state;
            *current = Member { addr: *addr, state, since: now };
            applied.push(Transition { addr: *addr, from, to: state });
        }
        applied
    }

    /// Inserts or replaces records wholesale. This is the only way back from
    /// a terminal state.
    pub fn upsert<I>(&self, members: I) -> Vec<Transition>
        where I: IntoIterator<Item = Member>,
    {
        let mut others = self.write();
        let mut applied = Vec::new();
        for member in members {
            if member.addr == self.me.addr {
                continue;
            }
            let from = others.insert(member.addr, member)
                .map_or(MemberState::Unknown, |previous| previous.state);
            applied.push(Transition { addr: member.addr, from, to: member.state });
        }
        applied
    }

    pub fn get(&self, addr: SocketAddr) -> Option<Member> {
        self.read().get(&addr).copied()
    }

    /// Alive peers except `excluding`, copied out so no lock is held by the caller.
    pub fn snapshot_alive(&self, excluding: &[SocketAddr]) -> Vec<Member> {
        self.read()
            .values()
            .filter(|m| m.state == MemberState::Alive && !excluding.contains(&m.addr))
            .copied()
            .collect()
    }

    /// Peers eligible for probing: alive or suspected.
    pub fn probe_pool(&self) -> Vec<Member> {
        self.read().values().filter(|m| m.state.is_active()).copied().collect()
    }

    /// Every known peer whatever its state.
    pub fn snapshot(&self) -> Vec<Member> {
        self.read().values().copied().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SocketAddr, Member>> {
        self.others.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SocketAddr, Member>> {
        self.others.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn list_with_peers(ports: &[u16]) -> MembershipList {
        let list = MembershipList::new(addr(8080));
        list.upsert(ports.iter().map(|p| Member::alive(addr(*p))));
        list
    }

    #[test]
    fn set_state_skips_unknown_addresses() {
        let list = list_with_peers(&[8081]);
        let applied = list.set_state(MemberState::Suspect, &[addr(8081), addr(9999)]);
        assert_eq!(applied, vec![Transition {
            addr: addr(8081),
            from: MemberState::Alive,
            to: MemberState::Suspect,
        }]);
        assert_eq!(list.get(addr(9999)), None);
        assert_eq!(list.snapshot().len(), 1);
    }

    #[test]
    fn set_state_stamps_time() {
        let list = list_with_peers(&[8081]);
        let before = list.get(addr(8081)).unwrap().since();
        thread::sleep(Duration::from_millis(2));
        list.set_state(MemberState::Alive, &[addr(8081)]);
        assert!(list.get(addr(8081)).unwrap().since() > before);
    }

    #[test]
    fn terminal_states_stick_until_rejoin() {
        let list = list_with_peers(&[8081, 8082]);
        list.set_state(MemberState::Dead, &[addr(8081)]);
        list.set_state(MemberState::Left, &[addr(8082)]);

        assert!(list.set_state(MemberState::Alive, &[addr(8081), addr(8082)]).is_empty());
        assert_eq!(list.get(addr(8081)).unwrap().state(), MemberState::Dead);
        assert_eq!(list.get(addr(8082)).unwrap().state(), MemberState::Left);

        let applied = list.upsert([Member::alive(addr(8081))]);
        assert!(applied[0].joined());
        assert_eq!(list.get(addr(8081)).unwrap().state(), MemberState::Alive);
    }

    #[test]
    fn upsert_never_lists_me() {
        let list = list_with_peers(&[]);
        let applied = list.upsert([Member::alive(addr(8080)), Member::alive(addr(8081))]);
        assert_eq!(applied.len(), 1);
        assert_eq!(list.snapshot().len(), 1);
        assert_eq!(list.get(addr(8080)), None);
        assert_eq!(list.me().state(), MemberState::Alive);
    }

    #[test]
    fn repeated_upsert_is_not_a_join() {
        let list = list_with_peers(&[]);
        assert!(list.upsert([Member::alive(addr(8081))])[0].joined());
        let again = list.upsert([Member::alive(addr(8081))]);
        assert!(!again[0].joined());
        assert_eq!(list.snapshot().len(), 1);
    }

    #[test]
    fn departure_only_from_active_states() {
        let list = list_with_peers(&[8081, 8082]);
        list.set_state(MemberState::Suspect, &[addr(8082)]);
        let applied = list.set_state(MemberState::Dead, &[addr(8081), addr(8082)]);
        assert!(applied.iter().all(Transition::departed));
        assert!(list.set_state(MemberState::Left, &[addr(8081)]).is_empty());
    }

    #[test]
    fn snapshots_filter_by_state() {
        let list = list_with_peers(&[8081, 8082, 8083, 8084]);
        list.set_state(MemberState::Suspect, &[addr(8082)]);
        list.set_state(MemberState::Left, &[addr(8083)]);

        let mut alive: Vec<_> = list.snapshot_alive(&[addr(8084)]).iter().map(Member::addr).collect();
        alive.sort();
        assert_eq!(alive, vec![addr(8081)]);

        let mut pool: Vec<_> = list.probe_pool().iter().map(Member::addr).collect();
        pool.sort();
        assert_eq!(pool, vec![addr(8081), addr(8082), addr(8084)]);
    }
}
