//! Address book, connection accounting, and peer scoring/banning.

use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};

use rand::seq::SliceRandom;

/// Reasons a peer can be penalized. Each carries a fixed penalty value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PenaltyReason {
    ProtocolViolation,
    BadChecksum,
    InvalidInventory,
    Timeout,
}

impl PenaltyReason {
    /// Penalty points deducted for this reason (always negative).
    pub fn penalty(self) -> i32 {
        match self {
            Self::ProtocolViolation => -200,
            Self::BadChecksum => -100,
            Self::InvalidInventory => -100,
            Self::Timeout => -10,
        }
    }
}

/// Score at or below which an address is banned.
const BAN_THRESHOLD: i32 = -300;
/// Duration of a ban in seconds (1 hour).
pub const BAN_DURATION_SECS: u64 = 3600;
/// Minimum reputation score.
const SCORE_MIN: i32 = -1000;
/// Most addresses kept as connection candidates.
const MAX_UNCONNECTED: usize = 1000;

#[derive(Clone, Debug)]
pub struct PeerLimits {
    pub min_desired: usize,
    pub max_connections: usize,
    pub max_per_address: usize,
}

impl Default for PeerLimits {
    fn default() -> Self {
        Self {
            min_desired: 10,
            max_connections: 40,
            max_per_address: 3,
        }
    }
}

/// Tracks unconnected candidates, live connections and bans.
///
/// Scores and bans are per IP; connection slots are per endpoint.
pub struct PeerManager {
    limits: PeerLimits,
    unconnected: BTreeSet<SocketAddr>,
    connecting: BTreeSet<SocketAddr>,
    connected: HashMap<SocketAddr, u64>,
    per_ip: HashMap<IpAddr, usize>,
    scores: HashMap<IpAddr, i32>,
    banned: HashMap<IpAddr, u64>,
    local: BTreeSet<SocketAddr>,
}

impl PeerManager {
    pub fn new(limits: PeerLimits) -> Self {
        Self {
            limits,
            unconnected: BTreeSet::new(),
            connecting: BTreeSet::new(),
            connected: HashMap::new(),
            per_ip: HashMap::new(),
            scores: HashMap::new(),
            banned: HashMap::new(),
            local: BTreeSet::new(),
        }
    }

    pub fn limits(&self) -> &PeerLimits {
        &self.limits
    }

    /// Never dial this address (our own listener).
    pub fn add_local(&mut self, addr: SocketAddr) {
        self.unconnected.remove(&addr);
        self.local.insert(addr);
    }

    /// Learn candidate addresses. Known, connected, local and banned
    /// addresses are skipped.
    pub fn add_unconnected(&mut self, addrs: impl IntoIterator<Item = SocketAddr>) {
        for addr in addrs {
            if self.unconnected.len() >= MAX_UNCONNECTED {
                break;
            }
            if addr.port() == 0
                || self.local.contains(&addr)
                || self.connected.contains_key(&addr)
                || self.connecting.contains(&addr)
                || self.banned.contains_key(&addr.ip())
            {
                continue;
            }
            self.unconnected.insert(addr);
        }
    }

    pub fn unconnected_count(&self) -> usize {
        self.unconnected.len()
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    /// Whether outbound attempts should be made.
    pub fn needs_peers(&self) -> bool {
        self.connected.len() + self.connecting.len() < self.limits.min_desired
    }

    /// Pick up to `count` random candidates and mark them as connecting.
    pub fn take_candidates(&mut self, count: usize, now_secs: u64) -> Vec<SocketAddr> {
        self.check_bans(now_secs);
        let mut candidates: Vec<SocketAddr> = self
            .unconnected
            .iter()
            .filter(|a| self.slot_free(a))
            .copied()
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(count);
        for addr in &candidates {
            self.unconnected.remove(addr);
            self.connecting.insert(*addr);
        }
        candidates
    }

    fn slot_free(&self, addr: &SocketAddr) -> bool {
        !self.banned.contains_key(&addr.ip())
            && self.per_ip.get(&addr.ip()).copied().unwrap_or(0) < self.limits.max_per_address
    }

    /// Whether a connection with `addr` may be established now.
    pub fn allow(&self, addr: &SocketAddr) -> bool {
        self.connected.len() < self.limits.max_connections && self.slot_free(addr)
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.banned.contains_key(ip)
    }

    /// An explicit dial outside [`take_candidates`](Self::take_candidates).
    pub fn mark_connecting(&mut self, addr: SocketAddr) {
        self.unconnected.remove(&addr);
        self.connecting.insert(addr);
    }

    pub fn connect_failed(&mut self, addr: &SocketAddr) {
        self.connecting.remove(addr);
    }

    pub fn mark_connected(&mut self, addr: SocketAddr, now_secs: u64) {
        self.connecting.remove(&addr);
        self.unconnected.remove(&addr);
        if self.connected.insert(addr, now_secs).is_none() {
            *self.per_ip.entry(addr.ip()).or_default() += 1;
        }
    }

    pub fn mark_disconnected(&mut self, addr: &SocketAddr) {
        self.connecting.remove(addr);
        if self.connected.remove(addr).is_some() {
            if let Some(count) = self.per_ip.get_mut(&addr.ip()) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.per_ip.remove(&addr.ip());
                }
            }
        }
    }

    /// Penalize an address. Returns `true` if it got banned.
    pub fn penalize(&mut self, ip: IpAddr, reason: PenaltyReason, now_secs: u64) -> bool {
        let score = self.scores.entry(ip).or_insert(0);
        *score = (*score + reason.penalty()).max(SCORE_MIN);
        if *score > BAN_THRESHOLD {
            return false;
        }
        tracing::warn!(%ip, score = *score, ?reason, "banning peer address");
        self.banned.insert(ip, now_secs + BAN_DURATION_SECS);
        self.unconnected.retain(|a| a.ip() != ip);
        true
    }

    /// Lift bans whose time has passed.
    pub fn check_bans(&mut self, now_secs: u64) {
        let scores = &mut self.scores;
        self.banned.retain(|ip, until| {
            if now_secs >= *until {
                scores.remove(ip);
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn limits(min: usize, max: usize, per: usize) -> PeerLimits {
        PeerLimits {
            min_desired: min,
            max_connections: max,
            max_per_address: per,
        }
    }

    #[test]
    fn candidates_move_to_connecting_then_connected() {
        let mut pm = PeerManager::new(limits(2, 10, 3));
        pm.add_unconnected([addr("1.0.0.1:1"), addr("1.0.0.2:2")]);
        assert!(pm.needs_peers());

        let picked = pm.take_candidates(5, 0);
        assert_eq!(picked.len(), 2);
        assert_eq!(pm.unconnected_count(), 0);
        assert!(!pm.needs_peers());

        pm.mark_connected(picked[0], 0);
        pm.connect_failed(&picked[1]);
        assert_eq!(pm.connected_count(), 1);
        assert!(pm.needs_peers());
    }

    #[test]
    fn local_and_connected_addresses_are_not_candidates() {
        let mut pm = PeerManager::new(PeerLimits::default());
        pm.add_local(addr("127.0.0.1:10333"));
        pm.mark_connected(addr("1.0.0.1:1"), 0);
        pm.add_unconnected([addr("127.0.0.1:10333"), addr("1.0.0.1:1"), addr("1.0.0.3:0")]);
        assert_eq!(pm.unconnected_count(), 0);
    }

    #[test]
    fn per_address_cap_is_enforced() {
        let mut pm = PeerManager::new(limits(10, 10, 2));
        pm.mark_connected(addr("9.9.9.9:1"), 0);
        pm.mark_connected(addr("9.9.9.9:2"), 0);
        assert!(!pm.allow(&addr("9.9.9.9:3")));
        assert!(pm.allow(&addr("9.9.9.8:3")));

        pm.add_unconnected([addr("9.9.9.9:4")]);
        assert!(pm.take_candidates(1, 0).is_empty());

        pm.mark_disconnected(&addr("9.9.9.9:1"));
        assert!(pm.allow(&addr("9.9.9.9:3")));
    }

    #[test]
    fn max_connections_is_enforced() {
        let mut pm = PeerManager::new(limits(1, 1, 3));
        pm.mark_connected(addr("1.0.0.1:1"), 0);
        assert!(!pm.allow(&addr("1.0.0.2:1")));
    }

    #[test]
    fn repeated_penalties_ban_until_expiry() {
        let mut pm = PeerManager::new(PeerLimits::default());
        let ip: IpAddr = "5.5.5.5".parse().unwrap();
        assert!(!pm.penalize(ip, PenaltyReason::BadChecksum, 100));
        assert!(!pm.penalize(ip, PenaltyReason::BadChecksum, 100));
        assert!(pm.penalize(ip, PenaltyReason::BadChecksum, 100));
        assert!(pm.is_banned(&ip));
        assert!(!pm.allow(&addr("5.5.5.5:1")));

        pm.add_unconnected([addr("5.5.5.5:1")]);
        assert_eq!(pm.unconnected_count(), 0);

        pm.check_bans(100 + BAN_DURATION_SECS - 1);
        assert!(pm.is_banned(&ip));
        pm.check_bans(100 + BAN_DURATION_SECS);
        assert!(!pm.is_banned(&ip));
        // Score was reset with the ban.
        assert!(!pm.penalize(ip, PenaltyReason::Timeout, 200));
    }

    #[test]
    fn protocol_violations_ban_faster_than_timeouts() {
        let mut pm = PeerManager::new(PeerLimits::default());
        let ip: IpAddr = "6.6.6.6".parse().unwrap();
        assert!(!pm.penalize(ip, PenaltyReason::ProtocolViolation, 0));
        assert!(pm.penalize(ip, PenaltyReason::ProtocolViolation, 0));

        let other: IpAddr = "7.7.7.7".parse().unwrap();
        for _ in 0..29 {
            assert!(!pm.penalize(other, PenaltyReason::Timeout, 0));
        }
        assert!(pm.penalize(other, PenaltyReason::Timeout, 0));
    }
}
