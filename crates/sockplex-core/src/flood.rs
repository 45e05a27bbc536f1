//! Flood protection
//!
//! Every read charges a connection `1 + bytes / bytes_per_point` points and
//! every tick forgives `decay_per_tick` of them. A connection whose points
//! climb past `limit` gets kicked.

use core::fmt;

/// Why a connection was forcibly removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KickReason {
    /// Peer sent faster than the policy allows, or overran the receive buffer
    Flooding,
    /// Peer drained output too slowly and the send buffer overflowed
    Crawling,
}

impl fmt::Display for KickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KickReason::Flooding => write!(f, "flooding"),
            KickReason::Crawling => write!(f, "crawling"),
        }
    }
}

/// Burst limit and decay rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FloodPolicy {
    pub limit: u32,
    pub decay_per_tick: u32,
    pub bytes_per_point: u32,
}

impl FloodPolicy {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const DEFAULT_DECAY: u32 = 1;
    pub const DEFAULT_BYTES_PER_POINT: u32 = 50;

    /// Points a read of `bytes` costs.
    #[inline]
    pub fn cost(&self, bytes: usize) -> u32 {
        let per = self.bytes_per_point.max(1) as usize;
        let extra = (bytes / per).min(u32::MAX as usize - 1) as u32;
        extra + 1
    }
}

impl Default for FloodPolicy {
    fn default() -> Self {
        FloodPolicy {
            limit: Self::DEFAULT_LIMIT,
            decay_per_tick: Self::DEFAULT_DECAY,
            bytes_per_point: Self::DEFAULT_BYTES_PER_POINT,
        }
    }
}

/// Per-connection point counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct FloodMeter {
    points: u32,
    exempt: bool,
}

impl FloodMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge a read. Returns true when the connection is now flooding.
    pub fn charge(&mut self, policy: &FloodPolicy, bytes: usize) -> bool {
        if self.exempt {
            return false;
        }
        self.points = self.points.saturating_add(policy.cost(bytes));
        self.points > policy.limit
    }

    /// Forgive one tick's worth of points.
    pub fn decay(&mut self, policy: &FloodPolicy) {
        self.points = self.points.saturating_sub(policy.decay_per_tick);
    }

    #[inline]
    pub fn points(&self) -> u32 {
        self.points
    }

    #[inline]
    pub fn is_exempt(&self) -> bool {
        self.exempt
    }

    pub fn set_exempt(&mut self, exempt: bool) {
        self.exempt = exempt;
        if exempt {
            self.points = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost() {
        let policy = FloodPolicy::default();
        assert_eq!(policy.cost(0), 1);
        assert_eq!(policy.cost(49), 1);
        assert_eq!(policy.cost(50), 2);
        assert_eq!(policy.cost(500), 11);
    }

    #[test]
    fn test_charge_trips_past_limit() {
        let policy = FloodPolicy {
            limit: 3,
            decay_per_tick: 1,
            bytes_per_point: 100,
        };
        let mut meter = FloodMeter::new();
        assert!(!meter.charge(&policy, 10));
        assert!(!meter.charge(&policy, 10));
        assert!(!meter.charge(&policy, 10));
        assert!(meter.charge(&policy, 10));
        assert_eq!(meter.points(), 4);
    }

    #[test]
    fn test_decay_lets_slow_peers_through() {
        let policy = FloodPolicy {
            limit: 2,
            decay_per_tick: 1,
            bytes_per_point: 100,
        };
        let mut meter = FloodMeter::new();
        for _ in 0..50 {
            assert!(!meter.charge(&policy, 1));
            meter.decay(&policy);
        }
        assert_eq!(meter.points(), 0);
    }

    #[test]
    fn test_exempt_never_trips() {
        let policy = FloodPolicy {
            limit: 0,
            ..FloodPolicy::default()
        };
        let mut meter = FloodMeter::new();
        meter.set_exempt(true);
        assert!(!meter.charge(&policy, 1 << 20));
        assert_eq!(meter.points(), 0);
    }

    #[test]
    fn test_kick_reason_display() {
        assert_eq!(KickReason::Flooding.to_string(), "flooding");
        assert_eq!(KickReason::Crawling.to_string(), "crawling");
    }
}
