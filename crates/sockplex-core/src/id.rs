//! Identifier types
//!
//! A [`ConnId`] pairs a slot index with the generation the slot had when the
//! connection was enqueued. Slots are reused, generations are not, so a
//! stale id never resolves to a newer connection in the same slot.

use core::fmt;

/// Identity of a registered connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId {
    index: u32,
    generation: u32,
}

impl ConnId {
    /// Sentinel for "not registered"
    pub const NONE: ConnId = ConnId {
        index: u32::MAX,
        generation: 0,
    };

    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        ConnId { index, generation }
    }

    /// Slot index in the registry table
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get the index as usize for table lookups
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.index == u32::MAX
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<ConnId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "ConnId(NONE)")
        } else {
            write!(f, "ConnId({}#{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}.{}", self.index, self.generation)
        }
    }
}

impl Default for ConnId {
    fn default() -> Self {
        ConnId::NONE
    }
}

/// Handle of a registered server instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerKey(pub u32);

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srv{}", self.0)
    }
}

/// Handle of a running coserver worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoserverKey(pub u32);

impl fmt::Display for CoserverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "co{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_id_basics() {
        let id = ConnId::new(7, 3);
        assert_eq!(id.index(), 7);
        assert_eq!(id.as_usize(), 7);
        assert_eq!(id.generation(), 3);
        assert!(!id.is_none());
        assert_eq!(id.to_option(), Some(id));
    }

    #[test]
    fn test_conn_id_none() {
        let none = ConnId::default();
        assert!(none.is_none());
        assert_eq!(none.to_option(), None);
        assert_eq!(none.to_string(), "none");
    }

    #[test]
    fn test_conn_id_generation_distinguishes() {
        let old = ConnId::new(4, 1);
        let new = ConnId::new(4, 2);
        assert_ne!(old, new);
        assert_eq!(format!("{:?}", new), "ConnId(4#2)");
        assert_eq!(new.to_string(), "4.2");
    }

    #[test]
    fn test_keys_display() {
        assert_eq!(ServerKey(2).to_string(), "srv2");
        assert_eq!(CoserverKey(0).to_string(), "co0");
    }
}
