//! Node identity and hierarchy level.

use std::fmt;

/// Dense, monotonically allocated node identifier.
///
/// Ids are never reused (invariant 1, §3). `INVALID` marks an absent
/// edge (no parent, no sibling, no child).
pub type NodeId = u32;

/// Sentinel for "no such node".
pub const INVALID: NodeId = u32::MAX;

/// Five-level hierarchy, ordered bottom-up. `Level as u8` is the on-disk
/// representation stored in the relations `level` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Statement = 0,
    Block = 1,
    Message = 2,
    Session = 3,
    Agent = 4,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Statement,
        Level::Block,
        Level::Message,
        Level::Session,
        Level::Agent,
    ];

    pub fn from_u8(v: u8) -> Option<Level> {
        match v {
            0 => Some(Level::Statement),
            1 => Some(Level::Block),
            2 => Some(Level::Message),
            3 => Some(Level::Session),
            4 => Some(Level::Agent),
            _ => None,
        }
    }

    /// `TOKEN_COST` published constant for §4.9 budget truncation.
    pub fn token_cost(self) -> u32 {
        match self {
            Level::Statement => 50,
            Level::Block => 200,
            Level::Message => 500,
            Level::Session => 1000,
            Level::Agent => 2000,
        }
    }

    /// `LEVEL_BOOST` published constant for §4.9 fused scoring.
    pub fn boost(self) -> f32 {
        match self {
            Level::Statement => 0.0,
            Level::Block => 0.25,
            Level::Message => 0.5,
            Level::Session => 0.75,
            Level::Agent => 1.0,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Statement => "statement",
            Level::Block => "block",
            Level::Message => "message",
            Level::Session => "session",
            Level::Agent => "agent",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_hierarchy() {
        assert!(Level::Statement < Level::Block);
        assert!(Level::Block < Level::Message);
        assert!(Level::Message < Level::Session);
        assert!(Level::Session < Level::Agent);
    }

    #[test]
    fn round_trips_through_u8() {
        for level in Level::ALL {
            assert_eq!(Level::from_u8(level as u8), Some(level));
        }
        assert_eq!(Level::from_u8(5), None);
    }

    #[test]
    fn token_costs_match_published_constants() {
        assert_eq!(Level::Statement.token_cost(), 50);
        assert_eq!(Level::Agent.token_cost(), 2000);
    }
}
