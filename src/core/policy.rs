//! Persistence and idempotence settings that govern what gets logged and
//! what may be safely re-executed.

use super::error::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Controls how aggressively the engine persists side-effect results.
///
/// A per-worker, mutable setting consulted by the execution context before
/// every imported-function append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PersistenceLevel {
    /// Skip durability work entirely. Fastest, least safe: every effect is
    /// re-executed on recovery.
    PersistNothing,
    /// Log only externally observable effects; read-only local operations
    /// are re-executed on recovery.
    PersistRemoteSideEffects,
    /// Let the engine decide per operation. Currently logs everything.
    #[default]
    Smart,
}

impl PersistenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceLevel::PersistNothing => "PERSIST_NOTHING",
            PersistenceLevel::PersistRemoteSideEffects => "PERSIST_REMOTE_SIDE_EFFECTS",
            PersistenceLevel::Smart => "SMART",
        }
    }
}

impl FromStr for PersistenceLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERSIST_NOTHING" => Ok(PersistenceLevel::PersistNothing),
            "PERSIST_REMOTE_SIDE_EFFECTS" => Ok(PersistenceLevel::PersistRemoteSideEffects),
            "SMART" => Ok(PersistenceLevel::Smart),
            _ => Err(Error::InvalidPersistenceLevel(s.to_string())),
        }
    }
}

/// Classifies a host-side effect for persistence decisions.
///
/// `WriteRemote` effects are always logged (except under `PersistNothing`);
/// `ReadLocal` effects are logged only under `Smart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    ReadLocal,
    WriteRemote,
}

impl PersistenceLevel {
    /// Whether an effect of the given kind should be written to the oplog.
    pub fn should_persist(&self, kind: EffectKind) -> bool {
        match self {
            PersistenceLevel::PersistNothing => false,
            PersistenceLevel::PersistRemoteSideEffects => kind == EffectKind::WriteRemote,
            PersistenceLevel::Smart => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_level_roundtrip() {
        for level in [
            PersistenceLevel::PersistNothing,
            PersistenceLevel::PersistRemoteSideEffects,
            PersistenceLevel::Smart,
        ] {
            assert_eq!(level.as_str().parse::<PersistenceLevel>().unwrap(), level);
        }
        assert!("BOGUS".parse::<PersistenceLevel>().is_err());
    }

    #[test]
    fn test_should_persist() {
        assert!(!PersistenceLevel::PersistNothing.should_persist(EffectKind::WriteRemote));
        assert!(PersistenceLevel::PersistRemoteSideEffects.should_persist(EffectKind::WriteRemote));
        assert!(!PersistenceLevel::PersistRemoteSideEffects.should_persist(EffectKind::ReadLocal));
        assert!(PersistenceLevel::Smart.should_persist(EffectKind::ReadLocal));
    }
}
