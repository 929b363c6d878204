//! Pipeline phase names.

use crate::{ConfigError, Result};

/// The eight phases of a package pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    RecipeFetch,
    Check,
    Fetch,
    Stage,
    Build,
    Install,
    Deploy,
    Completion,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::RecipeFetch,
        Phase::Check,
        Phase::Fetch,
        Phase::Stage,
        Phase::Build,
        Phase::Install,
        Phase::Deploy,
        Phase::Completion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::RecipeFetch => "recipe_fetch",
            Phase::Check => "check",
            Phase::Fetch => "fetch",
            Phase::Stage => "stage",
            Phase::Build => "build",
            Phase::Install => "install",
            Phase::Deploy => "deploy",
            Phase::Completion => "completion",
        }
    }

    pub fn parse(name: &str) -> Result<Phase> {
        Phase::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| ConfigError::UnknownPhase(name.to_string()))
    }

    /// Index into per-node phase slot arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::parse(phase.name()).unwrap(), phase);
        }
    }

    #[test]
    fn unknown_name_fails() {
        assert!(Phase::parse("unpack").is_err());
    }

    #[test]
    fn order_matches_pipeline() {
        assert!(Phase::RecipeFetch < Phase::Check);
        assert!(Phase::Check < Phase::Fetch);
        assert!(Phase::Deploy < Phase::Completion);
        assert_eq!(Phase::RecipeFetch.index(), 0);
        assert_eq!(Phase::Completion.index(), 7);
    }
}
