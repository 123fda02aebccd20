// ********* Ledger data structures ***********

use std::error::Error;
use std::fmt::Display;

/// The number of credits every player may distribute, measured as the sum of
/// the absolute values of their allocations.
pub const CREDIT_BUDGET: i64 = 100;

/// How many allocation log entries are shown by default.
pub const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct PlayerId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct CharacterId(pub u64);

impl Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

impl Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "character#{}", self.0)
    }
}

/// The signed weights a player gave to characters.
///
/// Entries keep the order in which the characters were first voted for. A
/// weight of zero is never stored: setting a weight to zero removes the entry.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct AllocationMap {
    // Invariant: no duplicated character, no zero weight.
    entries: Vec<(CharacterId, i64)>,
}

impl AllocationMap {
    pub fn new() -> AllocationMap {
        AllocationMap::default()
    }

    /// Builds a map from raw entries, as read from a store.
    /// Zero weights are dropped and a repeated character keeps its first position
    /// with the last weight.
    pub fn from_entries<I>(entries: I) -> AllocationMap
    where
        I: IntoIterator<Item = (CharacterId, i64)>,
    {
        let mut res = AllocationMap::new();
        for (cid, weight) in entries {
            res.set(cid, weight);
        }
        res
    }

    /// The weight for this character, 0 if the player never voted for it.
    pub fn get(&self, cid: CharacterId) -> i64 {
        self.entries
            .iter()
            .find(|(c, _)| *c == cid)
            .map(|(_, w)| *w)
            .unwrap_or(0)
    }

    pub fn contains(&self, cid: CharacterId) -> bool {
        self.entries.iter().any(|(c, _)| *c == cid)
    }

    pub fn set(&mut self, cid: CharacterId, weight: i64) {
        if weight == 0 {
            self.remove(cid);
            return;
        }
        match self.entries.iter_mut().find(|(c, _)| *c == cid) {
            Some(entry) => entry.1 = weight,
            None => self.entries.push((cid, weight)),
        }
    }

    pub fn remove(&mut self, cid: CharacterId) -> Option<i64> {
        let idx = self.entries.iter().position(|(c, _)| *c == cid)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CharacterId, i64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub allocations: AllocationMap,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
}

/// An immutable view of all the players and characters at one point in time.
///
/// The ledger functions never mutate a snapshot: they return new values.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Snapshot {
    pub players: Vec<Player>,
    pub characters: Vec<Character>,
}

impl Snapshot {
    pub fn new(players: Vec<Player>, characters: Vec<Character>) -> Snapshot {
        Snapshot {
            players,
            characters,
        }
    }

    pub fn player(&self, pid: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == pid)
    }

    pub fn character(&self, cid: CharacterId) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == cid)
    }

    /// The first player registered under this name.
    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn character_by_name(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    /// Returns a copy of this snapshot in which the given player holds the new allocations.
    pub fn with_allocations(
        &self,
        pid: PlayerId,
        allocations: AllocationMap,
    ) -> Result<Snapshot, LedgerErrors> {
        let mut res = self.clone();
        let player = res
            .players
            .iter_mut()
            .find(|p| p.id == pid)
            .ok_or(LedgerErrors::UnknownPlayer(pid))?;
        player.allocations = allocations;
        Ok(res)
    }
}

// ******** Output data structures *********

/// The result of accepting a delta for one player and one character.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct AppliedVote {
    pub player: PlayerId,
    pub character: CharacterId,
    pub previous_weight: i64,
    pub weight: i64,
    /// The complete allocation map of the player after the change.
    pub allocations: AllocationMap,
}

/// The key used to order the ranking.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum RankingMode {
    /// Sum of the weights over all the players.
    GroupScore,
    /// Weight given by the selected player. Without a selected player, this
    /// falls back to the group score.
    OwnScore,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RankingRow {
    pub rank: usize,
    pub character: CharacterId,
    pub name: String,
    pub total_score: i64,
    /// The weight of the selected player, if a player is selected.
    pub own_score: Option<i64>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Favorites {
    /// The player did not vote for anyone yet.
    None,
    Some {
        favorite: (CharacterId, i64),
        least_favorite: (CharacterId, i64),
    },
}

/// Errors that prevent a ledger operation from being applied.
/// No state is changed when one of them is returned.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum LedgerErrors {
    EmptyName,
    ZeroDelta,
    InsufficientCredits { remaining: i64, requested: i64 },
    UnknownPlayer(PlayerId),
    UnknownCharacter(CharacterId),
}

impl Error for LedgerErrors {}

impl Display for LedgerErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerErrors::EmptyName => write!(f, "name cannot be empty"),
            LedgerErrors::ZeroDelta => write!(f, "a vote must change the weight"),
            LedgerErrors::InsufficientCredits {
                remaining,
                requested,
            } => write!(
                f,
                "not enough credits: {} requested, {} remaining",
                requested, remaining
            ),
            LedgerErrors::UnknownPlayer(pid) => write!(f, "unknown player {}", pid),
            LedgerErrors::UnknownCharacter(cid) => write!(f, "unknown character {}", cid),
        }
    }
}
