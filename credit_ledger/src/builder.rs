pub use crate::config::*;

use crate::{remaining_credits, validate_name};

/// A builder for assembling snapshots by name.
///
/// Identifiers are assigned in registration order, starting at 1. It is meant
/// for fixtures, demos and imports; a live board gets its snapshots from a store.
///
/// ```
/// use credit_ledger::builder::SnapshotBuilder;
/// use credit_ledger::{remaining_credits, LedgerErrors};
///
/// let snapshot = SnapshotBuilder::new()
///     .characters(&["Daphne", "Simon"])?
///     .player("Anna")?
///     .allocation("Anna", "Simon", 30)?
///     .build();
///
/// let anna = snapshot.player_by_name("Anna").unwrap();
/// assert_eq!(remaining_credits(&anna.allocations), 70);
///
/// # Ok::<(), LedgerErrors>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    _players: Vec<Player>,
    _characters: Vec<Character>,
}

impl SnapshotBuilder {
    pub fn new() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn player(mut self, name: &str) -> Result<SnapshotBuilder, LedgerErrors> {
        let name = validate_name(name)?;
        let id = PlayerId(self._players.len() as u64 + 1);
        self._players.push(Player {
            id,
            name,
            allocations: AllocationMap::new(),
        });
        Ok(self)
    }

    pub fn character(mut self, name: &str) -> Result<SnapshotBuilder, LedgerErrors> {
        let name = validate_name(name)?;
        let id = CharacterId(self._characters.len() as u64 + 1);
        self._characters.push(Character { id, name });
        Ok(self)
    }

    pub fn characters(self, names: &[&str]) -> Result<SnapshotBuilder, LedgerErrors> {
        names.iter().try_fold(self, |b, name| b.character(name))
    }

    /// Sets the weight of a player for a character, replacing any previous weight.
    ///
    /// Unlike a vote, this does not look at the sign of the change: the only
    /// requirement is that the player stays within the credit budget.
    pub fn allocation(
        mut self,
        player: &str,
        character: &str,
        weight: i64,
    ) -> Result<SnapshotBuilder, LedgerErrors> {
        let cid = self
            ._characters
            .iter()
            .find(|c| c.name == character)
            .map(|c| c.id)
            .ok_or(LedgerErrors::UnknownCharacter(CharacterId(0)))?;
        let p = self
            ._players
            .iter_mut()
            .find(|p| p.name == player)
            .ok_or(LedgerErrors::UnknownPlayer(PlayerId(0)))?;
        let mut allocations = p.allocations.clone();
        allocations.set(cid, weight);
        let remaining = remaining_credits(&allocations);
        if remaining < 0 {
            return Err(LedgerErrors::InsufficientCredits {
                remaining: remaining_credits(&p.allocations),
                requested: weight.saturating_abs(),
            });
        }
        p.allocations = allocations;
        Ok(self)
    }

    pub fn build(self) -> Snapshot {
        Snapshot::new(self._players, self._characters)
    }
}
