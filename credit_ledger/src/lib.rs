mod config;
pub mod batch;
pub mod builder;
pub mod manual;

use log::{debug, info, warn};

use std::collections::HashSet;

pub use crate::config::*;

// **** Credit calculator ****

/// The number of credits consumed by these allocations.
///
/// Saturates instead of overflowing, so that a corrupt map read from a store
/// still counts as over budget.
pub fn spent_credits(allocations: &AllocationMap) -> i64 {
    allocations
        .iter()
        .map(|(_, w)| w.saturating_abs())
        .fold(0, i64::saturating_add)
}

/// The number of credits the player may still distribute.
///
/// An empty map leaves the full budget available.
pub fn remaining_credits(allocations: &AllocationMap) -> i64 {
    CREDIT_BUDGET - spent_credits(allocations)
}

/// Trims a player or character name, refusing names that are blank.
pub fn validate_name(name: &str) -> Result<String, LedgerErrors> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LedgerErrors::EmptyName);
    }
    Ok(trimmed.to_string())
}

// **** Vote applier ****

/// Applies a signed delta to the weight of one character and returns the new allocations.
///
/// The change is accepted if it withdraws an existing vote (the delta has the
/// opposite sign of the current weight), or if the remaining credits cover the
/// delta. A weight brought back to zero is removed from the map.
///
/// The input map is never modified.
pub fn apply_delta(
    allocations: &AllocationMap,
    character: CharacterId,
    delta: i64,
) -> Result<AllocationMap, LedgerErrors> {
    if delta == 0 {
        return Err(LedgerErrors::ZeroDelta);
    }
    let current = allocations.get(character);
    let remaining = remaining_credits(allocations);

    // The largest accepted move is a full withdrawal that overshoots to the
    // full budget on the other side.
    let new_weight = match current.checked_add(delta) {
        Some(w) if delta.unsigned_abs() <= 2 * CREDIT_BUDGET.unsigned_abs() => w,
        _ => {
            debug!(
                "apply_delta: rejecting out of range delta {} on {:?}",
                delta, character
            );
            return Err(LedgerErrors::InsufficientCredits {
                remaining,
                requested: i64::try_from(delta.unsigned_abs()).unwrap_or(i64::MAX),
            });
        }
    };

    let is_withdrawal = delta.signum() * current.signum() < 0;
    if !is_withdrawal && remaining < delta.abs() {
        debug!(
            "apply_delta: rejecting {:?} delta {} (current {}, remaining {})",
            character, delta, current, remaining
        );
        return Err(LedgerErrors::InsufficientCredits {
            remaining,
            requested: delta.abs(),
        });
    }

    let mut res = allocations.clone();
    res.set(character, new_weight);

    // A withdrawal may overshoot past zero to the other sign. It is only valid
    // while the result still fits in the budget.
    if spent_credits(&res) > CREDIT_BUDGET {
        debug!(
            "apply_delta: rejecting overshooting withdrawal on {:?}: {} -> {}",
            character, current, new_weight
        );
        return Err(LedgerErrors::InsufficientCredits {
            remaining,
            requested: new_weight.saturating_abs() - current.saturating_abs(),
        });
    }
    Ok(res)
}

/// Applies a delta for a player of the snapshot.
///
/// Both the player and the character must be part of the snapshot.
pub fn apply_vote(
    snapshot: &Snapshot,
    player: PlayerId,
    character: CharacterId,
    delta: i64,
) -> Result<AppliedVote, LedgerErrors> {
    let p = snapshot
        .player(player)
        .ok_or(LedgerErrors::UnknownPlayer(player))?;
    if snapshot.character(character).is_none() {
        return Err(LedgerErrors::UnknownCharacter(character));
    }
    let allocations = apply_delta(&p.allocations, character, delta)?;
    let res = AppliedVote {
        player,
        character,
        previous_weight: p.allocations.get(character),
        weight: allocations.get(character),
        allocations,
    };
    info!(
        "apply_vote: {} {}: {} -> {} (remaining credits: {})",
        p.name,
        character,
        res.previous_weight,
        res.weight,
        remaining_credits(&res.allocations)
    );
    Ok(res)
}

// **** Aggregator ****

/// All the characters that received a non-zero vote, in the order they are
/// first encountered (players in order, then allocations in order).
pub fn discover_characters(players: &[Player]) -> Vec<CharacterId> {
    let mut seen: HashSet<CharacterId> = HashSet::new();
    let mut res: Vec<CharacterId> = Vec::new();
    for p in players.iter() {
        for (cid, weight) in p.allocations.iter() {
            if weight != 0 && seen.insert(cid) {
                res.push(cid);
            }
        }
    }
    res
}

/// The sum of the weights given to this character by all the players.
pub fn total_score(players: &[Player], character: CharacterId) -> i64 {
    players.iter().map(|p| p.allocations.get(character)).sum()
}

/// Ranks the characters by decreasing score.
///
/// The characters that received votes come first in discovery order, followed
/// by the registered characters nobody voted for. Ties keep this order.
pub fn rank_characters(
    snapshot: &Snapshot,
    mode: RankingMode,
    selected: Option<PlayerId>,
) -> Result<Vec<RankingRow>, LedgerErrors> {
    let selected_player: Option<&Player> = match selected {
        Some(pid) => Some(
            snapshot
                .player(pid)
                .ok_or(LedgerErrors::UnknownPlayer(pid))?,
        ),
        None => None,
    };

    let mut roster = discover_characters(&snapshot.players);
    for c in snapshot.characters.iter() {
        if !roster.contains(&c.id) {
            roster.push(c.id);
        }
    }

    let mut rows: Vec<RankingRow> = roster
        .iter()
        .map(|cid| {
            let name = match snapshot.character(*cid) {
                Some(c) => c.name.clone(),
                None => {
                    warn!("rank_characters: no record for {}", cid);
                    cid.to_string()
                }
            };
            RankingRow {
                rank: 0,
                character: *cid,
                name,
                total_score: total_score(&snapshot.players, *cid),
                own_score: selected_player.map(|p| p.allocations.get(*cid)),
            }
        })
        .collect();

    // sort_by is stable: equal scores stay in discovery order.
    match (mode, selected_player) {
        (RankingMode::OwnScore, Some(_)) => {
            rows.sort_by(|a, b| b.own_score.cmp(&a.own_score));
        }
        _ => {
            rows.sort_by(|a, b| b.total_score.cmp(&a.total_score));
        }
    }
    for (idx, row) in rows.iter_mut().enumerate() {
        row.rank = idx + 1;
    }
    debug!("rank_characters: {:?} -> {:?}", mode, rows);
    Ok(rows)
}

/// The character with the highest weight and the one with the lowest weight.
/// When several characters share the extreme weight, the first one wins.
pub fn player_favorites(player: &Player) -> Favorites {
    let mut iter = player.allocations.iter();
    let first = match iter.next() {
        Some(entry) => entry,
        None => return Favorites::None,
    };
    let mut favorite = first;
    let mut least_favorite = first;
    for entry in iter {
        if entry.1 > favorite.1 {
            favorite = entry;
        }
        if entry.1 < least_favorite.1 {
            least_favorite = entry;
        }
    }
    Favorites::Some {
        favorite,
        least_favorite,
    }
}
