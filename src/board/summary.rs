use crate::board::session::*;
use crate::board::*;

use serde_json::{json, Map as JSMap};

fn ranking_to_json(rows: &[RankingRow]) -> Vec<JSValue> {
    rows.iter()
        .map(|r| {
            let mut row: JSMap<String, JSValue> = JSMap::new();
            row.insert("rank".to_string(), json!(r.rank));
            row.insert("character".to_string(), json!(r.name));
            row.insert("totalScore".to_string(), json!(r.total_score));
            if let Some(own) = r.own_score {
                row.insert("ownScore".to_string(), json!(own));
            }
            JSValue::Object(row)
        })
        .collect()
}

fn favorites_to_json(rows: &[FavoritesRow]) -> Vec<JSValue> {
    let pick = |x: &Option<(String, i64)>| match x {
        Some((name, weight)) => json!({ "character": name, "weight": weight }),
        None => JSValue::Null,
    };
    rows.iter()
        .map(|r| {
            json!({
                "player": r.player,
                "remainingCredits": r.credits,
                "favorite": pick(&r.favorite),
                "leastFavorite": pick(&r.least_favorite),
            })
        })
        .collect()
}

/// The state of a board as a JSON document.
pub fn build_summary_js(
    board_name: &str,
    state: &BoardState,
    ranking: &[RankingRow],
    favorites: &[FavoritesRow],
) -> JSValue {
    let mode = match state.ranking_mode {
        RankingMode::GroupScore => "groupScore",
        RankingMode::OwnScore => "ownScore",
    };
    let log: Vec<JSValue> = state
        .log
        .iter()
        .map(|e| {
            json!({
                "player": e.player_name,
                "character": e.character_name,
                "amount": e.amount,
                "timestamp": e.timestamp.to_rfc3339(),
            })
        })
        .collect();
    json!({
        "config": {
            "boardName": board_name,
            "creditBudget": CREDIT_BUDGET,
            "rankingMode": mode,
            "players": state.snapshot.players.len(),
            "characters": state.snapshot.characters.len(),
        },
        "ranking": ranking_to_json(ranking),
        "players": favorites_to_json(favorites),
        "recentAllocations": log,
    })
}
