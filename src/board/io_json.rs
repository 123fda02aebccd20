// A store persisted as a single JSON document.

use chrono::{DateTime, Utc};
use credit_ledger::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::board::store::*;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
struct VoteRow {
    #[serde(rename = "characterId")]
    character_id: u64,
    weight: i64,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
struct PlayerRow {
    id: u64,
    #[serde(rename = "playerName")]
    name: String,
    // A list rather than an object, to keep the order of the votes.
    #[serde(default)]
    votes: Vec<VoteRow>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
struct CharacterRow {
    id: u64,
    name: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
struct LogRow {
    #[serde(rename = "playerName")]
    player_name: String,
    #[serde(rename = "characterName")]
    character_name: String,
    amount: i64,
    timestamp: DateTime<Utc>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
struct BoardDocument {
    #[serde(rename = "lastPlayerId", default)]
    last_player_id: u64,
    #[serde(rename = "lastCharacterId", default)]
    last_character_id: u64,
    #[serde(default)]
    players: Vec<PlayerRow>,
    #[serde(default)]
    characters: Vec<CharacterRow>,
    #[serde(rename = "allocationLog", default)]
    allocation_log: Vec<LogRow>,
}

impl BoardDocument {
    fn from_tables(t: &Tables) -> BoardDocument {
        BoardDocument {
            last_player_id: t.last_player_id,
            last_character_id: t.last_character_id,
            players: t
                .players
                .iter()
                .map(|p| PlayerRow {
                    id: p.id.0,
                    name: p.name.clone(),
                    votes: p
                        .allocations
                        .iter()
                        .map(|(cid, weight)| VoteRow {
                            character_id: cid.0,
                            weight,
                        })
                        .collect(),
                })
                .collect(),
            characters: t
                .characters
                .iter()
                .map(|c| CharacterRow {
                    id: c.id.0,
                    name: c.name.clone(),
                })
                .collect(),
            allocation_log: t
                .log
                .iter()
                .map(|e| LogRow {
                    player_name: e.player_name.clone(),
                    character_name: e.character_name.clone(),
                    amount: e.amount,
                    timestamp: e.timestamp,
                })
                .collect(),
        }
    }

    fn into_tables(self) -> Tables {
        let players: Vec<Player> = self
            .players
            .into_iter()
            .map(|row| Player {
                id: PlayerId(row.id),
                name: row.name,
                allocations: AllocationMap::from_entries(
                    row.votes
                        .iter()
                        .map(|v| (CharacterId(v.character_id), v.weight)),
                ),
            })
            .collect();
        let characters: Vec<Character> = self
            .characters
            .into_iter()
            .map(|row| Character {
                id: CharacterId(row.id),
                name: row.name,
            })
            .collect();
        // Documents written by hand may omit the counters.
        let max_player = players.iter().map(|p| p.id.0).max().unwrap_or(0);
        let max_character = characters.iter().map(|c| c.id.0).max().unwrap_or(0);
        Tables {
            players,
            characters,
            log: self
                .allocation_log
                .into_iter()
                .map(|row| LogEntry {
                    player_name: row.player_name,
                    character_name: row.character_name,
                    amount: row.amount,
                    timestamp: row.timestamp,
                })
                .collect(),
            last_player_id: self.last_player_id.max(max_player),
            last_character_id: self.last_character_id.max(max_character),
        }
    }
}

/// A store kept in one JSON file.
///
/// The document is read once when the store is opened. Each mutation is applied
/// to a copy of the tables, which replaces the file (through a temporary file
/// and a rename) before becoming the current state.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Opens the document at this path. A missing file is an empty board; the
    /// file gets created by the first change.
    pub fn open(path: &Path) -> StoreResult<JsonFileStore> {
        let display = path.display().to_string();
        let tables = if path.exists() {
            let contents = fs::read_to_string(path).context(IoSnafu {
                path: display.clone(),
            })?;
            let doc: BoardDocument =
                serde_json::from_str(contents.as_str()).context(DocumentSnafu {
                    path: display.clone(),
                })?;
            doc.into_tables()
        } else {
            info!("json store: {} does not exist yet, starting empty", display);
            Tables::default()
        };
        debug!(
            "json store: opened {} with {} players and {} characters",
            display,
            tables.players.len(),
            tables.characters.len()
        );
        Ok(JsonFileStore {
            path: path.to_path_buf(),
            tables: Mutex::new(tables),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
        let tables = self.tables.lock().map_err(|_| StoreError::Poisoned {})?;
        Ok(f(&tables))
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut tables = self.tables.lock().map_err(|_| StoreError::Poisoned {})?;
        let mut next = tables.clone();
        let res = f(&mut next)?;
        self.persist(&next)?;
        *tables = next;
        Ok(res)
    }

    fn persist(&self, tables: &Tables) -> StoreResult<()> {
        let display = self.path.display().to_string();
        let doc = BoardDocument::from_tables(tables);
        let contents = serde_json::to_string_pretty(&doc).context(DocumentSnafu {
            path: display.clone(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents).context(IoSnafu {
            path: tmp.display().to_string(),
        })?;
        fs::rename(&tmp, &self.path).context(IoSnafu { path: display })?;
        Ok(())
    }
}

impl RowStore for JsonFileStore {
    fn list_players(&self) -> StoreResult<Vec<Player>> {
        self.read(|t| t.players.clone())
    }

    fn list_characters(&self) -> StoreResult<Vec<Character>> {
        self.read(|t| t.characters.clone())
    }

    fn insert_player(&self, name: &str) -> StoreResult<PlayerId> {
        self.mutate(|t| Ok(t.insert_player(name)))
    }

    fn insert_character(&self, name: &str) -> StoreResult<CharacterId> {
        self.mutate(|t| Ok(t.insert_character(name)))
    }

    fn update_player_allocations(
        &self,
        player: PlayerId,
        allocations: &AllocationMap,
    ) -> StoreResult<()> {
        self.mutate(|t| t.update_player_allocations(player, allocations))
    }

    fn allocate(&self, player: PlayerId, character: CharacterId, amount: i64) -> StoreResult<()> {
        self.mutate(|t| t.allocate(player, character, amount, Utc::now()))
    }

    fn list_recent_allocation_log(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        self.read(|t| t.recent_log(limit))
    }
}
