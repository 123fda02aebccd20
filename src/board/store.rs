// The row store behind a board, and the in-memory implementation.

use chrono::{DateTime, Utc};
use credit_ledger::*;
use log::{debug, info};
use snafu::prelude::*;

use std::sync::Mutex;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("store unavailable: {message}"))]
    Unavailable { message: String },
    #[snafu(display("{what} not found"))]
    NotFound { what: String },
    #[snafu(display("rejected by the store: {source}"))]
    Rejected { source: LedgerErrors },
    #[snafu(display("I/O error on {path}: {source}"))]
    Io {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("corrupt document {path}: {source}"))]
    Document {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("SQLite error during {operation}: {source}"))]
    Sqlite {
        source: rusqlite::Error,
        operation: String,
    },
    #[snafu(display("invalid timestamp {value:?} in the allocation log"))]
    Timestamp {
        source: chrono::ParseError,
        value: String,
    },
    #[snafu(display("store lock poisoned"))]
    Poisoned {},
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One accepted allocation, as recorded by the store.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct LogEntry {
    pub player_name: String,
    pub character_name: String,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

/// The operations a board needs from its backend.
///
/// Every call is a complete request/response round trip. Nothing is assumed to
/// be transactional across calls.
pub trait RowStore: Send + Sync {
    fn list_players(&self) -> StoreResult<Vec<Player>>;

    fn list_characters(&self) -> StoreResult<Vec<Character>>;

    fn insert_player(&self, name: &str) -> StoreResult<PlayerId>;

    fn insert_character(&self, name: &str) -> StoreResult<CharacterId>;

    /// Replaces all the allocations of one player.
    fn update_player_allocations(
        &self,
        player: PlayerId,
        allocations: &AllocationMap,
    ) -> StoreResult<()>;

    /// Applies a delta on the store side. The store checks the credit rules
    /// itself and records the allocation in its log.
    fn allocate(&self, player: PlayerId, character: CharacterId, amount: i64) -> StoreResult<()>;

    /// The most recent log entries, newest first.
    fn list_recent_allocation_log(&self, limit: usize) -> StoreResult<Vec<LogEntry>>;
}

/// The full content of a store, kept in memory.
///
/// Shared by the memory store and the JSON file store.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Tables {
    pub players: Vec<Player>,
    pub characters: Vec<Character>,
    /// Oldest first.
    pub log: Vec<LogEntry>,
    pub last_player_id: u64,
    pub last_character_id: u64,
}

impl Tables {
    pub fn insert_player(&mut self, name: &str) -> PlayerId {
        self.last_player_id += 1;
        let id = PlayerId(self.last_player_id);
        self.players.push(Player {
            id,
            name: name.to_string(),
            allocations: AllocationMap::new(),
        });
        id
    }

    pub fn insert_character(&mut self, name: &str) -> CharacterId {
        self.last_character_id += 1;
        let id = CharacterId(self.last_character_id);
        self.characters.push(Character {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn update_player_allocations(
        &mut self,
        pid: PlayerId,
        allocations: &AllocationMap,
    ) -> StoreResult<()> {
        let player = self
            .players
            .iter_mut()
            .find(|p| p.id == pid)
            .context(NotFoundSnafu {
                what: pid.to_string(),
            })?;
        player.allocations = allocations.clone();
        Ok(())
    }

    pub fn allocate(
        &mut self,
        pid: PlayerId,
        cid: CharacterId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let character_name = self
            .characters
            .iter()
            .find(|c| c.id == cid)
            .map(|c| c.name.clone())
            .context(NotFoundSnafu {
                what: cid.to_string(),
            })?;
        let player = self
            .players
            .iter_mut()
            .find(|p| p.id == pid)
            .context(NotFoundSnafu {
                what: pid.to_string(),
            })?;
        player.allocations = apply_delta(&player.allocations, cid, amount).context(RejectedSnafu)?;
        self.log.push(LogEntry {
            player_name: player.name.clone(),
            character_name,
            amount,
            timestamp: now,
        });
        Ok(())
    }

    pub fn recent_log(&self, limit: usize) -> Vec<LogEntry> {
        self.log.iter().rev().take(limit).cloned().collect()
    }
}

/// A store that keeps everything in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn with_tables(tables: Tables) -> MemoryStore {
        MemoryStore {
            tables: Mutex::new(tables),
        }
    }

    fn access<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut tables = self.tables.lock().map_err(|_| StoreError::Poisoned {})?;
        f(&mut tables)
    }
}

impl RowStore for MemoryStore {
    fn list_players(&self) -> StoreResult<Vec<Player>> {
        self.access(|t| Ok(t.players.clone()))
    }

    fn list_characters(&self) -> StoreResult<Vec<Character>> {
        self.access(|t| Ok(t.characters.clone()))
    }

    fn insert_player(&self, name: &str) -> StoreResult<PlayerId> {
        let id = self.access(|t| Ok(t.insert_player(name)))?;
        info!("memory store: inserted player {:?} as {}", name, id);
        Ok(id)
    }

    fn insert_character(&self, name: &str) -> StoreResult<CharacterId> {
        let id = self.access(|t| Ok(t.insert_character(name)))?;
        info!("memory store: inserted character {:?} as {}", name, id);
        Ok(id)
    }

    fn update_player_allocations(
        &self,
        player: PlayerId,
        allocations: &AllocationMap,
    ) -> StoreResult<()> {
        debug!("memory store: {} <- {:?}", player, allocations);
        self.access(|t| t.update_player_allocations(player, allocations))
    }

    fn allocate(&self, player: PlayerId, character: CharacterId, amount: i64) -> StoreResult<()> {
        self.access(|t| t.allocate(player, character, amount, Utc::now()))
    }

    fn list_recent_allocation_log(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        self.access(|t| Ok(t.recent_log(limit)))
    }
}
