// A store backed by a SQLite database.

use chrono::{DateTime, Utc};
use credit_ledger::*;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use snafu::prelude::*;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::board::store::*;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS players (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS characters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS votes (
    player_id INTEGER NOT NULL REFERENCES players(id),
    character_id INTEGER NOT NULL REFERENCES characters(id),
    weight INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (player_id, character_id)
);
CREATE TABLE IF NOT EXISTS allocation_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_name TEXT NOT NULL,
    character_name TEXT NOT NULL,
    amount INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_votes_player ON votes(player_id, position);
";

/// A store kept in a SQLite database.
///
/// The allocations of a player are rows of the `votes` table. A full update
/// and a server-side allocation each run in their own SQLite transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<SqliteStore> {
        info!("sqlite store: opening {}", path.display());
        let conn = Connection::open(path).context(SqliteSnafu { operation: "open" })?;
        SqliteStore::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<SqliteStore> {
        let conn = Connection::open_in_memory().context(SqliteSnafu { operation: "open" })?;
        SqliteStore::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<SqliteStore> {
        conn.execute_batch(SCHEMA)
            .context(SqliteSnafu { operation: "setup" })?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned {})
    }
}

fn read_allocations(conn: &Connection, pid: i64) -> rusqlite::Result<AllocationMap> {
    let mut stmt = conn.prepare_cached(
        "SELECT character_id, weight FROM votes WHERE player_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![pid], |row| {
        Ok((CharacterId(row.get::<_, i64>(0)? as u64), row.get::<_, i64>(1)?))
    })?;
    let entries = rows.collect::<rusqlite::Result<Vec<(CharacterId, i64)>>>()?;
    Ok(AllocationMap::from_entries(entries))
}

fn write_allocations(
    conn: &Connection,
    pid: i64,
    allocations: &AllocationMap,
) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM votes WHERE player_id = ?1", params![pid])?;
    for (position, (cid, weight)) in allocations.iter().enumerate() {
        conn.execute(
            "INSERT INTO votes (player_id, character_id, weight, position) VALUES (?1, ?2, ?3, ?4)",
            params![pid, cid.0 as i64, weight, position as i64],
        )?;
    }
    Ok(())
}

fn player_name(conn: &Connection, pid: i64) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM players WHERE id = ?1",
        params![pid],
        |row| row.get(0),
    )
    .optional()
}

fn character_name(conn: &Connection, cid: i64) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM characters WHERE id = ?1",
        params![cid],
        |row| row.get(0),
    )
    .optional()
}

impl RowStore for SqliteStore {
    fn list_players(&self) -> StoreResult<Vec<Player>> {
        let conn = self.conn()?;
        let read = || -> rusqlite::Result<Vec<Player>> {
            let mut stmt = conn.prepare("SELECT id, name FROM players ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<(i64, String)>>>()?;
            let mut players: Vec<Player> = Vec::with_capacity(rows.len());
            for (id, name) in rows {
                players.push(Player {
                    id: PlayerId(id as u64),
                    name,
                    allocations: read_allocations(&conn, id)?,
                });
            }
            Ok(players)
        };
        read().context(SqliteSnafu {
            operation: "list_players",
        })
    }

    fn list_characters(&self) -> StoreResult<Vec<Character>> {
        let conn = self.conn()?;
        let read = || -> rusqlite::Result<Vec<Character>> {
            let mut stmt = conn.prepare("SELECT id, name FROM characters ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(Character {
                    id: CharacterId(row.get::<_, i64>(0)? as u64),
                    name: row.get(1)?,
                })
            })?;
            rows.collect()
        };
        read().context(SqliteSnafu {
            operation: "list_characters",
        })
    }

    fn insert_player(&self, name: &str) -> StoreResult<PlayerId> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO players (name) VALUES (?1)", params![name])
            .context(SqliteSnafu {
                operation: "insert_player",
            })?;
        let id = PlayerId(conn.last_insert_rowid() as u64);
        debug!("sqlite store: inserted player {:?} as {}", name, id);
        Ok(id)
    }

    fn insert_character(&self, name: &str) -> StoreResult<CharacterId> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO characters (name) VALUES (?1)", params![name])
            .context(SqliteSnafu {
                operation: "insert_character",
            })?;
        let id = CharacterId(conn.last_insert_rowid() as u64);
        debug!("sqlite store: inserted character {:?} as {}", name, id);
        Ok(id)
    }

    fn update_player_allocations(
        &self,
        player: PlayerId,
        allocations: &AllocationMap,
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let pid = player.0 as i64;
        let tx = conn.transaction().context(SqliteSnafu {
            operation: "update_player_allocations",
        })?;
        let exists = player_name(&tx, pid)
            .context(SqliteSnafu {
                operation: "update_player_allocations",
            })?
            .is_some();
        ensure!(
            exists,
            NotFoundSnafu {
                what: player.to_string()
            }
        );
        write_allocations(&tx, pid, allocations)
            .and_then(|_| tx.commit())
            .context(SqliteSnafu {
                operation: "update_player_allocations",
            })
    }

    fn allocate(&self, player: PlayerId, character: CharacterId, amount: i64) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let pid = player.0 as i64;
        let cid = character.0 as i64;
        let tx = conn.transaction().context(SqliteSnafu {
            operation: "allocate",
        })?;
        let pname = player_name(&tx, pid)
            .context(SqliteSnafu {
                operation: "allocate",
            })?
            .context(NotFoundSnafu {
                what: player.to_string(),
            })?;
        let cname = character_name(&tx, cid)
            .context(SqliteSnafu {
                operation: "allocate",
            })?
            .context(NotFoundSnafu {
                what: character.to_string(),
            })?;
        let current = read_allocations(&tx, pid).context(SqliteSnafu {
            operation: "allocate",
        })?;
        let next = apply_delta(&current, character, amount).context(RejectedSnafu)?;
        let now = Utc::now().to_rfc3339();
        write_allocations(&tx, pid, &next)
            .and_then(|_| {
                tx.execute(
                    "INSERT INTO allocation_log (player_name, character_name, amount, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![pname, cname, amount, now],
                )
            })
            .and_then(|_| tx.commit())
            .context(SqliteSnafu {
                operation: "allocate",
            })
    }

    fn list_recent_allocation_log(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let conn = self.conn()?;
        let read = || -> rusqlite::Result<Vec<(String, String, i64, String)>> {
            let mut stmt = conn.prepare(
                "SELECT player_name, character_name, amount, created_at
                 FROM allocation_log ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            rows.collect()
        };
        let rows = read().context(SqliteSnafu {
            operation: "list_recent_allocation_log",
        })?;
        let mut res: Vec<LogEntry> = Vec::with_capacity(rows.len());
        for (player_name, character_name, amount, created_at) in rows {
            let timestamp = DateTime::parse_from_rfc3339(&created_at)
                .context(TimestampSnafu {
                    value: created_at.clone(),
                })?
                .with_timezone(&Utc);
            res.push(LogEntry {
                player_name,
                character_name,
                amount,
                timestamp,
            });
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p1 = store.insert_player("Anna").unwrap();
        let p2 = store.insert_player("Bob").unwrap();
        let a = store.insert_character("Simon").unwrap();
        let b = store.insert_character("Daphne").unwrap();

        store
            .update_player_allocations(p1, &AllocationMap::from_entries([(b, 20), (a, -10)]))
            .unwrap();
        store.allocate(p2, a, 5).unwrap();
        store.allocate(p2, a, -5).unwrap();

        let players = store.list_players().unwrap();
        assert_eq!(players.len(), 2);
        let entries: Vec<(CharacterId, i64)> = players[0].allocations.iter().collect();
        assert_eq!(entries, vec![(b, 20), (a, -10)]);
        // Back to zero: no row left.
        assert!(players[1].allocations.is_empty());

        let names: Vec<String> = store
            .list_characters()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Simon", "Daphne"]);

        let log = store.list_recent_allocation_log(50).unwrap();
        let amounts: Vec<i64> = log.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![-5, 5]);
        assert_eq!(store.list_recent_allocation_log(1).unwrap().len(), 1);
    }

    #[test]
    fn allocate_is_validated() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = store.insert_player("Anna").unwrap();
        let a = store.insert_character("Simon").unwrap();
        store.allocate(p, a, 100).unwrap();
        assert!(matches!(
            store.allocate(p, a, 1),
            Err(StoreError::Rejected { .. })
        ));
        assert!(matches!(
            store.allocate(PlayerId(99), a, 1),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.update_player_allocations(PlayerId(99), &AllocationMap::new()),
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.list_recent_allocation_log(50).unwrap().len(), 1);
    }

    #[test]
    fn persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.sqlite");
        let (p, a) = {
            let store = SqliteStore::open(&path).unwrap();
            let p = store.insert_player("Anna").unwrap();
            let a = store.insert_character("Simon").unwrap();
            store.allocate(p, a, -7).unwrap();
            (p, a)
        };
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_players().unwrap()[0].allocations.get(a), -7);
        assert_eq!(store.list_players().unwrap()[0].id, p);
    }
}
