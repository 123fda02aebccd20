// The state of one board session, kept in sync with a row store.

use credit_ledger::batch::BatchReport;
use credit_ledger::*;
use log::{debug, info, warn};
use snafu::prelude::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::board::store::*;
use crate::board::*;

/// How votes reach the store.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum WritePath {
    /// The new allocations are computed locally and written back as a whole.
    ReadModifyWrite,
    /// The delta is sent to the store, which validates and logs it.
    Allocate,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SessionSettings {
    pub write_path: WritePath,
    pub log_limit: usize,
}

impl SessionSettings {
    pub const DEFAULT: SessionSettings = SessionSettings {
        write_path: WritePath::ReadModifyWrite,
        log_limit: DEFAULT_LOG_LIMIT,
    };
}

/// Everything a view needs to render a board.
#[derive(PartialEq, Debug, Clone)]
pub struct BoardState {
    pub snapshot: Snapshot,
    pub selected: Option<PlayerId>,
    pub ranking_mode: RankingMode,
    /// Newest first.
    pub log: Vec<LogEntry>,
}

/// A vote that has been prepared for the selected player but not sent yet.
///
/// It remembers which selection it was made for: if the selected player
/// changes before it is submitted, it gets cancelled.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct PendingVote {
    pub player: PlayerId,
    pub character: CharacterId,
    pub delta: i64,
    epoch: u64,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct FavoritesRow {
    pub player: String,
    pub credits: i64,
    /// Name and weight, or None if the player has not voted.
    pub favorite: Option<(String, i64)>,
    pub least_favorite: Option<(String, i64)>,
}

/// A board session.
///
/// The local state only changes after the store confirmed a write. Mutations
/// for the same player are queued behind each other.
pub struct Session {
    store: Arc<dyn RowStore>,
    settings: SessionSettings,
    state: RwLock<BoardState>,
    selection_epoch: AtomicU64,
    player_locks: Mutex<HashMap<PlayerId, Arc<Mutex<()>>>>,
}

/// Reads are idempotent: they get one more chance after a failure.
fn with_read_retry<T>(what: &str, read: impl Fn() -> StoreResult<T>) -> StoreResult<T> {
    read().or_else(|e| {
        warn!("{} failed ({}), retrying once", what, e);
        read()
    })
}

fn poisoned(what: &str) -> BoardError {
    LockPoisonedSnafu { what }.build()
}

impl Session {
    pub fn open(store: Arc<dyn RowStore>, settings: SessionSettings) -> BoardResult<Session> {
        let session = Session {
            store,
            settings,
            state: RwLock::new(BoardState {
                snapshot: Snapshot::default(),
                selected: None,
                ranking_mode: RankingMode::GroupScore,
                log: Vec::new(),
            }),
            selection_epoch: AtomicU64::new(0),
            player_locks: Mutex::new(HashMap::new()),
        };
        session.refresh()?;
        Ok(session)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// A copy of the current state.
    pub fn state(&self) -> BoardResult<BoardState> {
        Ok(self.read_state()?.clone())
    }

    fn read_state(&self) -> BoardResult<RwLockReadGuard<'_, BoardState>> {
        self.state.read().map_err(|_| poisoned("board state"))
    }

    fn write_state(&self) -> BoardResult<RwLockWriteGuard<'_, BoardState>> {
        self.state.write().map_err(|_| poisoned("board state"))
    }

    fn player_lock(&self, pid: PlayerId) -> BoardResult<Arc<Mutex<()>>> {
        let mut locks = self.player_locks.lock().map_err(|_| poisoned("player locks"))?;
        Ok(locks.entry(pid).or_default().clone())
    }

    /// Fetches players, characters and the log from the store.
    pub fn refresh(&self) -> BoardResult<()> {
        reported("refresh", self.refresh_inner())
    }

    fn refresh_inner(&self) -> BoardResult<()> {
        let store = &self.store;
        let players = with_read_retry("list_players", || store.list_players())?;
        let characters = with_read_retry("list_characters", || store.list_characters())?;
        let log = with_read_retry("list_recent_allocation_log", || {
            store.list_recent_allocation_log(self.settings.log_limit)
        })?;
        debug!(
            "refresh: {} players, {} characters, {} log entries",
            players.len(),
            characters.len(),
            log.len()
        );
        let mut state = self.write_state()?;
        state.snapshot = Snapshot::new(players, characters);
        state.log = log;
        Ok(())
    }

    /// Changes the selected player. Votes prepared for the previous selection
    /// and not yet sent are cancelled.
    pub fn select_player(&self, player: Option<PlayerId>) -> BoardResult<()> {
        let res = (|| -> BoardResult<()> {
            let mut state = self.write_state()?;
            if let Some(pid) = player {
                if state.snapshot.player(pid).is_none() {
                    return Err(LedgerErrors::UnknownPlayer(pid).into());
                }
            }
            if state.selected != player {
                self.selection_epoch.fetch_add(1, Ordering::SeqCst);
                info!("select_player: {:?} -> {:?}", state.selected, player);
                state.selected = player;
            }
            Ok(())
        })();
        reported("select player", res)
    }

    pub fn select_player_by_name(&self, name: &str) -> BoardResult<PlayerId> {
        let pid = self.player_id(name)?;
        self.select_player(Some(pid))?;
        Ok(pid)
    }

    pub fn player_id(&self, name: &str) -> BoardResult<PlayerId> {
        let res = self
            .read_state()?
            .snapshot
            .player_by_name(name)
            .map(|p| p.id)
            .context(UnknownPlayerNameSnafu { name });
        reported("find player", res)
    }

    pub fn character_id(&self, name: &str) -> BoardResult<CharacterId> {
        let res = self
            .read_state()?
            .snapshot
            .character_by_name(name)
            .map(|c| c.id)
            .context(UnknownCharacterNameSnafu { name });
        reported("find character", res)
    }

    pub fn set_ranking_mode(&self, mode: RankingMode) -> BoardResult<()> {
        self.write_state()?.ranking_mode = mode;
        Ok(())
    }

    pub fn add_player(&self, name: &str) -> BoardResult<PlayerId> {
        let res = (|| -> BoardResult<PlayerId> {
            let name = validate_name(name)?;
            let taken = self.read_state()?.snapshot.player_by_name(&name).is_some();
            ensure!(!taken, DuplicateNameSnafu { name });
            let pid = self.store.insert_player(&name)?;
            info!("add_player: {:?} registered as {}", name, pid);
            self.refresh_after_write("refresh after add player");
            Ok(pid)
        })();
        reported("add player", res)
    }

    pub fn add_character(&self, name: &str) -> BoardResult<CharacterId> {
        let res = (|| -> BoardResult<CharacterId> {
            let name = validate_name(name)?;
            let taken = self.read_state()?.snapshot.character_by_name(&name).is_some();
            ensure!(!taken, DuplicateNameSnafu { name });
            let cid = self.store.insert_character(&name)?;
            info!("add_character: {:?} registered as {}", name, cid);
            self.refresh_after_write("refresh after add character");
            Ok(cid)
        })();
        reported("add character", res)
    }

    /// Prepares a vote of the selected player.
    pub fn prepare_vote(&self, character: CharacterId, delta: i64) -> BoardResult<PendingVote> {
        let res = (|| -> BoardResult<PendingVote> {
            let state = self.read_state()?;
            let player = state.selected.context(NoSelectionSnafu {})?;
            Ok(PendingVote {
                player,
                character,
                delta,
                epoch: self.selection_epoch.load(Ordering::SeqCst),
            })
        })();
        reported("prepare vote", res)
    }

    /// Validates and sends a prepared vote, waiting for any vote of the same
    /// player that is still in flight.
    pub fn submit(&self, pending: PendingVote) -> BoardResult<AppliedVote> {
        reported("vote", self.submit_inner(pending))
    }

    fn submit_inner(&self, pending: PendingVote) -> BoardResult<AppliedVote> {
        let lock = self.player_lock(pending.player)?;
        let _in_flight = lock.lock().map_err(|_| poisoned("player lock"))?;

        let snapshot = self.read_state()?.snapshot.clone();
        if self.selection_epoch.load(Ordering::SeqCst) != pending.epoch {
            let player = snapshot
                .player(pending.player)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| pending.player.to_string());
            return CancelledSnafu { player }.fail();
        }

        let applied = apply_vote(&snapshot, pending.player, pending.character, pending.delta)?;
        // No retry: a write that timed out may still have been applied.
        match self.settings.write_path {
            WritePath::ReadModifyWrite => self
                .store
                .update_player_allocations(pending.player, &applied.allocations)?,
            WritePath::Allocate => {
                self.store
                    .allocate(pending.player, pending.character, pending.delta)?
            }
        }

        {
            let mut state = self.write_state()?;
            state.snapshot = state
                .snapshot
                .with_allocations(pending.player, applied.allocations.clone())?;
        }
        self.refresh_after_write("refresh after vote");
        Ok(applied)
    }

    pub fn vote(&self, character: CharacterId, delta: i64) -> BoardResult<AppliedVote> {
        let pending = self.prepare_vote(character, delta)?;
        self.submit(pending)
    }

    pub fn ranking(&self) -> BoardResult<Vec<RankingRow>> {
        let state = self.read_state()?;
        let rows = rank_characters(&state.snapshot, state.ranking_mode, state.selected);
        reported("ranking", rows.map_err(BoardError::from))
    }

    pub fn favorites(&self) -> BoardResult<Vec<FavoritesRow>> {
        let state = self.read_state()?;
        let snapshot = &state.snapshot;
        let name_of = |cid: CharacterId| {
            snapshot
                .character(cid)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| cid.to_string())
        };
        Ok(snapshot
            .players
            .iter()
            .map(|p| {
                let (favorite, least_favorite) = match player_favorites(p) {
                    Favorites::None => (None, None),
                    Favorites::Some {
                        favorite,
                        least_favorite,
                    } => (
                        Some((name_of(favorite.0), favorite.1)),
                        Some((name_of(least_favorite.0), least_favorite.1)),
                    ),
                };
                FavoritesRow {
                    player: p.name.clone(),
                    credits: remaining_credits(&p.allocations),
                    favorite,
                    least_favorite,
                }
            })
            .collect())
    }

    /// Clears the allocations of every player, one player at a time.
    pub fn reset_allocations(&self) -> BoardResult<BatchReport<PlayerId, StoreError>> {
        let players: Vec<PlayerId> = self
            .read_state()?
            .snapshot
            .players
            .iter()
            .map(|p| p.id)
            .collect();
        info!("reset_allocations: {} players", players.len());
        let empty = AllocationMap::new();
        let report = BatchReport::run(&players, |pid| {
            self.write_for_player(*pid, || self.store.update_player_allocations(*pid, &empty))
        });
        self.refresh_after_write("refresh after batch");
        Ok(report)
    }

    /// Removes a character from the allocations of every player, refunding their credits.
    pub fn withdraw_character(
        &self,
        character: CharacterId,
    ) -> BoardResult<BatchReport<PlayerId, StoreError>> {
        let holders: Vec<(PlayerId, AllocationMap)> = self
            .read_state()?
            .snapshot
            .players
            .iter()
            .filter(|p| p.allocations.contains(character))
            .map(|p| (p.id, p.allocations.clone()))
            .collect();
        info!(
            "withdraw_character: {} held by {} players",
            character,
            holders.len()
        );
        let pids: Vec<PlayerId> = holders.iter().map(|(pid, _)| *pid).collect();
        let report = BatchReport::run(&pids, |pid| {
            let current = holders
                .iter()
                .find(|(p, _)| p == pid)
                .map(|(_, a)| a.clone())
                .unwrap_or_default();
            self.write_for_player(*pid, || match self.settings.write_path {
                WritePath::ReadModifyWrite => {
                    let mut next = current.clone();
                    next.remove(character);
                    self.store.update_player_allocations(*pid, &next)
                }
                WritePath::Allocate => {
                    let weight = current.get(character);
                    self.store.allocate(*pid, character, -weight)
                }
            })
        });
        self.refresh_after_write("refresh after batch");
        Ok(report)
    }

    // Once a write went through, a failed refresh only leaves the view stale:
    // it is reported, and the outcome of the write is kept.
    fn refresh_after_write(&self, operation: &str) {
        if let Err(e) = self.refresh_inner() {
            report_failure(operation, e);
        }
    }

    // Runs one write of a batch while holding the lock of this player.
    fn write_for_player(
        &self,
        pid: PlayerId,
        write: impl FnOnce() -> StoreResult<()>,
    ) -> StoreResult<()> {
        let lock = self.player_lock(pid).map_err(|_| StoreError::Poisoned {})?;
        let _in_flight = lock.lock().map_err(|_| StoreError::Poisoned {})?;
        write()
    }
}

/// Turns an incomplete batch into an error naming the record that failed.
pub fn check_batch(
    operation: &str,
    report: &BatchReport<PlayerId, StoreError>,
    snapshot: &Snapshot,
) -> BoardResult<()> {
    let res = match report.first_failure() {
        None => Ok(()),
        Some((pid, err)) => {
            let record = snapshot
                .player(*pid)
                .map(|p| format!("{} ({})", p.name, pid))
                .unwrap_or_else(|| pid.to_string());
            PartialFailureSnafu {
                operation,
                record,
                message: err.to_string(),
                applied: report.applied().len(),
                skipped: report.skipped().len(),
            }
            .fail()
        }
    };
    reported(operation, res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// A memory store whose calls can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing_reads: AtomicUsize,
        failing_writes: AtomicUsize,
        write_calls: AtomicUsize,
        refuse_player: Mutex<Option<PlayerId>>,
    }

    impl FlakyStore {
        fn read_fault(&self) -> StoreResult<()> {
            let left = self.failing_reads.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_reads.store(left - 1, Ordering::SeqCst);
                return UnavailableSnafu {
                    message: "read timed out",
                }
                .fail();
            }
            Ok(())
        }

        fn write_fault(&self, pid: PlayerId) -> StoreResult<()> {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            if *self.refuse_player.lock().unwrap() == Some(pid) {
                return UnavailableSnafu {
                    message: format!("{} is locked", pid),
                }
                .fail();
            }
            let left = self.failing_writes.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_writes.store(left - 1, Ordering::SeqCst);
                return UnavailableSnafu {
                    message: "write timed out",
                }
                .fail();
            }
            Ok(())
        }
    }

    impl RowStore for FlakyStore {
        fn list_players(&self) -> StoreResult<Vec<Player>> {
            self.read_fault()?;
            self.inner.list_players()
        }
        fn list_characters(&self) -> StoreResult<Vec<Character>> {
            self.read_fault()?;
            self.inner.list_characters()
        }
        fn insert_player(&self, name: &str) -> StoreResult<PlayerId> {
            self.inner.insert_player(name)
        }
        fn insert_character(&self, name: &str) -> StoreResult<CharacterId> {
            self.inner.insert_character(name)
        }
        fn update_player_allocations(
            &self,
            player: PlayerId,
            allocations: &AllocationMap,
        ) -> StoreResult<()> {
            self.write_fault(player)?;
            self.inner.update_player_allocations(player, allocations)
        }
        fn allocate(
            &self,
            player: PlayerId,
            character: CharacterId,
            amount: i64,
        ) -> StoreResult<()> {
            self.write_fault(player)?;
            self.inner.allocate(player, character, amount)
        }
        fn list_recent_allocation_log(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
            self.inner.list_recent_allocation_log(limit)
        }
    }

    /// A memory store whose writes wait for a signal.
    struct GatedStore {
        inner: MemoryStore,
        entered: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl RowStore for GatedStore {
        fn list_players(&self) -> StoreResult<Vec<Player>> {
            self.inner.list_players()
        }
        fn list_characters(&self) -> StoreResult<Vec<Character>> {
            self.inner.list_characters()
        }
        fn insert_player(&self, name: &str) -> StoreResult<PlayerId> {
            self.inner.insert_player(name)
        }
        fn insert_character(&self, name: &str) -> StoreResult<CharacterId> {
            self.inner.insert_character(name)
        }
        fn update_player_allocations(
            &self,
            player: PlayerId,
            allocations: &AllocationMap,
        ) -> StoreResult<()> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.gate.lock().unwrap().recv().unwrap();
            self.inner.update_player_allocations(player, allocations)
        }
        fn allocate(
            &self,
            player: PlayerId,
            character: CharacterId,
            amount: i64,
        ) -> StoreResult<()> {
            self.inner.allocate(player, character, amount)
        }
        fn list_recent_allocation_log(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
            self.inner.list_recent_allocation_log(limit)
        }
    }

    fn board(store: Arc<dyn RowStore>, settings: SessionSettings) -> (Session, CharacterId) {
        let session = Session::open(store, settings).unwrap();
        session.add_player("P").unwrap();
        session.add_player("Q").unwrap();
        let a = session.add_character("A").unwrap();
        session.add_character("B").unwrap();
        session.select_player_by_name("P").unwrap();
        (session, a)
    }

    fn credits_of(session: &Session, name: &str) -> i64 {
        let state = session.state().unwrap();
        remaining_credits(&state.snapshot.player_by_name(name).unwrap().allocations)
    }

    #[test]
    fn vote_then_over_budget() {
        init();
        let (session, a) = board(Arc::new(MemoryStore::new()), SessionSettings::DEFAULT);
        let b = session.character_id("B").unwrap();

        session.vote(a, 30).unwrap();
        assert_eq!(credits_of(&session, "P"), 70);

        let err = session.vote(b, 80).unwrap_err();
        assert!(matches!(
            err,
            BoardError::Ledger {
                source: LedgerErrors::InsufficientCredits { .. }
            }
        ));
        assert_eq!(credits_of(&session, "P"), 70);

        session.vote(a, -30).unwrap();
        let state = session.state().unwrap();
        assert!(state.snapshot.player_by_name("P").unwrap().allocations.is_empty());
    }

    #[test]
    fn vote_requires_a_selection() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::open(store, SessionSettings::DEFAULT).unwrap();
        let a = session.add_character("A").unwrap();
        assert!(matches!(
            session.vote(a, 1),
            Err(BoardError::NoSelection {})
        ));
    }

    #[test]
    fn blank_names_never_reach_the_store() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::open(store.clone(), SessionSettings::DEFAULT).unwrap();
        assert!(matches!(
            session.add_player("  "),
            Err(BoardError::Ledger {
                source: LedgerErrors::EmptyName
            })
        ));
        assert!(session.add_character("").is_err());
        assert!(store.list_players().unwrap().is_empty());
        assert!(store.list_characters().unwrap().is_empty());
    }

    #[test]
    fn allocate_path_writes_the_log() {
        let settings = SessionSettings {
            write_path: WritePath::Allocate,
            log_limit: 1,
        };
        let (session, a) = board(Arc::new(MemoryStore::new()), settings);
        session.vote(a, 5).unwrap();
        session.vote(a, -2).unwrap();
        let state = session.state().unwrap();
        assert_eq!(state.log.len(), 1);
        assert_eq!(state.log[0].amount, -2);
        assert_eq!(credits_of(&session, "P"), 97);
    }

    #[test]
    fn failed_write_keeps_the_snapshot() {
        let store = Arc::new(FlakyStore::default());
        let (session, a) = board(store.clone(), SessionSettings::DEFAULT);
        let before = session.state().unwrap();

        store.failing_writes.store(1, Ordering::SeqCst);
        assert!(matches!(
            session.vote(a, 10),
            Err(BoardError::Store { .. })
        ));
        // Writes are not retried.
        assert_eq!(store.write_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.state().unwrap(), before);
        assert!(store.inner.list_players().unwrap()[0].allocations.is_empty());
    }

    #[test]
    fn reads_are_retried_once() {
        let store = Arc::new(FlakyStore::default());
        let (session, _) = board(store.clone(), SessionSettings::DEFAULT);

        store.failing_reads.store(1, Ordering::SeqCst);
        session.refresh().unwrap();

        store.failing_reads.store(2, Ordering::SeqCst);
        assert!(matches!(
            session.refresh(),
            Err(BoardError::Store { .. })
        ));
    }

    #[test]
    fn stale_view_after_insert_is_not_a_failure() {
        let store = Arc::new(FlakyStore::default());
        let session = Session::open(store.clone(), SessionSettings::DEFAULT).unwrap();

        store.failing_reads.store(2, Ordering::SeqCst);
        let pid = session.add_player("Anna").unwrap();
        assert_eq!(store.inner.list_players().unwrap().len(), 1);
        // The view missed the insert but catches up on the next refresh.
        assert!(session.state().unwrap().snapshot.players.is_empty());
        session.refresh().unwrap();
        assert_eq!(session.player_id("Anna").unwrap(), pid);

        store.failing_reads.store(2, Ordering::SeqCst);
        session.add_character("Simon").unwrap();
        assert_eq!(store.inner.list_characters().unwrap().len(), 1);
    }

    #[test]
    fn names_are_unique() {
        let store = Arc::new(MemoryStore::new());
        let (session, _) = board(store.clone(), SessionSettings::DEFAULT);
        assert!(matches!(
            session.add_player(" P "),
            Err(BoardError::DuplicateName { .. })
        ));
        assert!(matches!(
            session.add_character("A"),
            Err(BoardError::DuplicateName { .. })
        ));
        assert_eq!(store.list_players().unwrap().len(), 2);
        assert_eq!(store.list_characters().unwrap().len(), 2);
    }

    #[test]
    fn ranking_follows_the_mode() {
        let (session, a) = board(Arc::new(MemoryStore::new()), SessionSettings::DEFAULT);
        let b = session.character_id("B").unwrap();
        session.vote(a, 50).unwrap();
        session.select_player_by_name("Q").unwrap();
        session.vote(a, -20).unwrap();
        session.vote(b, 10).unwrap();

        let names = |rows: Vec<RankingRow>| -> Vec<String> {
            rows.into_iter().map(|r| r.name).collect()
        };
        assert_eq!(names(session.ranking().unwrap()), vec!["A", "B"]);
        session.set_ranking_mode(RankingMode::OwnScore).unwrap();
        assert_eq!(names(session.ranking().unwrap()), vec!["B", "A"]);

        let favorites = session.favorites().unwrap();
        assert_eq!(favorites[1].player, "Q");
        assert_eq!(favorites[1].favorite, Some(("B".to_string(), 10)));
        assert_eq!(favorites[1].least_favorite, Some(("A".to_string(), -20)));
        assert_eq!(favorites[1].credits, 70);
    }

    #[test]
    fn reset_reports_partial_failure() {
        init();
        let store = Arc::new(FlakyStore::default());
        let (session, a) = board(store.clone(), SessionSettings::DEFAULT);
        session.add_player("R").unwrap();
        for name in ["P", "Q", "R"] {
            session.select_player_by_name(name).unwrap();
            session.vote(a, 10).unwrap();
        }
        let q = session.player_id("Q").unwrap();
        *store.refuse_player.lock().unwrap() = Some(q);

        let report = session.reset_allocations().unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.first_failure().map(|(pid, _)| *pid), Some(q));
        assert_eq!(report.applied().len(), 1);
        assert_eq!(report.skipped().len(), 1);

        // P was reset, Q failed, R was never attempted.
        assert_eq!(credits_of(&session, "P"), 100);
        assert_eq!(credits_of(&session, "Q"), 90);
        assert_eq!(credits_of(&session, "R"), 90);

        let state = session.state().unwrap();
        let err = check_batch("reset", &report, &state.snapshot).unwrap_err();
        assert!(err.to_string().contains("Q"));
    }

    #[test]
    fn batch_report_survives_a_failed_refresh() {
        let store = Arc::new(FlakyStore::default());
        let (session, a) = board(store.clone(), SessionSettings::DEFAULT);
        for name in ["P", "Q"] {
            session.select_player_by_name(name).unwrap();
            session.vote(a, 10).unwrap();
        }
        let q = session.player_id("Q").unwrap();
        *store.refuse_player.lock().unwrap() = Some(q);
        store.failing_reads.store(2, Ordering::SeqCst);

        let report = session.reset_allocations().unwrap();
        assert_eq!(report.first_failure().map(|(pid, _)| *pid), Some(q));
        assert_eq!(report.applied().len(), 1);
        assert!(store.inner.list_players().unwrap()[0].allocations.is_empty());

        store.failing_reads.store(2, Ordering::SeqCst);
        let report = session.withdraw_character(a).unwrap();
        assert_eq!(report.first_failure().map(|(pid, _)| *pid), Some(q));
    }

    #[test]
    fn withdraw_character_refunds_everyone() {
        for write_path in [WritePath::ReadModifyWrite, WritePath::Allocate] {
            let settings = SessionSettings {
                write_path,
                log_limit: DEFAULT_LOG_LIMIT,
            };
            let (session, a) = board(Arc::new(MemoryStore::new()), settings);
            let b = session.character_id("B").unwrap();
            session.vote(a, 40).unwrap();
            session.vote(b, 5).unwrap();
            session.select_player_by_name("Q").unwrap();
            session.vote(a, -25).unwrap();

            let report = session.withdraw_character(a).unwrap();
            assert!(report.is_complete());
            assert_eq!(report.len(), 2);
            assert_eq!(credits_of(&session, "P"), 95);
            assert_eq!(credits_of(&session, "Q"), 100);
        }
    }

    #[test]
    fn votes_of_a_player_are_queued_and_cancelled_on_selection_change() {
        init();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let inner = MemoryStore::new();
        let p = inner.insert_player("P").unwrap();
        inner.insert_player("Q").unwrap();
        let a = inner.insert_character("A").unwrap();
        let store = Arc::new(GatedStore {
            inner,
            entered: Mutex::new(entered_tx),
            gate: Mutex::new(gate_rx),
        });
        let session = Session::open(store, SessionSettings::DEFAULT).unwrap();
        session.select_player(Some(p)).unwrap();

        let first = session.prepare_vote(a, 10).unwrap();
        let second = session.prepare_vote(a, 5).unwrap();

        thread::scope(|s| {
            let in_flight = s.spawn(|| session.submit(first));
            // The first vote is now waiting for the store.
            entered_rx.recv().unwrap();
            let queued = s.spawn(|| session.submit(second));

            session.select_player_by_name("Q").unwrap();
            gate_tx.send(()).unwrap();

            let applied = in_flight.join().unwrap().unwrap();
            assert_eq!(applied.weight, 10);
            assert!(matches!(
                queued.join().unwrap(),
                Err(BoardError::Cancelled { .. })
            ));
        });

        let state = session.state().unwrap();
        assert_eq!(state.snapshot.player(p).unwrap().allocations.get(a), 10);
    }
}
