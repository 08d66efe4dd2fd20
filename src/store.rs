use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, Savepoint, Transaction, TransactionBehavior};

const DATA_DIR: &str = "league_signals";
const DB_FILE: &str = "signals.sqlite";
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_DATA_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(DATA_DIR).join(DB_FILE));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(DATA_DIR)
            .join(DB_FILE),
    )
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create db directory {}", parent.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("set sqlite busy timeout")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS leagues (
            league_id TEXT PRIMARY KEY,
            sport TEXT NOT NULL,
            season TEXT NOT NULL,
            last_update TEXT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS provider_mapping (
            provider TEXT NOT NULL,
            league_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            provider_local_id TEXT NOT NULL,
            canonical_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (provider, league_id, entity_type, provider_local_id)
        );
        CREATE INDEX IF NOT EXISTS idx_mapping_canonical
            ON provider_mapping(league_id, entity_type, canonical_id);

        CREATE TABLE IF NOT EXISTS teams (
            team_id INTEGER PRIMARY KEY AUTOINCREMENT,
            league_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            abbreviation TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS players (
            player_id INTEGER PRIMARY KEY AUTOINCREMENT,
            league_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            position TEXT NULL,
            birthdate TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS games (
            game_id INTEGER PRIMARY KEY AUTOINCREMENT,
            league_id TEXT NOT NULL,
            game_key TEXT NOT NULL UNIQUE,
            season TEXT NOT NULL,
            game_date TEXT NOT NULL,
            home_id INTEGER NOT NULL,
            away_id INTEGER NOT NULL,
            venue TEXT NULL,
            home_score INTEGER NULL,
            away_score INTEGER NULL,
            finished INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_games_league_date ON games(league_id, game_date);

        CREATE TABLE IF NOT EXISTS metric_samples (
            sample_id INTEGER PRIMARY KEY AUTOINCREMENT,
            league_id TEXT NOT NULL,
            game_id INTEGER NOT NULL REFERENCES games(game_id),
            sample_group TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            team_id INTEGER NOT NULL,
            opp_id INTEGER NOT NULL,
            counters_json TEXT NOT NULL,
            UNIQUE (game_id, sample_group, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_samples_league ON metric_samples(league_id, sample_group);

        CREATE TABLE IF NOT EXISTS league_metrics (
            league_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            timeframe TEXT NOT NULL,
            split TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            is_max INTEGER NOT NULL,
            best_value REAL NOT NULL,
            worst_value REAL NOT NULL,
            q1 REAL NOT NULL,
            q2 REAL NOT NULL,
            q4 REAL NOT NULL,
            q6 REAL NOT NULL,
            q8 REAL NOT NULL,
            q9 REAL NOT NULL,
            entity_count INTEGER NOT NULL,
            reference_date TEXT NOT NULL,
            PRIMARY KEY (league_id, entity_type, timeframe, split, metric_name)
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// One logical write scope. Opens an IMMEDIATE transaction so the write lock
/// is taken up front; dropping the handle without `commit` rolls back.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> UnitOfWork<'conn> {
    pub fn begin(conn: &'conn mut Connection) -> Result<Self> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin unit of work")?;
        Ok(Self { tx })
    }

    /// Nested scope for a step that may need to be undone on its own, such as
    /// a create that loses an insert race.
    pub fn savepoint(&mut self) -> Result<Savepoint<'_>> {
        self.tx.savepoint().context("open savepoint")
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit().context("commit unit of work")
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback().context("rollback unit of work")
    }
}

impl Deref for UnitOfWork<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// Run `f` inside a unit of work: commit on `Ok`, roll back on `Err`. A panic
/// inside `f` drops the transaction, which also rolls back.
pub fn with_unit_of_work<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
{
    let mut uow = UnitOfWork::begin(conn)?;
    match f(&mut uow) {
        Ok(value) => {
            uow.commit()?;
            Ok(value)
        }
        Err(err) => {
            uow.rollback()?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use rusqlite::params;

    fn team_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM teams", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn commit_on_ok() {
        let mut conn = open_in_memory().unwrap();
        with_unit_of_work(&mut conn, |uow| {
            uow.execute(
                "INSERT INTO teams(league_id, display_name) VALUES (?1, ?2)",
                params!["nba", "Boston Celtics"],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(team_count(&conn), 1);
    }

    #[test]
    fn rollback_on_err() {
        let mut conn = open_in_memory().unwrap();
        let res: Result<()> = with_unit_of_work(&mut conn, |uow| {
            uow.execute(
                "INSERT INTO teams(league_id, display_name) VALUES (?1, ?2)",
                params!["nba", "Boston Celtics"],
            )?;
            Err(anyhow!("boom"))
        });
        assert!(res.is_err());
        assert_eq!(team_count(&conn), 0);
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let mut conn = open_in_memory().unwrap();
        {
            let uow = UnitOfWork::begin(&mut conn).unwrap();
            uow.execute(
                "INSERT INTO teams(league_id, display_name) VALUES (?1, ?2)",
                params!["nba", "Boston Celtics"],
            )
            .unwrap();
        }
        assert_eq!(team_count(&conn), 0);
    }
}
