use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::ffi::ErrorCode;
use rusqlite::{Connection, InterruptHandle, OpenFlags};

use crate::equivalence::{ExecutorFactory, MetaQueryStyle, QueryExecutor};
use crate::models::ExecutionError;

pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open_read_only_connection(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        bail!("sqlite database does not exist: {}", path.display());
    }

    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open sqlite database: {}", path.display()))?;
    connection
        .busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .context("failed to configure sqlite busy timeout")?;
    Ok(connection)
}

pub struct SqliteExecutor {
    connection: Connection,
    watchdog: Option<StatementWatchdog>,
}

impl SqliteExecutor {
    /// Wraps a caller-owned connection. `statement_timeout` of `None` lets
    /// statements run unbounded.
    pub fn new(connection: Connection, statement_timeout: Option<Duration>) -> Result<Self> {
        let watchdog = match statement_timeout {
            Some(timeout) if !timeout.is_zero() => Some(StatementWatchdog::spawn(
                connection.get_interrupt_handle(),
                timeout,
            )?),
            _ => None,
        };
        Ok(Self {
            connection,
            watchdog,
        })
    }

    fn first_row(&self, sql: &str) -> rusqlite::Result<bool> {
        let mut statement = self.connection.prepare(sql)?;
        let mut rows = statement.query([])?;
        Ok(rows.next()?.is_some())
    }
}

impl QueryExecutor for SqliteExecutor {
    fn meta_query_style(&self) -> MetaQueryStyle {
        MetaQueryStyle::Subquery
    }

    fn returns_rows(&mut self, sql: &str) -> Result<bool, ExecutionError> {
        let generation = self.watchdog.as_ref().map(StatementWatchdog::arm);
        let result = self.first_row(sql);
        let timed_out = match (&self.watchdog, generation) {
            (Some(watchdog), Some(generation)) => watchdog.disarm(generation),
            _ => false,
        };

        result.map_err(|error| {
            if timed_out && is_interrupt(&error) {
                ExecutionError::timeout(error.to_string())
            } else {
                ExecutionError::new(error.to_string())
            }
        })
    }
}

fn is_interrupt(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::OperationInterrupted
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteExecutorFactory {
    pub path: PathBuf,
    pub statement_timeout: Option<Duration>,
}

impl SqliteExecutorFactory {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, statement_timeout: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            statement_timeout,
        }
    }
}

impl ExecutorFactory for SqliteExecutorFactory {
    type Executor = SqliteExecutor;

    fn open(&self, worker: usize) -> Result<SqliteExecutor> {
        let connection = open_read_only_connection(&self.path)
            .with_context(|| format!("worker {worker} could not open its connection"))?;
        SqliteExecutor::new(connection, self.statement_timeout)
    }
}

enum WatchSignal {
    Armed(u64),
    Disarmed,
}

#[derive(Debug, Default)]
struct WatchState {
    armed: Option<u64>,
    next_generation: u64,
    fired: Option<u64>,
}

/// Interrupts the connection's running statement once it outlives the timeout.
///
/// Interrupts are issued while holding the state lock and only for the
/// generation that is still armed, so a late timer can never hit the next
/// statement.
struct StatementWatchdog {
    state: Arc<Mutex<WatchState>>,
    sender: Option<Sender<WatchSignal>>,
    thread: Option<JoinHandle<()>>,
}

impl StatementWatchdog {
    fn spawn(handle: InterruptHandle, timeout: Duration) -> Result<Self> {
        let state = Arc::new(Mutex::new(WatchState::default()));
        let (sender, receiver) = mpsc::channel();
        let thread_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("querydiff-watchdog".to_string())
            .spawn(move || watch(&receiver, &thread_state, &handle, timeout))
            .context("failed to spawn statement watchdog thread")?;

        Ok(Self {
            state,
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    fn arm(&self) -> u64 {
        let generation = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.next_generation += 1;
            state.armed = Some(state.next_generation);
            state.fired = None;
            state.next_generation
        };
        if let Some(sender) = &self.sender {
            let _ = sender.send(WatchSignal::Armed(generation));
        }
        generation
    }

    /// Returns whether the statement of `generation` was interrupted.
    fn disarm(&self, generation: u64) -> bool {
        let fired = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.armed = None;
            state.fired.take() == Some(generation)
        };
        if let Some(sender) = &self.sender {
            let _ = sender.send(WatchSignal::Disarmed);
        }
        fired
    }
}

impl Drop for StatementWatchdog {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn watch(
    receiver: &Receiver<WatchSignal>,
    state: &Mutex<WatchState>,
    handle: &InterruptHandle,
    timeout: Duration,
) {
    let mut pending = None;
    loop {
        let signal = match pending {
            None => match receiver.recv() {
                Ok(signal) => signal,
                Err(_) => return,
            },
            Some(generation) => match receiver.recv_timeout(timeout) {
                Ok(signal) => signal,
                Err(RecvTimeoutError::Timeout) => {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    if state.armed == Some(generation) {
                        handle.interrupt();
                        state.fired = Some(generation);
                    }
                    pending = None;
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            },
        };

        pending = match signal {
            WatchSignal::Armed(generation) => Some(generation),
            WatchSignal::Disarmed => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use rusqlite::Connection;

    use super::{SqliteExecutor, SqliteExecutorFactory, open_read_only_connection};
    use crate::equivalence::{ExecutorFactory, QueryExecutor, check_equivalence};
    use crate::models::Outcome;

    fn temp_db_path(label: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock should be after epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("querydiff-{label}-{nanos}.sqlite"))
    }

    fn seeded_db(label: &str) -> PathBuf {
        let path = temp_db_path(label);
        let connection = Connection::open(&path).expect("sqlite file should open");
        connection
            .execute_batch(
                "CREATE TABLE a (aID INTEGER);
                 CREATE TABLE b (bID INTEGER);
                 INSERT INTO a (aID) VALUES (1), (2), (3), (NULL);
                 INSERT INTO b (bID) VALUES (2), (3), (4);",
            )
            .expect("fixture tables should be created");
        path
    }

    fn executor(path: &PathBuf) -> SqliteExecutor {
        let connection = open_read_only_connection(path).expect("read-only connection");
        SqliteExecutor::new(connection, Some(Duration::from_secs(30))).expect("executor")
    }

    #[test]
    fn reflexive_and_symmetric_checks_agree() {
        let path = seeded_db("reflexive");
        let mut executor = executor(&path);
        let queries = [
            "SELECT aID FROM a",
            "SELECT aID FROM a WHERE aID > 1",
            "SELECT bID AS aID FROM b",
            "SELECT aID FROM a UNION SELECT bID FROM b",
        ];

        for first in queries {
            assert_eq!(check_equivalence(&mut executor, first, first), Outcome::Equivalent);
            for second in queries {
                assert_eq!(
                    check_equivalence(&mut executor, first, second),
                    check_equivalence(&mut executor, second, first),
                    "{first} vs {second}"
                );
            }
        }
    }

    #[test]
    fn queries_ending_in_line_comments_compare_reflexively() {
        let path = seeded_db("line-comment");
        let mut executor = executor(&path);

        for query in [
            "SELECT aID FROM a -- generated by rule\n",
            "SELECT aID FROM a -- generated by rule",
            "SELECT aID FROM a;\n",
        ] {
            assert_eq!(check_equivalence(&mut executor, query, query), Outcome::Equivalent, "{query}");
        }
    }

    #[test]
    fn set_semantics_ignore_order_and_duplicates() {
        let path = seeded_db("set-semantics");
        let mut executor = executor(&path);

        assert_eq!(
            check_equivalence(
                &mut executor,
                "SELECT aID FROM a ORDER BY aID DESC",
                "SELECT aID FROM a UNION ALL SELECT aID FROM a",
            ),
            Outcome::Equivalent
        );
        assert_eq!(
            check_equivalence(&mut executor, "SELECT aID FROM a", "SELECT bID FROM b"),
            Outcome::NotEquivalent
        );
    }

    #[test]
    fn errors_are_reported_separately_from_mismatches() {
        let path = seeded_db("errors");
        let mut executor = executor(&path);

        let Outcome::Error(error) =
            check_equivalence(&mut executor, "SELECT aID, aID FROM a", "SELECT aID FROM a")
        else {
            panic!("column count mismatch should be an execution error");
        };
        assert!(!error.timed_out);

        assert!(matches!(
            check_equivalence(&mut executor, "SELECT * FROM missing", "SELECT 1"),
            Outcome::Error(_)
        ));
    }

    #[test]
    fn connections_are_read_only() {
        let path = seeded_db("read-only");
        let mut executor = executor(&path);
        assert!(executor.returns_rows("DELETE FROM a").is_err());
    }

    #[test]
    fn runaway_statement_is_interrupted_as_timeout() {
        let path = seeded_db("timeout");
        let connection = open_read_only_connection(&path).expect("read-only connection");
        let mut executor =
            SqliteExecutor::new(connection, Some(Duration::from_millis(50))).expect("executor");

        let runaway = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                       SELECT x FROM n WHERE x < 0";
        let error = executor
            .returns_rows(runaway)
            .expect_err("unbounded recursion should be interrupted");
        assert!(error.timed_out, "unexpected error: {error}");

        assert_eq!(executor.returns_rows("SELECT 1"), Ok(true));
    }

    #[test]
    fn factory_opens_independent_connections() {
        let path = seeded_db("factory");
        let factory = SqliteExecutorFactory::new(&path, None);
        let mut first = factory.open(0).expect("first worker connection");
        let mut second = factory.open(1).expect("second worker connection");

        assert_eq!(first.returns_rows("SELECT aID FROM a"), Ok(true));
        assert_eq!(second.returns_rows("SELECT bID FROM b WHERE bID > 10"), Ok(false));
    }

    #[test]
    fn file_prefixed_paths_open_as_plain_files() {
        let name = format!(
            "file:querydiff-plain-{}.sqlite",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock should be after epoch")
                .as_nanos()
        );
        let path = PathBuf::from(&name);
        std::fs::copy(seeded_db("file-prefix"), &path).expect("fixture should be copyable");

        let opened = open_read_only_connection(&path).map(|connection| {
            connection
                .query_row("SELECT COUNT(*) FROM a", [], |row| row.get::<_, i64>(0))
                .expect("fixture table should be readable")
        });
        let _ = std::fs::remove_file(&path);

        assert_eq!(opened.expect("plain path should open"), 4);
    }

    #[test]
    fn missing_database_file_is_rejected() {
        let factory = SqliteExecutorFactory::new(temp_db_path("missing"), None);
        let error = factory.open(0).err().expect("missing file should fail");
        assert!(format!("{error:#}").contains("does not exist"), "unexpected error: {error:#}");
    }
}
