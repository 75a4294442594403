//! In-memory database and collaborators for exercising the engine without a
//! server.
//!
//! [`FakeDatabase`] keeps a table list and a log of every statement it sees.
//! It understands just enough SQL to be useful: `BEGIN`/`COMMIT`/`ROLLBACK`,
//! `DROP TABLE` and `CREATE TABLE`, plus the enumeration and risk-signal
//! queries the dialects issue. Everything else executes as a no-op.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::backends::{
    DatabaseBackend, DatabaseBackendRegistry, DatabaseBackendType, DatabaseConnection,
    DatabasePool, DatabasePoolConfig, DatabasePoolStats, DatabaseRow, DatabaseValue,
};
use crate::backup::{BackupProvider, BackupRecord, BackupStatus};
use crate::descriptor::ConnectionDescriptor;
use crate::dialect::DialectAdapter;
use crate::error::{EngineError, EngineResult};
use crate::migrations::{MigrationReplayer, ReplaySummary};
use crate::orchestrator::{ConfirmationGate, ConfirmationRequest, ResetPhase};
use crate::post::{PostStep, PostStepOutcome};
use crate::progress::{ProgressEvent, ProgressSink};

/// Initial contents and failure switches
#[derive(Debug, Clone, Default)]
pub struct FakeScript {
    pub tables: Vec<String>,
    /// Pool creation, health checks and acquisition all fail
    pub fail_connect: bool,
    pub fail_enumeration: bool,
    /// Any statement or query containing one of these fails
    pub fail_statements_containing: Vec<String>,
    pub data_size_bytes: i64,
    pub foreign_key_count: i64,
    /// Canned rows for queries containing the pattern, checked first
    pub query_results: Vec<(String, Vec<Vec<DatabaseValue>>)>,
}

#[derive(Debug, Clone)]
enum LogEntry {
    Statement(String),
    Query(String),
    Marker(String),
}

#[derive(Debug, Default)]
struct FakeState {
    tables: Vec<String>,
    snapshot: Option<Vec<String>>,
    log: Vec<LogEntry>,
    connections_opened: usize,
    pools_closed: usize,
}

/// Shared handle; clones see the same database
#[derive(Debug, Clone)]
pub struct FakeDatabase {
    script: Arc<FakeScript>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDatabase {
    pub fn with_tables(tables: &[&str]) -> Self {
        Self::with_script(FakeScript {
            tables: tables.iter().map(|table| table.to_string()).collect(),
            ..FakeScript::default()
        })
    }

    pub fn with_script(script: FakeScript) -> Self {
        let state = FakeState {
            tables: script.tables.clone(),
            ..FakeState::default()
        };
        Self {
            script: Arc::new(script),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Open a session directly, bypassing the pool
    pub fn connection(&self) -> FakeConnection {
        self.state.lock().connections_opened += 1;
        FakeConnection { db: self.clone() }
    }

    pub fn pool(&self) -> FakePool {
        FakePool { db: self.clone() }
    }

    /// Registry serving this database for every vendor
    pub fn registry(&self) -> DatabaseBackendRegistry {
        let mut registry = DatabaseBackendRegistry::new();
        for backend_type in [
            DatabaseBackendType::PostgreSQL,
            DatabaseBackendType::MySQL,
            DatabaseBackendType::SQLite,
        ] {
            registry.register(Arc::new(FakeBackend {
                backend_type,
                db: self.clone(),
            }));
        }
        registry
    }

    pub fn tables(&self) -> Vec<String> {
        self.state.lock().tables.clone()
    }

    /// Executed statements in order, failed ones included
    pub fn statements(&self) -> Vec<String> {
        self.entries(|entry| match entry {
            LogEntry::Statement(sql) => Some(sql.clone()),
            _ => None,
        })
    }

    pub fn statements_starting_with(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql.starts_with(prefix))
            .collect()
    }

    pub fn queries(&self) -> Vec<String> {
        self.entries(|entry| match entry {
            LogEntry::Query(sql) => Some(sql.clone()),
            _ => None,
        })
    }

    /// Statements interleaved with collaborator markers such as `backup:<path>`
    pub fn history(&self) -> Vec<String> {
        self.entries(|entry| match entry {
            LogEntry::Statement(sql) | LogEntry::Marker(sql) => Some(sql.clone()),
            LogEntry::Query(_) => None,
        })
    }

    pub fn mark(&self, marker: impl Into<String>) {
        self.state.lock().log.push(LogEntry::Marker(marker.into()));
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections_opened
    }

    pub fn pools_closed(&self) -> usize {
        self.state.lock().pools_closed
    }

    fn entries(&self, select: impl Fn(&LogEntry) -> Option<String>) -> Vec<String> {
        self.state.lock().log.iter().filter_map(select).collect()
    }

    fn should_fail(&self, sql: &str) -> bool {
        self.script
            .fail_statements_containing
            .iter()
            .any(|pattern| sql.contains(pattern.as_str()))
    }

    fn connect(&self) -> EngineResult<()> {
        if self.script.fail_connect {
            return Err(EngineError::ConnectionFailure("connection refused".to_string()));
        }
        Ok(())
    }

    fn apply(&self, sql: &str) -> EngineResult<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.log.push(LogEntry::Statement(sql.to_string()));

        if self.should_fail(sql) {
            return Err(EngineError::Query(format!("scripted failure: {}", sql)));
        }

        let upper = sql.trim().to_ascii_uppercase();
        match upper.as_str() {
            "BEGIN" => {
                state.snapshot = Some(state.tables.clone());
                return Ok(0);
            }
            "COMMIT" => {
                state.snapshot = None;
                return Ok(0);
            }
            "ROLLBACK" => {
                if let Some(tables) = state.snapshot.take() {
                    state.tables = tables;
                }
                return Ok(0);
            }
            _ => {}
        }

        if upper.starts_with("DROP TABLE") {
            let dropped = dropped_tables(sql);
            let before = state.tables.len();
            state.tables.retain(|table| !dropped.contains(table));
            return Ok((before - state.tables.len()) as u64);
        }

        if upper.starts_with("CREATE TABLE") {
            if let Some(name) = created_table(sql) {
                if !state.tables.contains(&name) {
                    state.tables.push(name);
                }
            }
            return Ok(0);
        }

        Ok(1)
    }

    fn query(&self, sql: &str) -> EngineResult<Vec<DatabaseRow>> {
        self.state.lock().log.push(LogEntry::Query(sql.to_string()));

        if let Some((_, rows)) = self
            .script
            .query_results
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Ok(rows.iter().cloned().map(DatabaseRow::from_values).collect());
        }

        if self.should_fail(sql) {
            return Err(EngineError::Query(format!("scripted failure: {}", sql)));
        }

        if sql.contains("FOREIGN KEY") || sql.contains("foreign_key_list") {
            return Ok(vec![DatabaseRow::from_values(vec![self.script.foreign_key_count.into()])]);
        }
        if sql.contains("pg_database_size") || sql.contains("data_length") || sql.contains("page_count") {
            return Ok(vec![DatabaseRow::from_values(vec![self.script.data_size_bytes.into()])]);
        }
        if sql.contains("pg_tables") || sql.contains("SHOW FULL TABLES") || sql.contains("sqlite_master") {
            if self.script.fail_enumeration {
                return Err(EngineError::Query("permission denied for catalog".to_string()));
            }
            let mysql = sql.contains("SHOW FULL TABLES");
            return Ok(self
                .tables()
                .into_iter()
                .map(|table| {
                    let mut values = vec![DatabaseValue::from(table)];
                    if mysql {
                        values.push("BASE TABLE".into());
                    }
                    DatabaseRow::from_values(values)
                })
                .collect());
        }

        Ok(Vec::new())
    }
}

fn unquote(name: &str) -> String {
    let name = name.trim();
    let name = name.rsplit('.').next().unwrap_or(name);
    name.trim_matches(|c| c == '"' || c == '`').to_string()
}

fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> &'a str {
    let trimmed = sql.trim_start();
    match trimmed.get(..keyword.len()) {
        Some(head) if head.eq_ignore_ascii_case(keyword) => &trimmed[keyword.len()..],
        _ => trimmed,
    }
}

fn dropped_tables(sql: &str) -> Vec<String> {
    let rest = strip_keyword(sql, "DROP TABLE");
    let rest = strip_keyword(rest, "IF EXISTS").trim_end();
    let rest = rest.strip_suffix("CASCADE").unwrap_or(rest);
    rest.split(',').map(unquote).filter(|name| !name.is_empty()).collect()
}

fn created_table(sql: &str) -> Option<String> {
    let rest = strip_keyword(sql, "CREATE TABLE");
    let rest = strip_keyword(rest, "IF NOT EXISTS").trim_start();
    let name = rest
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .filter(|name| !name.is_empty())?;
    Some(unquote(name))
}

pub struct FakeConnection {
    db: FakeDatabase,
}

#[async_trait]
impl DatabaseConnection for FakeConnection {
    async fn execute(&mut self, sql: &str) -> EngineResult<u64> {
        self.db.apply(sql)
    }

    async fn fetch_all(&mut self, sql: &str) -> EngineResult<Vec<DatabaseRow>> {
        self.db.query(sql)
    }
}

pub struct FakePool {
    db: FakeDatabase,
}

#[async_trait]
impl DatabasePool for FakePool {
    async fn acquire(&self) -> EngineResult<Box<dyn DatabaseConnection>> {
        self.db.connect()?;
        Ok(Box::new(self.db.connection()))
    }

    async fn health_check(&self) -> EngineResult<Duration> {
        self.db.connect()?;
        Ok(Duration::from_millis(1))
    }

    async fn close(&self) {
        self.db.state.lock().pools_closed += 1;
    }

    fn stats(&self) -> DatabasePoolStats {
        DatabasePoolStats {
            total_connections: self.db.connections_opened() as u32,
            idle_connections: 0,
        }
    }
}

pub struct FakeBackend {
    backend_type: DatabaseBackendType,
    db: FakeDatabase,
}

#[async_trait]
impl DatabaseBackend for FakeBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend_type
    }

    async fn create_pool(
        &self,
        _descriptor: &ConnectionDescriptor,
        _config: &DatabasePoolConfig,
    ) -> EngineResult<Arc<dyn DatabasePool>> {
        self.db.connect()?;
        Ok(Arc::new(self.db.pool()))
    }
}

/// Replayer that creates a fixed set of tables
pub struct FakeReplayer {
    db: FakeDatabase,
    tables: Vec<String>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl FakeReplayer {
    pub fn new(db: &FakeDatabase, tables: &[&str]) -> Self {
        Self {
            db: db.clone(),
            tables: tables.iter().map(|table| table.to_string()).collect(),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(db: &FakeDatabase, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(db, &[])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MigrationReplayer for FakeReplayer {
    async fn replay(
        &self,
        _descriptor: &ConnectionDescriptor,
        conn: &mut dyn DatabaseConnection,
    ) -> EngineResult<ReplaySummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.db.mark("replay");

        if let Some(message) = &self.failure {
            return Err(EngineError::ReplayFailure(message.clone()));
        }

        for table in &self.tables {
            conn.execute(&format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", table))
                .await?;
        }

        Ok(ReplaySummary {
            applied: self.tables.iter().map(|table| format!("create_{}", table)).collect(),
            skipped: 0,
            elapsed_ms: 0,
        })
    }
}

#[derive(Debug, Clone)]
enum BackupBehaviour {
    Complete,
    Fail(String),
    Incomplete,
    Hang,
}

/// Backup provider that writes nothing and records `backup:<path>`
pub struct FakeBackup {
    db: FakeDatabase,
    behaviour: BackupBehaviour,
}

impl FakeBackup {
    pub fn completing(db: &FakeDatabase) -> Self {
        Self {
            db: db.clone(),
            behaviour: BackupBehaviour::Complete,
        }
    }

    pub fn failing(db: &FakeDatabase, message: impl Into<String>) -> Self {
        Self {
            db: db.clone(),
            behaviour: BackupBehaviour::Fail(message.into()),
        }
    }

    /// Returns a record that never reached `Completed`
    pub fn incomplete(db: &FakeDatabase) -> Self {
        Self {
            db: db.clone(),
            behaviour: BackupBehaviour::Incomplete,
        }
    }

    /// Never finishes on its own; the timeout is enforced here
    pub fn hanging(db: &FakeDatabase) -> Self {
        Self {
            db: db.clone(),
            behaviour: BackupBehaviour::Hang,
        }
    }
}

#[async_trait]
impl BackupProvider for FakeBackup {
    async fn backup(
        &self,
        descriptor: &ConnectionDescriptor,
        path: &Path,
        timeout: Duration,
    ) -> EngineResult<BackupRecord> {
        self.db.mark(format!("backup:{}", path.display()));
        let mut record = BackupRecord::pending(path, descriptor.backend_type()?);

        match &self.behaviour {
            BackupBehaviour::Complete => {
                record.status = BackupStatus::Completed;
                record.timestamp = Utc::now();
                Ok(record)
            }
            BackupBehaviour::Fail(message) => Err(EngineError::BackupFailure(message.clone())),
            BackupBehaviour::Incomplete => Ok(record),
            BackupBehaviour::Hang => {
                if tokio::time::timeout(timeout, std::future::pending::<()>()).await.is_err() {
                    return Err(EngineError::BackupTimeout(timeout));
                }
                Ok(record)
            }
        }
    }
}

type ConfirmHook = Box<dyn Fn(&ConfirmationRequest) + Send + Sync>;

/// Gate with a fixed answer that remembers what it was asked
pub struct ScriptedGate {
    answer: Result<bool, String>,
    delay: Option<Duration>,
    hook: Option<ConfirmHook>,
    db: Option<FakeDatabase>,
    requests: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedGate {
    pub fn approving() -> Self {
        Self::answering(Ok(true))
    }

    pub fn denying() -> Self {
        Self::answering(Ok(false))
    }

    /// The answer cannot be read, e.g. stdin closed
    pub fn unreadable(message: impl Into<String>) -> Self {
        Self::answering(Err(message.into()))
    }

    fn answering(answer: Result<bool, String>) -> Self {
        Self {
            answer,
            delay: None,
            hook: None,
            db: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Wait this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run `hook` while the operator is "thinking"
    pub fn with_hook(mut self, hook: impl Fn(&ConfirmationRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Record a `confirm` marker in the database history
    pub fn recording(mut self, db: &FakeDatabase) -> Self {
        self.db = Some(db.clone());
        self
    }

    pub fn requests(&self) -> Vec<ConfirmationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ConfirmationGate for ScriptedGate {
    async fn confirm(&self, request: &ConfirmationRequest) -> EngineResult<bool> {
        self.requests.lock().push(request.clone());
        if let Some(db) = &self.db {
            db.mark("confirm");
        }
        if let Some(hook) = &self.hook {
            hook(request);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.clone().map_err(EngineError::ConfirmationInput)
    }
}

/// Sink that keeps every event
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Distinct phases in the order they were first reported
    pub fn phases(&self) -> Vec<ResetPhase> {
        let mut phases: Vec<ResetPhase> = Vec::new();
        for event in self.events.lock().iter() {
            if phases.last() != Some(&event.phase) {
                phases.push(event.phase);
            }
        }
        phases
    }
}

impl ProgressSink for RecordingProgress {
    fn on_phase(&self, phase: ResetPhase, detail: &str) {
        self.events.lock().push(ProgressEvent::new(phase, detail));
    }

    fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Post step that succeeds or fails on demand
pub struct FakePostStep {
    name: String,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl FakePostStep {
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::succeeding(name)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostStep for FakePostStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _conn: &mut dyn DatabaseConnection,
        _dialect: &dyn DialectAdapter,
    ) -> EngineResult<PostStepOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(EngineError::PostStep {
                step: self.name.clone(),
                message: message.clone(),
            }),
            None => Ok(PostStepOutcome::Completed(format!("{} done", self.name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_restores_dropped_tables() {
        let db = FakeDatabase::with_tables(&["a", "b"]);
        let mut conn = db.connection();

        conn.execute("BEGIN").await.unwrap();
        conn.execute("DROP TABLE IF EXISTS \"a\"").await.unwrap();
        assert_eq!(db.tables(), vec!["b"]);
        conn.execute("ROLLBACK").await.unwrap();

        assert_eq!(db.tables(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_drop_understands_every_quoting_style() {
        let db = FakeDatabase::with_tables(&["a", "b", "c", "d"]);
        let mut conn = db.connection();

        conn.execute("DROP TABLE IF EXISTS \"public\".\"a\", \"public\".\"b\" CASCADE")
            .await
            .unwrap();
        conn.execute("DROP TABLE IF EXISTS `c`").await.unwrap();

        assert_eq!(db.tables(), vec!["d"]);
    }

    #[tokio::test]
    async fn test_failed_statements_are_still_logged() {
        let db = FakeDatabase::with_script(FakeScript {
            tables: vec!["a".to_string()],
            fail_statements_containing: vec!["\"a\"".to_string()],
            ..FakeScript::default()
        });
        let mut conn = db.connection();

        assert!(conn.execute("DROP TABLE IF EXISTS \"a\"").await.is_err());
        assert_eq!(db.statements(), vec!["DROP TABLE IF EXISTS \"a\""]);
        assert_eq!(db.tables(), vec!["a"]);
    }

    #[test]
    fn test_created_table_name() {
        assert_eq!(
            created_table("CREATE TABLE IF NOT EXISTS dbfresh_migrations (id VARCHAR(255))"),
            Some("dbfresh_migrations".to_string())
        );
        assert_eq!(created_table("CREATE TABLE \"users\"(id INT)"), Some("users".to_string()));
    }
}
