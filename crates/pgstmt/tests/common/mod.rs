//! Scripted driver for integration tests.
//!
//! A [`StubConn`] replays a queue of expected driver calls in order and panics
//! on anything it was not told to expect. Row values are encoded with the real
//! `ToSql` implementations, so decoding goes through the same `FromSql` path as
//! rows coming from a server.

#![allow(dead_code)]

use bytes::BytesMut;
use pgstmt::tokio_postgres::types::{FromSqlOwned, IsNull, ToSql, Type};
use pgstmt::{
    Connection, DbRow, GenericClient, IntoArguments, OrmError, OrmResult, RowCursor,
    TransactionClient, TransactionOptions,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Rows ──

#[derive(Debug, Clone)]
pub struct StubRow {
    columns: Vec<(String, Type, Option<BytesMut>)>,
}

impl StubRow {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Append a column holding `value` encoded as `ty`.
    pub fn col(mut self, name: &str, ty: Type, value: impl ToSql) -> Self {
        let mut buf = BytesMut::new();
        let raw = match value.to_sql_checked(&ty, &mut buf).unwrap() {
            IsNull::Yes => None,
            IsNull::No => Some(buf),
        };
        self.columns.push((name.to_string(), ty, raw));
        self
    }
}

impl DbRow for StubRow {
    fn len(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, idx: usize) -> Option<&str> {
        self.columns.get(idx).map(|(name, _, _)| name.as_str())
    }

    fn try_get<T: FromSqlOwned>(&self, idx: usize) -> OrmResult<T> {
        let (name, ty, raw) = self
            .columns
            .get(idx)
            .ok_or_else(|| OrmError::decode(format!("#{idx}"), "column index out of range"))?;
        if !T::accepts(ty) {
            return Err(OrmError::decode(name.clone(), format!("cannot decode {ty}")));
        }
        T::from_sql_nullable(ty, raw.as_deref())
            .map_err(|e| OrmError::decode(name.clone(), e.to_string()))
    }
}

/// One `INT4` column named `id` per value.
pub fn id_rows(ids: &[i32]) -> Vec<StubRow> {
    ids.iter()
        .map(|id| StubRow::new().col("id", Type::INT4, *id))
        .collect()
}

// ── Expectations ──

/// Debug-formatted bind values, the form the stub compares arguments in.
pub fn args(values: impl IntoArguments) -> Vec<String> {
    values
        .into_arguments()
        .iter()
        .map(|a| format!("{a:?}"))
        .collect()
}

#[derive(Debug)]
enum Step {
    Begin(String),
    Exec {
        sql: String,
        args: Vec<String>,
        delay: Option<Duration>,
        result: Result<u64, String>,
    },
    Query {
        sql: String,
        args: Vec<String>,
        result: Result<Vec<StubRow>, String>,
    },
    Commit(Result<(), String>),
    Rollback(Result<(), String>),
}

#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    closes: AtomicUsize,
    dropped_open: AtomicUsize,
}

impl Script {
    fn next(&self, what: &str) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected driver call: {what}"))
    }

    fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> (Option<Duration>, OrmResult<u64>) {
        match self.next(sql) {
            Step::Exec {
                sql: expected,
                args: expected_args,
                delay,
                result,
            } => {
                assert!(sql.contains(&expected), "expected exec `{expected}`, got `{sql}`");
                assert_eq!(debug_params(params), expected_args, "arguments for `{sql}`");
                (delay, result.map_err(OrmError::Other))
            }
            other => panic!("expected {other:?}, got exec `{sql}`"),
        }
    }

    fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<StubRow>> {
        match self.next(sql) {
            Step::Query {
                sql: expected,
                args: expected_args,
                result,
            } => {
                assert!(sql.contains(&expected), "expected query `{expected}`, got `{sql}`");
                assert_eq!(debug_params(params), expected_args, "arguments for `{sql}`");
                result.map_err(OrmError::Other)
            }
            other => panic!("expected {other:?}, got query `{sql}`"),
        }
    }
}

fn debug_params(params: &[&(dyn ToSql + Sync)]) -> Vec<String> {
    params.iter().map(|p| format!("{p:?}")).collect()
}

// ── Connection ──

/// Stub connection, the stand-in for `tokio_postgres::Client`.
#[derive(Clone, Default)]
pub struct StubConn {
    script: Arc<Script>,
}

impl StubConn {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, step: Step) -> &Self {
        self.script.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn expect_begin(&self) -> &Self {
        self.expect_begin_sql("BEGIN")
    }

    pub fn expect_begin_sql(&self, sql: &str) -> &Self {
        self.push(Step::Begin(sql.to_string()))
    }

    pub fn expect_exec(&self, sql: &str, args: Vec<String>, rows_affected: u64) -> &Self {
        self.push(Step::Exec {
            sql: sql.to_string(),
            args,
            delay: None,
            result: Ok(rows_affected),
        })
    }

    pub fn expect_exec_slow(&self, sql: &str, delay: Duration) -> &Self {
        self.push(Step::Exec {
            sql: sql.to_string(),
            args: Vec::new(),
            delay: Some(delay),
            result: Ok(0),
        })
    }

    pub fn expect_exec_error(&self, sql: &str, args: Vec<String>, message: &str) -> &Self {
        self.push(Step::Exec {
            sql: sql.to_string(),
            args,
            delay: None,
            result: Err(message.to_string()),
        })
    }

    pub fn expect_query(&self, sql: &str, args: Vec<String>, rows: Vec<StubRow>) -> &Self {
        self.push(Step::Query {
            sql: sql.to_string(),
            args,
            result: Ok(rows),
        })
    }

    pub fn expect_query_error(&self, sql: &str, args: Vec<String>, message: &str) -> &Self {
        self.push(Step::Query {
            sql: sql.to_string(),
            args,
            result: Err(message.to_string()),
        })
    }

    pub fn expect_commit(&self) -> &Self {
        self.push(Step::Commit(Ok(())))
    }

    pub fn expect_commit_error(&self, message: &str) -> &Self {
        self.push(Step::Commit(Err(message.to_string())))
    }

    pub fn expect_rollback(&self) -> &Self {
        self.push(Step::Rollback(Ok(())))
    }

    pub fn expect_rollback_error(&self, message: &str) -> &Self {
        self.push(Step::Rollback(Err(message.to_string())))
    }

    /// Panic unless every scripted step has been consumed.
    pub fn assert_expectations_met(&self) {
        let steps = self.script.steps.lock().unwrap();
        assert!(steps.is_empty(), "unconsumed expectations: {steps:?}");
    }

    /// Number of driver calls made so far (cursor closes excluded).
    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Number of cursors closed so far.
    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    /// Number of transactions dropped while still open, which the real driver
    /// rolls back on drop.
    pub fn dropped_open(&self) -> usize {
        self.script.dropped_open.load(Ordering::SeqCst)
    }
}

pub struct StubCursor {
    rows: VecDeque<StubRow>,
    script: Arc<Script>,
}

impl RowCursor for StubCursor {
    type Row = StubRow;

    async fn next(&mut self) -> OrmResult<Option<StubRow>> {
        Ok(self.rows.pop_front())
    }

    async fn close(self) -> OrmResult<()> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl GenericClient for StubConn {
    type Row = StubRow;
    type Cursor = StubCursor;

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        let (delay, result) = self.script.execute(sql, params);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<StubCursor> {
        let rows = self.script.query(sql, params)?;
        Ok(StubCursor {
            rows: rows.into(),
            script: Arc::clone(&self.script),
        })
    }
}

/// Transaction handle handed out by [`StubConn::begin`].
///
/// Like a server transaction, it is aborted by any failed statement.
pub struct StubTx {
    conn: StubConn,
    aborted: AtomicBool,
    finished: bool,
}

impl StubTx {
    fn track<T>(&self, result: OrmResult<T>) -> OrmResult<T> {
        if result.is_err() {
            self.aborted.store(true, Ordering::SeqCst);
        }
        result
    }
}

impl GenericClient for StubTx {
    type Row = StubRow;
    type Cursor = StubCursor;

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        self.track(GenericClient::execute(&self.conn, sql, params).await)
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<StubCursor> {
        self.track(GenericClient::query(&self.conn, sql, params).await)
    }
}

impl TransactionClient for StubTx {
    async fn commit(&mut self) -> OrmResult<()> {
        self.finished = true;
        match self.conn.script.next("COMMIT") {
            Step::Commit(result) => result.map_err(OrmError::Other),
            other => panic!("expected {other:?}, got COMMIT"),
        }
    }

    async fn rollback(&mut self) -> OrmResult<()> {
        self.finished = true;
        match self.conn.script.next("ROLLBACK") {
            Step::Rollback(result) => result.map_err(OrmError::Other),
            other => panic!("expected {other:?}, got ROLLBACK"),
        }
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn mark_aborted(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

impl Drop for StubTx {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.script.dropped_open.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Connection for StubConn {
    type Transaction<'t> = StubTx;

    async fn begin(&mut self, options: &TransactionOptions) -> OrmResult<StubTx> {
        let sql = options.begin_sql();
        match self.script.next(&sql) {
            Step::Begin(expected) => assert_eq!(sql, expected),
            other => panic!("expected {other:?}, got `{sql}`"),
        }
        Ok(StubTx {
            conn: self.clone(),
            aborted: AtomicBool::new(false),
            finished: false,
        })
    }
}
