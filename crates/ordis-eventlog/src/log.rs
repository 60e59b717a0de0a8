use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, warn};

use ordis_core::error::{OrdisError, Result};

use crate::entry::{EntryFilter, EventKind, EventLogEntry};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        tool TEXT NOT NULL,
        args TEXT NOT NULL,
        result TEXT NOT NULL,
        error TEXT,
        duration_ms INTEGER NOT NULL,
        agent_id TEXT,
        session_id TEXT,
        channel TEXT,
        success INTEGER NOT NULL,
        tags TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_entries_kind ON entries(kind, timestamp);
    CREATE INDEX IF NOT EXISTS idx_entries_tool ON entries(tool);

    CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
        tool,
        error,
        tags,
        entry_id UNINDEXED,
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
        INSERT INTO entries_fts(tool, error, tags, entry_id)
        VALUES (new.tool, coalesce(new.error, ''), new.tags, new.id);
    END;

    CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
        DELETE FROM entries_fts WHERE entry_id = old.id;
    END;
";

/// Aggregate statistics over the log.
#[derive(Debug, Clone)]
pub struct LogStats {
    pub total_entries: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub top_tools: Vec<(String, u64)>,
    pub top_errors: Vec<(String, u64)>,
    /// `(YYYY-MM-DD, count)` for the last 30 days, oldest first.
    pub per_day: Vec<(String, u64)>,
}

/// Append-only operational log backed by SQLite with an FTS5 index over
/// `tool`, `error`, and `tags`. Concurrent writers are serialized by the
/// connection lock; readers see a consistent snapshot per query.
pub struct EventLog {
    conn: Mutex<Connection>,
}

impl EventLog {
    /// Open or create a database at the given path (WAL mode).
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OrdisError::Database(format!("create log directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Event log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (tests, ephemeral runs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one entry. Assigns a fresh id when the entry carries none.
    /// Returns the id.
    pub fn insert(&self, mut entry: EventLogEntry) -> Result<String> {
        if entry.id.is_empty() {
            entry.id = uuid::Uuid::new_v4().to_string();
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO entries
             (id, kind, timestamp, tool, args, result, error, duration_ms,
              agent_id, session_id, channel, success, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                entry.id,
                entry.kind.as_str(),
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                entry.tool,
                entry.args.to_string(),
                entry.result.to_string(),
                entry.error,
                entry.duration_ms as i64,
                entry.agent_id,
                entry.session_id,
                entry.channel,
                entry.success as i64,
                serde_json::to_string(&entry.tags)?,
            ],
        )
        .map_err(db_err)?;
        Ok(entry.id)
    }

    /// Query entries by any combination of filter fields, newest first.
    pub fn get_entries(&self, filter: &EntryFilter) -> Result<Vec<EventLogEntry>> {
        let (where_sql, params) = build_where(filter);
        let sql = format!(
            "SELECT id, kind, timestamp, tool, args, result, error, duration_ms,
                    agent_id, session_id, channel, success, tags
             FROM entries{} ORDER BY timestamp DESC LIMIT {}",
            where_sql,
            filter.limit.unwrap_or(1000)
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), row_to_entry)
            .map_err(db_err)?;

        collect_rows(rows)
    }

    /// Free-text search over `tool`, `error`, and `tags`.
    ///
    /// The primary path uses the FTS5 index. If the index query fails (for
    /// example on query syntax FTS rejects), falls back to substring matching
    /// with identical filter semantics: correct, just slower.
    pub fn search(&self, free_text: &str, filter: &EntryFilter) -> Result<Vec<EventLogEntry>> {
        match self.search_fts(free_text, filter) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(error = %e, query = free_text, "FTS search failed, using substring fallback");
                self.search_substring(free_text, filter)
            }
        }
    }

    fn search_fts(&self, free_text: &str, filter: &EntryFilter) -> Result<Vec<EventLogEntry>> {
        let (where_sql, mut params) = build_where_with_alias(filter, "e");
        let sql = format!(
            "SELECT e.id, e.kind, e.timestamp, e.tool, e.args, e.result, e.error,
                    e.duration_ms, e.agent_id, e.session_id, e.channel, e.success, e.tags
             FROM entries e
             JOIN entries_fts f ON f.entry_id = e.id
             WHERE f MATCH ?1{}
             ORDER BY e.timestamp DESC LIMIT {}",
            if where_sql.is_empty() {
                String::new()
            } else {
                format!(" AND {}", &where_sql)
            },
            filter.limit.unwrap_or(1000)
        );
        params.insert(0, free_text.to_string());

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), row_to_entry)
            .map_err(db_err)?;
        collect_rows(rows)
    }

    fn search_substring(&self, free_text: &str, filter: &EntryFilter) -> Result<Vec<EventLogEntry>> {
        let (clauses, mut params) = filter_clauses(filter, "", 2);
        let extra = if clauses.is_empty() {
            String::new()
        } else {
            format!(" AND {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT id, kind, timestamp, tool, args, result, error, duration_ms,
                    agent_id, session_id, channel, success, tags
             FROM entries
             WHERE (tool LIKE ?1 OR coalesce(error, '') LIKE ?1 OR tags LIKE ?1){}
             ORDER BY timestamp DESC LIMIT {}",
            extra,
            filter.limit.unwrap_or(1000)
        );
        params.insert(0, format!("%{}%", free_text));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), row_to_entry)
            .map_err(db_err)?;
        collect_rows(rows)
    }

    /// Aggregate totals, success rate, top tools/errors, and per-day counts
    /// for the last 30 days.
    pub fn stats(&self) -> Result<LogStats> {
        let conn = self.lock()?;

        let total_entries: u64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |r| r.get::<_, i64>(0))
            .map_err(db_err)? as u64;
        let success_count: u64 = conn
            .query_row("SELECT COUNT(*) FROM entries WHERE success = 1", [], |r| {
                r.get::<_, i64>(0)
            })
            .map_err(db_err)? as u64;

        let top_tools = top_counts(
            &conn,
            "SELECT tool, COUNT(*) c FROM entries WHERE kind = 'tool_execution'
             GROUP BY tool ORDER BY c DESC LIMIT 10",
        )?;
        let top_errors = top_counts(
            &conn,
            "SELECT error, COUNT(*) c FROM entries WHERE error IS NOT NULL
             GROUP BY error ORDER BY c DESC LIMIT 10",
        )?;

        let cutoff = (Utc::now() - Duration::days(30)).to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut stmt = conn
            .prepare(
                "SELECT substr(timestamp, 1, 10) d, COUNT(*) FROM entries
                 WHERE timestamp >= ?1 GROUP BY d ORDER BY d ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([cutoff], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64))
            })
            .map_err(db_err)?;
        let mut per_day = Vec::new();
        for row in rows {
            per_day.push(row.map_err(db_err)?);
        }

        Ok(LogStats {
            total_entries,
            success_count,
            success_rate: if total_entries == 0 {
                0.0
            } else {
                success_count as f64 / total_entries as f64
            },
            top_tools,
            top_errors,
            per_day,
        })
    }

    /// Delete entries older than `date`; returns the deleted count.
    pub fn purge_older_than(&self, date: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM entries WHERE timestamp < ?1",
                [date.to_rfc3339_opts(SecondsFormat::Micros, true)],
            )
            .map_err(db_err)?;
        Ok(deleted)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OrdisError::Database(e.to_string()))
    }
}

fn db_err(e: rusqlite::Error) -> OrdisError {
    OrdisError::Database(e.to_string())
}

fn top_counts(conn: &Connection, sql: &str) -> Result<Vec<(String, u64)>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64))
        })
        .map_err(db_err)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(db_err)?);
    }
    Ok(out)
}

/// Build `" WHERE ..."` (or empty) plus positional params starting at ?2
/// (the caller inserts a leading param for search queries) or ?1 otherwise.
fn build_where(filter: &EntryFilter) -> (String, Vec<String>) {
    let (clauses, params) = filter_clauses(filter, "", 1);
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

fn build_where_with_alias(filter: &EntryFilter, alias: &str) -> (String, Vec<String>) {
    let prefix = format!("{}.", alias);
    let (clauses, params) = filter_clauses(filter, &prefix, 2);
    (clauses.join(" AND "), params)
}

fn filter_clauses(
    filter: &EntryFilter,
    prefix: &str,
    first_index: usize,
) -> (Vec<String>, Vec<String>) {
    let mut pairs: Vec<(String, String)> = Vec::new();

    if let Some(kind) = filter.kind {
        pairs.push((format!("{}kind = ", prefix), kind.as_str().to_string()));
    }
    if let Some(ref tool) = filter.tool {
        pairs.push((format!("{}tool = ", prefix), tool.clone()));
    }
    if let Some(ref agent) = filter.agent_id {
        pairs.push((format!("{}agent_id = ", prefix), agent.clone()));
    }
    if let Some(ref session) = filter.session_id {
        pairs.push((format!("{}session_id = ", prefix), session.clone()));
    }
    if let Some(success) = filter.success {
        pairs.push((
            format!("{}success = ", prefix),
            if success { "1" } else { "0" }.to_string(),
        ));
    }
    if let Some(since) = filter.since {
        pairs.push((
            format!("{}timestamp >= ", prefix),
            since.to_rfc3339_opts(SecondsFormat::Micros, true),
        ));
    }
    if let Some(until) = filter.until {
        pairs.push((
            format!("{}timestamp < ", prefix),
            until.to_rfc3339_opts(SecondsFormat::Micros, true),
        ));
    }

    let mut clauses = Vec::with_capacity(pairs.len());
    let mut params = Vec::with_capacity(pairs.len());
    for (i, (clause, value)) in pairs.into_iter().enumerate() {
        clauses.push(format!("{}?{}", clause, first_index + i));
        params.push(value);
    }
    (clauses, params)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventLogEntry> {
    let kind_str: String = row.get(1)?;
    let ts_str: String = row.get(2)?;
    let args_str: String = row.get(4)?;
    let result_str: String = row.get(5)?;
    let tags_str: String = row.get(12)?;

    Ok(EventLogEntry {
        id: row.get(0)?,
        kind: EventKind::parse(&kind_str).unwrap_or(EventKind::System),
        timestamp: DateTime::parse_from_rfc3339(&ts_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        tool: row.get(3)?,
        args: serde_json::from_str(&args_str).unwrap_or(serde_json::Value::Null),
        result: serde_json::from_str(&result_str).unwrap_or(serde_json::Value::Null),
        error: row.get(6)?,
        duration_ms: row.get::<_, i64>(7)? as u64,
        agent_id: row.get(8)?,
        session_id: row.get(9)?,
        channel: row.get(10)?,
        success: row.get::<_, i64>(11)? != 0,
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
    })
}

fn collect_rows(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<EventLogEntry>>,
) -> Result<Vec<EventLogEntry>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(db_err)?);
    }
    Ok(out)
}
