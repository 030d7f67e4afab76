//! Durable store: one SQLite database owned by a dedicated worker thread.
//!
//! Callers never touch the connection. Work is shipped to the worker over
//! an mpsc channel as boxed closures and results come back over a oneshot,
//! so store writes can never block the thread that received an observer
//! callback.

use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use log::{error, info};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;

mod migrations;
mod queries;

pub use queries::{ActivityStats, TimelineBucket, TimelineRange};

use crate::context::NeuralSample;
use crate::models::{ActivityEvent, ActivityEventType, ContextEdge, ContextNode, ContextType, EdgeType};
use crate::pipeline::EventSink;
use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn event_type_from_str(value: &str) -> Result<ActivityEventType> {
    ActivityEventType::from_str(value).ok_or_else(|| anyhow!("unknown event type '{value}'"))
}

fn json_to_text<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to serialize column as JSON")
}

fn text_to_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_str(value).with_context(|| format!("failed to parse JSON column '{value}'"))
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("focustrace-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Batch insert for the buffered writer: one transaction per flush.
    pub async fn insert_events(&self, events: Vec<ActivityEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO activity_log
                     (id, event_type, app_identifier, app_name, window_title, event_data, timestamp, created_at, sequence_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for event in &events {
                    stmt.execute(params![
                        event.id,
                        event.event_type.as_str(),
                        event.app_identifier,
                        event.app_name,
                        event.window_title,
                        event
                            .event_data
                            .as_ref()
                            .map(json_to_text)
                            .transpose()?,
                        event.timestamp.to_rfc3339(),
                        event.created_at.to_rfc3339(),
                        event.sequence_id,
                    ])?;
                }
            }
            tx.commit().context("failed to commit event batch")?;
            Ok(())
        })
        .await
    }

    /// Insert-or-update; the engine persists the same node many times as
    /// it mutates in place.
    pub async fn upsert_context_node(&self, node: &ContextNode) -> Result<()> {
        let record = node.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO context_nodes
                 (id, label, context_type, started_at, ended_at, is_active, apps, window_titles,
                  event_count, focus_score, parent_context_id, related_context_ids,
                  clipboard_hashes, screenshot_files, note_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                     label = excluded.label,
                     context_type = excluded.context_type,
                     ended_at = excluded.ended_at,
                     is_active = excluded.is_active,
                     apps = excluded.apps,
                     window_titles = excluded.window_titles,
                     event_count = excluded.event_count,
                     focus_score = excluded.focus_score,
                     parent_context_id = excluded.parent_context_id,
                     related_context_ids = excluded.related_context_ids,
                     clipboard_hashes = excluded.clipboard_hashes,
                     screenshot_files = excluded.screenshot_files,
                     note_ids = excluded.note_ids",
                params![
                    record.id,
                    record.label,
                    record.context_type.as_str(),
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.is_active as i64,
                    json_to_text(&record.apps)?,
                    json_to_text(&record.window_titles)?,
                    record.event_count as i64,
                    record.focus_score,
                    record.parent_context_id,
                    json_to_text(&record.related_context_ids)?,
                    json_to_text(&record.clipboard_hashes)?,
                    json_to_text(&record.screenshot_files)?,
                    json_to_text(&record.note_ids)?,
                ],
            )
            .with_context(|| "failed to upsert context node")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_context_edge(&self, edge: &ContextEdge) -> Result<()> {
        let record = edge.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO context_edges (id, from_context_id, to_context_id, edge_type, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.from_context_id,
                    record.to_context_id,
                    record.edge_type.as_str(),
                    record.created_at.to_rfc3339(),
                    if record.metadata.is_null() {
                        None
                    } else {
                        Some(json_to_text(&record.metadata)?)
                    },
                ],
            )
            .with_context(|| "failed to insert context edge")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_neural_sample(&self, sample: &NeuralSample) -> Result<()> {
        let record = sample.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO neural_values (id, context_id, label, confidence, sampled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.context_id,
                    record.label.as_str(),
                    record.confidence,
                    record.sampled_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert neural sample")?;
            Ok(())
        })
        .await
    }

    /// Nodes left active by a crash get an end timestamp at startup, the
    /// same way interrupted timer sessions are finalized elsewhere.
    pub async fn close_dangling_nodes(&self, at: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE context_nodes SET is_active = 0, ended_at = ?1 WHERE is_active = 1",
                params![at.to_rfc3339()],
            )?;
            Ok(updated)
        })
        .await
    }

    pub async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_type, app_identifier, app_name, window_title, event_data, timestamp, created_at, sequence_id
                 FROM activity_log
                 WHERE timestamp >= ?1 AND timestamp < ?2
                 ORDER BY timestamp ASC",
            )?;

            let mut rows = stmt.query(params![start.to_rfc3339(), end.to_rfc3339()])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(ActivityEvent {
                    id: row.get(0)?,
                    event_type: event_type_from_str(&row.get::<_, String>(1)?)?,
                    app_identifier: row.get(2)?,
                    app_name: row.get(3)?,
                    window_title: row.get(4)?,
                    event_data: row
                        .get::<_, Option<String>>(5)?
                        .map(|s| text_to_json(&s))
                        .transpose()?,
                    timestamp: parse_datetime(&row.get::<_, String>(6)?)?,
                    created_at: parse_datetime(&row.get::<_, String>(7)?)?,
                    sequence_id: row.get(8)?,
                });
            }
            Ok(events)
        })
        .await
    }

    pub async fn count_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        self.execute(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM activity_log WHERE timestamp >= ?1 AND timestamp < ?2",
                params![start.to_rfc3339(), end.to_rfc3339()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    pub async fn stats_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ActivityStats> {
        self.execute(move |conn| {
            let range = params![start.to_rfc3339(), end.to_rfc3339()];

            let (event_count, first_event_at, last_event_at) = conn.query_row(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp)
                 FROM activity_log WHERE timestamp >= ?1 AND timestamp < ?2",
                range,
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )?;

            let mut stmt = conn.prepare(
                "SELECT event_type, COUNT(*) FROM activity_log
                 WHERE timestamp >= ?1 AND timestamp < ?2
                 GROUP BY event_type ORDER BY COUNT(*) DESC",
            )?;
            let counts_by_type = stmt
                .query_map(range, |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;

            let mut stmt = conn.prepare(
                "SELECT app_name, COUNT(*) FROM activity_log
                 WHERE timestamp >= ?1 AND timestamp < ?2 AND app_name IS NOT NULL
                 GROUP BY app_name ORDER BY COUNT(*) DESC LIMIT 10",
            )?;
            let top_apps = stmt
                .query_map(range, |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;

            Ok(ActivityStats {
                event_count,
                counts_by_type,
                top_apps,
                first_event_at: first_event_at.map(|s| parse_datetime(&s)).transpose()?,
                last_event_at: last_event_at.map(|s| parse_datetime(&s)).transpose()?,
            })
        })
        .await
    }

    /// Timeline buckets: hourly for today, daily for the week/month views.
    /// Bucket keys are prefixes of the stored RFC 3339 text, which is why
    /// the format has to stay fixed.
    pub async fn timeline(
        &self,
        range: TimelineRange,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimelineBucket>> {
        let (start, bucket_len) = match range {
            TimelineRange::Today => (start_of_day(now), 13usize),
            TimelineRange::Last7Days => (start_of_day(now) - Duration::days(6), 10),
            TimelineRange::Last30Days => (start_of_day(now) - Duration::days(29), 10),
        };

        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(timestamp, 1, ?1) AS bucket, app_name, COUNT(*)
                 FROM activity_log
                 WHERE timestamp >= ?2
                 GROUP BY bucket, app_name
                 ORDER BY bucket ASC",
            )?;

            let mut rows = stmt.query(params![bucket_len as i64, start.to_rfc3339()])?;
            // bucket -> (total, per-app counts)
            let mut buckets: Vec<(String, i64, HashMap<String, i64>)> = Vec::new();
            while let Some(row) = rows.next()? {
                let bucket: String = row.get(0)?;
                let app: Option<String> = row.get(1)?;
                let count: i64 = row.get(2)?;

                if buckets.last().map(|(b, _, _)| b.as_str()) != Some(bucket.as_str()) {
                    buckets.push((bucket, 0, HashMap::new()));
                }
                let (_, total, apps) = buckets.last_mut().expect("bucket just pushed");
                *total += count;
                if let Some(app) = app {
                    *apps.entry(app).or_insert(0) += count;
                }
            }

            Ok(buckets
                .into_iter()
                .map(|(bucket, event_count, apps)| TimelineBucket {
                    bucket,
                    event_count,
                    top_app: apps
                        .into_iter()
                        .max_by_key(|(_, count)| *count)
                        .map(|(app, _)| app),
                })
                .collect())
        })
        .await
    }

    pub async fn get_context_node(&self, id: &str) -> Result<Option<ContextNode>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, label, context_type, started_at, ended_at, is_active, apps,
                        window_titles, event_count, focus_score, parent_context_id,
                        related_context_ids, clipboard_hashes, screenshot_files, note_ids
                 FROM context_nodes WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(node_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn context_nodes_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ContextNode>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, label, context_type, started_at, ended_at, is_active, apps,
                        window_titles, event_count, focus_score, parent_context_id,
                        related_context_ids, clipboard_hashes, screenshot_files, note_ids
                 FROM context_nodes
                 WHERE started_at >= ?1 AND started_at < ?2
                 ORDER BY started_at ASC",
            )?;

            let mut rows = stmt.query(params![start.to_rfc3339(), end.to_rfc3339()])?;
            let mut nodes = Vec::new();
            while let Some(row) = rows.next()? {
                nodes.push(node_from_row(row)?);
            }
            Ok(nodes)
        })
        .await
    }

    pub async fn edges_from(&self, context_id: &str) -> Result<Vec<ContextEdge>> {
        let context_id = context_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, from_context_id, to_context_id, edge_type, created_at, metadata
                 FROM context_edges WHERE from_context_id = ?1
                 ORDER BY created_at ASC",
            )?;

            let mut rows = stmt.query(params![context_id])?;
            let mut edges = Vec::new();
            while let Some(row) = rows.next()? {
                let edge_type: String = row.get(3)?;
                edges.push(ContextEdge {
                    id: row.get(0)?,
                    from_context_id: row.get(1)?,
                    to_context_id: row.get(2)?,
                    edge_type: EdgeType::from_str(&edge_type)
                        .ok_or_else(|| anyhow!("unknown edge type '{edge_type}'"))?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?)?,
                    metadata: row
                        .get::<_, Option<String>>(5)?
                        .map(|s| text_to_json(&s))
                        .transpose()?
                        .unwrap_or(serde_json::Value::Null),
                });
            }
            Ok(edges)
        })
        .await
    }
}

impl EventSink for Database {
    fn insert_batch(
        &self,
        events: Vec<ActivityEvent>,
    ) -> impl Future<Output = Result<()>> + Send {
        let db = self.clone();
        async move { db.insert_events(events).await }
    }
}

fn node_from_row(row: &rusqlite::Row<'_>) -> Result<ContextNode> {
    let context_type: String = row.get(2)?;
    Ok(ContextNode {
        id: row.get(0)?,
        label: row.get(1)?,
        context_type: ContextType::from_str(&context_type)
            .ok_or_else(|| anyhow!("unknown context type '{context_type}'"))?,
        started_at: parse_datetime(&row.get::<_, String>(3)?)?,
        ended_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_datetime(&s))
            .transpose()?,
        is_active: row.get::<_, i64>(5)? != 0,
        apps: text_to_json(&row.get::<_, String>(6)?)?,
        window_titles: text_to_json(&row.get::<_, String>(7)?)?,
        event_count: row.get::<_, i64>(8)?.max(0) as u64,
        focus_score: row.get(9)?,
        parent_context_id: row.get(10)?,
        related_context_ids: text_to_json(&row.get::<_, String>(11)?)?,
        clipboard_hashes: text_to_json(&row.get::<_, String>(12)?)?,
        screenshot_files: text_to_json(&row.get::<_, String>(13)?)?,
        note_ids: text_to_json(&row.get::<_, String>(14)?)?,
    })
}

pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
        .single()
        .expect("midnight always exists in UTC")
}
