use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{now_timestamp, read_optional_timestamp, read_timestamp, timestamp},
    models::{Session, SessionListItem},
    Database,
};
use crate::timer::FinalizedSession;

use super::app_usage::{insert_usage, top_apps};

const SESSION_COLUMNS: &str =
    "id, started_at, ended_at, planned_minutes, completed, summary, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<Session> {
    let planned_minutes: i64 = row.get("planned_minutes")?;

    Ok(Session {
        id: row.get("id")?,
        started_at: read_timestamp(row, "started_at")?,
        ended_at: read_optional_timestamp(row, "ended_at")?,
        planned_minutes: u32::try_from(planned_minutes)
            .map_err(|_| anyhow!("planned_minutes out of range: {planned_minutes}"))?,
        completed: row.get("completed")?,
        summary: row.get("summary")?,
        created_at: read_timestamp(row, "created_at")?,
        updated_at: read_timestamp(row, "updated_at")?,
    })
}

fn mark_finalized(conn: &Connection, session_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
    let rows_affected = conn.execute(
        "UPDATE sessions
         SET completed = 1,
             ended_at = ?1,
             updated_at = ?1
         WHERE id = ?2",
        params![timestamp(ended_at), session_id],
    )?;

    if rows_affected == 0 {
        bail!("Session {session_id} not found");
    }
    Ok(())
}

impl Database {
    /// Record the start of a focus attempt and return its identifier.
    pub async fn create_session(
        &self,
        started_at: DateTime<Utc>,
        planned_minutes: u32,
    ) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let id = session_id.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, started_at, ended_at, planned_minutes, completed, summary, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, 0, NULL, ?2, ?2)",
                params![id, timestamp(started_at), planned_minutes],
            )?;
            Ok(())
        })
        .await?;
        Ok(session_id)
    }

    pub async fn finalize_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| mark_finalized(conn, &session_id, ended_at))
            .await
    }

    /// Mark the session completed and flush its usage rows in one transaction.
    pub async fn persist_finalized_session(&self, finalized: &FinalizedSession) -> Result<()> {
        let record = finalized.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            mark_finalized(&tx, &record.id, record.ended_at)?;
            for entry in &record.usage {
                insert_usage(&tx, &record.id, &entry.bundle_id, entry.seconds)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Store a summary text. Without `overwrite`, an existing summary wins.
    /// Returns whether the row changed.
    pub async fn update_session_summary(
        &self,
        session_id: &str,
        summary: &str,
        overwrite: bool,
    ) -> Result<bool> {
        let session_id = session_id.to_string();
        let summary = summary.to_string();
        self.execute(move |conn| {
            let sql = if overwrite {
                "UPDATE sessions SET summary = ?1, updated_at = ?2 WHERE id = ?3"
            } else {
                "UPDATE sessions SET summary = ?1, updated_at = ?2 WHERE id = ?3 AND summary IS NULL"
            };
            let rows_affected =
                conn.execute(sql, params![summary, now_timestamp(), session_id])?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Most recent first.
    pub async fn list_sessions(&self, limit: usize, offset: usize) -> Result<Vec<Session>> {
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM sessions
                 ORDER BY started_at DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;

            let mut rows = stmt.query(params![limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn list_session_items(
        &self,
        limit: usize,
        offset: usize,
        top_apps_limit: usize,
    ) -> Result<Vec<SessionListItem>> {
        let sessions = self.list_sessions(limit, offset).await?;
        self.execute(move |conn| {
            sessions
                .into_iter()
                .map(|session| {
                    let top_apps = top_apps(conn, &session.id, top_apps_limit)?;
                    Ok(SessionListItem { session, top_apps })
                })
                .collect()
        })
        .await
    }

    /// Delete a session and its usage rows (cascade). Returns whether it existed.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let existed: Option<String> = conn
                .query_row(
                    "SELECT id FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existed.is_none() {
                return Ok(false);
            }
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(true)
        })
        .await
    }
}
