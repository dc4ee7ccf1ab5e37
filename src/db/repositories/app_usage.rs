use anyhow::Result;
use rusqlite::{params, Connection};

use crate::db::{
    helpers::{read_seconds, seconds_param},
    models::TopApp,
    Database,
};
use crate::timer::AppUsage;

/// Append seconds for one app; a repeated flush for the same pair adds up.
pub(super) fn insert_usage(
    conn: &Connection,
    session_id: &str,
    bundle_id: &str,
    seconds: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO app_usage (session_id, bundle_id, seconds)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(session_id, bundle_id) DO UPDATE SET
             seconds = app_usage.seconds + excluded.seconds",
        params![session_id, bundle_id, seconds_param(seconds)?],
    )?;
    Ok(())
}

fn usage_for_session(conn: &Connection, session_id: &str) -> Result<Vec<AppUsage>> {
    let mut stmt = conn.prepare(
        "SELECT bundle_id, seconds
         FROM app_usage
         WHERE session_id = ?1
         ORDER BY seconds DESC, bundle_id ASC",
    )?;

    let mut rows = stmt.query(params![session_id])?;
    let mut usage = Vec::new();
    while let Some(row) = rows.next()? {
        usage.push(AppUsage {
            bundle_id: row.get("bundle_id")?,
            seconds: read_seconds(row, "seconds")?,
        });
    }
    Ok(usage)
}

pub(super) fn top_apps(conn: &Connection, session_id: &str, limit: usize) -> Result<Vec<TopApp>> {
    let usage = usage_for_session(conn, session_id)?;
    let total: u64 = usage.iter().map(|entry| entry.seconds).sum();

    Ok(usage
        .into_iter()
        .take(limit)
        .map(|entry| TopApp {
            percentage: if total == 0 {
                0.0
            } else {
                entry.seconds as f64 * 100.0 / total as f64
            },
            bundle_id: entry.bundle_id,
            seconds: entry.seconds,
        })
        .collect())
}

impl Database {
    pub async fn record_app_usage(
        &self,
        session_id: &str,
        bundle_id: &str,
        seconds: u64,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let bundle_id = bundle_id.to_string();
        self.execute(move |conn| insert_usage(conn, &session_id, &bundle_id, seconds))
            .await
    }

    pub async fn get_app_usage_for_session(&self, session_id: &str) -> Result<Vec<AppUsage>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| usage_for_session(conn, &session_id))
            .await
    }

    pub async fn get_top_apps_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TopApp>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| top_apps(conn, &session_id, limit))
            .await
    }
}
