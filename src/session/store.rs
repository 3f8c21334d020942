//! SQLite persistence for sessions and voice profiles.
//!
//! Segments and speakers are stored as JSON columns; sessions are read and
//! written whole, which matches how the orchestrator owns a session
//! exclusively while recording and saves snapshots of it.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::debug;

use super::model::{RecordingSession, SourceMode};
use crate::speaker::VoiceProfile;

pub trait SessionStore: Send + Sync {
    fn load_sessions(&self) -> Result<Vec<RecordingSession>>;
    fn get_session(&self, id: &str) -> Result<Option<RecordingSession>>;
    fn save_session(&self, session: &RecordingSession) -> Result<()>;
    fn delete_session(&self, id: &str) -> Result<()>;
}

pub struct SqliteSessionStore {
    db_path: PathBuf,
}

impl SqliteSessionStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::global::db_file()?))
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let conn =
            Connection::open(&self.db_path).context("Failed to open database connection")?;
        migrate(&conn)?;
        Ok(conn)
    }

    // ------------------------------------------------------------------
    // Voice profiles
    // ------------------------------------------------------------------

    pub fn load_profiles(&self) -> Result<Vec<VoiceProfile>> {
        let conn = self.open()?;
        load_profiles(&conn)
    }

    pub fn save_profile(&self, profile: &VoiceProfile) -> Result<i64> {
        let conn = self.open()?;
        save_profile(&conn, profile)
    }
}

impl SessionStore for SqliteSessionStore {
    fn load_sessions(&self) -> Result<Vec<RecordingSession>> {
        let conn = self.open()?;
        load_sessions(&conn)
    }

    fn get_session(&self, id: &str) -> Result<Option<RecordingSession>> {
        let conn = self.open()?;
        get_session(&conn, id)
    }

    fn save_session(&self, session: &RecordingSession) -> Result<()> {
        let conn = self.open()?;
        save_session(&conn, session)
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", [id])
            .context("Failed to delete session")?;
        Ok(())
    }
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            mode TEXT NOT NULL,
            summary TEXT,
            mic_audio_path TEXT,
            system_audio_path TEXT,
            segments TEXT NOT NULL,
            speakers TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create sessions table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_started_at
         ON sessions(started_at DESC)",
        [],
    )
    .context("Failed to create index on started_at")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS voice_profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            embedding TEXT,
            features TEXT,
            sample_count INTEGER NOT NULL,
            trained_secs REAL NOT NULL,
            history TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create voice_profiles table")?;

    Ok(())
}

pub fn save_session(conn: &Connection, session: &RecordingSession) -> Result<()> {
    let segments = serde_json::to_string(&session.segments)?;
    let speakers = serde_json::to_string(&session.speakers)?;

    conn.execute(
        "INSERT INTO sessions
            (id, started_at, ended_at, mode, summary,
             mic_audio_path, system_audio_path, segments, speakers)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            ended_at = excluded.ended_at,
            summary = excluded.summary,
            mic_audio_path = excluded.mic_audio_path,
            system_audio_path = excluded.system_audio_path,
            segments = excluded.segments,
            speakers = excluded.speakers",
        rusqlite::params![
            session.id,
            session.started_at.to_rfc3339(),
            session.ended_at.map(|t| t.to_rfc3339()),
            session.mode.as_str(),
            session.summary,
            session.mic_audio_path,
            session.system_audio_path,
            segments,
            speakers,
        ],
    )
    .context("Failed to save session")?;

    debug!(
        "Saved session {} ({} segments)",
        session.id,
        session.segments.len()
    );
    Ok(())
}

pub fn load_sessions(conn: &Connection) -> Result<Vec<RecordingSession>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, started_at, ended_at, mode, summary,
                    mic_audio_path, system_audio_path, segments, speakers
             FROM sessions ORDER BY started_at DESC",
        )
        .context("Failed to prepare session query")?;

    let sessions = stmt
        .query_map([], row_to_session)
        .context("Failed to query sessions")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to map sessions")?;

    Ok(sessions)
}

pub fn get_session(conn: &Connection, id: &str) -> Result<Option<RecordingSession>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, started_at, ended_at, mode, summary,
                    mic_audio_path, system_audio_path, segments, speakers
             FROM sessions WHERE id = ?1",
        )
        .context("Failed to prepare session query")?;

    let mut rows = stmt
        .query_map([id], row_to_session)
        .context("Failed to query session")?;

    match rows.next() {
        Some(row) => Ok(Some(row.context("Failed to map session")?)),
        None => Ok(None),
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordingSession> {
    let id: String = row.get(0)?;
    let started_at: String = row.get(1)?;
    let ended_at: Option<String> = row.get(2)?;
    let mode: String = row.get(3)?;
    let summary: Option<String> = row.get(4)?;
    let mic_audio_path: Option<String> = row.get(5)?;
    let system_audio_path: Option<String> = row.get(6)?;
    let segments_json: String = row.get(7)?;
    let speakers_json: String = row.get(8)?;

    let parse_time = |s: &str| {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&chrono::Utc))
            .map_err(|_| rusqlite::Error::InvalidQuery)
    };

    let mode = match mode.as_str() {
        "microphone" => SourceMode::Microphone,
        "system_audio" => SourceMode::SystemAudio,
        "both" => SourceMode::Both,
        _ => return Err(rusqlite::Error::InvalidQuery),
    };

    Ok(RecordingSession {
        id,
        started_at: parse_time(&started_at)?,
        ended_at: match ended_at {
            Some(t) => Some(parse_time(&t)?),
            None => None,
        },
        mode,
        segments: serde_json::from_str(&segments_json)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        speakers: serde_json::from_str(&speakers_json)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        summary,
        mic_audio_path,
        system_audio_path,
    })
}

pub fn save_profile(conn: &Connection, profile: &VoiceProfile) -> Result<i64> {
    let embedding = profile
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let features = profile
        .features
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let history = serde_json::to_string(&profile.history)?;

    conn.execute(
        "INSERT INTO voice_profiles
            (name, embedding, features, sample_count, trained_secs, history)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(name) DO UPDATE SET
            embedding = excluded.embedding,
            features = excluded.features,
            sample_count = excluded.sample_count,
            trained_secs = excluded.trained_secs,
            history = excluded.history",
        rusqlite::params![
            profile.name,
            embedding,
            features,
            profile.sample_count,
            profile.trained_secs,
            history,
        ],
    )
    .context("Failed to save voice profile")?;

    let id: i64 = conn
        .query_row(
            "SELECT id FROM voice_profiles WHERE name = ?1",
            [&profile.name],
            |row| row.get(0),
        )
        .context("Failed to read profile id")?;

    Ok(id)
}

pub fn load_profiles(conn: &Connection) -> Result<Vec<VoiceProfile>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, embedding, features, sample_count, trained_secs, history
             FROM voice_profiles ORDER BY name",
        )
        .context("Failed to prepare profile query")?;

    let profiles = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let embedding: Option<String> = row.get(2)?;
            let features: Option<String> = row.get(3)?;
            let sample_count: u32 = row.get(4)?;
            let trained_secs: f64 = row.get(5)?;
            let history: String = row.get(6)?;

            Ok(VoiceProfile {
                id: Some(id),
                name,
                embedding: embedding
                    .map(|e| serde_json::from_str(&e))
                    .transpose()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                features: features
                    .map(|f| serde_json::from_str(&f))
                    .transpose()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                sample_count,
                trained_secs,
                history: serde_json::from_str(&history)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
            })
        })
        .context("Failed to query profiles")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to map profiles")?;

    Ok(profiles)
}
