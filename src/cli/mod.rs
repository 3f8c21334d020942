//! CLI subcommand handlers.

mod args;

pub use args::{Cli, CliCommand, ProfilesCliArgs, SessionsCliArgs, TranscribeCliArgs};

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::backend;
use crate::batch::{BatchOptions, ChunkedBatchTranscriber};
use crate::config::Config;
use crate::session::{SessionStore, SqliteSessionStore, SYSTEM_SPEAKER_BASE};
use crate::speaker::{speaker_clips, SpeakerIdentifier, VoiceProfile};

pub async fn handle_transcribe_command(args: TranscribeCliArgs) -> Result<()> {
    let config = Config::load()?;
    let path = Path::new(&args.file);
    if !path.exists() {
        bail!("Audio file not found: {}", args.file);
    }

    let backend = backend::build_backend(&config)?;
    backend.validate()?;

    let transcriber =
        ChunkedBatchTranscriber::new(backend, BatchOptions::from(&config.batch));
    let outcome = transcriber
        .transcribe_file(path, args.language.as_deref())
        .await
        .context("Transcription failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.segments)?);
    } else {
        for segment in &outcome.segments {
            match segment.speaker_id {
                Some(speaker) => {
                    println!("[{:>8.2}s] S{}: {}", segment.timestamp, speaker, segment.text)
                }
                None => println!("[{:>8.2}s] {}", segment.timestamp, segment.text),
            }
        }
    }

    if outcome.failed_chunks > 0 {
        eprintln!(
            "warning: {}/{} chunks failed and were excluded",
            outcome.failed_chunks, outcome.chunk_count
        );
    }

    Ok(())
}

pub fn handle_sessions_command(args: SessionsCliArgs) -> Result<()> {
    let store = SqliteSessionStore::open_default()?;

    if let Some(id) = args.id {
        let Some(session) = store.get_session(&id)? else {
            bail!("Session not found: {}", id);
        };

        println!(
            "Session {} ({}, {:.0}s, {} segments)",
            session.id,
            session.mode.as_str(),
            session.duration_secs(),
            session.segments.len()
        );
        for segment in &session.segments {
            let name = segment.speaker_id.and_then(|id| {
                session
                    .speakers
                    .iter()
                    .find(|s| s.id == id)
                    .and_then(|s| s.name.clone())
            });
            let label = match (name, segment.speaker_id) {
                (Some(name), _) => name,
                (None, Some(id)) => format!("S{}", id),
                (None, None) => "-".to_string(),
            };
            println!("[{:>8.2}s] {}: {}", segment.timestamp, label, segment.text);
        }
        return Ok(());
    }

    let sessions = store.load_sessions()?;
    if sessions.is_empty() {
        println!("No stored sessions.");
        return Ok(());
    }

    for session in sessions.iter().take(args.limit) {
        println!(
            "{}  {}  {:>6.0}s  {:>3} segments  {}",
            session.id,
            session.started_at.format("%Y-%m-%d %H:%M"),
            session.duration_secs(),
            session.segments.len(),
            session.preview()
        );
    }

    Ok(())
}

pub fn handle_profiles_command(args: ProfilesCliArgs) -> Result<()> {
    let store = SqliteSessionStore::open_default()?;

    if let Some(session_id) = args.train {
        let (Some(speaker_id), Some(name)) = (args.speaker, args.name) else {
            bail!("--train requires --speaker and --name");
        };
        return train_profile(&store, &session_id, speaker_id, &name);
    }

    let profiles = store.load_profiles()?;
    if profiles.is_empty() {
        println!("No voice profiles.");
        return Ok(());
    }
    for profile in profiles {
        let kind = if profile.embedding.is_some() {
            "embedding"
        } else {
            "features"
        };
        println!(
            "{:<20} {:>4} samples  {:>6.0}s trained  {}",
            profile.name, profile.sample_count, profile.trained_secs, kind
        );
    }
    Ok(())
}

fn train_profile(
    store: &SqliteSessionStore,
    session_id: &str,
    speaker_id: i64,
    name: &str,
) -> Result<()> {
    let config = Config::load()?;

    let Some(session) = store.get_session(session_id)? else {
        bail!("Session not found: {}", session_id);
    };

    // The speaker range tells us which source's recording holds the voice.
    let audio_path = if speaker_id >= SYSTEM_SPEAKER_BASE {
        session.system_audio_path.as_ref()
    } else {
        session.mic_audio_path.as_ref()
    };
    let Some(audio_path) = audio_path else {
        bail!("Session {} has no recorded audio for that speaker", session_id);
    };

    let (samples, rate) = crate::audio::wav::read_samples(Path::new(audio_path))?;
    let clips = speaker_clips(
        &session.segments,
        speaker_id,
        &samples,
        rate,
        config.speaker.max_training_secs,
    );
    if clips.is_empty() {
        bail!("No segments attributed to speaker {}", speaker_id);
    }

    let identifier = SpeakerIdentifier::new(
        (&config.speaker).into(),
        Vec::new(),
        crate::app::build_embedder(&config),
    );

    let mut profile = store
        .load_profiles()?
        .into_iter()
        .find(|p| p.name == name)
        .unwrap_or_else(|| VoiceProfile::named(name));

    let folded = identifier.train_profile(&mut profile, &clips, session_id);
    if folded == 0 {
        bail!("All training clips were degenerate (silence or no pitch)");
    }

    store.save_profile(&profile)?;
    println!(
        "Trained '{}' on {} clips from session {}",
        name, folded, session_id
    );
    Ok(())
}

pub fn handle_provider_command() -> Result<()> {
    let config = Config::load()?;
    let backend = backend::build_backend(&config)?;

    print!("{}: ", backend.name());
    match backend.validate() {
        Ok(()) => println!("ready"),
        Err(e) => println!("not ready ({})", e),
    }
    Ok(())
}
