use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "scribed")]
#[command(about = "Live meeting transcription with speaker identification", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Transcribe a pre-recorded audio file (chunked for long files)
    Transcribe(TranscribeCliArgs),
    /// List stored recording sessions or show one transcript
    Sessions(SessionsCliArgs),
    /// List voice profiles, or train one from a session speaker
    Profiles(ProfilesCliArgs),
    /// Check the configured transcription backend
    Provider,
}

#[derive(ClapArgs, Debug)]
pub struct ProfilesCliArgs {
    /// Session to take training audio from (requires --speaker and --name)
    #[arg(long)]
    pub train: Option<String>,
    /// Session speaker ID whose segments feed the training
    #[arg(long)]
    pub speaker: Option<i64>,
    /// Person the trained profile belongs to
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct TranscribeCliArgs {
    /// Path to the WAV file to transcribe
    pub file: String,
    /// Language code, or "auto" for auto-detect
    #[arg(short, long)]
    pub language: Option<String>,
    /// Print segments as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct SessionsCliArgs {
    /// ID of a session to print in full
    pub id: Option<String>,
    /// Maximum number of sessions to list
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}
