use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, SessionContext};

#[derive(Parser, Debug)]
#[command(name = "cult-transfer")]
#[command(about = "Chunked media transfer and clock sync for the quiz client", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the HTTP API
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Game socket URL
    #[arg(long, global = true)]
    pub socket: Option<String>,

    #[arg(long, env = "CULT_USER_SESSION_ID", global = true, hide_env_values = true)]
    pub user_session_id: Option<String>,

    #[arg(long, env = "CULT_SESSION_TOKEN", global = true, hide_env_values = true)]
    pub session_token: Option<String>,

    /// Chunk size in bytes
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Concurrent chunk uploads
    #[arg(long, global = true)]
    pub parallel: Option<usize>,

    /// Immediate retries per chunk
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Base delay between retry passes (e.g. "500ms", "2s")
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub backoff: Option<Duration>,

    /// Hide progress bars
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compress, chunk and upload a media file
    Upload {
        path: PathBuf,

        /// Mime type registered for the file (guessed from the extension if omitted)
        #[arg(long, short = 't')]
        mime_type: Option<String>,
    },

    /// Download, verify and decompress a media file
    Download {
        file_name: String,

        #[arg(long)]
        lobby_id: String,

        #[arg(long)]
        media_token: String,

        /// Output path (defaults to the server-declared name)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Estimate the clock offset against the game server
    Sync {
        /// Sync rounds per direction
        #[arg(long)]
        cycles: Option<usize>,

        /// Keep following media state after syncing
        #[arg(long, short = 'f')]
        follow: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Load the config file and apply command-line overrides
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.transfer.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.server.base_url = server.clone();
        }
        if let Some(socket) = &self.socket {
            config.server.socket_url = socket.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.transfer.chunk_size = chunk_size;
        }
        if let Some(parallel) = self.parallel {
            config.transfer.max_parallel_uploads = parallel;
        }
        if let Some(retries) = self.retries {
            config.transfer.retry_limit = retries;
        }
        if let Some(backoff) = self.backoff {
            config.transfer.backoff_base_ms = backoff.as_millis() as u64;
        }
        if let Commands::Sync {
            cycles: Some(cycles),
            ..
        } = self.command
        {
            config.sync.cycles = cycles;
        }
    }

    pub fn session(&self) -> Result<SessionContext> {
        match (&self.user_session_id, &self.session_token) {
            (Some(id), Some(token)) => Ok(SessionContext::new(id.as_str(), token.as_str())),
            _ => Err(anyhow!(
                "Session credentials required (--user-session-id/--session-token or CULT_USER_SESSION_ID/CULT_SESSION_TOKEN)"
            )),
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Mime type from a file extension, `application/octet-stream` when unknown
pub fn guess_mime_type(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::parse_from([
            "cult-transfer",
            "--server",
            "https://quiz.test/",
            "--parallel",
            "2",
            "--backoff",
            "1s 500ms",
            "sync",
            "--cycles",
            "4",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.server.base_url, "https://quiz.test/");
        assert_eq!(config.transfer.max_parallel_uploads, 2);
        assert_eq!(config.transfer.backoff_base_ms, 1_500);
        assert_eq!(config.sync.cycles, 4);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = Cli::parse_from(["cult-transfer", "--chunk-size", "0", "upload", "a.mp4"]);
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_session_required() {
        let cli = Cli::parse_from([
            "cult-transfer",
            "--user-session-id",
            "u",
            "download",
            "clip.mp4",
            "--lobby-id",
            "l",
            "--media-token",
            "m",
        ]);
        if cli.session_token.is_none() {
            assert!(cli.session().is_err());
        }

        let cli = Cli::parse_from([
            "cult-transfer",
            "--user-session-id",
            "u",
            "--session-token",
            "t",
            "sync",
        ]);
        assert_eq!(cli.session().unwrap(), SessionContext::new("u", "t"));
    }

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::parse_from(["cult-transfer", "-vv", "sync"]);
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("clip.MP4")), "video/mp4");
        assert_eq!(guess_mime_type(Path::new("a/b/photo.jpeg")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("notes")), "application/octet-stream");
    }
}
