use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Spotify 音乐下载任务管理器
#[derive(Parser, Debug)]
#[command(name = "grovegrab")]
#[command(version)]
#[command(about = "Download Spotify tracks, albums and playlists with spotdl", long_about = None)]
pub struct Cli {
    /// 诊断日志级别：-v 为 info，-vv 为 debug
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a track, album, playlist or artist
    Dl {
        /// Spotify URL to download
        #[arg(value_hint = clap::ValueHint::Url)]
        url: String,

        /// Download directory (defaults to the configured path)
        #[arg(short, long, value_name = "DIR")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        output: Option<PathBuf>,

        /// Audio format: mp3, flac, ogg, opus, m4a
        #[arg(short, long, value_name = "FORMAT")]
        format: Option<String>,

        /// Print log lines instead of progress bars
        #[arg(long)]
        plain: bool,

        /// Only pass the URL to the downloader (no output directory or format)
        #[arg(long)]
        preload: bool,
    },

    /// Configure Spotify API credentials and defaults
    Auth {
        #[arg(long, value_name = "ID")]
        client_id: Option<String>,

        #[arg(long, value_name = "SECRET")]
        client_secret: Option<String>,

        #[arg(long, value_name = "DIR")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        download_path: Option<PathBuf>,

        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,

        #[arg(long, value_name = "QUALITY")]
        quality: Option<String>,
    },

    /// Show or reset the configuration
    Config {
        #[arg(long)]
        show: bool,

        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },

    /// List running tasks
    List {
        /// Include finished tasks
        #[arg(short, long)]
        all: bool,
    },

    /// Cancel a running task
    Cancel {
        /// Task ID or a unique prefix of it
        id: String,
    },

    /// Retry a failed task
    Retry {
        id: String,

        #[arg(long)]
        plain: bool,
    },

    /// Delete a task and its record
    Delete { id: String },

    /// Print the log of a task
    Logs {
        id: String,

        /// Keep printing new lines until the task finishes
        #[arg(short, long)]
        follow: bool,
    },

    /// Download every URL listed in a file (one per line)
    Batch {
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        /// Concurrent downloads
        #[arg(short, long, default_value_t = 3)]
        workers: usize,
    },

    /// Show version information
    Version,
}
