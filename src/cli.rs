//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use coursegen::outline::MediaType;

/// Generate a course from an outline, stage by stage.
#[derive(Debug, Parser)]
#[command(name = "coursegen", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Generator attempts per node, first attempt included.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Generator attempts allowed in flight at once.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Directory holding job records.
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MediaArg {
    AudioDigest,
    Video,
    Infographic,
}

impl From<MediaArg> for MediaType {
    fn from(arg: MediaArg) -> Self {
        match arg {
            MediaArg::AudioDigest => MediaType::AudioDigest,
            MediaArg::Video => MediaType::Video,
            MediaArg::Infographic => MediaType::Infographic,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a job for an outline and generate it.
    Run {
        /// Outline JSON file.
        outline: PathBuf,

        /// Job id to use; generated when omitted.
        #[arg(long)]
        job_id: Option<String>,

        /// Generation request JSON file.
        #[arg(long)]
        request: Option<PathBuf>,

        /// Target grade level passed to the generators.
        #[arg(long)]
        grade_level: Option<String>,

        /// Media to produce (repeatable).
        #[arg(long = "media", value_enum)]
        media: Vec<MediaArg>,

        /// Skip assessment nodes.
        #[arg(long, default_value_t = false)]
        no_assessments: bool,
    },

    /// Show the stored state of a job.
    Status {
        job_id: String,
    },

    /// Generate a built-in outline against an in-memory content service.
    Demo,
}
