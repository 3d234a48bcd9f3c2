use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::Subject;

#[derive(Parser, Debug)]
#[command(
    name = "paesbank",
    version,
    about = "PAES question bank extraction, classification and loading"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Extract(ExtractArgs),
    Reconcile(ReconcileArgs),
    Load(LoadArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Exam documents (PDF or plain text) to extract questions from.
    #[arg(long = "input", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Subject of every input; inferred from each filename when omitted.
    #[arg(long, value_enum)]
    pub subject: Option<Subject>,

    #[arg(long, default_value = "data/taxonomy.csv")]
    pub taxonomy_path: PathBuf,

    /// Keyword lexicon override; the built-in lexicon is used when omitted.
    #[arg(long)]
    pub lexicon_path: Option<PathBuf>,

    #[arg(long, default_value = "out")]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// Zero-shot classifier endpoint; keyword layers run alone when omitted.
    #[arg(long)]
    pub classifier_url: Option<String>,

    /// Reassign difficulties so the bank matches the target distribution.
    #[arg(long, default_value_t = false)]
    pub balance_difficulty: bool,

    /// Seed for the rebalancing shuffle; random when omitted.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    /// Bank file produced by `extract`.
    #[arg(long)]
    pub bank_path: PathBuf,

    /// Official answer key documents, applied in order; later files win.
    #[arg(long = "key", required = true)]
    pub keys: Vec<PathBuf>,

    #[arg(long, value_enum)]
    pub subject: Option<Subject>,

    /// Write the reconciled bank here instead of back over the input.
    #[arg(long)]
    pub output_path: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Bank files to load into the store.
    #[arg(long = "bank", required = true)]
    pub banks: Vec<PathBuf>,

    /// Update existing rows on id collisions instead of failing.
    #[arg(long, default_value_t = false)]
    pub upsert: bool,

    #[arg(long, value_enum, default_value_t = WritePolicy::FailFast)]
    pub on_error: WritePolicy,

    /// Pause between row writes, easing off shared-instance rate limits.
    #[arg(long, default_value_t = 50)]
    pub write_delay_ms: u64,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// Parse and validate the banks without writing anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum WritePolicy {
    /// Stop at the first failed row.
    FailFast,
    /// Keep writing and report the failures at the end.
    BestEffort,
}

impl WritePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::BestEffort => "best-effort",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Bank files to summarize locally.
    #[arg(long = "bank")]
    pub banks: Vec<PathBuf>,

    /// Also query the store for per-subject row counts.
    #[arg(long, default_value_t = false)]
    pub remote: bool,
}
