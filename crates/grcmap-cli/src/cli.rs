use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "grcmap",
    about = "grcmap: map SOC 2 evidence to controls and report implementation status from GRC exports",
    version
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate a family mapping table
    TableCheck {
        /// Path to a mapping table TOML (defaults to the embedded SOC 2 table)
        #[arg(long)]
        table: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify evidence names into control families
    Classify {
        /// Evidence names, e.g. "CN07 - Incident Management Policy"
        #[arg(required = true)]
        names: Vec<String>,

        /// Path to a mapping table TOML
        #[arg(long)]
        table: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Derive an implementation status from a completion percentage
    Status {
        /// Completion percentage (0..=100)
        #[arg(long, allow_negative_numbers = true)]
        implemented: i64,

        /// Mark the subcontrol as not applicable
        #[arg(long)]
        not_applicable: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Plan evidence-to-subcontrol associations (dry run)
    Plan {
        /// Path to the controls export JSON
        #[arg(long)]
        controls: String,

        /// Path to the evidence export JSON
        #[arg(long)]
        evidence: String,

        /// Path to a mapping table TOML
        #[arg(long)]
        table: Option<String>,

        /// Fall back to the first subcontrol when no keyword matches
        #[arg(long)]
        best_effort: bool,

        /// Apply the plan offline and write the updated evidence export here
        #[arg(long)]
        write_evidence: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report completion per family and overall
    Report {
        /// Path to the controls export JSON
        #[arg(long)]
        controls: String,

        /// Path to the evidence export JSON (enables evidence counts)
        #[arg(long)]
        evidence: Option<String>,

        /// Path to a mapping table TOML
        #[arg(long)]
        table: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report which evidence numbers have evidence
    Coverage {
        /// Path to the evidence export JSON
        #[arg(long)]
        evidence: String,

        /// Path to a mapping table TOML
        #[arg(long)]
        table: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Suggest subcontrol updates from associated evidence
    Assess {
        /// Path to the controls export JSON
        #[arg(long)]
        controls: String,

        /// Path to the evidence export JSON
        #[arg(long)]
        evidence: String,

        /// Path to a mapping table TOML
        #[arg(long)]
        table: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
