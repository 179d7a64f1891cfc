//! grcmap CLI: the `grcmap` command.

mod cli;
mod commands;
mod logging;
mod support;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::TableCheck { table, json } => commands::table_check::run(table, json),

        Commands::Classify { names, table, json } => commands::classify::run(names, table, json),

        Commands::Status {
            implemented,
            not_applicable,
            json,
        } => commands::status::run(implemented, not_applicable, json),

        Commands::Plan {
            controls,
            evidence,
            table,
            best_effort,
            write_evidence,
            json,
        } => commands::plan::run(commands::plan::Args {
            controls,
            evidence,
            table,
            best_effort,
            write_evidence,
            json,
        }),

        Commands::Report {
            controls,
            evidence,
            table,
            json,
        } => commands::report::run(controls, evidence, table, json),

        Commands::Coverage {
            evidence,
            table,
            json,
        } => commands::coverage::run(evidence, table, json),

        Commands::Assess {
            controls,
            evidence,
            table,
            json,
        } => commands::assess::run(controls, evidence, table, json),
    }
}
