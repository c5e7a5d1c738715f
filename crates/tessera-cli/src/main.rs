use clap::Parser;

mod cli;
mod commands;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let filter = if cli.verbose { "tessera=debug" } else { "tessera=warn" };
    // A subscriber may already be installed by an embedding harness.
    let _ = tessera_core::init_tracing(filter);
    commands::run_command(cli)
}
