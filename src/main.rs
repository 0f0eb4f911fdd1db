use anyhow::Result;
use clap::Parser;
use sbscript_core::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    sbscript_core::run_cli(&args)
}
