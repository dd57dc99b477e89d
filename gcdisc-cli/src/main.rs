use anyhow::Result;
use clap::Parser;
use log::error;
use std::process;

mod commands;
mod opt;
mod terminal;

use opt::Args;

fn run_app() -> Result<()> {
    let args = Args::parse();
    terminal::init_logging(args.verbose);
    commands::execute(&args)
}

fn main() {
    process::exit(match run_app() {
        Ok(()) => 0,
        Err(err) => {
            error!("Fatal: {:#}", err);
            1
        }
    });
}
