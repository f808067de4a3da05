#![doc = include_str!("../README.md")]

use clap::Parser;

mod cli;
mod flags;
mod indexer;

fn main() {
    tally_cli::backtrace::enable();

    if let Err(err) = cli::Cli::parse().run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
