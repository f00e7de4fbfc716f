use clap::Parser;

use gomoku_arena::cli::Cli;
use gomoku_arena::logger;
use gomoku_arena::tournament::Tournament;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (options, engines) = cli.into_config()?;
    logger::init(options.log, options.debug);
    options.print_banner(&engines);
    Tournament::new(options, engines)?.run()?;
    Ok(())
}
