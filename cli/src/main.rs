use clap::Parser;
use std::error::Error;
use vicinity_cli::config::cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Bench(config) => {
            tracer::init_tracing("vicinity", Some(&config.log_level), config.json_logs)?;
            let report = vicinity_cli::bench::run(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
