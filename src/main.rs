mod cli_main;

use clap::Parser;
use tracing_subscriber::FmtSubscriber;

use cli_main::Cli;
use effest::context::RunContext;
use effest::pipeline::effest::run;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting tracing default failed: {}", e);
    }

    let ctx = RunContext::new(cli.verbose);
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            ctx.fatal_err(e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&config, &ctx) {
        // Stages report their own fatal conditions, anything else is reported here
        tracing::error!("Estimation failed: {}", e);
        std::process::exit(1);
    }
}
