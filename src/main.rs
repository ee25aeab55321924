mod config;
mod convert;
mod extract;
mod output;
mod record;
mod scrub;
#[cfg(test)]
mod test_support;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Parse a Pegasus kickstart job output file (e.g. `.out.000`), possibly
/// wrapped in batch scheduler logs, and emit a JSON record of the job.
#[derive(Parser, Debug)]
#[command(name = "kickstart-json", version, about)]
pub struct Cli {
    /// Pegasus kickstart file
    #[arg(value_name = "KICKSTART_FILE")]
    kickstart_file: PathBuf,

    /// Output filename (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, default_value = "kickstart.toml")]
    config: PathBuf,

    /// Print debug messages to stderr
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    if !cli.kickstart_file.is_file() {
        tracing::error!(
            "The provided file does not exist or is not a file:\n\t{}",
            cli.kickstart_file.display()
        );
        std::process::exit(1);
    }

    let config = config::load_config(&cli.config);

    let record = match convert::convert(&cli.kickstart_file, &config) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("{}: {e}", cli.kickstart_file.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = output::write_record(&record, cli.output.as_deref()) {
        tracing::error!("failed to write JSON record: {e}");
        std::process::exit(1);
    }
}
