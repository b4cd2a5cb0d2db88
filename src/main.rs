//! segcut command-line entry point
//!
//! ```bash
//! segcut export -i talk.mp4 -s 0:30-2:10=Intro -s 5:00- --strategy smart --merge --chapters
//! segcut inspect -i talk.mp4 --json
//! segcut keyframe -i talk.mp4 12.5 1:03
//! segcut validate-edl cuts.csv --duration 600
//! segcut batch recordings/ -o converted/ --format mkv
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use segcut::cli::{self, Cli};
use segcut::utils::logging::{init_logging, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig::new(cli.log_level, cli.log_format))?;
    debug!("Parsed command line: {:?}", cli.command);

    if let Err(e) = cli::run(cli).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
