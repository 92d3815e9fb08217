//! Command-line interface.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sitescan-worker", version, about = "Asynchronous website analysis worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Queue the given URLs, then process jobs until Ctrl-C
    Run {
        /// URLs to analyze before polling the queue
        urls: Vec<String>,
        /// Capabilities to run (comma separated); all when omitted
        #[arg(short, long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },
    /// Analyze one URL in the foreground and print the finished record
    Scan {
        url: String,
        #[arg(short, long, value_delimiter = ',')]
        capabilities: Vec<String>,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },
    /// Print the status of an analysis
    Status { id: String },
    /// Print the record of a finished analysis
    Result { id: String },
    /// List recent finished analyses
    Recent {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete recent-result summaries older than the retention window
    Purge,
}

impl Default for Command {
    fn default() -> Self {
        Self::Run {
            urls: Vec::new(),
            capabilities: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["sitescan-worker"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(Command::default(), Command::Run { .. }));
    }

    #[test]
    fn test_capabilities_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "sitescan-worker",
            "run",
            "https://example.com",
            "https://example.org",
            "--capabilities",
            "tech,seo",
        ])
        .unwrap();
        let Some(Command::Run { urls, capabilities }) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(urls.len(), 2);
        assert_eq!(capabilities, vec!["tech", "seo"]);
    }

    #[test]
    fn test_scan_wait_default() {
        let cli = Cli::try_parse_from(["sitescan-worker", "scan", "https://example.com"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Scan { wait_secs: 300, .. })
        ));
    }
}
