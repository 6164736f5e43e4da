mod api;
mod config;
mod crawler;
mod error;
mod members;
mod parser;
mod sink;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::HttpTransport;
use crate::config::Settings;
use crate::crawler::{CrawlStats, Crawler, Scheduler, Tally};
use crate::sink::OutputSink;

#[derive(Parser)]
#[command(name = "sejm_crawler", about = "Sejm proceedings and speech crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl proceedings, sitting dates and statements of a term
    Speeches {
        /// Term number (e.g. 10)
        #[arg(long)]
        term: u32,
        /// Delete previous output before crawling
        #[arg(long)]
        force: bool,
        /// Output root (default: output/speeches)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Concurrent (proceeding, date) jobs
        #[arg(long)]
        date_concurrency: Option<usize>,
        /// Concurrent statement jobs per date
        #[arg(long)]
        statement_concurrency: Option<usize>,
        /// Per-request timeout in seconds (default: none)
        #[arg(long)]
        timeout: Option<u64>,
        /// Retries for rate-limited or failed requests (default: 0)
        #[arg(long)]
        retries: Option<u32>,
    },
    /// Fetch the MP and club lists of a term
    Members {
        /// Term number (e.g. 10)
        #[arg(long)]
        term: u32,
        /// Delete previous output before fetching
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    let cancel = shutdown_token();

    let result = match cli.command {
        Commands::Speeches {
            term,
            force,
            output,
            date_concurrency,
            statement_concurrency,
            timeout,
            retries,
        } => {
            if let Some(output) = output {
                settings.output_dir = output;
            }
            if let Some(n) = date_concurrency {
                settings.date_concurrency = n;
            }
            if let Some(n) = statement_concurrency {
                settings.statement_concurrency = n;
            }
            if timeout.is_some() {
                settings.request_timeout_secs = timeout;
            }
            if let Some(n) = retries {
                settings.max_retries = n;
            }

            let sink = OutputSink::new(&settings.output_dir);
            if force {
                sink.clear().await?;
            }

            let api = Arc::new(HttpTransport::new(&settings, cancel.clone())?);
            let scheduler = Scheduler::new(settings.date_concurrency, settings.statement_concurrency);
            info!(
                "Crawling term {} into {} ({} dates x {} statements, at most {} requests in flight)",
                term,
                sink.root().display(),
                settings.date_concurrency,
                settings.statement_concurrency,
                scheduler.max_in_flight()
            );

            let crawler = Crawler::new(api, sink, scheduler, cancel.clone());
            let stats = crawler.crawl_term(term).await?;
            print_stats(&stats);
            Ok(())
        }
        Commands::Members { term, force } => {
            let sink = OutputSink::new(&settings.members_dir);
            if force {
                sink.clear().await?;
            }
            let api = HttpTransport::new(&settings, cancel.clone())?;
            let tally = members::save_roster(&api, &sink, term, &cancel).await;
            println!("Saved {} lists ({} errors).", tally.done, tally.failed);
            Ok(())
        }
    };

    if cancel.is_cancelled() {
        println!("Process interrupted. In-flight work finished, exiting.");
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Token cancelled once on Ctrl-C. In-flight requests are left to finish.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after in-flight work");
                token.cancel();
            }
            Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
        }
    });
    cancel
}

fn print_stats(stats: &CrawlStats) {
    let line = |label: &str, t: &Tally| {
        println!(
            "{:<12} {:>6} ok  {:>5} errors  {:>5} malformed  {:>5} cancelled",
            label, t.done, t.failed, t.malformed, t.cancelled
        );
    };
    line("Proceedings:", &stats.proceedings);
    line("Dates:", &stats.dates);
    line("Statements:", &stats.statements);
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn cli_parses_speeches_flags() {
        let cli = Cli::try_parse_from(["sejm_crawler", "speeches", "--term", "10", "--force"]).unwrap();
        match cli.command {
            Commands::Speeches { term, force, output, retries, .. } => {
                assert_eq!(term, 10);
                assert!(force);
                assert!(output.is_none());
                assert!(retries.is_none());
            }
            _ => panic!("expected speeches"),
        }
        assert!(Cli::try_parse_from(["sejm_crawler", "speeches"]).is_err());
    }
}
