use clap::Parser;
use clap::builder::RangedU64ValueParser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dns-process-monitor")]
#[command(about = "Attribute outbound DNS queries to local processes", long_about = None)]
pub struct Args {
    /// Interface to capture on, defaults to the first active non-loopback one
    #[arg(short, long)]
    pub interface: Option<String>,

    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long)]
    pub list_interfaces: bool,

    /// Seconds between console reports
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Most recent domains printed per process, 0 prints all
    #[arg(long, default_value_t = 10)]
    pub tail: usize,

    /// Keep at most this many domains per process, oldest are evicted first
    #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub max_domains_per_process: Option<usize>,

    /// Interactive dashboard instead of periodic console reports
    #[arg(long)]
    pub tui: bool,
}

/// Where log lines go.
#[derive(Debug, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    File(PathBuf),
    /// The dashboard owns the terminal, stderr output would draw over it.
    Discard,
}

impl Args {
    pub fn log_sink(&self) -> LogSink {
        match (&self.log_file, self.tui) {
            (Some(path), _) => LogSink::File(path.clone()),
            (None, true) => LogSink::Discard,
            (None, false) => LogSink::Stderr,
        }
    }
}
