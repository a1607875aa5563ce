mod cli;
mod dns;
mod pcap;
mod process;
mod report;
mod ui;

use std::fs::OpenOptions;
use std::io;
use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Args, LogSink};
use dns::{Correlator, DnsCollector, RetentionPolicy};
use log::{info, warn};
use tokio::task::JoinHandle;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_interfaces {
        let interfaces = pcap::CaptureLoader::list_interfaces()?;
        println!("Available network interfaces:");
        for device in interfaces {
            let status = if device.flags.is_up() { "UP" } else { "DOWN" };
            let running = if device.flags.is_running() {
                "RUNNING"
            } else {
                ""
            };
            let loopback = if device.flags.is_loopback() {
                "LOOPBACK"
            } else {
                ""
            };

            println!("  {} [{}] {} {}", device.name, status, running, loopback);

            if let Some(desc) = device.desc {
                println!("    Description: {desc}");
            }
        }
        return Ok(());
    }

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level));
    match args.log_sink() {
        LogSink::Stderr => {}
        LogSink::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            logger.target(env_logger::Target::Pipe(Box::new(file)));
        }
        LogSink::Discard => {
            logger.target(env_logger::Target::Pipe(Box::new(io::sink())));
        }
    }
    logger.init();

    let interface = if let Some(ref iface) = args.interface {
        iface.clone()
    } else {
        pcap::CaptureLoader::select_default_interface()?
    };

    info!("Starting DNS Process Monitor");
    info!("Interface: {interface}");
    if args.max_domains_per_process.is_none() {
        info!("No retention limit set, history grows for the whole session");
    }

    let (capture_handle, event_rx, cancel_token) = pcap::CaptureLoader::load(&interface)?;
    info!("Packet capture started successfully");

    let retention = RetentionPolicy {
        max_domains_per_process: args.max_domains_per_process,
    };
    let correlator = Correlator::new(process::system_resolver(), retention);
    let store = correlator.store();
    let collector = DnsCollector::new(event_rx, correlator);

    let collector_handle = tokio::spawn(async move {
        if let Err(e) = collector.run().await {
            warn!("Collector error: {e}");
        }
    });

    if args.tui {
        let app = ui::App::new(store);
        tokio::task::spawn_blocking(move || ui::run_ui(app))
            .await
            .context("Dashboard thread panicked")??;
    } else {
        let reporter = tokio::spawn(report::run_console(
            store,
            Duration::from_secs(args.interval),
            args.tail,
            cancel_token.clone(),
        ));
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Stopping DNS sniffing...");
        cancel_token.cancel();
        reporter.await?;
    }

    // Capture sees the flag within one read timeout, dropping its sender
    // ends the collector.
    cancel_token.cancel();
    let capture_stopped = join_with_grace("capture", capture_handle).await;
    join_with_grace("collector", collector_handle).await;

    info!("DNS Process Monitor stopped");
    if !capture_stopped {
        // Some libpcap builds ignore the read timeout on idle links, and the
        // runtime would wait on the blocked reader forever.
        exit(0);
    }
    Ok(())
}

/// Returns false if the task had to be abandoned.
async fn join_with_grace(name: &str, handle: JoinHandle<()>) -> bool {
    match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{name} task failed: {e}");
            true
        }
        Err(_) => {
            warn!("{name} task did not stop within {SHUTDOWN_GRACE:?}, abandoning it");
            false
        }
    }
}
