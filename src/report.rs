use crate::dns::{ProcessEntry, StoreHandle, StoreStats};
use std::fmt::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Prints the store every `interval` until cancelled, then once more.
pub async fn run_console(
    store: StoreHandle,
    interval: Duration,
    tail: usize,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately and the store is still empty.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                print!("{}", render(&store.read_all(), &store.stats(), tail));
            }
        }
    }

    print!("{}", render(&store.read_all(), &store.stats(), tail));
}

/// Text dump of the store. `tail` limits the domains shown per process,
/// 0 shows all of them.
pub fn render(entries: &[ProcessEntry], stats: &StoreStats, tail: usize) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Logged DNS queries: {} processes, {} records (recorded {}, dropped {}, unattributed {}, evicted {})",
        stats.processes,
        stats.records,
        stats.recorded,
        stats.dropped.total(),
        stats.dropped.unattributed,
        stats.evicted,
    );

    for entry in entries {
        let _ = writeln!(
            out,
            "{} [{}] ({} queries)",
            entry.process_name,
            entry.pid_list(),
            entry.domains.len()
        );

        let skip = match tail {
            0 => 0,
            n => entry.domains.len().saturating_sub(n),
        };
        if skip > 0 {
            let _ = writeln!(out, "  ... {skip} earlier");
        }
        for record in entry.domains.iter().skip(skip) {
            let _ = writeln!(
                out,
                "  {}  {:<5} {}",
                record.timestamp.format(TIMESTAMP_FORMAT),
                record.query_type.to_string(),
                record.domain
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{CapturedPacket, Correlator, RetentionPolicy};
    use crate::process::ProcessInfo;

    fn populated() -> StoreHandle {
        let correlator = Correlator::new(
            |port: u16| match port {
                5353 => Some(ProcessInfo {
                    pid: 42,
                    name: "chrome".to_string(),
                }),
                5354 => Some(ProcessInfo {
                    pid: 7,
                    name: "apt".to_string(),
                }),
                _ => None,
            },
            RetentionPolicy::default(),
        );
        correlator.record(&CapturedPacket::query("a.com", 1, 5353));
        correlator.record(&CapturedPacket::query("b.com", 28, 5353));
        correlator.record(&CapturedPacket::query("c.com", 1, 5353));
        correlator.record(&CapturedPacket::query("deb.debian.org", 1, 5354));
        correlator.record(&CapturedPacket::query("lost.com", 1, 1));
        correlator.store()
    }

    #[test]
    fn lists_every_process_with_its_domains() {
        let store = populated();
        let text = render(&store.read_all(), &store.stats(), 0);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "Logged DNS queries: 2 processes, 4 records (recorded 4, dropped 1, unattributed 1, evicted 0)"
        );
        assert_eq!(lines[1], "apt [7] (1 queries)");
        assert!(lines[2].ends_with("A     deb.debian.org"));
        assert_eq!(lines[3], "chrome [42] (3 queries)");
        assert!(lines[5].ends_with("AAAA  b.com"));
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn tail_limits_domains_per_process() {
        let store = populated();
        let text = render(&store.read_all(), &store.stats(), 1);

        assert!(text.contains("  ... 2 earlier\n"));
        assert!(text.contains("c.com"));
        assert!(!text.contains("a.com"));
    }

    #[test]
    fn empty_store_prints_header_only() {
        let text = render(&[], &StoreStats::default(), 10);
        assert_eq!(text.lines().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn console_reporter_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_console(
            populated(),
            Duration::from_secs(5),
            10,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
