use super::types::QueryType;
use chrono::{DateTime, Local};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    LastSeen,
    Count,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRecord {
    pub domain: String,
    pub query_type: QueryType,
    pub timestamp: DateTime<Local>,
}

/// Query history of every process seen under one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub process_name: String,
    /// PIDs attributed to this name, in the order they were first seen.
    pub pids: Vec<u32>,
    /// Oldest first.
    pub domains: VecDeque<DomainRecord>,
}

impl ProcessEntry {
    fn new(process_name: String) -> Self {
        Self {
            process_name,
            pids: Vec::new(),
            domains: VecDeque::new(),
        }
    }

    /// Appends a record and returns how many old records were evicted to
    /// respect `limit`.
    fn push(&mut self, pid: u32, record: DomainRecord, limit: Option<usize>) -> u64 {
        if !self.pids.contains(&pid) {
            self.pids.push(pid);
        }
        self.domains.push_back(record);

        let mut evicted = 0;
        if let Some(limit) = limit {
            while self.domains.len() > limit {
                self.domains.pop_front();
                evicted += 1;
            }
        }
        evicted
    }

    pub fn last_record(&self) -> Option<&DomainRecord> {
        self.domains.back()
    }

    pub fn last_seen(&self) -> Option<DateTime<Local>> {
        self.last_record().map(|r| r.timestamp)
    }

    pub fn pid_list(&self) -> String {
        const MAX_DISPLAY_PIDS: usize = 3;

        let displayed: Vec<String> = self
            .pids
            .iter()
            .take(MAX_DISPLAY_PIDS)
            .map(std::string::ToString::to_string)
            .collect();
        if self.pids.len() <= MAX_DISPLAY_PIDS {
            displayed.join(", ")
        } else {
            format!(
                "{}, ... (+{})",
                displayed.join(", "),
                self.pids.len() - MAX_DISPLAY_PIDS
            )
        }
    }

    fn matches(&self, pattern: &str) -> bool {
        self.process_name.contains(pattern) || self.domains.iter().any(|r| r.domain.contains(pattern))
    }
}

/// Why a captured packet did not produce a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoDnsLayer,
    Response,
    NoUdpLayer,
    NoQuestion,
    UndecodableName,
    Unattributed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounters {
    pub no_dns_layer: u64,
    pub response: u64,
    pub no_udp_layer: u64,
    pub no_question: u64,
    pub undecodable_name: u64,
    pub unattributed: u64,
}

impl DropCounters {
    fn increment(&mut self, reason: DropReason) {
        let counter = match reason {
            DropReason::NoDnsLayer => &mut self.no_dns_layer,
            DropReason::Response => &mut self.response,
            DropReason::NoUdpLayer => &mut self.no_udp_layer,
            DropReason::NoQuestion => &mut self.no_question,
            DropReason::UndecodableName => &mut self.undecodable_name,
            DropReason::Unattributed => &mut self.unattributed,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u64 {
        self.no_dns_layer
            + self.response
            + self.no_udp_layer
            + self.no_question
            + self.undecodable_name
            + self.unattributed
    }
}

/// Caps applied on append. The default keeps everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_domains_per_process: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub processes: usize,
    pub records: usize,
    pub recorded: u64,
    pub dropped: DropCounters,
    pub evicted: u64,
}

/// Per-process query history, at most one entry per process name.
#[derive(Debug, Default)]
pub struct Store {
    entries: HashMap<String, ProcessEntry>,
    retention: RetentionPolicy,
    recorded: u64,
    dropped: DropCounters,
    evicted: u64,
}

impl Store {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    pub fn append(&mut self, process_name: &str, pid: u32, record: DomainRecord) {
        let limit = self.retention.max_domains_per_process;
        let entry = self
            .entries
            .entry(process_name.to_string())
            .or_insert_with_key(|name| ProcessEntry::new(name.clone()));
        self.evicted += entry.push(pid, record, limit);
        self.recorded += 1;
    }

    pub fn note_drop(&mut self, reason: DropReason) {
        self.dropped.increment(reason);
    }

    /// All entries ordered by process name.
    pub fn snapshot(&self) -> Vec<ProcessEntry> {
        self.processes(SortBy::Name, None)
    }

    pub fn processes(&self, sort_by: SortBy, filter: Option<&str>) -> Vec<ProcessEntry> {
        let mut entries: Vec<ProcessEntry> = self
            .entries
            .values()
            .filter(|e| filter.is_none_or(|pattern| e.matches(pattern)))
            .cloned()
            .collect();

        match sort_by {
            SortBy::LastSeen => {
                entries.sort_by(|a, b| {
                    b.last_seen()
                        .cmp(&a.last_seen())
                        .then_with(|| a.process_name.cmp(&b.process_name))
                });
            }
            SortBy::Count => {
                entries.sort_by(|a, b| {
                    b.domains
                        .len()
                        .cmp(&a.domains.len())
                        .then_with(|| a.process_name.cmp(&b.process_name))
                });
            }
            SortBy::Name => {
                entries.sort_by(|a, b| a.process_name.cmp(&b.process_name));
            }
        }

        entries
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            processes: self.entries.len(),
            records: self.entries.values().map(|e| e.domains.len()).sum(),
            recorded: self.recorded,
            dropped: self.dropped,
            evicted: self.evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(domain: &str, secs: i64) -> DomainRecord {
        let base = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        DomainRecord {
            domain: domain.to_string(),
            query_type: QueryType::A,
            timestamp: base + Duration::seconds(secs),
        }
    }

    fn domains(entry: &ProcessEntry) -> Vec<&str> {
        entry.domains.iter().map(|r| r.domain.as_str()).collect()
    }

    #[test]
    fn same_name_aggregates_into_one_entry() {
        let mut store = Store::default();
        store.append("chrome", 100, record("a.com", 0));
        store.append("chrome", 101, record("b.com", 1));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(domains(&snapshot[0]), ["a.com", "b.com"]);
        assert_eq!(snapshot[0].pids, [100, 101]);
    }

    #[test]
    fn repeated_pid_is_listed_once() {
        let mut store = Store::default();
        store.append("curl", 7, record("a.com", 0));
        store.append("curl", 7, record("a.com", 1));

        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].pids, [7]);
        assert_eq!(snapshot[0].domains.len(), 2);
    }

    #[test]
    fn snapshot_is_ordered_by_name() {
        let mut store = Store::default();
        store.append("zsh", 1, record("z.com", 0));
        store.append("apt", 2, record("a.com", 1));
        store.append("firefox", 3, record("f.com", 2));

        let names: Vec<String> = store
            .snapshot()
            .into_iter()
            .map(|e| e.process_name)
            .collect();
        assert_eq!(names, ["apt", "firefox", "zsh"]);
    }

    #[test]
    fn retention_evicts_oldest_records() {
        let mut store = Store::new(RetentionPolicy {
            max_domains_per_process: Some(2),
        });
        store.append("chrome", 1, record("a.com", 0));
        store.append("chrome", 1, record("b.com", 1));
        store.append("chrome", 1, record("c.com", 2));

        let snapshot = store.snapshot();
        assert_eq!(domains(&snapshot[0]), ["b.com", "c.com"]);

        let stats = store.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.recorded, 3);
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn drops_are_counted_per_reason() {
        let mut store = Store::default();
        store.note_drop(DropReason::Response);
        store.note_drop(DropReason::Response);
        store.note_drop(DropReason::Unattributed);

        let dropped = store.stats().dropped;
        assert_eq!(dropped.response, 2);
        assert_eq!(dropped.unattributed, 1);
        assert_eq!(dropped.no_dns_layer, 0);
        assert_eq!(dropped.total(), 3);
    }

    #[test]
    fn sort_and_filter() {
        let mut store = Store::default();
        store.append("chrome", 1, record("a.com", 0));
        store.append("chrome", 1, record("b.com", 1));
        store.append("curl", 2, record("example.org", 5));
        store.append("ssh", 3, record("github.com", 3));

        let by_count: Vec<String> = store
            .processes(SortBy::Count, None)
            .into_iter()
            .map(|e| e.process_name)
            .collect();
        assert_eq!(by_count, ["chrome", "curl", "ssh"]);

        let by_time: Vec<String> = store
            .processes(SortBy::LastSeen, None)
            .into_iter()
            .map(|e| e.process_name)
            .collect();
        assert_eq!(by_time, ["curl", "ssh", "chrome"]);

        let filtered = store.processes(SortBy::Name, Some("github"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].process_name, "ssh");

        let by_name = store.processes(SortBy::Name, Some("c"));
        assert_eq!(by_name.len(), 3);
    }

    #[test]
    fn pid_list_truncates() {
        let mut store = Store::default();
        for pid in 1..=5 {
            store.append("worker", pid, record("a.com", pid as i64));
        }
        assert_eq!(store.snapshot()[0].pid_list(), "1, 2, 3, ... (+2)");
    }
}
