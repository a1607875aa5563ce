use super::event::CapturedPacket;
use super::store::{
    DomainRecord, DropReason, ProcessEntry, RetentionPolicy, SortBy, Store, StoreStats,
};
use super::types::QueryType;
use crate::process::ProcessResolver;
use anyhow::Result;
use chrono::Local;
use log::{debug, trace};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    Dropped(DropReason),
}

/// Attributes DNS queries to processes and files them in the shared store.
#[derive(Clone)]
pub struct Correlator {
    store: Arc<RwLock<Store>>,
    resolver: Arc<dyn ProcessResolver>,
}

impl Correlator {
    pub fn new(resolver: impl ProcessResolver + 'static, retention: RetentionPolicy) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::new(retention))),
            resolver: Arc::new(resolver),
        }
    }

    pub fn store(&self) -> StoreHandle {
        StoreHandle {
            store: Arc::clone(&self.store),
        }
    }

    /// Files one captured packet. Anything that is not an attributable
    /// outbound query is counted and otherwise ignored.
    ///
    /// Blocks on the resolver, which may walk `/proc`.
    pub fn record(&self, packet: &CapturedPacket) -> RecordOutcome {
        let outcome = self.try_record(packet);
        if let Err(reason) = outcome {
            write_lock(&self.store).note_drop(reason);
            trace!("Dropped packet: {reason:?}");
            return RecordOutcome::Dropped(reason);
        }
        RecordOutcome::Recorded
    }

    fn try_record(&self, packet: &CapturedPacket) -> Result<(), DropReason> {
        let dns = packet.dns.as_ref().ok_or(DropReason::NoDnsLayer)?;
        if dns.is_response {
            return Err(DropReason::Response);
        }
        let udp = packet.udp.as_ref().ok_or(DropReason::NoUdpLayer)?;
        let question = dns.question.as_ref().ok_or(DropReason::NoQuestion)?;
        let domain = match std::str::from_utf8(&question.name) {
            Ok("") => ".".to_string(),
            Ok(name) => name.to_string(),
            Err(_) => return Err(DropReason::UndecodableName),
        };

        // Resolve before taking the lock, this is the slow part.
        let process = self
            .resolver
            .resolve(udp.src_port)
            .ok_or(DropReason::Unattributed)?;

        debug!(
            "{} [{}] queried {domain} via port {} -> {}",
            process.name, process.pid, udp.src_port, udp.dst_port
        );

        let record = DomainRecord {
            domain,
            query_type: QueryType::from(question.query_type),
            timestamp: Local::now(),
        };
        write_lock(&self.store).append(&process.name, process.pid, record);
        Ok(())
    }
}

/// Drains the capture channel into a [`Correlator`].
pub struct DnsCollector {
    correlator: Correlator,
    rx: mpsc::Receiver<CapturedPacket>,
}

impl DnsCollector {
    pub fn new(rx: mpsc::Receiver<CapturedPacket>, correlator: Correlator) -> Self {
        Self { correlator, rx }
    }

    /// Runs until every sender is dropped. Packets are handled one at a time
    /// so records keep capture order.
    pub async fn run(mut self) -> Result<()> {
        while let Some(packet) = self.rx.recv().await {
            let correlator = self.correlator.clone();
            tokio::task::spawn_blocking(move || correlator.record(&packet)).await?;
        }
        debug!("Capture channel closed, collector finished");
        Ok(())
    }
}

/// Read side of the store, shared with reporters.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<RwLock<Store>>,
}

impl StoreHandle {
    /// Consistent copy of every entry, ordered by process name.
    pub fn read_all(&self) -> Vec<ProcessEntry> {
        read_lock(&self.store).snapshot()
    }

    pub fn processes(&self, sort_by: SortBy, filter: Option<&str>) -> Vec<ProcessEntry> {
        read_lock(&self.store).processes(sort_by, filter)
    }

    pub fn stats(&self) -> StoreStats {
        read_lock(&self.store).stats()
    }
}

fn read_lock(store: &RwLock<Store>) -> RwLockReadGuard<'_, Store> {
    match store.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock(store: &RwLock<Store>) -> RwLockWriteGuard<'_, Store> {
    match store.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
