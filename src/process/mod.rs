//! Attribution of local UDP ports to the processes that own them.
//!
//! The connection table is read after the packet was captured, so by the
//! time a lookup runs the socket may be closed or its process gone. Short
//! lived resolvers (`dig`, `nslookup`) are the usual victims. Attribution is
//! therefore best-effort: a miss is `None`, never an error.

#[cfg(target_os = "linux")]
mod proc_table;

#[cfg(target_os = "linux")]
pub use proc_table::ProcfsResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

pub trait ProcessResolver: Send + Sync {
    fn resolve(&self, port: u16) -> Option<ProcessInfo>;
}

impl<F> ProcessResolver for F
where
    F: Fn(u16) -> Option<ProcessInfo> + Send + Sync,
{
    fn resolve(&self, port: u16) -> Option<ProcessInfo> {
        self(port)
    }
}

/// One row of the local inet socket table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketEntry {
    pub local_port: u16,
    /// `None` when no visible process holds the socket.
    pub pid: Option<u32>,
}

/// Returns the first socket bound to `port`, in table order, whose owner
/// still resolves to a name. Owners that vanished are skipped.
pub fn first_owned<I, F>(sockets: I, port: u16, mut name_of: F) -> Option<ProcessInfo>
where
    I: IntoIterator<Item = SocketEntry>,
    F: FnMut(u32) -> Option<String>,
{
    sockets
        .into_iter()
        .filter(|s| s.local_port == port)
        .filter_map(|s| s.pid)
        .find_map(|pid| name_of(pid).map(|name| ProcessInfo { pid, name }))
}

#[cfg(target_os = "linux")]
pub fn system_resolver() -> impl ProcessResolver {
    ProcfsResolver
}

#[cfg(not(target_os = "linux"))]
pub fn system_resolver() -> impl ProcessResolver {
    log::warn!("Process attribution is only implemented on Linux, queries will be dropped");
    |_port: u16| -> Option<ProcessInfo> { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket(local_port: u16, pid: Option<u32>) -> SocketEntry {
        SocketEntry { local_port, pid }
    }

    fn names(pid: u32) -> Option<String> {
        match pid {
            10 => Some("chrome".to_string()),
            20 => Some("systemd-resolve".to_string()),
            _ => None,
        }
    }

    #[test]
    fn first_owned_match_wins() {
        let table = [
            socket(443, Some(10)),
            socket(5353, Some(20)),
            socket(5353, Some(10)),
        ];
        let info = first_owned(table, 5353, names).unwrap();
        assert_eq!(info.pid, 20);
        assert_eq!(info.name, "systemd-resolve");
    }

    #[test]
    fn unowned_sockets_are_skipped() {
        let table = [socket(5353, None), socket(5353, Some(10))];
        let info = first_owned(table, 5353, names).unwrap();
        assert_eq!(info.name, "chrome");
    }

    #[test]
    fn vanished_process_falls_through_to_next_candidate() {
        let table = [socket(40000, Some(99)), socket(40000, Some(10))];
        let info = first_owned(table, 40000, names).unwrap();
        assert_eq!(info.pid, 10);
    }

    #[test]
    fn no_candidate_resolves_to_none() {
        let table = [socket(40000, Some(99)), socket(53, Some(10))];
        assert_eq!(first_owned(table, 40000, names), None);
        assert_eq!(first_owned([], 40000, names), None);
    }

    #[test]
    fn closures_are_resolvers() {
        let resolver = |port: u16| {
            (port == 5353).then(|| ProcessInfo {
                pid: 1,
                name: "chrome".to_string(),
            })
        };
        assert_eq!(resolver.resolve(5353).map(|p| p.name), Some("chrome".to_string()));
        assert_eq!(resolver.resolve(53), None);
    }
}
