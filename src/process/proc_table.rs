use super::{ProcessInfo, ProcessResolver, SocketEntry, first_owned};
use ::procfs::net::{TcpNetEntry, UdpNetEntry};
use ::procfs::process::{FDTarget, Process, all_processes};
use ::procfs::{ProcError, ProcResult};
use log::{debug, trace};
use std::collections::HashMap;
use std::path::Path;

/// Resolves ports through `/proc/net/{tcp,tcp6,udp,udp6}` and the fd tables
/// of every visible process. Needs root to see sockets of other users.
pub struct ProcfsResolver;

impl ProcfsResolver {
    /// Inodes of local inet sockets bound to `port`, in TCP, TCP6, UDP, UDP6
    /// table order.
    fn candidate_inodes(port: u16) -> Vec<u64> {
        let mut inodes = Vec::new();
        collect_bound(
            "tcp",
            ::procfs::net::tcp(),
            port,
            |e: &TcpNetEntry| (e.local_address.port(), e.inode),
            &mut inodes,
        );
        collect_bound(
            "tcp6",
            ::procfs::net::tcp6(),
            port,
            |e: &TcpNetEntry| (e.local_address.port(), e.inode),
            &mut inodes,
        );
        collect_bound(
            "udp",
            ::procfs::net::udp(),
            port,
            |e: &UdpNetEntry| (e.local_address.port(), e.inode),
            &mut inodes,
        );
        collect_bound(
            "udp6",
            ::procfs::net::udp6(),
            port,
            |e: &UdpNetEntry| (e.local_address.port(), e.inode),
            &mut inodes,
        );
        inodes
    }

    /// Maps each inode in `wanted` to the first process found holding it.
    fn owners(wanted: &[u64]) -> HashMap<u64, u32> {
        let mut owners = HashMap::new();
        let processes = match all_processes() {
            Ok(iter) => iter,
            Err(e) => {
                debug!("Cannot enumerate processes: {e}");
                return owners;
            }
        };

        for process in processes.flatten() {
            // Processes can exit or deny access mid-scan.
            let Ok(fds) = process.fd() else {
                continue;
            };
            for fd in fds.flatten() {
                if let FDTarget::Socket(inode) = fd.target
                    && wanted.contains(&inode)
                    && let Ok(pid) = u32::try_from(process.pid())
                {
                    owners.entry(inode).or_insert(pid);
                }
            }
            if owners.len() == wanted.len() {
                break;
            }
        }
        owners
    }
}

impl ProcessResolver for ProcfsResolver {
    fn resolve(&self, port: u16) -> Option<ProcessInfo> {
        let inodes = Self::candidate_inodes(port);
        if inodes.is_empty() {
            trace!("No local socket bound to port {port}");
            return None;
        }

        let owners = Self::owners(&inodes);
        let sockets = inodes.iter().map(|inode| SocketEntry {
            local_port: port,
            pid: owners.get(inode).copied(),
        });
        first_owned(sockets, port, process_name)
    }
}

fn collect_bound<T>(
    table: &str,
    entries: ProcResult<Vec<T>>,
    port: u16,
    key: impl Fn(&T) -> (u16, u64),
    out: &mut Vec<u64>,
) {
    match entries {
        Ok(entries) => out.extend(
            entries
                .iter()
                .map(&key)
                // Inode 0 marks sockets with no owner (TIME_WAIT and friends).
                .filter(|&(local_port, inode)| local_port == port && inode != 0)
                .map(|(_, inode)| inode),
        ),
        Err(e) => debug!("Cannot read /proc/net/{table}: {e}"),
    }
}

/// Kernel `comm` is cut to this many bytes (TASK_COMM_LEN minus the NUL).
const COMM_MAX_LEN: usize = 15;

fn process_name(pid: u32) -> Option<String> {
    let pid = i32::try_from(pid).ok()?;
    let process = Process::new(pid).map_err(|e| unnamed(pid, e)).ok()?;
    let comm = process.stat().map_err(|e| unnamed(pid, e)).ok()?.comm;
    if comm.len() < COMM_MAX_LEN {
        return Some(comm);
    }

    // comm may have been cut, look at argv[0] and the executable.
    let argv0 = process
        .cmdline()
        .ok()
        .and_then(|args| args.into_iter().next());
    let exe = process.exe().ok();
    Some(full_name(comm, argv0.as_deref(), exe.as_deref()))
}

fn unnamed(pid: i32, e: ProcError) {
    match e {
        ProcError::NotFound(_) => debug!("Process {pid} exited before it could be named"),
        e => debug!("Cannot read process {pid}: {e}"),
    }
}

/// Recovers the untruncated name of a process whose `comm` hit the kernel
/// limit: the basename of `argv[0]`, else of the executable, as long as it
/// extends `comm`. Otherwise `comm` is kept as-is.
fn full_name(comm: String, argv0: Option<&str>, exe: Option<&Path>) -> String {
    if comm.len() < COMM_MAX_LEN {
        return comm;
    }

    let from_argv0 = argv0
        .map(Path::new)
        .and_then(Path::file_name)
        .and_then(|name| name.to_str());
    let from_exe = exe.and_then(Path::file_name).and_then(|name| name.to_str());

    [from_argv0, from_exe]
        .into_iter()
        .flatten()
        .find(|name| name.starts_with(comm.as_str()))
        .map(str::to_string)
        .unwrap_or(comm)
}
