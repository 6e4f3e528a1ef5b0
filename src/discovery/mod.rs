//! Port discoverer: resolves the host-visible ports a running process
//! is actually bound to, for services that don't declare `listeners`
//! explicitly or that run inside a container with published ports.

pub mod docker;

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to read {0}: {1}")]
    Io(String, std::io::Error),
    #[error("docker inspect failed: {0}")]
    Docker(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum TransportProtocol {
    Tcp,
    Udp,
}

/// Port discoverer port: `listening_ports(pid) -> sorted ascending,
/// de-duplicated list of u16`. Pure inspection, never blocks on an external
/// command longer than a bounded timeout.
pub trait PortDiscoverer: Send + Sync {
    fn listening_ports(&self, pid: i32) -> Result<Vec<u16>, DiscoveryError>;
}

/// Reads `/proc/<pid>/fd` and cross-references `/proc/net/{tcp,udp}[6]` to
/// find the ports a process is bound to, without calling into the process
/// itself. A no-op outside Linux and for `pid <= 0`.
#[derive(Debug, Default)]
pub struct ProcfsPortDiscoverer;

impl PortDiscoverer for ProcfsPortDiscoverer {
    #[cfg(target_os = "linux")]
    fn listening_ports(&self, pid: i32) -> Result<Vec<u16>, DiscoveryError> {
        if pid <= 0 {
            return Ok(Vec::new());
        }
        let inodes = socket_inodes_of(pid)?;
        if inodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut ports = Vec::new();
        for (path, protocol, listening_states) in [
            ("/proc/net/tcp", TransportProtocol::Tcp, &["0A"][..]),
            ("/proc/net/tcp6", TransportProtocol::Tcp, &["0A"][..]),
            ("/proc/net/udp", TransportProtocol::Udp, &["07"][..]),
            ("/proc/net/udp6", TransportProtocol::Udp, &["07"][..]),
        ] {
            if let Ok(contents) = fs::read_to_string(path) {
                ports.extend(parse_proc_net(&contents, protocol, listening_states, &inodes));
            }
        }
        ports.sort_unstable();
        ports.dedup();
        Ok(ports)
    }

    #[cfg(not(target_os = "linux"))]
    fn listening_ports(&self, _pid: i32) -> Result<Vec<u16>, DiscoveryError> {
        Ok(Vec::new())
    }
}

/// What `docker_container_ref` could tell from a process's command line.
#[derive(Debug, PartialEq, Eq)]
enum ContainerRef {
    /// `--name`/`--name=` was present on the command line.
    Named(String),
    /// The process is a `docker`/`podman run` wrapper, but with no explicit
    /// name to extract; the container has to be found by ancestor-PID walk.
    UnnamedRun,
}

/// Tries the container path first (a supervised process that is really a
/// `docker run --name foo ...` wrapper, or an auto-named one located by
/// walking the process tree), falling back to the procfs path.
pub struct DefaultPortDiscoverer {
    procfs: ProcfsPortDiscoverer,
}

impl Default for DefaultPortDiscoverer {
    fn default() -> Self {
        Self { procfs: ProcfsPortDiscoverer }
    }
}

impl PortDiscoverer for DefaultPortDiscoverer {
    fn listening_ports(&self, pid: i32) -> Result<Vec<u16>, DiscoveryError> {
        if pid <= 0 {
            return Ok(Vec::new());
        }
        if let Some(container_ref) = docker_container_ref(pid) {
            let discoverer = match container_ref {
                ContainerRef::Named(name) => Some(docker::DockerPortDiscoverer::new(name)),
                ContainerRef::UnnamedRun => docker::DockerPortDiscoverer::for_ancestor_pid(pid).ok().flatten(),
            };
            if let Some(discoverer) = discoverer {
                if let Ok(ports) = discoverer.listening_ports(pid) {
                    if !ports.is_empty() {
                        return Ok(ports);
                    }
                }
            }
        }
        self.procfs.listening_ports(pid)
    }
}

#[cfg(target_os = "linux")]
fn docker_container_ref(pid: i32) -> Option<ContainerRef> {
    let cmdline = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let args: Vec<String> = cmdline
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();

    let exe = Path::new(args.first()?).file_name()?.to_str()?;
    if exe != "docker" && exe != "podman" {
        return None;
    }
    if !args.iter().any(|a| a == "run") {
        return None;
    }
    for (i, arg) in args.iter().enumerate() {
        if let Some(name) = arg.strip_prefix("--name=") {
            return Some(ContainerRef::Named(name.to_string()));
        }
        if arg == "--name" {
            return args.get(i + 1).cloned().map(ContainerRef::Named);
        }
    }
    Some(ContainerRef::UnnamedRun)
}

#[cfg(not(target_os = "linux"))]
fn docker_container_ref(_pid: i32) -> Option<ContainerRef> {
    None
}

#[cfg(target_os = "linux")]
fn socket_inodes_of(pid: i32) -> Result<HashSet<u64>, DiscoveryError> {
    let fd_dir = format!("/proc/{pid}/fd");
    let entries = match fs::read_dir(&fd_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(err) => return Err(DiscoveryError::Io(fd_dir, err)),
    };

    let mut inodes = HashSet::new();
    for entry in entries.flatten() {
        if let Ok(target) = fs::read_link(entry.path()) {
            if let Some(inode) = parse_socket_inode(&target) {
                inodes.insert(inode);
            }
        }
    }
    Ok(inodes)
}

fn parse_socket_inode(link: &Path) -> Option<u64> {
    let text = link.to_str()?;
    let inner = text.strip_prefix("socket:[")?.strip_suffix(']')?;
    inner.parse().ok()
}

/// Parses a `/proc/net/{tcp,udp}[6]` table, keeping rows whose state is one
/// of `listening_states` (hex) and whose inode is one of `ours`.
fn parse_proc_net(contents: &str, _protocol: TransportProtocol, listening_states: &[&str], ours: &HashSet<u64>) -> Vec<u16> {
    let mut out = Vec::new();
    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let local_address = fields[1];
        let state = fields[3];
        let inode: u64 = match fields[9].parse() {
            Ok(inode) => inode,
            Err(_) => continue,
        };
        if !listening_states.contains(&state) || !ours.contains(&inode) {
            continue;
        }
        if let Some(port) = local_address.rsplit(':').next().and_then(|hex| u16::from_str_radix(hex, 16).ok()) {
            out.push(port);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listening_tcp_row_by_inode() {
        let contents = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 12345 1 0000000000000000 100 0 0 10 0\n";
        let mut ours = HashSet::new();
        ours.insert(12345);
        let found = parse_proc_net(contents, TransportProtocol::Tcp, &["0A"], &ours);
        assert_eq!(found, vec![8080]);
    }

    #[test]
    fn ignores_rows_not_in_listening_state() {
        let contents = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   0: 00000000:1F90 00000000:0000 01 00000000:00000000 00:00000000 00000000     0        0 12345 1 0000000000000000 100 0 0 10 0\n";
        let mut ours = HashSet::new();
        ours.insert(12345);
        let found = parse_proc_net(contents, TransportProtocol::Tcp, &["0A"], &ours);
        assert!(found.is_empty());
    }

    #[test]
    fn ignores_rows_with_an_inode_we_do_not_own() {
        let contents = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 99999 1 0000000000000000 100 0 0 10 0\n";
        let mut ours = HashSet::new();
        ours.insert(12345);
        let found = parse_proc_net(contents, TransportProtocol::Tcp, &["0A"], &ours);
        assert!(found.is_empty());
    }

    #[test]
    fn parses_socket_inode_from_fd_link_target() {
        assert_eq!(parse_socket_inode(Path::new("socket:[999]")), Some(999));
        assert_eq!(parse_socket_inode(Path::new("/dev/null")), None);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn docker_container_ref_is_none_for_a_non_docker_process() {
        let pid = std::process::id() as i32;
        assert_eq!(docker_container_ref(pid), None);
    }

    #[test]
    fn non_positive_pid_short_circuits_to_empty() {
        let discoverer = ProcfsPortDiscoverer;
        assert_eq!(discoverer.listening_ports(0).unwrap(), Vec::<u16>::new());
        assert_eq!(discoverer.listening_ports(-1).unwrap(), Vec::<u16>::new());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn discovers_this_process_own_listening_socket() {
        use std::net::TcpListener;
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let discoverer = ProcfsPortDiscoverer;
        let pid = std::process::id() as i32;
        let found = discoverer.listening_ports(pid).unwrap();
        assert!(found.contains(&port));
        assert!(found.windows(2).all(|w| w[0] < w[1]), "must be strictly ascending with no duplicates");
    }
}
