//! Scanning a host for every responsive game server.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, OnceCell, Semaphore};
use tokio::task::JoinSet;

use crate::context::QueryContext;
use crate::error::QueryError;
use crate::info::ServerInfo;
use crate::options::{step, Options, DISCOVERY_TIMEOUT};
use crate::protocol::{resolve, Protocol, Transport};
use crate::registry::Registry;

use super::race::{permits, Attempt};
use super::MIN_PORT;

/// Consecutive dead ports after which a walk stops in that direction.
pub const DEAD_PORT_THRESHOLD: usize = 3;

/// Snapshot of a running scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub ports_checked: usize,
    pub servers_found: usize,
    /// Known only when scanning an explicit port list.
    pub total_ports: Option<usize>,
}

/// Probe `seed`, then walk away from it one port at a time in both
/// directions, giving up on a direction after [DEAD_PORT_THRESHOLD] dead
/// ports in a row. `probe` returns whether a server answered.
pub(crate) async fn walk_from_seed<F, Fut>(seed: u16, probe: F)
where
    F: Fn(u16) -> Fut,
    Fut: Future<Output = bool>,
{
    probe(seed).await;
    tokio::join!(walk(seed, 1, &probe), walk(seed, -1, &probe));
}

async fn walk<F, Fut>(seed: u16, step: i32, probe: &F)
where
    F: Fn(u16) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut dead: usize = 0;
    let mut port: i32 = seed as i32;
    while dead < DEAD_PORT_THRESHOLD {
        port += step;
        if port < MIN_PORT as i32 || port > u16::MAX as i32 {
            break;
        }
        if probe(port as u16).await {
            dead = 0;
        } else {
            dead += 1;
        }
    }
}

/// Shared state of one discovery run.
pub(crate) struct Scanner {
    ctx: QueryContext,
    host: String,
    protocols: Vec<Arc<dyn Protocol>>,
    opts: Options,
    gate: Semaphore,
    probed: Mutex<HashMap<u16, Arc<OnceCell<Option<ServerInfo>>>>>,
    ports_checked: AtomicUsize,
    servers_found: AtomicUsize,
    total_ports: Option<usize>,
    progress: Option<mpsc::Sender<ScanProgress>>,
}

impl Scanner {
    pub(crate) fn new(
        ctx: &QueryContext,
        host: &str,
        registry: &Registry,
        opts: &Options,
        total_ports: Option<usize>,
        progress: Option<mpsc::Sender<ScanProgress>>,
    ) -> Self {
        let protocols: Vec<Arc<dyn Protocol>> = registry.protocols().to_vec();
        // size unknown while walking
        let candidates: usize = match total_ports {
            Some(total) => total.saturating_mul(protocols.len()),
            None => Semaphore::MAX_PERMITS,
        };
        Scanner {
            ctx: ctx.clone(),
            host: host.to_owned(),
            gate: Semaphore::new(permits(opts.max_concurrency(), candidates)),
            protocols,
            opts: opts.for_discovery(),
            probed: Mutex::new(HashMap::new()),
            ports_checked: AtomicUsize::new(0),
            servers_found: AtomicUsize::new(0),
            total_ports,
            progress,
        }
    }

    fn cell(&self, port: u16) -> Arc<OnceCell<Option<ServerInfo>>> {
        let mut probed = self.probed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(probed.entry(port).or_default())
    }

    /// Probe `port` once per scan; later callers get the cached verdict.
    pub(crate) async fn probe(&self, port: u16) -> bool {
        let cell: Arc<OnceCell<Option<ServerInfo>>> = self.cell(port);
        cell.get_or_init(|| self.probe_uncached(port)).await.is_some()
    }

    async fn probe_uncached(&self, port: u16) -> Option<ServerInfo> {
        if self.ctx.is_done() {
            return None;
        }
        let found: Option<ServerInfo> = match self.gate.acquire().await {
            Ok(_permit) => self.try_protocols(port).await,
            Err(_) => None,
        };

        let checked: usize = self.ports_checked.fetch_add(1, Ordering::Relaxed) + 1;
        let servers: usize = match found {
            Some(_) => self.servers_found.fetch_add(1, Ordering::Relaxed) + 1,
            None => self.servers_found.load(Ordering::Relaxed),
        };
        if let Some(progress) = &self.progress {
            // a slow consumer loses updates rather than stalling the scan
            let _ = progress.try_send(ScanProgress {
                ports_checked: checked,
                servers_found: servers,
                total_ports: self.total_ports,
            });
        }
        found
    }

    /// Whether anything accepts a TCP connection on `port`.
    async fn tcp_open(&self, port: u16) -> bool {
        let ctx: QueryContext = self.ctx.with_timeout(DISCOVERY_TIMEOUT / 2);
        let Ok(addr) = resolve(&ctx, &self.host, port).await else {
            return false;
        };
        ctx.run_io(TcpStream::connect(addr), QueryError::UnreachableHost)
            .await
            .is_ok()
    }

    /// First protocol answering on `port`, closest registered port first.
    async fn try_protocols(&self, port: u16) -> Option<ServerInfo> {
        let tcp_open: bool = self.tcp_open(port).await;
        let mut candidates: Vec<&Arc<dyn Protocol>> = self
            .protocols
            .iter()
            .filter(|protocol| tcp_open || protocol.transport() == Transport::Udp)
            .collect();
        candidates.sort_by_key(|protocol| protocol.port_distance(port));
        step!(
            self.opts,
            "probing {}:{} (tcp {}) with {} protocols",
            self.host,
            port,
            if tcp_open { "open" } else { "closed" },
            candidates.len()
        );

        for protocol in candidates {
            if self.ctx.is_done() {
                return None;
            }
            let attempt: Attempt = Attempt {
                protocol: Arc::clone(protocol),
                query_port: port,
                reported_port: None,
                opts: self.opts.clone(),
            };
            if let Ok(info) = attempt.run(&self.ctx, &self.host).await {
                if info.online {
                    return Some(info);
                }
            }
        }
        None
    }

    /// Every server found so far, ordered by query port.
    pub(crate) fn servers(&self) -> Vec<ServerInfo> {
        let probed = self.probed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut servers: Vec<ServerInfo> = probed
            .values()
            .filter_map(|cell| cell.get().cloned().flatten())
            .collect();
        servers.sort_by_key(|info| info.query_port);
        servers
    }
}

/// Seeds for dynamic expansion: every protocol's default ports.
pub(crate) fn seed_ports(registry: &Registry) -> BTreeSet<u16> {
    registry
        .protocols()
        .iter()
        .flat_map(|protocol| [protocol.default_port(), protocol.default_query_port()])
        .filter(|port| *port >= MIN_PORT)
        .collect()
}

/// Probe each of `ports` concurrently.
pub(crate) async fn scan_ports(scanner: Arc<Scanner>, ports: Vec<u16>) {
    let mut tasks: JoinSet<()> = JoinSet::new();
    for port in ports {
        let scanner: Arc<Scanner> = Arc::clone(&scanner);
        tasks.spawn(async move {
            scanner.probe(port).await;
        });
    }
    while tasks.join_next().await.is_some() {}
}

/// Expand outward from every seed concurrently.
pub(crate) async fn scan_dynamic(scanner: Arc<Scanner>, seeds: BTreeSet<u16>) {
    let mut tasks: JoinSet<()> = JoinSet::new();
    for seed in seeds {
        let scanner: Arc<Scanner> = Arc::clone(&scanner);
        tasks.spawn(async move {
            walk_from_seed(seed, |port| {
                let scanner: Arc<Scanner> = Arc::clone(&scanner);
                async move { scanner.probe(port).await }
            })
            .await;
        });
    }
    while tasks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    async fn walk_with(seed: u16, alive: &[u16]) -> Vec<u16> {
        let alive: HashSet<u16> = alive.iter().copied().collect();
        let seen: Mutex<Vec<u16>> = Mutex::new(Vec::new());
        walk_from_seed(seed, |port| {
            seen.lock().unwrap().push(port);
            let up = alive.contains(&port);
            async move { up }
        })
        .await;
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        seen
    }

    #[tokio::test]
    async fn dead_seed_still_walks_three_each_way() {
        let seen = walk_with(27015, &[]).await;
        assert_eq!(seen, [27012, 27013, 27014, 27015, 27016, 27017, 27018]);
    }

    #[tokio::test]
    async fn live_ports_reset_the_count() {
        let seen = walk_with(25565, &[25566, 25568]).await;
        assert_eq!(
            seen,
            [25562, 25563, 25564, 25565, 25566, 25567, 25568, 25569, 25570, 25571]
        );
    }

    #[tokio::test]
    async fn walks_stop_at_port_bounds() {
        let seen = walk_with(1025, &[]).await;
        assert_eq!(seen, [1024, 1025, 1026, 1027, 1028]);
        let seen = walk_with(65534, &[]).await;
        assert_eq!(seen, [65531, 65532, 65533, 65534, 65535]);
    }

    #[test]
    fn seeds_are_default_ports() {
        let seeds: Vec<u16> = seed_ports(&Registry::with_defaults()).into_iter().collect();
        assert_eq!(seeds, [7777, 25565, 27015]);
    }
}
