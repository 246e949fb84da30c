//! Deciding which protocols and ports to try, and in which order.
//!
//! Every entry point follows the same policy: an error or an offline answer
//! from one candidate only means "try the next one". An error reaches the
//! caller once every candidate is used up, and an offline answer is
//! returned as data when nothing better turned up.

mod address;
mod discovery;
mod race;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::context::QueryContext;
use crate::error::{ErrorKind, QueryError};
use crate::info::{GameConfig, ServerInfo};
use crate::options::{step, Options};
use crate::protocol::Protocol;
use crate::registry::Registry;

pub use address::{parse_address, Target};
pub use discovery::{ScanProgress, DEAD_PORT_THRESHOLD};

use discovery::{scan_dynamic, scan_ports, seed_ports, Scanner};
use race::{race, Attempt};

/// Lowest port ever probed implicitly.
pub const MIN_PORT: u16 = 1024;

/// How far from the requested port fallback attempts go.
pub const ADJACENT_RANGE: u16 = 3;

/// Protocol order used when nothing about the port says otherwise.
pub const POPULARITY: &[&str] = &["minecraft", "a2s", "terraria"];

/// Ports next to `port`, nearest first and above before below.
pub fn adjacent_ports(port: u16) -> Vec<u16> {
    let mut ports: Vec<u16> = Vec::with_capacity(2 * ADJACENT_RANGE as usize);
    for offset in 1..=ADJACENT_RANGE {
        if let Some(above) = port.checked_add(offset) {
            ports.push(above);
        }
        if let Some(below) = port.checked_sub(offset).filter(|p| *p >= MIN_PORT) {
            ports.push(below);
        }
    }
    ports
}

/// Queries game servers using the protocols of a [Registry].
///
/// ```no_run
/// use gamequery::{Options, QueryContext, QueryEngine};
///
/// # async fn run() -> Result<(), gamequery::QueryError> {
/// let engine = QueryEngine::default();
/// let ctx = QueryContext::new();
/// let info = engine
///     .query_single(&ctx, "minecraft", "mc.example.com", &Options::default())
///     .await?;
/// println!("{} ({}/{})", info.name, info.players.current, info.players.max);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueryEngine {
    registry: Arc<Registry>,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(Registry::with_defaults())
    }
}

impl QueryEngine {
    pub fn new(registry: Registry) -> Self {
        QueryEngine {
            registry: Arc::new(registry),
        }
    }

    pub fn with_shared_registry(registry: Arc<Registry>) -> Self {
        QueryEngine { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Every protocol name and game alias that can be queried.
    pub fn supported_games(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Port players connect to for `game`.
    pub fn default_port(&self, game: &str) -> Option<u16> {
        self.registry
            .game_config(game)
            .map(|(config, _)| config.game_port)
    }

    /// Port `game` answers status queries on.
    pub fn default_query_port(&self, game: &str) -> Option<u16> {
        self.registry
            .game_config(game)
            .map(|(config, _)| config.query_port)
    }

    /// Query `address` as `game`.
    ///
    /// The port comes from the address, else [Options::port], else the
    /// game's registered query port. When the exact port fails, the ports
    /// around it are tried with every protocol.
    pub async fn query_single(
        &self,
        ctx: &QueryContext,
        game: &str,
        address: &str,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError> {
        let (config, protocol): (GameConfig, Arc<dyn Protocol>) = self
            .registry
            .game_config(game)
            .ok_or_else(|| QueryError::UnsupportedGame(game.to_owned()))?;
        let target: Target = parse_address(address)?;
        let explicit: Option<u16> = target.port.or(opts.port());
        let query_port: u16 = explicit.unwrap_or(config.query_port);
        let reported_port: u16 = explicit.unwrap_or(config.game_port);
        step!(
            opts,
            "single query for {} at {} (query port {}, game port {})",
            game,
            target.host,
            query_port,
            reported_port
        );

        let primary: Attempt = Attempt {
            protocol,
            query_port,
            reported_port: Some(reported_port),
            opts: opts.clone(),
        };
        let offline: Option<ServerInfo> = match primary.run(ctx, &target.host).await {
            Ok(info) if info.online => return Ok(info),
            Ok(info) => Some(info),
            Err(err) if err.kind() == ErrorKind::Config || ctx.is_cancelled() => return Err(err),
            Err(_) => None,
        };

        self.try_adjacent(ctx, &target.host, query_port, reported_port, offline, opts)
            .await
    }

    /// Query `address` without knowing the game.
    ///
    /// With a port, protocols registered on that port go first. Without
    /// one, every protocol is tried on its own default query port.
    pub async fn auto_detect(
        &self,
        ctx: &QueryContext,
        address: &str,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError> {
        let target: Target = parse_address(address)?;

        let Some(port) = target.port.or(opts.port()) else {
            step!(opts, "auto-detecting {} on default ports", target.host);
            let attempts: Vec<Attempt> = self
                .by_popularity()
                .into_iter()
                .map(|protocol| Attempt {
                    query_port: protocol.default_query_port(),
                    reported_port: Some(protocol.default_port()),
                    protocol,
                    opts: opts.clone(),
                })
                .collect();
            return race(ctx, &target.host, attempts, opts.max_concurrency()).await;
        };

        step!(opts, "auto-detecting {}:{}", target.host, port);
        let attempts: Vec<Attempt> = self
            .by_port_preference(port)
            .into_iter()
            .map(|protocol| Attempt {
                protocol,
                query_port: port,
                reported_port: Some(port),
                opts: opts.clone(),
            })
            .collect();
        let offline: Option<ServerInfo> =
            match race(ctx, &target.host, attempts, opts.max_concurrency()).await {
                Ok(info) if info.online => return Ok(info),
                Ok(info) => Some(info),
                Err(err) if ctx.is_cancelled() => return Err(err),
                Err(_) => None,
            };

        self.try_adjacent(ctx, &target.host, port, port, offline, opts)
            .await
    }

    /// Find every responsive server on the host in `address`.
    ///
    /// Ports come from [Options::port_range], else the port in the address
    /// or [Options::port], else a walk outward from every protocol's
    /// default ports. Progress goes to `progress` without ever blocking the
    /// scan. Each port yields at most one server; results are sorted by
    /// query port.
    pub async fn discover(
        &self,
        ctx: &QueryContext,
        address: &str,
        opts: &Options,
        progress: Option<mpsc::Sender<ScanProgress>>,
    ) -> Result<Vec<ServerInfo>, QueryError> {
        let target: Target = parse_address(address)?;
        let explicit: Option<Vec<u16>> = match opts.port_range() {
            Some(range) => {
                let mut seen: HashSet<u16> = HashSet::new();
                Some(
                    range
                        .iter()
                        .copied()
                        .filter(|port| *port != 0 && seen.insert(*port))
                        .collect(),
                )
            }
            None => target.port.or(opts.port()).map(|port| vec![port]),
        };

        let total_ports: Option<usize> = explicit.as_ref().map(Vec::len);
        let scanner: Arc<Scanner> = Arc::new(Scanner::new(
            ctx,
            &target.host,
            &self.registry,
            opts,
            total_ports,
            progress,
        ));

        match explicit {
            Some(ports) => {
                step!(opts, "discovering {} on {} listed ports", target.host, ports.len());
                scan_ports(Arc::clone(&scanner), ports).await;
            }
            None => {
                let seeds = seed_ports(&self.registry);
                step!(opts, "discovering {} from seeds {:?}", target.host, seeds);
                scan_dynamic(Arc::clone(&scanner), seeds).await;
            }
        }

        if ctx.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        let servers: Vec<ServerInfo> = scanner.servers();
        step!(opts, "discovery of {} found {} servers", target.host, servers.len());
        if servers.is_empty() {
            return Err(QueryError::NoResponsiveServer(target.to_string()));
        }
        Ok(servers)
    }

    /// Race every protocol on the ports around `port`, keeping `offline`
    /// if nothing comes up online.
    async fn try_adjacent(
        &self,
        ctx: &QueryContext,
        host: &str,
        port: u16,
        reported_port: u16,
        offline: Option<ServerInfo>,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError> {
        let discovery: Options = opts.for_discovery();
        let mut attempts: Vec<Attempt> = Vec::new();
        for candidate in adjacent_ports(port) {
            let mut protocols: Vec<Arc<dyn Protocol>> = self.by_popularity();
            protocols.sort_by_key(|protocol| protocol.port_distance(candidate));
            attempts.extend(protocols.into_iter().map(|protocol| Attempt {
                protocol,
                query_port: candidate,
                reported_port: Some(reported_port),
                opts: discovery.clone(),
            }));
        }
        step!(opts, "trying {} candidates around {}:{}", attempts.len(), host, port);

        match (race(ctx, host, attempts, opts.max_concurrency()).await, offline) {
            (Ok(info), _) if info.online => Ok(info),
            (_, Some(offline)) => Ok(offline),
            (result, None) => result,
        }
    }

    /// All protocols, popular ones first, the rest in registration order.
    fn by_popularity(&self) -> Vec<Arc<dyn Protocol>> {
        let protocols: &[Arc<dyn Protocol>] = self.registry.protocols();
        let mut ordered: Vec<Arc<dyn Protocol>> = POPULARITY
            .iter()
            .filter_map(|name| protocols.iter().find(|p| p.name() == *name).cloned())
            .collect();
        ordered.extend(
            protocols
                .iter()
                .filter(|p| !POPULARITY.contains(&p.name()))
                .cloned(),
        );
        ordered
    }

    /// Protocols whose query port, game port, or any game's port is `port`,
    /// in that order, then everything else by popularity.
    fn by_port_preference(&self, port: u16) -> Vec<Arc<dyn Protocol>> {
        let mut remaining: Vec<Arc<dyn Protocol>> = self.by_popularity();
        let mut ordered: Vec<Arc<dyn Protocol>> = Vec::with_capacity(remaining.len());
        let tiers: [fn(&dyn Protocol, u16) -> bool; 3] = [
            |p: &dyn Protocol, port: u16| p.default_query_port() == port,
            |p: &dyn Protocol, port: u16| p.default_port() == port,
            |p: &dyn Protocol, port: u16| p.games().iter().any(|game| game.uses_port(port)),
        ];
        for tier in tiers {
            let (hit, miss): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|protocol| tier(&**protocol, port));
            ordered.extend(hit);
            remaining = miss;
        }
        ordered.extend(remaining);
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(protocols: Vec<Arc<dyn Protocol>>) -> Vec<&'static str> {
        protocols.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn adjacent_ports_alternate_and_stay_in_range() {
        assert_eq!(adjacent_ports(27015), [27016, 27014, 27017, 27013, 27018, 27012]);
        assert_eq!(adjacent_ports(1025), [1026, 1024, 1027, 1028]);
        assert_eq!(adjacent_ports(65534), [65535, 65533, 65532, 65531]);
    }

    #[test]
    fn popularity_order() {
        let engine = QueryEngine::default();
        assert_eq!(names(engine.by_popularity()), ["minecraft", "a2s", "terraria"]);
    }

    #[test]
    fn port_preference_puts_owners_first() {
        let engine = QueryEngine::default();
        assert_eq!(names(engine.by_port_preference(27015)), ["a2s", "minecraft", "terraria"]);
        assert_eq!(names(engine.by_port_preference(7777)), ["terraria", "a2s", "minecraft"]);
        assert_eq!(names(engine.by_port_preference(2457)), ["a2s", "minecraft", "terraria"]);
        assert_eq!(names(engine.by_port_preference(9999)), ["minecraft", "a2s", "terraria"]);
    }

    #[test]
    fn default_ports_by_game() {
        let engine = QueryEngine::default();
        assert_eq!(engine.default_port("ark-survival-evolved"), Some(7777));
        assert_eq!(engine.default_query_port("ark-survival-evolved"), Some(27015));
        assert_eq!(engine.default_query_port("minecraft"), Some(25565));
        assert_eq!(engine.default_port("nope"), None);
        assert!(engine.supported_games().iter().any(|g| g == "counter-strike"));
    }

    #[tokio::test]
    async fn config_errors_fail_fast() {
        let engine = QueryEngine::default();
        let ctx = QueryContext::new();
        let opts = Options::default();
        assert!(matches!(
            engine.query_single(&ctx, "nope", "localhost", &opts).await,
            Err(QueryError::UnsupportedGame(_))
        ));
        assert!(matches!(
            engine.query_single(&ctx, "minecraft", "", &opts).await,
            Err(QueryError::InvalidAddress(_))
        ));
        assert!(matches!(
            engine.auto_detect(&ctx, "host:invalid", &opts).await,
            Err(QueryError::InvalidPort(_))
        ));
        assert!(matches!(
            engine.discover(&ctx, "", &opts, None).await,
            Err(QueryError::InvalidAddress(_))
        ));
    }
}
