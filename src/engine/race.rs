//! Ranked, bounded-concurrency execution of query candidates.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::QueryContext;
use crate::error::QueryError;
use crate::info::ServerInfo;
use crate::options::{step, Options};
use crate::protocol::Protocol;

/// One protocol on one port.
#[derive(Clone)]
pub(crate) struct Attempt {
    pub protocol: Arc<dyn Protocol>,
    pub query_port: u16,
    /// Connect port to report instead of whatever the codec found.
    pub reported_port: Option<u16>,
    pub opts: Options,
}

impl Attempt {
    /// Run the query and stamp the engine-owned fields onto the result.
    pub async fn run(&self, ctx: &QueryContext, host: &str) -> Result<ServerInfo, QueryError> {
        let name: &'static str = self.protocol.name();
        step!(self.opts, "querying {}:{} with {}", host, self.query_port, name);

        let result = self.protocol.query(ctx, host, self.query_port, &self.opts).await;
        match result {
            Ok(mut info) => {
                info.address = host.to_owned();
                info.query_port = self.query_port;
                if let Some(port) = self.reported_port {
                    info.port = port;
                }
                step!(
                    self.opts,
                    "{} answered on {}: online={} players={}/{}",
                    name,
                    self.query_port,
                    info.online,
                    info.players.current,
                    info.players.max
                );
                Ok(info)
            }
            Err(err) => {
                step!(self.opts, "{} on {}:{} failed: {}", name, host, self.query_port, err);
                Err(err)
            }
        }
    }
}

/// Number of permits for `max_concurrency` over `candidates` attempts.
pub(crate) fn permits(max_concurrency: usize, candidates: usize) -> usize {
    match max_concurrency {
        0 => candidates.clamp(1, Semaphore::MAX_PERMITS),
        max => max.min(Semaphore::MAX_PERMITS),
    }
}

enum Outcome {
    Online(ServerInfo),
    Offline(ServerInfo),
    Failed(QueryError),
}

/// Run `attempts` concurrently and return the online answer of the
/// earliest-ranked attempt, as soon as every attempt ranked above it has
/// failed. With no online answer the earliest offline one is returned, and
/// with neither the result is [QueryError::NoResponsiveServer].
pub(crate) async fn race(
    ctx: &QueryContext,
    host: &str,
    attempts: Vec<Attempt>,
    max_concurrency: usize,
) -> Result<ServerInfo, QueryError> {
    if attempts.is_empty() {
        return Err(QueryError::NoResponsiveServer(host.to_owned()));
    }

    let gate: Arc<Semaphore> = Arc::new(Semaphore::new(permits(max_concurrency, attempts.len())));
    let mut outcomes: Vec<Option<Outcome>> = attempts.iter().map(|_| None).collect();
    let mut tasks: JoinSet<(usize, Result<ServerInfo, QueryError>)> = JoinSet::new();

    for (rank, attempt) in attempts.into_iter().enumerate() {
        let ctx: QueryContext = ctx.clone();
        let host: String = host.to_owned();
        let gate: Arc<Semaphore> = Arc::clone(&gate);
        tasks.spawn(async move {
            let _permit = match gate.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (rank, Err(QueryError::Cancelled)),
            };
            (rank, attempt.run(&ctx, &host).await)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        // a panicked attempt never settles its rank; the fallback below
        // still considers everything that did
        let Ok((rank, result)) = joined else {
            continue;
        };
        outcomes[rank] = Some(match result {
            Ok(info) if info.online => Outcome::Online(info),
            Ok(info) => Outcome::Offline(info),
            Err(err) => Outcome::Failed(err),
        });

        let decisive: Option<usize> = outcomes
            .iter()
            .position(|slot| !matches!(slot, Some(Outcome::Offline(_) | Outcome::Failed(_))));
        if let Some(index) = decisive {
            if let Some(Outcome::Online(info)) = outcomes[index].take() {
                return Ok(info);
            }
        }
    }

    if ctx.is_cancelled() {
        return Err(QueryError::Cancelled);
    }

    let mut last_err: Option<QueryError> = None;
    for outcome in outcomes.into_iter().flatten() {
        match outcome {
            Outcome::Offline(info) | Outcome::Online(info) => return Ok(info),
            Outcome::Failed(err) => last_err = Some(err),
        }
    }
    Err(QueryError::NoResponsiveServer(match last_err {
        Some(err) => format!("{} (last error: {})", host, err),
        None => host.to_owned(),
    }))
}
