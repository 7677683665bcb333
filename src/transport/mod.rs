//! gRPC transport layer for teamlink.
//!
//! Each RPC is converted into a [`Request`], queued on the [`LinkRuntime`],
//! and awaited from a blocking task so the async executor never waits on
//! namespace locks or store I/O. Dropping an RPC future (client gone,
//! deadline hit) cancels the queued or running job.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Status, transport::Server};
use tracing::{debug, info};

use crate::engine::runtime::LinkRuntime;
use crate::engine::OperationContext;
use crate::error::{ExecutionError, LinkError, TransportError, ValidationError};
use crate::game::Game;
use crate::mapping::{MappingEntry, MappingLookup, Seed};
use crate::request::{Request, Response};

/// Types generated from `proto/teamlink.proto`.
pub mod proto {
    #![allow(missing_docs, clippy::pedantic)]
    tonic::include_proto!("teamlink");
}

use proto::team_link_service_server::{TeamLinkService, TeamLinkServiceServer};

pub use proto::team_link_service_client::TeamLinkServiceClient;

/// Status string returned on success.
pub const STATUS_OK: &str = "ok";

/// gRPC service implementation for teamlink.
pub struct TeamLinkServiceImpl {
    runtime: Arc<LinkRuntime>,
}

impl TeamLinkServiceImpl {
    /// Creates the service over a shared runtime.
    #[must_use]
    pub fn new(runtime: Arc<LinkRuntime>) -> Self {
        Self { runtime }
    }

    /// Wraps the service for `tonic::transport::Server`.
    #[must_use]
    pub fn into_server(self) -> TeamLinkServiceServer<Self> {
        TeamLinkServiceServer::new(self)
    }

    async fn dispatch(&self, request: Request) -> Result<Response, Status> {
        let ctx = OperationContext::new();
        debug!(op = request.name(), request_id = %ctx.request_id(), "rpc received");

        let guard = CancelOnDrop::new(ctx.clone());
        let handle = self
            .runtime
            .execute_async(request, ctx)
            .map_err(status_from_link_error)?;
        let joined = tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|e| {
                status_from_link_error(
                    TransportError::WorkerFailed {
                        message: e.to_string(),
                    }
                    .into(),
                )
            })?;
        guard.disarm();
        joined.map_err(status_from_link_error)
    }
}

/// Cancels an operation unless disarmed before drop.
struct CancelOnDrop {
    ctx: Option<OperationContext>,
}

impl CancelOnDrop {
    fn new(ctx: OperationContext) -> Self {
        Self { ctx: Some(ctx) }
    }

    fn disarm(mut self) {
        self.ctx = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            debug!(request_id = %ctx.request_id(), "rpc dropped before completion; cancelling");
            ctx.cancel();
        }
    }
}

/// Maps an engine error to a gRPC status whose message leads with the
/// phase-describing status string.
#[must_use]
pub fn status_from_link_error(err: LinkError) -> Status {
    let message = format!("{}: {err}", err.status());
    match &err {
        LinkError::Validation(_) => Status::invalid_argument(message),
        LinkError::Transport(TransportError::WorkerFailed { .. }) | LinkError::Internal { .. } => {
            Status::internal(message)
        }
        LinkError::Execution(e) => match e {
            ExecutionError::StoreRead { .. }
            | ExecutionError::StoreWrite { .. }
            | ExecutionError::EraseFailed { .. } => Status::internal(message),
            ExecutionError::TransactionAborted { .. } => Status::aborted(message),
            ExecutionError::Cancelled => Status::cancelled(message),
            ExecutionError::Timeout { .. } => Status::deadline_exceeded(message),
            ExecutionError::QueueFull { .. } => Status::resource_exhausted(message),
            ExecutionError::Disconnected { .. } => Status::unavailable(message),
        },
    }
}

fn mismatched(expected: &str) -> Status {
    status_from_link_error(LinkError::internal(format!(
        "engine returned a non-{expected} response"
    )))
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

impl From<proto::Game> for Game {
    fn from(g: proto::Game) -> Self {
        Self::new(g.date, g.team_a, g.team_b)
    }
}

impl From<Game> for proto::Game {
    fn from(g: Game) -> Self {
        Self {
            date: g.date,
            team_a: g.team_a,
            team_b: g.team_b,
        }
    }
}

impl From<proto::Mapping> for Seed {
    fn from(m: proto::Mapping) -> Self {
        Self {
            secondary: m.secondary,
            primary: m.primary,
        }
    }
}

impl From<MappingEntry> for proto::Mapping {
    fn from(m: MappingEntry) -> Self {
        Self {
            secondary: m.secondary,
            primary: Some(m.primary),
        }
    }
}

impl From<MappingLookup> for proto::Mapping {
    fn from(m: MappingLookup) -> Self {
        Self {
            secondary: m.secondary,
            primary: m.primary,
        }
    }
}

fn games(games: Vec<proto::Game>) -> Vec<Game> {
    games.into_iter().map(Game::from).collect()
}

#[tonic::async_trait]
impl TeamLinkService for TeamLinkServiceImpl {
    async fn register_primary_season(
        &self,
        request: tonic::Request<proto::PrimarySeasonRequest>,
    ) -> Result<tonic::Response<proto::PrimarySeasonResponse>, Status> {
        let req = request.into_inner();
        let response = self
            .dispatch(Request::RegisterPrimarySeason {
                namespace: req.namespace,
                games: games(req.games),
            })
            .await?;
        let Response::Register(outcome) = response else {
            return Err(mismatched("register"));
        };
        Ok(tonic::Response::new(proto::PrimarySeasonResponse {
            status: STATUS_OK.to_string(),
            games_inserted: count(outcome.games_inserted),
            games_skipped: count(outcome.games_skipped),
            identities_seeded: count(outcome.identities_seeded),
        }))
    }

    async fn resolve_secondary_season(
        &self,
        request: tonic::Request<proto::SecondarySeasonRequest>,
    ) -> Result<tonic::Response<proto::SecondarySeasonResponse>, Status> {
        let req = request.into_inner();
        let seed = req.seed.ok_or_else(|| {
            status_from_link_error(
                ValidationError::MissingField {
                    field: "seed".to_string(),
                }
                .into(),
            )
        })?;
        let response = self
            .dispatch(Request::ResolveSecondarySeason {
                namespace: req.namespace,
                seed: seed.into(),
                games: games(req.games),
            })
            .await?;
        let Response::Resolve(resolution) = response else {
            return Err(mismatched("resolve"));
        };
        Ok(tonic::Response::new(proto::SecondarySeasonResponse {
            status: STATUS_OK.to_string(),
            unmapped_games: resolution.unmapped_games.into_iter().map(Into::into).collect(),
            ambiguous_games: resolution.ambiguous_games.into_iter().map(Into::into).collect(),
            derived: resolution.derived.into_iter().map(Into::into).collect(),
            passes: resolution.passes,
            seed_written: resolution.seed_written,
        }))
    }

    async fn lookup_mappings(
        &self,
        request: tonic::Request<proto::LookupMappingsRequest>,
    ) -> Result<tonic::Response<proto::LookupMappingsResponse>, Status> {
        let req = request.into_inner();
        let response = self
            .dispatch(Request::LookupMappings {
                namespace: req.namespace,
                teams: req.teams,
            })
            .await?;
        let Response::Lookup { mappings } = response else {
            return Err(mismatched("lookup"));
        };
        Ok(tonic::Response::new(proto::LookupMappingsResponse {
            status: STATUS_OK.to_string(),
            mappings: mappings.into_iter().map(Into::into).collect(),
        }))
    }

    async fn erase_namespace(
        &self,
        request: tonic::Request<proto::EraseNamespaceRequest>,
    ) -> Result<tonic::Response<proto::EraseNamespaceResponse>, Status> {
        let req = request.into_inner();
        let response = self
            .dispatch(Request::EraseNamespace {
                namespace: req.namespace,
            })
            .await?;
        let Response::Erase(outcome) = response else {
            return Err(mismatched("erase"));
        };
        Ok(tonic::Response::new(proto::EraseNamespaceResponse {
            status: STATUS_OK.to_string(),
            mappings_deleted: count(outcome.mappings_deleted),
            games_deleted: count(outcome.games_deleted),
        }))
    }
}

/// Serves the teamlink service on an already-bound listener until
/// `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    runtime: Arc<LinkRuntime>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), tonic::transport::Error> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?local, "serving teamlink gRPC");
    Server::builder()
        .add_service(TeamLinkServiceImpl::new(runtime).into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
}
