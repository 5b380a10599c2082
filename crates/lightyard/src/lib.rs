//! lightyard library - scheduler, pairing and http setup.
//!
//! this crate provides the control plane for remotely-signed lightning nodes:
//! - [`service`]: register/recover/schedule over the registries and the ca
//! - [`supervisor`]: starting, stopping and watching node processes
//! - [`pairing`]: relaying new-device approvals through a node's signer
//! - [`handlers`]: json-over-http transport for all of the above
//! - [`cli`]: command-line interface implementation

mod error;

/// command-line interface implementation.
pub mod cli;
/// http request handlers.
pub mod handlers;
/// device pairing sessions and signer request streams.
pub mod pairing;
/// the scheduler service.
pub mod service;
/// node process supervision.
pub mod supervisor;
/// challenge and approval signature checks.
pub mod verify;

pub use error::{Error, Result};
pub use pairing::PairingCoordinator;
pub use service::SchedulerService;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use lightyard_ca::{CertificateAuthority, IdentityPath};
use lightyard_types::Config;
use tracing::{info, warn};

use supervisor::{NodeSupervisor, VersionTable};
use verify::{AcceptAll, LightningMessageVerifier, SignatureVerifier};

/// shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// server configuration.
    pub config: Arc<Config>,
    /// register/recover/schedule operations.
    pub scheduler: Arc<SchedulerService>,
    /// pairing sessions.
    pub pairing: Arc<PairingCoordinator>,
}

impl AppState {
    /// build the services described by `config`.
    ///
    /// creates the certificate hierarchy if it is missing and resolves the
    /// node executables. must run inside a tokio runtime.
    pub async fn new(config: Config) -> Result<Self> {
        let ca = Arc::new(CertificateAuthority::new(&config.cert_root));
        let init = Arc::clone(&ca);
        tokio::task::spawn_blocking(move || -> Result<()> {
            init.ensure_hierarchy()?;
            init.create_ca(&IdentityPath::root().join("services")?.join("scheduler")?)?;
            Ok(())
        })
        .await??;

        let verifier: Arc<dyn SignatureVerifier> = if config.auth.verify_challenge_signatures {
            Arc::new(LightningMessageVerifier::new())
        } else {
            warn!("challenge signature verification is disabled");
            Arc::new(AcceptAll)
        };

        let mut versions = VersionTable::new(config.versions.clone());
        if config.versions_search_path {
            versions = versions.scan_search_path().await;
        }
        let supervisor = NodeSupervisor::new(
            Arc::new(versions),
            NodeSupervisor::launcher_for(config.scheduler.launcher),
            config.scheduler.clone(),
            config.node_host.clone(),
        );

        let scheduler = SchedulerService::new(
            Arc::clone(&ca),
            supervisor,
            Arc::clone(&verifier),
            config.node_directory.clone(),
            config.auth.clone(),
        );
        let pairing = PairingCoordinator::new(ca, verifier, config.pairing.clone());

        info!(
            cert_root = ?config.cert_root,
            node_directory = ?config.node_directory,
            launcher = ?config.scheduler.launcher,
            "services initialized"
        );
        Ok(Self {
            config: Arc::new(config),
            scheduler: Arc::new(scheduler),
            pairing: Arc::new(pairing),
        })
    }
}

/// create the axum application with all routes.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/scheduler/challenge",
            post(handlers::scheduler::get_challenge),
        )
        .route("/scheduler/register", post(handlers::scheduler::register))
        .route("/scheduler/recover", post(handlers::scheduler::recover))
        .route("/scheduler/schedule", post(handlers::scheduler::schedule))
        .route("/scheduler/node_info", post(handlers::scheduler::node_info))
        .route("/scheduler/stop", post(handlers::scheduler::stop))
        .route("/scheduler/restart", post(handlers::scheduler::restart))
        .route("/scheduler/webhooks/add", post(handlers::webhooks::add))
        .route("/scheduler/webhooks/list", post(handlers::webhooks::list))
        .route("/scheduler/webhooks/delete", post(handlers::webhooks::delete))
        .route("/scheduler/webhooks/rotate", post(handlers::webhooks::rotate))
        .route("/pairing/pair_device", post(handlers::pairing::pair_device))
        .route("/pairing/pairing_data", post(handlers::pairing::pairing_data))
        .route("/pairing/approve", post(handlers::pairing::approve))
        .route(
            "/pairing/signer/{node_id}",
            get(handlers::pairing::signer_stream),
        )
        .with_state(state)
}
