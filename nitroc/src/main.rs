use std::error::Error;
use std::future::{self, Future};
use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod cli;

use nitroc_api as api;
use nitroc_cloud as cloud;
use nitroc_model as model;
use nitroc_util as util;

use crate::api::ApiConfig;
use crate::cloud::{
    CloudConfig, CloudService, ConfigFile, LedControl, RpcRegistry, SystemAction,
};
use crate::model::{Model, StateStore};

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("debug".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("reqwest=info".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();

    let cli = cli::parse();

    let api_config = ApiConfig {
        local_address: cli.local_api_address.clone().unwrap_or_default(),
    };

    let cloud_config = ConfigFile::from_file(&cli.config)?
        .into_cloud_config(cli.cloud_server.clone(), cli.cloud_token.clone());

    start_nitroc(api_config, cloud_config, !cli.no_autostart).await
}

#[instrument(name = "nitroc", skip_all, err)]
async fn start_nitroc(
    api_config: ApiConfig,
    cloud_config: Option<CloudConfig>,
    autostart: bool,
) -> Result<(), Box<dyn Error>> {
    trace!(
        api = ?api_config,
        server = ?cloud_config.as_ref().map(|c| c.server.to_string()),
        "using config:"
    );

    let model: Arc<dyn StateStore> = Arc::new(Model::new());

    // Procedures the server may invoke over RPC
    let registry = RpcRegistry::new()
        .with(SystemAction::reboot())?
        .with(SystemAction::poweroff())?
        .with(LedControl::probe())?;
    debug!(methods = ?registry.methods().collect::<Vec<_>>(), "rpc handlers ready");

    let service = CloudService::new(cloud_config.is_some(), Arc::clone(&model));
    let active_rx = service.subscribe();

    // Bind first so a taken address fails before anything is reported
    let listener = api_config.local_address.bind().await?;
    debug!("bound to local address {}", api_config.local_address);

    if cloud_config.is_none() {
        warn!("no cloud server or token configured, reporting disabled");
    } else if autostart {
        service.enable(true);
    } else {
        info!("waiting to be enabled through the local API");
    }

    // Start main loop and terminate on error
    tokio::select! {
        // Start local API server
        res = api::start(listener, service.clone(), Arc::clone(&model)) => {
            res.map_err(Box::<dyn Error>::from)
        }

        // Start cloud reporting
        res = maybe_start(cloud_config, |cloud_config| {
            cloud::start_cloud(cloud_config, Arc::clone(&model), registry, active_rx)
        }) => res.map_err(Box::<dyn Error>::from),
    }
}

/// Given an optional value `pred`, invoke closure `f` if it is `Some(P)`
/// and return the result, otherwise return a pending future in its place.
///
/// This is useful to reduce boilerplate in our main loop `select!`.
async fn maybe_start<P, F, Fut, T>(pred: Option<P>, f: F) -> T
where
    Fut: Future<Output = T>,
    F: FnOnce(P) -> Fut,
{
    match pred {
        Some(p) => f(p).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::LocalAddress;

    #[tokio::test]
    async fn maybe_start_runs_present_values() {
        let res = maybe_start(Some(21), |n| async move { n * 2 }).await;
        assert_eq!(res, 42);
    }

    #[tokio::test]
    async fn maybe_start_stays_pending_without_value() {
        let res = tokio::time::timeout(
            Duration::from_millis(10),
            maybe_start(None::<u8>, |n| async move { n }),
        )
        .await;
        assert!(res.is_err());
    }

    #[test]
    fn local_api_defaults_to_loopback() {
        let config = ApiConfig {
            local_address: LocalAddress::default(),
        };
        assert!(matches!(
            config.local_address,
            LocalAddress::Tcp(addr) if addr.ip().is_loopback()
        ));
    }
}
