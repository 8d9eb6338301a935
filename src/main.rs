use adequate::api::{self, AppState};
use adequate::{logger, server, Config, Store, Tracer};
use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, Dispatch};

#[tokio::main]
async fn main() {
    let config = Config::parse_args();

    let dispatch = match logger::init(&config.logger()) {
        Ok(dispatch) => dispatch,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, dispatch).await {
        error!(err = %format!("{:#}", e), "fatal");
        std::process::exit(1);
    }

    info!("graceful shutdown completed");
}

async fn run(config: Config, dispatch: Dispatch) -> anyhow::Result<()> {
    let started = Instant::now();

    let tracer = Tracer::new(config.tracer()).with_dispatch(dispatch);
    let store = Store::open(&config.store_sqlite_path, tracer)
        .await
        .context("store init")?;
    let store = Arc::new(store);

    let mut state = AppState::new(store.clone());
    if let Some(dir) = &config.http_static_dir {
        info!(prefix = "/", static_dir = %dir.display(), "ui app");
        state = state.with_static_dir(dir.clone());
    }
    let app = api::create_router(state);

    info!(duration = ?started.elapsed(), "started app");

    let served = server::serve(config.http_listen_addr, app, server::shutdown_signal()).await;
    store.close().await;
    served.context("http serve")
}
