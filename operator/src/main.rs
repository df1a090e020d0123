use clap::Parser;
pub use controller::*;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Responder, get, middleware,
    web::Data,
};

#[get("/metrics")]
async fn metrics(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(metrics)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

fn init_tracing(json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| Error::Other(format!("invalid log filter: {e}")))?;
    let res = if json {
        let collector = Registry::default()
            .with(tracing_subscriber::fmt::layer().json())
            .with(env_filter);
        tracing::subscriber::set_global_default(collector)
    } else {
        let collector = Registry::default()
            .with(tracing_subscriber::fmt::layer())
            .with(env_filter);
        tracing::subscriber::set_global_default(collector)
    };
    res.map_err(|e| Error::Other(format!("cannot set the tracing subscriber: {e}")))
}

async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
                token.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown requested");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    // Start kubernetes controller
    let (manager, controller) = Manager::new(&config, shutdown.clone()).await?;

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(manager.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&config.bind_address)
    .map_err(|e| Error::Other(format!("Can not bind to {}: {e}", config.bind_address)))?
    .disable_signals()
    .shutdown_timeout(5)
    .run();
    let handle = server.handle();

    tokio::select! {
        _ = controller => tracing::warn!("ChartInstall controller exited"),
        _ = server => tracing::info!("actix exited"),
    }
    handle.stop(true).await;
    Ok(())
}
