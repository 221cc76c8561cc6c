//! Actix Web API server exposing the detection endpoint.
//!
//! The server runs on a dedicated thread so the caller keeps its own thread
//! for signal handling. Request admission is delegated entirely to the
//! [`AdmissionDispatcher`]; handlers never touch scheduler state directly.

use actix_multipart::Multipart;
use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::detect::{
    config::ServeConfig,
    data::ErrorBody,
    dispatcher::AdmissionDispatcher,
    telemetry,
    worker::DispatchError,
};

/// Shared state backing HTTP handlers.
struct ApiState {
    dispatcher: AdmissionDispatcher,
}

/// Handle for the API server thread.
pub struct ApiServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ApiServer {
    /// Signal the server to stop and block until the thread exits.
    pub fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Route table for the detection API; shared by the server and tests.
pub fn configure(dispatcher: AdmissionDispatcher) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(ApiState { dispatcher }))
            .route("/api/detect", web::post().to(detect_handler))
            .route("/healthz", web::get().to(healthz_handler))
            .route("/metrics", web::get().to(metrics_handler));
    }
}

/// Spawn the API server thread and return a handle that can stop it.
pub fn spawn_api_server(config: ServeConfig) -> Result<ApiServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let listen = config.listen.clone();
    let handle = std::thread::Builder::new()
        .name("detect-api-server".into())
        .spawn(move || {
            if let Err(err) = actix_web::rt::System::new().block_on(async move {
                let dispatcher = AdmissionDispatcher::spawn(config.dispatcher.clone());
                let handler_dispatcher = dispatcher.clone();
                let server = HttpServer::new(move || {
                    App::new().configure(configure(handler_dispatcher.clone()))
                })
                .bind(listen.as_str())?
                .run();

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                let result = server.await;
                dispatcher.shutdown();
                result
            }) {
                error!("HTTP server error: {err}");
            }
        })
        .context("Failed to spawn API server thread")?;
    Ok(ApiServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Accept one multipart image field and run it through the dispatcher.
async fn detect_handler(state: web::Data<ApiState>, mut payload: Multipart) -> HttpResponse {
    let mut image: Option<Vec<u8>> = None;

    while let Some(part) = payload.next().await {
        let mut field = match part {
            Ok(field) => field,
            Err(err) => {
                return HttpResponse::BadRequest()
                    .json(ErrorBody::new(format!("Malformed upload: {err}")));
            }
        };
        if field.name() != Some("image") {
            continue;
        }

        let mut buffer = Vec::new();
        while let Some(chunk) = field.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(err) => {
                    return HttpResponse::BadRequest()
                        .json(ErrorBody::new(format!("Malformed upload: {err}")));
                }
            }
        }
        image = Some(buffer);
        break;
    }

    // Reject before the dispatcher sees the request; no slot is consumed.
    let image = match image {
        Some(image) if !image.is_empty() => image,
        _ => return HttpResponse::BadRequest().json(ErrorBody::new("No image provided")),
    };

    debug!("accepted detection request ({} byte image)", image.len());
    match state.dispatcher.submit(image).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(err) => error_response(err),
    }
}

fn error_response(err: DispatchError) -> HttpResponse {
    match err {
        DispatchError::WorkerNonZeroExit { code, stderr } => {
            error!("worker failed with code {code}");
            HttpResponse::InternalServerError()
                .json(ErrorBody::with_details("Detection failed", stderr))
        }
        DispatchError::WorkerSpawnFailed(err) => HttpResponse::InternalServerError().json(
            ErrorBody::new(format!("Failed to start detection process: {err}")),
        ),
        DispatchError::ResultParseFailed { raw } => HttpResponse::InternalServerError()
            .json(ErrorBody::new(format!("Failed to parse result: {raw}"))),
        DispatchError::TempFile(err) => HttpResponse::InternalServerError()
            .json(ErrorBody::new(format!("Server error: {err}"))),
        DispatchError::Overloaded => {
            HttpResponse::ServiceUnavailable().json(ErrorBody::new("Server overloaded"))
        }
        DispatchError::Shutdown => HttpResponse::InternalServerError()
            .json(ErrorBody::new("Server error: dispatcher unavailable")),
    }
}

async fn healthz_handler() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body("ok")
}

/// Render the Prometheus registry.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Run the serve command until interrupted.
pub fn run_server(config: ServeConfig) -> Result<()> {
    telemetry::init_tracing(config.verbose);
    let _ = telemetry::init_metrics_recorder();

    info!(
        "detection API listening on {} (worker: {})",
        config.listen,
        config.dispatcher.worker.program.display()
    );

    let server = spawn_api_server(config)?;

    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    let _ = stop_rx.recv();
    info!("shutting down");
    server.stop();
    Ok(())
}
