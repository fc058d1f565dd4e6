/// Image Service - HTTP Server
///
/// Serves images and thumbnails, accepts admin uploads, and runs the
/// thumbnail listener in the same process.
use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use image_service::handlers;
use image_service::services::ImageServices;
use image_service::Config;
use std::io;
use tokio::sync::watch;
use tracing::{error, info};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_service=info,actix_web=info".into()),
        )
        .init();

    let config = Config::from_env();
    let bind_address = format!("{}:{}", config.app.host, config.app.port);

    info!(
        env = %config.app.env,
        images = %config.image.dir.display(),
        generate_enabled = config.image.enable_preview_task,
        "Image Service starting HTTP server on {}",
        bind_address
    );

    let services = ImageServices::connect(&config)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{e:#}")))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = services
        .worker
        .clone()
        .start(shutdown_rx)
        .await
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to subscribe to preview channels: {e}"),
            )
        })?;

    let app_services = web::Data::new(services);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_services.clone())
            .wrap(actix_middleware::Logger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_address)?
    .run();

    let result = server.await;
    if let Err(e) = &result {
        error!("Server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = listener.await {
        error!("Thumbnail listener task failed: {}", e);
    }

    info!("Image-service shutting down");
    result
}
