use log::{error, info};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, middleware, web};

use rgpio::{AppConfig, AppState, CONFIG_ENV, GpioController, PINS, cors_headers};

#[cfg(feature = "hardware-gpio")]
use rgpio::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
use rgpio::MockGpioBackend;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());
    let config = AppConfig::load(config_path.as_deref())
        .and_then(|cfg| cfg.validate().map(|()| cfg))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let backend = {
        #[cfg(feature = "hardware-gpio")]
        {
            Arc::new(LibgpiodBackend::new(
                config.gpio.chip.clone(),
                config.gpio.consumer.clone(),
            ))
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            info!("Built without hardware-gpio, using in-memory GPIO backend");
            Arc::new(MockGpioBackend::default())
        }
    };

    let controller = Arc::new(GpioController::new(backend));
    let app_state = AppState::new(
        controller.clone(),
        Duration::from_millis(config.gpio.operation_timeout_ms),
    );

    let pins: Vec<u32> = PINS.iter().map(|p| p.bcm).collect();
    info!("Valid GPIO pins: {pins:?}");

    let http_cfg = config.http.clone();
    let mut server = HttpServer::new(move || {
        let scope_path = http_cfg.path.clone();
        App::new()
            .wrap(cors_headers(http_cfg.cors_allow_origin.as_deref()))
            .wrap(middleware::Logger::default())
            .app_data(web::Data::new(app_state.clone()))
            .service(app_state.api_scope(&scope_path))
    })
    .client_request_timeout(Duration::from_secs(config.http.timeout));

    let mut listening = Vec::new();
    if let Some(socket_path) = &config.http.unix_socket {
        // a socket file left by a previous run would fail the bind
        if Path::new(socket_path).exists() {
            fs::remove_file(socket_path)?;
        }
        server = server.bind_uds(socket_path)?;
        listening.push(format!("unix:{socket_path}"));
    }
    if let Some(host) = &config.http.host {
        server = server.bind(host)?;
        listening.push(host.clone());
    }

    info!("Starting GPIO server on {}...", listening.join(", "));

    let result = server.run().await;

    info!("Shutting down, cleaning up GPIO...");
    if let Err(e) = controller.release() {
        error!("Failed to release GPIO lines: {e}");
    }

    result
}
