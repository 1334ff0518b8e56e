use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    HttpRequest, HttpResponse, Responder, guard, http::Method, middleware::DefaultHeaders, web,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::gpio::{GpioBackend, GpioController, PinLevel, PinStatus};

pub struct AppState<B: GpioBackend> {
    pub controller: Arc<GpioController<B>>,
    pub operation_timeout: Duration,
}

impl<B: GpioBackend> AppState<B> {
    pub fn new(controller: Arc<GpioController<B>>, operation_timeout: Duration) -> Self {
        Self {
            controller,
            operation_timeout,
        }
    }
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            operation_timeout: self.operation_timeout,
        }
    }
}

#[derive(Deserialize)]
struct SetPayload {
    gpio: Option<i64>,
    state: Option<StateValue>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StateValue {
    Bool(bool),
    Int(i64),
}

#[derive(Deserialize)]
struct ModePayload {
    gpio: Option<i64>,
    mode: Option<String>,
}

#[derive(Serialize)]
struct PinReport {
    success: bool,
    gpio: u32,
    #[serde(flatten)]
    status: PinStatus,
}

impl PinReport {
    fn new(gpio: u32, status: PinStatus) -> Self {
        Self {
            success: true,
            gpio,
            status,
        }
    }
}

impl<B: GpioBackend + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/gpio/set")
                    .route(web::post().to(set_gpio::<B>))
                    .route(web::method(Method::OPTIONS).to(preflight))
                    .route(not_allowed(&[Method::POST])),
            )
            .service(
                web::resource("/gpio/mode")
                    .route(web::post().to(set_mode::<B>))
                    .route(web::method(Method::OPTIONS).to(preflight))
                    .route(not_allowed(&[Method::POST])),
            )
            .service(
                web::resource("/gpio/status")
                    .route(web::get().to(get_status::<B>))
                    .route(web::method(Method::OPTIONS).to(preflight))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/gpio/{gpio}/value")
                    .route(web::get().to(get_value::<B>))
                    .route(web::method(Method::OPTIONS).to(preflight))
                    .route(not_allowed(&[Method::GET])),
            )
            .service(
                web::resource("/health")
                    .route(web::get().to(health::<B>))
                    .route(web::method(Method::OPTIONS).to(preflight))
                    .route(not_allowed(&[Method::GET])),
            )
    }
}

/// Response headers that let browser dashboards on other origins call the API.
pub fn cors_headers(allow_origin: Option<&str>) -> DefaultHeaders {
    match allow_origin {
        Some(origin) => DefaultHeaders::new()
            .add(("Access-Control-Allow-Origin", origin.to_string()))
            .add(("Access-Control-Allow-Headers", "Content-Type")),
        None => DefaultHeaders::new(),
    }
}

/// Runs a controller call on the blocking pool. The controller has no
/// cancellation of its own, so the timeout bounds how long a request waits on
/// a stalled line, not the hardware call itself: an elapsed call may still
/// complete and be committed afterwards.
async fn run_blocking<B, T, F>(state: &AppState<B>, op: F) -> Result<T, AppError>
where
    B: GpioBackend + 'static,
    T: Send + 'static,
    F: FnOnce(&GpioController<B>) -> Result<T, AppError> + Send + 'static,
{
    let controller = Arc::clone(&state.controller);
    let task = tokio::task::spawn_blocking(move || op(&controller));

    match tokio::time::timeout(state.operation_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(AppError::HardwareFault(format!("GPIO task failed: {e}"))),
        Err(_) => Err(AppError::Timeout(format!(
            "GPIO operation did not finish within {}ms, outcome unknown; check /gpio/status",
            state.operation_timeout.as_millis()
        ))),
    }
}

async fn set_gpio<B: GpioBackend + 'static>(
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let (gpio, level) = parse_set_payload(&body)?;
    let status = run_blocking(state.get_ref(), move |c| c.set_state(gpio, level)).await?;

    Ok(web::Json(PinReport::new(gpio, status)))
}

async fn set_mode<B: GpioBackend + 'static>(
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let (gpio, mode) = parse_mode_payload(&body)?;
    let status = run_blocking(state.get_ref(), move |c| c.set_mode(gpio, &mode)).await?;

    Ok(web::Json(PinReport::new(gpio, status)))
}

async fn get_status<B: GpioBackend + 'static>(state: web::Data<AppState<B>>) -> impl Responder {
    web::Json(state.controller.status())
}

async fn get_value<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let gpio = parse_pin_id(&req)?;
    let status = run_blocking(state.get_ref(), move |c| c.read_pin(gpio)).await?;

    Ok(web::Json(PinReport::new(gpio, status)))
}

async fn health<B: GpioBackend + 'static>(state: web::Data<AppState<B>>) -> impl Responder {
    web::Json(state.controller.health())
}

fn pin_from_json(gpio: i64) -> Result<u32, AppError> {
    u32::try_from(gpio).map_err(|_| AppError::InvalidPin(gpio.to_string()))
}

fn parse_set_payload(body: &[u8]) -> Result<(u32, PinLevel), AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidPayload("Empty request body".into()));
    }

    let payload: SetPayload = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidPayload(format!("Invalid set payload: {e}")))?;

    let (Some(gpio), Some(state)) = (payload.gpio, payload.state) else {
        return Err(AppError::InvalidPayload(
            "Missing gpio or state parameter".into(),
        ));
    };

    let level = match state {
        StateValue::Bool(b) => PinLevel::from(b),
        StateValue::Int(0) => PinLevel::Low,
        StateValue::Int(1) => PinLevel::High,
        StateValue::Int(_) => {
            return Err(AppError::InvalidPayload("State must be 0 or 1".into()));
        }
    };

    Ok((pin_from_json(gpio)?, level))
}

fn parse_mode_payload(body: &[u8]) -> Result<(u32, String), AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidPayload("Empty request body".into()));
    }

    let payload: ModePayload = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidPayload(format!("Invalid mode payload: {e}")))?;

    let (Some(gpio), Some(mode)) = (payload.gpio, payload.mode) else {
        return Err(AppError::InvalidPayload(
            "Missing gpio or mode parameter".into(),
        ));
    };

    Ok((pin_from_json(gpio)?, mode))
}

fn parse_pin_id(req: &HttpRequest) -> Result<u32, AppError> {
    let gpio = req
        .match_info()
        .get("gpio")
        .ok_or_else(|| AppError::InvalidPayload("Missing pin id".into()))?;

    gpio.parse::<u32>()
        .map_err(|_| AppError::InvalidPin(gpio.to_string()))
}

async fn preflight() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .finish()
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn not_allowed(methods: &[Method]) -> actix_web::Route {
    web::route()
        .guard(guard_not_methods(methods))
        .to(method_not_allowed)
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard + use<> {
    let mut allowed: Vec<Method> = methods.to_vec();
    allowed.push(Method::OPTIONS);
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_payload_accepts_bool_and_binary_int() {
        assert_eq!(
            parse_set_payload(br#"{"gpio": 17, "state": true}"#).unwrap(),
            (17, PinLevel::High)
        );
        assert_eq!(
            parse_set_payload(br#"{"gpio": 17, "state": 0}"#).unwrap(),
            (17, PinLevel::Low)
        );
        assert!(matches!(
            parse_set_payload(br#"{"gpio": 17, "state": 2}"#),
            Err(AppError::InvalidPayload(_))
        ));
    }

    #[test]
    fn set_payload_requires_both_fields() {
        let bodies: [&[u8]; 4] = [br#"{"gpio": 17}"#, br#"{"state": true}"#, b"", b"[1]"];
        for body in bodies {
            assert!(matches!(
                parse_set_payload(body),
                Err(AppError::InvalidPayload(_))
            ));
        }
    }

    #[test]
    fn negative_gpio_is_an_invalid_pin() {
        assert!(matches!(
            parse_set_payload(br#"{"gpio": -1, "state": true}"#),
            Err(AppError::InvalidPin(p)) if p == "-1"
        ));
        assert!(matches!(
            parse_mode_payload(br#"{"gpio": 5000000000, "mode": "input"}"#),
            Err(AppError::InvalidPin(_))
        ));
    }

    #[test]
    fn mode_payload_passes_mode_through_unvalidated() {
        assert_eq!(
            parse_mode_payload(br#"{"gpio": 4, "mode": "pwm"}"#).unwrap(),
            (4, "pwm".to_string())
        );
    }
}
