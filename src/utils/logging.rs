use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Instala o subscriber `fmt`; `RUST_LOG` tem precedência sobre o nível padrão.
///
/// Registros do crate `whatsapp_oauth` (facade `log`) chegam aqui pela
/// ponte `tracing-log` habilitada nos recursos padrão do subscriber.
pub fn init_tracing(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Segunda chamada (testes, reentrada) é ignorada
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn log_request_received(endpoint: &str, method: &str) {
    info!("Request received: {} {}", method, endpoint);
}

pub fn log_request_processed(endpoint: &str, status: u16, duration_ms: u64) {
    info!("Request processed: {} - Status: {} - Duration: {}ms",
          endpoint, status, duration_ms);
}

pub fn log_graph_call(method: &str, path: &str) {
    debug!("📡 Graph API call: {} {}", method, path);
}

pub fn log_graph_unauthorized(path: &str) {
    warn!("🔒 Graph API returned 401 for {} - token reported as rejected", path);
}

pub fn log_graph_api_error(path: &str, status: Option<u16>, error: &str) {
    error!("Graph API error: {} - Status: {:?} - Error: {}", path, status, error);
}

pub fn log_config_loaded(env: &str) {
    info!("Configuration loaded successfully for environment: {}", env);
}

pub fn log_server_startup(port: u16) {
    info!("🚀 WhatsApp MCP server starting on port {}", port);
}

pub fn log_server_ready(host: &str, port: u16) {
    info!("✅ Server ready and listening on http://{}:{}", host, port);
}

pub fn log_health_check() {
    debug!("Health check requested");
}

pub fn log_readiness_check() {
    debug!("Readiness check requested");
}

pub fn log_info(message: &str) {
    info!("{}", message);
}

pub fn log_error(message: &str) {
    error!("{}", message);
}

pub fn log_warning(message: &str) {
    warn!("{}", message);
}
