use serde::{Deserialize, Serialize};
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub whatsapp: WhatsAppSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WhatsAppSettings {
    pub api_version: String,
    pub graph_base_url: String,
    pub business_account_id: Option<String>,
    pub phone_number_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl WhatsAppSettings {
    /// Base versionada do Graph, ex.: `https://graph.facebook.com/v18.0`
    pub fn graph_api_base(&self) -> String {
        format!(
            "{}/{}",
            self.graph_base_url.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        )
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("whatsapp.api_version", "v18.0")?
            .set_default("whatsapp.graph_base_url", "https://graph.facebook.com")?
            .set_default("whatsapp.request_timeout_secs", 30)?
            // Arquivo de configuração base
            .add_source(File::with_name("config/default").required(false))
            // Arquivo específico do ambiente
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("WHATSAPP_MCP").separator("__"));

        // Variáveis usadas pelo restante do ecossistema WhatsApp
        if let Ok(account_id) = std::env::var("WHATSAPP_BUSINESS_ACCOUNT_ID") {
            builder = builder.set_override("whatsapp.business_account_id", account_id)?;
        }
        if let Ok(phone_id) = std::env::var("WHATSAPP_PHONE_NUMBER_ID") {
            builder = builder.set_override("whatsapp.phone_number_id", phone_id)?;
        }
        if let Ok(version) = std::env::var("WHATSAPP_API_VERSION") {
            builder = builder.set_override("whatsapp.api_version", version)?;
        }
        if let Ok(base) = std::env::var("WHATSAPP_GRAPH_BASE_URL") {
            builder = builder.set_override("whatsapp.graph_base_url", base)?;
        }
        // No Cloud Run a porta vem de PORT
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            builder = builder.set_override("server.port", port)?;
        }

        let s = builder.build()?;

        s.try_deserialize()
    }
}
