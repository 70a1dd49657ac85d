/// WhatsApp MCP Server: CLI e processo servidor
///
/// Comandos:
/// - authorize / refresh / status / set-token / logout: ciclo de vida do token OAuth2
/// - run: servidor HTTP que só consome `get_valid_token()` (nunca abre navegador)
///
/// O token fica em WHATSAPP_TOKEN_FILE (padrão .oauth_token_cache.json)

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

use whatsapp_mcp_server::config::Settings;
use whatsapp_mcp_server::utils::logging::*;
use whatsapp_mcp_server::{create_router, AppState};
use whatsapp_oauth::auth::token::LONG_LIVED_DEFAULT_SECS;
use whatsapp_oauth::{
    AuthError, AuthResult, AuthorizationFlow, FileTokenStore, Interactivity, OAuthConfig,
    RefreshPolicy, TokenLifecycleManager, TokenRecord, UnconfiguredExchange,
};

/// WhatsApp MCP Server - token OAuth2 da WhatsApp Business Cloud API
#[derive(Parser)]
#[command(name = "whatsapp-mcp-server")]
#[command(version)]
#[command(about = "Ciclo de vida do token OAuth2 e servidor da WhatsApp Business API", long_about = None)]
struct Cli {
    /// Formato de saída (json, pretty)
    #[arg(short = 'o', long, default_value = "pretty", global = true)]
    output: OutputFormat,

    /// Modo verbose para debug
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Comando a executar
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, PartialEq)]
enum OutputFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "pretty" => Ok(OutputFormat::Pretty),
            _ => Err(format!("Formato desconhecido: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Autoriza via diálogo OAuth2 da Meta e salva o token
    Authorize {
        /// Cola o código (ou a URL de redirect) em vez de usar o listener local
        #[arg(long)]
        manual: bool,

        /// Não tenta abrir o navegador; apenas exibe o link
        #[arg(long)]
        no_browser: bool,

        /// Reautoriza mesmo se já houver token válido
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Renova o token agora (reautoriza se o provedor recusar)
    Refresh,

    /// Mostra o estado do token sem acessar a rede
    Status,

    /// Instala um token obtido fora do fluxo (ex.: usuário de sistema)
    SetToken {
        /// Access token
        token: String,

        /// Validade em segundos (padrão: 60 dias)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        expires_in: Option<i64>,

        /// Tipo do token
        #[arg(long, default_value = "bearer")]
        token_type: String,
    },

    /// Remove o token do cache e do arquivo
    Logout,

    /// Inicia o servidor HTTP
    Run {
        /// Host de escuta (padrão: server.host da configuração)
        #[arg(long)]
        host: Option<String>,

        /// Porta de escuta (padrão: server.port da configuração)
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },
}

/// Estrutura para resposta padronizada
#[derive(serde::Serialize)]
struct CliResponse {
    success: bool,
    data: Option<Value>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CliResponse {
    fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            hint: None,
        }
    }

    fn error(msg: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg),
            hint: None,
        }
    }

    fn auth_error(err: &AuthError) -> Self {
        Self {
            hint: Some(err.operator_hint().to_string()),
            ..Self::error(err.to_string())
        }
    }
}

#[tokio::main]
async fn main() {
    // Carregar variáveis de ambiente do .env
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Run { .. } => "info",
        _ => "warn",
    };
    init_tracing(cli.verbose, default_level);

    let output_format = cli.output.clone();

    match execute_command(&cli).await {
        Ok(response) => {
            let exit_code = if response.success { 0 } else { 1 };
            output_response(response, &output_format);
            std::process::exit(exit_code);
        }
        Err(e) => {
            eprintln!("❌ Erro: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn execute_command(cli: &Cli) -> anyhow::Result<CliResponse> {
    let result = match &cli.command {
        Commands::Authorize { manual, no_browser, force } => {
            handle_authorize(*manual, *no_browser, *force).await
        }
        Commands::Refresh => handle_refresh().await,
        Commands::Status => handle_status().await,
        Commands::SetToken { token, expires_in, token_type } => {
            handle_set_token(token, *expires_in, token_type).await
        }
        Commands::Logout => handle_logout().await,
        Commands::Run { host, port } => {
            run_server(host.clone(), *port).await?;
            return Ok(CliResponse::success(json!({
                "message": "Servidor encerrado"
            })));
        }
    };

    Ok(match result {
        Ok(data) => CliResponse::success(data),
        Err(e) => CliResponse::auth_error(&e),
    })
}

/// Gerenciador com o fluxo OAuth2 quando há credenciais do app; sem elas,
/// serve apenas tokens instalados e não renova
fn build_manager(interactivity: Interactivity) -> AuthResult<TokenLifecycleManager> {
    if OAuthConfig::is_configured() {
        return TokenLifecycleManager::from_config(OAuthConfig::from_env()?, interactivity);
    }

    let config = OAuthConfig::from_env_without_credentials()?;
    Ok(TokenLifecycleManager::new(
        Arc::new(FileTokenStore::new(config.token_file.clone())),
        Arc::new(UnconfiguredExchange::new(
            "WHATSAPP_CLIENT_ID/WHATSAPP_CLIENT_SECRET não configurados",
        )),
        RefreshPolicy::from_config(&config),
        interactivity,
    ))
}

async fn status_json(manager: &TokenLifecycleManager) -> Value {
    let mut value = serde_json::to_value(manager.status().await).unwrap_or(Value::Null);
    value["oauth_configured"] = json!(OAuthConfig::is_configured());
    value
}

async fn handle_authorize(manual: bool, no_browser: bool, force: bool) -> AuthResult<Value> {
    let config = OAuthConfig::from_env()?;
    let manager = TokenLifecycleManager::from_config(config.clone(), Interactivity::Interactive)?;

    if !force {
        let status = manager.status().await;
        if status.has_token && !status.needs_refresh {
            return Ok(json!({
                "message": "Já autorizado. Use --force para reautorizar",
                "status": status_json(&manager).await
            }));
        }
    }

    let flow = AuthorizationFlow::new(config)?.with_browser(!manual && !no_browser);
    let attempt = flow.build_authorization_url()?;

    eprintln!("🔐 Iniciando autorização OAuth2 da WhatsApp Business API...");
    eprintln!("🔗 Link de autorização:\n{}\n", attempt.url);

    let record = if manual {
        eprintln!("📋 Após autorizar, cole a URL de redirect completa (ou só o código) e tecle Enter:");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| AuthError::config_error(format!("Falha ao ler a entrada: {}", e)))?;
        flow.complete_manual(&attempt, &line).await?
    } else {
        eprintln!("⏳ Aguardando o redirect em {} ...", attempt.redirect_uri);
        flow.complete_authorization(&attempt).await?
    };

    manager.install(record).await?;

    Ok(json!({
        "message": "Autorização concluída com sucesso!",
        "status": status_json(&manager).await
    }))
}

async fn handle_refresh() -> AuthResult<Value> {
    let manager = build_manager(Interactivity::Interactive)?;
    let record = manager.force_refresh().await?;

    Ok(json!({
        "message": "Token renovado",
        "expires_at": record.expires_at,
        "status": status_json(&manager).await
    }))
}

async fn handle_status() -> AuthResult<Value> {
    let manager = build_manager(Interactivity::NonInteractive)?;
    Ok(status_json(&manager).await)
}

async fn handle_set_token(token: &str, expires_in: Option<i64>, token_type: &str) -> AuthResult<Value> {
    let manager = build_manager(Interactivity::NonInteractive)?;
    let record = TokenRecord::new(
        token.trim(),
        token_type,
        chrono::Utc::now(),
        expires_in.unwrap_or(LONG_LIVED_DEFAULT_SECS),
    )?;

    manager.install(record).await?;

    Ok(json!({
        "message": "Token instalado",
        "status": status_json(&manager).await
    }))
}

async fn handle_logout() -> AuthResult<Value> {
    let manager = build_manager(Interactivity::NonInteractive)?;
    manager.clear().await?;

    Ok(json!({
        "message": "Token removido",
        "store_location": manager.store_location()
    }))
}

async fn run_server(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let settings = Settings::new()?;
    log_config_loaded(&std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into()));

    let manager = Arc::new(build_manager(Interactivity::NonInteractive)?);
    startup_diagnostics(&settings, &manager).await;

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);

    let state = Arc::new(AppState::new(settings, manager)?);
    let app = create_router(state);

    log_server_startup(port);
    let listener = TcpListener::bind(format!("{}:{}", host, port)).await?;
    log_server_ready(&host, port);

    // Graceful shutdown com signal handling
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log_info("🛑 Server shut down gracefully");
    Ok(())
}

/// Avisos de inicialização; nenhum deles impede o servidor de subir
async fn startup_diagnostics(settings: &Settings, manager: &TokenLifecycleManager) {
    if OAuthConfig::is_configured() {
        log_info("✅ OAuth2 configurado (renovação automática habilitada)");
    } else {
        log_warning("⚠️  WHATSAPP_CLIENT_ID/WHATSAPP_CLIENT_SECRET ausentes: o token não será renovado");
    }

    let status = manager.status().await;
    if !status.has_token {
        log_warning("⚠️  Nenhum token disponível. Execute `whatsapp-mcp-server authorize` ou `set-token`");
    } else if let Some(expires_at) = status.expires_at {
        log_info(&format!("🔑 Token em cache válido até {}", expires_at.to_rfc3339()));
    }
    if let Some(warning) = status.persistence_warning.as_deref().or(status.last_error.as_deref()) {
        log_warning(&format!("⚠️  Cache do token: {}", warning));
    }

    if settings.whatsapp.business_account_id.is_none() {
        log_warning("⚠️  WHATSAPP_BUSINESS_ACCOUNT_ID não configurado");
    }
    if settings.whatsapp.phone_number_id.is_none() {
        log_warning("⚠️  WHATSAPP_PHONE_NUMBER_ID não configurado");
    }
}

/// Signal handler para graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log_error(&format!("Falha ao instalar handler de Ctrl+C: {}", e));
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log_error(&format!("Falha ao instalar handler de SIGTERM: {}", e));
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log_info("🛑 Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            log_info("🛑 Received SIGTERM, shutting down gracefully...");
        }
    }
}

fn output_response(response: CliResponse, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(&response).unwrap_or_default());
        }
        OutputFormat::Pretty => {
            if response.success {
                if let Some(data) = response.data {
                    println!("✅ Sucesso!");
                    println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
                }
            } else if let Some(error) = response.error {
                eprintln!("❌ Erro: {}", error);
                if let Some(hint) = response.hint {
                    eprintln!("💡 {}", hint);
                }
            }
        }
    }
}
