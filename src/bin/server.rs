use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use warp::Filter;

use chat_relay::auth::AuthGate;
use chat_relay::config::RelayConfig;
use chat_relay::constants::WS_PATH;
use chat_relay::core::dispatcher::Dispatcher;
use chat_relay::core::hub::RelayHub;
use chat_relay::service::{InMemoryMessageService, InMemoryUserDirectory};

#[tokio::main]
async fn main() {
    // Load .env before the logger so RUST_LOG from the file takes effect,
    // but report the outcome only once logging is up
    let dotenv_result = dotenvy::dotenv();
    env_logger::init();
    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("No .env file loaded: {}", e),
    };

    // Load config from the environment
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration: host={}, port={}", config.host, config.port);

    // Collaborators: in-memory variants for single-process deployments
    let directory = Arc::new(InMemoryUserDirectory::new());
    if config.bootstrap_users.is_empty() {
        warn!(
            "No bootstrap users configured; set CHAT_RELAY_BOOTSTRAP_USERS \
             (id:display name,...) or every connection will be rejected"
        );
    }
    for (id, display_name) in &config.bootstrap_users {
        directory.add_user(id, display_name, true).await;
    }
    info!("Seeded {} directory users", config.bootstrap_users.len());
    let service = Arc::new(InMemoryMessageService::new());

    let gate = Arc::new(AuthGate::new(&config.jwt_secret, directory));
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let hub = Arc::new(RelayHub::new(config));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&hub), service));

    // Periodic liveness and rate-counter sweeps
    let _sweepers = Arc::clone(&hub).start_sweepers();

    // WebSocket route: GET /ws?token=<bearer credential>
    let gate_filter = warp::any().map(move || Arc::clone(&gate));
    let dispatcher_filter = warp::any().map(move || Arc::clone(&dispatcher));
    let ws_route = warp::path(WS_PATH)
        .and(warp::ws())
        .and(warp::query::<HashMap<String, String>>())
        .and(gate_filter)
        .and(dispatcher_filter)
        .map(
            |ws: warp::ws::Ws,
             query: HashMap<String, String>,
             gate: Arc<AuthGate>,
             dispatcher: Arc<Dispatcher>| {
                let token = query.get("token").cloned();
                ws.on_upgrade(move |socket| {
                    chat_relay::handlers::websocket::handle_ws_client(
                        socket, token, gate, dispatcher,
                    )
                })
            },
        );

    let health_route = warp::path("health").map(|| "OK");
    let routes = ws_route.or(health_route);

    info!("Starting chat relay on {}", addr);
    warp::serve(routes).run(addr).await;
}
