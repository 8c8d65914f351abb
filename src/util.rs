use std::net::SocketAddr;

const CONFIG_PATH: &str = "CHAINWATCH_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "chainwatch.json";

/// Config file path from the environment, or the default
pub fn get_config_path() -> String {
    std::env::var(CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

const BIND_ADDR: &str = "CHAINWATCH_BIND_ADDR";

/// API bind address override from the environment
///
/// Unparseable values are ignored.
pub fn get_bind_addr() -> Option<SocketAddr> {
    let addr_from_env = std::env::var(BIND_ADDR);
    addr_from_env.ok().and_then(|res| res.parse().ok())
}
