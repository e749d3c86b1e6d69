//! Startup configuration, read once from the environment.

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub domain: String,
    pub node_env: String,
    pub production: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let domain = std::env::var("DOMAIN").unwrap_or_else(|_| "localhost".to_string());
        let node_env = std::env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());
        let production = node_env == "production";

        Self {
            port,
            domain,
            node_env,
            production,
        }
    }

    pub fn public_url(&self, subdomain: &str) -> String {
        let scheme = if self.production { "https" } else { "http" };
        format!("{scheme}://{subdomain}.{}", self.domain)
    }
}
