use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub is_dev: bool,
    pub allowed_origins: Vec<String>,

    /// Credentials file for the push dispatcher's outbound FCM-style client.
    /// Absent in dev; `push::PushDispatcher` falls back to a no-op sink.
    pub push_credentials_path: Option<String>,
    /// HTTP endpoint the push dispatcher posts to. `None` disables sending
    /// entirely (attempts are still logged to `NotificationLog` as pending).
    pub push_endpoint: Option<String>,

    /// Side length, in kilometers, of the geo-sharding grid cell used by
    /// `geo::GeoIndex` for coarse bucketing before the haversine refinement.
    pub geo_grid_km: f64,
    /// Default search radius applied when a seeker omits one explicitly.
    pub default_search_radius_km: f64,

    /// Cadence of the per-session distance ticker.
    pub distance_tick_secs: u64,
    /// How long a terminal session's chat history is retained before the
    /// sweeper purges it.
    pub chat_ttl_hours: i64,
    /// How often the chat TTL sweeper runs.
    pub chat_sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let is_dev = env::var("APP_ENV").map(|v| v != "production").unwrap_or(true);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev_secret_change_in_production".to_string()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            is_dev,
            allowed_origins,
            push_credentials_path: env::var("PUSH_CREDENTIALS_PATH").ok(),
            push_endpoint: env::var("PUSH_ENDPOINT").ok(),
            geo_grid_km: env::var("GEO_GRID_KM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5.0),
            default_search_radius_km: env::var("DEFAULT_SEARCH_RADIUS_KM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            distance_tick_secs: env::var("DISTANCE_TICK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            chat_ttl_hours: env::var("CHAT_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            chat_sweep_interval_secs: env::var("CHAT_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_addr_formats_host_and_port() {
        let config = Config {
            database_url: String::new(),
            jwt_secret: String::new(),
            server_host: "0.0.0.0".into(),
            server_port: 9090,
            is_dev: true,
            allowed_origins: vec![],
            push_credentials_path: None,
            push_endpoint: None,
            geo_grid_km: 5.0,
            default_search_radius_km: 10.0,
            distance_tick_secs: 30,
            chat_ttl_hours: 24,
            chat_sweep_interval_secs: 3600,
        };
        assert_eq!(config.server_addr(), "0.0.0.0:9090");
    }
}
