use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    /// Bearer token required on every route but `/health`. Empty disables the check.
    pub api_token: String,
    pub max_availability_days: i64,
    pub default_page_size: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "slotkeeper.db".to_string()),
            api_token: env::var("API_TOKEN").unwrap_or_default(),
            max_availability_days: env::var("MAX_AVAILABILITY_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|days| *days > 0)
                .unwrap_or(62),
            default_page_size: env::var("DEFAULT_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(50),
        }
    }
}
