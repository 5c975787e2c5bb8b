use crate::error::ConfigError;

pub const SANDBOX_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
const MEMORY_DB: &str = ":memory:";

#[derive(Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub database_url: String,
    pub provider_base_url: String,
    pub public_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut missing = Vec::new();
        let mut require = |key: &'static str| {
            get(key).unwrap_or_else(|| {
                missing.push(key);
                String::new()
            })
        };

        // checked for presence only; the service keeps no sessions
        require("SECRET_KEY");
        let client_id = require("PAYPAL_CLIENT_ID");
        let client_secret = require("PAYPAL_CLIENT_SECRET");

        let database_url = match get("APP_ENV").as_deref() {
            Some("testing") => MEMORY_DB.to_string(),
            _ => require("DATABASE_URL"),
        };

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        Ok(Self {
            client_id,
            client_secret,
            database_url,
            provider_base_url: get("PAYPAL_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| SANDBOX_BASE_URL.to_string()),
            public_url: get("PUBLIC_URL").map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == MEMORY_DB
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field("database_url", &self.database_url)
            .field("provider_base_url", &self.provider_base_url)
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}
