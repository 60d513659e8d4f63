use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub kind: SourceKind,
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SourceConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_interval_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cheapshark() -> Self {
        SourceConfig {
            source_id: "cheapshark".to_string(),
            kind: SourceKind::CheapShark {
                base_url: default_cheapshark_url(),
                stores: default_cheapshark_stores(),
            },
            min_interval_secs: 1.5,
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
            enabled: true,
        }
    }

    pub fn steam_store() -> Self {
        SourceConfig {
            source_id: "steam".to_string(),
            kind: SourceKind::SteamStore {
                store_url: default_steam_store_url(),
                api_url: default_steam_api_url(),
                api_key_env: Some("STEAM_API_KEY".to_string()),
                country_code: default_country_code(),
                max_ids_per_request: default_max_ids_per_request(),
            },
            min_interval_secs: 1.0,
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
            enabled: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    CheapShark {
        #[serde(default = "default_cheapshark_url")]
        base_url: String,
        /// CheapShark store id -> display name. Only deals from these stores count.
        #[serde(default = "default_cheapshark_stores")]
        stores: BTreeMap<String, String>,
    },
    SteamStore {
        #[serde(default = "default_steam_store_url")]
        store_url: String,
        #[serde(default = "default_steam_api_url")]
        api_url: String,
        /// Name of the environment variable holding the Web API key.
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default = "default_country_code")]
        country_code: String,
        #[serde(default = "default_max_ids_per_request")]
        max_ids_per_request: usize,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

fn default_min_interval_secs() -> f64 {
    1.0
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_enabled() -> bool {
    true
}

fn default_cheapshark_url() -> String {
    "https://www.cheapshark.com/api/1.0".to_string()
}

fn default_cheapshark_stores() -> BTreeMap<String, String> {
    [
        ("1", "Steam"),
        ("3", "GreenManGaming"),
        ("7", "GOG"),
        ("11", "HumbleStore"),
        ("15", "Fanatical"),
        ("27", "GamesPlanet"),
    ]
    .into_iter()
    .map(|(id, name)| (id.to_string(), name.to_string()))
    .collect()
}

fn default_steam_store_url() -> String {
    "https://store.steampowered.com/api".to_string()
}

fn default_steam_api_url() -> String {
    "https://api.steampowered.com".to_string()
}

fn default_country_code() -> String {
    "DE".to_string()
}

fn default_max_ids_per_request() -> usize {
    50
}
