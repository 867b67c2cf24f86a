use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub model: ModelConfig,
    pub payment: PaymentConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub base_url: String,
    pub base_id: String,
    /// Overridden by AIRTABLE_API_KEY when set.
    pub api_key: String,
    pub sessions_table: String,
    pub bills_table: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_text_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Base URL of the payment-provider adapter; the link builder appends
    /// the pay-bolletta path and query.
    pub base_url: String,
    /// Explicit missing-IBAN policy for the extraction path: when true, a
    /// document without a valid IBAN is refused instead of producing a
    /// best-effort link.
    pub require_iban: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub timeout_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig {
                base_url: "https://api.airtable.com/v0".to_string(),
                base_id: "appXXXXXXXXXXXXXX".to_string(),
                api_key: String::new(),
                sessions_table: "Sessions".to_string(),
                bills_table: "Bollette".to_string(),
                timeout_seconds: 10,
            },
            model: ModelConfig {
                enabled: true,
                endpoint: "http://localhost:11434".to_string(),
                model: "llava".to_string(),
                timeout_seconds: 60,
                max_text_chars: 6000,
            },
            payment: PaymentConfig {
                base_url: "https://example.com".to_string(),
                require_iban: false,
            },
            session: SessionConfig {
                timeout_minutes: 30,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        if let Ok(key) = std::env::var("AIRTABLE_API_KEY") {
            if !key.is_empty() {
                config.store.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
