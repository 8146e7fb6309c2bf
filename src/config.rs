use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub wait: WaitConfig,
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
    /// Whole-wait budget in seconds. The source system shipped 10 minutes;
    /// kept as the default but overridable per deployment.
    pub timeout_secs: u64,
}

impl WaitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
            },
            wait: WaitConfig {
                timeout_secs: env::var("STUDYFORGE_WAIT_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()?,
            },
            chunking: ChunkingConfig {
                max_chars: env::var("STUDYFORGE_CHUNK_MAX_CHARS")
                    .unwrap_or_else(|_| "1200".to_string())
                    .parse()?,
                overlap_chars: env::var("STUDYFORGE_CHUNK_OVERLAP_CHARS")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()?,
            },
        })
    }
}
