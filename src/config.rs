use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CONFIRMATION_TIMEOUT_SECS, DEFAULT_HIGHLIGHT_WINDOW_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_PREVIEW_CACHE_TTL_SECS, DEFAULT_RATE_LIMIT_RETRIES, DEFAULT_RECAP_TILE_COUNT,
    DEFAULT_RECEIPT_POLL_INTERVAL_MS, DEFAULT_REFRESH_BATCH_COOLDOWN_MS,
    DEFAULT_REFRESH_BATCH_SIZE, DEFAULT_REQUEST_DEBOUNCE_MS, DEFAULT_STATE_CACHE_TTL_SECS,
};
use crate::models::{BoardVariant, GameRules, RuleSet, TileLifecycle};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Blockchain
    pub starknet_rpc_url: String,
    pub starknet_chain_id: String,
    pub game_contract_address: String,

    // Local player
    pub player_address: String,
    pub player_private_key: Option<String>,

    // Rules (selected once per game)
    pub rule_set: RuleSet,
    pub board_variant: BoardVariant,
    pub allow_islands: bool,
    pub burn_after_turns: Option<u64>,
    pub burn_duration_turns: u64,

    // Polling & caching
    pub poll_interval_secs: u64,
    pub state_cache_ttl_secs: u64,
    pub preview_cache_ttl_secs: u64,
    pub request_debounce_ms: u64,
    pub refresh_batch_size: usize,
    pub refresh_batch_cooldown_ms: u64,
    pub rate_limit_retries: u32,

    // Submission
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,

    // Reconciliation
    pub highlight_window_secs: u64,
    pub recap_tile_count: usize,
}

// Internal helper that checks conditions for `is_env_flag_enabled`.
fn is_env_flag_enabled(name: &str) -> bool {
    env::var(name)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
        })
        .unwrap_or(false)
}

// Internal helper that supports `env_or` operations.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => Ok(raw.trim().parse()?),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            starknet_rpc_url: env::var("STARKNET_RPC_URL")?,
            starknet_chain_id: env::var("STARKNET_CHAIN_ID")
                .unwrap_or_else(|_| "SN_SEPOLIA".to_string()),
            game_contract_address: env::var("GAME_CONTRACT_ADDRESS")?,

            player_address: env::var("PLAYER_ADDRESS")?,
            player_private_key: env::var("PLAYER_PRIVATE_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            rule_set: env::var("RULE_SET")
                .unwrap_or_else(|_| "adjacency".to_string())
                .parse()?,
            board_variant: env::var("BOARD_VARIANT")
                .unwrap_or_else(|_| "standard".to_string())
                .parse()?,
            allow_islands: is_env_flag_enabled("ALLOW_ISLANDS"),
            burn_after_turns: env::var("BURN_AFTER_TURNS")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
            burn_duration_turns: env_or("BURN_DURATION_TURNS", 1)?,

            poll_interval_secs: env_or("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            state_cache_ttl_secs: env_or("STATE_CACHE_TTL_SECS", DEFAULT_STATE_CACHE_TTL_SECS)?,
            preview_cache_ttl_secs: env_or(
                "PREVIEW_CACHE_TTL_SECS",
                DEFAULT_PREVIEW_CACHE_TTL_SECS,
            )?,
            request_debounce_ms: env_or("REQUEST_DEBOUNCE_MS", DEFAULT_REQUEST_DEBOUNCE_MS)?,
            refresh_batch_size: env_or("REFRESH_BATCH_SIZE", DEFAULT_REFRESH_BATCH_SIZE)?,
            refresh_batch_cooldown_ms: env_or(
                "REFRESH_BATCH_COOLDOWN_MS",
                DEFAULT_REFRESH_BATCH_COOLDOWN_MS,
            )?,
            rate_limit_retries: env_or("RATE_LIMIT_RETRIES", DEFAULT_RATE_LIMIT_RETRIES)?,

            confirmation_timeout_secs: env_or(
                "CONFIRMATION_TIMEOUT_SECS",
                DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            )?,
            receipt_poll_interval_ms: env_or(
                "RECEIPT_POLL_INTERVAL_MS",
                DEFAULT_RECEIPT_POLL_INTERVAL_MS,
            )?,

            highlight_window_secs: env_or("HIGHLIGHT_WINDOW_SECS", DEFAULT_HIGHLIGHT_WINDOW_SECS)?,
            recap_tile_count: env_or("RECAP_TILE_COUNT", DEFAULT_RECAP_TILE_COUNT)?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.starknet_rpc_url.trim().is_empty() {
            anyhow::bail!("STARKNET_RPC_URL is empty");
        }
        if self.game_contract_address.trim().is_empty() {
            anyhow::bail!("GAME_CONTRACT_ADDRESS is empty");
        }
        if self.player_address.trim().is_empty() {
            anyhow::bail!("PLAYER_ADDRESS is empty");
        }
        if self.refresh_batch_size == 0 {
            anyhow::bail!("REFRESH_BATCH_SIZE must be > 0");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS must be > 0");
        }
        if self.confirmation_timeout_secs == 0 {
            anyhow::bail!("CONFIRMATION_TIMEOUT_SECS must be > 0");
        }

        if self.game_contract_address.starts_with("0x0000") {
            tracing::warn!("Using placeholder game contract address");
        }
        if self.player_private_key.is_none() {
            tracing::warn!("PLAYER_PRIVATE_KEY not set; running read-only");
        }
        if self.poll_interval_secs < 5 {
            tracing::warn!(
                "POLL_INTERVAL_SECS={} is aggressive for a rate-limited provider",
                self.poll_interval_secs
            );
        }
        if self.recap_tile_count == 0 {
            tracing::warn!("RECAP_TILE_COUNT is 0; opponent recaps will be empty");
        }
        if self.burn_after_turns.is_some() && self.burn_duration_turns == 0 {
            tracing::warn!("BURN_DURATION_TURNS is 0; burning tiles are removed immediately");
        }

        Ok(())
    }

    pub fn is_testnet(&self) -> bool {
        let chain = self.starknet_chain_id.to_ascii_uppercase();
        chain.contains("SEPOLIA") || chain.contains("GOERLI")
    }

    pub fn game_rules(&self) -> GameRules {
        GameRules {
            rule_set: self.rule_set,
            variant: self.board_variant,
            allow_islands: self.allow_islands,
        }
    }

    pub fn tile_lifecycle(&self) -> TileLifecycle {
        TileLifecycle {
            burn_after_turns: self.burn_after_turns,
            burn_duration_turns: self.burn_duration_turns,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn state_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.state_cache_ttl_secs)
    }

    pub fn preview_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.preview_cache_ttl_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn highlight_window(&self) -> Duration {
        Duration::from_secs(self.highlight_window_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        starknet_rpc_url: "http://localhost:5050".to_string(),
        starknet_chain_id: "SN_SEPOLIA".to_string(),
        game_contract_address: "0x0000000000000000000000000000000000000042".to_string(),
        player_address: "0x0000000000000000000000000000000000000a11".to_string(),
        player_private_key: None,
        rule_set: RuleSet::AdjacencySum,
        board_variant: BoardVariant::Standard,
        allow_islands: false,
        burn_after_turns: None,
        burn_duration_turns: 1,
        poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        state_cache_ttl_secs: DEFAULT_STATE_CACHE_TTL_SECS,
        preview_cache_ttl_secs: DEFAULT_PREVIEW_CACHE_TTL_SECS,
        request_debounce_ms: 0,
        refresh_batch_size: DEFAULT_REFRESH_BATCH_SIZE,
        refresh_batch_cooldown_ms: DEFAULT_REFRESH_BATCH_COOLDOWN_MS,
        rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
        confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
        receipt_poll_interval_ms: DEFAULT_RECEIPT_POLL_INTERVAL_MS,
        highlight_window_secs: DEFAULT_HIGHLIGHT_WINDOW_SECS,
        recap_tile_count: DEFAULT_RECAP_TILE_COUNT,
    }
}
