//! Engine configuration.
//!
//! Every component takes a typed config struct with production defaults;
//! `from_env()` applies environment overrides. The runner binary loads
//! `.env` before calling these, so deployment config stays out of code.

use std::env;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// FIX session parameters for one counterparty connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub api_key: String,
    pub api_secret: String,
    /// Heartbeat interval in seconds (tag 108).
    pub heartbeat_interval_secs: u64,
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// Sent-store capacity; oldest entries are evicted beyond this.
    pub max_stored_messages: usize,
    /// Sent-store entry lifetime in milliseconds.
    pub message_retention_ms: u64,
    pub connect_timeout_ms: u64,
    pub logon_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9880,
            sender_comp_id: "CLI_CLIENT".to_string(),
            target_comp_id: "TRUEX_UAT_OE".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            heartbeat_interval_secs: 30,
            max_reconnect_attempts: 10,
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            max_stored_messages: 10_000,
            message_retention_ms: 3_600_000,
            connect_timeout_ms: 10_000,
            logon_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Order-entry session config from the environment.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            host: env_string("TRUEX_FIX_HOST", &d.host),
            port: env_parse("TRUEX_FIX_PORT", d.port),
            sender_comp_id: env_string("TRUEX_SENDER_COMP_ID", &d.sender_comp_id),
            target_comp_id: env_string("TRUEX_TARGET_COMP_ID", &d.target_comp_id),
            api_key: env_string("TRUEX_API_KEY", ""),
            api_secret: env_string("TRUEX_API_SECRET", ""),
            heartbeat_interval_secs: env_parse("FIX_HEARTBEAT_INTERVAL_SECS", d.heartbeat_interval_secs),
            max_reconnect_attempts: env_parse("FIX_MAX_RECONNECT_ATTEMPTS", d.max_reconnect_attempts),
            initial_reconnect_delay_ms: env_parse("FIX_INITIAL_RECONNECT_DELAY_MS", d.initial_reconnect_delay_ms),
            max_reconnect_delay_ms: env_parse("FIX_MAX_RECONNECT_DELAY_MS", d.max_reconnect_delay_ms),
            max_stored_messages: env_parse("FIX_MAX_STORED_MESSAGES", d.max_stored_messages),
            message_retention_ms: env_parse("FIX_MESSAGE_RETENTION_MS", d.message_retention_ms),
            connect_timeout_ms: env_parse("FIX_CONNECT_TIMEOUT_MS", d.connect_timeout_ms),
            logon_timeout_ms: env_parse("FIX_LOGON_TIMEOUT_MS", d.logon_timeout_ms),
        }
    }

    /// Market-data session config. Falls back to the order-entry host
    /// with the venue's market-data comp id.
    pub fn market_data_from_env() -> Self {
        let oe = Self::from_env();
        Self {
            host: env_string("TRUEX_MD_HOST", &oe.host),
            port: env_parse("TRUEX_MD_PORT", oe.port),
            target_comp_id: env_string("TRUEX_MD_TARGET_COMP_ID", "TRUEX_UAT_MD"),
            ..oe
        }
    }
}

/// Inventory limits and skew shaping.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Hard position bound in base units; quoting stops at this level.
    pub max_position_base: f64,
    /// Net position at which a hedge is signalled. Must be below max.
    pub hedge_threshold_base: f64,
    /// Position beyond which the engine raises an operator alert.
    pub emergency_limit_base: f64,
    pub max_skew_ticks: f64,
    pub skew_exponent: f64,
    pub tick_size: f64,
    /// Utilization fraction that triggers a limit warning.
    pub limit_warning_pct: f64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        let max_position_base = 1.0;
        Self {
            max_position_base,
            hedge_threshold_base: 0.5,
            emergency_limit_base: max_position_base * 1.2,
            max_skew_ticks: 10.0,
            skew_exponent: 2.0,
            tick_size: 0.5,
            limit_warning_pct: 0.8,
        }
    }
}

impl InventoryConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let max_position_base = env_parse("MM_MAX_POSITION", d.max_position_base);
        Self {
            max_position_base,
            hedge_threshold_base: env_parse("MM_HEDGE_THRESHOLD", d.hedge_threshold_base),
            emergency_limit_base: env_parse("MM_EMERGENCY_LIMIT", max_position_base * 1.2),
            max_skew_ticks: env_parse("MM_MAX_SKEW_TICKS", d.max_skew_ticks),
            skew_exponent: env_parse("MM_SKEW_EXPONENT", d.skew_exponent),
            tick_size: env_parse("MM_TICK_SIZE", d.tick_size),
            limit_warning_pct: env_parse("MM_LIMIT_WARNING_PCT", d.limit_warning_pct),
        }
    }
}

/// Quote ladder shape and order-flow limits.
#[derive(Debug, Clone)]
pub struct QuoteConfig {
    pub symbol: String,
    /// Party id sent in tag 448 on new orders; empty disables the group.
    pub client_id: String,
    /// Ladder depth per side.
    pub levels: u32,
    pub base_spread_bps: f64,
    pub level_spacing_ticks: f64,
    pub reprice_threshold_ticks: f64,
    pub base_size: f64,
    /// Size multiplier per level away from the top.
    pub size_decay_factor: f64,
    pub tick_size: f64,
    pub max_orders_per_second: u32,
    /// Window during which a client order id is not re-actioned.
    pub dup_guard_ms: u64,
    pub min_notional: f64,
    /// Quotes further than this percentage from mid are dropped.
    pub price_band_pct: f64,
    pub confidence_threshold: f64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC-USD".to_string(),
            client_id: String::new(),
            levels: 3,
            base_spread_bps: 50.0,
            level_spacing_ticks: 1.0,
            reprice_threshold_ticks: 2.0,
            base_size: 0.01,
            size_decay_factor: 0.8,
            tick_size: 0.5,
            max_orders_per_second: 10,
            dup_guard_ms: 500,
            min_notional: 10.0,
            price_band_pct: 2.5,
            confidence_threshold: 0.5,
        }
    }
}

impl QuoteConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            symbol: env_string("MM_SYMBOL", &d.symbol),
            client_id: env_string("MM_CLIENT_ID", ""),
            levels: env_parse("MM_LEVELS", d.levels),
            base_spread_bps: env_parse("MM_BASE_SPREAD_BPS", d.base_spread_bps),
            level_spacing_ticks: env_parse("MM_LEVEL_SPACING_TICKS", d.level_spacing_ticks),
            reprice_threshold_ticks: env_parse("MM_REPRICE_THRESHOLD_TICKS", d.reprice_threshold_ticks),
            base_size: env_parse("MM_BASE_SIZE", d.base_size),
            size_decay_factor: env_parse("MM_SIZE_DECAY_FACTOR", d.size_decay_factor),
            tick_size: env_parse("MM_TICK_SIZE", d.tick_size),
            max_orders_per_second: env_parse("MM_MAX_ORDERS_PER_SECOND", d.max_orders_per_second),
            dup_guard_ms: env_parse("MM_DUP_GUARD_MS", d.dup_guard_ms),
            min_notional: env_parse("MM_MIN_NOTIONAL", d.min_notional),
            price_band_pct: env_parse("MM_PRICE_BAND_PCT", d.price_band_pct),
            confidence_threshold: env_parse("MM_CONFIDENCE_THRESHOLD", d.confidence_threshold),
        }
    }
}

/// Hedge execution policy.
#[derive(Debug, Clone)]
pub struct HedgeConfig {
    pub hedge_symbol: String,
    pub min_hedge_size: f64,
    pub max_hedge_size: f64,
    /// How long a passive limit hedge may rest before escalation.
    pub limit_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// How far through the touch the limit price is placed.
    pub limit_price_offset_bps: f64,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            hedge_symbol: "XBTUSD".to_string(),
            min_hedge_size: 0.001,
            max_hedge_size: 5.0,
            limit_timeout_ms: 10_000,
            poll_interval_ms: 500,
            limit_price_offset_bps: 2.0,
        }
    }
}

impl HedgeConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            hedge_symbol: env_string("HEDGE_SYMBOL", &d.hedge_symbol),
            min_hedge_size: env_parse("HEDGE_MIN_SIZE", d.min_hedge_size),
            max_hedge_size: env_parse("HEDGE_MAX_SIZE", d.max_hedge_size),
            limit_timeout_ms: env_parse("HEDGE_LIMIT_TIMEOUT_MS", d.limit_timeout_ms),
            poll_interval_ms: env_parse("HEDGE_POLL_INTERVAL_MS", d.poll_interval_ms),
            limit_price_offset_bps: env_parse("HEDGE_LIMIT_OFFSET_BPS", d.limit_price_offset_bps),
        }
    }
}

/// Fee schedule and P&L reporting cadence.
#[derive(Debug, Clone)]
pub struct PnlConfig {
    pub truex_maker_fee_bps: f64,
    pub truex_taker_fee_bps: f64,
    pub hedge_maker_fee_bps: f64,
    pub hedge_taker_fee_bps: f64,
    pub log_interval_ms: u64,
    /// Net P&L move that triggers a significant-change event.
    pub significant_pnl_change: f64,
}

impl Default for PnlConfig {
    fn default() -> Self {
        Self {
            truex_maker_fee_bps: 0.0,
            truex_taker_fee_bps: 2.0,
            hedge_maker_fee_bps: 1.6,
            hedge_taker_fee_bps: 2.6,
            log_interval_ms: 60_000,
            significant_pnl_change: 100.0,
        }
    }
}

impl PnlConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            truex_maker_fee_bps: env_parse("PNL_TRUEX_MAKER_FEE_BPS", d.truex_maker_fee_bps),
            truex_taker_fee_bps: env_parse("PNL_TRUEX_TAKER_FEE_BPS", d.truex_taker_fee_bps),
            hedge_maker_fee_bps: env_parse("PNL_HEDGE_MAKER_FEE_BPS", d.hedge_maker_fee_bps),
            hedge_taker_fee_bps: env_parse("PNL_HEDGE_TAKER_FEE_BPS", d.hedge_taker_fee_bps),
            log_interval_ms: env_parse("PNL_LOG_INTERVAL_MS", d.log_interval_ms),
            significant_pnl_change: env_parse("PNL_SIGNIFICANT_CHANGE", d.significant_pnl_change),
        }
    }
}

/// Kraken credentials for the hedge venue REST client.
#[derive(Debug, Clone, Default)]
pub struct KrakenConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

impl KrakenConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_string("KRAKEN_API_KEY", ""),
            api_secret: env_string("KRAKEN_API_SECRET", ""),
            base_url: env_string("KRAKEN_BASE_URL", "https://api.kraken.com"),
        }
    }
}

/// Top-level configuration for the whole engine.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub market_data: SessionConfig,
    pub inventory: InventoryConfig,
    pub quote: QuoteConfig,
    pub hedge: HedgeConfig,
    pub pnl: PnlConfig,
    pub kraken: KrakenConfig,
    /// Quote-engine action queue drain period.
    pub drain_interval_ms: u64,
    /// Derive reference prices from the local market-data book instead
    /// of an external source.
    pub price_from_book: bool,
    /// Route hedges to the paper venue instead of Kraken.
    pub hedge_dry_run: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            market_data: SessionConfig::default(),
            inventory: InventoryConfig::default(),
            quote: QuoteConfig::default(),
            hedge: HedgeConfig::default(),
            pnl: PnlConfig::default(),
            kraken: KrakenConfig::default(),
            drain_interval_ms: 200,
            price_from_book: false,
            hedge_dry_run: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            session: SessionConfig::from_env(),
            market_data: SessionConfig::market_data_from_env(),
            inventory: InventoryConfig::from_env(),
            quote: QuoteConfig::from_env(),
            hedge: HedgeConfig::from_env(),
            pnl: PnlConfig::from_env(),
            kraken: KrakenConfig::from_env(),
            drain_interval_ms: env_parse("MM_DRAIN_INTERVAL_MS", 200),
            price_from_book: env_parse("MM_PRICE_FROM_BOOK", false),
            hedge_dry_run: env_parse("HEDGE_DRY_RUN", true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let inv = InventoryConfig::default();
        assert!(inv.hedge_threshold_base < inv.max_position_base);
        assert!((inv.emergency_limit_base - inv.max_position_base * 1.2).abs() < 1e-12);

        let q = QuoteConfig::default();
        assert!(q.levels >= 1);
        assert!(q.size_decay_factor > 0.0 && q.size_decay_factor <= 1.0);

        let h = HedgeConfig::default();
        assert!(h.min_hedge_size < h.max_hedge_size);
    }

    #[test]
    fn test_env_parse_fallback() {
        // Unset and garbage values both fall back to the default
        assert_eq!(env_parse("TRUEX_MM_TEST_UNSET_VAR", 42u32), 42);
        std::env::set_var("TRUEX_MM_TEST_BAD_VAR", "not-a-number");
        assert_eq!(env_parse("TRUEX_MM_TEST_BAD_VAR", 7u32), 7);
        std::env::remove_var("TRUEX_MM_TEST_BAD_VAR");
    }
}
