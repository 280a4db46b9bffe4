//! Engine Configuration for OmniYield
//!
//! All parameters for running the orchestration engine and the simulated
//! relay, loaded from the environment (`.env` supported) or a TOML file.

use alloy_primitives::Address;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::coordinator::EngineParameters;
use crate::types::{
    DEFAULT_MAX_PROTOCOLS_PER_DOMAIN, DEFAULT_SECONDS_PER_YEAR, MAX_RETRIES_CAP,
    MAX_SLIPPAGE_BPS_CAP,
};

// ============================================
// MAIN CONFIGURATION
// ============================================

/// Main configuration struct for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // ========== Roles ==========
    /// Admin principal: registry, parameters, vault authorization
    pub admin_address: Address,

    /// May pause/unpause and run emergency withdrawals (zero = unset)
    pub emergency_admin_address: Address,

    /// The only sender allowed to deliver transport callbacks
    pub gateway_address: Address,

    /// Vault authorized at startup (zero = none)
    pub vault_address: Address,

    // ========== Saga Settings ==========
    /// Recoverable failures tolerated per operation (max 5)
    pub max_retries: u8,

    /// Slippage forwarded in every operation message (max 1000 bps)
    pub default_slippage_bps: u16,

    /// Operations in flight longer than this are reported as stale
    pub stale_operation_secs: u64,

    /// How often the engine sweeps for stale operations
    pub stale_sweep_interval_secs: u64,

    // ========== Registry & Accrual ==========
    /// Capacity of each domain in the registry
    pub max_protocols_per_domain: usize,

    /// Accrual year length
    pub seconds_per_year: u64,

    // ========== Engine Wiring ==========
    /// Bounded command channel in front of the engine task
    pub command_channel_capacity: usize,

    /// Append every event to the audit file
    pub audit_log: bool,

    /// JSON-lines audit file path
    pub audit_log_path: String,

    // ========== Simulated Relay ==========
    /// Chance that an attempt comes back as a recoverable revert
    pub relay_revert_probability: f64,

    /// Chance that an attempt comes back as a terminal abort
    pub relay_abort_probability: f64,

    /// Artificial delivery latency
    pub relay_latency_ms: u64,

    /// Seed for the relay's failure injection
    pub relay_seed: u64,
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            // Roles: unset means zero, which validate() rejects for admin and gateway
            admin_address: Self::env_address("ADMIN_ADDRESS", Address::ZERO)?,
            emergency_admin_address: Self::env_address("EMERGENCY_ADMIN_ADDRESS", Address::ZERO)?,
            gateway_address: Self::env_address("GATEWAY_ADDRESS", Address::ZERO)?,
            vault_address: Self::env_address("VAULT_ADDRESS", Address::ZERO)?,

            // Saga
            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            default_slippage_bps: env::var("DEFAULT_SLIPPAGE_BPS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
            stale_operation_secs: env::var("STALE_OPERATION_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            stale_sweep_interval_secs: env::var("STALE_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),

            // Registry & accrual
            max_protocols_per_domain: env::var("MAX_PROTOCOLS_PER_DOMAIN")
                .unwrap_or_else(|_| DEFAULT_MAX_PROTOCOLS_PER_DOMAIN.to_string())
                .parse()
                .unwrap_or(DEFAULT_MAX_PROTOCOLS_PER_DOMAIN),
            seconds_per_year: env::var("SECONDS_PER_YEAR")
                .unwrap_or_else(|_| DEFAULT_SECONDS_PER_YEAR.to_string())
                .parse()
                .unwrap_or(DEFAULT_SECONDS_PER_YEAR),

            // Wiring
            command_channel_capacity: env::var("COMMAND_CHANNEL_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .unwrap_or(1024),
            audit_log: env::var("AUDIT_LOG")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            audit_log_path: env::var("AUDIT_LOG_PATH")
                .unwrap_or_else(|_| "./logs/audit.jsonl".to_string()),

            // Relay
            relay_revert_probability: env::var("RELAY_REVERT_PROBABILITY")
                .unwrap_or_else(|_| "0.0".to_string())
                .parse()
                .unwrap_or(0.0),
            relay_abort_probability: env::var("RELAY_ABORT_PROBABILITY")
                .unwrap_or_else(|_| "0.0".to_string())
                .parse()
                .unwrap_or(0.0),
            relay_latency_ms: env::var("RELAY_LATENCY_MS")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .unwrap_or(25),
            relay_seed: env::var("RELAY_SEED")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .unwrap_or(7),
        })
    }

    /// Address from the environment; a present but malformed value is an error
    fn env_address(key: &str, default: Address) -> Result<Address> {
        match env::var(key) {
            Ok(raw) => Address::from_str(raw.trim())
                .map_err(|e| eyre::eyre!("Invalid {} '{}': {}", key, raw, e)),
            Err(_) => Ok(default),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Fill every unset role with the local placeholder addresses.
    /// Only the simulated demo session uses this.
    pub fn with_demo_roles(mut self) -> Self {
        let placeholders = Self::default();
        let fill = |current: Address, placeholder: Address| {
            if current == Address::ZERO {
                placeholder
            } else {
                current
            }
        };
        self.admin_address = fill(self.admin_address, placeholders.admin_address);
        self.emergency_admin_address =
            fill(self.emergency_admin_address, placeholders.emergency_admin_address);
        self.gateway_address = fill(self.gateway_address, placeholders.gateway_address);
        self.vault_address = fill(self.vault_address, placeholders.vault_address);
        self
    }

    /// Validate configuration before starting the engine
    pub fn validate(&self) -> Result<()> {
        if self.admin_address == Address::ZERO {
            return Err(eyre::eyre!("ADMIN_ADDRESS must be set to a non-zero address"));
        }
        if self.gateway_address == Address::ZERO {
            return Err(eyre::eyre!("GATEWAY_ADDRESS must be set to a non-zero address"));
        }
        if self.max_retries > MAX_RETRIES_CAP {
            return Err(eyre::eyre!(
                "MAX_RETRIES must be <= {} (currently {})",
                MAX_RETRIES_CAP,
                self.max_retries
            ));
        }
        if self.default_slippage_bps > MAX_SLIPPAGE_BPS_CAP {
            return Err(eyre::eyre!(
                "DEFAULT_SLIPPAGE_BPS must be <= {} (currently {})",
                MAX_SLIPPAGE_BPS_CAP,
                self.default_slippage_bps
            ));
        }
        if self.max_protocols_per_domain == 0 {
            return Err(eyre::eyre!("MAX_PROTOCOLS_PER_DOMAIN must be at least 1"));
        }
        if self.seconds_per_year == 0 {
            return Err(eyre::eyre!("SECONDS_PER_YEAR must be at least 1"));
        }
        if self.stale_sweep_interval_secs == 0 {
            return Err(eyre::eyre!("STALE_SWEEP_INTERVAL_SECS must be at least 1"));
        }
        if self.command_channel_capacity == 0 {
            return Err(eyre::eyre!("COMMAND_CHANNEL_CAPACITY must be at least 1"));
        }

        let revert = self.relay_revert_probability;
        let abort = self.relay_abort_probability;
        if !(0.0..=1.0).contains(&revert) || !(0.0..=1.0).contains(&abort) {
            return Err(eyre::eyre!(
                "Relay probabilities must be within [0, 1] (revert {:.2}, abort {:.2})",
                revert,
                abort
            ));
        }
        if revert + abort > 1.0 {
            return Err(eyre::eyre!(
                "RELAY_REVERT_PROBABILITY + RELAY_ABORT_PROBABILITY exceeds 1.0"
            ));
        }

        Ok(())
    }

    /// Runtime parameters handed to access control
    pub fn engine_parameters(&self) -> EngineParameters {
        EngineParameters {
            default_slippage_bps: self.default_slippage_bps,
            max_retries: self.max_retries,
        }
    }

    pub fn audit_path(&self) -> Option<PathBuf> {
        self.audit_log.then(|| PathBuf::from(&self.audit_log_path))
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let set = |a: Address| {
            if a == Address::ZERO {
                "✗ Not Set".to_string()
            } else {
                format!("{}", a)
            }
        };

        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║              OMNIYIELD - CONFIGURATION                     ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ ROLES                                                      ║");
        println!("║ • Admin:     {:<45} ║", set(self.admin_address));
        println!("║ • Emergency: {:<45} ║", set(self.emergency_admin_address));
        println!("║ • Gateway:   {:<45} ║", set(self.gateway_address));
        println!("║ • Vault:     {:<45} ║", set(self.vault_address));
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SAGA                                                       ║");
        println!("║ • Max Retries:     {:>39} ║", self.max_retries);
        println!("║ • Slippage:        {:>35} bps ║", self.default_slippage_bps);
        println!("║ • Stale After:     {:>37} s ║", self.stale_operation_secs);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ REGISTRY                                                   ║");
        println!("║ • Per Domain:      {:>39} ║", self.max_protocols_per_domain);
        println!("║ • Seconds/Year:    {:>39} ║", self.seconds_per_year);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SIMULATED RELAY                                            ║");
        println!("║ • Revert Chance:   {:>38.1}% ║", self.relay_revert_probability * 100.0);
        println!("║ • Abort Chance:    {:>38.1}% ║", self.relay_abort_probability * 100.0);
        println!("║ • Latency:         {:>36} ms ║", self.relay_latency_ms);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ • Audit Log:       {:^39} ║",
            if self.audit_log { "✓ Enabled" } else { "✗ Disabled" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_address: Address::repeat_byte(0xa1),
            emergency_admin_address: Address::repeat_byte(0xe1),
            gateway_address: Address::repeat_byte(0x9a),
            vault_address: Address::repeat_byte(0x7a),
            max_retries: 3,
            default_slippage_bps: 50,
            stale_operation_secs: 3600,
            stale_sweep_interval_secs: 60,
            max_protocols_per_domain: DEFAULT_MAX_PROTOCOLS_PER_DOMAIN,
            seconds_per_year: DEFAULT_SECONDS_PER_YEAR,
            command_channel_capacity: 1024,
            audit_log: false,
            audit_log_path: "./logs/audit.jsonl".to_string(),
            relay_revert_probability: 0.0,
            relay_abort_probability: 0.0,
            relay_latency_ms: 25,
            relay_seed: 7,
        }
    }
}

// ============================================
// TESTS
// ============================================
