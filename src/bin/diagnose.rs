//! Diagnostic tool - Check configuration status
//!
//! Run with: cargo run --bin diagnose

use std::env;

use omniyield::Config;

fn main() {
    println!("🔍 OMNIYIELD DIAGNOSTIC CHECK\n");

    // Load .env
    dotenvy::dotenv().ok();

    println!("═══════════════════════════════════════════════════");
    println!("                      ROLES                         ");
    println!("═══════════════════════════════════════════════════\n");

    let roles = [
        ("ADMIN_ADDRESS", "Registry and parameter admin"),
        ("EMERGENCY_ADMIN_ADDRESS", "May pause and force withdrawals"),
        ("GATEWAY_ADDRESS", "Only accepted callback sender"),
        ("VAULT_ADDRESS", "Authorized vault front-end"),
    ];

    for (key, desc) in roles {
        let set = env::var(key).is_ok();
        println!(
            "  {:<26} {}",
            format!("{}:", key),
            if set { "✅ Set" } else { "⚪ Unset (zero address)" }
        );
        println!("    └─ {}\n", desc);
    }

    println!("═══════════════════════════════════════════════════");
    println!("                     TUNING                         ");
    println!("═══════════════════════════════════════════════════\n");

    let checks = [
        ("MAX_RETRIES", "3", "Redispatches before compensation"),
        ("DEFAULT_SLIPPAGE_BPS", "50", "Slippage sent with each message"),
        ("STALE_OPERATION_SECS", "3600", "In-flight age flagged as stale"),
        ("STALE_SWEEP_INTERVAL_SECS", "60", "Seconds between stale sweeps"),
        ("MAX_PROTOCOLS_PER_DOMAIN", "10", "Registry capacity per domain"),
        ("SECONDS_PER_YEAR", "31536000", "Accrual year length"),
        ("COMMAND_CHANNEL_CAPACITY", "1024", "Engine queue depth"),
        ("AUDIT_LOG", "false", "Append events as JSON lines?"),
        ("AUDIT_LOG_PATH", "./logs/audit.jsonl", "Audit file location"),
        ("RELAY_REVERT_PROBABILITY", "0.0", "Injected revert chance"),
        ("RELAY_ABORT_PROBABILITY", "0.0", "Injected abort chance"),
        ("RELAY_LATENCY_MS", "25", "Simulated delivery delay"),
        ("RELAY_SEED", "7", "Failure injection seed"),
    ];

    for (key, default, desc) in checks {
        let value = env::var(key).unwrap_or_else(|_| default.to_string());
        let is_default = env::var(key).is_err();
        let marker = if is_default { "(default)" } else { "(from .env)" };
        println!("  {}: {} {}", key, value, marker);
        println!("    └─ {}\n", desc);
    }

    println!("═══════════════════════════════════════════════════");
    println!("                     STATUS                         ");
    println!("═══════════════════════════════════════════════════\n");

    match Config::from_env().and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => {
            println!("  ✅ Configuration is valid");
            if config.relay_revert_probability + config.relay_abort_probability > 0.0 {
                println!("     → Relay will inject failures; expect retries and refunds");
            }
            if config.audit_log {
                println!("     → Audit events go to {}", config.audit_log_path);
            }
        }
        Err(e) => {
            println!("  ❌ Configuration error: {}", e);
        }
    }

    println!("\n✅ Diagnostic complete!\n");
}
