//! Configuration for Usher
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Usher - adviser allocation gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "usher")]
#[command(about = "Adviser allocation gateway - capacity projection and deal assignment")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store, relaxed config checks)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "usher")]
    pub mongodb_db: String,

    /// CRM API base URL
    #[arg(long, env = "CRM_BASE_URL", default_value = "https://api.hubapi.com")]
    pub crm_base_url: String,

    /// CRM API bearer token (required unless dev mode)
    #[arg(long, env = "CRM_TOKEN")]
    pub crm_token: Option<String>,

    /// HR platform API base URL
    #[arg(long, env = "HR_BASE_URL", default_value = "https://api.employmenthero.com")]
    pub hr_base_url: String,

    /// HR platform access token (the OAuth handshake lives outside this service)
    #[arg(long, env = "HR_TOKEN")]
    pub hr_token: Option<String>,

    /// Chat webhook URL for allocation alerts (optional)
    #[arg(long, env = "CHAT_WEBHOOK_URL")]
    pub chat_webhook_url: Option<String>,

    /// Number of weeks to project capacity into the future
    #[arg(long, env = "HORIZON_WEEKS", default_value = "52")]
    pub horizon_weeks: u32,

    /// Per-call deadline for point CRM/store reads, in seconds
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value = "10")]
    pub call_timeout_secs: u64,

    /// Per-call deadline for bulk list operations, in seconds
    #[arg(long, env = "LIST_TIMEOUT_SECS", default_value = "30")]
    pub list_timeout_secs: u64,

    /// Outer deadline for one allocation request, in seconds
    #[arg(long, env = "ALLOCATION_TIMEOUT_SECS", default_value = "60")]
    pub allocation_timeout_secs: u64,

    /// TTL for cached CRM adviser and HR leave reads, in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "300")]
    pub cache_ttl_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.crm_token.is_none() {
            return Err("CRM_TOKEN is required in production mode".to_string());
        }

        if self.horizon_weeks == 0 {
            return Err("HORIZON_WEEKS must be at least 1".to_string());
        }

        if self.allocation_timeout_secs < self.call_timeout_secs {
            return Err(
                "ALLOCATION_TIMEOUT_SECS must be at least CALL_TIMEOUT_SECS".to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["usher", "--dev-mode", "--crm-token", "t"])
    }

    #[test]
    fn test_defaults() {
        let args = base_args();
        assert_eq!(args.horizon_weeks, 52);
        assert_eq!(args.call_timeout_secs, 10);
        assert_eq!(args.list_timeout_secs, 30);
        assert_eq!(args.allocation_timeout_secs, 60);
        assert_eq!(args.cache_ttl_secs, 300);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_production_requires_crm_token() {
        let args = Args::parse_from(["usher"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let mut args = base_args();
        args.horizon_weeks = 0;
        assert!(args.validate().is_err());
    }
}
