//! Endpoint and transport configuration for the realtime client

/// Transport tuning options, handed through to the streaming transport
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Keep-alive ping interval in seconds
    pub keep_alive_interval_secs: u64,
    /// Initial reconnection delay in seconds (doubles up to an internal cap)
    pub reconnect_interval_secs: u64,
    /// Maximum consecutive reconnection attempts (0 = retry forever)
    pub max_attempts: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: 10,
            reconnect_interval_secs: 1,
            max_attempts: 0, // Infinite retries
        }
    }
}

/// Realtime client configuration
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Market hub URL
    pub market_hub_url: String,
    /// User hub URL
    pub user_hub_url: String,
    /// Transport tuning options shared by both hubs
    pub transport: TransportOptions,
}

impl RealtimeConfig {
    /// Build a configuration for a named Gateway environment.
    ///
    /// Known environments get their documented RTC endpoints; any other name
    /// is treated as a firm-specific gateway subdomain.
    pub fn for_environment(environment: &str) -> Self {
        let (market_hub_url, user_hub_url) = match environment.to_ascii_lowercase().as_str() {
            "demo" => (
                "wss://gateway-rtc-demo.s2f.projectx.com/hubs/market".to_string(),
                "wss://gateway-rtc-demo.s2f.projectx.com/hubs/user".to_string(),
            ),
            "topstepx" => (
                "wss://rtc.topstepx.com/hubs/market".to_string(),
                "wss://rtc.topstepx.com/hubs/user".to_string(),
            ),
            other => (
                format!("wss://rtc.{}.projectx.com/hubs/market", other),
                format!("wss://rtc.{}.projectx.com/hubs/user", other),
            ),
        };

        Self {
            market_hub_url,
            user_hub_url,
            transport: TransportOptions::default(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::for_environment("demo")
    }
}
