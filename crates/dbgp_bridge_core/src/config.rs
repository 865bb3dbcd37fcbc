const DEFAULT_ENGINE_ADDR: &str = "0.0.0.0:9000";
const DEFAULT_VIEWER_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MAX_VALUE_DEPTH: usize = 4;
const DEFAULT_TRANSCRIPT_CAPACITY: usize = 512;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the debug engine connects back to.
    pub engine_addr: String,
    /// Address serving the viewer WebSocket.
    pub viewer_addr: String,
    /// Scripts whose engine connections are refused on init.
    pub blacklisted_files: Vec<String>,
    pub max_value_depth: usize,
    pub transcript_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            engine_addr: DEFAULT_ENGINE_ADDR.to_string(),
            viewer_addr: DEFAULT_VIEWER_ADDR.to_string(),
            blacklisted_files: Vec::new(),
            max_value_depth: DEFAULT_MAX_VALUE_DEPTH,
            transcript_capacity: DEFAULT_TRANSCRIPT_CAPACITY,
        }
    }
}

impl BridgeConfig {
    pub fn new(engine_addr: impl Into<String>, viewer_addr: impl Into<String>) -> Self {
        Self {
            engine_addr: engine_addr.into(),
            viewer_addr: viewer_addr.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let engine_addr = std::env::var("DBGP_BRIDGE_ENGINE_ADDR")
            .unwrap_or_else(|_| DEFAULT_ENGINE_ADDR.to_string());

        let viewer_addr = std::env::var("DBGP_BRIDGE_VIEWER_ADDR")
            .unwrap_or_else(|_| DEFAULT_VIEWER_ADDR.to_string());

        let blacklisted_files = std::env::var("DBGP_BRIDGE_BLACKLIST")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let max_value_depth = std::env::var("DBGP_BRIDGE_MAX_VALUE_DEPTH")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_VALUE_DEPTH);

        let transcript_capacity = std::env::var("DBGP_BRIDGE_TRANSCRIPT_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_TRANSCRIPT_CAPACITY);

        Self {
            engine_addr,
            viewer_addr,
            blacklisted_files,
            max_value_depth,
            transcript_capacity,
        }
    }
}
