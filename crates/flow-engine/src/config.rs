//! Runtime configuration (§10.D), env-var driven with sane defaults.

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Ceiling on a single inline (non-queued) run, in seconds.
    pub inline_timeout_secs: u64,
    /// Ceiling on how long a `wait` step may pause a run, in seconds.
    pub max_wait_secs: u64,
    /// Hard cap on `while` group iterations, to guarantee termination.
    pub max_while_iterations: u32,
    /// Default fan-out width for a `foreach` group with no explicit `max_parallel`.
    pub default_map_parallel: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inline_timeout_secs: 300,
            max_wait_secs: 3600,
            max_while_iterations: 100,
            default_map_parallel: 10,
        }
    }
}

impl RuntimeConfig {
    /// Reads overrides from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inline_timeout_secs: env_u64("FLOW_INLINE_TIMEOUT_SECS", defaults.inline_timeout_secs),
            max_wait_secs: env_u64("FLOW_MAX_WAIT_SECS", defaults.max_wait_secs),
            max_while_iterations: env_u32("FLOW_MAX_WHILE_ITERATIONS", defaults.max_while_iterations),
            default_map_parallel: env_usize("FLOW_DEFAULT_MAP_PARALLEL", defaults.default_map_parallel),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
