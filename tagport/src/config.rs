//! Progress strategy and worker configuration.

/// Environment variable selecting the progress strategy.
///
/// Unset or `0` selects [`ProgressMode::Blocking`]; `1` selects
/// [`ProgressMode::Polling`]. The variable is read once at startup via
/// [`ProgressMode::from_env`] and the result passed explicitly into
/// [`WorkerConfig`]; there is no process-wide implicit default.
pub const PROGRESS_MODE_ENV: &str = "TAGPORT_PROGRESS_MODE";

/// Default cap on a single wire frame, header plus payload: 2 GiB.
pub const DEFAULT_MAX_FRAME_LEN: u64 = 2 * 1024 * 1024 * 1024;

/// Strategy used by the progress driver to schedule `Worker::progress()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// Suspend on the worker's wakeup primitive; run `progress()` once per
    /// wake. Zero CPU while idle.
    #[default]
    Blocking,

    /// Call `progress()` unconditionally on every scheduler iteration,
    /// then yield. Lower latency at the cost of continuous CPU usage.
    Polling,
}

impl ProgressMode {
    /// Read the progress mode from [`PROGRESS_MODE_ENV`].
    pub fn from_env() -> Self {
        Self::from_toggle(std::env::var(PROGRESS_MODE_ENV).ok().as_deref())
    }

    /// Interpret the raw toggle value: `Some("1")` selects polling,
    /// anything else (including unset) selects blocking.
    pub fn from_toggle(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim() == "1" => ProgressMode::Polling,
            _ => ProgressMode::Blocking,
        }
    }
}

/// Configuration for a worker and its progress driver.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Progress strategy for the driver task.
    pub progress_mode: ProgressMode,

    /// Number of distinct tag values available to the tag allocator.
    /// Each endpoint holds two, so the worker supports at most
    /// `tag_space / 2` simultaneously open endpoints.
    pub tag_space: u64,

    /// Largest frame (header plus payload) accepted on the wire or
    /// submitted locally. An inbound header announcing more than this
    /// fails the connection before any payload allocation; a local send
    /// over the limit is rejected synchronously at submission.
    pub max_frame_len: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            progress_mode: ProgressMode::Blocking,
            tag_space: 4096,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl WorkerConfig {
    /// Configuration with the given progress mode and default tag space.
    pub fn with_mode(progress_mode: ProgressMode) -> Self {
        Self {
            progress_mode,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_unset_is_blocking() {
        assert_eq!(ProgressMode::from_toggle(None), ProgressMode::Blocking);
    }

    #[test]
    fn test_toggle_zero_is_blocking() {
        assert_eq!(ProgressMode::from_toggle(Some("0")), ProgressMode::Blocking);
    }

    #[test]
    fn test_toggle_one_is_polling() {
        assert_eq!(ProgressMode::from_toggle(Some("1")), ProgressMode::Polling);
        assert_eq!(
            ProgressMode::from_toggle(Some(" 1 ")),
            ProgressMode::Polling
        );
    }

    #[test]
    fn test_toggle_garbage_is_blocking() {
        assert_eq!(
            ProgressMode::from_toggle(Some("yes")),
            ProgressMode::Blocking
        );
    }

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.progress_mode, ProgressMode::Blocking);
        assert_eq!(config.tag_space, 4096);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }
}
