use serde::{Deserialize, Serialize};

/// Accelerator feature levels. The first five coincide with the platform
/// API level that introduced them.
pub const FEATURE_LEVEL_1: i64 = 27;
pub const FEATURE_LEVEL_2: i64 = 28;
pub const FEATURE_LEVEL_3: i64 = 29;
pub const FEATURE_LEVEL_4: i64 = 30;
/// First level with sync fence dependencies, bursts, reusable executions
/// and memory alignment/padding preferences.
pub const FEATURE_LEVEL_5: i64 = 31;
pub const FEATURE_LEVEL_6: i64 = 1_000_006;
pub const FEATURE_LEVEL_7: i64 = 1_000_007;
pub const FEATURE_LEVEL_8: i64 = 1_000_008;

/// First platform API level that reports stable buffer ids.
pub const BUFFER_ID_API_LEVEL: u32 = 31;

/// Platform capability table.
///
/// Resolved once at process start and handed to every component that needs
/// it. Components never look capabilities up on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCapabilities {
    pub api_level: u32,
    pub accelerator_feature_level: i64,
}

impl PlatformCapabilities {
    /// Resolve the table from the platform API level.
    ///
    /// Up to API 30 the accelerator feature level equals the API level, and
    /// the runtime query does not exist. Newer platforms are queried.
    pub fn resolve(api_level: u32, query_feature_level: impl FnOnce() -> i64) -> Self {
        let accelerator_feature_level = if api_level <= 30 {
            i64::from(api_level)
        } else {
            query_feature_level()
        };
        tracing::info!(
            api_level,
            feature_level = accelerator_feature_level,
            "resolved platform capabilities"
        );
        Self {
            api_level,
            accelerator_feature_level,
        }
    }

    /// Capabilities of a host machine: every optional feature present.
    pub fn host() -> Self {
        Self {
            api_level: 34,
            accelerator_feature_level: FEATURE_LEVEL_8,
        }
    }

    /// Whether camera buffers can report a stable 64-bit identity.
    pub fn supports_buffer_id(&self) -> bool {
        self.api_level >= BUFFER_ID_API_LEVEL
    }

    pub fn at_least(&self, feature_level: i64) -> bool {
        self.accelerator_feature_level >= feature_level
    }

    /// Replace the accelerator feature level, keeping the API level.
    pub fn with_feature_level(self, accelerator_feature_level: i64) -> Self {
        Self {
            accelerator_feature_level,
            ..self
        }
    }
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self::host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_old_platform_uses_api_level() {
        let caps = PlatformCapabilities::resolve(29, || panic!("must not query"));
        assert_eq!(caps.accelerator_feature_level, FEATURE_LEVEL_3);
        assert!(!caps.supports_buffer_id());
        assert!(!caps.at_least(FEATURE_LEVEL_5));
    }

    #[test]
    fn test_new_platform_queries_once() {
        let mut queries = 0;
        let caps = PlatformCapabilities::resolve(33, || {
            queries += 1;
            FEATURE_LEVEL_6
        });
        assert_eq!(queries, 1);
        assert!(caps.supports_buffer_id());
        assert!(caps.at_least(FEATURE_LEVEL_5));
    }

    #[test]
    fn test_feature_level_override() {
        let caps = PlatformCapabilities::host().with_feature_level(FEATURE_LEVEL_4);
        assert_eq!(caps.api_level, 34);
        assert!(!caps.at_least(FEATURE_LEVEL_5));
    }
}
