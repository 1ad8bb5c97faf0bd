//! Cache Configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE};
use crate::error::{Error, Result};

/// Cache configuration
///
/// Loadable from YAML:
///
/// ```yaml
/// entries_limit: 1000
/// page_size: 1048576
/// max_pages: 8
/// initial_pages: 1
/// default_ttl_ms: 60000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum heap-resident entries before demotion (None = unbounded)
    pub entries_limit: Option<usize>,
    /// Size of each off-heap page in bytes
    pub page_size: usize,
    /// Upper bound on allocated pages
    pub max_pages: usize,
    /// Pages allocated eagerly at construction
    pub initial_pages: usize,
    /// TTL applied by `put` without an explicit TTL (None = never expires)
    #[serde(rename = "default_ttl_ms", with = "millis")]
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entries_limit: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            initial_pages: 1,
            default_ttl: None,
        }
    }
}

impl CacheConfig {
    /// Set the heap entries limit
    pub fn with_entries_limit(mut self, limit: usize) -> Self {
        self.entries_limit = Some(limit);
        self
    }

    /// Set page geometry
    pub fn with_pages(mut self, page_size: usize, max_pages: usize) -> Self {
        self.page_size = page_size;
        self.max_pages = max_pages;
        self.initial_pages = self.initial_pages.min(max_pages);
        self
    }

    /// Set the number of eagerly allocated pages
    pub fn with_initial_pages(mut self, pages: usize) -> Self {
        self.initial_pages = pages;
        self
    }

    /// Set the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Total off-heap bytes once every page is allocated
    pub fn max_capacity(&self) -> usize {
        self.page_size.saturating_mul(self.max_pages)
    }

    /// Check the configuration for impossible values
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be greater than zero".into()));
        }
        if self.max_pages == 0 {
            return Err(Error::Config("max_pages must be greater than zero".into()));
        }
        if self.max_pages > u32::MAX as usize {
            return Err(Error::Config(format!(
                "max_pages {} exceeds {}",
                self.max_pages,
                u32::MAX
            )));
        }
        if self.initial_pages > self.max_pages {
            return Err(Error::Config(format!(
                "initial_pages ({}) exceeds max_pages ({})",
                self.initial_pages, self.max_pages
            )));
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CacheConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.entries_limit, None);
        assert_eq!(config.initial_pages, 1);
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_entries_limit(10)
            .with_pages(1024, 4)
            .with_default_ttl(Duration::from_secs(5));

        assert_eq!(config.entries_limit, Some(10));
        assert_eq!(config.max_capacity(), 4096);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert_matches!(
            CacheConfig::default().with_pages(0, 1).validate(),
            Err(Error::Config(_))
        );
        assert_matches!(
            CacheConfig::default().with_pages(1024, 0).validate(),
            Err(Error::Config(_))
        );
        assert_matches!(
            CacheConfig::default()
                .with_pages(1024, 2)
                .with_initial_pages(3)
                .validate(),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
entries_limit: 100
page_size: 4096
max_pages: 2
default_ttl_ms: 1500
"#;
        let config = CacheConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.entries_limit, Some(100));
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.max_pages, 2);
        assert_eq!(config.initial_pages, 1);
        assert_eq!(config.default_ttl, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        assert_matches!(
            CacheConfig::from_yaml_str("page_size: 0\n"),
            Err(Error::Config(_))
        );
        assert_matches!(
            CacheConfig::from_yaml_str("max_pages: [1, 2]\n"),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.yaml");
        std::fs::write(&path, "entries_limit: 3\nmax_pages: 1\n").unwrap();

        let config = CacheConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.entries_limit, Some(3));
        assert_eq!(config.max_pages, 1);
    }
}
