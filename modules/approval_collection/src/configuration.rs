//! Tunables for the approval collection engine
use config::Config;
use std::time::Duration;

const DEFAULT_VERIFIED_APPROVALS_CACHE_SIZE: (&str, i64) = ("verified-approvals-cache-size", 1000);
const DEFAULT_PENDING_APPROVALS_CACHE_SIZE: (&str, i64) = ("pending-approvals-cache-size", 10000);
const DEFAULT_REQUEST_BLACKOUT_MIN_MS: (&str, i64) = ("request-blackout-min-ms", 2000);
const DEFAULT_REQUEST_BLACKOUT_MAX_MS: (&str, i64) = ("request-blackout-max-ms", 60000);
const DEFAULT_APPROVAL_REQUESTS_THRESHOLD: (&str, i64) = ("approval-requests-threshold", 10);
const DEFAULT_REQUIRED_APPROVALS: (&str, i64) = ("required-approvals", 1);
const DEFAULT_CHUNK_ALPHA: (&str, i64) = ("chunk-alpha", 3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalCollectionConfig {
    /// Capacity of each result's verified-approval cache
    pub verified_approvals_cache_size: usize,

    /// Capacity of the cache holding approvals for results not yet seen
    pub pending_approvals_cache_size: usize,

    /// Blackout after the first request for a missing approval
    pub request_blackout_min: Duration,

    /// Upper bound of the blackout window
    pub request_blackout_max: Duration,

    /// Finalized blocks to wait before requesting approvals for a result
    pub approval_requests_threshold: u64,

    /// Approvals needed per chunk, capped by the number of assigned verifiers
    pub required_approvals: usize,

    /// Verifiers assigned to each chunk
    pub chunk_alpha: usize,
}

impl Default for ApprovalCollectionConfig {
    fn default() -> Self {
        Self {
            verified_approvals_cache_size: DEFAULT_VERIFIED_APPROVALS_CACHE_SIZE.1 as usize,
            pending_approvals_cache_size: DEFAULT_PENDING_APPROVALS_CACHE_SIZE.1 as usize,
            request_blackout_min: Duration::from_millis(DEFAULT_REQUEST_BLACKOUT_MIN_MS.1 as u64),
            request_blackout_max: Duration::from_millis(DEFAULT_REQUEST_BLACKOUT_MAX_MS.1 as u64),
            approval_requests_threshold: DEFAULT_APPROVAL_REQUESTS_THRESHOLD.1 as u64,
            required_approvals: DEFAULT_REQUIRED_APPROVALS.1 as usize,
            chunk_alpha: DEFAULT_CHUNK_ALPHA.1 as usize,
        }
    }
}

impl ApprovalCollectionConfig {
    /// Read the module's config section, falling back to defaults for missing keys
    pub fn from_config(config: &Config) -> Self {
        let get = |(key, default): (&str, i64)| config.get_int(key).unwrap_or(default).max(0) as u64;

        let request_blackout_min = Duration::from_millis(get(DEFAULT_REQUEST_BLACKOUT_MIN_MS));
        let request_blackout_max =
            Duration::from_millis(get(DEFAULT_REQUEST_BLACKOUT_MAX_MS)).max(request_blackout_min);

        Self {
            verified_approvals_cache_size: get(DEFAULT_VERIFIED_APPROVALS_CACHE_SIZE).max(1) as usize,
            pending_approvals_cache_size: get(DEFAULT_PENDING_APPROVALS_CACHE_SIZE).max(1) as usize,
            request_blackout_min,
            request_blackout_max,
            approval_requests_threshold: get(DEFAULT_APPROVAL_REQUESTS_THRESHOLD),
            required_approvals: get(DEFAULT_REQUIRED_APPROVALS).max(1) as usize,
            chunk_alpha: get(DEFAULT_CHUNK_ALPHA).max(1) as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gives_defaults() {
        let config = Config::builder().build().unwrap();
        assert_eq!(
            ApprovalCollectionConfig::from_config(&config),
            ApprovalCollectionConfig::default()
        );
    }

    #[test]
    fn values_are_read_and_clamped() {
        let config = Config::builder()
            .set_override("required-approvals", 0i64)
            .unwrap()
            .set_override("request-blackout-min-ms", 500i64)
            .unwrap()
            .set_override("request-blackout-max-ms", 100i64)
            .unwrap()
            .set_override("approval-requests-threshold", 4i64)
            .unwrap()
            .build()
            .unwrap();
        let config = ApprovalCollectionConfig::from_config(&config);

        assert_eq!(config.required_approvals, 1);
        assert_eq!(config.request_blackout_min, Duration::from_millis(500));
        assert_eq!(config.request_blackout_max, Duration::from_millis(500));
        assert_eq!(config.approval_requests_threshold, 4);
    }
}
