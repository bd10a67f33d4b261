//! Validated configuration for the batch downsampler.

use data_types::{DatasetRef, Resolution};
use snafu::{ensure, Snafu};
use std::{collections::BTreeMap, time::Duration};

/// Errors validating a downsampler configuration.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("no downsample resolutions configured"))]
    EmptyResolutions,

    #[snafu(display("raw dataset name is empty"))]
    EmptyDatasetName,

    #[snafu(display("store write timeout must be non-zero"))]
    ZeroTimeout,
}

#[allow(missing_docs)]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The configuration options for one downsampler worker. Validated at
/// construction; loading these from files or flags is the deployment
/// layer's concern.
#[derive(Debug, Clone)]
pub struct DownsamplerConfig {
    raw_dataset_name: String,
    /// Per-resolution row TTL; the key set is also the set of
    /// resolutions to downsample to.
    ttl_by_resolution: BTreeMap<Resolution, Duration>,
    store_write_timeout: Duration,
}

impl DownsamplerConfig {
    /// Initialize a config. Every configured resolution carries its
    /// TTL, so a resolution without one cannot be expressed.
    pub fn new(
        raw_dataset_name: impl Into<String>,
        ttl_by_resolution: BTreeMap<Resolution, Duration>,
        store_write_timeout: Duration,
    ) -> Result<Self> {
        let raw_dataset_name = raw_dataset_name.into();
        ensure!(!raw_dataset_name.is_empty(), EmptyDatasetNameSnafu);
        ensure!(!ttl_by_resolution.is_empty(), EmptyResolutionsSnafu);
        ensure!(!store_write_timeout.is_zero(), ZeroTimeoutSnafu);
        Ok(Self {
            raw_dataset_name,
            ttl_by_resolution,
            store_write_timeout,
        })
    }

    /// The raw dataset downsampled datasets are derived from.
    pub fn raw_dataset_name(&self) -> &str {
        &self.raw_dataset_name
    }

    /// The configured resolutions, ascending.
    pub fn resolutions(&self) -> impl Iterator<Item = Resolution> + '_ {
        self.ttl_by_resolution.keys().copied()
    }

    /// The configured `(resolution, ttl)` pairs, ascending by
    /// resolution.
    pub fn ttls(&self) -> impl Iterator<Item = (Resolution, Duration)> + '_ {
        self.ttl_by_resolution.iter().map(|(r, t)| (*r, *t))
    }

    /// The dataset a resolution's chunks are written to.
    pub fn dataset_for(&self, resolution: Resolution) -> DatasetRef {
        DatasetRef::new(format!(
            "{}_ds_{}",
            self.raw_dataset_name,
            resolution.as_minutes()
        ))
    }

    /// How long to await one store write acknowledgement.
    pub fn store_write_timeout(&self) -> Duration {
        self.store_write_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttls() -> BTreeMap<Resolution, Duration> {
        BTreeMap::from([
            (Resolution::from_minutes(5), Duration::from_secs(86_400)),
            (Resolution::from_minutes(60), Duration::from_secs(7 * 86_400)),
        ])
    }

    #[test]
    fn routes_datasets_by_resolution_minutes() {
        let config =
            DownsamplerConfig::new("prometheus", ttls(), Duration::from_secs(10)).unwrap();
        assert_eq!(
            config.dataset_for(Resolution::from_minutes(5)),
            DatasetRef::new("prometheus_ds_5")
        );
        assert_eq!(
            config.dataset_for(Resolution::from_minutes(60)),
            DatasetRef::new("prometheus_ds_60")
        );
    }

    #[test]
    fn resolutions_iterate_ascending() {
        let config =
            DownsamplerConfig::new("prometheus", ttls(), Duration::from_secs(10)).unwrap();
        let r: Vec<_> = config.resolutions().collect();
        assert_eq!(
            r,
            vec![Resolution::from_minutes(5), Resolution::from_minutes(60)]
        );
    }

    #[test]
    fn rejects_empty_config() {
        assert!(matches!(
            DownsamplerConfig::new("p", BTreeMap::new(), Duration::from_secs(10)).unwrap_err(),
            Error::EmptyResolutions
        ));
        assert!(matches!(
            DownsamplerConfig::new("", ttls(), Duration::from_secs(10)).unwrap_err(),
            Error::EmptyDatasetName
        ));
        assert!(matches!(
            DownsamplerConfig::new("p", ttls(), Duration::ZERO).unwrap_err(),
            Error::ZeroTimeout
        ));
    }
}
