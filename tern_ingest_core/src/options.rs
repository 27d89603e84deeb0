use std::{num::NonZeroUsize, time::Duration};

use bytesize::ByteSize;

use crate::error::{Result, ValidationSnafu};

/// Options for the bulk ingestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestorOptions {
    /// Number of operations after which a batch is cut.
    pub max_actions_per_batch: usize,
    /// Maximum number of batches in flight at once.
    pub max_concurrent_batches: usize,
    /// Accumulated size after which a batch is cut.
    pub max_volume_per_batch: ByteSize,
    /// Interval at which pending operations are flushed.
    pub flush_interval: Duration,
    /// How long shutdown waits for in-flight batches.
    pub max_wait_on_shutdown: Duration,
}

impl IngestorOptions {
    /// Change the number of operations per batch.
    pub fn with_max_actions_per_batch(mut self, max_actions_per_batch: usize) -> Self {
        self.max_actions_per_batch = max_actions_per_batch;
        self
    }

    /// Change the number of concurrent batches.
    pub fn with_max_concurrent_batches(mut self, max_concurrent_batches: usize) -> Self {
        self.max_concurrent_batches = max_concurrent_batches;
        self
    }

    /// Change the batch volume.
    pub fn with_max_volume_per_batch(mut self, max_volume_per_batch: ByteSize) -> Self {
        self.max_volume_per_batch = max_volume_per_batch;
        self
    }

    /// Change the flush interval.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Change how long shutdown waits for in-flight batches.
    pub fn with_max_wait_on_shutdown(mut self, max_wait_on_shutdown: Duration) -> Self {
        self.max_wait_on_shutdown = max_wait_on_shutdown;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_actions_per_batch == 0 {
            return ValidationSnafu {
                message: "max actions per batch must be greater than zero".to_string(),
            }
            .fail();
        }

        if self.max_concurrent_batches == 0 {
            return ValidationSnafu {
                message: "max concurrent batches must be greater than zero".to_string(),
            }
            .fail();
        }

        if self.max_concurrent_batches > u32::MAX as usize {
            return ValidationSnafu {
                message: format!(
                    "max concurrent batches must be at most {}, got {}",
                    u32::MAX,
                    self.max_concurrent_batches
                ),
            }
            .fail();
        }

        if self.max_volume_per_batch.as_u64() == 0 {
            return ValidationSnafu {
                message: "max volume per batch must be greater than zero".to_string(),
            }
            .fail();
        }

        if self.flush_interval.is_zero() {
            return ValidationSnafu {
                message: "flush interval must be greater than zero".to_string(),
            }
            .fail();
        }

        Ok(())
    }
}

impl Default for IngestorOptions {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);

        Self {
            max_actions_per_batch: 1000,
            max_concurrent_batches: parallelism * 4,
            max_volume_per_batch: ByteSize::mib(10),
            flush_interval: Duration::from_secs(30),
            max_wait_on_shutdown: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;

    #[test]
    fn test_default_options_are_valid() {
        let options = IngestorOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.max_actions_per_batch, 1000);
        assert_eq!(options.max_volume_per_batch, ByteSize::mib(10));
        assert!(options.max_concurrent_batches >= 4);
        assert_eq!(options.max_concurrent_batches % 4, 0);
    }

    #[test]
    fn test_builder() {
        let options = IngestorOptions::default()
            .with_max_actions_per_batch(100)
            .with_max_concurrent_batches(2)
            .with_max_volume_per_batch(ByteSize::kib(64))
            .with_flush_interval(Duration::from_secs(1))
            .with_max_wait_on_shutdown(Duration::from_secs(5));

        assert_eq!(options.max_actions_per_batch, 100);
        assert_eq!(options.max_concurrent_batches, 2);
        assert_eq!(options.max_volume_per_batch, ByteSize::kib(64));
        assert_eq!(options.flush_interval, Duration::from_secs(1));
        assert_eq!(options.max_wait_on_shutdown, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let invalid = [
            IngestorOptions::default().with_max_actions_per_batch(0),
            IngestorOptions::default().with_max_concurrent_batches(0),
            IngestorOptions::default().with_max_volume_per_batch(ByteSize::b(0)),
            IngestorOptions::default().with_flush_interval(Duration::ZERO),
        ];

        for options in invalid {
            assert!(matches!(
                options.validate(),
                Err(IngestError::Validation { .. })
            ));
        }
    }
}
