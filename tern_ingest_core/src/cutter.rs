use std::{fmt, sync::Arc};

use crate::{
    accumulator::Accumulator,
    batch::{Batch, BatchIdGenerator, SequentialBatchIdGenerator},
    options::IngestorOptions,
};

/// Why a batch was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutReason {
    /// The action count reached the limit.
    Actions,
    /// The accumulated volume reached the limit.
    Volume,
    /// An explicit or timed flush.
    Flush,
}

/// Turns pending operations into bounded batches.
#[derive(Clone)]
pub struct BatchCutter {
    max_actions: usize,
    max_volume: u64,
    ids: Arc<dyn BatchIdGenerator>,
}

impl BatchCutter {
    pub fn new(options: &IngestorOptions) -> Self {
        Self {
            max_actions: options.max_actions_per_batch,
            max_volume: options.max_volume_per_batch.as_u64(),
            ids: Arc::new(SequentialBatchIdGenerator::new()),
        }
    }

    /// Returns the reason the accumulator must be cut now, if any.
    pub fn trigger(&self, accumulator: &Accumulator) -> Option<CutReason> {
        let (len, bytes) = accumulator.levels();
        if len == 0 {
            return None;
        }

        if len >= self.max_actions {
            Some(CutReason::Actions)
        } else if bytes >= self.max_volume {
            Some(CutReason::Volume)
        } else {
            None
        }
    }

    /// Cuts one bounded batch from the front of the accumulator.
    ///
    /// Returns `None` if the accumulator is empty. No id is consumed then.
    pub fn cut(&self, accumulator: &Accumulator) -> Option<Batch> {
        let taken = accumulator.take_bounded(self.max_actions, self.max_volume);
        if taken.is_empty() {
            return None;
        }

        Some(Batch::new(self.ids.next_id(), taken))
    }
}

impl fmt::Debug for BatchCutter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCutter")
            .field("max_actions", &self.max_actions)
            .field("max_volume", &self.max_volume)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutReason::Actions => write!(f, "actions"),
            CutReason::Volume => write!(f, "volume"),
            CutReason::Flush => write!(f, "flush"),
        }
    }
}
