//! Linear allocation of GPU-visible state memory.
//!
//! Binding tables, border colors and shader assembly are all carved out of fixed-capacity
//! regions with a [`BumpRegion`]. A region is never compacted: when a request doesn't fit, the
//! region's user is asked to [drain] the old buffer object, which in practice means submitting
//! the batch that still points into it, and a fresh buffer object replaces it.
//!
//! Offset 0 is never handed out. Tools decoding batches treat a zero state pointer as null, and
//! so does the hardware for some pointers, so regions start handing out memory at their
//! alignment instead.
//!
//! [drain]: RegionUser::drain

pub use self::bump::{BumpRegion, Reservation};
use crate::{
    batch::SubmitError,
    bo::{Bo, BoAllocError},
};
use std::sync::Arc;
use thiserror::Error;

mod bump;

/// The consumer of the memory a [`BumpRegion`] hands out, typically the batch whose commands
/// point into the region.
pub trait RegionUser {
    /// Called right before `old` is replaced. Anything pending that still refers to `old` must be
    /// submitted before this returns.
    fn drain(&mut self, old: &Arc<Bo>) -> Result<(), SubmitError>;

    /// Called after each reservation, so that the consumer of the pending work can resolve
    /// offsets into `bo` to addresses.
    fn reference(&mut self, bo: &Arc<Bo>);
}

/// Error that can happen when reserving memory from a [`BumpRegion`].
#[derive(Debug, Error)]
pub enum AllocError {
    /// The request can never fit, not even in an empty region. This is a configuration error.
    #[error("{size} bytes requested from region `{region}`, which only has {capacity} usable bytes")]
    RequestTooLarge {
        region: &'static str,
        size: u32,
        capacity: u32,
    },
    /// The buffer provider failed to allocate a replacement region.
    #[error(transparent)]
    OutOfMemory(#[from] BoAllocError),
    /// Submitting the work that referred to the old region failed.
    #[error("failed to drain region before replacing it")]
    Drain(#[from] SubmitError),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bo::BoId;

    /// Counts drains and remembers what got referenced.
    #[derive(Default)]
    pub(crate) struct CountingUser {
        pub(crate) drained: Vec<BoId>,
        pub(crate) referenced: Vec<BoId>,
    }

    impl RegionUser for CountingUser {
        fn drain(&mut self, old: &Arc<Bo>) -> Result<(), SubmitError> {
            self.drained.push(old.id());
            Ok(())
        }

        fn reference(&mut self, bo: &Arc<Bo>) {
            self.referenced.push(bo.id());
        }
    }
}
