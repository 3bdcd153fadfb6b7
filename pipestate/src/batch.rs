//! The command batch that encoded commands are appended to, and the interface used to submit it.

use crate::{
    alloc::RegionUser,
    bo::{Bo, BoId},
    packet::{
        cmd::{MiBatchBufferEnd, MiNoop},
        pack,
    },
    pipe_control::PipeControlFlags,
    Gen, Pipeline,
};
use foldhash::{HashMap, HashSet};
use parking_lot::{Mutex, MutexGuard};
use std::{mem, sync::Arc};
use thiserror::Error;

/// The default size of a batch in bytes.
pub const BATCH_SIZE: u32 = 20 * 1024;

/// Bytes kept free at the end of every batch for the end marker and its padding.
const BATCH_RESERVED: usize = 2 * 4;

/// A BO the kernel must make resident for a batch.
#[derive(Clone, Debug)]
pub struct ValidationEntry {
    pub bo: Arc<Bo>,
    pub writable: bool,
}

/// A finished batch handed to a [`BatchSink`].
#[derive(Clone, Debug)]
pub struct Submission {
    /// The command words, ending with `MI_BATCH_BUFFER_END` and padded to an even count.
    pub words: Vec<u32>,
    /// Every BO the commands refer to, each once.
    pub validation: Vec<ValidationEntry>,
}

/// Submits finished batches for execution.
pub trait BatchSink {
    fn exec(&mut self, submission: Submission) -> Result<(), SubmitError>;
}

/// Error that can happen when submitting a batch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("the kernel rejected the batch: {reason}")]
    Rejected { reason: String },
    #[error("the device was lost")]
    DeviceLost,
}

/// A [`BatchSink`] that keeps every submission for inspection.
///
/// Clones share the same list, so a clone can be handed to a [`Batch`] while the original is
/// used to look at what got submitted.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    submissions: Arc<Mutex<Vec<Submission>>>,
    failure: Arc<Mutex<Option<SubmitError>>>,
}

impl RecordingSink {
    #[inline]
    pub fn new() -> Self {
        RecordingSink::default()
    }

    /// Returns the submissions received so far.
    #[inline]
    pub fn submissions(&self) -> MutexGuard<'_, Vec<Submission>> {
        self.submissions.lock()
    }

    /// Makes the next submission fail with `error`.
    pub fn fail_next(&self, error: SubmitError) {
        *self.failure.lock() = Some(error);
    }
}

impl BatchSink for RecordingSink {
    fn exec(&mut self, submission: Submission) -> Result<(), SubmitError> {
        if let Some(error) = self.failure.lock().take() {
            return Err(error);
        }

        self.submissions.lock().push(submission);

        Ok(())
    }
}

/// A batch of command words being recorded, along with the BOs they refer to.
///
/// The batch also tracks which BOs have been rendered to or used as a depth buffer since the
/// last cache flush, so that reading them back can be preceded by the right flushes.
pub struct Batch {
    hw: Gen,
    size: usize,
    words: Vec<u32>,
    validation: Vec<ValidationEntry>,
    validation_index: HashMap<BoId, usize>,
    render_cache: HashMap<BoId, u32>,
    depth_cache: HashSet<BoId>,
    contains_draw: bool,
    pipeline: Pipeline,
    submitted_pipeline: Pipeline,
    lost: bool,
    submissions: u64,
    workaround_bo: Arc<Bo>,
    sink: Box<dyn BatchSink>,
}

impl Batch {
    /// Creates an empty batch of `size` bytes.
    ///
    /// `workaround_bo` is the target of the post-sync writes that some hardware restrictions
    /// require even when nobody reads the result.
    ///
    /// # Panics
    ///
    /// - Panics if `size` leaves no room for any command.
    pub fn new(hw: Gen, size: u32, workaround_bo: Arc<Bo>, sink: Box<dyn BatchSink>) -> Self {
        let size = size as usize;
        assert!(size > BATCH_RESERVED);

        Batch {
            hw,
            size,
            words: Vec::with_capacity(size / 4),
            validation: Vec::new(),
            validation_index: HashMap::default(),
            render_cache: HashMap::default(),
            depth_cache: HashSet::default(),
            contains_draw: false,
            pipeline: Pipeline::Render,
            submitted_pipeline: Pipeline::Render,
            lost: false,
            submissions: 0,
            workaround_bo,
            sink,
        }
    }

    #[inline]
    pub fn hw(&self) -> Gen {
        self.hw
    }

    /// Returns the words recorded since the last flush.
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Returns the number of bytes recorded since the last flush.
    #[inline]
    pub fn used(&self) -> usize {
        self.words.len() * 4
    }

    /// Returns whether a draw or dispatch was recorded since the last flush.
    #[inline]
    pub fn contains_draw(&self) -> bool {
        self.contains_draw
    }

    #[inline]
    pub fn set_contains_draw(&mut self) {
        self.contains_draw = true;
    }

    /// Returns the pipeline the recorded commands target.
    #[inline]
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn set_pipeline(&mut self, pipeline: Pipeline) {
        self.pipeline = pipeline;
    }

    /// Returns whether a submission failed since the last call, and resets the flag.
    ///
    /// State encoded into a failed batch never reached the hardware, so whoever cleared its
    /// dirty bits has to encode it again.
    #[inline]
    pub fn take_lost(&mut self) -> bool {
        mem::take(&mut self.lost)
    }

    /// Returns the number of batches submitted so far.
    #[inline]
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    #[inline]
    pub fn workaround_bo(&self) -> &Arc<Bo> {
        &self.workaround_bo
    }

    /// Appends encoded command words.
    #[inline]
    pub fn emit(&mut self, words: &[u32]) {
        debug_assert!(!words.is_empty());

        self.words.extend_from_slice(words);
    }

    /// Flushes the batch first if `bytes` more would not fit.
    pub fn require_space(&mut self, bytes: usize) -> Result<(), SubmitError> {
        if self.used() + bytes > self.size - BATCH_RESERVED {
            self.flush()?;
        }

        Ok(())
    }

    /// Adds `bo` to the validation list. Adding a BO twice keeps a single entry, writable if
    /// either use was.
    pub fn use_bo(&mut self, bo: &Arc<Bo>, writable: bool) {
        match self.validation_index.get(&bo.id()) {
            Some(&index) => self.validation[index].writable |= writable,
            None => {
                self.validation_index
                    .insert(bo.id(), self.validation.len());
                self.validation.push(ValidationEntry {
                    bo: bo.clone(),
                    writable,
                });
            }
        }
    }

    /// Returns whether the pending commands refer to `bo`.
    #[inline]
    pub fn references(&self, bo: &Bo) -> bool {
        self.validation_index.contains_key(&bo.id())
    }

    /// Returns the validation list of the pending commands.
    #[inline]
    pub fn validation(&self) -> &[ValidationEntry] {
        &self.validation
    }

    /// Submits the recorded commands.
    ///
    /// Does nothing if nothing was recorded. The batch is reset even if the sink fails, in
    /// which case the recorded work is lost, the pipeline reverts to the one the last
    /// successful submission left selected, and [`take_lost`](Self::take_lost) reports it.
    pub fn flush(&mut self) -> Result<(), SubmitError> {
        if self.words.is_empty() {
            return Ok(());
        }

        self.words.extend(pack::<MiBatchBufferEnd>(self.hw, |_| {}));

        if self.words.len() % 2 != 0 {
            self.words.extend(pack::<MiNoop>(self.hw, |_| {}));
        }

        let submission = Submission {
            words: mem::replace(&mut self.words, Vec::with_capacity(self.size / 4)),
            validation: mem::take(&mut self.validation),
        };

        self.validation_index.clear();
        self.render_cache.clear();
        self.depth_cache.clear();
        self.contains_draw = false;
        self.submissions += 1;

        tracing::debug!(
            words = submission.words.len(),
            bos = submission.validation.len(),
            submission = self.submissions,
            "submitting batch",
        );

        match self.sink.exec(submission) {
            Ok(()) => {
                self.submitted_pipeline = self.pipeline;

                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, submission = self.submissions, "batch submission failed");

                self.pipeline = self.submitted_pipeline;
                self.lost = true;

                Err(err)
            }
        }
    }

    /// Records that `bo` was rendered to with the given format.
    #[inline]
    pub fn render_cache_add_bo(&mut self, bo: &Bo, format: u32) {
        self.render_cache.insert(bo.id(), format);
    }

    /// Records that `bo` was used as a depth or stencil buffer.
    #[inline]
    pub fn depth_cache_add_bo(&mut self, bo: &Bo) {
        self.depth_cache.insert(bo.id());
    }

    /// Makes prior rendering to `bo` visible to reads through the texture or constant caches.
    pub fn cache_flush_for_read(&mut self, bo: &Bo) {
        if self.render_cache.contains_key(&bo.id()) || self.depth_cache.contains(&bo.id()) {
            self.cache_flush_render();
        }
    }

    /// Prepares `bo` to be rendered to with `format`.
    ///
    /// The render cache is keyed by format, so rendering to the same BO with a different
    /// format, or after using it as a depth buffer, needs a flush.
    pub fn cache_flush_for_render(&mut self, bo: &Bo, format: u32) {
        if self.depth_cache.contains(&bo.id()) {
            self.cache_flush_render();
        }

        if self
            .render_cache
            .get(&bo.id())
            .is_some_and(|&cached| cached != format)
        {
            self.cache_flush_render();
        }
    }

    /// Prepares `bo` to be used as a depth buffer.
    pub fn cache_flush_for_depth(&mut self, bo: &Bo) {
        if self.render_cache.contains_key(&bo.id()) {
            self.cache_flush_render();
        }
    }

    /// Flushes the render and depth caches, then invalidates the caches reads go through.
    pub fn cache_flush_render(&mut self) {
        self.emit_pipe_control_flush(
            PipeControlFlags::DEPTH_CACHE_FLUSH
                | PipeControlFlags::RENDER_TARGET_FLUSH
                | PipeControlFlags::CS_STALL,
        );
        self.emit_pipe_control_flush(
            PipeControlFlags::TEXTURE_CACHE_INVALIDATE | PipeControlFlags::CONST_CACHE_INVALIDATE,
        );

        self.render_cache.clear();
        self.depth_cache.clear();
    }
}

impl RegionUser for Batch {
    fn drain(&mut self, old: &Arc<Bo>) -> Result<(), SubmitError> {
        if self.references(old) {
            self.flush()?;
        }

        Ok(())
    }

    #[inline]
    fn reference(&mut self, bo: &Arc<Bo>) {
        self.use_bo(bo, false);
    }
}
