use crate::error::{Cancelled, IndexError, UpdateError};
use crate::ids::InputId;
use crate::index::MapReduceIndex;
use crate::indexer::DataIndexer;
use rayon::prelude::*;
use std::borrow::Borrow;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Outcome of [`MapReduceIndex::rebuild_from`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub inputs: usize,
    /// Inputs whose commit changed the index.
    pub changed: usize,
    /// Inputs whose indexer failed; they contribute no data.
    pub failed: usize,
    /// `false` when a rebuild was requested while this one ran, typically
    /// because a commit failed; the index stays in
    /// [`crate::RebuildStatus::RequiresRebuild`].
    pub completed: bool,
}

impl<I, C> MapReduceIndex<I, C>
where
    I: DataIndexer<C>,
    C: ?Sized + Sync,
{
    /// Clears the index and re-indexes `inputs` in parallel.
    ///
    /// On success the index is flushed and its status returns to
    /// [`crate::RebuildStatus::Ok`]. Cancellation, or any rebuild request
    /// raised meanwhile (see [`RebuildReport::completed`]), leaves it in
    /// [`crate::RebuildStatus::RequiresRebuild`].
    pub fn rebuild_from<S>(
        &self,
        inputs: &[(InputId, S)],
        cancel: &CancellationToken,
    ) -> Result<RebuildReport, IndexError>
    where
        S: Borrow<C> + Sync,
    {
        if !self.begin_rebuild() {
            return Err(IndexError::RebuildInProgress {
                index: self.id().clone(),
            });
        }

        tracing::info!(
            target = "nova.index",
            index = %self.id(),
            inputs = inputs.len(),
            "rebuilding index"
        );

        if let Err(err) = self.clear() {
            return Err(err.into());
        }

        let changed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let outcome = inputs.par_iter().try_for_each(|(input, content)| {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            let content = <S as Borrow<C>>::borrow(content);
            match self.update(*input, Some(content), cancel) {
                Ok(commit) => {
                    if commit.apply()? {
                        changed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                }
                Err(UpdateError::Cancelled) => Err(Cancelled),
                Err(err) => {
                    tracing::warn!(
                        target = "nova.index",
                        index = %self.id(),
                        input_id = input.get(),
                        error = %err,
                        "skipping input during rebuild"
                    );
                    failed.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            }
        });

        if outcome.is_err() {
            self.request_rebuild("rebuild cancelled");
            return Err(IndexError::Cancelled);
        }

        self.flush()?;
        let completed = self.finish_rebuild();

        let report = RebuildReport {
            inputs: inputs.len(),
            changed: changed.into_inner(),
            failed: failed.into_inner(),
            completed,
        };
        if completed {
            tracing::info!(
                target = "nova.index",
                index = %self.id(),
                changed = report.changed,
                failed = report.failed,
                "index rebuilt"
            );
        } else {
            tracing::warn!(
                target = "nova.index",
                index = %self.id(),
                changed = report.changed,
                failed = report.failed,
                "index rebuild finished but the index still requires a rebuild"
            );
        }
        Ok(report)
    }
}
