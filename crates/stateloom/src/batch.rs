//! Batch context: several mutation steps committed as one operation.

use crate::patch::Patch;

/// Restricted mutation API handed to a [`crate::Store::batch`] callback.
///
/// Steps apply to a draft immediately, so each step sees the previous
/// one. Nothing reaches the store until the callback returns and the
/// pipeline has run once over the accumulated draft.
#[derive(Debug)]
pub struct Batch<S> {
    draft: S,
    steps: usize,
    replaced: bool,
}

impl<S> Batch<S> {
    pub(crate) fn new(draft: S) -> Self {
        Self {
            draft,
            steps: 0,
            replaced: false,
        }
    }

    /// Current accumulated state.
    pub fn state(&self) -> &S {
        &self.draft
    }

    pub fn update<F>(&mut self, reducer: F) -> &mut Self
    where
        F: FnOnce(&S) -> S,
    {
        self.draft = reducer(&self.draft);
        self.steps += 1;
        self
    }

    pub fn try_update<F>(&mut self, reducer: F) -> anyhow::Result<&mut Self>
    where
        F: FnOnce(&S) -> anyhow::Result<S>,
    {
        self.draft = reducer(&self.draft)?;
        self.steps += 1;
        Ok(self)
    }

    pub fn set(&mut self, state: S) -> &mut Self {
        self.draft = state;
        self.steps += 1;
        self.replaced = true;
        self
    }

    pub fn patch<P>(&mut self, partial: P) -> &mut Self
    where
        S: Patch<P>,
    {
        self.draft = self.draft.patched(partial);
        self.steps += 1;
        self
    }

    /// Number of steps applied so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Consume the batch: `(draft, steps, whether a set step ran)`.
    pub(crate) fn finish(self) -> (S, usize, bool) {
        (self.draft, self.steps, self.replaced)
    }
}
