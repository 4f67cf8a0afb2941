//! Bounded history of past iterates for vector extrapolation.

use crate::field::FieldSet;

/// One outer iteration's snapshot of the mixed variable and, once mixing has
/// run, the residual computed against it.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub snapshot: FieldSet,
    pub residual: Option<FieldSet>,
}

/// Ordered history of past iterates, oldest first, capped at the configured
/// depth. Appending at capacity clears the whole buffer first: the
/// extrapolation restarts from scratch instead of sliding the window, which
/// measurably changes convergence behavior and is kept on purpose.
#[derive(Debug)]
pub struct HistoryBuffer {
    entries: Vec<HistoryEntry>,
    depth: usize,
}

impl HistoryBuffer {
    pub fn new(depth: usize) -> Self {
        assert!(depth >= 1, "history depth must be at least 1");
        HistoryBuffer {
            entries: Vec::with_capacity(depth),
            depth,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.depth
    }

    /// Append a snapshot. Returns true when the buffer was full and had to
    /// be reset before the append, so the caller can clear the overlap
    /// matrix in lockstep.
    pub fn push(&mut self, snapshot: FieldSet) -> bool {
        let reset = self.is_full();
        if reset {
            self.entries.clear();
        }
        self.entries.push(HistoryEntry {
            snapshot,
            residual: None,
        });
        reset
    }

    /// Attach the residual computed for the most recent snapshot.
    pub fn attach_residual(&mut self, residual: FieldSet) {
        if let Some(entry) = self.entries.last_mut() {
            entry.residual = Some(residual);
        }
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Residuals in push order; entries still waiting for one are skipped.
    pub fn residuals(&self) -> Vec<&FieldSet> {
        self.entries
            .iter()
            .filter_map(|entry| entry.residual.as_ref())
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn field(v: f64) -> FieldSet {
        FieldSet::primary_only(DVector::from_element(3, v))
    }

    #[test]
    fn push_at_capacity_resets_to_one_entry() {
        let mut history = HistoryBuffer::new(3);
        assert!(!history.push(field(0.0)));
        assert!(!history.push(field(1.0)));
        assert!(!history.push(field(2.0)));
        assert!(history.is_full());

        let reset = history.push(field(3.0));
        assert!(reset);
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().snapshot, field(3.0));
    }

    #[test]
    fn length_never_exceeds_depth() {
        let mut history = HistoryBuffer::new(4);
        for i in 0..25 {
            history.push(field(i as f64));
            assert!(history.len() <= 4);
        }
    }

    #[test]
    fn residuals_follow_push_order() {
        let mut history = HistoryBuffer::new(3);
        history.push(field(1.0));
        history.attach_residual(field(10.0));
        history.push(field(2.0));
        history.attach_residual(field(20.0));
        history.push(field(3.0));

        let residuals = history.residuals();
        assert_eq!(residuals.len(), 2);
        assert_eq!(*residuals[0], field(10.0));
        assert_eq!(*residuals[1], field(20.0));

        history.attach_residual(field(30.0));
        assert_eq!(history.residuals().len(), 3);
    }
}
