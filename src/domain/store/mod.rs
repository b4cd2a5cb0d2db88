//! Undo-tracked ordered collection of user segments
//!
//! Every mutation commits a new immutable snapshot to a bounded history log.
//! Undo and redo only move the cursor; committing after an undo drops the
//! redo tail.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::domain::model::{Segment, SegmentDraft, SegmentId};
use crate::error::{SegcutError, SegcutResult};

/// Default number of undo steps kept
pub const DEFAULT_UNDO_DEPTH: usize = 100;

/// New bounds for one segment, as produced by keyframe alignment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsUpdate {
    pub id: SegmentId,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

type Snapshot = Arc<Vec<Segment>>;

/// Segment store for one opened media file
#[derive(Debug)]
pub struct SegmentStore {
    history: VecDeque<Snapshot>,
    cursor: usize,
    depth: usize,
    next_id: u64,
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_DEPTH)
    }
}

impl SegmentStore {
    /// Empty timeline (one placeholder) with the given undo depth
    pub fn new(depth: usize) -> Self {
        let mut store = Self {
            history: VecDeque::new(),
            cursor: 0,
            depth: depth.max(1),
            next_id: 0,
        };
        let placeholder = Segment::placeholder(store.allocate_id());
        store.history.push_back(Arc::new(vec![placeholder]));
        store
    }

    /// Current segments in user order
    pub fn segments(&self) -> &[Segment] {
        &self.history[self.cursor]
    }

    /// Current snapshot, cheap to hand to another task
    pub fn snapshot(&self) -> Arc<Vec<Segment>> {
        Arc::clone(&self.history[self.cursor])
    }

    /// Look up a segment by id
    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.segments().iter().find(|s| s.id == id)
    }

    /// Number of segments, placeholder included
    pub fn len(&self) -> usize {
        self.segments().len()
    }

    /// True when the timeline holds only the placeholder
    pub fn is_empty(&self) -> bool {
        matches!(self.segments(), [only] if only.is_placeholder())
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.history.len()
    }

    /// Step back one mutation; false when nothing to undo
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        true
    }

    /// Re-apply an undone mutation; false when nothing to redo
    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Append a segment; an untouched placeholder is replaced
    pub fn add(&mut self, draft: SegmentDraft) -> SegcutResult<SegmentId> {
        if let Some(problem) = draft.problem() {
            return Err(SegcutError::validation(problem));
        }
        let id = self.allocate_id();
        let segment = Self::from_draft(id, draft);

        let mut next = if self.is_empty() {
            Vec::new()
        } else {
            self.segments().to_vec()
        };
        next.push(segment);
        self.commit(next);
        Ok(id)
    }

    /// Remove a segment; removing the last one leaves a fresh placeholder
    pub fn remove(&mut self, id: SegmentId) -> SegcutResult<()> {
        let position = self.position(id)?;
        let mut next = self.segments().to_vec();
        next.remove(position);
        if next.is_empty() {
            next.push(Segment::placeholder(self.allocate_id()));
        }
        self.commit(next);
        Ok(())
    }

    /// Split a segment at `at`; the right half gets a new id
    pub fn split(&mut self, id: SegmentId, at: f64, duration: Option<f64>) -> SegcutResult<SegmentId> {
        let position = self.position(id)?;
        let original = self.segments()[position].clone();
        let start = original.apparent_start();
        let end = original.apparent_end(duration).ok_or_else(|| {
            SegcutError::validation(format!("{} has no resolved end to split", id))
        })?;
        if at <= start || at >= end {
            return Err(SegcutError::validation(format!(
                "split point {} is outside {} [{}, {})",
                at, id, start, end
            )));
        }

        let right_id = self.allocate_id();
        let right = Segment {
            id: right_id,
            start: Some(at),
            end: original.end,
            ..original.clone()
        };
        let left = Segment {
            start: Some(start),
            end: Some(at),
            ..original
        };

        let mut next = self.segments().to_vec();
        next[position] = left;
        next.insert(position + 1, right);
        self.commit(next);
        Ok(right_id)
    }

    /// Rename a segment
    pub fn set_name(&mut self, id: SegmentId, name: impl Into<String>) -> SegcutResult<()> {
        let name = name.into();
        self.update(id, |seg| seg.name = name)
    }

    /// Set (`Some`) or delete (`None`) a tag
    pub fn set_tag(&mut self, id: SegmentId, key: &str, value: Option<String>) -> SegcutResult<()> {
        if key.trim().is_empty() {
            return Err(SegcutError::validation("tag key must not be empty"));
        }
        self.update(id, |seg| match value {
            Some(value) => {
                seg.tags.insert(key.to_string(), value);
            }
            None => {
                seg.tags.remove(key);
            }
        })
    }

    /// Toggle export selection for one segment
    pub fn set_selected(&mut self, id: SegmentId, selected: bool) -> SegcutResult<()> {
        self.update(id, |seg| seg.selected = selected)
    }

    /// Select or deselect every segment in one step
    pub fn select_all(&mut self, selected: bool) {
        let next = self
            .segments()
            .iter()
            .cloned()
            .map(|mut seg| {
                seg.selected = selected;
                seg
            })
            .collect();
        self.commit(next);
    }

    /// Move a segment to `new_index` in user order
    pub fn reorder(&mut self, id: SegmentId, new_index: usize) -> SegcutResult<()> {
        let position = self.position(id)?;
        if new_index >= self.len() {
            return Err(SegcutError::validation(format!(
                "index {} out of range for {} segment(s)",
                new_index,
                self.len()
            )));
        }
        let mut next = self.segments().to_vec();
        let seg = next.remove(position);
        next.insert(new_index, seg);
        self.commit(next);
        Ok(())
    }

    /// Shift every resolved bound by `delta`, clamped to `[0, duration]`.
    ///
    /// Fails without committing when a segment would collapse; open bounds
    /// count as `0` and `duration`.
    pub fn shift(&mut self, delta: f64, duration: Option<f64>) -> SegcutResult<()> {
        let clamp = |t: f64| {
            let t = t.max(0.0);
            match duration {
                Some(d) => t.min(d),
                None => t,
            }
        };

        let mut next = self.segments().to_vec();
        for seg in next.iter_mut().filter(|s| !s.is_placeholder()) {
            seg.start = seg.start.map(|t| clamp(t + delta));
            seg.end = seg.end.map(|t| clamp(t + delta));
            if let Some(end) = seg.apparent_end(duration) {
                if seg.apparent_start() >= end {
                    return Err(SegcutError::validation(format!(
                        "shifting by {} collapses {}",
                        delta, seg.id
                    )));
                }
            }
        }
        self.commit(next);
        Ok(())
    }

    /// Set both bounds of one segment
    pub fn set_bounds(&mut self, id: SegmentId, start: Option<f64>, end: Option<f64>) -> SegcutResult<()> {
        if let Some(problem) = SegmentDraft::new(start, end).problem() {
            return Err(SegcutError::validation(format!("{}: {}", id, problem)));
        }
        self.update(id, |seg| {
            seg.start = start;
            seg.end = end;
        })
    }

    /// Apply keyframe-aligned bounds as a single undo step
    pub fn apply_alignment(&mut self, updates: &[BoundsUpdate]) -> SegcutResult<()> {
        let mut next = self.segments().to_vec();
        for update in updates {
            let seg = next
                .iter_mut()
                .find(|s| s.id == update.id)
                .ok_or_else(|| unknown(update.id))?;
            if let Some(problem) = SegmentDraft::new(update.start, update.end).problem() {
                return Err(SegcutError::validation(format!("{}: {}", update.id, problem)));
            }
            seg.start = update.start;
            seg.end = update.end;
        }
        self.commit(next);
        Ok(())
    }

    /// Replace all segments, e.g. after an import
    pub fn replace_all(&mut self, drafts: Vec<SegmentDraft>) -> SegcutResult<Vec<SegmentId>> {
        if drafts.is_empty() {
            return Err(SegcutError::validation("no segments to import"));
        }
        if let Some(problem) = drafts.iter().find_map(SegmentDraft::problem) {
            return Err(SegcutError::validation(problem));
        }

        let next: Vec<Segment> = drafts
            .into_iter()
            .map(|draft| Self::from_draft(self.allocate_id(), draft))
            .collect();
        let ids = next.iter().map(|s| s.id).collect();
        self.commit(next);
        Ok(ids)
    }

    /// Reset to a single placeholder
    pub fn clear(&mut self) {
        let placeholder = Segment::placeholder(self.allocate_id());
        self.commit(vec![placeholder]);
    }

    fn from_draft(id: SegmentId, draft: SegmentDraft) -> Segment {
        Segment {
            id,
            start: draft.start,
            end: draft.end,
            name: draft.name,
            tags: draft.tags,
            selected: true,
        }
    }

    fn allocate_id(&mut self) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        id
    }

    fn position(&self, id: SegmentId) -> SegcutResult<usize> {
        self.segments()
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| unknown(id))
    }

    fn update<F>(&mut self, id: SegmentId, apply: F) -> SegcutResult<()>
    where
        F: FnOnce(&mut Segment),
    {
        let position = self.position(id)?;
        let mut next = self.segments().to_vec();
        apply(&mut next[position]);
        self.commit(next);
        Ok(())
    }

    fn commit(&mut self, segments: Vec<Segment>) {
        self.history.truncate(self.cursor + 1);
        self.history.push_back(Arc::new(segments));
        while self.history.len() > self.depth + 1 {
            self.history.pop_front();
        }
        self.cursor = self.history.len() - 1;
        debug!(
            segments = self.segments().len(),
            history = self.history.len(),
            "Segment store committed"
        );
    }
}

fn unknown(id: SegmentId) -> SegcutError {
    SegcutError::validation(format!("unknown segment {}", id))
}
