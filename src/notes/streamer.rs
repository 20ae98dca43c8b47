use std::iter::FusedIterator;
use std::ops::AddAssign;

use bytemuck::Zeroable;

use super::{Note, NoteSource};
use crate::gpu::types::RenderNote;

/// The slice of time one frame shows: `[time, time + window)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameWindow {
    pub time: f64,
    pub window: f64,
    pub render_cutoff: f64,
    pub max_note_length: Option<f64>,
}

impl FrameWindow {
    pub fn new(time: f64, window: f64) -> Self {
        Self {
            time,
            window,
            render_cutoff: time + window,
            max_note_length: None,
        }
    }

    pub fn with_max_note_length(mut self, max_note_length: Option<f64>) -> Self {
        self.max_note_length = max_note_length;
        self
    }

    fn to_render_space(&self, seconds: f64) -> f32 {
        ((seconds - self.time) / self.window) as f32
    }
}

/// Lazily maps one key's notes, starting at its cursor, into render space.
pub struct VisibleNotes<'a, S: NoteSource + ?Sized> {
    notes: &'a [Note],
    next: usize,
    frame: FrameWindow,
    source: &'a S,
}

pub fn visible_notes<'a, S: NoteSource + ?Sized>(
    notes: &'a [Note],
    cursor_index: usize,
    frame: FrameWindow,
    source: &'a S,
) -> VisibleNotes<'a, S> {
    VisibleNotes {
        notes,
        next: cursor_index.min(notes.len()),
        frame,
        source,
    }
}

impl<S: NoteSource + ?Sized> Iterator for VisibleNotes<'_, S> {
    type Item = RenderNote;

    fn next(&mut self) -> Option<RenderNote> {
        while let Some(note) = self.notes.get(self.next) {
            // sorted by start: nothing after this one can be on screen either
            if note.start >= self.frame.render_cutoff {
                self.next = self.notes.len();
                return None;
            }
            self.next += 1;

            if note.end < self.frame.time {
                continue;
            }
            if let Some(max) = self.frame.max_note_length {
                if note.end - note.start > max {
                    continue;
                }
            }

            return Some(RenderNote {
                start: self.frame.to_render_space(note.start),
                end: self.frame.to_render_space(note.end),
                color: self.source.color(note.color_pointer),
            });
        }
        None
    }
}

impl<S: NoteSource + ?Sized> FusedIterator for VisibleNotes<'_, S> {}

/// Fixed-capacity scratch buffer for one flush worth of notes. Never grows.
pub struct NoteBatch {
    notes: Box<[RenderNote]>,
    len: usize,
}

impl NoteBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            notes: vec![RenderNote::zeroed(); capacity.max(1)].into_boxed_slice(),
            len: 0,
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.notes.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.notes.len()
    }

    /// Appends a note and reports whether the batch is now full.
    pub fn push(&mut self, note: RenderNote) -> bool {
        debug_assert!(!self.is_full(), "push into a full NoteBatch");
        self.notes[self.len] = note;
        self.len += 1;
        self.is_full()
    }

    pub fn as_slice(&self) -> &[RenderNote] {
        &self.notes[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub notes: usize,
    pub flushes: usize,
}

impl AddAssign for StreamStats {
    fn add_assign(&mut self, other: StreamStats) {
        self.notes += other.notes;
        self.flushes += other.flushes;
    }
}

/// Drains `notes` through `batch`, calling `flush` for every full batch and once more
/// for the remainder. Memory use is bounded by the batch capacity.
pub fn stream_notes<I, F>(notes: I, batch: &mut NoteBatch, mut flush: F) -> anyhow::Result<StreamStats>
where
    I: IntoIterator<Item = RenderNote>,
    F: FnMut(&[RenderNote]) -> anyhow::Result<()>,
{
    let mut stats = StreamStats::default();
    batch.clear();

    for note in notes {
        stats.notes += 1;
        if batch.push(note) {
            flush(batch.as_slice())?;
            stats.flushes += 1;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        flush(batch.as_slice())?;
        stats.flushes += 1;
        batch.clear();
    }

    Ok(stats)
}
