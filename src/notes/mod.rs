pub mod cursor;
pub mod streamer;

use crate::gpu::types::NoteColor;

/// A note on one key, in seconds. Each key's notes are sorted by `start`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Note {
    pub start: f64,
    pub end: f64,
    pub color_pointer: usize,
}

/// Read-only access to the loaded notes, shared by every per-key worker.
pub trait NoteSource: Sync {
    fn key_count(&self) -> usize;

    /// Notes of `key` sorted ascending by start. Empty for keys the source does not have.
    fn notes(&self, key: usize) -> &[Note];

    /// Palette lookup. Panics on a pointer the source never handed out.
    fn color(&self, color_pointer: usize) -> NoteColor;
}
