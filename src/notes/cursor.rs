use super::Note;

/// How playback time moved since the previous frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeDirection {
    Forward,
    Backward,
    Unchanged,
}

impl TimeDirection {
    pub fn between(previous: f64, current: f64) -> Self {
        if current > previous {
            TimeDirection::Forward
        } else if current < previous {
            TimeDirection::Backward
        } else {
            TimeDirection::Unchanged
        }
    }
}

/// Per-key scan position. Every note before `last_index` has ended at the time of the
/// last update; notes from `last_index` on may still be on screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VisibilityCursor {
    last_index: usize,
}

impl VisibilityCursor {
    #[cfg(test)]
    pub fn index(&self) -> usize {
        self.last_index
    }

    /// Moves the cursor to `time` and returns the index streaming should start from.
    ///
    /// Going forward only walks over the notes that ended since the previous frame.
    /// Going backward the old position says nothing about the new one, so the key is
    /// rescanned from its first note.
    pub fn update(&mut self, notes: &[Note], time: f64, direction: TimeDirection) -> usize {
        match direction {
            TimeDirection::Forward => {
                let from = self.last_index.min(notes.len());
                self.last_index = first_unexpired(notes, from, time);
            }
            TimeDirection::Backward => {
                self.last_index = first_unexpired(notes, 0, time);
            }
            TimeDirection::Unchanged => {}
        }
        self.last_index.min(notes.len())
    }
}

fn first_unexpired(notes: &[Note], from: usize, time: f64) -> usize {
    notes[from..]
        .iter()
        .position(|note| note.end > time)
        .map_or(notes.len(), |offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(start: f64, end: f64) -> Note {
        Note {
            start,
            end,
            color_pointer: 0,
        }
    }

    fn full_scan(notes: &[Note], time: f64) -> usize {
        notes
            .iter()
            .position(|n| n.end > time)
            .unwrap_or(notes.len())
    }

    fn staircase(count: usize) -> Vec<Note> {
        (0..count)
            .map(|i| note(i as f64 * 0.5, i as f64 * 0.5 + 0.75))
            .collect()
    }

    #[test]
    fn direction_from_times() {
        assert_eq!(TimeDirection::between(1.0, 2.0), TimeDirection::Forward);
        assert_eq!(TimeDirection::between(2.0, 1.0), TimeDirection::Backward);
        assert_eq!(TimeDirection::between(1.0, 1.0), TimeDirection::Unchanged);
        assert_eq!(TimeDirection::between(f64::NEG_INFINITY, 0.0), TimeDirection::Forward);
        assert_eq!(TimeDirection::between(f64::INFINITY, 0.0), TimeDirection::Backward);
    }

    #[test]
    fn forward_steps_are_monotonic_and_never_skip_live_notes() {
        let notes = staircase(200);
        let mut cursor = VisibilityCursor::default();
        let mut previous_time = f64::NEG_INFINITY;
        let mut previous_index = 0;

        for frame in 0..400 {
            let time = frame as f64 * 0.37 - 3.0;
            let index = cursor.update(&notes, time, TimeDirection::between(previous_time, time));
            assert!(index >= previous_index, "cursor moved back at t={time}");
            assert!(
                notes[..index].iter().all(|n| n.end <= time),
                "cursor skipped a live note at t={time}"
            );
            assert_eq!(index, full_scan(&notes, time));
            previous_time = time;
            previous_index = index;
        }
    }

    #[test]
    fn backward_seek_matches_full_scan_regardless_of_prior_position() {
        let notes = staircase(50);
        for start_time in [3.0, 10.0, 24.0, 100.0] {
            let mut cursor = VisibilityCursor::default();
            cursor.update(&notes, start_time, TimeDirection::Forward);
            for seek_time in [-1.0, 0.0, 0.74, 0.75, 2.2, start_time - 0.1] {
                let mut seeked = cursor;
                let index = seeked.update(&notes, seek_time, TimeDirection::Backward);
                assert_eq!(index, full_scan(&notes, seek_time), "seek {start_time} -> {seek_time}");
            }
        }
    }

    #[test]
    fn unchanged_time_does_not_scan() {
        let notes = staircase(10);
        let mut cursor = VisibilityCursor { last_index: 3 };
        assert_eq!(cursor.update(&notes, 100.0, TimeDirection::Unchanged), 3);
        assert_eq!(cursor.index(), 3);
    }

    #[test]
    fn empty_key_stays_at_zero() {
        let mut cursor = VisibilityCursor::default();
        assert_eq!(cursor.update(&[], 5.0, TimeDirection::Forward), 0);
        assert_eq!(cursor.update(&[], 1.0, TimeDirection::Backward), 0);
    }

    #[test]
    fn cursor_passes_the_end_once_everything_expired() {
        let notes = staircase(4);
        let mut cursor = VisibilityCursor::default();
        assert_eq!(cursor.update(&notes, 1000.0, TimeDirection::Forward), notes.len());
        assert_eq!(cursor.index(), notes.len());
    }

    #[test]
    fn stale_index_past_the_end_is_clamped() {
        let notes = staircase(2);
        let mut cursor = VisibilityCursor { last_index: 99 };
        assert_eq!(cursor.update(&notes, 0.0, TimeDirection::Unchanged), notes.len());
        assert_eq!(cursor.update(&notes, 0.1, TimeDirection::Forward), notes.len());
        assert_eq!(cursor.update(&notes, 0.1, TimeDirection::Backward), 0);
    }

    #[test]
    fn note_ending_exactly_now_is_expired() {
        let notes = [note(1.0, 2.0), note(2.5, 3.0)];
        let mut cursor = VisibilityCursor::default();
        assert_eq!(cursor.update(&notes, 2.0, TimeDirection::Forward), 1);
    }
}
