use std::ops::Range;

/// Number of key positions the layout table covers.
pub const MAX_KEYS: usize = 256;

/// Black keys are this fraction of a white key wide.
const BLACK_KEY_WIDTH: f64 = 0.6;

pub fn is_black_key(key: usize) -> bool {
    matches!(key % 12, 1 | 3 | 6 | 8 | 10)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeySlot {
    pub is_black: bool,
    /// Position among keys of the same color, counted from key 0.
    pub color_index: usize,
    pub x: f64,
    pub width: f64,
}

impl KeySlot {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyLayout {
    first_key: usize,
    last_key: usize,
    slots: Vec<KeySlot>,
}

impl KeyLayout {
    pub fn visible_keys(&self) -> Range<usize> {
        self.first_key..self.last_key
    }

    pub fn slot(&self, key: usize) -> &KeySlot {
        &self.slots[key]
    }
}

// Offset multiplier for each of the five black keys of an octave (C#, D#, F#, G#, A#).
// The outer keys of each group lean outwards.
fn black_key_offset_factor(black_index: usize) -> f64 {
    match black_index % 5 {
        0 | 2 => 1.3,
        1 | 4 => 0.7,
        _ => 1.0,
    }
}

/// Lays out every key of the table so that the visible range `[first_key, last_key)`
/// spans `[0, 1]` horizontally. A black key at either edge widens the span by half a
/// white key on that side so it is not cut in half.
pub fn compute_key_layout(first_key: usize, last_key: usize) -> KeyLayout {
    let last_key = last_key.min(MAX_KEYS);
    let first_key = first_key.min(last_key);

    // One extra entry so the black key at the top of the table can look at its right neighbour.
    let mut color_index = [0usize; MAX_KEYS + 1];
    let (mut blacks, mut whites) = (0, 0);
    for (key, index) in color_index.iter_mut().enumerate() {
        if is_black_key(key) {
            *index = blacks;
            blacks += 1;
        } else {
            *index = whites;
            whites += 1;
        }
    }

    if first_key == last_key {
        let slots = (0..MAX_KEYS)
            .map(|key| KeySlot {
                is_black: is_black_key(key),
                color_index: color_index[key],
                x: 0.0,
                width: 0.0,
            })
            .collect();
        return KeyLayout {
            first_key,
            last_key,
            slots,
        };
    }

    // Key 0 is white, so a black first key always has a white key below it.
    let span_start = if is_black_key(first_key) {
        color_index[first_key - 1] as f64 + 0.5
    } else {
        color_index[first_key] as f64
    };
    let span_end = if is_black_key(last_key - 1) {
        color_index[last_key] as f64 - 0.5
    } else {
        color_index[last_key - 1] as f64
    };
    let span = span_end - span_start + 1.0;

    let slots = (0..MAX_KEYS)
        .map(|key| {
            if is_black_key(key) {
                let width = BLACK_KEY_WIDTH / span;
                let offset = width / 2.0 * black_key_offset_factor(color_index[key]);
                KeySlot {
                    is_black: true,
                    color_index: color_index[key],
                    x: (color_index[key + 1] as f64 - span_start) / span - offset,
                    width,
                }
            } else {
                KeySlot {
                    is_black: false,
                    color_index: color_index[key],
                    x: (color_index[key] as f64 - span_start) / span,
                    width: 1.0 / span,
                }
            }
        })
        .collect();

    KeyLayout {
        first_key,
        last_key,
        slots,
    }
}

/// Keeps the last computed layout; it only changes with the visible range.
#[derive(Default)]
pub struct KeyLayoutCache {
    cached: Option<KeyLayout>,
}

impl KeyLayoutCache {
    pub fn get(&mut self, first_key: usize, last_key: usize) -> &KeyLayout {
        let last_key = last_key.min(MAX_KEYS);
        let first_key = first_key.min(last_key);
        let stale = match &self.cached {
            Some(layout) => layout.visible_keys() != (first_key..last_key),
            None => true,
        };
        if stale {
            self.cached = Some(compute_key_layout(first_key, last_key));
        }
        self.cached.get_or_insert_with(|| compute_key_layout(first_key, last_key))
    }
}
