use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::Context;
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use crate::gpu::types::NoteColor;
use crate::notes::{Note, NoteSource};

pub const MIDI_KEYS: usize = 128;
const MIDI_CHANNELS: usize = 16;
// 120 BPM until the first tempo event.
const DEFAULT_MICROS_PER_QUARTER: f64 = 500_000.0;

/// Notes of a loaded MIDI file, bucketed per key, with one palette entry per
/// (track, channel).
pub struct MidiNotes {
    keys: Vec<Vec<Note>>,
    palette: Vec<NoteColor>,
    note_count: usize,
    length_seconds: f64,
}

impl MidiNotes {
    /// Wraps notes that are already bucketed per key and sorted by start.
    pub fn from_keys(keys: Vec<Vec<Note>>, palette: Vec<NoteColor>) -> Self {
        let note_count = keys.iter().map(Vec::len).sum();
        let length_seconds = keys
            .iter()
            .flatten()
            .map(|note| note.end)
            .fold(0.0, f64::max);
        Self {
            keys,
            palette,
            note_count,
            length_seconds,
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let notes =
            Self::parse(&bytes).with_context(|| format!("loading notes from {}", path.display()))?;
        log!(
            "[midi] loaded {}: {} notes, {:.1}s",
            path.display(),
            notes.note_count,
            notes.length_seconds
        );
        Ok(notes)
    }

    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        let smf = Smf::parse(bytes).context("invalid standard MIDI file")?;
        let tempo_map = TempoMap::new(&smf);

        let mut keys: Vec<Vec<Note>> = vec![Vec::new(); MIDI_KEYS];
        for (track_index, track) in smf.tracks.iter().enumerate() {
            // Overlapping notes on the same key and channel are paired first-in first-out.
            let mut open: HashMap<(u8, u8), VecDeque<u64>> = HashMap::new();
            let mut tick: u64 = 0;

            for event in track {
                tick += event.delta.as_int() as u64;
                let TrackEventKind::Midi { channel, message } = &event.kind else {
                    continue;
                };
                let channel = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        open.entry((channel, key.as_int()))
                            .or_default()
                            .push_back(tick);
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        let start = open
                            .get_mut(&(channel, key.as_int()))
                            .and_then(VecDeque::pop_front);
                        if let Some(start) = start {
                            keys[key.as_int() as usize].push(Note {
                                start: tempo_map.seconds_at(start),
                                end: tempo_map.seconds_at(tick),
                                color_pointer: track_index * MIDI_CHANNELS + channel as usize,
                            });
                        }
                    }
                    _ => {}
                }
            }

            for ((channel, key), starts) in open {
                for start in starts {
                    keys[key as usize].push(Note {
                        start: tempo_map.seconds_at(start),
                        end: tempo_map.seconds_at(tick),
                        color_pointer: track_index * MIDI_CHANNELS + channel as usize,
                    });
                }
            }
        }

        for notes in &mut keys {
            notes.sort_by(|a, b| a.start.total_cmp(&b.start));
        }

        let palette = generate_palette(smf.tracks.len() * MIDI_CHANNELS);
        Ok(Self::from_keys(keys, palette))
    }

    pub fn note_count(&self) -> usize {
        self.note_count
    }

    pub fn length_seconds(&self) -> f64 {
        self.length_seconds
    }
}

impl NoteSource for MidiNotes {
    fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn notes(&self, key: usize) -> &[Note] {
        self.keys.get(key).map_or(&[], Vec::as_slice)
    }

    fn color(&self, color_pointer: usize) -> NoteColor {
        self.palette[color_pointer]
    }
}

struct TempoSegment {
    tick: u64,
    seconds: f64,
    seconds_per_tick: f64,
}

enum TempoMap {
    Metrical { segments: Vec<TempoSegment> },
    Timecode { seconds_per_tick: f64 },
}

impl TempoMap {
    fn new(smf: &Smf) -> Self {
        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(tpq) => (tpq.as_int() as f64).max(1.0),
            Timing::Timecode(fps, subframes) => {
                let ticks_per_second = (fps.as_f32() as f64 * subframes as f64).max(1.0);
                return TempoMap::Timecode {
                    seconds_per_tick: 1.0 / ticks_per_second,
                };
            }
        };

        // Tempo events apply to every track, wherever they are stored.
        let mut changes: Vec<(u64, f64)> = Vec::new();
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(micros)) = &event.kind {
                    changes.push((tick, micros.as_int() as f64));
                }
            }
        }
        changes.sort_by_key(|(tick, _)| *tick);

        let per_tick = |micros_per_quarter: f64| micros_per_quarter / 1_000_000.0 / ticks_per_quarter;
        let mut segments = vec![TempoSegment {
            tick: 0,
            seconds: 0.0,
            seconds_per_tick: per_tick(DEFAULT_MICROS_PER_QUARTER),
        }];
        for (tick, micros) in changes {
            let Some(last) = segments.last_mut() else {
                continue;
            };
            if last.tick == tick {
                last.seconds_per_tick = per_tick(micros);
                continue;
            }
            let seconds = last.seconds + (tick - last.tick) as f64 * last.seconds_per_tick;
            segments.push(TempoSegment {
                tick,
                seconds,
                seconds_per_tick: per_tick(micros),
            });
        }

        TempoMap::Metrical { segments }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        match self {
            TempoMap::Timecode { seconds_per_tick } => tick as f64 * seconds_per_tick,
            TempoMap::Metrical { segments } => {
                let index = segments.partition_point(|segment| segment.tick <= tick);
                let segment = &segments[index.saturating_sub(1)];
                segment.seconds + (tick - segment.tick) as f64 * segment.seconds_per_tick
            }
        }
    }
}

fn hsv_to_rgba(hue: f32, saturation: f32, value: f32) -> [f32; 4] {
    let h = (hue.rem_euclid(1.0)) * 6.0;
    let c = value * saturation;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = value - c;
    [r + m, g + m, b + m, 1.0]
}

/// Spreads hues with the golden ratio so neighbouring channels stay distinguishable.
fn generate_palette(count: usize) -> Vec<NoteColor> {
    const GOLDEN_RATIO_CONJUGATE: f32 = 0.618_034;
    (0..count)
        .map(|i| {
            let hue = i as f32 * GOLDEN_RATIO_CONJUGATE;
            NoteColor {
                left: hsv_to_rgba(hue, 0.75, 1.0),
                right: hsv_to_rgba(hue, 0.75, 0.6),
            }
        })
        .collect()
}
