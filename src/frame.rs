use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use rayon::prelude::*;

use crate::config::RenderConfig;
use crate::gpu::device::RenderDevice;
use crate::gpu::sink::DeviceBufferSink;
use crate::layout::{KeyLayout, KeyLayoutCache, MAX_KEYS};
use crate::notes::NoteSource;
use crate::notes::cursor::{TimeDirection, VisibilityCursor};
use crate::notes::streamer::{FrameWindow, NoteBatch, StreamStats, stream_notes, visible_notes};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub keys: usize,
    pub notes: usize,
    pub flushes: usize,
}

/// Drives one frame: per-key cursor updates, note streaming and batch flushes,
/// black keys first so white notes paint over them.
pub struct NoteRenderer {
    config: RenderConfig,
    cursors: Vec<VisibilityCursor>,
    last_render_time: f64,
    layouts: KeyLayoutCache,
    pool: rayon::ThreadPool,
}

impl NoteRenderer {
    /// `worker_threads == 0` uses one worker per hardware thread.
    pub fn new(config: &RenderConfig, worker_threads: usize) -> anyhow::Result<Self> {
        let threads = if worker_threads == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            worker_threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("note-worker-{i}"))
            .build()
            .context("building note worker pool")?;

        Ok(Self {
            config: config.sanitized(),
            cursors: vec![VisibilityCursor::default(); MAX_KEYS],
            last_render_time: f64::NEG_INFINITY,
            layouts: KeyLayoutCache::default(),
            pool,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    #[cfg(test)]
    fn last_render_time(&self) -> f64 {
        self.last_render_time
    }

    #[cfg(test)]
    fn cursor(&self, key: usize) -> usize {
        self.cursors.get(key).map_or(0, VisibilityCursor::index)
    }

    pub fn render_frame<S, D>(
        &mut self,
        source: &S,
        sink: &DeviceBufferSink<D>,
        time: f64,
        screen_aspect: f32,
    ) -> anyhow::Result<FrameStats>
    where
        S: NoteSource + ?Sized,
        D: RenderDevice,
    {
        let Self {
            config,
            cursors,
            last_render_time,
            layouts,
            pool,
        } = self;

        let frame = FrameWindow::new(time, config.time_window)
            .with_max_note_length(config.max_note_length_seconds);
        let direction = TimeDirection::between(*last_render_time, time);
        let layout = layouts.get(config.first_key, config.last_key);
        let visible = layout.visible_keys();
        // keys past the end of the source have nothing to draw
        let key_count = source.key_count();
        let keys = visible.start.min(key_count)..visible.end.min(key_count);

        let mut passes = || -> anyhow::Result<StreamStats> {
            sink.begin_frame(screen_aspect, config.note_border_width as f32)?;
            let mut stats = StreamStats::default();
            for black in [true, false] {
                let pass = KeyPass {
                    keys: keys.clone(),
                    black,
                    layout,
                    frame,
                    direction,
                    batch_capacity: config.batch_capacity,
                };
                stats += pool.install(|| pass.run(cursors, source, sink))?;
            }
            sink.end_frame()?;
            Ok(stats)
        };

        match passes() {
            Ok(stats) => {
                *last_render_time = time;
                Ok(FrameStats {
                    keys: keys.len(),
                    notes: stats.notes,
                    flushes: stats.flushes,
                })
            }
            Err(err) => {
                // Some cursors may have moved and others not; rescan everything next frame.
                *last_render_time = f64::INFINITY;
                sink.abort_frame();
                Err(err.context(format!("rendering frame at {time:.3}s")))
            }
        }
    }
}

struct KeyPass<'a> {
    keys: Range<usize>,
    black: bool,
    layout: &'a KeyLayout,
    frame: FrameWindow,
    direction: TimeDirection,
    batch_capacity: usize,
}

impl KeyPass<'_> {
    fn run<S, D>(
        &self,
        cursors: &mut [VisibilityCursor],
        source: &S,
        sink: &DeviceBufferSink<D>,
    ) -> anyhow::Result<StreamStats>
    where
        S: NoteSource + ?Sized,
        D: RenderDevice,
    {
        let notes_streamed = AtomicUsize::new(0);
        let flushes = AtomicUsize::new(0);
        let first_key = self.keys.start;

        cursors[self.keys.clone()]
            .par_iter_mut()
            .enumerate()
            .map(|(offset, cursor)| (first_key + offset, cursor))
            .filter(|(key, _)| self.layout.slot(*key).is_black == self.black)
            .try_for_each_init(
                || NoteBatch::new(self.batch_capacity),
                |batch, (key, cursor)| -> anyhow::Result<()> {
                    let notes = source.notes(key);
                    let start = cursor.update(notes, self.frame.time, self.direction);
                    let slot = self.layout.slot(key);
                    let stats = stream_notes(
                        visible_notes(notes, start, self.frame, source),
                        batch,
                        |chunk| sink.flush(key, slot, chunk),
                    )?;
                    notes_streamed.fetch_add(stats.notes, Ordering::Relaxed);
                    flushes.fetch_add(stats.flushes, Ordering::Relaxed);
                    Ok(())
                },
            )?;

        Ok(StreamStats {
            notes: notes_streamed.into_inner(),
            flushes: flushes.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::{DeviceOp, RecordingDevice};
    use crate::gpu::types::NoteColor;
    use crate::layout::{compute_key_layout, is_black_key};
    use crate::midi_file::MidiNotes;
    use crate::notes::Note;

    fn palette(count: usize) -> Vec<NoteColor> {
        (0..count)
            .map(|i| NoteColor {
                left: [i as f32 / count as f32, 0.5, 0.5, 1.0],
                right: [0.5, i as f32 / count as f32, 0.5, 1.0],
            })
            .collect()
    }

    fn note(start: f64, end: f64, color_pointer: usize) -> Note {
        Note {
            start,
            end,
            color_pointer,
        }
    }

    fn source(keys: &[(usize, Vec<Note>)]) -> MidiNotes {
        let mut table = vec![Vec::new(); 128];
        for (key, notes) in keys {
            table[*key] = notes.clone();
        }
        MidiNotes::from_keys(table, palette(4))
    }

    fn renderer(batch_capacity: usize, workers: usize) -> NoteRenderer {
        let config = RenderConfig {
            batch_capacity,
            ..RenderConfig::default()
        };
        NoteRenderer::new(&config, workers).unwrap()
    }

    fn sink(capacity: usize) -> DeviceBufferSink<RecordingDevice> {
        DeviceBufferSink::new(RecordingDevice::new(capacity))
    }

    fn key_of_draw(layout: &KeyLayout, left_x: f32) -> usize {
        layout
            .visible_keys()
            .find(|key| (layout.slot(*key).x as f32 - left_x).abs() < 1e-6)
            .unwrap_or_else(|| panic!("no key starts at x={left_x}"))
    }

    #[test]
    fn single_key_follows_playback() {
        let notes = source(&[(60, vec![note(1.0, 2.0, 0), note(2.5, 3.0, 1)])]);
        let mut renderer = renderer(1024, 2);
        let mut sink = sink(1024);

        let stats = renderer.render_frame(&notes, &sink, 0.95, 0.5).unwrap();
        assert_eq!(renderer.cursor(60), 0);
        assert_eq!(stats.notes, 1);
        let draws = sink.device_mut().unwrap().draws.clone();
        assert_eq!(draws.len(), 1);
        assert!((draws[0].notes[0].start - (0.05 / 0.3) as f32).abs() < 1e-5);
        assert_eq!(draws[0].notes[0].color, notes.color(0));
        let layout = compute_key_layout(0, 128);
        assert_eq!(draws[0].constants.note_left_x, layout.slot(60).x as f32);
        assert_eq!(draws[0].constants.note_right_x, layout.slot(60).right() as f32);

        // note 0 has ended; note 1 has not reached the window yet
        let stats = renderer.render_frame(&notes, &sink, 2.05, 0.5).unwrap();
        assert_eq!(renderer.cursor(60), 1);
        assert_eq!(stats.notes, 0);

        let before = sink.device_mut().unwrap().draws.len();
        let stats = renderer.render_frame(&notes, &sink, 2.25, 0.5).unwrap();
        assert_eq!(stats.notes, 1);
        let device = sink.device_mut().unwrap();
        assert_eq!(device.draws[before].notes[0].color, notes.color(1));

        // seeking back rescans the key from its first note
        renderer.render_frame(&notes, &sink, 0.5, 0.5).unwrap();
        assert_eq!(renderer.cursor(60), 0);
        let stats = renderer.render_frame(&notes, &sink, 0.75, 0.5).unwrap();
        assert_eq!(stats.notes, 1);
        assert_eq!(renderer.last_render_time(), 0.75);
    }

    #[test]
    fn black_keys_are_drawn_before_white_keys() {
        let keys: Vec<(usize, Vec<Note>)> = (48..72).map(|key| (key, vec![note(0.0, 1.0, key % 4)])).collect();
        let notes = source(&keys);
        let mut renderer = renderer(64, 4);
        let mut sink = sink(64);

        let stats = renderer.render_frame(&notes, &sink, 0.1, 0.5).unwrap();
        assert_eq!(stats.keys, 128);
        assert_eq!(stats.notes, 24);

        let layout = compute_key_layout(0, 128);
        let device = sink.device_mut().unwrap();
        let drawn: Vec<usize> = device
            .draws
            .iter()
            .map(|draw| key_of_draw(&layout, draw.constants.note_left_x))
            .collect();
        assert_eq!(drawn.len(), 24);
        let first_white = drawn.iter().position(|key| !is_black_key(*key)).unwrap();
        assert!(drawn[..first_white].iter().all(|key| is_black_key(*key)));
        assert!(drawn[first_white..].iter().all(|key| !is_black_key(*key)));
        assert_eq!(device.ops.last(), Some(&DeviceOp::Flush));
        assert_eq!(device.flush_count(), 1);
    }

    #[test]
    fn dense_key_is_split_into_bounded_batches() {
        let dense: Vec<Note> = (0..100).map(|i| note(i as f64 * 0.001, 5.0, 0)).collect();
        let notes = source(&[(40, dense.clone())]);
        let mut renderer = renderer(16, 3);
        let mut sink = sink(16);

        let stats = renderer.render_frame(&notes, &sink, 0.0, 0.5).unwrap();
        assert_eq!(stats.notes, 100);
        assert_eq!(stats.flushes, 7);

        let device = sink.device_mut().unwrap();
        assert!(device.draws.iter().all(|draw| draw.notes.len() <= 16));
        let streamed: Vec<f32> = device
            .draws
            .iter()
            .flat_map(|draw| draw.notes.iter().map(|n| n.start))
            .collect();
        let expected: Vec<f32> = dense.iter().map(|n| (n.start / 0.3) as f32).collect();
        assert_eq!(streamed, expected);
    }

    #[test]
    fn empty_inputs_still_complete_the_frame() {
        let notes = source(&[]);
        let config = RenderConfig {
            first_key: 30,
            last_key: 30,
            ..RenderConfig::default()
        };
        let mut renderer = NoteRenderer::new(&config, 1).unwrap();
        let mut sink = sink(8);

        let stats = renderer.render_frame(&notes, &sink, 3.0, 0.5).unwrap();
        assert_eq!(stats, FrameStats::default());
        assert_eq!(sink.device_mut().unwrap().flush_count(), 1);

        let mut full = self::renderer(8, 1);
        let stats = full.render_frame(&notes, &sink, 3.0, 0.5).unwrap();
        assert_eq!(stats.notes, 0);
        assert!(sink.device_mut().unwrap().draws.is_empty());
    }

    #[test]
    fn device_error_aborts_and_forces_rescan() {
        let notes = source(&[(60, vec![note(0.0, 1.0, 0), note(0.5, 3.0, 1)])]);
        let mut renderer = renderer(8, 2);
        let mut device = RecordingDevice::new(8);
        device.fail_draws = true;
        let mut sink = DeviceBufferSink::new(device);

        let err = renderer.render_frame(&notes, &sink, 0.1, 0.5).unwrap_err();
        assert!(format!("{err:#}").contains("key 60"), "{err:#}");
        assert_eq!(renderer.last_render_time(), f64::INFINITY);
        {
            let device = sink.device_mut().unwrap();
            assert_eq!(device.ops.last(), Some(&DeviceOp::AbortFrame));
            assert_eq!(device.flush_count(), 0);
            device.fail_draws = false;
        }

        // the next frame sees time going backward and rescans from the first note
        let stats = renderer.render_frame(&notes, &sink, 1.5, 0.5).unwrap();
        assert_eq!(renderer.cursor(60), 1);
        assert_eq!(stats.notes, 1);
        assert_eq!(renderer.last_render_time(), 1.5);
    }

    #[test]
    fn keys_beyond_the_source_are_skipped() {
        let mut table = vec![Vec::new(); 64];
        table[40] = vec![note(0.0, 1.0, 0)];
        let notes = MidiNotes::from_keys(table, palette(4));
        let mut renderer = renderer(8, 2);
        let mut sink = sink(8);

        let stats = renderer.render_frame(&notes, &sink, 0.5, 0.5).unwrap();
        assert_eq!(stats.keys, 64);
        assert_eq!(stats.notes, 1);
        assert_eq!(renderer.cursor(100), 0);
        assert_eq!(sink.device_mut().unwrap().draws.len(), 1);
    }

    #[test]
    fn explicit_worker_count_is_used() {
        assert_eq!(renderer(8, 3).worker_count(), 3);
        assert!(renderer(8, 0).worker_count() >= 1);
    }
}
