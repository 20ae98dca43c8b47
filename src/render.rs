use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::Context;
use crossbeam_channel::Receiver;

use crate::{
    config::Config,
    frame::{FrameStats, NoteRenderer},
    gpu::gpu::{FrameError, GpuRenderer},
    midi_file::MidiNotes,
    playback::{PlaybackClock, PlaybackCommand},
};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub struct RenderShared {
    exit: AtomicBool,
    resize_pending: AtomicBool,
    width: AtomicU32,
    height: AtomicU32,
}

impl RenderShared {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            exit: AtomicBool::new(false),
            resize_pending: AtomicBool::new(false),
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
        }
    }

    pub fn should_exit(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }
}

/// Frame counters accumulated between two stats log lines.
#[derive(Default)]
struct StatsWindow {
    frames: u64,
    notes: u64,
    flushes: u64,
    slowest_frame: Duration,
}

impl StatsWindow {
    fn record(&mut self, stats: FrameStats, frame_time: Duration) {
        self.frames += 1;
        self.notes += stats.notes as u64;
        self.flushes += stats.flushes as u64;
        self.slowest_frame = self.slowest_frame.max(frame_time);
    }

    /// Formats the summary for `elapsed` and starts a new window.
    fn take_summary(&mut self, elapsed: Duration) -> String {
        let frames = self.frames.max(1);
        let line = format!(
            "{:.1} fps, {} notes/frame, {} flushes/frame, slowest {:.2}ms",
            self.frames as f64 / elapsed.as_secs_f64().max(1e-9),
            self.notes / frames,
            self.flushes / frames,
            self.slowest_frame.as_secs_f64() * 1000.0,
        );
        *self = Self::default();
        line
    }
}

/// Raises `exit` when the renderer thread ends, including by a panic, so the window closes.
struct ExitOnDrop(Arc<RenderShared>);

impl Drop for ExitOnDrop {
    fn drop(&mut self) {
        self.0.exit.store(true, Ordering::Release);
    }
}

pub struct RendererThread {
    shared: Arc<RenderShared>,
    handle: Option<JoinHandle<()>>,
}

impl RendererThread {
    pub fn start(
        mut gpu: GpuRenderer,
        shared: Arc<RenderShared>,
        notes: Arc<MidiNotes>,
        config: Config,
        commands: Receiver<PlaybackCommand>,
    ) -> anyhow::Result<Self> {
        let mut renderer = NoteRenderer::new(&config.render, config.performance.worker_threads)?;
        log!(
            "[render] {} note workers, keys {}..{}, window {:.2}s",
            renderer.worker_count(),
            renderer.config().first_key,
            renderer.config().last_key,
            renderer.config().time_window
        );

        let mut clock = PlaybackClock::new(config.playback.lead_in_seconds, config.playback.speed);
        if !config.playback.start_paused {
            clock.play();
        }

        let frame_duration = Duration::from_secs_f64(1.0 / config.performance.fps_limiter.max(1.0));
        let shared_for_thread = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("renderer".to_string())
            .spawn(move || {
                let _exit_guard = ExitOnDrop(Arc::clone(&shared_for_thread));
                let mut width = shared_for_thread.width.load(Ordering::Acquire);
                let mut height = shared_for_thread.height.load(Ordering::Acquire);
                let mut last_frame = Instant::now();
                let mut stats_window = StatsWindow::default();
                let mut stats_started = Instant::now();
                let mut failed_frames: u64 = 0;

                loop {
                    if shared_for_thread.exit.load(Ordering::Acquire) {
                        break;
                    }

                    if shared_for_thread
                        .resize_pending
                        .swap(false, Ordering::AcqRel)
                    {
                        width = shared_for_thread.width.load(Ordering::Acquire).max(1);
                        height = shared_for_thread.height.load(Ordering::Acquire).max(1);
                        gpu.resize(winit::dpi::PhysicalSize::new(width, height));
                    }

                    let now = Instant::now();
                    if now >= last_frame + frame_duration {
                        last_frame = now;
                    } else {
                        std::thread::yield_now();
                        continue;
                    }

                    clock.drain(&commands);
                    let time = clock.current_time();

                    match gpu.render(notes.as_ref(), &mut renderer, time) {
                        Ok(stats) => {
                            failed_frames = 0;
                            stats_window.record(stats, now.elapsed());
                        }
                        Err(FrameError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                            gpu.resize(winit::dpi::PhysicalSize::new(width, height));
                        }
                        Err(FrameError::Surface(wgpu::SurfaceError::Timeout)) => {}
                        Err(FrameError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
                            log!("[render] surface out of memory, stopping");
                            shared_for_thread.exit.store(true, Ordering::Release);
                        }
                        Err(FrameError::Surface(wgpu::SurfaceError::Other)) => {}
                        Err(FrameError::Device(err)) => {
                            // one line per burst of failures
                            if failed_frames % 240 == 0 {
                                log!("[render] frame at {time:.3}s failed: {err:#}");
                            }
                            failed_frames += 1;
                        }
                    }

                    let since_stats = stats_started.elapsed();
                    if since_stats >= STATS_LOG_INTERVAL {
                        log!(
                            "[render] t={:.1}s {} {:.2}x, {}",
                            time,
                            if clock.is_playing() { "playing" } else { "paused" },
                            clock.speed(),
                            stats_window.take_summary(since_stats)
                        );
                        stats_started = Instant::now();
                    }
                }
            })
            .context("spawning renderer thread")?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.shared.exit.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log!("[render] renderer thread panicked");
            }
        }
    }

    pub fn mark_resize(&mut self, width: u32, height: u32) {
        self.shared.width.store(width, Ordering::Release);
        self.shared.height.store(height, Ordering::Release);
        self.shared.resize_pending.store(true, Ordering::Release);
    }
}

impl Drop for RendererThread {
    fn drop(&mut self) {
        self.stop();
    }
}
