use std::sync::Arc;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

use crate::{
    config::{Config, PlaybackConfig},
    gpu::gpu::GpuRenderer,
    midi_file::MidiNotes,
    playback::PlaybackCommand,
    render::{RenderShared, RendererThread},
};

const SPEED_STEP: f64 = 0.25;

/// Playback command bound to a key, if any. The digit row jumps to tenths of the song.
pub fn command_for_key(code: KeyCode, playback: &PlaybackConfig, song_length: f64) -> Option<PlaybackCommand> {
    let tenth = |n: f64| Some(PlaybackCommand::Seek(song_length * n / 10.0));
    match code {
        KeyCode::Space => Some(PlaybackCommand::Toggle),
        KeyCode::ArrowLeft => Some(PlaybackCommand::SeekBy(-playback.seek_step_seconds)),
        KeyCode::ArrowRight => Some(PlaybackCommand::SeekBy(playback.seek_step_seconds)),
        KeyCode::ArrowUp => Some(PlaybackCommand::AdjustSpeed(SPEED_STEP)),
        KeyCode::ArrowDown => Some(PlaybackCommand::AdjustSpeed(-SPEED_STEP)),
        KeyCode::Home => Some(PlaybackCommand::Restart),
        KeyCode::Backspace => Some(PlaybackCommand::SetSpeed(playback.speed)),
        KeyCode::Digit1 => tenth(1.0),
        KeyCode::Digit2 => tenth(2.0),
        KeyCode::Digit3 => tenth(3.0),
        KeyCode::Digit4 => tenth(4.0),
        KeyCode::Digit5 => tenth(5.0),
        KeyCode::Digit6 => tenth(6.0),
        KeyCode::Digit7 => tenth(7.0),
        KeyCode::Digit8 => tenth(8.0),
        KeyCode::Digit9 => tenth(9.0),
        _ => None,
    }
}

pub fn run_viewer(notes: Arc<MidiNotes>, config: Config, title: String) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("creating event loop")?;
    let mut app = ViewerApp::new(notes, config, title);
    event_loop.run_app(&mut app).context("running event loop")?;
    match app.init_error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

pub struct ViewerApp {
    title: String,
    config: Config,
    notes: Arc<MidiNotes>,
    window: Option<Arc<Window>>,
    renderer: Option<RendererThread>,
    render_shared: Option<Arc<RenderShared>>,
    commands: Sender<PlaybackCommand>,
    pending_commands: Option<Receiver<PlaybackCommand>>,
    init_error: Option<anyhow::Error>,
    exiting: bool,
}

impl ViewerApp {
    pub fn new(notes: Arc<MidiNotes>, config: Config, title: String) -> Self {
        let (commands, pending_commands) = crossbeam_channel::unbounded();
        Self {
            title,
            config,
            notes,
            window: None,
            renderer: None,
            render_shared: None,
            commands,
            pending_commands: Some(pending_commands),
            init_error: None,
            exiting: false,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window_attributes = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(
                self.config.window.width.max(1),
                self.config.window.height.max(1),
            ))
            .with_min_inner_size(LogicalSize::new(100, 100))
            .with_visible(true)
            .with_active(true);
        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("creating window")?,
        );

        let size = window.inner_size();
        let gpu = GpuRenderer::new(window.clone(), &self.config).context("initializing GPU renderer")?;
        self.window = Some(window);

        let commands = self
            .pending_commands
            .take()
            .context("renderer already started")?;
        let shared = Arc::new(RenderShared::new(size.width.max(1), size.height.max(1)));
        self.render_shared = Some(Arc::clone(&shared));
        self.renderer = Some(RendererThread::start(
            gpu,
            shared,
            Arc::clone(&self.notes),
            self.config.clone(),
            commands,
        )?);
        Ok(())
    }

    fn handle_keyboard_input(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        match code {
            KeyCode::Escape => self.exit_viewer(event_loop),
            KeyCode::F11 => self.toggle_fullscreen(),
            _ => {
                if let Some(command) = command_for_key(code, &self.config.playback, self.notes.length_seconds()) {
                    let _ = self.commands.send(command);
                }
            }
        }
    }

    fn toggle_fullscreen(&self) {
        if let Some(window) = self.window.as_ref() {
            if window.fullscreen().is_some() {
                window.set_fullscreen(None);
            } else {
                window.set_fullscreen(Some(Fullscreen::Borderless(window.current_monitor())));
            }
        }
    }

    fn stop_renderer(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.stop();
        }
        self.render_shared = None;
    }

    fn exit_viewer(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.stop_renderer();
        self.window.take();
        event_loop.exit();
    }

    fn mark_resize(&mut self, width: u32, height: u32) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.mark_resize(width, height);
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            log!("[viewer] startup failed: {err:#}");
            self.init_error = Some(err);
            self.exit_viewer(event_loop);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => self.exit_viewer(event_loop),
            WindowEvent::Resized(size) => self.mark_resize(size.width.max(1), size.height.max(1)),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(size) = self.window.as_ref().map(|window| window.inner_size()) {
                    self.mark_resize(size.width.max(1), size.height.max(1));
                }
            }
            WindowEvent::KeyboardInput { event, .. } => self.handle_keyboard_input(event_loop, &event),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // The renderer stops itself on unrecoverable surface errors.
        let renderer_stopped = self
            .render_shared
            .as_ref()
            .is_some_and(|shared| shared.should_exit());
        if renderer_stopped && !self.exiting {
            log!("[viewer] renderer stopped, closing");
            self.exit_viewer(event_loop);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrow_keys_seek_by_the_configured_step() {
        let playback = PlaybackConfig {
            seek_step_seconds: 2.5,
            ..Config::default().playback
        };
        assert_eq!(
            command_for_key(KeyCode::ArrowLeft, &playback, 60.0),
            Some(PlaybackCommand::SeekBy(-2.5))
        );
        assert_eq!(
            command_for_key(KeyCode::ArrowRight, &playback, 60.0),
            Some(PlaybackCommand::SeekBy(2.5))
        );
    }

    #[test]
    fn transport_keys_map_to_commands() {
        let playback = Config::default().playback;
        assert_eq!(command_for_key(KeyCode::Space, &playback, 60.0), Some(PlaybackCommand::Toggle));
        assert_eq!(command_for_key(KeyCode::Home, &playback, 60.0), Some(PlaybackCommand::Restart));
        assert_eq!(
            command_for_key(KeyCode::ArrowDown, &playback, 60.0),
            Some(PlaybackCommand::AdjustSpeed(-SPEED_STEP))
        );
        assert_eq!(
            command_for_key(KeyCode::Backspace, &playback, 60.0),
            Some(PlaybackCommand::SetSpeed(playback.speed))
        );
        assert_eq!(command_for_key(KeyCode::KeyQ, &playback, 60.0), None);
        // handled by the window itself
        assert_eq!(command_for_key(KeyCode::Escape, &playback, 60.0), None);
    }

    #[test]
    fn digit_row_seeks_to_tenths_of_the_song() {
        let playback = Config::default().playback;
        assert_eq!(
            command_for_key(KeyCode::Digit1, &playback, 80.0),
            Some(PlaybackCommand::Seek(8.0))
        );
        assert_eq!(
            command_for_key(KeyCode::Digit5, &playback, 80.0),
            Some(PlaybackCommand::Seek(40.0))
        );
        assert_eq!(
            command_for_key(KeyCode::Digit9, &playback, 0.0),
            Some(PlaybackCommand::Seek(0.0))
        );
    }
}
