use std::time::Instant;

use crossbeam_channel::Receiver;

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 4.0;

/// Sent from the window thread, applied by the renderer thread before each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlaybackCommand {
    Toggle,
    Seek(f64),
    SeekBy(f64),
    SetSpeed(f64),
    AdjustSpeed(f64),
    Restart,
}

/// Song time in seconds, advancing with the wall clock while playing.
pub struct PlaybackClock {
    anchor_time: f64,
    anchor: Instant,
    speed: f64,
    playing: bool,
    start_time: f64,
}

impl PlaybackClock {
    /// The clock starts paused at `-lead_in` so the first notes scroll in from the top.
    pub fn new(lead_in: f64, speed: f64) -> Self {
        let start_time = -lead_in.max(0.0);
        let speed = if (MIN_SPEED..=MAX_SPEED).contains(&speed) {
            speed
        } else {
            1.0
        };
        Self {
            anchor_time: start_time,
            anchor: Instant::now(),
            speed,
            playing: false,
            start_time,
        }
    }

    pub fn current_time(&self) -> f64 {
        self.current_time_at(Instant::now())
    }

    pub fn current_time_at(&self, now: Instant) -> f64 {
        if self.playing {
            let elapsed = now.saturating_duration_since(self.anchor).as_secs_f64();
            self.anchor_time + elapsed * self.speed
        } else {
            self.anchor_time
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn toggle(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn seek(&mut self, time: f64) {
        self.seek_at(time, Instant::now());
    }

    pub fn seek_by(&mut self, delta: f64) {
        let now = Instant::now();
        self.seek_at(self.current_time_at(now) + delta, now);
    }

    /// Ignores speeds outside `MIN_SPEED..=MAX_SPEED`. Song time is continuous across the change.
    pub fn set_speed(&mut self, speed: f64) {
        self.set_speed_at(speed, Instant::now());
    }

    fn play_at(&mut self, now: Instant) {
        if !self.playing {
            self.anchor = now;
            self.playing = true;
        }
    }

    fn pause_at(&mut self, now: Instant) {
        if self.playing {
            self.anchor_time = self.current_time_at(now);
            self.playing = false;
        }
    }

    fn seek_at(&mut self, time: f64, now: Instant) {
        if !time.is_finite() {
            return;
        }
        self.anchor_time = time;
        self.anchor = now;
    }

    fn set_speed_at(&mut self, speed: f64, now: Instant) {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return;
        }
        self.anchor_time = self.current_time_at(now);
        self.anchor = now;
        self.speed = speed;
    }

    pub fn apply(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Toggle => self.toggle(),
            PlaybackCommand::Seek(time) => self.seek(time),
            PlaybackCommand::SeekBy(delta) => self.seek_by(delta),
            PlaybackCommand::SetSpeed(speed) => self.set_speed(speed),
            PlaybackCommand::AdjustSpeed(delta) => {
                let speed = (self.speed + delta).clamp(MIN_SPEED, MAX_SPEED);
                self.set_speed(speed);
            }
            PlaybackCommand::Restart => self.seek(self.start_time),
        }
    }

    /// Applies every queued command; returns how many were applied.
    pub fn drain(&mut self, commands: &Receiver<PlaybackCommand>) -> usize {
        let mut applied = 0;
        while let Ok(command) = commands.try_recv() {
            log!("[playback] {command:?}");
            self.apply(command);
            applied += 1;
        }
        applied
    }
}
