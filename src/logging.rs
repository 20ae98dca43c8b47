use std::{
    fmt,
    fs::OpenOptions,
    io::Write,
    sync::{Mutex, OnceLock},
    time::Instant,
};

const LOG_PATH: &str = "logs.txt";

struct LogSink {
    file: Option<std::fs::File>,
    started: Instant,
}

static LOG_SINK: OnceLock<Mutex<LogSink>> = OnceLock::new();

fn with_log_sink(mut f: impl FnMut(&mut std::fs::File, f64)) {
    let mutex = LOG_SINK.get_or_init(|| {
        Mutex::new(LogSink {
            file: None,
            started: Instant::now(),
        })
    });
    let Ok(mut guard) = mutex.lock() else {
        return;
    };

    if guard.file.is_none() {
        guard.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(LOG_PATH)
            .ok();
    }

    let elapsed = guard.started.elapsed().as_secs_f64();
    if let Some(file) = guard.file.as_mut() {
        f(file, elapsed);
    }
}

pub fn log_fmt(args: fmt::Arguments) {
    with_log_sink(|file, elapsed| {
        let _ = write!(file, "[{elapsed:>10.3}] ");
        let _ = file.write_fmt(args);
        let _ = file.write_all(b"\n");
        let _ = file.flush();
    });
}

pub fn log_newline() {
    with_log_sink(|file, _| {
        let _ = file.write_all(b"\n");
        let _ = file.flush();
    });
}

/// Like `println!`, but appends a timestamped line to `logs.txt` in the current working directory.
#[macro_export]
macro_rules! log {
    () => {
        {
            $crate::logging::log_newline()
        }
    };
    ($($arg:tt)*) => {
        {
            $crate::logging::log_fmt(format_args!($($arg)*))
        }
    };
}
