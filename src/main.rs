#[macro_use]
mod logging;

mod config;
mod files;
mod frame;
mod gpu;
mod layout;
mod midi_file;
mod notes;
mod playback;
mod render;
mod viewer;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;

use crate::config::Config;
use crate::files::{get_config, scan_midi_files};
use crate::midi_file::MidiNotes;
use crate::viewer::run_viewer;

const VIEWER_VERSION: &str = "0.0.1";

fn main() -> anyhow::Result<()> {
    log!();
    log!("[main] pianoroll {VIEWER_VERSION} starting");

    let Some(midi_path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        println!("Usage: pianoroll <file.mid>");
        let found = scan_midi_files(&std::env::current_dir()?);
        if !found.is_empty() {
            println!("MIDI files in the current directory:");
            for name in found {
                println!("  {name}");
            }
        }
        bail!("no MIDI file given");
    };

    let config = match get_config() {
        Some(cfg) => cfg,
        None => {
            println!("Using default config.");
            Config::default()
        }
    };

    println!("Loading {}...", midi_path.display());
    let notes = Arc::new(MidiNotes::load(&midi_path)?);
    println!(
        "{} notes, {:.1}s",
        notes.note_count(),
        notes.length_seconds()
    );

    let file_name = midi_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    run_viewer(notes, config, format!("pianoroll - {file_name}"))?;

    log!("[main] exit");
    Ok(())
}
