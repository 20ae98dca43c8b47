use std::{fs, path::Path};

use crate::config::Config;

const MIDI_SUFFIXES: [&str; 2] = [".mid", ".midi"];

pub fn is_midi_file_name(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    MIDI_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Names of the MIDI files directly inside `path`, sorted. Empty if the folder is missing.
pub fn scan_midi_files(path: &Path) -> Vec<String> {
    let Ok(read_dir) = fs::read_dir(path) else {
        return Vec::new();
    };
    let mut entries: Vec<String> = read_dir
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| is_midi_file_name(name))
        .collect();
    entries.sort();
    entries
}

pub fn get_config() -> Option<Config> {
    read_config(Path::new("config.json"))
}

pub fn read_config(config_path: &Path) -> Option<Config> {
    let config_json = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(err) => {
            println!("Failed to read {}: {}", config_path.display(), err);
            return None;
        }
    };
    match serde_json::from_str::<Config>(&config_json) {
        Ok(config) => Some(config),
        Err(err) => {
            println!("Failed to parse {}: {}", config_path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pianoroll-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn midi_names_are_matched_case_insensitively() {
        assert!(is_midi_file_name("song.mid"));
        assert!(is_midi_file_name("SONG.MIDI"));
        assert!(!is_midi_file_name("song.mid.txt"));
        assert!(!is_midi_file_name("mid"));
    }

    #[test]
    fn scan_lists_only_midi_files() {
        let dir = scratch_dir("scan");
        fs::write(dir.join("b.mid"), b"").unwrap();
        fs::write(dir.join("a.MIDI"), b"").unwrap();
        fs::write(dir.join("notes.txt"), b"").unwrap();
        fs::create_dir_all(dir.join("folder.mid")).unwrap();

        assert_eq!(scan_midi_files(&dir), vec!["a.MIDI".to_string(), "b.mid".to_string()]);
        assert!(scan_midi_files(&dir.join("missing")).is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn config_is_read_from_disk() {
        let dir = scratch_dir("config");
        let path = dir.join("config.json");
        fs::write(&path, serde_json::to_string(&Config::default()).unwrap()).unwrap();
        assert!(read_config(&path).is_some());

        fs::write(&path, "{ \"render\": 1 }").unwrap();
        assert!(read_config(&path).is_none());
        assert!(read_config(&dir.join("absent.json")).is_none());
        let _ = fs::remove_dir_all(&dir);
    }
}
