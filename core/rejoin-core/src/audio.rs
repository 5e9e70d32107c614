//! Audible feedback at session transitions.
//!
//! Playback is fire-and-forget. A missing file, an undecodable file or an
//! unavailable output device is logged as a warning and otherwise ignored;
//! a background tool must not die because the speakers are unplugged.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    /// Watching started.
    Start,
    /// Watching stopped by the user.
    Stop,
    /// Start was requested but the client is not running.
    StartClient,
    /// A relaunch will happen after the grace period.
    RejoinNotice,
}

impl Cue {
    pub fn name(&self) -> &'static str {
        match self {
            Cue::Start => "start",
            Cue::Stop => "stop",
            Cue::StartClient => "start_vrc",
            Cue::RejoinNotice => "rejoin_notice",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.wav", self.name())
    }

    pub fn path_in(&self, sounds_dir: &Path) -> PathBuf {
        sounds_dir.join(self.file_name())
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Plays cues without blocking the caller.
pub trait CuePlayer: Send + Sync {
    fn play(&self, cue: Cue);
}

/// Logs cues instead of playing them.
#[derive(Debug, Clone, Default)]
pub struct SilentCuePlayer;

impl CuePlayer for SilentCuePlayer {
    fn play(&self, cue: Cue) {
        debug!(cue = %cue, "Cue (silent)");
    }
}

#[cfg(feature = "audio")]
pub use wav::WavCuePlayer;

#[cfg(feature = "audio")]
mod wav {
    use super::{Cue, CuePlayer};
    use rodio::{Decoder, OutputStream, Sink};
    use std::io::BufReader;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread;
    use tracing::warn;

    /// Plays `<sounds_dir>/<cue>.wav` on the default output device.
    /// Cues are serialised so overlapping requests queue up.
    #[derive(Debug, Clone)]
    pub struct WavCuePlayer {
        sounds_dir: PathBuf,
        playback: Arc<Mutex<()>>,
    }

    impl WavCuePlayer {
        pub fn new(sounds_dir: impl Into<PathBuf>) -> Self {
            Self {
                sounds_dir: sounds_dir.into(),
                playback: Arc::new(Mutex::new(())),
            }
        }
    }

    impl CuePlayer for WavCuePlayer {
        fn play(&self, cue: Cue) {
            let path = cue.path_in(&self.sounds_dir);
            let playback = Arc::clone(&self.playback);
            thread::spawn(move || {
                let _turn = playback.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(err) = play_file(&path) {
                    warn!(cue = %cue, path = %path.display(), error = %err, "Failed to play cue");
                }
            });
        }
    }

    fn play_file(path: &Path) -> Result<(), String> {
        let file = fs_err::File::open(path).map_err(|err| err.to_string())?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|err| format!("Failed to decode: {}", err))?;
        let (_stream, handle) = OutputStream::try_default()
            .map_err(|err| format!("No output device: {}", err))?;
        let sink = Sink::try_new(&handle).map_err(|err| format!("Failed to open sink: {}", err))?;
        sink.append(source);
        sink.sleep_until_end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cue_files_follow_names() {
        assert_eq!(Cue::Start.file_name(), "start.wav");
        assert_eq!(Cue::Stop.file_name(), "stop.wav");
        assert_eq!(Cue::StartClient.file_name(), "start_vrc.wav");
        assert_eq!(
            Cue::RejoinNotice.path_in(Path::new("/sounds")),
            PathBuf::from("/sounds/rejoin_notice.wav")
        );
    }
}
