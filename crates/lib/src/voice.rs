//! Optional voice input/output over system speech tools.
//!
//! Synthesis and capture shell out to a fixed set of known binaries
//! (espeak/say, arecord/rec); arguments are passed as a list, no shell. The
//! voice catalog is probed once with a bounded wait and reused. Chat flow
//! never depends on anything in this module.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// How long a caller waits for the first voice probe before giving up and
/// using whatever is available (possibly nothing).
pub const CATALOG_WAIT: Duration = Duration::from_secs(2);

const SYNTHESIZERS: &[&str] = &["espeak-ng", "espeak", "say"];
const RECORDERS: &[&str] = &["arecord", "rec"];

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("no speech synthesizer found (tried {})", SYNTHESIZERS.join(", "))]
    NoSynthesizer,
    #[error("no audio capture tool found (tried {})", RECORDERS.join(", "))]
    NoRecorder,
    #[error("spawning {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
}

/// One installed synthesizer voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub language: Option<String>,
    /// 'M' or 'F' where the synthesizer reports it (espeak does, say does not).
    pub gender: Option<char>,
}

/// Memoized catalog of installed voices.
///
/// The probe runs once, on first use, shared by concurrent callers; a probe
/// that exceeds the bounded wait resolves to an empty catalog, which is then
/// what later callers see. Construct once and inject it where speech is
/// rendered.
pub struct VoiceCatalog {
    probe: Arc<dyn Fn() -> Vec<Voice> + Send + Sync>,
    voices: OnceCell<Arc<Vec<Voice>>>,
}

impl VoiceCatalog {
    /// Catalog backed by the system synthesizer (configured tool name, or the
    /// first known one on PATH).
    pub fn system(synthesizer: Option<String>) -> Self {
        Self::with_probe(move || probe_system_voices(synthesizer.as_deref()))
    }

    /// Catalog with a custom probe (tests, alternative sources).
    pub fn with_probe(probe: impl Fn() -> Vec<Voice> + Send + Sync + 'static) -> Self {
        Self {
            probe: Arc::new(probe),
            voices: OnceCell::new(),
        }
    }

    /// The installed voices, probing on first call with the given bounded wait.
    pub async fn voices(&self, wait: Duration) -> Arc<Vec<Voice>> {
        self.voices
            .get_or_init(|| async {
                let probe = Arc::clone(&self.probe);
                let probed =
                    tokio::time::timeout(wait, tokio::task::spawn_blocking(move || (*probe)()))
                        .await;
                match probed {
                    Ok(Ok(voices)) => {
                        log::debug!("voice catalog loaded: {} voices", voices.len());
                        Arc::new(voices)
                    }
                    Ok(Err(e)) => {
                        log::warn!("voice probe failed: {}", e);
                        Arc::new(Vec::new())
                    }
                    Err(_) => {
                        log::warn!("voice probe did not finish within {:?}", wait);
                        Arc::new(Vec::new())
                    }
                }
            })
            .await
            .clone()
    }
}

/// Pick a voice for a message author: a female-sounding voice for the
/// assistant, a male-sounding one for the user, the synthesizer default
/// otherwise.
pub fn pick_voice(voices: &[Voice], role: crate::session::Role) -> Option<&Voice> {
    let wanted = match role {
        crate::session::Role::Assistant => 'F',
        crate::session::Role::User => 'M',
    };
    voices
        .iter()
        .find(|v| v.gender == Some(wanted))
        .or_else(|| {
            voices.iter().find(|v| {
                let name = v.name.to_ascii_lowercase();
                // "female" contains "male", so the male marker must exclude it.
                match wanted {
                    'F' => name.contains("female"),
                    _ => name.contains("male") && !name.contains("female"),
                }
            })
        })
}

/// Speech synthesis seam; implemented over a system tool, or faked in tests.
pub trait Speaker: Send + Sync {
    fn speak(&self, text: &str, voice: Option<&Voice>) -> Result<SpeakHandle, VoiceError>;
}

/// Speaks by spawning the detected synthesizer binary.
pub struct CommandSpeaker {
    tool: String,
}

impl CommandSpeaker {
    /// Use the configured tool name, or the first known synthesizer on PATH.
    pub fn detect(configured: Option<&str>) -> Result<Self, VoiceError> {
        find_tool(SYNTHESIZERS, configured)
            .map(|tool| Self { tool })
            .ok_or(VoiceError::NoSynthesizer)
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&self, text: &str, voice: Option<&Voice>) -> Result<SpeakHandle, VoiceError> {
        let mut cmd = Command::new(&self.tool);
        if let Some(voice) = voice {
            // Both espeak and say take the voice as -v <name>.
            cmd.arg("-v").arg(&voice.name);
        }
        cmd.arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn().map_err(|source| VoiceError::Spawn {
            tool: self.tool.clone(),
            source,
        })?;
        Ok(SpeakHandle {
            child: std::sync::Mutex::new(child),
        })
    }
}

/// A running utterance; drop or [`SpeakHandle::stop`] to silence it.
pub struct SpeakHandle {
    child: std::sync::Mutex<Child>,
}

impl SpeakHandle {
    pub fn stop(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn is_finished(&self) -> bool {
        match self.child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(Some(_))),
            Err(_) => true,
        }
    }
}

/// Audio capture seam.
pub trait Recorder: Send + Sync {
    /// Whether capture can start; the error is shown inline in the UI.
    fn availability(&self) -> Result<(), VoiceError>;
    fn start(&self, path: &Path) -> Result<RecordingHandle, VoiceError>;
}

/// Records by spawning the detected capture binary.
pub struct CommandRecorder {
    tool: Option<String>,
}

impl CommandRecorder {
    pub fn detect(configured: Option<&str>) -> Self {
        Self {
            tool: find_tool(RECORDERS, configured),
        }
    }
}

impl Recorder for CommandRecorder {
    fn availability(&self) -> Result<(), VoiceError> {
        if self.tool.is_some() {
            Ok(())
        } else {
            Err(VoiceError::NoRecorder)
        }
    }

    fn start(&self, path: &Path) -> Result<RecordingHandle, VoiceError> {
        let tool = self.tool.as_deref().ok_or(VoiceError::NoRecorder)?;
        let mut cmd = Command::new(tool);
        match tool {
            "arecord" => {
                cmd.arg("-q").arg("-f").arg("cd").arg(path);
            }
            _ => {
                cmd.arg("-q").arg(path);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn().map_err(|source| VoiceError::Spawn {
            tool: tool.to_string(),
            source,
        })?;
        Ok(RecordingHandle {
            child: std::sync::Mutex::new(child),
            path: path.to_path_buf(),
            started: Instant::now(),
        })
    }
}

/// An in-progress recording.
pub struct RecordingHandle {
    child: std::sync::Mutex<Child>,
    path: PathBuf,
    started: Instant,
}

impl RecordingHandle {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop capture and return the path of the recorded file. No
    /// transcription happens here; the caller decides what to do with it.
    pub fn stop(self) -> PathBuf {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.path
    }
}

/// Where a new recording should land.
pub fn temp_recording_path() -> PathBuf {
    std::env::temp_dir().join(format!("docent-recording-{}.wav", uuid::Uuid::new_v4()))
}

/// First candidate binary that exists on PATH; a configured name wins
/// unconditionally.
fn find_tool(candidates: &[&str], configured: Option<&str>) -> Option<String> {
    if let Some(tool) = configured {
        let tool = tool.trim();
        if !tool.is_empty() {
            return Some(tool.to_string());
        }
    }
    candidates
        .iter()
        .find(|c| {
            Command::new(*c)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok()
        })
        .map(|c| c.to_string())
}

fn probe_system_voices(configured: Option<&str>) -> Vec<Voice> {
    let Some(tool) = find_tool(SYNTHESIZERS, configured) else {
        log::debug!("no synthesizer found, voice catalog empty");
        return Vec::new();
    };
    let (args, parser): (&[&str], fn(&str) -> Vec<Voice>) = if tool == "say" {
        (&["-v", "?"], parse_say_voices)
    } else {
        (&["--voices"], parse_espeak_voices)
    };
    match Command::new(&tool).args(args).output() {
        Ok(output) => parser(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            log::warn!("listing voices with {}: {}", tool, e);
            Vec::new()
        }
    }
}

/// Parse `espeak --voices`: columns Pty, Language, Age/Gender, VoiceName, ...
fn parse_espeak_voices(output: &str) -> Vec<Voice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            let gender = fields[2].chars().last().filter(|c| *c == 'M' || *c == 'F');
            Some(Voice {
                name: fields[3].to_string(),
                language: Some(fields[1].to_string()),
                gender,
            })
        })
        .collect()
}

/// Parse `say -v ?`: "Name language # comment" per line.
fn parse_say_voices(output: &str) -> Vec<Voice> {
    output
        .lines()
        .filter_map(|line| {
            let before_comment = line.split('#').next().unwrap_or("");
            let mut fields = before_comment.split_whitespace();
            let name = fields.next()?;
            let language = fields.next().map(String::from);
            Some(Voice {
                name: name.to_string(),
                language,
                gender: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ESPEAK_OUTPUT: &str = "\
Pty Language Age/Gender VoiceName          File          Other Languages
 5  af             M  afrikaans            other/af
 5  en-uk          M  english-mb-en1       mb/mb-en1     (en 2)
 2  en-uk          F  english_fiona        other/en-fi
";

    const SAY_OUTPUT: &str = "\
Alex                en_US    # Most people recognize me by my voice.
Samantha            en_US    # Hello, my name is Samantha.
Daniel              en_GB    # Hello, my name is Daniel.
";

    #[test]
    fn parses_espeak_voice_table() {
        let voices = parse_espeak_voices(ESPEAK_OUTPUT);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[0].name, "afrikaans");
        assert_eq!(voices[0].language.as_deref(), Some("af"));
        assert_eq!(voices[0].gender, Some('M'));
        assert_eq!(voices[2].gender, Some('F'));
    }

    #[test]
    fn parses_say_voice_list() {
        let voices = parse_say_voices(SAY_OUTPUT);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[1].name, "Samantha");
        assert_eq!(voices[1].language.as_deref(), Some("en_US"));
        assert_eq!(voices[1].gender, None);
    }

    #[test]
    fn picks_voice_by_gender_then_name_marker() {
        let voices = parse_espeak_voices(ESPEAK_OUTPUT);
        assert_eq!(pick_voice(&voices, Role::Assistant).unwrap().name, "english_fiona");
        assert_eq!(pick_voice(&voices, Role::User).unwrap().name, "afrikaans");

        let named = vec![
            Voice {
                name: "UK Male".to_string(),
                language: None,
                gender: None,
            },
            Voice {
                name: "UK Female".to_string(),
                language: None,
                gender: None,
            },
        ];
        assert_eq!(pick_voice(&named, Role::Assistant).unwrap().name, "UK Female");
        assert!(pick_voice(&[], Role::Assistant).is_none());
    }

    #[tokio::test]
    async fn catalog_probes_once_and_is_shared() {
        let calls = Arc::new(AtomicUsize::new(0));
        let catalog = {
            let calls = calls.clone();
            VoiceCatalog::with_probe(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                vec![Voice {
                    name: "english_fiona".to_string(),
                    language: None,
                    gender: Some('F'),
                }]
            })
        };

        let first = catalog.voices(CATALOG_WAIT).await;
        let second = catalog.voices(CATALOG_WAIT).await;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_probe_resolves_empty_after_the_bounded_wait() {
        let catalog = VoiceCatalog::with_probe(|| {
            std::thread::sleep(Duration::from_millis(300));
            vec![Voice {
                name: "late".to_string(),
                language: None,
                gender: None,
            }]
        });

        let voices = catalog.voices(Duration::from_millis(50)).await;
        assert!(voices.is_empty());
        // The empty result is what later callers see as well.
        let again = catalog.voices(Duration::from_millis(50)).await;
        assert!(again.is_empty());
    }

    #[test]
    fn recorder_without_tool_reports_unavailable() {
        let recorder = CommandRecorder { tool: None };
        assert!(matches!(recorder.availability(), Err(VoiceError::NoRecorder)));
        assert!(recorder.start(Path::new("/tmp/x.wav")).is_err());
    }

    #[test]
    fn temp_recording_paths_are_unique_wavs() {
        let a = temp_recording_path();
        let b = temp_recording_path();
        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), "wav");
    }
}
