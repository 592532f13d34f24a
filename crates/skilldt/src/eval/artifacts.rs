//! Persistence of per-episode render artifacts.
//!
//! Each rendered episode leaves a video artifact plus two side files: the
//! spoken instruction and the serialized option trace. File names are
//! namespaced by iteration and episode index (and instruction text for the
//! rephrasal family). Filesystem errors propagate and abort the evaluation
//! pass; no partial-render cleanup is attempted.

use super::rollout::EpisodeOutcome;
use crate::env::Frame;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Encodes captured frames into a video artifact. The container/codec is a
/// collaborator concern; this crate only routes frames to it.
pub trait FrameEncoder: Send {
    /// Encode `frames` at `path_stem` (extension chosen by the encoder) and
    /// return the written path.
    fn encode(&self, frames: &[Frame], path_stem: &Path) -> std::io::Result<PathBuf>;
}

/// Fallback encoder: a length-prefixed raw RGB dump, one file per episode.
pub struct RawFrameDump;

impl FrameEncoder for RawFrameDump {
    fn encode(&self, frames: &[Frame], path_stem: &Path) -> std::io::Result<PathBuf> {
        let path = path_stem.with_extension("frames");
        let mut buf = Vec::new();
        buf.extend_from_slice(&(frames.len() as u32).to_le_bytes());
        for frame in frames {
            buf.extend_from_slice(&frame.width.to_le_bytes());
            buf.extend_from_slice(&frame.height.to_le_bytes());
            buf.extend_from_slice(&(frame.rgb.len() as u32).to_le_bytes());
            buf.extend_from_slice(&frame.rgb);
        }
        fs::write(&path, buf)?;
        Ok(path)
    }
}

/// Sanitize an instruction for use inside a file name.
pub fn sanitize_stem(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Write the video artifact and side files for one rendered episode.
pub fn persist_episode(
    render_dir: &Path,
    stem: &str,
    outcome: &EpisodeOutcome,
    encoder: &dyn FrameEncoder,
) -> Result<()> {
    fs::create_dir_all(render_dir)?;

    encoder.encode(&outcome.frames, &render_dir.join(format!("episode_{stem}")))?;
    fs::write(
        render_dir.join(format!("{stem}.txt")),
        &outcome.instruction,
    )?;

    let trace = outcome
        .option_trace
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    fs::write(
        render_dir.join(format!("episode_{stem}_options.txt")),
        trace,
    )?;

    tracing::debug!(stem, options = ?outcome.option_trace, success = outcome.success, "Persisted episode artifacts");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn outcome() -> EpisodeOutcome {
        EpisodeOutcome {
            episode_return: 1.0,
            length: 2,
            success: true,
            option_trace: vec![0, 0, 3],
            instruction: "open the drawer".into(),
            frames: vec![Frame {
                width: 2,
                height: 1,
                rgb: vec![255, 0, 0, 0, 255, 0],
            }],
        }
    }

    #[test]
    fn test_persist_writes_all_artifacts() {
        let dir = tempdir().unwrap();
        persist_episode(dir.path(), "3_1", &outcome(), &RawFrameDump).unwrap();

        assert!(dir.path().join("episode_3_1.frames").exists());
        let instr = fs::read_to_string(dir.path().join("3_1.txt")).unwrap();
        assert_eq!(instr, "open the drawer");
        let trace = fs::read_to_string(dir.path().join("episode_3_1_options.txt")).unwrap();
        assert_eq!(trace, "0 0 3");
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("open the drawer"), "open_the_drawer");
    }
}
