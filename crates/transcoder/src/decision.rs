use reelcache_core::types::PlayType;
use serde::{Deserialize, Serialize};

use crate::ffprobe::MediaDescriptor;

/// What a browser `<video>` element can play without help.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserCaps {
    /// Names compared with each whole entry of ffprobe's comma separated
    /// `format_name`.
    pub containers: Vec<String>,
    pub video_codecs: Vec<String>,
    pub audio_codecs: Vec<String>,
}

impl Default for BrowserCaps {
    fn default() -> Self {
        Self {
            containers: vec!["mp4".into()],
            video_codecs: vec!["h264".into()],
            audio_codecs: vec!["aac".into(), "mp3".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayReason {
    ContainerNotSupported,
    VideoCodecNotSupported,
    AudioCodecNotSupported,
    NoVideoStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayDecision {
    pub play_type: PlayType,
    pub reasons: Vec<PlayReason>,
}

/// Decide how a file reaches the browser: as is, re-wrapped in MP4, or
/// segmented to HLS with re-encoded audio.
pub fn classify(media: &MediaDescriptor, caps: &BrowserCaps) -> PlayDecision {
    let mut reasons = Vec::new();

    let container_ok = caps
        .containers
        .iter()
        .any(|c| media.format.format_name.split(',').any(|f| f.trim() == c));
    if !container_ok {
        reasons.push(PlayReason::ContainerNotSupported);
    }

    let video_ok = match media.video() {
        Some(v) => {
            let ok = caps
                .video_codecs
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&v.codec));
            if !ok {
                reasons.push(PlayReason::VideoCodecNotSupported);
            }
            ok
        }
        None => {
            reasons.push(PlayReason::NoVideoStream);
            false
        }
    };

    // A silent file is fine on the audio side.
    let audio_ok = match media.audio() {
        Some(a) => {
            let ok = caps
                .audio_codecs
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&a.codec));
            if !ok {
                reasons.push(PlayReason::AudioCodecNotSupported);
            }
            ok
        }
        None => true,
    };

    let play_type = if !(video_ok && audio_ok) {
        PlayType::Hls
    } else if container_ok {
        PlayType::Direct
    } else {
        PlayType::Remux
    };

    PlayDecision { play_type, reasons }
}
