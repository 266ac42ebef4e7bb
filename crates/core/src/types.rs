use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued transcode, stored in `transcode_job.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output profile of a transcode. Each profile has its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeProfile {
    /// Stream copy into an MP4 container.
    Remux,
    /// Video copy, AAC audio, segmented into MPEG-TS with a playlist.
    Hls,
}

impl TranscodeProfile {
    pub const ALL: [TranscodeProfile; 2] = [Self::Remux, Self::Hls];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remux => "remux",
            Self::Hls => "hls",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "remux" => Some(Self::Remux),
            "hls" => Some(Self::Hls),
            _ => None,
        }
    }
}

impl std::fmt::Display for TranscodeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a file has to be delivered to a browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayType {
    Direct,
    Remux,
    Hls,
}

impl PlayType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Remux => "remux",
            Self::Hls => "hls",
        }
    }

    /// The transcode profile needed for this play type, if any.
    pub fn profile(self) -> Option<TranscodeProfile> {
        match self {
            Self::Direct => None,
            Self::Remux => Some(TranscodeProfile::Remux),
            Self::Hls => Some(TranscodeProfile::Hls),
        }
    }
}

impl std::fmt::Display for PlayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a cache ledger row. `Deleting` marks an eviction in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheItemState {
    Ready,
    Deleting,
}

impl CacheItemState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Deleting => "deleting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "deleting" => Some(Self::Deleting),
            _ => None,
        }
    }
}

impl std::fmt::Display for CacheItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
