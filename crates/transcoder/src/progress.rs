use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2})\.(\d+)").unwrap());

/// Number of non-progress stderr lines kept for error reports.
const DIAGNOSTIC_TAIL: usize = 40;

/// A stream of progress samples, each a fraction of the total work done.
#[async_trait::async_trait]
pub trait ProgressSource: Send {
    /// The next sample, or `None` once the underlying stream is exhausted.
    async fn next_sample(&mut self) -> Option<f64>;
}

/// Progress scraped from ffmpeg's human readable stderr.
///
/// ffmpeg rewrites its stats line in place with `\r`, so both `\r` and `\n`
/// end a line here.
pub struct StderrProgress<R> {
    reader: BufReader<R>,
    total_secs: f64,
    diagnostics: VecDeque<String>,
}

impl<R: AsyncRead + Unpin + Send> StderrProgress<R> {
    pub fn new(stderr: R, total_secs: f64) -> Self {
        Self {
            reader: BufReader::new(stderr),
            total_secs,
            diagnostics: VecDeque::with_capacity(DIAGNOSTIC_TAIL),
        }
    }

    /// The last diagnostic lines seen, oldest first.
    pub fn diagnostics(&self) -> String {
        self.diagnostics
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn next_line(&mut self) -> Option<String> {
        let mut line = Vec::new();
        loop {
            let available = match self.reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) => {
                    tracing::debug!(error = %e, "stderr read failed");
                    return None;
                }
            };
            if available.is_empty() {
                return (!line.is_empty()).then(|| String::from_utf8_lossy(&line).into_owned());
            }

            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    line.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    if line.is_empty() {
                        // second half of a \r\n pair
                        continue;
                    }
                    return Some(String::from_utf8_lossy(&line).into_owned());
                }
                None => {
                    let len = available.len();
                    line.extend_from_slice(available);
                    self.reader.consume(len);
                }
            }
        }
    }

    fn remember(&mut self, line: String) {
        if self.diagnostics.len() == DIAGNOSTIC_TAIL {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(line);
    }
}

#[async_trait::async_trait]
impl<R: AsyncRead + Unpin + Send> ProgressSource for StderrProgress<R> {
    async fn next_sample(&mut self) -> Option<f64> {
        loop {
            let line = self.next_line().await?;
            match parse_time(&line) {
                Some(elapsed) if self.total_secs > 0.0 => return Some(elapsed / self.total_secs),
                Some(_) => {}
                None => self.remember(line.trim().to_string()),
            }
        }
    }
}

/// Elapsed seconds from a stats line's `time=HH:MM:SS.frac` field.
pub fn parse_time(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let fraction: f64 = format!("0.{}", &caps[4]).parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + fraction)
}

/// Whole percentage for a fraction, clamped to 0..=100.
pub fn percent(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}
