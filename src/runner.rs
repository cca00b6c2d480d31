use std::time::Duration;

use indicatif::ProgressBar;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::pipeline::{Stage, StageStats};
use crate::probe::{ProbeClient, ProbeConfig, ProbeError, ProbeTarget};
use crate::stages::{
    CharProber, Confirmer, Discoverer, Finding, ParamCandidate, DEFAULT_MARKER,
    DEFAULT_PAYLOAD_PREFIX, DEFAULT_PAYLOAD_SUFFIX, DEFAULT_PROBE_CHARS,
};

pub const DEFAULT_CONCURRENCY: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageWidths {
    pub discover: usize,
    pub confirm: usize,
    pub chars: usize,
}

impl StageWidths {
    pub fn uniform(workers: usize) -> Self {
        Self {
            discover: workers,
            confirm: workers,
            chars: workers,
        }
    }

    fn widest(&self) -> usize {
        self.discover.max(self.confirm).max(self.chars)
    }
}

impl Default for StageWidths {
    fn default() -> Self {
        Self::uniform(DEFAULT_CONCURRENCY)
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    pub concurrency: StageWidths,
    // None sizes every channel at twice the widest stage
    pub channel_capacity: Option<usize>,
    pub probe: ProbeConfig,
    pub marker: String,
    pub probe_chars: Vec<char>,
    pub payload_prefix: String,
    pub payload_suffix: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            concurrency: StageWidths::default(),
            channel_capacity: None,
            probe: ProbeConfig::default(),
            marker: DEFAULT_MARKER.to_string(),
            probe_chars: DEFAULT_PROBE_CHARS.to_vec(),
            payload_prefix: DEFAULT_PAYLOAD_PREFIX.to_string(),
            payload_suffix: DEFAULT_PAYLOAD_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid concurrency for {stage} stage, expected at least 1")]
    InvalidConcurrency { stage: &'static str },

    #[error("marker and payload affixes must not be empty")]
    EmptyMarker,

    #[error("failed to build probe client: {source}")]
    ProbeClient {
        #[source]
        source: ProbeError,
    },

    #[error("failed to read input: {source}")]
    InputRead {
        #[source]
        source: std::io::Error,
    },

    #[error("task join failed: {source}")]
    TaskJoin {
        #[source]
        source: tokio::task::JoinError,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub lines_read: usize,
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Clone, Debug)]
pub struct ScanResult {
    pub elapsed: Duration,
    pub feed: FeedStats,
    pub stages: Vec<StageStats>,
    pub findings: Vec<Finding>,
}

/// The three running stages. Findings arrive on `recv` until the last stage
/// has drained; `finish` then collects each stage's totals.
pub struct PipelineHandle {
    findings: mpsc::Receiver<Finding>,
    supervisors: Vec<JoinHandle<StageStats>>,
}

impl PipelineHandle {
    pub async fn recv(&mut self) -> Option<Finding> {
        self.findings.recv().await
    }

    pub async fn finish(self) -> Result<Vec<StageStats>, RunnerError> {
        drop(self.findings);
        let mut stats = Vec::with_capacity(self.supervisors.len());
        for supervisor in self.supervisors {
            stats.push(
                supervisor
                    .await
                    .map_err(|e| RunnerError::TaskJoin { source: e })?,
            );
        }
        Ok(stats)
    }
}

#[derive(Clone, Debug)]
pub struct Runner {
    options: Options,
    client: ProbeClient,
    progress: ProgressBar,
}

impl Runner {
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        let widths = options.concurrency;
        for (stage, width) in [
            ("discover", widths.discover),
            ("confirm", widths.confirm),
            ("chars", widths.chars),
        ] {
            if width == 0 {
                return Err(RunnerError::InvalidConcurrency { stage });
            }
        }
        if options.marker.is_empty()
            || options.payload_prefix.is_empty()
            || options.payload_suffix.is_empty()
        {
            return Err(RunnerError::EmptyMarker);
        }
        let client = ProbeClient::new(&options.probe)
            .map_err(|e| RunnerError::ProbeClient { source: e })?;
        Ok(Self {
            options,
            client,
            progress: ProgressBar::hidden(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn client(&self) -> &ProbeClient {
        &self.client
    }

    /// Wires discover -> confirm -> chars behind `targets`. Closing the
    /// sender side of `targets` is the only shutdown signal.
    pub fn spawn_pipeline(&self, targets: mpsc::Receiver<ProbeTarget>) -> PipelineHandle {
        let widths = self.options.concurrency;
        let capacity = self
            .options
            .channel_capacity
            .unwrap_or_else(|| widths.widest() * 2)
            .max(1);

        let discoverer = Discoverer::new(self.client.clone());
        let confirmer = Confirmer::with_marker(self.client.clone(), &self.options.marker);
        let prober = CharProber::new(self.client.clone())
            .with_chars(&self.options.probe_chars)
            .with_affixes(&self.options.payload_prefix, &self.options.payload_suffix);

        let (discovered, discover_supervisor) = Stage::new("discover", discoverer)
            .workers(widths.discover)
            .capacity(capacity)
            .spawn::<ProbeTarget, ParamCandidate>(targets)
            .into_parts();
        let (confirmed, confirm_supervisor) = Stage::new("confirm", confirmer)
            .workers(widths.confirm)
            .capacity(capacity)
            .spawn::<ParamCandidate, ParamCandidate>(discovered)
            .into_parts();
        let (findings, chars_supervisor) = Stage::new("chars", prober)
            .workers(widths.chars)
            .capacity(capacity)
            .spawn::<ParamCandidate, Finding>(confirmed)
            .into_parts();

        debug!(
            discover = widths.discover,
            confirm = widths.confirm,
            chars = widths.chars,
            capacity,
            "pipeline started"
        );

        PipelineHandle {
            findings,
            supervisors: vec![discover_supervisor, confirm_supervisor, chars_supervisor],
        }
    }

    /// Feeds newline-delimited URLs from `source` through the pipeline and
    /// calls `on_finding` for each finding as it arrives.
    ///
    /// Blank lines are ignored and malformed URLs are logged and skipped. A
    /// read error stops feeding; work already queued still drains before the
    /// error is returned.
    pub async fn run<R, F>(&self, source: R, mut on_finding: F) -> Result<ScanResult, RunnerError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        F: FnMut(&Finding),
    {
        let started_at = Instant::now();
        let capacity = self
            .options
            .channel_capacity
            .unwrap_or_else(|| self.options.concurrency.widest() * 2)
            .max(1);
        let (target_tx, target_rx) = mpsc::channel::<ProbeTarget>(capacity);

        let mut pipeline = self.spawn_pipeline(target_rx);
        let feeder = task::spawn(feed_lines(source, target_tx, self.progress.clone()));

        let mut findings = Vec::new();
        while let Some(finding) = pipeline.recv().await {
            on_finding(&finding);
            findings.push(finding);
        }

        let stages = pipeline.finish().await?;
        let feed = feeder
            .await
            .map_err(|e| RunnerError::TaskJoin { source: e })?
            .map_err(|e| RunnerError::InputRead { source: e })?;

        let elapsed = started_at.elapsed();
        info!(
            targets = feed.accepted,
            rejected = feed.rejected,
            findings = findings.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "scan finished"
        );
        Ok(ScanResult {
            elapsed,
            feed,
            stages,
            findings,
        })
    }
}

async fn feed_lines<R>(
    mut source: R,
    tx: mpsc::Sender<ProbeTarget>,
    pb: ProgressBar,
) -> Result<FeedStats, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = FeedStats::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if source.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        stats.lines_read += 1;
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                stats.rejected += 1;
                warn!("skipping input line {}: not valid UTF-8 ({e})", stats.lines_read);
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match ProbeTarget::parse(line) {
            Ok(target) => {
                stats.accepted += 1;
                pb.inc(1);
                if tx.send(target).await.is_err() {
                    warn!("pipeline closed before the input was exhausted");
                    break;
                }
            }
            Err(e) => {
                stats.rejected += 1;
                warn!("skipping input line {}: {e}", stats.lines_read);
            }
        }
    }
    Ok(stats)
}
