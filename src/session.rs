//! Recording session: the episode loop that fills a dataset directory.
//!
//! Each iteration asks the operator to describe the object, scans it, merges
//! the two halves into one record and persists it as the next item archive:
//!
//! ```text
//! Idle -> describe -> scan -> merge -> persist -> Idle
//! ```
//!
//! The loop stops when the shutdown signal fires. The signal is honored
//! before each episode and while waiting for the operator; a scan that has
//! started runs to completion and is persisted. An episode cut short before
//! persisting leaves nothing behind under its index.

use crate::capture;
use crate::config::Settings;
use crate::data::item::{HardnessClass, ObjectDescription};
use crate::data::storage::DatasetLayout;
use crate::error::{AppResult, DaqError};
use crate::scene::{self, Scene};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::thread;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// Source of per-episode object descriptions.
#[async_trait]
pub trait ObjectDescriber: Send {
    /// Describe the object about to be scanned.
    async fn describe(&mut self) -> AppResult<ObjectDescription>;
}

/// Asks the operator on a text stream and parses one line per episode.
///
/// Lines are read on a dedicated thread and handed over a channel, so a
/// pending prompt never holds up runtime shutdown.
pub struct PromptDescriber<W> {
    answers: mpsc::Receiver<io::Result<String>>,
    out: W,
}

impl<W> PromptDescriber<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Prompt on `out`, read answers from `input` on a reader thread.
    pub fn from_reader<R>(input: R, out: W) -> AppResult<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, answers) = mpsc::channel(1);
        thread::Builder::new()
            .name("operator-input".to_string())
            .spawn(move || {
                for line in input.lines() {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self { answers, out })
    }
}

impl PromptDescriber<tokio::io::Stdout> {
    /// Prompt on stdout, read from stdin.
    pub fn stdio() -> AppResult<Self> {
        Self::from_reader(io::BufReader::new(io::stdin()), tokio::io::stdout())
    }
}

#[async_trait]
impl<W> ObjectDescriber for PromptDescriber<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn describe(&mut self) -> AppResult<ObjectDescription> {
        self.out
            .write_all(b"Describe the object.\nHardness: Soft=0, Hard=1.\n")
            .await?;
        self.out.flush().await?;

        let line = self.answers.recv().await.ok_or_else(|| {
            DaqError::InvalidDescription("input closed before a hardness was given".to_string())
        })??;
        Ok(ObjectDescription {
            hardness: line.parse()?,
        })
    }
}

/// Replays a fixed list of hardness classes, then fails.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDescriber {
    queue: VecDeque<HardnessClass>,
}

impl ScriptedDescriber {
    /// Describer answering with `classes` in order.
    pub fn new(classes: impl IntoIterator<Item = HardnessClass>) -> Self {
        Self {
            queue: classes.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ObjectDescriber for ScriptedDescriber {
    async fn describe(&mut self) -> AppResult<ObjectDescription> {
        self.queue
            .pop_front()
            .map(|hardness| ObjectDescription { hardness })
            .ok_or_else(|| DaqError::InvalidDescription("no descriptions left".to_string()))
    }
}

/// Outcome of a recording run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Index the run started counting from.
    pub first_index: usize,
    /// Number of archives written by this run.
    pub episodes_written: usize,
    /// Whether this run created the config archive.
    pub config_written: bool,
}

impl RunSummary {
    /// Index the next run will start from.
    pub fn next_index(&self) -> usize {
        self.first_index + self.episodes_written
    }
}

/// Episode loop over one dataset directory.
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    settings: Settings,
    layout: DatasetLayout,
    episode_limit: Option<usize>,
}

impl DatasetWriter {
    /// Writer for `settings.dataset_dir`.
    pub fn new(settings: Settings) -> Self {
        let layout = DatasetLayout::new(&settings.dataset_dir);
        Self {
            settings,
            layout,
            episode_limit: None,
        }
    }

    /// Stop on its own after `limit` episodes.
    pub fn with_episode_limit(mut self, limit: Option<usize>) -> Self {
        self.episode_limit = limit;
        self
    }

    /// Dataset paths.
    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    /// Create the directory tree and config archive.
    ///
    /// Returns whether the config was created and the first free index.
    pub fn prepare(&self) -> AppResult<(bool, usize)> {
        self.layout.ensure_items_dir()?;
        let config_written = self.layout.write_config_once(&self.settings)?;
        let next_index = self.layout.count_items()?;
        Ok((config_written, next_index))
    }

    /// Record episodes until shutdown, the episode limit, or an error.
    pub async fn run(
        &self,
        scene: &mut Scene,
        describer: &mut dyn ObjectDescriber,
        mut shutdown: watch::Receiver<bool>,
    ) -> AppResult<RunSummary> {
        let (config_written, first_index) = self.prepare()?;
        info!(
            root = %self.layout.root().display(),
            first_index,
            config_written,
            policy = %self.settings.capture.policy,
            "recording started"
        );

        let mut summary = RunSummary {
            first_index,
            episodes_written: 0,
            config_written,
        };

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested");
                break;
            }
            if self
                .episode_limit
                .is_some_and(|limit| summary.episodes_written >= limit)
            {
                break;
            }
            let index = summary.next_index();

            let description = tokio::select! {
                description = describer.describe() => description?,
                _ = cancelled(&mut shutdown) => {
                    info!(index, "shutdown while waiting for object description");
                    break;
                }
            };

            let sensor_data = capture::scan_object(&self.settings, scene).await?;
            let record = sensor_data | description.to_item();
            let path = self.layout.write_item(index, &record)?;
            summary.episodes_written += 1;
            info!(
                index,
                hardness = ?description.hardness,
                path = %path.display(),
                "episode persisted"
            );
        }

        info!(
            episodes = summary.episodes_written,
            next_index = summary.next_index(),
            "recording finished"
        );
        Ok(summary)
    }
}

/// Resolves once shutdown is requested; never if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Build the rig, record, and close the rig on every exit path.
pub async fn run_session(
    writer: &DatasetWriter,
    describer: &mut dyn ObjectDescriber,
    shutdown: watch::Receiver<bool>,
) -> AppResult<RunSummary> {
    let mut scene = scene::build_scene(&writer.settings).await?;
    let result = writer.run(&mut scene, describer, shutdown).await;
    let closed = scene.close().await;

    match (result, closed) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            error!(error = %close_err, "scene close failed after recording error");
            Err(err)
        }
    }
}
