mod join;
mod reencode;
mod report;
mod timestamp;
mod upload;
mod zip_stage;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::error::{CloneError, Result};
use crate::core::store::{PublishStep, TaskStatus, TaskStore};
use crate::core::telegram::TelegramClient;

/// Dedicated workspace subtree for one publish project.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn zipped(&self) -> PathBuf {
        self.root.join("zipped")
    }

    pub fn report(&self) -> PathBuf {
        self.root.join("report")
    }

    pub fn reencoded(&self) -> PathBuf {
        self.root.join("reencoded")
    }

    pub fn joined(&self) -> PathBuf {
        self.root.join("joined")
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join("summary")
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.zipped(),
            self.report(),
            self.reencoded(),
            self.joined(),
            self.summary(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Drop leftovers of interrupted stage runs. Finished artefacts are
    /// renamed into place atomically, so everything still carrying the
    /// `.tmp` suffix is garbage.
    pub fn clean_partials(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry.map_err(|err| {
                CloneError::Io(std::io::Error::other(format!("workspace walk: {err}")))
            })?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|ext| ext.to_str()) == Some("tmp")
            {
                warn!(path = %entry.path().display(), "removing partial stage output");
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// Everything a stage needs to read its inputs and place its artefacts.
pub(crate) struct StageEnv<'a> {
    pub config: &'a Config,
    pub source: &'a Path,
    pub workspace: &'a Workspace,
    pub cancel: &'a CancelToken,
    pub project: &'a str,
}

/// A file discovered under the source folder, addressed relative to it.
#[derive(Debug, Clone)]
pub(crate) struct FileEntry {
    pub rel: String,
    pub abs: PathBuf,
    pub size: u64,
}

/// Walk the source tree and return entries in stable lexicographic order.
pub(crate) async fn collect_files(
    source: &Path,
    config: &Config,
    videos: bool,
) -> Result<Vec<FileEntry>> {
    let source = source.to_path_buf();
    let config = config.clone();
    let entries = tokio::task::spawn_blocking(move || -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&source) {
            let entry = entry.map_err(|err| {
                CloneError::Io(std::io::Error::other(format!("source walk: {err}")))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if config.is_video_path(entry.path()) != videos {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&source)
                .expect("walked path is under the source root")
                .to_string_lossy()
                .into_owned();
            let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            entries.push(FileEntry {
                rel,
                abs: entry.path().to_path_buf(),
                size,
            });
        }
        entries.sort_by(|a, b| a.rel.cmp(&b.rel));
        Ok(entries)
    })
    .await
    .map_err(|err| CloneError::Io(std::io::Error::other(format!("walk task: {err}"))))??;
    Ok(entries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    /// An authorisation gate was declined; the task stays at this step.
    Halted(PublishStep),
}

/// Deterministic stage machine over `PublishTask.current_step`. Each stage
/// is idempotent given the workspace state; re-entry after a crash repeats
/// only the last incomplete stage.
pub struct PublishPipeline {
    client: Arc<dyn TelegramClient>,
    store: Arc<TaskStore>,
    config: Config,
    cancel: CancelToken,
    assume_yes: bool,
    source_folder: PathBuf,
    source_key: String,
    project_name: String,
    workspace: Workspace,
}

impl PublishPipeline {
    pub async fn open(
        client: Arc<dyn TelegramClient>,
        store: Arc<TaskStore>,
        config: Config,
        cancel: CancelToken,
        folder: &Path,
        restart: bool,
        assume_yes: bool,
    ) -> Result<Self> {
        if !folder.is_dir() {
            return Err(CloneError::Unresolvable(format!(
                "not a folder: {}",
                folder.display()
            )));
        }
        let source_folder = folder.canonicalize()?;
        let source_key = source_folder.to_string_lossy().into_owned();
        let mut project_name = source_folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        let max_len = config.max_path.min(120);
        if project_name.chars().count() > max_len {
            project_name = project_name.chars().take(max_len).collect();
        }

        let workspace = Workspace::new(config.workspace_root().join(&project_name));

        if restart {
            info!(project = project_name, "restart requested, dropping publish task");
            store.delete_publish_task(&source_key).await?;
            if workspace.root().exists() {
                std::fs::remove_dir_all(workspace.root())?;
            }
        }
        store
            .get_or_create_publish_task(&source_key, &project_name)
            .await?;

        Ok(Self {
            client,
            store,
            config,
            cancel,
            assume_yes,
            source_folder,
            source_key,
            project_name,
            workspace,
        })
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub async fn run(&self) -> Result<PipelineOutcome> {
        self.store
            .set_publish_status(&self.source_key, TaskStatus::Running)
            .await?;

        let outcome = self.drive().await;
        match &outcome {
            Ok(PipelineOutcome::Completed) => {
                self.store
                    .set_publish_status(&self.source_key, TaskStatus::Completed)
                    .await?;
            }
            Ok(PipelineOutcome::Halted(step)) => {
                info!(step = step.as_str(), "pipeline halted at authorisation gate");
                self.store
                    .set_publish_status(&self.source_key, TaskStatus::Pending)
                    .await?;
            }
            Err(CloneError::Interrupted) => {
                self.store
                    .set_publish_status(&self.source_key, TaskStatus::Pending)
                    .await?;
            }
            Err(_) => {
                self.store
                    .set_publish_status(&self.source_key, TaskStatus::Failed)
                    .await?;
            }
        }
        outcome
    }

    async fn drive(&self) -> Result<PipelineOutcome> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(CloneError::Interrupted);
            }
            let task = self
                .store
                .get_publish_task(&self.source_key)
                .await?
                .ok_or_else(|| CloneError::Permanent("publish task disappeared".into()))?;

            let step = task.current_step;
            let env = StageEnv {
                config: &self.config,
                source: &self.source_folder,
                workspace: &self.workspace,
                cancel: &self.cancel,
                project: &self.project_name,
            };

            info!(step = step.as_str(), project = self.project_name, "publish stage");
            match step {
                PublishStep::Init => {
                    self.workspace.ensure()?;
                }
                PublishStep::Zip => {
                    self.workspace.clean_partials()?;
                    zip_stage::run(&env).await?;
                }
                PublishStep::Report => {
                    self.workspace.clean_partials()?;
                    report::run(&env).await?;
                }
                PublishStep::ReencodeAuth => {
                    if !self.authorize("The re-encode report is ready. Proceed with re-encoding?")? {
                        return Ok(PipelineOutcome::Halted(step));
                    }
                }
                PublishStep::Reencode => {
                    self.workspace.clean_partials()?;
                    reencode::run(&env).await?;
                }
                PublishStep::Join => {
                    self.workspace.clean_partials()?;
                    join::run(&env).await?;
                }
                PublishStep::Timestamp => {
                    self.workspace.clean_partials()?;
                    timestamp::run(&env).await?;
                }
                PublishStep::UploadAuth => {
                    if !self.authorize("Everything is staged. Upload to the destination channel?")? {
                        return Ok(PipelineOutcome::Halted(step));
                    }
                }
                PublishStep::Upload => {
                    self.workspace.clean_partials()?;
                    upload::run(
                        &env,
                        self.client.as_ref(),
                        &self.store,
                        &self.source_key,
                        &task,
                    )
                    .await?;
                }
                PublishStep::Done => {
                    info!(project = self.project_name, "publish pipeline complete");
                    return Ok(PipelineOutcome::Completed);
                }
            }

            // Latch only after the stage's artefacts are on disk.
            self.store
                .complete_publish_step(&self.source_key, step)
                .await?;
        }
    }

    fn authorize(&self, question: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        inquire::Confirm::new(question)
            .with_default(false)
            .prompt()
            .map_err(|err| CloneError::Io(std::io::Error::other(err.to_string())))
    }
}
