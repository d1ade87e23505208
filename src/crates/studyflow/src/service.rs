//! Process-level surface over the executor.

use std::sync::Arc;
use studyflow_checkpoint::{
    BincodeSerializer, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
use studyflow_core::{
    CompletionService, EditAudit, ExecutionState, Executor, ImageRef, ProcessInput, ProcessOutput,
    ThreadSnapshot,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::build_backend;
use crate::config::{SnapshotFormat, StoreBackend, StudyflowConfig};
use crate::error::{Result, StudyflowError};
use crate::sink::FileArtifactSink;
use crate::stages::{build_pipeline, PipelineOptions};

/// Study sessions keyed by thread id.
pub struct StudyService {
    executor: Executor,
}

impl StudyService {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Wire the configured backend, store, artifact sink and pipeline.
    pub async fn from_config(config: &StudyflowConfig) -> Result<Self> {
        let backend = build_backend(&config.llm)?;
        Self::with_completion(config, backend.completion).await
    }

    /// Same as [`from_config`](Self::from_config) with a caller-supplied
    /// completion backend.
    pub async fn with_completion(
        config: &StudyflowConfig,
        completion: Arc<dyn CompletionService>,
    ) -> Result<Self> {
        config.validate()?;
        let store = open_store(config).await?;
        let sink = Arc::new(FileArtifactSink::new(config.artifacts_dir()));
        let registry = build_pipeline(&PipelineOptions::from_config(config))?;

        let executor = Executor::new(registry, store, completion, sink)
            .with_config(config.execution.executor_config());
        Ok(Self::new(executor))
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Send text (and images on a fresh thread) to a thread. Without a
    /// thread id a new one is generated.
    pub async fn submit(
        &self,
        thread_id: Option<&str>,
        text: &str,
        images: Vec<ImageRef>,
    ) -> Result<ProcessOutput> {
        let thread_id = match thread_id {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let input = ProcessInput::text(text).with_images(images);
        Ok(self.executor.process(&thread_id, input).await?)
    }

    /// Persisted view of a thread.
    pub async fn state(&self, thread_id: &str) -> Result<ThreadSnapshot> {
        self.executor
            .snapshot(thread_id)
            .await?
            .ok_or_else(|| StudyflowError::ThreadNotFound(thread_id.to_string()))
    }

    /// Returns whether the thread existed.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        Ok(self.executor.delete_thread(thread_id).await?)
    }

    pub async fn threads(&self) -> Result<Vec<String>> {
        Ok(self.executor.threads().await?)
    }

    /// Edits applied to a thread's document since the process started.
    pub fn edits(&self, thread_id: &str) -> Vec<EditAudit> {
        self.executor.sessions().edits(thread_id)
    }

    /// Continue every thread whose last run stopped between stages.
    /// Failures are logged and skipped.
    pub async fn recover_interrupted(&self) -> Result<Vec<ProcessOutput>> {
        let mut recovered = Vec::new();
        for thread_id in self.executor.interrupted_threads().await? {
            match self.executor.recover(&thread_id).await {
                Ok(output) => recovered.push(output),
                Err(err) => warn!(thread_id = %thread_id, error = %err, "Recovery failed"),
            }
        }
        info!(count = recovered.len(), "Interrupted threads recovered");
        Ok(recovered)
    }
}

async fn open_store(config: &StudyflowConfig) -> Result<Arc<dyn CheckpointStore<ExecutionState>>> {
    let store: Arc<dyn CheckpointStore<ExecutionState>> = match (&config.store.backend, &config.store.format) {
        (StoreBackend::Memory, _) => Arc::new(InMemoryCheckpointStore::<ExecutionState>::new()),
        (StoreBackend::File, SnapshotFormat::Json) => {
            Arc::new(FileCheckpointStore::<ExecutionState>::open(config.store_path()).await?)
        }
        (StoreBackend::File, SnapshotFormat::Bincode) => Arc::new(
            FileCheckpointStore::<ExecutionState, _>::with_serializer(
                config.store_path(),
                BincodeSerializer::new(),
            )
            .await?,
        ),
    };
    Ok(store)
}
