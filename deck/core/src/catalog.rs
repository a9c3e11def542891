//! Model Catalog
//!
//! Installed and running models, and the operations that change them. Each
//! mutating operation refreshes the list it affects before returning, so a
//! view never shows a model that was just removed.
//!
//! The catalog is also what the supervisor resynchronizes after an outage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;

use crate::backend::{
    CreateModelRequest, GenerateRequest, InferenceApi, ModelInfo, ModelSummary, PullProgress,
    RunningModel,
};
use crate::error::ClientError;
use crate::store::{ModelCapabilityRecord, SessionStore};
use crate::supervisor::Resynchronize;

/// Cached model lists backed by the inference service
pub struct ModelCatalog<A: ?Sized> {
    api: Arc<A>,
    session: Arc<RwLock<SessionStore>>,
    models: RwLock<Vec<ModelSummary>>,
    running: RwLock<Vec<RunningModel>>,
}

impl<A: ?Sized> std::fmt::Debug for ModelCatalog<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCatalog")
            .field("models", &self.models.read().len())
            .field("running", &self.running.read().len())
            .finish_non_exhaustive()
    }
}

impl<A: InferenceApi + ?Sized> ModelCatalog<A> {
    /// Create an empty catalog
    pub fn new(api: Arc<A>, session: Arc<RwLock<SessionStore>>) -> Self {
        Self {
            api,
            session,
            models: RwLock::new(Vec::new()),
            running: RwLock::new(Vec::new()),
        }
    }

    /// Installed models as of the last refresh
    #[must_use]
    pub fn models(&self) -> Vec<ModelSummary> {
        self.models.read().clone()
    }

    /// Names of the installed models
    #[must_use]
    pub fn model_names(&self) -> Vec<String> {
        self.models.read().iter().map(|m| m.name.clone()).collect()
    }

    /// Loaded models as of the last refresh
    #[must_use]
    pub fn running_models(&self) -> Vec<RunningModel> {
        self.running.read().clone()
    }

    /// Running entry of the selected model, if it is loaded
    #[must_use]
    pub fn active_model(&self) -> Option<RunningModel> {
        let selected = self.session.read().selected_model().to_string();
        if selected.is_empty() {
            return None;
        }
        self.running
            .read()
            .iter()
            .find(|m| m.name == selected)
            .cloned()
    }

    /// Fetch the installed models and the details of each.
    ///
    /// A model whose details cannot be fetched gets an empty record. When no
    /// model is selected yet, the configured default (or the first model) is
    /// selected.
    ///
    /// # Errors
    ///
    /// Returns an error if the model list itself cannot be fetched.
    pub async fn refresh_models(&self) -> Result<Vec<ModelSummary>, ClientError> {
        let models = self.api.list_models().await?;

        let api = &self.api;
        let details: BTreeMap<String, ModelCapabilityRecord> =
            join_all(models.iter().map(|model| async move {
                let record = match api.show_model(&model.name, false).await {
                    Ok(info) => ModelCapabilityRecord::from_info(info),
                    Err(e) => {
                        tracing::debug!(model = %model.name, error = %e, "No details for model");
                        ModelCapabilityRecord::default()
                    }
                };
                (model.name.clone(), record)
            }))
            .await
            .into_iter()
            .collect();

        let names: Vec<String> = models.iter().map(|m| m.name.clone()).collect();
        {
            let mut session = self.session.write();
            session.replace_model_details(details);
            session.select_default_model(&names);
        }
        *self.models.write() = models.clone();

        tracing::info!(count = models.len(), "Refreshed model list");
        Ok(models)
    }

    /// Fetch the loaded models
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached.
    pub async fn refresh_running(&self) -> Result<Vec<RunningModel>, ClientError> {
        let running = self.api.running_models().await?;
        *self.running.write() = running.clone();
        tracing::debug!(count = running.len(), "Refreshed running models");
        Ok(running)
    }

    /// Full `/show` details of one model
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached or the model is unknown.
    pub async fn show(&self, model: &str, verbose: bool) -> Result<ModelInfo, ClientError> {
        self.api.show_model(model, verbose).await
    }

    /// Download a model, waiting for completion
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    pub async fn pull(&self, model: &str, insecure: bool) -> Result<PullProgress, ClientError> {
        tracing::info!(model, "Pulling model");
        let progress = self.api.pull_model(model, insecure).await?;
        self.refresh_models().await?;
        Ok(progress)
    }

    /// Delete a model. If it was selected, the first remaining model is
    /// selected instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete or the following refresh fails.
    pub async fn delete(&self, model: &str) -> Result<(), ClientError> {
        self.api.delete_model(model).await?;
        tracing::info!(model, "Deleted model");

        let models = self.refresh_models().await?;
        let mut session = self.session.write();
        if session.selected_model() == model {
            let next = models.first().map_or("", |m| m.name.as_str());
            session.select_model(next);
        }
        Ok(())
    }

    /// Copy a model under a new name
    ///
    /// # Errors
    ///
    /// Returns an error if the copy or the following refresh fails.
    pub async fn copy(&self, source: &str, destination: &str) -> Result<(), ClientError> {
        self.api.copy_model(source, destination).await?;
        tracing::info!(source, destination, "Copied model");
        self.refresh_models().await?;
        Ok(())
    }

    /// Create a model
    ///
    /// # Errors
    ///
    /// Returns an error if the create or the following refresh fails.
    pub async fn create(&self, request: &CreateModelRequest) -> Result<PullProgress, ClientError> {
        let progress = self.api.create_model(request).await?;
        tracing::info!(model = %request.model, status = %progress.status, "Created model");
        self.refresh_models().await?;
        Ok(progress)
    }

    /// Load a model into memory with an empty generate call
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the call.
    pub async fn load(&self, model: &str) -> Result<(), ClientError> {
        let request = GenerateRequest::new(model, "").with_stream(false);
        self.api.generate(&request).await?;
        tracing::info!(model, "Loaded model");
        self.refresh_running().await?;
        Ok(())
    }

    /// Unload a model immediately (`keep_alive: 0`)
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the call.
    pub async fn unload(&self, model: &str) -> Result<(), ClientError> {
        let request = GenerateRequest::new(model, "")
            .with_stream(false)
            .with_keep_alive(0);
        self.api.generate(&request).await?;
        tracing::info!(model, "Unloaded model");
        self.refresh_running().await?;
        Ok(())
    }
}

#[async_trait]
impl<A: InferenceApi + ?Sized> Resynchronize for ModelCatalog<A> {
    async fn resynchronize(&self) {
        if let Err(e) = self.refresh_models().await {
            tracing::warn!(error = %e, "Failed to refresh models after reconnect");
        }
        if let Err(e) = self.refresh_running().await {
            tracing::warn!(error = %e, "Failed to refresh running models after reconnect");
        }
    }
}
