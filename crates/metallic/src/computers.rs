//! `/computers` resource.

use tracing::info;

use crate::client::ApiClient;
use crate::computer::Computer;
use crate::error::Result;
use crate::types::{
    ComputerDestroyed, ComputerRecord, ComputerState, CreateComputerOptions, ListOptions, Page,
    UpdateComputerOptions,
};

#[derive(Debug, Clone)]
pub struct ComputerClient {
    api: ApiClient,
}

impl ComputerClient {
    pub(crate) const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn wrap(&self, record: ComputerRecord) -> Result<Computer> {
        Computer::new(self.api.clone(), record)
    }

    pub async fn create(&self, opts: &CreateComputerOptions) -> Result<Computer> {
        let record: ComputerRecord = self.api.post("/computers", Some(opts)).await?;
        info!(id = %record.id, template = record.template.slug(), "Created computer");
        self.wrap(record)
    }

    pub async fn list(&self, opts: &ListOptions) -> Result<Page<ComputerRecord>> {
        self.api.get("/computers", &opts.query()).await
    }

    pub async fn get(&self, id: &str) -> Result<Computer> {
        let record = self.api.get(&format!("/computers/{id}"), &[]).await?;
        self.wrap(record)
    }

    pub async fn start(&self, id: &str) -> Result<Computer> {
        let record = self
            .api
            .post::<(), _>(&format!("/computers/{id}/start"), None)
            .await?;
        self.wrap(record)
    }

    pub async fn stop(&self, id: &str) -> Result<Computer> {
        let record = self
            .api
            .post::<(), _>(&format!("/computers/{id}/stop"), None)
            .await?;
        self.wrap(record)
    }

    pub async fn update(&self, id: &str, opts: &UpdateComputerOptions) -> Result<Computer> {
        let record = self.api.put(&format!("/computers/{id}"), opts).await?;
        self.wrap(record)
    }

    pub async fn destroy(&self, id: &str) -> Result<ComputerDestroyed> {
        info!(id, "Destroying computer");
        self.api.delete(&format!("/computers/{id}")).await
    }

    /// Attach to an existing computer, starting it if needed.
    pub async fn connect(&self, id: &str) -> Result<Computer> {
        let record = self
            .api
            .post::<(), _>(&format!("/computers/{id}/connect"), None)
            .await?;
        self.wrap(record)
    }

    pub async fn fork(&self, id: &str) -> Result<Computer> {
        let record = self
            .api
            .post::<(), _>(&format!("/computers/{id}/fork"), None)
            .await?;
        self.wrap(record)
    }

    /// Block server-side until computer `id` reaches `state`.
    pub async fn wait_for_state(&self, id: &str, state: ComputerState) -> Result<Computer> {
        let record = self
            .api
            .get(
                &format!("/computers/{id}/wait"),
                &[("state", state.to_string())],
            )
            .await?;
        self.wrap(record)
    }
}
