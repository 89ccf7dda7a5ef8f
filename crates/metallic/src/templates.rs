//! `/templates` resource.

use crate::client::ApiClient;
use crate::error::Result;
use crate::types::{ListOptions, Page, Template, TemplateDestroyed, UpdateTemplateOptions};

#[derive(Debug, Clone)]
pub struct TemplateClient {
    api: ApiClient,
}

impl TemplateClient {
    pub(crate) const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self, opts: &ListOptions) -> Result<Page<Template>> {
        self.api.get("/templates", &opts.query()).await
    }

    pub async fn get(&self, slug: &str) -> Result<Template> {
        self.api.get(&format!("/templates/{slug}"), &[]).await
    }

    pub async fn update(&self, slug: &str, opts: &UpdateTemplateOptions) -> Result<Template> {
        self.api.put(&format!("/templates/{slug}"), opts).await
    }

    pub async fn destroy(&self, slug: &str) -> Result<TemplateDestroyed> {
        self.api.delete(&format!("/templates/{slug}")).await
    }
}
