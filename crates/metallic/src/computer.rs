//! A provisioned computer and the tools that reach into it.
//!
//! A [`Computer`] pairs the latest control-plane snapshot with one shared
//! agent transport. Which optional tools it carries is decided once, from the
//! template's base template, and recorded in [`Capabilities`].

use tracing::{debug, info};

use crate::client::ApiClient;
use crate::error::Result;
use crate::tools::{Agent, Browser, CodeInterpreter, Filesystem, Metrics, Terminal};
use crate::transport::{AgentTransport, agent_url, host_for};
use crate::types::{
    BROWSER_TEMPLATE, CODE_INTERPRETER_TEMPLATE, ComputerDestroyed, ComputerRecord, ComputerState,
    UpdateComputerOptions,
};

/// Optional tools available on a computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub browser: bool,
    pub code_interpreter: bool,
}

impl Capabilities {
    pub fn for_base_template(base_template: &str) -> Self {
        Self {
            browser: base_template == BROWSER_TEMPLATE,
            code_interpreter: base_template == CODE_INTERPRETER_TEMPLATE,
        }
    }
}

#[derive(Debug, Clone)]
struct Tools {
    agent: Agent,
    fs: Filesystem,
    terminal: Terminal,
    browser: Option<Browser>,
    code: Option<CodeInterpreter>,
}

impl Tools {
    fn build(api: &ApiClient, record: &ComputerRecord, capabilities: Capabilities) -> Result<Self> {
        let config = api.config();
        let slug = record.template.slug();
        let vm = &record.virtual_machine_id;
        let transport = AgentTransport::new(&agent_url(slug, vm, &config.domain), &config.api_key)?;

        let browser = capabilities.browser.then(|| {
            Browser::new(
                transport.clone(),
                slug.to_string(),
                vm.clone(),
                config.domain.clone(),
            )
        });
        let code = capabilities.code_interpreter.then(|| {
            CodeInterpreter::for_computer(api.streaming_http().clone(), slug, vm, &config.domain)
        });

        Ok(Self {
            agent: Agent::new(transport.clone(), slug.to_string(), vm.clone()),
            fs: Filesystem::new(transport.clone()),
            terminal: Terminal::new(transport),
            browser,
            code,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Computer {
    api: ApiClient,
    record: ComputerRecord,
    capabilities: Capabilities,
    tools: Tools,
}

impl Computer {
    /// Wrap a snapshot. Makes no network calls.
    pub fn new(api: ApiClient, record: ComputerRecord) -> Result<Self> {
        let capabilities = Capabilities::for_base_template(record.template.base_template());
        let tools = Tools::build(&api, &record, capabilities)?;
        Ok(Self {
            api,
            record,
            capabilities,
            tools,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub const fn state(&self) -> ComputerState {
        self.record.state
    }

    pub fn virtual_machine_id(&self) -> &str {
        &self.record.virtual_machine_id
    }

    pub fn template_slug(&self) -> &str {
        self.record.template.slug()
    }

    /// Latest snapshot from the control plane.
    pub const fn record(&self) -> &ComputerRecord {
        &self.record
    }

    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub const fn agent(&self) -> &Agent {
        &self.tools.agent
    }

    pub const fn fs(&self) -> &Filesystem {
        &self.tools.fs
    }

    pub const fn terminal(&self) -> &Terminal {
        &self.tools.terminal
    }

    /// Present when the base template is `metallic-browser`.
    pub const fn browser(&self) -> Option<&Browser> {
        self.tools.browser.as_ref()
    }

    /// Present when the base template is `metallic-code-interpreter`.
    pub const fn code(&self) -> Option<&CodeInterpreter> {
        self.tools.code.as_ref()
    }

    /// Public hostname for `port`, computed locally.
    pub fn host(&self, port: u16) -> String {
        host_for(
            self.record.template.slug(),
            &self.record.virtual_machine_id,
            port,
            &self.api.config().domain,
        )
    }

    /// Public hostname for `port`, as reported by the agent.
    pub async fn get_host(&self, port: u16) -> Result<String> {
        self.tools.agent.get_host(port).await
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.tools.agent.health_check().await
    }

    pub async fn metrics(&self) -> Result<Metrics> {
        self.tools.agent.metrics().await
    }

    pub async fn start(&mut self) -> Result<()> {
        info!(id = %self.record.id, "Starting computer");
        let record = self.api.post::<(), _>(&self.path("/start"), None).await?;
        self.replace(record)
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!(id = %self.record.id, "Stopping computer");
        let record = self.api.post::<(), _>(&self.path("/stop"), None).await?;
        self.replace(record)
    }

    pub async fn update(&mut self, opts: &UpdateComputerOptions) -> Result<()> {
        let record = self.api.put(&self.path(""), opts).await?;
        self.replace(record)
    }

    /// Re-read the snapshot.
    pub async fn refresh(&mut self) -> Result<()> {
        let record = self.api.get(&self.path(""), &[]).await?;
        self.replace(record)
    }

    /// Block server-side until the computer reaches `state`.
    pub async fn wait_for_state(&mut self, state: ComputerState) -> Result<()> {
        debug!(id = %self.record.id, %state, "Waiting for state");
        let record = self
            .api
            .get(&self.path("/wait"), &[("state", state.to_string())])
            .await?;
        self.replace(record)
    }

    pub async fn destroy(&mut self) -> Result<ComputerDestroyed> {
        info!(id = %self.record.id, "Destroying computer");
        let destroyed: ComputerDestroyed = self.api.delete(&self.path("")).await?;
        if destroyed.destroyed {
            self.record.state = ComputerState::Destroyed;
        }
        Ok(destroyed)
    }

    /// Fork into a new computer.
    pub async fn fork(&self) -> Result<Self> {
        let record = self.api.post::<(), _>(&self.path("/fork"), None).await?;
        Self::new(self.api.clone(), record)
    }

    fn path(&self, suffix: &str) -> String {
        format!("/computers/{}{suffix}", self.record.id)
    }

    /// Swap in a new snapshot. Tools are rebuilt only if the agent address
    /// changed.
    fn replace(&mut self, record: ComputerRecord) -> Result<()> {
        let moved = record.virtual_machine_id != self.record.virtual_machine_id
            || record.template.slug() != self.record.template.slug();
        if moved {
            let capabilities = Capabilities::for_base_template(record.template.base_template());
            self.tools = Tools::build(&self.api, &record, capabilities)?;
            self.capabilities = capabilities;
        }
        self.record = record;
        Ok(())
    }
}
