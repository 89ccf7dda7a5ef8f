//! Agent health, metrics and host resolution.

use metallic_proto::agent::agent_client::AgentClient;
use metallic_proto::agent::{GetHostRequest, HealthCheckRequest, MetricsRequest};
use serde::Serialize;
use tonic::transport::Channel;

use crate::error::{Result, check_success};
use crate::transport::AgentTransport;

/// Resource usage reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub cpu_count: u32,
    pub cpu_used_pct: f64,
    pub mem_total_mib: f64,
    pub mem_used_mib: f64,
    pub gpu: Option<String>,
    pub vram_total_mib: Option<f64>,
    pub vram_used_mib: Option<f64>,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct Agent {
    transport: AgentTransport,
    template: String,
    virtual_machine_id: String,
}

impl Agent {
    pub(crate) const fn new(
        transport: AgentTransport,
        template: String,
        virtual_machine_id: String,
    ) -> Self {
        Self {
            transport,
            template,
            virtual_machine_id,
        }
    }

    fn client(&self) -> AgentClient<Channel> {
        AgentClient::new(self.transport.channel())
    }

    pub async fn health_check(&self) -> Result<bool> {
        let resp = self
            .client()
            .health_check(self.transport.request(HealthCheckRequest {}))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;
        Ok(resp.success)
    }

    pub async fn metrics(&self) -> Result<Metrics> {
        let resp = self
            .client()
            .metrics(self.transport.request(MetricsRequest {}))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;
        Ok(Metrics {
            cpu_count: resp.cpu_count,
            cpu_used_pct: resp.cpu_used_pct,
            mem_total_mib: resp.mem_total_mib,
            mem_used_mib: resp.mem_used_mib,
            gpu: resp.gpu,
            vram_total_mib: resp.vram_total_mib,
            vram_used_mib: resp.vram_used_mib,
            timestamp: resp.timestamp,
        })
    }

    /// Ask the agent for the public host serving `port`.
    pub async fn get_host(&self, port: u16) -> Result<String> {
        let resp = self
            .client()
            .get_host(self.transport.request(GetHostRequest {
                template: self.template.clone(),
                virtual_machine_id: self.virtual_machine_id.clone(),
                port: u32::from(port),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;
        Ok(resp.host)
    }
}
