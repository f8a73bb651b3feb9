//! Process-wide Prometheus registry.

use dns_server::DnsMetrics;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use pxe_server::BootMetrics;
use templating::Artifact;

/// Every metric the provisioner exports, sharing one registry.
#[derive(Debug, Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    is_master: IntGauge,
    template_renders: IntCounterVec,
    pub boot: BootMetrics,
    pub dns: DnsMetrics,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let is_master = IntGauge::new("provisioner_is_master", "1 while this instance holds mastership")?;
        registry.register(Box::new(is_master.clone()))?;

        let template_renders = IntCounterVec::new(
            Opts::new("provisioner_template_renders_total", "Template renders by artifact"),
            &["artifact"],
        )?;
        registry.register(Box::new(template_renders.clone()))?;

        let boot = BootMetrics::new(&registry)?;
        let dns = DnsMetrics::new(&registry)?;

        Ok(Self {
            registry,
            is_master,
            template_renders,
            boot,
            dns,
        })
    }

    pub fn set_master(&self, master: bool) {
        self.is_master.set(i64::from(master));
    }

    pub fn template_rendered(&self, artifact: Artifact) {
        self.template_renders.with_label_values(&[artifact.name()]).inc();
    }

    /// Text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let metrics = ControllerMetrics::new().unwrap();
        metrics.set_master(true);
        metrics.template_rendered(Artifact::CloudConfig);
        metrics.boot.lease_assigned();

        let text = metrics.encode().unwrap();
        assert!(text.contains("provisioner_is_master 1"));
        assert!(text.contains("provisioner_template_renders_total{artifact=\"cloudconfig\"} 1"));
        assert!(text.contains("provisioner_leases_assigned_total 1"));
    }
}
