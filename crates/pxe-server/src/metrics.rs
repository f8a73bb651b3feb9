//! Boot server counters.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

#[derive(Debug, Clone)]
pub struct BootMetrics {
    dhcp_messages: IntCounterVec,
    leases_assigned: IntCounter,
    pxe_replies: IntCounter,
}

impl BootMetrics {
    /// Create the counters and register them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let dhcp_messages = IntCounterVec::new(
            Opts::new("provisioner_dhcp_messages_total", "DHCP messages received by type"),
            &["type"],
        )?;
        registry.register(Box::new(dhcp_messages.clone()))?;

        let leases_assigned = IntCounter::new("provisioner_leases_assigned_total", "Leases offered or acknowledged")?;
        registry.register(Box::new(leases_assigned.clone()))?;

        let pxe_replies = IntCounter::new("provisioner_pxe_replies_total", "Proxy-DHCP boot replies sent")?;
        registry.register(Box::new(pxe_replies.clone()))?;

        Ok(Self {
            dhcp_messages,
            leases_assigned,
            pxe_replies,
        })
    }

    pub fn dhcp_message(&self, kind: &str) {
        self.dhcp_messages.with_label_values(&[kind]).inc();
    }

    pub fn lease_assigned(&self) {
        self.leases_assigned.inc();
    }

    pub fn pxe_reply(&self) {
        self.pxe_replies.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        let registry = Registry::new();
        let metrics = BootMetrics::new(&registry).unwrap();
        metrics.dhcp_message("discover");
        metrics.dhcp_message("discover");
        metrics.lease_assigned();

        let text = prometheus::TextEncoder::new().encode_to_string(&registry.gather()).unwrap();
        assert!(text.contains("provisioner_dhcp_messages_total{type=\"discover\"} 2"));
        assert!(text.contains("provisioner_leases_assigned_total 1"));
        assert!(BootMetrics::new(&registry).is_err());
    }
}
