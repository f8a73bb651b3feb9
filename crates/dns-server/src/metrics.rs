//! DNS query counters.

use prometheus::{IntCounterVec, Opts, Registry};

/// How a query was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Cluster,
    NxDomain,
    Forwarded,
    Failed,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Cluster => "cluster",
            Outcome::NxDomain => "nxdomain",
            Outcome::Forwarded => "forwarded",
            Outcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DnsMetrics {
    queries: IntCounterVec,
}

impl DnsMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let queries = IntCounterVec::new(
            Opts::new("provisioner_dns_queries_total", "DNS queries by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(queries.clone()))?;
        Ok(Self { queries })
    }

    pub fn query(&self, outcome: Outcome) {
        self.queries.with_label_values(&[outcome.label()]).inc();
    }
}
