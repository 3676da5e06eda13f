//! Prometheus metrics for the node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`]; [`NodeMetrics::encode`]
//! renders it in the text exposition format.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

pub struct NodeMetrics {
    pub registry: Registry,

    /// Blocks sealed and imported by the local miner.
    pub blocks_mined: IntCounter,
    /// Bloom bit retrievals answered by the worker pool.
    pub bloom_retrievals: IntCounter,
    /// Remote transactions dropped because the node does not accept them yet.
    pub txs_dropped: IntCounter,

    /// 1 while the miner is running.
    pub mining: IntGauge,
    /// Complete bloom-bits sections.
    pub bloom_sections: IntGauge,
    /// Number of the current chain head.
    pub chain_head: IntGauge,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let blocks_mined = register_int_counter_with_registry!(
            Opts::new("ess_blocks_mined_total", "Blocks sealed by the local miner"),
            registry
        )?;
        let bloom_retrievals = register_int_counter_with_registry!(
            Opts::new(
                "ess_bloom_retrievals_total",
                "Bloom bit retrievals served to filter sessions"
            ),
            registry
        )?;
        let txs_dropped = register_int_counter_with_registry!(
            Opts::new(
                "ess_txs_dropped_total",
                "Remote transactions dropped while not accepting transactions"
            ),
            registry
        )?;
        let mining = register_int_gauge_with_registry!(
            Opts::new("ess_mining", "Whether the miner is running"),
            registry
        )?;
        let bloom_sections = register_int_gauge_with_registry!(
            Opts::new("ess_bloom_sections", "Complete bloom-bits sections"),
            registry
        )?;
        let chain_head = register_int_gauge_with_registry!(
            Opts::new("ess_chain_head", "Number of the canonical chain head"),
            registry
        )?;

        Ok(Self {
            registry,
            blocks_mined,
            bloom_retrievals,
            txs_dropped,
            mining,
            bloom_sections,
            chain_head,
        })
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_metrics() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.blocks_mined.inc();
        metrics.bloom_sections.set(3);
        let text = metrics.encode().unwrap();
        assert!(text.contains("ess_blocks_mined_total 1"));
        assert!(text.contains("ess_bloom_sections 3"));
    }
}
