//! Prometheus metrics.
//!
//! Follows the common pattern of one field per counter/gauge/histogram,
//! registered against a registry at construction, and serves them with a
//! hand-rolled HTTP/1.0 response over a raw `TcpListener` rather than
//! pulling in a full HTTP server stack for one text endpoint. This crate
//! uses the `prometheus` crate's own types directly instead of
//! `opentelemetry`, since nothing else here needs an OpenTelemetry pipeline.

use std::net::SocketAddr;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::warn;

pub struct Metrics {
    registry: Registry,
    pub connections_active: IntGaugeVec,
    pub connections_total: IntCounterVec,
    pub pdus_decoded_total: IntCounterVec,
    pub pdus_discarded_total: IntCounterVec,
    pub crc_failures_total: IntCounterVec,
    pub arq_retransmits_total: IntCounter,
    pub arq_window_occupancy: IntGauge,
    pub nonarq_slots_in_use: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_active = IntGaugeVec::new(
            Opts::new("sis066_connections_active", "Active connections by protocol"),
            &["proto"],
        )
        .expect("metric definition is valid");
        let connections_total = IntCounterVec::new(
            Opts::new("sis066_connections_total", "Total connections accepted by protocol"),
            &["proto"],
        )
        .expect("metric definition is valid");
        let pdus_decoded_total = IntCounterVec::new(
            Opts::new("sis066_pdus_decoded_total", "Total PDUs successfully decoded by protocol"),
            &["proto"],
        )
        .expect("metric definition is valid");
        let pdus_discarded_total = IntCounterVec::new(
            Opts::new("sis066_pdus_discarded_total", "Total PDUs discarded, by reason"),
            &["reason"],
        )
        .expect("metric definition is valid");
        let crc_failures_total = IntCounterVec::new(
            Opts::new("sis066_crc_failures_total", "Total CRC verification failures"),
            &["crc"],
        )
        .expect("metric definition is valid");
        let arq_retransmits_total = IntCounter::new(
            "sis066_arq_retransmits_total",
            "Total ARQ segment retransmissions",
        )
        .expect("metric definition is valid");
        let arq_window_occupancy = IntGauge::new(
            "sis066_arq_window_occupancy",
            "Most recently sampled ARQ transmit window occupancy",
        )
        .expect("metric definition is valid");
        let nonarq_slots_in_use = IntGauge::new(
            "sis066_nonarq_slots_in_use",
            "Non-ARQ reassembly slots currently in use",
        )
        .expect("metric definition is valid");

        for collector in [
            Box::new(connections_active.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(connections_total.clone()),
            Box::new(pdus_decoded_total.clone()),
            Box::new(pdus_discarded_total.clone()),
            Box::new(crc_failures_total.clone()),
        ] {
            registry.register(collector).expect("collector registered exactly once");
        }
        registry.register(Box::new(arq_retransmits_total.clone())).unwrap();
        registry.register(Box::new(arq_window_occupancy.clone())).unwrap();
        registry.register(Box::new(nonarq_slots_in_use.clone())).unwrap();

        Self {
            registry,
            connections_active,
            connections_total,
            pdus_decoded_total,
            pdus_discarded_total,
            crc_failures_total,
            arq_retransmits_total,
            arq_window_occupancy,
            nonarq_slots_in_use,
        }
    }

    fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("text encoding never fails");
        String::from_utf8(buf).expect("prometheus text exposition is valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve the Prometheus text exposition format on `addr`, one connection at
/// a time, with a minimal hand-rolled HTTP/1.0 response — chosen specifically
/// so this one-shot text endpoint does not need a `hyper` dependency.
pub async fn serve_prometheus_metrics(
    addr: SocketAddr,
    metrics: std::sync::Arc<Metrics>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (mut stream, _peer) = listener.accept().await?;
        let body = metrics.gather_text();
        let resp = format!(
            "HTTP/1.0 200 OK\r\ncontent-type: text/plain; version=0.0.4\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        tokio::spawn(async move {
            if let Err(e) = stream.write_all(resp.as_bytes()).await {
                warn!(error = %e, "metrics response write failed");
            }
            let _ = stream.shutdown().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_text_includes_registered_metric_names() {
        let m = Metrics::new();
        m.connections_total.with_label_values(&["sis"]).inc();
        let text = m.gather_text();
        assert!(text.contains("sis066_connections_total"));
        assert!(text.contains("sis066_arq_window_occupancy"));
    }
}
