//! Shared daemon state: the pool, SAP table, bridge routing
//! table, and metrics every connection task needs a handle to. One `AppState`
//! is built at startup and `Arc`-shared into every spawned connection task.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sis066_core::address::Address;
use sis066_core::config::{ArqConfig, Config};
use sis066_core::connection::ConnectionIds;
use sis066_core::metrics::Metrics;
use sis066_core::pool::Pool;
use sis066_core::sap::SapTable;

use crate::routing::RoutingTable;

pub struct AppState {
    pub pool: Pool,
    pub sap_table: SapTable,
    pub routing: RoutingTable,
    pub metrics: Arc<Metrics>,
    pub ids: ConnectionIds,
    pub station_address: Address,
    pub arq: ArqConfig,
    pub shutdown_timeout: Duration,
    c_pdu_ids: AtomicU16,
}

impl AppState {
    pub fn new(config: &Config) -> sis066_core::Result<Self> {
        let station_address = Address::new(config.station_address.clone())?;
        Ok(Self {
            pool: Pool::new(config.pool.initial_pdus, config.pool.high_water, config.pool.pdu_capacity),
            sap_table: SapTable::new(),
            routing: RoutingTable::new(),
            metrics: Arc::new(Metrics::new()),
            ids: ConnectionIds::default(),
            station_address,
            arq: config.arq,
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
            c_pdu_ids: AtomicU16::new(0),
        })
    }

    /// Next Non-ARQ C_PDU id, wrapping within the
    /// 12-bit id space every frame carries.
    pub fn next_c_pdu_id(&self) -> u16 {
        self.c_pdu_ids.fetch_add(1, Ordering::Relaxed) & 0x0FFF
    }
}
