//! Network and CPU throttling via Chrome DevTools Protocol
//!
//! Applies a profile's CPU slowdown with `Emulation.setCPUThrottlingRate`
//! and its network shaping parameters with
//! `Network.emulateNetworkConditions`. Throttling is applied once per
//! session, after the instrumentation domains are enabled and before
//! navigation.

#![allow(deprecated)] // EmulateNetworkConditionsParams is deprecated but still functional

use chromiumoxide::cdp::browser_protocol::emulation::SetCpuThrottlingRateParams;
use chromiumoxide::cdp::browser_protocol::network::{
    ConnectionType, EmulateNetworkConditionsParams,
};
use chromiumoxide::Page;
use tracing::{debug, instrument};

use crate::error::{AuditError, Result};
use crate::profiles::NetworkConditions;

/// CPU throttling controller
pub struct CpuThrottler;

impl CpuThrottler {
    /// Apply a CPU slowdown multiplier (1.0 = full speed, 4.0 = 4x slower).
    #[instrument(skip(page), fields(rate = %rate))]
    pub async fn apply(page: &Page, rate: f64) -> Result<()> {
        if rate < 1.0 {
            return Err(AuditError::Config(format!(
                "CPU slowdown multiplier must be >= 1.0 (got {rate})"
            )));
        }

        debug!("Applying CPU throttling with {}x slowdown", rate);

        let params = SetCpuThrottlingRateParams::builder()
            .rate(rate)
            .build()
            .map_err(AuditError::Instrumentation)?;

        page.execute(params)
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        Ok(())
    }
}

/// Network throttling controller
pub struct NetworkThrottler;

impl NetworkThrottler {
    /// Emulate the given network conditions on a page.
    ///
    /// Callers only invoke this for profiles that define conditions; a
    /// profile without them is unthrottled and never reaches this code.
    #[instrument(skip(page, conditions))]
    pub async fn apply(page: &Page, conditions: &NetworkConditions) -> Result<()> {
        debug!(
            "Applying network throttling: offline={}, latency={}ms, down={:.2} KB/s, up={:.2} KB/s",
            conditions.offline,
            conditions.latency_ms,
            conditions.download_bps / 1024.0,
            conditions.upload_bps / 1024.0
        );

        let params = EmulateNetworkConditionsParams::builder()
            .offline(conditions.offline)
            .latency(conditions.latency_ms)
            .download_throughput(conditions.download_bps)
            .upload_throughput(conditions.upload_bps)
            .connection_type(ConnectionType::Cellular4g)
            .build()
            .map_err(AuditError::Instrumentation)?;

        page.execute(params)
            .await
            .map_err(|e| AuditError::Instrumentation(e.to_string()))?;

        Ok(())
    }
}
