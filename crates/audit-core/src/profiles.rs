//! Throttling profile registry
//!
//! A fixed, ordered catalog of device/connection classes the audit runs
//! under. Each profile bundles device emulation, a CPU slowdown multiplier,
//! network shaping parameters, and the equivalent settings handed to the
//! external audit engine, so in-page and lab measurements are comparable.
//!
//! Adding a profile is a static configuration change here, never a runtime
//! operation.

use serde::{Deserialize, Serialize};

/// Device metrics applied via `Emulation.setDeviceMetricsOverride`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEmulation {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
    pub user_agent: String,
}

/// Network shaping parameters for `Network.emulateNetworkConditions`.
///
/// A profile carrying `None` instead of this struct is unthrottled, which is
/// distinct from zero bandwidth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConditions {
    /// Download throughput in bytes per second.
    pub download_bps: f64,
    /// Upload throughput in bytes per second.
    pub upload_bps: f64,
    /// Additional round-trip latency in milliseconds.
    pub latency_ms: f64,
    pub offline: bool,
}

/// Throttling configuration passed to the external audit engine.
///
/// Must describe the same conditions as the profile's own CPU/network
/// parameters (same multiplier, same throughput/latency numbers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// `mobile` or `desktop`.
    pub form_factor: String,
    pub cpu_slowdown: f64,
    pub rtt_ms: f64,
    pub throughput_kbps: f64,
    /// Whether the engine emulates a mobile screen.
    pub screen_emulation_mobile: bool,
}

/// One named device/connection class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlingProfile {
    /// Stable identifier, used in artifact file names.
    pub id: String,
    /// Human-readable name for the markdown report.
    pub label: String,
    pub device: Option<DeviceEmulation>,
    /// CPU slowdown multiplier, always >= 1.
    pub cpu_slowdown: f64,
    pub network: Option<NetworkConditions>,
    pub engine: EngineSettings,
}

impl ThrottlingProfile {
    /// The fixed, ordered set of profiles every audit runs through.
    pub fn registry() -> Vec<ThrottlingProfile> {
        vec![
            ThrottlingProfile {
                id: "mobile".into(),
                label: "Mobile (mid-tier, 4x CPU, throttled 4G)".into(),
                device: Some(DeviceEmulation {
                    width: 390,
                    height: 844,
                    device_scale_factor: 3.0,
                    mobile: true,
                    user_agent: "Mozilla/5.0 (Linux; Android 11; moto g power (2022)) \
                                 AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 \
                                 Mobile Safari/537.36"
                        .into(),
                }),
                cpu_slowdown: 4.0,
                network: Some(NetworkConditions {
                    download_bps: 1_600_000.0 / 8.0,
                    upload_bps: 750_000.0 / 8.0,
                    latency_ms: 150.0,
                    offline: false,
                }),
                engine: EngineSettings {
                    form_factor: "mobile".into(),
                    cpu_slowdown: 4.0,
                    rtt_ms: 150.0,
                    throughput_kbps: 1_600.0,
                    screen_emulation_mobile: true,
                },
            },
            ThrottlingProfile {
                id: "desktop".into(),
                label: "Desktop (unthrottled CPU, broadband)".into(),
                device: None,
                cpu_slowdown: 1.0,
                network: Some(NetworkConditions {
                    download_bps: 10_000_000.0 / 8.0,
                    upload_bps: 10_000_000.0 / 8.0,
                    latency_ms: 40.0,
                    offline: false,
                }),
                engine: EngineSettings {
                    form_factor: "desktop".into(),
                    cpu_slowdown: 1.0,
                    rtt_ms: 40.0,
                    throughput_kbps: 10_000.0,
                    screen_emulation_mobile: false,
                },
            },
        ]
    }
}
