//! Device fingerprint analysis

use super::{SignalCollector, SignalContext};
use crate::types::{DeviceDescriptor, SignalScore, SignalSource, Transaction};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Score when the client sent no device descriptor
pub const MISSING_DEVICE_SCORE: f64 = 30.0;

const SPOOFING_WEIGHT: f64 = 40.0;
const EMULATOR_WEIGHT: f64 = 35.0;
const PROXY_WEIGHT: f64 = 25.0;
const VPN_WEIGHT: f64 = 25.0;

const AUTOMATION_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "headless",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
];

const EMULATOR_MARKERS: &[&str] = &[
    "emulator",
    "sdk_gphone",
    "android sdk built for",
    "genymotion",
    "bluestacks",
];

/// Device indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceIndicator {
    /// User agent is forged or automated
    Spoofing,
    /// Client runs in an emulator
    Emulator,
    /// Request came through a forwarding proxy
    Proxy,
    /// WebRTC leak differs from the origin address
    Vpn,
}

impl DeviceIndicator {
    fn weight(&self) -> f64 {
        match self {
            DeviceIndicator::Spoofing => SPOOFING_WEIGHT,
            DeviceIndicator::Emulator => EMULATOR_WEIGHT,
            DeviceIndicator::Proxy => PROXY_WEIGHT,
            DeviceIndicator::Vpn => VPN_WEIGHT,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            DeviceIndicator::Spoofing => "spoofing",
            DeviceIndicator::Emulator => "emulator",
            DeviceIndicator::Proxy => "proxy",
            DeviceIndicator::Vpn => "vpn",
        }
    }
}

/// Stable device fingerprint: hex SHA-256 of the descriptor fields and origin IP
pub fn fingerprint(transaction: &Transaction) -> Option<String> {
    let device = transaction.device.as_ref()?;

    let material = [
        device.user_agent.clone(),
        transaction.origin_ip.to_string(),
        device.screen.map(|s| s.to_string()).unwrap_or_default(),
        device.timezone.clone().unwrap_or_default(),
        device.language.clone().unwrap_or_default(),
    ]
    .join("|");

    Some(hex::encode(Sha256::digest(material.as_bytes())))
}

/// Detect indicators on a descriptor
pub fn indicators(device: &DeviceDescriptor, origin_ip: IpAddr) -> Vec<DeviceIndicator> {
    let ua = device.user_agent.to_ascii_lowercase();
    let mut found = Vec::new();

    let mobile_on_large_screen = ua.contains("mobile")
        && device
            .screen
            .map_or(false, |s| s.width.min(s.height) > 1200);
    if ua.trim().len() < 20
        || AUTOMATION_MARKERS.iter().any(|m| ua.contains(m))
        || mobile_on_large_screen
    {
        found.push(DeviceIndicator::Spoofing);
    }

    let zero_screen = device.screen.map_or(false, |s| s.width == 0 || s.height == 0);
    if zero_screen || EMULATOR_MARKERS.iter().any(|m| ua.contains(m)) {
        found.push(DeviceIndicator::Emulator);
    }

    if device.forwarded_for.iter().any(|ip| *ip != origin_ip) {
        found.push(DeviceIndicator::Proxy);
    }

    if device.webrtc_ip.map_or(false, |ip| ip != origin_ip) {
        found.push(DeviceIndicator::Vpn);
    }

    found
}

/// Device fingerprint analyzer
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceFingerprintAnalyzer;

impl DeviceFingerprintAnalyzer {
    /// Create analyzer
    pub fn new() -> Self {
        Self
    }

    /// Score a transaction synchronously
    pub fn score(&self, transaction: &Transaction) -> SignalScore {
        let Some(device) = transaction.device.as_ref() else {
            return SignalScore::new(SignalSource::Device, MISSING_DEVICE_SCORE)
                .with_reason("no device descriptor");
        };

        let found = indicators(device, transaction.origin_ip);
        let score: f64 = found.iter().map(DeviceIndicator::weight).sum();
        let labels: Vec<&str> = found.iter().map(DeviceIndicator::as_str).collect();

        let signal = SignalScore::new(SignalSource::Device, score.min(100.0)).with_details(json!({
            "fingerprint": fingerprint(transaction),
            "indicators": labels,
        }));
        if labels.is_empty() {
            signal
        } else {
            signal.with_reason(labels.join(", "))
        }
    }
}

#[async_trait]
impl SignalCollector for DeviceFingerprintAnalyzer {
    fn source(&self) -> SignalSource {
        SignalSource::Device
    }

    async fn collect(&self, ctx: &SignalContext<'_>) -> Result<SignalScore> {
        Ok(self.score(ctx.transaction))
    }
}
