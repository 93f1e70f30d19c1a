//! Geolocation and anonymization check
//!
//! The checker reports a validity verdict rather than a graded score: an
//! invalid location forces a HIGH decision regardless of the aggregate.

use super::{SignalCollector, SignalContext};
use crate::config::{GeoConfig, GeoNetwork};
use crate::types::{SignalScore, SignalSource};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

/// Resolved location of an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLookup {
    /// ISO country code
    pub country: String,
    /// Address belongs to a VPN, proxy or Tor range
    pub anonymizer: bool,
}

/// IP geolocation provider
#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// Resolve `ip`; `None` when the address is unknown
    async fn lookup(&self, ip: IpAddr) -> Result<Option<GeoLookup>>;
}

#[derive(Debug, Clone)]
struct Network {
    base: u128,
    prefix: u8,
    v4: bool,
    location: GeoLookup,
}

impl Network {
    fn parse(entry: &GeoNetwork) -> Result<Self> {
        let invalid = || Error::InvalidConfig(format!("invalid CIDR block {:?}", entry.cidr));

        let (addr, prefix) = entry.cidr.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.trim().parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
        let (bits, v4) = address_bits(addr);
        let max_prefix = if v4 { 32 } else { 128 };
        if prefix > max_prefix {
            return Err(invalid());
        }

        Ok(Self {
            base: bits & mask(prefix, v4),
            prefix,
            v4,
            location: GeoLookup {
                country: entry.country.to_ascii_uppercase(),
                anonymizer: entry.anonymizer,
            },
        })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        let (bits, v4) = address_bits(ip);
        v4 == self.v4 && bits & mask(self.prefix, v4) == self.base
    }
}

fn address_bits(ip: IpAddr) -> (u128, bool) {
    match ip {
        IpAddr::V4(v4) => (u128::from(u32::from(v4)), true),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => (u128::from(u32::from(v4)), true),
            None => (u128::from(v6), false),
        },
    }
}

fn mask(prefix: u8, v4: bool) -> u128 {
    let width: u32 = if v4 { 32 } else { 128 };
    let prefix = u32::from(prefix).min(width);
    if prefix == 0 {
        return 0;
    }
    let ones = u128::MAX << (128 - prefix);
    ones >> (128 - width)
}

/// Geolocator over a static network table, longest prefix wins
#[derive(Debug, Clone, Default)]
pub struct StaticGeoLocator {
    networks: Vec<Network>,
}

impl StaticGeoLocator {
    /// Build from configured networks
    pub fn new(networks: &[GeoNetwork]) -> Result<Self> {
        let mut parsed = networks.iter().map(Network::parse).collect::<Result<Vec<_>>>()?;
        parsed.sort_by(|a, b| b.prefix.cmp(&a.prefix));
        Ok(Self { networks: parsed })
    }

    fn resolve(&self, ip: IpAddr) -> Option<GeoLookup> {
        self.networks
            .iter()
            .find(|n| n.contains(ip))
            .map(|n| n.location.clone())
    }
}

#[async_trait]
impl GeoLocator for StaticGeoLocator {
    async fn lookup(&self, ip: IpAddr) -> Result<Option<GeoLookup>> {
        Ok(self.resolve(ip))
    }
}

/// Geolocation checker
pub struct GeolocationChecker {
    locator: Arc<dyn GeoLocator>,
    high_risk: HashSet<String>,
    reject_unresolved: bool,
}

impl GeolocationChecker {
    /// Create checker
    pub fn new(locator: Arc<dyn GeoLocator>, config: &GeoConfig) -> Self {
        Self {
            locator,
            high_risk: config
                .high_risk_countries
                .iter()
                .map(|c| c.to_ascii_uppercase())
                .collect(),
            reject_unresolved: config.reject_unresolved,
        }
    }

    fn verdict(&self, lookup: Option<&GeoLookup>) -> SignalScore {
        let invalid = |reason: &str| {
            SignalScore::new(SignalSource::Geolocation, 100.0)
                .with_validity(false)
                .with_reason(reason)
        };

        let signal = match lookup {
            None if self.reject_unresolved => invalid("Location not found"),
            None => SignalScore::new(SignalSource::Geolocation, 0.0)
                .with_validity(true)
                .with_reason("Location not found"),
            Some(l) if l.anonymizer => invalid("Anonymization network detected"),
            Some(l) if self.high_risk.contains(&l.country) => invalid("High-risk country"),
            Some(_) => SignalScore::new(SignalSource::Geolocation, 0.0).with_validity(true),
        };

        signal.with_details(json!({
            "country": lookup.map(|l| l.country.clone()),
            "anonymizer": lookup.map_or(false, |l| l.anonymizer),
        }))
    }
}

#[async_trait]
impl SignalCollector for GeolocationChecker {
    fn source(&self) -> SignalSource {
        SignalSource::Geolocation
    }

    async fn collect(&self, ctx: &SignalContext<'_>) -> Result<SignalScore> {
        let lookup = self
            .locator
            .lookup(ctx.transaction.origin_ip)
            .await
            .map_err(|e| Error::GeoLookup(e.to_string()))?;
        Ok(self.verdict(lookup.as_ref()))
    }
}
