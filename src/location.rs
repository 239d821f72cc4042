//! Best-effort "where is the user" lookup for alert messages.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub const LOCATION_UNAVAILABLE: &str = "Location unavailable";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// One provider of a last-known fix (GPS, network, passive, static config...).
#[async_trait]
pub trait PositionSource: Send + Sync {
    fn name(&self) -> &str;
    async fn last_known(&self) -> anyhow::Result<Option<Position>>;
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn address(&self, position: Position) -> anyhow::Result<Option<String>>;
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Human-readable location, or `None` when nothing is known.
    async fn current_location(&self) -> Option<String>;
}

/// Tries each source in order and formats the first fix found.
#[derive(Clone, Default)]
pub struct FallbackLocator {
    sources: Vec<Arc<dyn PositionSource>>,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
}

impl FallbackLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn PositionSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    async fn first_fix(&self) -> Option<Position> {
        for source in &self.sources {
            match source.last_known().await {
                Ok(Some(position)) => {
                    debug!(source = source.name(), "location fix available");
                    return Some(position);
                }
                Ok(None) => debug!(source = source.name(), "no location fix"),
                Err(e) => warn!(source = source.name(), error = %e, "location source failed"),
            }
        }
        None
    }

    async fn describe(&self, position: Position) -> String {
        if let Some(geocoder) = &self.geocoder {
            match geocoder.address(position).await {
                Ok(Some(address)) if !address.trim().is_empty() => return address,
                Ok(_) => {}
                Err(e) => warn!(error = %e, "reverse geocoding failed, using coordinates"),
            }
        }
        format_coordinates(position)
    }
}

#[async_trait]
impl LocationProvider for FallbackLocator {
    async fn current_location(&self) -> Option<String> {
        let position = self.first_fix().await?;
        Some(self.describe(position).await)
    }
}

pub fn format_coordinates(position: Position) -> String {
    format!("{:.6}, {:.6}", position.latitude, position.longitude)
}

/// A position pinned in configuration, for fixed installations.
#[derive(Debug, Clone)]
pub struct FixedPosition {
    position: Position,
    label: Option<String>,
}

impl FixedPosition {
    pub fn new(latitude: f64, longitude: f64, label: Option<String>) -> Self {
        Self {
            position: Position { latitude, longitude },
            label,
        }
    }
}

#[async_trait]
impl PositionSource for FixedPosition {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn last_known(&self) -> anyhow::Result<Option<Position>> {
        Ok(Some(self.position))
    }
}

#[async_trait]
impl ReverseGeocoder for FixedPosition {
    async fn address(&self, _position: Position) -> anyhow::Result<Option<String>> {
        Ok(self.label.clone())
    }
}
