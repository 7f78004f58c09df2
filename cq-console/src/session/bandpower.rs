//! Live bandpower aggregation
//!
//! Append-and-retain buffer for streamed spectral samples, scoped to one
//! epoch. No smoothing, resampling or band math happens here; the renderer
//! reads the raw series. Every stored value is finite, so everything the
//! renderer pulls is plot-able.

use cq_common::events::SessionEvent;
use std::collections::{BTreeMap, HashMap};

/// The five charted spectral bands, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Band {
    Delta,
    Theta,
    Alpha,
    Beta,
    HiBeta,
}

/// Display order for chart rows and legends
pub const CHART_BANDS: [Band; 5] = [Band::Delta, Band::Theta, Band::Alpha, Band::Beta, Band::HiBeta];

impl Band {
    /// Parse a wire band key. Feature maps carry more keys than we chart
    /// (`smr`, `lo_alpha`, `peak_alpha`, …); those return `None` and are
    /// not stored.
    pub fn from_key(key: &str) -> Option<Band> {
        match key {
            "delta" => Some(Band::Delta),
            "theta" => Some(Band::Theta),
            "alpha" => Some(Band::Alpha),
            "beta" => Some(Band::Beta),
            "hibeta" | "hi-beta" | "hi_beta" => Some(Band::HiBeta),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Delta => "delta",
            Band::Theta => "theta",
            Band::Alpha => "alpha",
            Band::Beta => "beta",
            Band::HiBeta => "hibeta",
        }
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-epoch, per-location, per-band sample series.
///
/// Keyed by the composite epoch identity; reset exactly when a new epoch
/// begins or a session starts. Locations outside the configured set are
/// ignored, not an error.
#[derive(Debug)]
pub struct BandState {
    locations: Vec<String>,
    epoch_key: String,
    series: HashMap<String, BTreeMap<Band, Vec<f64>>>,
}

impl BandState {
    pub fn new(locations: &[String]) -> Self {
        Self {
            locations: locations.to_vec(),
            epoch_key: String::new(),
            series: HashMap::new(),
        }
    }

    /// Clear all series and re-key to `epoch_key`.
    pub fn reset(&mut self, epoch_key: &str) {
        self.epoch_key = epoch_key.to_string();
        self.series.clear();
    }

    pub fn epoch_key(&self) -> &str {
        &self.epoch_key
    }

    /// Append the finite samples carried by a `bandpower` event, in arrival
    /// order. Returns the locations that received at least one sample.
    ///
    /// Re-keys itself if the event belongs to a different epoch than the
    /// current key (covers an `epoch_start` the decoder had to demote).
    pub fn on_bandpower(&mut self, event: &SessionEvent) -> Vec<String> {
        let SessionEvent::Bandpower {
            sequence,
            index,
            label,
            features,
            ..
        } = event
        else {
            return Vec::new();
        };

        let key = format!("{sequence}-{index}-{label}");
        if key != self.epoch_key {
            self.reset(&key);
        }

        let mut touched = Vec::new();
        for (location, bands) in features {
            if !self.locations.iter().any(|l| l == location) {
                continue;
            }
            let mut appended = false;
            for (band_key, value) in bands {
                let Some(band) = Band::from_key(band_key) else {
                    continue;
                };
                // Non-finite samples never enter the series
                if !value.is_finite() {
                    continue;
                }
                self.series
                    .entry(location.clone())
                    .or_default()
                    .entry(band)
                    .or_default()
                    .push(*value);
                appended = true;
            }
            if appended {
                touched.push(location.clone());
            }
        }
        touched
    }

    /// Full sample series for one (location, band) pair; empty before any
    /// sample arrives.
    pub fn series(&self, location: &str, band: Band) -> &[f64] {
        self.series
            .get(location)
            .and_then(|bands| bands.get(&band))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Latest value per charted band for one location, in display order.
    pub fn latest(&self, location: &str) -> Vec<(Band, f64)> {
        let Some(bands) = self.series.get(location) else {
            return Vec::new();
        };
        CHART_BANDS
            .iter()
            .filter_map(|band| {
                bands
                    .get(band)
                    .and_then(|s| s.last())
                    .map(|v| (*band, *v))
            })
            .collect()
    }
}
