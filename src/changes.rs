//! Change detection over build units
//!
//! Tracks the last-seen fingerprint per test unit name. The table only grows:
//! an entry is overwritten every time its unit is observed, never removed.

use crate::pipeline::{BuildUnit, Fingerprint};
use std::collections::HashMap;

pub const DEFAULT_TEST_MARKER: &str = ".test";

pub struct ChangeDetector {
    marker: String,
    versions: HashMap<String, Fingerprint>,
}

impl ChangeDetector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            versions: HashMap::new(),
        }
    }

    /// Whether a unit takes part in change detection at all
    pub fn is_test_unit(&self, unit: &BuildUnit) -> bool {
        unit.name.contains(&self.marker)
    }

    /// Return the test units whose fingerprint differs from the last one
    /// seen, recording the current fingerprints as a side effect.
    pub fn filter_changed(&mut self, units: &[BuildUnit]) -> Vec<BuildUnit> {
        let tests: Vec<&BuildUnit> = units.iter().filter(|u| self.is_test_unit(u)).collect();

        tests
            .into_iter()
            .filter(|unit| {
                let previous = self
                    .versions
                    .insert(unit.name.clone(), unit.fingerprint.clone());
                previous.as_ref() != Some(&unit.fingerprint)
            })
            .cloned()
            .collect()
    }

    pub fn last_seen(&self, name: &str) -> Option<&Fingerprint> {
        self.versions.get(name)
    }

    pub fn tracked(&self) -> usize {
        self.versions.len()
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_MARKER)
    }
}
