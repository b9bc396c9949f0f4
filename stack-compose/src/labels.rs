use std::collections::BTreeMap as Map;

use crate::models::ServiceName;

pub const LABEL_APPLICATION: &str = "application";

/// The labels a service's pods carry and the selector its Service matches
/// on. Both come from here so they cannot drift apart.
#[derive(Copy, Clone, Debug, Default)]
pub struct SelectorConvention;

impl SelectorConvention {
    pub fn labels(&self, service: &ServiceName) -> Map<String, String> {
        let mut labels = Map::new();
        labels.insert(LABEL_APPLICATION.into(), service.0.clone());
        labels
    }

    pub fn selector(&self, service: &ServiceName) -> Map<String, String> {
        self.labels(service)
    }
}
