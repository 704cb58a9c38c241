//! Device classification.
//!
//! Project objects declare what they are only loosely (a device category or a
//! load type), so the controller is asked which interfaces each candidate
//! actually implements before it becomes a device.

use crate::config::RelayPolicy;
use crate::device::Device;
use crate::project::ProjectObject;
use crate::registry::DeviceRegistry;
use crate::types::{DeviceKind, Vid, INTERFACE_LOAD, INTERFACE_RGB_LOAD, INTERFACE_THERMOSTAT};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Device category marking climate objects
const HVAC_CATEGORY: &str = "HVAC";

/// Load types treated as lighting loads
const LIGHTING_LOAD_TYPES: &[&str] = &["Incandescent", "Fluor. Electronic non-Dim"];

/// Answers capability questions about controller objects
pub trait InterfaceProbe {
    /// Whether object `vid` implements the named interface
    ///
    /// Implementations map failures (unknown interface, no reply) to `false`.
    fn supports(&self, vid: Vid, interface: &str) -> impl Future<Output = bool> + Send;
}

/// Outcome of classifying one project object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub vid: Vid,
    pub name: String,
    pub kind: DeviceKind,
}

/// Which rule an object matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Thermostat,
    Load,
}

impl Candidate {
    /// Rules an object matches; excluded objects match none
    pub fn for_object(object: &ProjectObject) -> Vec<Candidate> {
        if object.exclude_from_widgets {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        if object.device_category.as_deref() == Some(HVAC_CATEGORY) {
            candidates.push(Candidate::Thermostat);
        }
        if object
            .load_type
            .as_deref()
            .is_some_and(|t| LIGHTING_LOAD_TYPES.contains(&t))
        {
            candidates.push(Candidate::Load);
        }
        candidates
    }
}

/// Decides what kind of device each project object is
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    policy: RelayPolicy,
}

impl Classifier {
    pub fn new(policy: RelayPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RelayPolicy {
        &self.policy
    }

    /// Classify one object against one matched rule
    pub async fn classify<P: InterfaceProbe>(
        &self,
        object: &ProjectObject,
        candidate: Candidate,
        probe: &P,
    ) -> Option<Classified> {
        let vid = object.vid;
        let name = object.effective_name();

        let kind = match candidate {
            Candidate::Thermostat => {
                tracing::info!("New HVAC asked (VID={}, Name={})", vid, name);
                if !probe.supports(vid, INTERFACE_THERMOSTAT).await {
                    tracing::debug!("HVAC object is not a thermostat (VID={}, Name={})", vid, name);
                    return None;
                }
                DeviceKind::Thermostat
            }
            Candidate::Load => {
                tracing::info!("New load asked (VID={}, Name={})", vid, name);
                if !probe.supports(vid, INTERFACE_LOAD).await {
                    tracing::info!("Problem load not added (VID={}, Name={})", vid, name);
                    return None;
                }

                if object.power_profile.is_none() {
                    DeviceKind::Relay
                } else if probe.supports(vid, INTERFACE_RGB_LOAD).await {
                    DeviceKind::Rgb
                } else if self.policy.is_forced_relay(vid) {
                    DeviceKind::Relay
                } else {
                    DeviceKind::Dimmer
                }
            }
        };

        tracing::info!("New device added (VID={}, Name={}, {})", vid, name, kind);
        Some(Classified {
            vid,
            name: name.to_string(),
            kind,
        })
    }

    /// Classify a whole object list into `registry`
    ///
    /// Every matched rule is counted as a pending request before the walk
    /// ends, so the registry only turns ready once all probes have settled.
    pub(crate) async fn run<P, F>(&self, objects: &[ProjectObject], probe: &P, registry: &DeviceRegistry, make_device: F)
    where
        P: InterfaceProbe,
        F: Fn(Classified) -> Device,
    {
        let mut in_flight = FuturesUnordered::new();

        for object in objects {
            for candidate in Candidate::for_object(object) {
                registry.begin_request();
                in_flight.push(self.classify(object, candidate, probe));
            }
        }

        tracing::info!("Configuration walked, {} classification(s) pending", in_flight.len());
        registry.finish_parsing();

        while let Some(result) = in_flight.next().await {
            registry.complete_request(result.map(&make_device));
        }
    }
}
