//! App usage event conversion
//!
//! Turns a Cloud Controller app usage event into a usage document with the
//! memory and instance count before and after the state change.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    bridge::EventConverter,
    model::{MappedEvent, Usage},
};

const BYTES_PER_MB: u64 = 1_048_576;

/// Resource id of the reported usage
pub const RESOURCE_ID: &str = "linux-container";

/// Plan id of the reported usage
pub const PLAN_ID: &str = "standard";

pub const STATE_STARTED: &str = "STARTED";
pub const STATE_STOPPED: &str = "STOPPED";

#[derive(Debug, Deserialize)]
struct AppEvent {
    metadata: Metadata,
    entity: Entity,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Entity {
    state: String,
    #[serde(default)]
    previous_state: Option<String>,
    org_guid: String,
    space_guid: String,
    app_guid: String,
    #[serde(default)]
    instance_count: u64,
    #[serde(default)]
    previous_instance_count: u64,
    #[serde(default)]
    memory_in_mb_per_instance: u64,
    #[serde(default)]
    previous_memory_in_mb_per_instance: u64,
}

/// Memory and running instances at one point of an app's life
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Footprint {
    memory: u64,
    instances: u64,
}

impl Entity {
    fn current(&self) -> Footprint {
        Footprint {
            memory: self.memory_in_mb_per_instance * BYTES_PER_MB,
            instances: self.instance_count,
        }
    }

    fn previous(&self) -> Footprint {
        Footprint {
            memory: self.previous_memory_in_mb_per_instance * BYTES_PER_MB,
            instances: self.previous_instance_count,
        }
    }

    /// Footprints after and before the event, `None` for states without usage.
    fn footprints(&self) -> Option<(Footprint, Footprint)> {
        match self.state.as_str() {
            STATE_STARTED => {
                let current = self.current();
                let was_stopped = self.previous_state.as_deref() == Some(STATE_STOPPED);
                if was_stopped || self.previous() == current {
                    Some((current, Footprint::default()))
                } else {
                    Some((current, self.previous()))
                }
            },
            STATE_STOPPED => Some((Footprint::default(), self.previous())),
            _ => None,
        }
    }
}

/// Converts app usage events, skipping states other than started and stopped
#[derive(Debug, Clone, Copy, Default)]
pub struct AppUsageConverter;

impl EventConverter for AppUsageConverter {
    fn convert(&self, event: &MappedEvent) -> Option<Usage> {
        let event: AppEvent = match serde_json::from_value(event.clone()) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Not an app usage event");
                return None;
            },
        };

        let (current, previous) = event.entity.footprints()?;
        let time = event.metadata.created_at.timestamp_millis();
        let entity = &event.entity;

        Some(json!({
            "start": time,
            "end": time,
            "organization_id": entity.org_guid,
            "space_id": entity.space_guid,
            "consumer_id": format!("app:{}", entity.app_guid),
            "resource_id": RESOURCE_ID,
            "plan_id": PLAN_ID,
            "resource_instance_id": format!("memory:{}", entity.app_guid),
            "measured_usage": [
                measure("current_instance_memory", current.memory),
                measure("current_running_instances", current.instances),
                measure("previous_instance_memory", previous.memory),
                measure("previous_running_instances", previous.instances),
            ]
        }))
    }
}

fn measure(name: &str, quantity: u64) -> Value {
    json!({ "measure": name, "quantity": quantity })
}
