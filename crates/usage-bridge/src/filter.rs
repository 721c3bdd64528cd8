use serde_json::Value;
use std::collections::HashSet;

use crate::{bridge::EventFilter, model::Event};

/// Keeps only events of the given organizations
///
/// The organization is read from `entity.org_guid` of the event payload.
/// Events without one are dropped.
#[derive(Debug, Clone)]
pub struct OrgFilter {
    orgs: HashSet<String>,
}

impl OrgFilter {
    pub fn new<I, S>(orgs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            orgs: orgs.into_iter().map(Into::into).collect(),
        }
    }
}

impl EventFilter for OrgFilter {
    fn filter(&self, event: &Event) -> bool {
        match event.payload.pointer("/entity/org_guid").and_then(Value::as_str) {
            Some(org) => !self.orgs.contains(org),
            None => true,
        }
    }
}
