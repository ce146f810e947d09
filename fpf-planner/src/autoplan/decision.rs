//! Autoplan decisions and audit records

use crate::flowlang::Settings;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Pipeline phase that produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Audit,
    Apply,
    Push,
    Confirm,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Audit => "audit",
            Phase::Apply => "apply",
            Phase::Push => "push",
            Phase::Confirm => "confirm",
        }
    }
}

/// What a phase invocation decided. `Noop` covers every run without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Audit,
    Apply,
    Push,
    Confirm,
    Noop,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Audit => "audit",
            Decision::Apply => "apply",
            Decision::Push => "push",
            Decision::Confirm => "confirm",
            Decision::Noop => "noop",
        }
    }
}

/// A trip or truck reference that may or may not be a UUID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Uuid(Uuid),
    Opaque(String),
}

impl EntityRef {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match Uuid::parse_str(trimmed) {
            Ok(id) => EntityRef::Uuid(id),
            Err(_) => EntityRef::Opaque(trimmed.to_string()),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            EntityRef::Uuid(id) => Some(*id),
            EntityRef::Opaque(_) => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&str> {
        match self {
            EntityRef::Uuid(_) => None,
            EntityRef::Opaque(raw) => Some(raw),
        }
    }

    pub fn raw(&self) -> String {
        match self {
            EntityRef::Uuid(id) => id.to_string(),
            EntityRef::Opaque(raw) => raw.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Uuid(_) => "uuid",
            EntityRef::Opaque(_) => "opaque",
        }
    }
}

impl From<Uuid> for EntityRef {
    fn from(id: Uuid) -> Self {
        EntityRef::Uuid(id)
    }
}

/// One row of the autoplan audit trail
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub plan: String,
    pub phase: Phase,
    pub decision: Decision,
    pub reason: Option<String>,
    pub applied: bool,
    pub truck: Option<EntityRef>,
    pub trip: Option<EntityRef>,
    pub thresholds: Value,
    pub payload: Value,
}

impl AuditRecord {
    pub fn new(settings: &Settings, phase: Phase, decision: Decision) -> Self {
        Self {
            plan: settings.plan.clone(),
            phase,
            decision,
            reason: None,
            applied: false,
            truck: None,
            trip: None,
            thresholds: settings.thresholds(),
            payload: json!({}),
        }
    }

    /// A `noop` row with its reason
    pub fn noop(settings: &Settings, phase: Phase, reason: &str) -> Self {
        Self::new(settings, phase, Decision::Noop).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn applied(mut self, applied: bool) -> Self {
        self.applied = applied;
        self
    }

    pub fn with_truck(mut self, truck: Option<EntityRef>) -> Self {
        self.truck = truck;
        self
    }

    pub fn with_trip(mut self, trip: Option<EntityRef>) -> Self {
        self.trip = trip;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Payload with the raw trip/truck references under `refs`
    pub fn payload_with_refs(&self) -> Value {
        let mut payload = match &self.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };

        let mut refs = Map::new();
        if let Some(trip) = &self.trip {
            refs.insert("trip".to_string(), json!({"raw": trip.raw(), "kind": trip.kind()}));
        }
        if let Some(truck) = &self.truck {
            refs.insert("truck".to_string(), json!({"raw": truck.raw(), "kind": truck.kind()}));
        }
        if !refs.is_empty() {
            payload.insert("refs".to_string(), Value::Object(refs));
        }
        Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_parse() {
        let id = Uuid::new_v4();
        assert_eq!(EntityRef::parse(&id.to_string()), EntityRef::Uuid(id));
        assert_eq!(EntityRef::parse(" 42 "), EntityRef::Opaque("42".into()));
        assert_eq!(EntityRef::parse("42").as_uuid(), None);
    }

    #[test]
    fn test_refs_always_kept_in_payload() {
        let settings = Settings::defaults("p");
        let rec = AuditRecord::new(&settings, Phase::Apply, Decision::Apply)
            .with_truck(Some(EntityRef::parse("7")))
            .with_payload(json!({"created": 1}));

        let payload = rec.payload_with_refs();
        assert_eq!(payload["created"], 1);
        assert_eq!(payload["refs"]["truck"]["raw"], "7");
        assert_eq!(payload["refs"]["truck"]["kind"], "opaque");
        assert!(payload["refs"].get("trip").is_none());
    }
}
