use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::control::commands::Mode;


/// The robot's periodic status report. Robots are free to send any JSON as telemetry, this is
///  the record the demo robot uses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// [None] while the robot waits for a mode to be selected
    pub mode: Option<Mode>,
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl Telemetry {
    pub fn new(mode: Option<Mode>, sequence: u64) -> Telemetry {
        Telemetry {
            mode,
            sequence,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Telemetry {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn to_payload(&self) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_payload(payload: &Value) -> anyhow::Result<Telemetry> {
        Ok(serde_json::from_value(payload.clone())?)
    }
}


#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payload() {
        let telemetry = Telemetry::new(Some(Mode::Auto), 17)
            .with_field("battery_volts", 12.5)
            .with_field("estopped", false);

        let payload = telemetry.to_payload().unwrap();
        assert_eq!(payload, json!({"mode": "AUTO", "sequence": 17, "fields": {"battery_volts": 12.5, "estopped": false}}));
        assert_eq!(Telemetry::from_payload(&payload).unwrap(), telemetry);
    }

    #[test]
    fn test_fields_are_optional() {
        let telemetry = Telemetry::from_payload(&json!({"mode": null, "sequence": 0})).unwrap();
        assert_eq!(telemetry, Telemetry::new(None, 0));
        assert_eq!(telemetry.to_payload().unwrap(), json!({"mode": null, "sequence": 0}));
    }

    #[test]
    fn test_arbitrary_json_is_not_a_telemetry_record() {
        assert!(Telemetry::from_payload(&json!("battery low")).is_err());
        assert!(Telemetry::from_payload(&json!({"mode": "AUTO"})).is_err());
    }
}
