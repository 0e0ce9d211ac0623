use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;


/// Version of the command schema that is written to, and accepted from, the wire
pub const VERSION: u64 = 1;

const VERSION_FIELD: &str = "version";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Teleop,
    Auto,
}

impl Mode {
    pub fn toggled(self) -> Mode {
        match self {
            Mode::Teleop => Mode::Auto,
            Mode::Auto => Mode::Teleop,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Button {
    A,
    B,
    X,
    Y,
    Lb,
    Rb,
}

/// A command from the station to the robot. On the wire, this is a JSON object with a `"cmd"`
///  tag and a `"version"` field, e.g.
///
/// ```text
/// {"cmd":"mode_switch","mode":"TELEOP","version":1}
/// {"cmd":"button","mode":"TELEOP","button":"LB","pressed":true,"version":1}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    /// the station is up and the robot may leave its startup phase
    Ready,
    Shutdown,
    ModeSwitch {
        mode: Mode,
    },
    Button {
        mode: Mode,
        button: Button,
        pressed: bool,
    },
    /// A snapshot of the continuous controller axes, each in `[-1.0, 1.0]`. Triggers are at
    ///  -1.0 when released.
    Axes {
        mode: Mode,
        x: f64,
        y: f64,
        yaw_rate: f64,
        pitch_rate: f64,
        left_trigger: f64,
        right_trigger: f64,
    },
}

impl ControlCommand {
    /// Fails for a command the receiving side would reject, e.g. an axis value out of range
    pub fn to_payload(&self) -> anyhow::Result<Value> {
        self.validate()?;

        let mut payload = serde_json::to_value(self)?;
        match &mut payload {
            Value::Object(map) => {
                map.insert(VERSION_FIELD.to_string(), Value::from(VERSION));
            }
            _ => bail!("command did not serialize to an object: {}", payload),
        }
        Ok(payload)
    }

    /// Parses a received payload. The version is checked before anything else, so a command
    ///  from a newer schema is rejected rather than partially understood.
    pub fn from_payload(payload: &Value) -> anyhow::Result<ControlCommand> {
        let version = payload.get(VERSION_FIELD)
            .ok_or_else(|| anyhow!("command without schema version: {}", payload))?;
        if version.as_u64() != Some(VERSION) {
            bail!("unsupported command schema version {} - expected {}", version, VERSION);
        }

        let command: ControlCommand = serde_json::from_value(payload.clone())?;
        command.validate()?;
        Ok(command)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let ControlCommand::Axes { x, y, yaw_rate, pitch_rate, left_trigger, right_trigger, .. } = self {
            for (name, value) in [("x", x), ("y", y), ("yaw_rate", yaw_rate), ("pitch_rate", pitch_rate), ("left_trigger", left_trigger), ("right_trigger", right_trigger)] {
                if !(-1.0..=1.0).contains(value) {
                    bail!("axis {} out of range: {}", name, value);
                }
            }
        }
        Ok(())
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            ControlCommand::Ready | ControlCommand::Shutdown => None,
            ControlCommand::ModeSwitch { mode } => Some(*mode),
            ControlCommand::Button { mode, .. } => Some(*mode),
            ControlCommand::Axes { mode, .. } => Some(*mode),
        }
    }
}


/// Suppresses axis frames that are identical to the previous one, so a station sampling its
///  controller at a fixed rate submits only changes. All other commands pass unchanged.
///
/// A mode switch resets the filter: the first axis frame after it is always sent.
#[derive(Debug, Default)]
pub struct AxisFilter {
    last_axes: Option<ControlCommand>,
}

impl AxisFilter {
    pub fn new() -> AxisFilter {
        Default::default()
    }

    /// [None] if the command should not be sent
    pub fn filter(&mut self, command: ControlCommand) -> Option<ControlCommand> {
        match &command {
            ControlCommand::Axes { .. } => {
                if self.last_axes.as_ref() == Some(&command) {
                    return None;
                }
                self.last_axes = Some(command.clone());
            }
            ControlCommand::ModeSwitch { .. } => self.last_axes = None,
            _ => {}
        }
        Some(command)
    }
}
