//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status string mpv puts in `error` when a command succeeded.
pub const SUCCESS: &str = "success";

/// Event name mpv uses for observed property notifications.
pub const PROPERTY_CHANGE: &str = "property-change";

/// Command arguments to send to MPV. The first element is the command name.
#[derive(Debug, Clone, PartialEq)]
pub struct MpvCommand {
  pub args: Vec<Value>,
}

impl MpvCommand {
  /// Create a command from raw arguments.
  pub fn new(args: Vec<Value>) -> Self {
    Self { args }
  }

  /// Command name, if the first argument is a string.
  pub fn name(&self) -> Option<&str> {
    self.args.first().and_then(Value::as_str)
  }

  /// Load a file for playback.
  pub fn loadfile(url: &str) -> Self {
    Self::new(vec!["loadfile".into(), url.into()])
  }

  /// Seek to absolute position in seconds.
  pub fn seek(time: f64) -> Self {
    Self::new(vec!["seek".into(), time.into(), "absolute".into()])
  }

  /// Set pause state.
  pub fn set_pause(paused: bool) -> Self {
    Self::set_property("pause", paused.into())
  }

  /// Set any property to a JSON value.
  pub fn set_property(name: &str, value: Value) -> Self {
    Self::new(vec!["set_property".into(), name.into(), value])
  }

  /// Get a property value.
  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()])
  }

  /// Observe a property for changes.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new(vec!["observe_property".into(), id.into(), name.into()])
  }

  /// Stop observing a property.
  pub fn unobserve_property(id: i64) -> Self {
    Self::new(vec!["unobserve_property".into(), id.into()])
  }

  /// Cycle (toggle) a property.
  pub fn cycle(property: &str) -> Self {
    Self::new(vec!["cycle".into(), property.into()])
  }

  /// Quit MPV.
  pub fn quit() -> Self {
    Self::new(vec!["quit".into()])
  }

  /// Wrap the arguments in a wire envelope for `request_id`.
  pub fn envelope(&self, request_id: i64) -> CommandEnvelope<'_> {
    CommandEnvelope {
      command: &self.args,
      request_id,
      is_async: true,
    }
  }
}

/// One outbound line: `{"command":[...],"request_id":N,"async":true}`.
#[derive(Debug, Serialize)]
pub struct CommandEnvelope<'a> {
  pub command: &'a [Value],
  pub request_id: i64,
  #[serde(rename = "async")]
  pub is_async: bool,
}

impl CommandEnvelope<'_> {
  /// Serialize to a single line, without the trailing newline.
  pub fn to_line(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }
}

/// Response from MPV for a command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  pub error: String,
  /// Response data (command-specific). Absent and `null` both decode to `None`.
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == SUCCESS
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
///
/// Every field other than `event` is kept in `fields`, so the full payload
/// is available to handlers regardless of the event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "start-file", "end-file").
  pub event: String,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl MpvEvent {
  /// Look up a payload field.
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.fields.get(key)
  }

  /// Observer ID for property-change events.
  pub fn id(&self) -> Option<i64> {
    self.get("id").and_then(Value::as_i64)
  }

  /// Property name for property-change events.
  pub fn name(&self) -> Option<&str> {
    self.get("name").and_then(Value::as_str)
  }

  /// Event data (the new value for property-change events).
  pub fn data(&self) -> Option<&Value> {
    self.get("data")
  }

  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  pub fn reason(&self) -> Option<&str> {
    self.get("reason").and_then(Value::as_str)
  }

  /// True for a property-change event carrying observation `id`.
  pub fn is_property_change(&self, id: i64) -> bool {
    self.event == PROPERTY_CHANGE && self.id() == Some(id)
  }

  /// The whole event as a JSON object, `event` key included.
  pub fn to_value(&self) -> Value {
    let mut object = self.fields.clone();
    object.insert("event".into(), Value::String(self.event.clone()));
    Value::Object(object)
  }
}

/// Typed property values from MPV.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
  Bool(bool),
  Number(f64),
  String(String),
  List(Vec<Value>),
  Map(Map<String, Value>),
  Null,
}

impl From<Value> for PropertyValue {
  fn from(value: Value) -> Self {
    match value {
      Value::Bool(b) => PropertyValue::Bool(b),
      Value::Number(n) => PropertyValue::Number(n.as_f64().unwrap_or(0.0)),
      Value::String(s) => PropertyValue::String(s),
      Value::Array(items) => PropertyValue::List(items),
      Value::Object(map) => PropertyValue::Map(map),
      Value::Null => PropertyValue::Null,
    }
  }
}

impl From<Option<Value>> for PropertyValue {
  fn from(value: Option<Value>) -> Self {
    value.map(PropertyValue::from).unwrap_or(PropertyValue::Null)
  }
}

/// Message received from MPV IPC (either response or event).
#[derive(Debug, Clone, PartialEq)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse a JSON line from MPV.
  ///
  /// An object with an `event` key is an event; anything else must be a response.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("event").is_some() {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    } else {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;
  use serde_json::json;

  #[test]
  fn test_command_serialization() {
    let cmd = MpvCommand::get_property("pause");
    let line = cmd.envelope(1).to_line().unwrap();
    assert_eq!(
      line,
      r#"{"command":["get_property","pause"],"request_id":1,"async":true}"#
    );
  }

  #[test]
  fn test_set_property_with_list_value() {
    let cmd = MpvCommand::set_property("playlist", json!(["a.mp3"]));
    let line = cmd.envelope(2).to_line().unwrap();
    assert_eq!(
      line,
      r#"{"command":["set_property","playlist",["a.mp3"]],"request_id":2,"async":true}"#
    );
    assert_eq!(cmd.name(), Some("set_property"));
  }

  #[test]
  fn test_response_parsing() {
    let json = r#"{"request_id":1,"error":"success","data":false}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Response(r) => {
        assert!(r.is_success());
        assert_eq!(r.request_id, 1);
        assert_eq!(r.data, Some(json!(false)));
      }
      _ => panic!("Expected response"),
    }
  }

  #[rstest]
  #[case(r#"{"request_id":3,"error":"success"}"#)]
  #[case(r#"{"request_id":3,"error":"success","data":null}"#)]
  fn test_response_without_data(#[case] line: &str) {
    match MpvMessage::parse(line).unwrap() {
      MpvMessage::Response(r) => assert_eq!(r.data, None),
      _ => panic!("Expected response"),
    }
  }

  #[test]
  fn test_event_parsing() {
    let json = r#"{"event":"property-change","id":1,"name":"pause","data":false}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Event(e) => {
        assert_eq!(e.event, "property-change");
        assert_eq!(e.name(), Some("pause"));
        assert!(e.is_property_change(1));
        assert!(!e.is_property_change(2));
        assert_eq!(e.data(), Some(&json!(false)));
      }
      _ => panic!("Expected event"),
    }
  }

  #[test]
  fn test_event_keeps_unknown_fields() {
    let json = r#"{"event":"start-file","playlist_entry_id":7}"#;
    let MpvMessage::Event(e) = MpvMessage::parse(json).unwrap() else {
      panic!("Expected event");
    };
    assert_eq!(e.get("playlist_entry_id"), Some(&json!(7)));
    assert_eq!(
      e.to_value(),
      json!({"event": "start-file", "playlist_entry_id": 7})
    );
  }

  #[rstest]
  #[case("not json")]
  #[case(r#"{"error":"success"}"#)]
  #[case(r#"[1,2,3]"#)]
  #[case(r#"{"event":42}"#)]
  fn test_malformed_lines(#[case] line: &str) {
    assert!(MpvMessage::parse(line).is_err());
  }

  #[test]
  fn test_property_value_conversion() {
    assert_eq!(PropertyValue::from(json!(true)), PropertyValue::Bool(true));
    assert_eq!(PropertyValue::from(json!(50)), PropertyValue::Number(50.0));
    assert_eq!(PropertyValue::from(None), PropertyValue::Null);
    assert_eq!(
      PropertyValue::from(json!([{"filename": "a.mp3"}])),
      PropertyValue::List(vec![json!({"filename": "a.mp3"})])
    );
  }
}
