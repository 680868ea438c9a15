use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Version tag on every outbound request
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC method names used by the Atmosphere protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Request the current value of a parameter
    Get,
    /// Write an absolute value to a parameter
    Set,
    /// Bump a parameter by a relative amount
    Bmp,
    /// Subscribe to push updates for one or more parameters
    Sub,
    /// Cancel a subscription
    Unsub,
    /// Device push carrying new parameter values
    Update,
    /// Device reply to a `get`
    #[serde(rename = "getResp")]
    GetResp,
    /// Anything this client does not recognize; ignored on receive
    #[serde(other)]
    #[default]
    Unknown,
}

impl Method {
    /// Whether an inbound frame with this method carries parameter values.
    pub fn is_push(self) -> bool {
        matches!(self, Method::Update | Method::GetResp)
    }
}

/// Wire format a parameter value is read or written in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Native units: dB for gains, 0/1 for toggles, an index for selectors
    #[default]
    Val,
    /// Percentage of the parameter's range, 0-100
    Pct,
    /// Text, e.g. zone and source labels
    Str,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Val => "val",
            Format::Pct => "pct",
            Format::Str => "str",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter value as carried on the wire.
///
/// Integers and floats are kept distinct so that writes go out in the same
/// shape the caller supplied: a mute set as `1` must not serialize as `1.0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    /// Integer scalar: mute flags, source indices, meter steps
    Int(i64),
    /// Floating-point scalar: gains and meter levels in dB
    Float(f64),
    /// Text: zone and source names
    Text(String),
}

impl ParamValue {
    /// Convert one JSON scalar. Non-scalar JSON carries no usable value.
    fn from_json(value: &Value) -> Option<Self> {
        if let Some(i) = value.as_i64() {
            Some(ParamValue::Int(i))
        } else if let Some(f) = value.as_f64() {
            Some(ParamValue::Float(f))
        } else {
            value.as_str().map(|s| ParamValue::Text(s.to_string()))
        }
    }

    /// Numeric view; integers widen losslessly.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Text(_) => None,
        }
    }

    /// Integer view; floats do not truncate.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Toggle view: any nonzero numeric value reads as on.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Int(i) => Some(*i != 0),
            ParamValue::Float(f) => Some(*f != 0.0),
            ParamValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<ParamValue> for Value {
    fn from(v: ParamValue) -> Self {
        match v {
            ParamValue::Int(i) => Value::from(i),
            ParamValue::Float(f) => Value::from(f),
            ParamValue::Text(s) => Value::String(s),
        }
    }
}

/// Outbound JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    method: Method,
    params: Value,
}

impl Request {
    fn new(method: Method, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }

    /// Ask for a parameter's current value; the device answers with a
    /// `getResp` frame on the same connection.
    pub fn get(param: impl Into<String>, fmt: Format) -> Self {
        Self::new(
            Method::Get,
            json!({ "param": param.into(), "fmt": fmt.as_str() }),
        )
    }

    /// Write an absolute value. The value is keyed by its format, so a
    /// `pct` write of 50 goes out as `{"param": ..., "pct": 50}`.
    pub fn set(param: impl Into<String>, value: impl Into<ParamValue>, fmt: Format) -> Self {
        Self::new(
            Method::Set,
            json!({ "param": param.into(), (fmt.as_str()): Value::from(value.into()) }),
        )
    }

    /// Adjust a parameter relative to its current value.
    pub fn bump(param: impl Into<String>, amount: impl Into<ParamValue>, fmt: Format) -> Self {
        Self::new(
            Method::Bmp,
            json!({ "param": param.into(), (fmt.as_str()): Value::from(amount.into()) }),
        )
    }

    /// Subscribe to push updates for one parameter.
    pub fn subscribe(param: impl Into<String>, fmt: Format) -> Self {
        Self::new(
            Method::Sub,
            json!({ "param": param.into(), "fmt": fmt.as_str() }),
        )
    }

    /// Subscribe to many parameters in one frame; params becomes an array.
    pub fn subscribe_many(specs: &[(String, Format)]) -> Self {
        let items: Vec<Value> = specs
            .iter()
            .map(|(param, fmt)| json!({ "param": param, "fmt": fmt.as_str() }))
            .collect();
        Self::new(Method::Sub, Value::Array(items))
    }

    /// Cancel the subscription for one parameter.
    pub fn unsubscribe(param: impl Into<String>, fmt: Format) -> Self {
        Self::new(
            Method::Unsub,
            json!({ "param": param.into(), "fmt": fmt.as_str() }),
        )
    }

    /// Serialize to the newline-terminated wire form.
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Inbound frame params, normalized to a sequence. The device sends either
/// a bare object or an array of objects; both decode to the same shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawParams")]
pub struct Params(Vec<Value>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParams {
    Many(Vec<Value>),
    One(Value),
}

impl From<RawParams> for Params {
    fn from(raw: RawParams) -> Self {
        match raw {
            RawParams::Many(items) => Params(items),
            RawParams::One(Value::Null) => Params(Vec::new()),
            RawParams::One(item) => Params(vec![item]),
        }
    }
}

impl Params {
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }
}

/// Inbound JSON-RPC frame: a push update, a get response, or something to
/// ignore. Missing fields decode to their defaults rather than erroring.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub params: Params,
}

impl Message {
    /// Decode one line or datagram. Malformed input is the caller's to log
    /// and drop; it never tears down a connection.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Parameter updates carried by this frame, in payload order.
    pub fn updates(&self) -> impl Iterator<Item = ParamUpdate> + '_ {
        self.params.iter().filter_map(ParamUpdate::from_element)
    }
}

/// One parameter update extracted from an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct ParamUpdate {
    /// Device parameter name, e.g. `ZoneGain_0`
    pub param: String,
    /// New value, or `None` when the element named the parameter without one
    pub value: Option<ParamValue>,
}

impl ParamUpdate {
    /// Extract from one params element. Elements without a `param` key are
    /// not updates. The value is the first of `val`/`pct`/`str` present, in
    /// that priority order.
    pub fn from_element(element: &Value) -> Option<Self> {
        let param = element.get("param")?.as_str()?.to_string();
        let value = ["val", "pct", "str"]
            .iter()
            .find_map(|key| element.get(*key))
            .and_then(ParamValue::from_json);
        Some(Self { param, value })
    }
}
