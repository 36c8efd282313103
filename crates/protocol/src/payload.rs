//! Structured values exchanged over the port
//!
//! A [`Payload`] is the argument/result graph of a task: scalars, lists,
//! string-keyed maps, and two transferable leaf kinds (byte buffers and
//! auxiliary message ports). Transferables carry a handle id that the
//! scanner reports; everything else is plain data.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

/// A structured-cloneable value graph.
///
/// Ownership of a payload moves with the frame it is posted in. The
/// transferable leaves ([`Payload::Binary`], [`Payload::Port`]) are the
/// values whose ownership transfer is observable to the sender; the rest
/// is plain data that could as well have been copied.
#[derive(Debug)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Payload>),
    Map(BTreeMap<String, Payload>),
    /// Transferable: a raw byte buffer.
    Binary(BufferHandle),
    /// Transferable: one end of an auxiliary payload channel.
    Port(PortHandle),
}

impl Payload {
    /// Whether this value itself is a transferable leaf.
    pub fn is_transferable(&self) -> bool {
        matches!(self, Payload::Binary(_) | Payload::Port(_))
    }

    /// Build a map payload from key/value pairs.
    pub fn map<K, I>(entries: I) -> Payload
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Payload::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Payload::Float(n) => Some(*n),
            Payload::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Payload]> {
        match self {
            Payload::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Payload>> {
        match self {
            Payload::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a map entry by key.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Convert a JSON value into a payload.
    ///
    /// Whole numbers become [`Payload::Int`] so that integer-typed
    /// consumers round-trip cleanly; everything else maps structurally.
    pub fn from_json(value: serde_json::Value) -> Payload {
        match value {
            serde_json::Value::Null => Payload::Null,
            serde_json::Value::Bool(b) => Payload::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Payload::Int(i)
                } else {
                    Payload::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Payload::Text(s),
            serde_json::Value::Array(items) => {
                Payload::List(items.into_iter().map(Payload::from_json).collect())
            }
            serde_json::Value::Object(entries) => Payload::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Payload::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render the payload as JSON.
    ///
    /// Transferable leaves have no JSON image and render as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Payload::Null => serde_json::Value::Null,
            Payload::Bool(b) => serde_json::Value::Bool(*b),
            Payload::Int(n) => serde_json::Value::Number((*n).into()),
            Payload::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Payload::Text(s) => serde_json::Value::String(s.clone()),
            Payload::List(items) => {
                serde_json::Value::Array(items.iter().map(Payload::to_json).collect())
            }
            Payload::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Payload::Binary(_) | Payload::Port(_) => serde_json::Value::Null,
        }
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Null
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Int(value)
    }
}

impl From<i32> for Payload {
    fn from(value: i32) -> Self {
        Payload::Int(value as i64)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Float(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(value: Vec<Payload>) -> Self {
        Payload::List(value)
    }
}

impl From<BufferHandle> for Payload {
    fn from(value: BufferHandle) -> Self {
        Payload::Binary(value)
    }
}

impl From<PortHandle> for Payload {
    fn from(value: PortHandle) -> Self {
        Payload::Port(value)
    }
}

/// A transferable byte buffer.
///
/// The id identifies the handle to the transferable scanner; the bytes
/// are shared so a handle can be inspected before it is posted.
#[derive(Debug, Clone)]
pub struct BufferHandle {
    id: Uuid,
    bytes: Arc<[u8]>,
}

impl BufferHandle {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            bytes: bytes.into().into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A transferable auxiliary message port.
///
/// [`PortHandle::pair`] creates two connected ends; either end can travel
/// inside a payload so that a task and its caller keep a private channel
/// after the task settles.
#[derive(Debug)]
pub struct PortHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Payload>,
    rx: mpsc::UnboundedReceiver<Payload>,
}

impl PortHandle {
    /// Create a connected pair of port handles.
    pub fn pair() -> (PortHandle, PortHandle) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (
            PortHandle {
                id: Uuid::now_v7(),
                tx: tx_a,
                rx: rx_b,
            },
            PortHandle {
                id: Uuid::now_v7(),
                tx: tx_b,
                rx: rx_a,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Send a payload to the peer end. Returns the payload when the peer
    /// is gone.
    pub fn send(&self, value: Payload) -> Result<(), Payload> {
        self.tx.send(value).map_err(|e| e.0)
    }

    /// Receive the next payload from the peer end; `None` once the peer
    /// is gone and the channel is drained.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}
