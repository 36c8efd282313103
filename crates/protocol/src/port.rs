//! The duplex message port connecting the pool to one worker
//!
//! [`port_pair`] returns two connected ends. Frames posted on one end
//! arrive on the other in order; nothing is serialized. Transport
//! failures are normalised to a message-bearing [`PortError`].

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::frame::Frame;

/// A frame plus the transfer list its poster discovered.
#[derive(Debug)]
pub struct Envelope {
    pub frame: Frame,
    /// Ids of the transferable handles moving with this frame.
    pub transfer: Vec<Uuid>,
}

/// Create a connected pair of ports.
pub fn port_pair() -> (WirePort, WirePort) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    (
        WirePort {
            tx: PortSender { tx: tx_a },
            rx: rx_b,
        },
        WirePort {
            tx: PortSender { tx: tx_b },
            rx: rx_a,
        },
    )
}

/// One end of the duplex port.
#[derive(Debug)]
pub struct WirePort {
    tx: PortSender,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl WirePort {
    /// Post a frame to the peer.
    ///
    /// Ownership of the frame, and of every transferable inside it,
    /// moves to the peer; the posting side cannot observe it afterwards.
    pub fn post(&self, frame: Frame, transfer: Vec<Uuid>) -> Result<(), PortError> {
        self.tx.post(frame, transfer)
    }

    /// Receive the next inbound envelope; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// A clonable posting half.
    pub fn sender(&self) -> PortSender {
        self.tx.clone()
    }

    /// Split into independently owned posting and receiving halves.
    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.tx, PortReceiver { rx: self.rx })
    }
}

/// The clonable posting half of a port.
#[derive(Debug, Clone)]
pub struct PortSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl PortSender {
    pub fn post(&self, frame: Frame, transfer: Vec<Uuid>) -> Result<(), PortError> {
        self.tx
            .send(Envelope { frame, transfer })
            .map_err(|_| PortError::closed())
    }
}

/// The receiving half of a port.
#[derive(Debug)]
pub struct PortReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl PortReceiver {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

/// A transport failure, normalised to a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PortError {
    pub message: String,
}

impl PortError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The peer end of the port is gone.
    pub fn closed() -> Self {
        Self::new("port closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;

    #[tokio::test]
    async fn test_post_and_recv() {
        let (near, mut far) = port_pair();
        let id = Uuid::now_v7();

        near.post(
            Frame::Request {
                id,
                path: "echo".into(),
                args: vec![Payload::Int(1)],
            },
            vec![],
        )
        .unwrap();

        let envelope = far.recv().await.unwrap();
        assert_eq!(envelope.frame.id(), id);
        assert!(envelope.transfer.is_empty());
    }

    #[tokio::test]
    async fn test_both_directions() {
        let (near, far) = port_pair();
        let id = Uuid::now_v7();
        let (near_tx, mut near_rx) = near.split();
        let (far_tx, mut far_rx) = far.split();

        near_tx.post(Frame::Release { id }, vec![]).unwrap();
        far_tx.post(Frame::Retained { id }, vec![]).unwrap();

        assert!(matches!(
            far_rx.recv().await.unwrap().frame,
            Frame::Release { .. }
        ));
        assert!(matches!(
            near_rx.recv().await.unwrap().frame,
            Frame::Retained { .. }
        ));
    }

    #[tokio::test]
    async fn test_post_after_peer_dropped() {
        let (near, far) = port_pair();
        drop(far);

        let err = near
            .post(Frame::Release { id: Uuid::now_v7() }, vec![])
            .unwrap_err();
        assert_eq!(err, PortError::closed());
    }

    #[tokio::test]
    async fn test_recv_none_after_peer_dropped() {
        let (near, far) = port_pair();
        drop(near);

        let (_tx, mut rx) = far.split();
        assert!(rx.recv().await.is_none());
    }
}
