//! In-process CAN link. Frames sent by the adapter come out of the peer
//! handle and vice versa, with loopback echoes generated like a real
//! driver would. Used by the test suite's virtual ECU and by the CLI
//! bench mode where no hardware driver is attached.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::Duration;

use crate::can::{Capabilities, CanAdapter, Frame};

/// Adapter half of the virtual link. Pass to [`crate::can::AsyncCanAdapter::new`].
pub struct VirtualCan {
    capabilities: Capabilities,
    to_peer: mpsc::Sender<Frame>,
    from_peer: mpsc::Receiver<Frame>,
    loopback: VecDeque<Frame>,
}

/// Peer half of the virtual link, i.e. "the bus". Whoever holds this plays
/// the remote node.
pub struct VirtualCanPeer {
    to_adapter: mpsc::Sender<Frame>,
    from_adapter: mpsc::Receiver<Frame>,
}

impl VirtualCan {
    /// Create a classic CAN link pair.
    pub fn pair() -> (VirtualCan, VirtualCanPeer) {
        Self::pair_with_capabilities(Capabilities {
            fd: false,
            max_payload: 8,
        })
    }

    /// Create a CAN-FD capable link pair.
    pub fn pair_fd() -> (VirtualCan, VirtualCanPeer) {
        Self::pair_with_capabilities(Capabilities {
            fd: true,
            max_payload: 64,
        })
    }

    pub fn pair_with_capabilities(capabilities: Capabilities) -> (VirtualCan, VirtualCanPeer) {
        let (to_peer, from_adapter) = mpsc::channel();
        let (to_adapter, from_peer) = mpsc::channel();

        (
            VirtualCan {
                capabilities,
                to_peer,
                from_peer,
                loopback: VecDeque::new(),
            },
            VirtualCanPeer {
                to_adapter,
                from_adapter,
            },
        )
    }
}

impl CanAdapter for VirtualCan {
    fn send(&mut self, frames: &[Frame]) -> crate::Result<()> {
        for frame in frames {
            self.to_peer
                .send(frame.clone())
                .map_err(|_| crate::can::Error::Driver("virtual peer closed".into()))?;

            let mut echo = frame.clone();
            echo.loopback = true;
            self.loopback.push_back(echo);
        }
        Ok(())
    }

    fn recv(&mut self) -> crate::Result<Vec<Frame>> {
        let mut frames: Vec<Frame> = self.loopback.drain(..).collect();

        // Block briefly for the first frame so the processing loop paces
        // itself to bus activity, then drain whatever else is queued.
        if frames.is_empty() {
            match self.from_peer.recv_timeout(Duration::from_micros(500)) {
                Ok(frame) => frames.push(frame),
                Err(mpsc::RecvTimeoutError::Timeout) => return Ok(frames),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(crate::can::Error::Driver("virtual peer closed".into()).into())
                }
            }
        }
        while let Ok(frame) = self.from_peer.try_recv() {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

impl VirtualCanPeer {
    /// Inject a frame into the adapter's receive path.
    pub fn send(&self, frame: Frame) -> crate::Result<()> {
        self.to_adapter
            .send(frame)
            .map_err(|_| crate::can::Error::Driver("virtual adapter closed".into()).into())
    }

    /// Wait for the next frame transmitted by the adapter.
    pub fn recv(&self, timeout: Duration) -> Option<Frame> {
        self.from_adapter.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<Frame> {
        self.from_adapter.try_recv().ok()
    }

    /// Consume and discard frames until the adapter side goes away, like an
    /// empty bench absorbing traffic.
    pub fn drain(self) {
        while self.from_adapter.recv().is_ok() {}
    }
}
