//! Async wrapper for adapters implementing the [`CanAdapter`] trait.

use std::collections::{HashMap, VecDeque};

use crate::can::{Capabilities, CanAdapter, Frame, Identifier};
use async_stream::stream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::Stream;
use tracing::{error, trace};

const CAN_TX_BUFFER_SIZE: usize = 128;
// Large enough that a subscriber created before a full-length ISO-TP send
// can absorb every loopback echo plus the response without lagging.
const CAN_RX_BUFFER_SIZE: usize = 8192;

type FrameCallback = (Frame, Option<oneshot::Sender<()>>);

/// Background loop that exclusively owns the link: pulls received frames
/// into the broadcast channel and drains the bounded TX queue into the
/// adapter. All other layers talk to the link through channels only.
fn process<T: CanAdapter>(
    mut adapter: T,
    mut shutdown_receiver: oneshot::Receiver<()>,
    rx_sender: broadcast::Sender<Frame>,
    mut tx_receiver: mpsc::Receiver<FrameCallback>,
) {
    let mut buffer: Vec<Frame> = Vec::new();
    let mut callbacks: HashMap<Identifier, VecDeque<FrameCallback>> = HashMap::new();

    while shutdown_receiver.try_recv().is_err() {
        let frames = match adapter.recv() {
            Ok(frames) => frames,
            Err(e) => {
                error!("link recv failed: {}", e);
                break;
            }
        };

        for frame in frames {
            trace!("RX {:?}", frame);

            // Wake up sender
            if frame.loopback {
                let callback = callbacks
                    .entry(frame.id)
                    .or_insert_with(VecDeque::new)
                    .pop_front();

                match callback {
                    Some((tx_frame, callback)) => {
                        // Frames must be echoed in transmit order, anything
                        // else is an adapter bug.
                        assert_eq!(tx_frame.data, frame.data);
                        if let Some(callback) = callback {
                            let _ = callback.send(());
                        }
                    }
                    None => panic!("Received loopback frame with no pending callback"),
                };
            }

            // Failure means there are no subscribers, which is fine.
            let _ = rx_sender.send(frame);
        }

        buffer.clear();
        while let Ok((frame, callback)) = tx_receiver.try_recv() {
            let mut loopback_frame = frame.clone();
            loopback_frame.loopback = true;

            callbacks
                .entry(frame.id)
                .or_insert_with(VecDeque::new)
                .push_back((loopback_frame, callback));

            trace!("TX {:?}", frame);
            buffer.push(frame);
        }
        if !buffer.is_empty() {
            if let Err(e) = adapter.send(&buffer) {
                error!("link send failed: {}", e);
                break;
            }
        }
        std::thread::sleep(std::time::Duration::from_micros(200));
    }
}

/// Async wrapper around a [`CanAdapter`]. Starts a background thread to
/// handle sending and receiving frames. Uses tokio channels to communicate
/// with the background thread.
pub struct AsyncCanAdapter {
    processing_handle: Option<std::thread::JoinHandle<()>>,
    capabilities: Capabilities,
    recv_receiver: broadcast::Receiver<Frame>,
    send_sender: mpsc::Sender<FrameCallback>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl AsyncCanAdapter {
    pub fn new<T: CanAdapter + Send + 'static>(adapter: T) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (send_sender, send_receiver) = mpsc::channel(CAN_TX_BUFFER_SIZE);
        let (recv_sender, recv_receiver) = broadcast::channel(CAN_RX_BUFFER_SIZE);

        let capabilities = adapter.capabilities();

        let mut ret = AsyncCanAdapter {
            shutdown: Some(shutdown_sender),
            processing_handle: None,
            capabilities,
            recv_receiver,
            send_sender,
        };

        ret.processing_handle = Some(std::thread::spawn(move || {
            process(adapter, shutdown_receiver, recv_sender, send_receiver);
        }));

        ret
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Send a single frame. The future resolves once the frame has been
    /// handed over to the hardware, i.e. the adapter echoed it back. The
    /// frame may still be pending arbitration on the bus itself.
    pub async fn send(&self, frame: &Frame) -> crate::Result<()> {
        let (callback_sender, callback_receiver) = oneshot::channel();
        self.send_sender
            .send((frame.clone(), Some(callback_sender)))
            .await
            .map_err(|_| crate::error::Error::Disconnected)?;

        callback_receiver
            .await
            .map_err(|_| crate::error::Error::Disconnected)
    }

    /// Hand a frame to the TX queue without waiting for the echo.
    pub async fn send_nowait(&self, frame: &Frame) -> crate::Result<()> {
        self.send_sender
            .send((frame.clone(), None))
            .await
            .map_err(|_| crate::error::Error::Disconnected)
    }

    /// Receive all frames.
    pub fn recv(&self) -> impl Stream<Item = Frame> + Send + '_ {
        self.recv_filter(|_| true)
    }

    /// Receive frames that match a filter. Useful in combination with
    /// stream adapters.
    pub fn recv_filter(
        &self,
        filter: impl Fn(&Frame) -> bool + Send + 'static,
    ) -> impl Stream<Item = Frame> + Send + '_ {
        let mut rx = self.recv_receiver.resubscribe();

        Box::pin(stream! {
            loop { match rx.recv().await {
                    Ok(frame) => {
                        if filter(&frame) {
                            yield frame
                        } else {
                            continue
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(_) => continue,
                }
            }
        })
    }
}

impl Drop for AsyncCanAdapter {
    fn drop(&mut self) {
        if let Some(handle) = self.processing_handle.take() {
            // The background thread may already be gone after a link error.
            let _ = self.shutdown.take().unwrap().send(());
            let _ = handle.join();
        }
    }
}
