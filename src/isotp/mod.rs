//! ISO Transport Protocol (ISO-TP) implementation, implements ISO 15765-2
//! Normal addressing over 11-bit identifiers, for both classic CAN and
//! CAN-FD frame sizes.
//! ## Example:
//! ```no_run
//! async fn isotp_example() -> zcuflash::Result<()> {
//!    let (link, _peer) = zcuflash::can::VirtualCan::pair();
//!    let adapter = zcuflash::can::AsyncCanAdapter::new(link);
//!    let config = zcuflash::isotp::IsoTpConfig::new(0x736.into(), 0x7b6.into());
//!    let isotp = zcuflash::isotp::IsoTpAdapter::new(&adapter, config);
//!
//!    let mut response = isotp.receiver(); // Create receiver before sending request
//!    isotp.send(&[0x3e, 0x00]).await?;
//!    let response = response.recv().await?;
//!    Ok(())
//! }
//! ```

mod constants;
pub mod error;
mod types;

use std::pin::Pin;
use std::time::Duration;

use crate::can::{AsyncCanAdapter, Frame, Identifier, DLC_TO_LEN};
use crate::isotp::constants::{FlowStatus, FrameType, FRAME_TYPE_MASK};
pub use crate::isotp::error::Error;
pub use crate::isotp::types::{decode_st_min, FlowControlConfig};

use tokio_stream::{Stream, StreamExt};
use tracing::debug;

const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// The largest message expressible with the 12-bit First Frame length.
pub const MAX_MESSAGE_SIZE: usize = 4095;

/// Configuration passed to the [`IsoTpAdapter`].
#[derive(Debug, Clone)]
pub struct IsoTpConfig {
    /// Transmit ID
    pub tx_id: Identifier,
    /// Receive ID
    pub rx_id: Identifier,
    /// Transmit Data Length: frame payload size for outgoing frames.
    /// 8 for classic CAN, up to 64 for CAN-FD.
    pub tx_dl: usize,
    /// Use CAN-FD frame sizes and the escape Single Frame form.
    pub can_fd: bool,
    /// Padding byte for outgoing frames, None disables padding on classic
    /// CAN. CAN-FD frames are always padded up to a valid DLC.
    pub padding: Option<u8>,
    /// STmin announced in our Flow Control frames (raw wire encoding).
    pub st_min: u8,
    /// Block size announced in our Flow Control frames, 0 is unlimited.
    pub block_size: u8,
    /// N_Bs: how long to wait for a Flow Control after a First Frame or a
    /// completed block.
    pub rx_flow_control_timeout: Duration,
    /// N_Cr: maximum gap between Consecutive Frames of an incoming message.
    pub rx_consecutive_frame_timeout: Duration,
    /// Default wait for the first frame of a response in [`IsoTpAdapter::recv`].
    pub timeout: Duration,
    /// Upper bound on message size, at most [`MAX_MESSAGE_SIZE`].
    pub max_frame_size: usize,
    /// When true, `send` resolves only after the last frame was echoed back
    /// by the hardware. When false the tail of the message may still be in
    /// the transmit queue on return.
    pub blocking_send: bool,
}

impl IsoTpConfig {
    /// Classic CAN endpoint configuration with the conventional defaults.
    pub fn new(tx_id: Identifier, rx_id: Identifier) -> Self {
        Self {
            tx_id,
            rx_id,
            tx_dl: 8,
            can_fd: false,
            padding: Some(0x00),
            st_min: 0,
            block_size: 0,
            rx_flow_control_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            rx_consecutive_frame_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_frame_size: MAX_MESSAGE_SIZE,
            blocking_send: false,
        }
    }

    /// CAN-FD endpoint configuration: 64 byte frames, 0xAA padding.
    pub fn new_fd(tx_id: Identifier, rx_id: Identifier) -> Self {
        Self {
            tx_dl: 64,
            can_fd: true,
            padding: Some(0xaa),
            ..Self::new(tx_id, rx_id)
        }
    }
}

/// Wraps a CAN adapter to provide a simple interface for sending and
/// receiving ISO-TP messages.
pub struct IsoTpAdapter<'a> {
    adapter: &'a AsyncCanAdapter,
    config: IsoTpConfig,
}

impl<'a> IsoTpAdapter<'a> {
    /// Create a new IsoTpAdapter from a CAN adapter and a configuration.
    pub fn new(adapter: &'a AsyncCanAdapter, config: IsoTpConfig) -> Self {
        Self { adapter, config }
    }

    pub fn config(&self) -> &IsoTpConfig {
        &self.config
    }

    /// Payload capacity of a Single Frame for this endpoint.
    fn sf_capacity(&self) -> usize {
        if self.config.can_fd && self.config.tx_dl > 8 {
            self.config.tx_dl - 2
        } else {
            7
        }
    }

    /// Payload capacity of a Consecutive Frame.
    fn cf_capacity(&self) -> usize {
        self.config.tx_dl - 1
    }

    /// Payload capacity of a First Frame.
    fn ff_capacity(&self) -> usize {
        self.config.tx_dl - 2
    }

    fn pad(&self, buf: &mut Vec<u8>) {
        if self.config.can_fd {
            // Pad up to the smallest DLC that fits, the bus cannot express
            // arbitrary lengths above 8 bytes.
            let target = DLC_TO_LEN
                .iter()
                .copied()
                .find(|len| *len >= buf.len())
                .unwrap_or(self.config.tx_dl);
            let padding = self.config.padding.unwrap_or(0x00);
            buf.resize(target.min(self.config.tx_dl), padding);
        } else if let Some(padding) = self.config.padding {
            buf.resize(self.config.tx_dl, padding);
        }
    }

    async fn transmit(&self, buf: &[u8]) -> crate::Result<()> {
        let frame = Frame::new(self.config.tx_id, buf)?;
        if self.config.blocking_send {
            self.adapter.send(&frame).await
        } else {
            self.adapter.send_nowait(&frame).await
        }
    }

    async fn send_single_frame(&self, data: &[u8]) -> crate::Result<()> {
        let mut buf = if data.len() <= 7 {
            vec![FrameType::Single as u8 | data.len() as u8]
        } else {
            // CAN-FD escape form: SF_DL moves to the second byte.
            vec![FrameType::Single as u8, data.len() as u8]
        };
        buf.extend(data);
        self.pad(&mut buf);

        debug!("TX SF, length: {} data {}", data.len(), hex::encode(&buf));
        self.transmit(&buf).await
    }

    async fn send_first_frame(&self, data: &[u8]) -> crate::Result<()> {
        let b0: u8 = FrameType::First as u8 | ((data.len() >> 8) & 0xF) as u8;
        let b1: u8 = (data.len() & 0xFF) as u8;

        let mut buf = vec![b0, b1];
        buf.extend(&data[..self.ff_capacity()]);

        debug!("TX FF, length: {} data {}", data.len(), hex::encode(&buf));
        self.transmit(&buf).await
    }

    async fn send_consecutive_frame(&self, data: &[u8], sn: u8) -> crate::Result<()> {
        let mut buf = vec![FrameType::Consecutive as u8 | sn];
        buf.extend(data);
        self.pad(&mut buf);

        debug!("TX CF, sn: {} data {}", sn, hex::encode(&buf));
        self.transmit(&buf).await
    }

    async fn send_flow_control(&self) -> crate::Result<()> {
        let mut buf = vec![
            FrameType::FlowControl as u8 | FlowStatus::ContinueToSend as u8,
            self.config.block_size,
            self.config.st_min,
        ];
        self.pad(&mut buf);

        debug!("TX FC, data {}", hex::encode(&buf));
        // Flow control goes out ahead of anything else we might queue.
        let frame = Frame::new(self.config.tx_id, &buf)?;
        self.adapter.send(&frame).await
    }

    /// Wait for a Flow Control frame from the peer. WAIT restarts the
    /// timeout, OVERFLOW aborts the transfer.
    async fn wait_flow_control<S>(
        &self,
        stream: &mut Pin<&mut S>,
    ) -> crate::Result<FlowControlConfig>
    where
        S: Stream<Item = Frame> + ?Sized,
    {
        loop {
            let frame = tokio::time::timeout(self.config.rx_flow_control_timeout, stream.next())
                .await
                .map_err(|_| Error::FlowControlTimeout)?
                .ok_or(crate::error::Error::Disconnected)?;

            if frame.data.is_empty() || frame.data[0] & FRAME_TYPE_MASK != FrameType::FlowControl as u8
            {
                debug!("RX ignoring frame while waiting for FC");
                continue;
            }

            match FlowStatus::from(frame.data[0]) {
                FlowStatus::ContinueToSend => {
                    debug!("RX FC, data {}", hex::encode(&frame.data));
                    return FlowControlConfig::try_from(&frame);
                }
                FlowStatus::Wait => {
                    debug!("RX FC WAIT");
                    continue;
                }
                FlowStatus::Overflow => return Err(Error::PeerOverflow.into()),
                FlowStatus::Unknown => return Err(Error::MalformedFrame.into()),
            }
        }
    }

    async fn send_multiple(&self, data: &[u8]) -> crate::Result<()> {
        // Subscribe for flow control before the First Frame goes out.
        let rx_id = self.config.rx_id;
        let stream = self
            .adapter
            .recv_filter(move |frame| frame.id == rx_id && !frame.loopback);
        tokio::pin!(stream);

        self.send_first_frame(data).await?;

        let mut chunks = data[self.ff_capacity()..].chunks(self.cf_capacity());
        let mut remaining = chunks.len();
        let mut sn: u8 = 1;

        'blocks: loop {
            let fc = self.wait_flow_control(&mut stream).await?;
            let mut sent_in_block: usize = 0;

            while let Some(chunk) = chunks.next() {
                self.send_consecutive_frame(chunk, sn).await?;
                sn = (sn + 1) & 0xF;
                remaining -= 1;
                sent_in_block += 1;

                if remaining == 0 {
                    break 'blocks;
                }
                if fc.block_size != 0 && sent_in_block == fc.block_size as usize {
                    continue 'blocks;
                }
                if !fc.separation_time_min.is_zero() {
                    tokio::time::sleep(fc.separation_time_min).await;
                }
            }
            break;
        }

        Ok(())
    }

    /// Asynchronously send an ISO-TP message of up to 4095 bytes. Returns
    /// [`Error::FlowControlTimeout`] if the ECU is not responding in time
    /// with flow control messages.
    pub async fn send(&self, data: &[u8]) -> crate::Result<()> {
        debug!("TX {}", hex::encode(data));

        if data.len() > self.config.max_frame_size.min(MAX_MESSAGE_SIZE) {
            return Err(Error::MessageTooLarge.into());
        }

        if data.len() <= self.sf_capacity() {
            self.send_single_frame(data).await
        } else {
            self.send_multiple(data).await
        }
    }

    /// Subscribe to incoming messages on this endpoint. The subscription is
    /// live from the moment this returns, so create the receiver before
    /// sending the request it should catch the response of.
    pub fn receiver(&self) -> IsoTpReceiver<'_> {
        let rx_id = self.config.rx_id;
        let stream = self
            .adapter
            .recv_filter(move |frame| frame.id == rx_id && !frame.loopback);

        IsoTpReceiver {
            isotp: self,
            stream: Box::pin(stream),
        }
    }

    /// Asynchronously receive a single ISO-TP message, waiting at most the
    /// configured `timeout` for it to start.
    pub async fn recv(&self) -> crate::Result<Vec<u8>> {
        self.receiver().recv().await
    }
}

/// Reassembles one incoming message at a time for a single endpoint.
pub struct IsoTpReceiver<'a> {
    isotp: &'a IsoTpAdapter<'a>,
    stream: Pin<Box<dyn Stream<Item = Frame> + Send + 'a>>,
}

struct Reassembly {
    buf: Vec<u8>,
    len: usize,
    sn: u8,
    cfs_in_block: usize,
}

impl IsoTpReceiver<'_> {
    /// Receive the next message, waiting at most the endpoint's configured
    /// `timeout` for the first frame.
    pub async fn recv(&mut self) -> crate::Result<Vec<u8>> {
        let timeout = self.isotp.config.timeout;
        self.recv_within(timeout).await
    }

    /// Receive the next message, waiting at most `first_frame_timeout` for
    /// it to start. Once reassembly is in progress the inter-frame gap is
    /// bounded by N_Cr instead.
    pub async fn recv_within(&mut self, first_frame_timeout: Duration) -> crate::Result<Vec<u8>> {
        let config = &self.isotp.config;
        let mut reassembly: Option<Reassembly> = None;

        loop {
            let wait = match reassembly {
                Some(_) => config.rx_consecutive_frame_timeout,
                None => first_frame_timeout,
            };

            let frame = match tokio::time::timeout(wait, self.stream.next()).await {
                Ok(frame) => frame.ok_or(crate::error::Error::Disconnected)?,
                Err(_) if reassembly.is_some() => {
                    return Err(Error::ConsecutiveFrameTimeout.into())
                }
                Err(_) => return Err(crate::error::Error::Timeout),
            };

            if frame.data.is_empty() {
                return Err(Error::MalformedFrame.into());
            }

            match (frame.data[0] & FRAME_TYPE_MASK).into() {
                FrameType::Single => return self.recv_single_frame(&frame),
                FrameType::First => {
                    reassembly = Some(self.recv_first_frame(&frame).await?);
                }
                FrameType::Consecutive => {
                    if let Some(state) = reassembly.as_mut() {
                        if Self::recv_consecutive_frame(state, &frame)? {
                            return Ok(std::mem::take(&mut state.buf));
                        }
                        // Block complete but message is not, ask for more.
                        if config.block_size != 0 && state.cfs_in_block >= config.block_size as usize
                        {
                            state.cfs_in_block = 0;
                            self.isotp.send_flow_control().await?;
                        }
                    } else {
                        debug!("RX stray CF, data {}", hex::encode(&frame.data));
                    }
                }
                FrameType::FlowControl => {
                    // Peer flow control for a transfer driven elsewhere.
                    continue;
                }
                FrameType::Unknown => return Err(Error::UnknownFrameType.into()),
            }
        }
    }

    fn recv_single_frame(&self, frame: &Frame) -> crate::Result<Vec<u8>> {
        let mut len = (frame.data[0] & 0xF) as usize;
        let mut start = 1;

        if len == 0 {
            // CAN-FD escape form
            if frame.data.len() < 2 {
                return Err(Error::MalformedFrame.into());
            }
            len = frame.data[1] as usize;
            start = 2;
        }

        if len == 0 || frame.data.len() < start + len {
            return Err(Error::MalformedFrame.into());
        }

        debug!("RX SF, length: {} data {}", len, hex::encode(&frame.data));
        Ok(frame.data[start..start + len].to_vec())
    }

    async fn recv_first_frame(&self, frame: &Frame) -> crate::Result<Reassembly> {
        if frame.data.len() < 3 {
            return Err(Error::MalformedFrame.into());
        }

        let b0 = frame.data[0] as usize;
        let b1 = frame.data[1] as usize;
        let len = (b0 << 8 | b1) & 0xFFF;

        debug!("RX FF, length: {}, data {}", len, hex::encode(&frame.data));

        let mut buf = Vec::with_capacity(len);
        buf.extend(&frame.data[2..]);

        self.isotp.send_flow_control().await?;

        Ok(Reassembly {
            buf,
            len,
            sn: 1,
            cfs_in_block: 0,
        })
    }

    /// Returns true once the message is complete.
    fn recv_consecutive_frame(state: &mut Reassembly, frame: &Frame) -> crate::Result<bool> {
        let sn = frame.data[0] & 0xF;
        if sn != state.sn {
            return Err(Error::SequenceError.into());
        }
        state.sn = (state.sn + 1) & 0xF;
        state.cfs_in_block += 1;

        let remaining = state.len - state.buf.len();
        let end = std::cmp::min(remaining + 1, frame.data.len());
        state.buf.extend(&frame.data[1..end]);

        debug!(
            "RX CF, sn: {}, data {} ({}/{})",
            sn,
            hex::encode(&frame.data),
            state.buf.len(),
            state.len
        );

        Ok(state.buf.len() >= state.len)
    }
}
