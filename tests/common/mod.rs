#![allow(dead_code, unused_imports)]
//! In-process virtual ECU: an ISO-TP server over the virtual CAN link with
//! a scriptable UDS responder. Lets the suite run without a vcan interface
//! or an external ECU simulator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use zcuflash::can::{Frame, VirtualCanPeer, DLC_TO_LEN};
use zcuflash::security::{self, Zone};

#[derive(Clone, Copy)]
pub struct VecuConfig {
    /// The ECU's transmit ID, i.e. the tester's rx_id.
    pub tx_id: u32,
    /// The ECU's receive ID, i.e. the tester's tx_id.
    pub rx_id: u32,
    /// STmin the ECU announces in its flow control.
    pub st_min: u8,
    /// Block size the ECU announces in its flow control.
    pub block_size: u8,
    /// Padding byte for the ECU's own frames.
    pub padding: u8,
    /// Frame payload size for the ECU's own frames.
    pub tx_dl: usize,
}

impl Default for VecuConfig {
    fn default() -> Self {
        Self {
            tx_id: 0x7b6,
            rx_id: 0x736,
            st_min: 0,
            block_size: 0,
            padding: 0xaa,
            tx_dl: 8,
        }
    }
}

/// One scripted reaction to a received request.
pub enum EcuAction {
    Reply(Vec<u8>),
    DelayedReply(Duration, Vec<u8>),
}

pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<EcuAction> + Send>;

pub struct Vecu {
    /// Every frame the tester transmitted, in arrival order.
    pub frames: Arc<Mutex<Vec<Frame>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Vecu {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Frames the tester sent to the given arbitration ID.
pub fn frames_for(vecu: &Vecu, id: u32) -> Vec<Frame> {
    vecu.frames
        .lock()
        .unwrap()
        .iter()
        .filter(|frame| u32::from(frame.id) == id)
        .cloned()
        .collect()
}

struct Server {
    peer: VirtualCanPeer,
    config: VecuConfig,
    frames: Arc<Mutex<Vec<Frame>>>,
    responder: Responder,
    reassembly: Option<Reassembly>,
}

struct Reassembly {
    buf: Vec<u8>,
    len: usize,
    sn: u8,
    cfs_in_block: usize,
}

pub fn spawn_vecu(peer: VirtualCanPeer, config: VecuConfig, responder: Responder) -> Vecu {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut server = Server {
        peer,
        config,
        frames: frames.clone(),
        responder,
        reassembly: None,
    };
    let stop = shutdown.clone();

    let handle = std::thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            let frame = match server.peer.recv(Duration::from_millis(20)) {
                Some(frame) => frame,
                None => continue,
            };
            server.frames.lock().unwrap().push(frame.clone());

            if u32::from(frame.id) != server.config.rx_id || frame.data.is_empty() {
                continue;
            }
            server.handle_frame(&frame);
        }
    });

    Vecu {
        frames,
        shutdown,
        handle: Some(handle),
    }
}

impl Server {
    fn handle_frame(&mut self, frame: &Frame) {
        match frame.data[0] >> 4 {
            0x0 => {
                let (len, start) = if frame.data[0] & 0xf != 0 {
                    ((frame.data[0] & 0xf) as usize, 1)
                } else {
                    (frame.data[1] as usize, 2)
                };
                if frame.data.len() >= start + len {
                    let msg = frame.data[start..start + len].to_vec();
                    self.respond(&msg);
                }
            }
            0x1 => {
                let len = ((frame.data[0] as usize) << 8 | frame.data[1] as usize) & 0xfff;
                let buf = frame.data[2..].to_vec();
                self.send_frame(&[
                    0x30,
                    self.config.block_size,
                    self.config.st_min,
                ]);
                self.reassembly = Some(Reassembly {
                    buf,
                    len,
                    sn: 1,
                    cfs_in_block: 0,
                });
            }
            0x2 => {
                let Some(mut state) = self.reassembly.take() else {
                    return;
                };
                if frame.data[0] & 0xf != state.sn {
                    // Out of order, drop the reassembly.
                    return;
                }
                state.sn = (state.sn + 1) & 0xf;
                state.cfs_in_block += 1;

                let remaining = state.len - state.buf.len();
                let end = std::cmp::min(remaining + 1, frame.data.len());
                state.buf.extend(&frame.data[1..end]);

                if state.buf.len() >= state.len {
                    let msg = std::mem::take(&mut state.buf);
                    self.respond(&msg);
                } else {
                    if self.config.block_size != 0
                        && state.cfs_in_block >= self.config.block_size as usize
                    {
                        state.cfs_in_block = 0;
                        self.send_frame(&[0x30, self.config.block_size, self.config.st_min]);
                    }
                    self.reassembly = Some(state);
                }
            }
            // Flow control for a response in flight is consumed in send_message.
            _ => {}
        }
    }

    fn respond(&mut self, msg: &[u8]) {
        let actions = (self.responder)(msg);
        for action in actions {
            let data = match action {
                EcuAction::Reply(data) => data,
                EcuAction::DelayedReply(delay, data) => {
                    std::thread::sleep(delay);
                    data
                }
            };
            self.send_message(&data);
        }
    }

    fn pad(&self, buf: &mut Vec<u8>) {
        let target = if self.config.tx_dl > 8 {
            DLC_TO_LEN
                .iter()
                .copied()
                .find(|len| *len >= buf.len())
                .unwrap_or(self.config.tx_dl)
                .min(self.config.tx_dl)
        } else {
            self.config.tx_dl
        };
        buf.resize(target, self.config.padding);
    }

    fn send_frame(&self, data: &[u8]) {
        let mut buf = data.to_vec();
        self.pad(&mut buf);
        let frame = Frame::new(self.config.tx_id.into(), &buf).unwrap();
        let _ = self.peer.send(frame);
    }

    /// Wait for the tester's flow control, logging everything on the way.
    fn wait_fc(&self) -> Option<(u8, Duration)> {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            let Some(frame) = self.peer.recv(Duration::from_millis(20)) else {
                continue;
            };
            self.frames.lock().unwrap().push(frame.clone());
            if u32::from(frame.id) != self.config.rx_id || frame.data.is_empty() {
                continue;
            }
            if frame.data[0] & 0xf0 == 0x30 {
                match frame.data[0] & 0xf {
                    0x0 => {
                        let st = match frame.data[2] {
                            0x00..=0x7f => Duration::from_millis(frame.data[2] as u64),
                            0xf1..=0xf9 => {
                                Duration::from_micros((frame.data[2] as u64 - 0xf0) * 100)
                            }
                            _ => Duration::from_millis(0x7f),
                        };
                        return Some((frame.data[1], st));
                    }
                    0x1 => continue,
                    _ => return None,
                }
            }
        }
        None
    }

    fn send_message(&self, data: &[u8]) {
        let sf_capacity = if self.config.tx_dl > 8 {
            self.config.tx_dl - 2
        } else {
            7
        };

        if data.len() <= sf_capacity {
            let mut buf = if data.len() <= 7 {
                vec![data.len() as u8]
            } else {
                vec![0x00, data.len() as u8]
            };
            buf.extend(data);
            self.send_frame(&buf);
            return;
        }

        // First frame
        let ff_capacity = self.config.tx_dl - 2;
        let cf_capacity = self.config.tx_dl - 1;
        let mut buf = vec![
            0x10 | ((data.len() >> 8) & 0xf) as u8,
            (data.len() & 0xff) as u8,
        ];
        buf.extend(&data[..ff_capacity]);
        self.send_frame(&buf);

        let Some((mut block_size, mut st_min)) = self.wait_fc() else {
            return;
        };

        let chunks: Vec<&[u8]> = data[ff_capacity..].chunks(cf_capacity).collect();
        let total = chunks.len();
        let mut sn: u8 = 1;
        let mut sent_in_block = 0;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let mut buf = vec![0x20 | sn];
            buf.extend(chunk);
            self.send_frame(&buf);
            sn = (sn + 1) & 0xf;
            sent_in_block += 1;

            if index + 1 == total {
                break;
            }
            if block_size != 0 && sent_in_block == block_size as usize {
                match self.wait_fc() {
                    Some((bs, st)) => {
                        block_size = bs;
                        st_min = st;
                        sent_in_block = 0;
                    }
                    None => return,
                }
            }
            if !st_min.is_zero() {
                std::thread::sleep(st_min);
            }
        }
    }
}

/// Scripted ZCU bootloader used by the end-to-end flash tests. Implements
/// enough of the UDS server side to accept the complete reflash sequence.
pub struct ZcuBootSim {
    pub zone: Zone,
    pub seed: [u8; 16],
    /// maxNumberOfBlockLength advertised by RequestDownload.
    pub max_block_length: u16,
    /// Reply 0x78 pending before the final erase response.
    pub erase_pending: bool,
    /// Erase status byte, 0x00 accepts and 0x01 rejects.
    pub erase_status: u8,

    pub expected_sequence: u8,
    pub blocks_received: usize,
    pub sequence_wrapped_to_zero: bool,
    /// Payload of the download currently in progress.
    pub current_download: Vec<u8>,
    /// Completed downloads, in order.
    pub downloads: Vec<Vec<u8>>,
    pub signatures: Vec<Vec<u8>>,
    pub unlocked: bool,
}

impl ZcuBootSim {
    pub fn new(zone: Zone) -> Self {
        Self {
            zone,
            seed: [
                0x00, 0x4f, 0x18, 0xb0, 0x1e, 0xae, 0x78, 0x13, 0x0e, 0x76, 0x76, 0xc1, 0x26,
                0x27, 0x46, 0x6f,
            ],
            max_block_length: 0x102,
            erase_pending: false,
            erase_status: 0x00,
            expected_sequence: 1,
            blocks_received: 0,
            sequence_wrapped_to_zero: false,
            current_download: Vec::new(),
            downloads: Vec::new(),
            signatures: Vec::new(),
            unlocked: false,
        }
    }

    /// Wrap a shared simulator into a vECU responder.
    pub fn responder(sim: Arc<Mutex<ZcuBootSim>>) -> Responder {
        Box::new(move |request| sim.lock().unwrap().handle(request))
    }

    fn handle(&mut self, request: &[u8]) -> Vec<EcuAction> {
        let reply = |data: Vec<u8>| vec![EcuAction::Reply(data)];
        let negative = |sid: u8, nrc: u8| vec![EcuAction::Reply(vec![0x7f, sid, nrc])];

        match request[0] {
            0x10 => {
                if request[1] & 0x80 != 0 {
                    return vec![];
                }
                // P2 = 1000 ms, P2* = 5000 ms
                reply(vec![0x50, request[1], 0x03, 0xe8, 0x01, 0xf4])
            }
            0x11 => reply(vec![0x51, request[1]]),
            0x14 => reply(vec![0x54]),
            0x22 => {
                let did = u16::from_be_bytes([request[1], request[2]]);
                match did {
                    0xf0f0 => reply(vec![0x62, 0xf0, 0xf0, 0x00]),
                    _ => negative(0x22, 0x31),
                }
            }
            0x27 => match request[1] {
                0x11 => {
                    let mut data = vec![0x67, 0x11];
                    data.extend(self.seed);
                    reply(data)
                }
                0x12 => {
                    let expected =
                        security::compute_key(self.zone, 0x11, &self.seed).unwrap();
                    if request[2..] == expected[..] {
                        self.unlocked = true;
                        reply(vec![0x67, 0x12])
                    } else {
                        negative(0x27, 0x35)
                    }
                }
                _ => negative(0x27, 0x12),
            },
            0x2e => reply(vec![0x6e, request[1], request[2]]),
            0x31 => {
                let rid = u16::from_be_bytes([request[2], request[3]]);
                match rid {
                    0xff00 => {
                        let done = vec![0x71, 0x01, 0xff, 0x00, self.erase_status];
                        if self.erase_pending {
                            vec![
                                EcuAction::Reply(vec![0x7f, 0x31, 0x78]),
                                EcuAction::DelayedReply(Duration::from_millis(100), done),
                            ]
                        } else {
                            reply(done)
                        }
                    }
                    0xdd02 => {
                        self.signatures.push(request[4..].to_vec());
                        reply(vec![0x71, 0x01, 0xdd, 0x02])
                    }
                    _ => reply(vec![0x71, 0x01, request[2], request[3]]),
                }
            }
            0x34 => {
                self.expected_sequence = 1;
                self.current_download.clear();
                let mbl = self.max_block_length.to_be_bytes();
                reply(vec![0x74, 0x20, mbl[0], mbl[1]])
            }
            0x36 => {
                if request[1] != self.expected_sequence {
                    return negative(0x36, 0x73);
                }
                if self.expected_sequence == 0 {
                    self.sequence_wrapped_to_zero = true;
                }
                self.current_download.extend(&request[2..]);
                self.blocks_received += 1;
                let sequence = self.expected_sequence;
                self.expected_sequence = self.expected_sequence.wrapping_add(1);
                reply(vec![0x76, sequence])
            }
            0x37 => {
                self.downloads.push(std::mem::take(&mut self.current_download));
                reply(vec![0x77])
            }
            0x3e => {
                if request[1] & 0x80 != 0 {
                    return vec![];
                }
                reply(vec![0x7e, 0x00])
            }
            sid => negative(sid, 0x11),
        }
    }
}
