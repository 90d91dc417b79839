//! UDP-backed radio
//!
//! Carries each 32-byte frame in a datagram tagged with the radio channel,
//! the destination pipe address and a send sequence number. The receiving
//! end answers every data datagram with an ack on its own writing pipe, and
//! `send` only reports success once that ack arrives, the way a transceiver
//! with auto-ack and auto-retransmit does.
//!
//! The socket is a plain blocking `std::net::UdpSocket`: sessions run on
//! blocking threads and wait for acks with a read timeout.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut};

use super::{PipeAddresses, Radio, RadioError, RadioResult};
use crate::protocol::{RawFrame, FRAME_SIZE};

/// Bytes of the pipe address on the wire
const PIPE_ADDRESS_SIZE: usize = 5;

/// channel(1) + pipe(5) + sequence(1)
const HEADER_SIZE: usize = 1 + PIPE_ADDRESS_SIZE + 1;

/// Data datagram: header + frame(32) = 39 bytes
pub const DATAGRAM_SIZE: usize = HEADER_SIZE + FRAME_SIZE;

/// Ack datagram: header only
pub const ACK_SIZE: usize = HEADER_SIZE;

/// Smallest read timeout handed to the socket; zero means "forever" there
const MIN_WAIT: Duration = Duration::from_micros(50);

/// Automatic acknowledgement settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoAck {
    /// How long to wait for the ack after each transmission
    pub timeout: Duration,
    /// Retransmissions after the first one
    pub retries: u8,
}

impl Default for AutoAck {
    fn default() -> Self {
        // 1250 us retransmit delay, 15 retransmits
        Self {
            timeout: Duration::from_micros(1250),
            retries: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Datagram {
    Data {
        channel: u8,
        pipe: u64,
        sequence: u8,
        frame: RawFrame,
    },
    Ack {
        channel: u8,
        pipe: u64,
        sequence: u8,
    },
}

/// Radio that exchanges frames with a peer over UDP
pub struct UdpRadio {
    socket: UdpSocket,
    peer: SocketAddr,
    channel: u8,
    auto_ack: AutoAck,
    pipes: Option<PipeAddresses>,
    inbox: VecDeque<RawFrame>,
    next_sequence: u8,
    last_delivered: Option<(SocketAddr, u8)>,
    ignored: u64,
    duplicates: u64,
    retransmits: u64,
}

impl UdpRadio {
    /// Bind a socket and target `peer`
    pub fn bind(bind: SocketAddr, peer: SocketAddr, channel: u8) -> RadioResult<Self> {
        let socket = UdpSocket::bind(bind)?;
        Self::from_socket(socket, peer, channel)
    }

    /// Wrap an already bound socket
    pub fn from_socket(socket: UdpSocket, peer: SocketAddr, channel: u8) -> RadioResult<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            peer,
            channel,
            auto_ack: AutoAck::default(),
            pipes: None,
            inbox: VecDeque::new(),
            next_sequence: 0,
            last_delivered: None,
            ignored: 0,
            duplicates: 0,
            retransmits: 0,
        })
    }

    pub fn with_auto_ack(mut self, auto_ack: AutoAck) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn local_addr(&self) -> RadioResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Datagrams dropped for being on another channel or pipe
    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    /// Retransmitted data frames acked again but not delivered twice
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Transmissions repeated because no ack arrived in time
    pub fn retransmits(&self) -> u64 {
        self.retransmits
    }

    /// Log the link settings
    pub fn print_details(&self) {
        let local = self
            .socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unbound".to_string());
        tracing::debug!("UDP radio {} -> {} on channel {}", local, self.peer, self.channel);
        tracing::debug!(
            "Auto-ack: {} us timeout, {} retransmits",
            self.auto_ack.timeout.as_micros(),
            self.auto_ack.retries
        );
        if let Some(pipes) = self.pipes {
            tracing::debug!(
                "Writing pipe {:#012x}, reading pipe {:#012x}",
                pipes.writing,
                pipes.reading
            );
        }
    }

    /// Read one datagram; `wait` of `None` does not block
    fn recv(
        &self,
        buf: &mut [u8],
        wait: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        match wait {
            Some(wait) => {
                self.socket.set_nonblocking(false)?;
                self.socket.set_read_timeout(Some(wait.max(MIN_WAIT)))?;
            }
            None => self.socket.set_nonblocking(true)?,
        }
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Queue and ack data for our reading pipe. Returns the sequence of an
    /// ack addressed to us.
    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> Option<u8> {
        let Some(pipes) = self.pipes else {
            self.ignored += 1;
            return None;
        };
        match decode_datagram(datagram) {
            Some(Datagram::Data {
                channel,
                pipe,
                sequence,
                frame,
            }) if channel == self.channel && pipe == pipes.reading => {
                self.send_ack(pipes.writing, sequence, from);
                if self.last_delivered == Some((from, sequence)) {
                    self.duplicates += 1;
                    tracing::debug!("Duplicate frame seq={} from {}", sequence, from);
                } else {
                    self.last_delivered = Some((from, sequence));
                    self.inbox.push_back(frame);
                }
                None
            }
            Some(Datagram::Ack {
                channel,
                pipe,
                sequence,
            }) if channel == self.channel && pipe == pipes.reading => Some(sequence),
            _ => {
                self.ignored += 1;
                None
            }
        }
    }

    fn send_ack(&self, pipe: u64, sequence: u8, to: SocketAddr) {
        let ack = encode_ack(self.channel, pipe, sequence);
        if let Err(e) = self.socket.send_to(&ack, to) {
            tracing::debug!("UDP ack to {} failed: {}", to, e);
        }
    }

    /// Wait up to the ack timeout for the ack of `sequence`
    fn await_ack(&mut self, sequence: u8) -> bool {
        let deadline = Instant::now() + self.auto_ack.timeout;
        let mut buf = [0u8; DATAGRAM_SIZE + 1];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.recv(&mut buf, Some(deadline - now)) {
                Ok(Some((n, from))) => {
                    if self.handle_datagram(&buf[..n], from) == Some(sequence) {
                        return true;
                    }
                }
                Ok(None) => return false,
                Err(e) => {
                    tracing::debug!("UDP receive failed while awaiting ack: {}", e);
                    return false;
                }
            }
        }
    }
}

impl Radio for UdpRadio {
    fn open(&mut self, pipes: PipeAddresses) -> RadioResult<()> {
        if pipes.writing == pipes.reading {
            return Err(RadioError::SamePipes(pipes.writing));
        }
        self.pipes = Some(pipes);
        self.inbox.clear();
        self.last_delivered = None;
        Ok(())
    }

    fn send(&mut self, frame: &RawFrame) -> bool {
        let Some(pipes) = self.pipes else {
            return false;
        };
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let datagram = encode_data(self.channel, pipes.writing, sequence, frame);

        for attempt in 0..=self.auto_ack.retries {
            if attempt > 0 {
                self.retransmits += 1;
            }
            if let Err(e) = self.socket.send_to(&datagram, self.peer) {
                tracing::debug!("UDP send to {} failed: {}", self.peer, e);
                continue;
            }
            if self.await_ack(sequence) {
                return true;
            }
        }
        false
    }

    fn poll(&mut self) -> bool {
        if !self.inbox.is_empty() {
            return true;
        }

        let mut buf = [0u8; DATAGRAM_SIZE + 1];
        loop {
            match self.recv(&mut buf, None) {
                Ok(Some((n, from))) => {
                    // Late acks for sends already given up on land here
                    self.handle_datagram(&buf[..n], from);
                    if !self.inbox.is_empty() {
                        return true;
                    }
                }
                Ok(None) => return false,
                Err(e) => {
                    tracing::warn!("UDP receive failed: {}", e);
                    return false;
                }
            }
        }
    }

    fn receive(&mut self) -> Option<RawFrame> {
        if self.inbox.is_empty() {
            self.poll();
        }
        self.inbox.pop_front()
    }
}

fn put_header(buf: &mut &mut [u8], channel: u8, pipe: u64, sequence: u8) {
    buf.put_u8(channel);
    buf.put_uint(pipe, PIPE_ADDRESS_SIZE);
    buf.put_u8(sequence);
}

fn encode_data(channel: u8, pipe: u64, sequence: u8, frame: &RawFrame) -> [u8; DATAGRAM_SIZE] {
    let mut datagram = [0u8; DATAGRAM_SIZE];
    let mut buf = &mut datagram[..];
    put_header(&mut buf, channel, pipe, sequence);
    buf.put_slice(frame);
    datagram
}

fn encode_ack(channel: u8, pipe: u64, sequence: u8) -> [u8; ACK_SIZE] {
    let mut datagram = [0u8; ACK_SIZE];
    put_header(&mut &mut datagram[..], channel, pipe, sequence);
    datagram
}

fn decode_datagram(datagram: &[u8]) -> Option<Datagram> {
    if datagram.len() != DATAGRAM_SIZE && datagram.len() != ACK_SIZE {
        return None;
    }
    let mut buf = datagram;
    let channel = buf.get_u8();
    let pipe = buf.get_uint(PIPE_ADDRESS_SIZE);
    let sequence = buf.get_u8();
    if buf.is_empty() {
        return Some(Datagram::Ack {
            channel,
            pipe,
            sequence,
        });
    }
    let mut frame = [0u8; FRAME_SIZE];
    buf.copy_to_slice(&mut frame);
    Some(Datagram::Data {
        channel,
        pipe,
        sequence,
        frame,
    })
}
