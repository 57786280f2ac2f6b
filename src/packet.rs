//! # Packet Module
//!
//! Packet handles lent out by the [`PacketPool`](crate::PacketPool).
//!
//! ## Structure
//!
//! - **MacHeader**: addressing fields and sequence number of an 802.15.4 data frame
//! - **MacFrame**: header plus payload type/status bytes and payload data, the
//!   unit exchanged with the transceiver
//! - **Packet**: a `MacFrame` bound to a pool slot
//!
//! ## Ownership
//!
//! A `Packet` is neither `Clone` nor constructible outside this crate, so the
//! only way to obtain one is a pool request and the only way to get rid of one
//! is moving it somewhere else: into a queue, back to the pool, or into the
//! transceiver-facing in-flight slot. Dropping a packet instead of returning it
//! leaks its pool slot.
//!
//! The wire encoding of the frame is owned by the transceiver implementation;
//! this layer only reads and writes the fields below.

use embassy_time::Instant;

use crate::{MAX_PAYLOAD_SIZE, RadioError};

/// Addressing header of a data frame (16 bit short addresses)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MacHeader {
    /// Sequence number, stamped by the driver on every transmit attempt
    pub seq_num: u8,
    /// Destination PAN identifier
    pub dest_pan: u16,
    /// Destination short address
    pub dest_addr: u16,
    /// Source PAN identifier
    pub src_pan: u16,
    /// Source short address
    pub src_addr: u16,
}

/// Frame content as written to and read from the transceiver
///
/// # Public Fields
/// `data` and `length` are public so transceiver implementations can
/// serialize straight from and into the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacFrame {
    pub header: MacHeader,
    /// Application defined payload type byte
    pub payload_type: u8,
    /// Application defined payload status byte
    pub payload_status: u8,
    /// Raw payload buffer of the largest frame size
    pub data: [u8; MAX_PAYLOAD_SIZE],
    /// Number of valid bytes in `data`
    pub length: usize,
}

impl Default for MacFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl MacFrame {
    pub const fn new() -> Self {
        MacFrame {
            header: MacHeader {
                seq_num: 0,
                dest_pan: 0,
                dest_addr: 0,
                src_pan: 0,
                src_addr: 0,
            },
            payload_type: 0,
            payload_status: 0,
            data: [0; MAX_PAYLOAD_SIZE],
            length: 0,
        }
    }

    /// Builds a frame carrying a copy of `payload`
    ///
    /// # Errors
    /// `PayloadTooLarge` if `payload` exceeds `MAX_PAYLOAD_SIZE`.
    pub fn with(header: MacHeader, payload_type: u8, payload_status: u8, payload: &[u8]) -> Result<Self, RadioError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(RadioError::PayloadTooLarge);
        }
        let mut frame = MacFrame::new();
        frame.header = header;
        frame.payload_type = payload_type;
        frame.payload_status = payload_status;
        frame.data[..payload.len()].copy_from_slice(payload);
        frame.length = payload.len();
        Ok(frame)
    }

    /// Valid payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }
}

/// Pool-owned packet handle
///
/// The payload capacity is fixed by the size class of the slot the packet was
/// lent from; the payload length can change freely up to that capacity.
#[derive(Debug)]
pub struct Packet {
    pool_id: u16,
    slot: u8,
    capacity: u8,
    frame: MacFrame,
    timestamp: Option<Instant>,
}

impl Packet {
    /// Only the pool hands out packets
    pub(crate) fn lend(pool_id: u16, slot: u8, capacity: usize, length: usize) -> Self {
        let mut frame = MacFrame::new();
        frame.length = length;
        Packet {
            pool_id,
            slot,
            capacity: capacity as u8,
            frame,
            timestamp: None,
        }
    }

    /// Identity of the pool that lent this packet
    pub(crate) fn pool_id(&self) -> u16 {
        self.pool_id
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot as usize
    }

    /// Maximum payload length this packet can carry
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn len(&self) -> usize {
        self.frame.length
    }

    pub fn is_empty(&self) -> bool {
        self.frame.length == 0
    }

    pub fn data(&self) -> &[u8] {
        self.frame.payload()
    }

    /// Mutable view of the current payload (length set at request time or by `set_data`)
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.frame.data[..self.frame.length]
    }

    /// Replaces the payload with a copy of `data`
    ///
    /// # Errors
    /// `PayloadTooLarge` if `data` is longer than the packet capacity; the
    /// packet is left unchanged in that case.
    pub fn set_data(&mut self, data: &[u8]) -> Result<(), RadioError> {
        if data.len() > self.capacity() {
            return Err(RadioError::PayloadTooLarge);
        }
        self.frame.data[..data.len()].copy_from_slice(data);
        self.frame.length = data.len();
        Ok(())
    }

    pub fn header(&self) -> &MacHeader {
        &self.frame.header
    }

    pub fn destination(&self) -> u16 {
        self.frame.header.dest_addr
    }

    pub fn set_destination(&mut self, dest_addr: u16) {
        self.frame.header.dest_addr = dest_addr;
    }

    pub fn destination_pan(&self) -> u16 {
        self.frame.header.dest_pan
    }

    pub fn set_destination_pan(&mut self, dest_pan: u16) {
        self.frame.header.dest_pan = dest_pan;
    }

    /// Source `(pan_id, address)` pair
    pub fn source(&self) -> (u16, u16) {
        (self.frame.header.src_pan, self.frame.header.src_addr)
    }

    pub(crate) fn set_source(&mut self, src_pan: u16, src_addr: u16) {
        self.frame.header.src_pan = src_pan;
        self.frame.header.src_addr = src_addr;
    }

    pub fn sequence_number(&self) -> u8 {
        self.frame.header.seq_num
    }

    pub(crate) fn set_sequence_number(&mut self, seq_num: u8) {
        self.frame.header.seq_num = seq_num;
    }

    pub fn payload_type(&self) -> u8 {
        self.frame.payload_type
    }

    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.frame.payload_type = payload_type;
    }

    pub fn payload_status(&self) -> u8 {
        self.frame.payload_status
    }

    pub fn set_payload_status(&mut self, payload_status: u8) {
        self.frame.payload_status = payload_status;
    }

    /// Local time of reception, `None` for packets that were never received
    pub fn timestamp(&self) -> Option<Instant> {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: Instant) {
        self.timestamp = Some(timestamp);
    }

    /// Frame view used by transceivers to serialize the packet
    pub fn frame(&self) -> &MacFrame {
        &self.frame
    }

    /// Overwrites the packet content with a decoded frame
    ///
    /// Used by transceivers when reading the receive buffer.
    ///
    /// # Errors
    /// `PayloadTooLarge` if the frame does not fit in this packet.
    pub fn load_frame(&mut self, frame: &MacFrame) -> Result<(), RadioError> {
        if frame.length > self.capacity() {
            return Err(RadioError::PayloadTooLarge);
        }
        self.frame.header = frame.header;
        self.frame.payload_type = frame.payload_type;
        self.frame.payload_status = frame.payload_status;
        self.frame.data[..frame.length].copy_from_slice(&frame.data[..frame.length]);
        self.frame.length = frame.length;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_data_respects_capacity() {
        let mut packet = Packet::lend(0, 0, 12, 0);
        assert!(packet.is_empty());
        packet.set_data(&[7; 12]).unwrap();
        assert_eq!(packet.len(), 12);
        assert_eq!(packet.set_data(&[1; 13]), Err(RadioError::PayloadTooLarge));
        // Unchanged after the rejected write
        assert_eq!(packet.data(), &[7; 12]);
    }

    #[test]
    fn data_mut_covers_requested_length() {
        let mut packet = Packet::lend(0, 3, 86, 5);
        assert_eq!(packet.data_mut().len(), 5);
        packet.data_mut().copy_from_slice(b"hello");
        assert_eq!(packet.data(), b"hello");
    }

    #[test]
    fn load_frame_copies_header_and_payload() {
        let header = MacHeader {
            seq_num: 9,
            dest_pan: 0x1001,
            dest_addr: 0x1101,
            src_pan: 0x1001,
            src_addr: 0x2202,
        };
        let frame = MacFrame::with(header, 0x21, 0x01, &[1, 2, 3]).unwrap();
        let mut packet = Packet::lend(0, 0, 12, 0);
        packet.load_frame(&frame).unwrap();
        assert_eq!(packet.sequence_number(), 9);
        assert_eq!(packet.source(), (0x1001, 0x2202));
        assert_eq!(packet.destination(), 0x1101);
        assert_eq!(packet.payload_type(), 0x21);
        assert_eq!(packet.payload_status(), 0x01);
        assert_eq!(packet.data(), &[1, 2, 3]);
    }

    #[test]
    fn load_frame_rejects_oversized_frame() {
        let frame = MacFrame::with(MacHeader::default(), 0, 0, &[0; 20]).unwrap();
        let mut packet = Packet::lend(0, 0, 12, 0);
        assert_eq!(packet.load_frame(&frame), Err(RadioError::PayloadTooLarge));
    }

    #[test]
    fn frame_with_rejects_oversized_payload() {
        let payload = [0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(MacFrame::with(MacHeader::default(), 0, 0, &payload), Err(RadioError::PayloadTooLarge));
    }
}
