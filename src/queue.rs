//! FIFO buffer for compressed audio packets.
//!
//! Audio passes through without re-encoding, but nothing can be muxed before
//! the container header exists, and the header cannot be written until the
//! video encoder binds to its first decoded frame. Audio packets read in the
//! meantime are parked here and drained the moment the header is out.

use std::collections::VecDeque;

use ffmpeg_the_third as ffmpeg;

use crate::error::{Error, Result};

/// FIFO queue of owned compressed packets.
#[derive(Default)]
pub(crate) struct PacketQueue {
    packets: VecDeque<ffmpeg::Packet>,
}

impl PacketQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Clone the packet into the queue. The clone owns independent payload
    /// storage, so the caller is free to reuse or drop its packet.
    pub(crate) fn push(&mut self, packet: &ffmpeg::Packet) {
        self.packets.push_back(packet.clone());
    }

    /// Pop the oldest packet, transferring ownership to the caller.
    pub(crate) fn pop(&mut self) -> Result<ffmpeg::Packet> {
        self.packets.pop_front().ok_or(Error::EmptyQueue)
    }

    pub(crate) fn len(&self) -> usize {
        self.packets.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_pts(pts: i64) -> ffmpeg::Packet {
        let mut packet = ffmpeg::Packet::copy(&[0u8; 8]);
        packet.set_pts(Some(pts));
        packet
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = PacketQueue::new();
        for pts in 0..4 {
            queue.push(&packet_with_pts(pts));
        }
        assert_eq!(queue.len(), 4);

        for pts in 0..4 {
            let popped = queue.pop().unwrap();
            assert_eq!(popped.pts(), Some(pts));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_empty_queue() {
        let mut queue = PacketQueue::new();
        assert!(matches!(queue.pop(), Err(Error::EmptyQueue)));
    }

    #[test]
    fn test_push_clones_payload() {
        let mut queue = PacketQueue::new();
        let original = ffmpeg::Packet::copy(&[1, 2, 3, 4]);
        queue.push(&original);
        drop(original);

        let popped = queue.pop().unwrap();
        assert_eq!(popped.data(), Some(&[1u8, 2, 3, 4][..]));
    }
}
