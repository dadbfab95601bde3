//! Port, lane and stream-letter bookkeeping
//!
//! The [`PortLaneAllocator`] records which console ports, adapter lanes and
//! stream letters are claimed by active runs. It performs no I/O; callers
//! check [`PortLaneAllocator::is_available`] for every requested port before
//! sending any device command, then [`PortLaneAllocator::claim`] them.
//!
//! The allocator lives inside the session registry and is only touched under
//! the registry lock.

use crate::types::{is_valid_port, ControllerType, StreamMask, NUM_LANES, NUM_PORTS};

/// Claimed/free state of ports, lanes and stream letters
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortLaneAllocator {
    /// Claimed flag per port (index 0 unused)
    ports: [bool; NUM_PORTS + 1],
    /// Claimed flag per lane (index 0 unused)
    lanes: [bool; NUM_LANES + 1],
    /// In-use flag per stream letter
    masks: [bool; StreamMask::LETTERS.len()],
}

impl PortLaneAllocator {
    /// Create an allocator with everything free
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `port` and the lanes `controller_type` needs there are free
    ///
    /// Fails closed: an invalid port, a disallowed port/type combination or
    /// any claimed resource yields `false`.
    pub fn is_available(&self, port: u8, controller_type: ControllerType) -> bool {
        if !is_valid_port(port) || !controller_type.allowed_on_port(port) {
            return false;
        }
        if self.ports[port as usize] {
            return false;
        }
        controller_type
            .lanes_for_port(port)
            .iter()
            .all(|&lane| !self.lanes[lane as usize])
    }

    /// Mark `port` and its implied lanes as claimed
    ///
    /// Does nothing if the port is already claimed or the combination is invalid.
    pub fn claim(&mut self, port: u8, controller_type: ControllerType) {
        if !is_valid_port(port)
            || !controller_type.allowed_on_port(port)
            || self.ports[port as usize]
        {
            return;
        }
        self.ports[port as usize] = true;
        for &lane in controller_type.lanes_for_port(port) {
            self.lanes[lane as usize] = true;
        }
        tracing::debug!("Claimed port {} ({})", port, controller_type);
    }

    /// Release a port previously claimed with the same type
    pub fn release(&mut self, port: u8, controller_type: ControllerType) {
        if !is_valid_port(port) || !self.ports[port as usize] {
            return;
        }
        self.ports[port as usize] = false;
        for &lane in controller_type.lanes_for_port(port) {
            self.lanes[lane as usize] = false;
        }
        tracing::debug!("Released port {} ({})", port, controller_type);
    }

    /// Take the lowest unused stream letter, or `None` when all four are in use
    pub fn next_free_mask(&mut self) -> Option<StreamMask> {
        let index = self.masks.iter().position(|in_use| !in_use)?;
        self.masks[index] = true;
        StreamMask::from_index(index)
    }

    /// Return a stream letter to the pool
    pub fn free_mask(&mut self, mask: StreamMask) {
        self.masks[mask.index()] = false;
    }

    /// Whether a port is currently claimed
    pub fn is_port_claimed(&self, port: u8) -> bool {
        is_valid_port(port) && self.ports[port as usize]
    }

    /// Whether a lane is currently claimed
    pub fn is_lane_claimed(&self, lane: u8) -> bool {
        (1..=NUM_LANES as u8).contains(&lane) && self.lanes[lane as usize]
    }

    /// Number of stream letters currently in use
    pub fn masks_in_use(&self) -> usize {
        self.masks.iter().filter(|in_use| **in_use).count()
    }
}
