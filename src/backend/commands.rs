//! Adapter wire protocol
//!
//! Every adapter command is a short ASCII prefix followed by binary
//! parameter bytes. [`DeviceCommand`] models them and encodes the exact
//! bytes; [`DeviceLink`] sends commands and frame batches over a
//! [`SerialLink`] while keeping traffic counters.
//!
//! | Command | Bytes |
//! |---------|-------|
//! | enable port | `sp` port-digit, type code (bit 0x80 = DPCM fix) |
//! | enable lane | `sc` lane-digit, 0x80 plugged / 0x40 overread / size code |
//! | bind stream | `s` letter, lane mask |
//! | event window | `se` port-digit, 0x80 / quarter-ms, lane mask |
//! | clear lanes | `r` lane mask |
//! | clear all | `R` |
//! | console reset | `sd1` assert / `sd0` release |
//!
//! Lane `k` (1..=8) is bit `1 << (k - 1)` of a lane mask.
//!
//! The adapter reports latches asynchronously as single bytes `f`, `g`, `h`
//! and `i` for ports 1 to 4; [`LatchCounts`] tallies them.

use crate::backend::link_trait::{LinkStats, SerialLink};
use crate::error::Result;
use crate::session::RunConfig;
use crate::types::{
    ControllerType, ControllerWidth, DeviceState, EventWindow, StreamMask, NUM_PORTS,
};
use std::time::Duration;

/// Latch signal byte for each port, ports 1..=4
pub const LATCH_BYTES: [u8; NUM_PORTS] = *b"fghi";

/// Lane mask covering every lane `controller_type` occupies on `ports`
pub fn lane_mask(ports: &[u8], controller_type: ControllerType) -> u8 {
    ports
        .iter()
        .flat_map(|&port| controller_type.lanes_for_port(port).iter())
        .fold(0u8, |mask, &lane| mask | (1 << (lane - 1)))
}

/// A single adapter command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Enable a console port for a controller type
    EnablePort {
        port: u8,
        controller_type: ControllerType,
        dpcm_fix: bool,
    },
    /// Enable a data lane
    EnableLane {
        lane: u8,
        overread: bool,
        width: ControllerWidth,
    },
    /// Bind a stream letter to a set of lanes
    BindStream { mask: StreamMask, lanes: u8 },
    /// Enable the latch event on a port with a debounce window
    EventWindow {
        port: u8,
        window: EventWindow,
        lanes: u8,
    },
    /// Disable the latch event on a port
    DisableEvents { port: u8 },
    /// Clear and arm a set of lanes
    ClearLanes { lanes: u8 },
    /// Clear and arm everything
    ClearAll,
    /// Drive the console reset line
    ConsoleReset { asserted: bool },
}

impl DeviceCommand {
    /// Encode the command as wire bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            DeviceCommand::EnablePort {
                port,
                controller_type,
                dpcm_fix,
            } => {
                let mut flags = controller_type.code();
                if dpcm_fix {
                    flags |= 0x80;
                }
                vec![b's', b'p', digit(port), flags]
            }
            DeviceCommand::EnableLane {
                lane,
                overread,
                width,
            } => {
                let mut flags = 0x80 | width.size_code();
                if overread {
                    flags |= 0x40;
                }
                vec![b's', b'c', digit(lane), flags]
            }
            DeviceCommand::BindStream { mask, lanes } => vec![b's', mask.letter(), lanes],
            DeviceCommand::EventWindow {
                port,
                window,
                lanes,
            } => vec![b's', b'e', digit(port), 0x80 | window.quarters(), lanes],
            DeviceCommand::DisableEvents { port } => vec![b's', b'e', digit(port), 0, 0],
            DeviceCommand::ClearLanes { lanes } => vec![b'r', lanes],
            DeviceCommand::ClearAll => vec![b'R'],
            DeviceCommand::ConsoleReset { asserted } => {
                vec![b's', b'd', if asserted { b'1' } else { b'0' }]
            }
        }
    }
}

fn digit(n: u8) -> u8 {
    b'0' + n
}

/// Commands that prepare the adapter for a new run
///
/// Ports, then lanes, then the stream binding, the latch event on the
/// lowest port, and finally a lane clear.
pub fn setup_commands(config: &RunConfig, mask: StreamMask) -> Vec<DeviceCommand> {
    let lanes = config.lane_mask();
    let mut commands = Vec::new();
    for &port in &config.ports {
        commands.push(DeviceCommand::EnablePort {
            port,
            controller_type: config.controller_type,
            dpcm_fix: config.dpcm_fix,
        });
        for &lane in config.controller_type.lanes_for_port(port) {
            commands.push(DeviceCommand::EnableLane {
                lane,
                overread: config.overread,
                width: config.width,
            });
        }
    }
    commands.push(DeviceCommand::BindStream { mask, lanes });
    commands.push(DeviceCommand::EventWindow {
        port: config.event_port(),
        window: config.window,
        lanes,
    });
    commands.push(DeviceCommand::ClearLanes { lanes });
    commands
}

/// Commands that move the adapter from `from` to `to` for a run
///
/// Only settings that differ are re-sent: one `sp` per port for a DPCM fix
/// change, one `se` on the run's event port for a window change.
pub fn transition_commands(
    config: &RunConfig,
    from: DeviceState,
    to: DeviceState,
) -> Vec<DeviceCommand> {
    let mut commands = Vec::new();
    if from.dpcm_fix != to.dpcm_fix {
        for &port in &config.ports {
            commands.push(DeviceCommand::EnablePort {
                port,
                controller_type: config.controller_type,
                dpcm_fix: to.dpcm_fix,
            });
        }
    }
    if from.window != to.window {
        commands.push(DeviceCommand::EventWindow {
            port: config.event_port(),
            window: to.window,
            lanes: config.lane_mask(),
        });
    }
    commands
}

/// Latch signals tallied per port from one read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatchCounts {
    counts: [usize; NUM_PORTS],
}

impl LatchCounts {
    /// Count latch bytes in `bytes`; other bytes are ignored
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut counts = [0usize; NUM_PORTS];
        for b in bytes {
            if let Some(index) = LATCH_BYTES.iter().position(|l| l == b) {
                counts[index] += 1;
            }
        }
        Self { counts }
    }

    /// Latches seen on `port` (1..=4); zero for any other port
    pub fn for_port(&self, port: u8) -> usize {
        match port {
            1..=4 => self.counts[port as usize - 1],
            _ => 0,
        }
    }

    /// Total latches across all ports
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Ports whose count exceeds `high_water`, with their counts
    pub fn bursts(&self, high_water: usize) -> impl Iterator<Item = (u8, usize)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(move |(_, &count)| count > high_water)
            .map(|(index, &count)| (index as u8 + 1, count))
    }
}

/// Command-level wrapper around the adapter link
pub struct DeviceLink {
    link: Box<dyn SerialLink>,
    stats: LinkStats,
}

impl DeviceLink {
    /// Wrap a serial link
    pub fn new(link: Box<dyn SerialLink>) -> Self {
        Self {
            link,
            stats: LinkStats::default(),
        }
    }

    /// Send one command
    pub fn send(&mut self, command: &DeviceCommand) -> Result<()> {
        let bytes = command.encode();
        tracing::trace!("-> {:?} {:02X?}", command, bytes);
        self.link.write_all(&bytes)?;
        self.stats.record_write(bytes.len());
        Ok(())
    }

    /// Send several commands in order
    pub fn send_all(&mut self, commands: &[DeviceCommand]) -> Result<()> {
        commands.iter().try_for_each(|c| self.send(c))
    }

    /// Send a batch of `frames` data frames as a single write
    pub fn send_frames(&mut self, bytes: &[u8], frames: usize) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.link.write_all(bytes)?;
        self.stats.record_write(bytes.len());
        self.stats.frames_sent += frames as u64;
        Ok(())
    }

    /// Assert the console reset line, hold it, then release it
    ///
    /// The caller holds the registry lock for the whole pulse, so the reset
    /// lands before the frames of the same cycle. Dispatch for every run and
    /// the command thread wait that long; settings cap the hold at
    /// [`MAX_RESET_HOLD_MS`](crate::config::MAX_RESET_HOLD_MS).
    pub fn pulse_reset(&mut self, hold: Duration) -> Result<()> {
        self.send(&DeviceCommand::ConsoleReset { asserted: true })?;
        if !hold.is_zero() {
            std::thread::sleep(hold);
        }
        self.send(&DeviceCommand::ConsoleReset { asserted: false })
    }

    /// Disable the latch event on every port
    pub fn disable_all_events(&mut self) -> Result<()> {
        for port in 1..=NUM_PORTS as u8 {
            self.send(&DeviceCommand::DisableEvents { port })?;
        }
        Ok(())
    }

    /// Name of the underlying link
    pub fn name(&self) -> String {
        self.link.name()
    }

    /// Traffic counters
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Mutable traffic counters (the engine records reads here)
    pub fn stats_mut(&mut self) -> &mut LinkStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::link_trait::MockSerialLink;
    use crate::error::TasLinkError;
    use crate::types::FlashCartHeader;
    use std::path::PathBuf;

    fn config(ports: Vec<u8>, controller_type: ControllerType) -> RunConfig {
        RunConfig {
            ports,
            controller_type,
            width: ControllerWidth::Bits16,
            overread: false,
            window: EventWindow::from_millis(1.25).unwrap(),
            input_file: PathBuf::from("run.r16m"),
            dpcm_fix: true,
            dummy_frames: 0,
            blank_frames: Vec::new(),
            header: None::<FlashCartHeader>,
            transitions: Vec::new(),
        }
    }

    #[test]
    fn test_enable_port_encoding() {
        let cmd = DeviceCommand::EnablePort {
            port: 1,
            controller_type: ControllerType::Multitap,
            dpcm_fix: true,
        };
        assert_eq!(cmd.encode(), vec![b's', b'p', b'1', 0x82]);
    }

    #[test]
    fn test_enable_lane_encoding() {
        let cmd = DeviceCommand::EnableLane {
            lane: 5,
            overread: true,
            width: ControllerWidth::Bits16,
        };
        assert_eq!(cmd.encode(), vec![b's', b'c', b'5', 0xC1]);

        let cmd = DeviceCommand::EnableLane {
            lane: 1,
            overread: false,
            width: ControllerWidth::Bits8,
        };
        assert_eq!(cmd.encode(), vec![b's', b'c', b'1', 0x80]);
    }

    #[test]
    fn test_event_window_encoding() {
        let cmd = DeviceCommand::EventWindow {
            port: 1,
            window: EventWindow::from_millis(1.25).unwrap(),
            lanes: 0x05,
        };
        assert_eq!(cmd.encode(), vec![b's', b'e', b'1', 0x85, 0x05]);
        assert_eq!(
            DeviceCommand::DisableEvents { port: 3 }.encode(),
            vec![b's', b'e', b'3', 0, 0]
        );
    }

    #[test]
    fn test_misc_encodings() {
        let mask = StreamMask::try_from('B').unwrap();
        assert_eq!(
            DeviceCommand::BindStream { mask, lanes: 0x33 }.encode(),
            vec![b's', b'B', 0x33]
        );
        assert_eq!(DeviceCommand::ClearLanes { lanes: 0x01 }.encode(), vec![b'r', 0x01]);
        assert_eq!(DeviceCommand::ClearAll.encode(), b"R".to_vec());
        assert_eq!(DeviceCommand::ConsoleReset { asserted: true }.encode(), b"sd1".to_vec());
        assert_eq!(DeviceCommand::ConsoleReset { asserted: false }.encode(), b"sd0".to_vec());
    }

    #[test]
    fn test_lane_mask() {
        assert_eq!(lane_mask(&[1], ControllerType::Normal), 0b0000_0001);
        assert_eq!(lane_mask(&[1, 2], ControllerType::Normal), 0b0000_0101);
        assert_eq!(lane_mask(&[1], ControllerType::Multitap), 0b0011_0011);
        assert_eq!(lane_mask(&[4], ControllerType::YCable), 0b1100_0000);
    }

    #[test]
    fn test_setup_commands_order() {
        let cfg = config(vec![2, 1], ControllerType::Normal);
        let mask = StreamMask::from_index(0).unwrap();
        let cmds = setup_commands(&cfg, mask);

        assert_eq!(cmds.len(), 2 + 2 + 3);
        assert!(matches!(cmds[0], DeviceCommand::EnablePort { port: 2, dpcm_fix: true, .. }));
        assert!(matches!(cmds[1], DeviceCommand::EnableLane { lane: 3, .. }));
        assert_eq!(cmds[4], DeviceCommand::BindStream { mask, lanes: 0x05 });
        // The latch event listens on the lowest claimed port.
        assert!(matches!(cmds[5], DeviceCommand::EventWindow { port: 1, lanes: 0x05, .. }));
        assert_eq!(cmds[6], DeviceCommand::ClearLanes { lanes: 0x05 });
    }

    #[test]
    fn test_transition_commands_only_send_differences() {
        let cfg = config(vec![1, 2], ControllerType::Normal);
        let from = DeviceState {
            dpcm_fix: true,
            window: EventWindow::NONE,
        };

        assert!(transition_commands(&cfg, from, from).is_empty());

        let to = DeviceState {
            dpcm_fix: false,
            ..from
        };
        let cmds = transition_commands(&cfg, from, to);
        assert_eq!(cmds.len(), 2);
        assert!(cmds
            .iter()
            .all(|c| matches!(c, DeviceCommand::EnablePort { dpcm_fix: false, .. })));

        let to = DeviceState {
            window: EventWindow::from_millis(2.0).unwrap(),
            ..from
        };
        let cmds = transition_commands(&cfg, from, to);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].encode(), vec![b's', b'e', b'1', 0x88, 0x05]);
    }

    #[test]
    fn test_latch_counts() {
        let counts = LatchCounts::from_bytes(b"fffgxi\n");
        assert_eq!(counts.for_port(1), 3);
        assert_eq!(counts.for_port(2), 1);
        assert_eq!(counts.for_port(3), 0);
        assert_eq!(counts.for_port(4), 1);
        assert_eq!(counts.for_port(0), 0);
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.bursts(2).collect::<Vec<_>>(), vec![(1, 3)]);
    }

    #[test]
    fn test_device_link_counts_traffic() {
        let mut mock = MockSerialLink::new();
        mock.expect_write_all().times(2).returning(|_| Ok(()));

        let mut link = DeviceLink::new(Box::new(mock));
        link.send(&DeviceCommand::ClearAll).unwrap();
        link.send_frames(b"A\xFFA\xFF", 2).unwrap();
        link.send_frames(&[], 0).unwrap();

        assert_eq!(link.stats().writes, 2);
        assert_eq!(link.stats().bytes_written, 5);
        assert_eq!(link.stats().frames_sent, 2);
    }

    #[test]
    fn test_device_link_propagates_write_failure() {
        let mut mock = MockSerialLink::new();
        mock.expect_write_all()
            .returning(|_| Err(TasLinkError::LinkFailure("unplugged".to_string())));

        let mut link = DeviceLink::new(Box::new(mock));
        let err = link.send(&DeviceCommand::ClearAll).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(link.stats().writes, 0);
    }
}
