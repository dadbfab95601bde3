//! Test data builders for creating test objects

use std::io::Write;
use std::path::{Path, PathBuf};
use taslink_rs::{ControllerType, ControllerWidth, EventWindow, FlashCartHeader, RunConfig, Transition};

/// Builder for creating test RunConfigs
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn new(input_file: impl Into<PathBuf>) -> Self {
        Self {
            config: RunConfig {
                ports: vec![1],
                controller_type: ControllerType::Normal,
                width: ControllerWidth::Bits8,
                overread: false,
                window: EventWindow::NONE,
                input_file: input_file.into(),
                dpcm_fix: false,
                dummy_frames: 0,
                blank_frames: Vec::new(),
                header: None,
                transitions: Vec::new(),
            },
        }
    }

    pub fn ports(mut self, ports: &[u8]) -> Self {
        self.config.ports = ports.to_vec();
        self
    }

    pub fn controller_type(mut self, controller_type: ControllerType) -> Self {
        self.config.controller_type = controller_type;
        self
    }

    pub fn width(mut self, width: ControllerWidth) -> Self {
        self.config.width = width;
        self
    }

    pub fn dummy_frames(mut self, count: usize) -> Self {
        self.config.dummy_frames = count;
        self
    }

    pub fn header(mut self, header: FlashCartHeader) -> Self {
        self.config.header = Some(header);
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.config.insert_transition(transition);
        self
    }

    pub fn build(self) -> RunConfig {
        self.config
    }
}

/// Write a capture file of `frames` records of `record_len` bytes into `dir`
///
/// Record `i` is filled with the byte `i`.
pub fn write_capture(dir: &Path, name: &str, record_len: usize, frames: usize) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for i in 0..frames {
        file.write_all(&vec![i as u8; record_len]).unwrap();
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_builder() {
        let config = RunConfigBuilder::new("run.r16m")
            .ports(&[1, 2])
            .width(ControllerWidth::Bits16)
            .dummy_frames(3)
            .build();

        assert_eq!(config.ports, vec![1, 2]);
        assert_eq!(config.width, ControllerWidth::Bits16);
        assert_eq!(config.dummy_frames, 3);
        assert!(config.validate().is_ok());
    }
}
