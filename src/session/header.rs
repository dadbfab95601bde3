//! Flash-cart boot headers
//!
//! Flash carts boot into a menu; to start the most recently loaded game the
//! console has to be fed a short fixed input sequence before the recording
//! begins. The header sits at the very start of a run's buffer, ahead of the
//! dummy frames, and is always exactly [`FlashCartHeader::frame_count`]
//! frames long so it can be removed again without touching the rest.
//!
//! Button bits follow the capture layout, most significant bit first
//! (`B Y Select Start Up Down Left Right`, then `A X L R` on SNES), and are
//! active-low on the wire.

use crate::error::{Result, TasLinkError};
use crate::session::encoder::{FrameBuffer, NEUTRAL_BYTE};
use crate::types::FlashCartHeader;

/// Neutral frames before Start on an EverDrive
const EVERDRIVE_LEAD: usize = 60;

/// Neutral frames before Start, and between Start and A, on an SD2SNES
const SD2SNES_LEAD: usize = 64;

/// First data byte with Start held
const START_PRESSED: u8 = !0x10;

/// Second data byte with A held (SNES)
const A_PRESSED: u8 = !0x80;

/// One block of identical frames in a header
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderBlock {
    data: Vec<u8>,
    count: usize,
}

impl FlashCartHeader {
    /// Number of frames this header adds
    pub fn frame_count(&self) -> usize {
        match self {
            FlashCartHeader::EverDrive => EVERDRIVE_LEAD + 1,
            FlashCartHeader::Sd2Snes => SD2SNES_LEAD + 1 + SD2SNES_LEAD + 1,
        }
    }

    fn blocks(&self, data_len: usize) -> Result<Vec<HeaderBlock>> {
        if data_len == 0 {
            return Err(TasLinkError::Configuration(format!(
                "{} header needs at least one data byte per frame",
                self
            )));
        }
        let neutral = vec![NEUTRAL_BYTE; data_len];
        let mut start = neutral.clone();
        start[0] = START_PRESSED;

        Ok(match self {
            FlashCartHeader::EverDrive => vec![
                HeaderBlock {
                    data: neutral,
                    count: EVERDRIVE_LEAD,
                },
                HeaderBlock {
                    data: start,
                    count: 1,
                },
            ],
            FlashCartHeader::Sd2Snes => {
                if data_len < 2 {
                    return Err(TasLinkError::Configuration(
                        "sd2snes header needs 16-bit controller data".to_string(),
                    ));
                }
                let mut a = neutral.clone();
                a[1] = A_PRESSED;
                vec![
                    HeaderBlock {
                        data: neutral.clone(),
                        count: SD2SNES_LEAD,
                    },
                    HeaderBlock {
                        data: start,
                        count: 1,
                    },
                    HeaderBlock {
                        data: neutral,
                        count: SD2SNES_LEAD,
                    },
                    HeaderBlock { data: a, count: 1 },
                ]
            }
        })
    }

    /// Insert this header at the start of `buffer`
    pub fn insert_into(&self, buffer: &mut FrameBuffer) -> Result<()> {
        let blocks = self.blocks(buffer.data_len())?;
        let mut at = 0;
        for block in blocks {
            buffer.insert_data(at, &block.data, block.count)?;
            at += block.count;
        }
        Ok(())
    }

    /// Remove this header from the start of `buffer`
    pub fn remove_from(&self, buffer: &mut FrameBuffer) -> usize {
        buffer.remove_frames(0, self.frame_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(data_len: usize, frames: usize) -> FrameBuffer {
        let mut buffer = FrameBuffer::new(b'A', data_len);
        for i in 0..frames {
            buffer.push_data(&vec![i as u8; data_len]).unwrap();
        }
        buffer
    }

    #[test]
    fn test_everdrive_layout() {
        let mut buf = buffer(1, 3);
        FlashCartHeader::EverDrive.insert_into(&mut buf).unwrap();

        assert_eq!(buf.len(), 61 + 3);
        assert!(buf.frames().take(60).all(|f| f == [b'A', 0xFF]));
        assert_eq!(buf.frame(60).unwrap(), &[b'A', 0xEF]);
        assert_eq!(buf.frame(61).unwrap(), &[b'A', 0x00]);
    }

    #[test]
    fn test_sd2snes_layout() {
        let mut buf = buffer(2, 1);
        FlashCartHeader::Sd2Snes.insert_into(&mut buf).unwrap();

        assert_eq!(FlashCartHeader::Sd2Snes.frame_count(), 130);
        assert_eq!(buf.len(), 131);
        assert_eq!(buf.frame(64).unwrap(), &[b'A', 0xEF, 0xFF]);
        assert_eq!(buf.frame(65).unwrap(), &[b'A', 0xFF, 0xFF]);
        assert_eq!(buf.frame(129).unwrap(), &[b'A', 0xFF, 0x7F]);
        assert_eq!(buf.frame(130).unwrap(), &[b'A', 0x00, 0x00]);
    }

    #[test]
    fn test_sd2snes_needs_two_bytes() {
        let mut buf = buffer(1, 1);
        assert!(FlashCartHeader::Sd2Snes.insert_into(&mut buf).is_err());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_remove_restores_buffer() {
        let original = buffer(2, 5);
        let mut buf = original.clone();
        FlashCartHeader::Sd2Snes.insert_into(&mut buf).unwrap();
        assert_eq!(FlashCartHeader::Sd2Snes.remove_from(&mut buf), 130);
        assert_eq!(buf, original);
    }
}
