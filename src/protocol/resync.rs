use crate::protocol::frame::{
    decode_response_with, Frame, HEADER, MAX_RESPONSE_LENGTH, MIN_RESPONSE_LENGTH,
    RESPONSE_LENGTHS,
};
use crate::protocol::types::TemperatureEncoding;

pub const BUFFER_CAPACITY: usize = 1024;

/// Accumulates raw serial bytes and carves valid frames out of them.
///
/// The only state kept between passes is the residual buffer, so a pass can be rerun at any
/// time, for example after the link stalls in the middle of a frame.
#[derive(Debug)]
pub struct Resynchronizer {
    buffer: Vec<u8>,
    encoding: TemperatureEncoding,
}

impl Default for Resynchronizer {
    fn default() -> Self {
        Self::with_encoding(TemperatureEncoding::SELECTED)
    }
}

impl Resynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(encoding: TemperatureEncoding) -> Self {
        Resynchronizer {
            buffer: Vec::with_capacity(BUFFER_CAPACITY),
            encoding,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > BUFFER_CAPACITY {
            let excess = self.buffer.len() - BUFFER_CAPACITY;
            warn!("receive buffer full, discarding {} oldest bytes", excess);
            self.buffer.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn residual(&self) -> &[u8] {
        &self.buffer
    }

    /// Starts a scan pass. Consumed bytes are dropped from the buffer when the iterator is.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            buffer: &mut self.buffer,
            encoding: self.encoding,
            offset: 0,
        }
    }
}

pub struct Frames<'a> {
    buffer: &'a mut Vec<u8>,
    encoding: TemperatureEncoding,
    offset: usize,
}

impl<'a> Frames<'a> {
    fn candidate(&self, window: &[u8]) -> Option<(usize, Frame)> {
        RESPONSE_LENGTHS
            .iter()
            .filter(|length| **length <= window.len())
            .find_map(|length| {
                decode_response_with(&window[..*length], self.encoding)
                    .ok()
                    .map(|frame| (*length, frame))
            })
    }

    fn awaiting_rest(&self, window: &[u8]) -> bool {
        window.len() < MAX_RESPONSE_LENGTH
            && window[..2] == HEADER[..2]
            && !(1..=window.len() - MIN_RESPONSE_LENGTH)
                .any(|skip| self.candidate(&window[skip..]).is_some())
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        while self.buffer.len() - self.offset >= MIN_RESPONSE_LENGTH {
            let window = &self.buffer[self.offset..];
            if let Some((length, frame)) = self.candidate(window) {
                trace!("frame of {} bytes at offset {}", length, self.offset);
                self.offset += length;
                return Some(frame);
            }
            if self.awaiting_rest(window) {
                trace!(
                    "possible partial frame at offset {}, waiting for more bytes",
                    self.offset
                );
                return None;
            }
            trace!("skipping noise byte 0x{:02X}", window[0]);
            self.offset += 1;
        }
        None
    }
}

impl<'a> Drop for Frames<'a> {
    fn drop(&mut self) {
        self.buffer.drain(..self.offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{encode_command_with, Command, StateDelta};
    use crate::protocol::types::{FanSpeed, HvacMode};

    const STATUS_HEAT_22: [u8; 34] = [
        0x7A, 0x7A, 0x21, 0xD5, 0x22, 0x00, 0x00, 0xA5, 0x0C, 0x16, 0x00, 0x80, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x17, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x2A, 0x03,
    ];

    const ACK: [u8; 13] = [
        0x7A, 0x7A, 0x21, 0xD5, 0x0D, 0x00, 0x00, 0xA0, 0x00, 0x00, 0x00, 0x04, 0x08,
    ];

    const PREFIX: [u8; 5] = [0x00, 0x7A, 0x13, 0xFF, 0x7A];
    const SUFFIX: [u8; 4] = [0x7A, 0x7A, 0x01, 0x02];

    fn celsius() -> Resynchronizer {
        Resynchronizer::with_encoding(TemperatureEncoding::Celsius)
    }

    fn command_echo() -> [u8; 24] {
        let command = Command {
            mode: HvacMode::Cool,
            power_on: true,
            target_temp_c: 24,
            fan_speed: FanSpeed::Auto,
            eco_mode: false,
            night_mode: false,
            display_on: true,
            swing_on: false,
            purifier_on: false,
            mute_on: false,
        };
        encode_command_with(&command, TemperatureEncoding::Celsius).unwrap()
    }

    fn status_delta(frame: &Frame) -> StateDelta {
        match frame {
            Frame::Status(delta) => delta.clone(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn status_between_garbage() {
        let mut resync = celsius();
        resync.push(&PREFIX);
        resync.push(&STATUS_HEAT_22);
        resync.push(&SUFFIX);

        let frames = resync.frames().collect::<Vec<_>>();
        assert_eq!(frames.len(), 1);
        assert_eq!(status_delta(&frames[0]).mode, Some(HvacMode::Heat));
        assert_eq!(resync.residual(), &SUFFIX);
    }

    #[test]
    fn command_echo_behind_stray_magic_byte() {
        let mut resync = celsius();
        resync.push(&PREFIX);
        resync.push(&command_echo());
        resync.push(&SUFFIX);

        let frames = resync.frames().collect::<Vec<_>>();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::CommandEcho(_)));
        assert_eq!(resync.residual(), &SUFFIX);
    }

    #[test]
    fn skips_corrupted_block() {
        let mut corrupted = STATUS_HEAT_22;
        corrupted[33] ^= 0xFF;
        let mut resync = celsius();
        resync.push(&corrupted);
        resync.push(&ACK);

        let frames = resync.frames().collect::<Vec<_>>();
        assert_eq!(frames, vec![Frame::Ack]);
        assert!(resync.is_empty());
    }

    #[test]
    fn frame_split_across_reads() {
        let mut resync = celsius();
        resync.push(&STATUS_HEAT_22[..20]);
        assert_eq!(resync.frames().count(), 0);
        assert_eq!(resync.len(), 20);

        resync.push(&STATUS_HEAT_22[20..]);
        let frames = resync.frames().collect::<Vec<_>>();
        assert_eq!(frames.len(), 1);
        assert_eq!(status_delta(&frames[0]).ambient_temp_c, Some(23.5));
        assert!(resync.is_empty());
    }

    #[test]
    fn back_to_back_frames() {
        let mut resync = celsius();
        resync.push(&ACK);
        resync.push(&command_echo());
        resync.push(&[0x55]);
        resync.push(&STATUS_HEAT_22);

        let frames = resync.frames().collect::<Vec<_>>();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Frame::Ack);
        assert!(matches!(frames[1], Frame::CommandEcho(_)));
        assert!(matches!(frames[2], Frame::Status(_)));
    }

    #[test]
    fn partial_pass_keeps_unread_frames() {
        let mut resync = celsius();
        resync.push(&ACK);
        resync.push(&ACK);
        assert_eq!(resync.frames().next(), Some(Frame::Ack));
        assert_eq!(resync.len(), ACK.len());
        assert_eq!(resync.frames().next(), Some(Frame::Ack));
        assert!(resync.is_empty());
    }

    #[test]
    fn noise_is_discarded() {
        let mut resync = celsius();
        resync.push(&[0x11; 40]);
        assert_eq!(resync.frames().count(), 0);
        assert!(resync.len() < MIN_RESPONSE_LENGTH);
    }

    #[test]
    fn buffer_is_capped() {
        let mut resync = celsius();
        resync.push(&[0x11; BUFFER_CAPACITY]);
        resync.push(&ACK);
        assert_eq!(resync.len(), BUFFER_CAPACITY);
        assert_eq!(&resync.residual()[BUFFER_CAPACITY - ACK.len()..], &ACK);
        assert_eq!(resync.frames().collect::<Vec<_>>(), vec![Frame::Ack]);
    }
}
