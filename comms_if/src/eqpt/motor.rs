//! # Motor Board Equipment Communications Module
//!
//! Defines the messages exchanged with the motor board firmware. Messages on
//! the data link are fixed-size little-endian binary frames, each starting
//! with a one byte total-length field and a one byte message-type ID. The
//! total frame size never exceeds [`MAX_FRAME_BYTES`].
//!
//! The board also publishes a JSON [`Advertisement`] on its beacon socket
//! while it is discoverable; advertisements never appear on the data link.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum size of any frame on the data link.
pub const MAX_FRAME_BYTES: usize = 256;

/// Throttle magnitudes below this value are treated as exactly stopped.
pub const THROTTLE_EPSILON: f32 = 1e-3;

/// Message type IDs. New messages are added at the end, IDs are never reused.
const PING_ID: u8 = 0x01;
const PONG_ID: u8 = 0x02;
const MOTOR_ID: u8 = 0x10;
const WATCHDOG_CONFIG_ID: u8 = 0x20;
const PWM_FREQUENCY_ID: u8 = 0x21;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Advertisement published by a motor board while it is discoverable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Advertisement {
    /// Human readable board name
    pub name: String,

    /// Received signal strength reported by the radio, in dBm. Used to rank
    /// candidates during scanning.
    pub rssi_dbm: i16,

    /// Maximum number of bytes the board will accept in a single write.
    /// Larger frames must be chunked by the sender.
    pub max_write_len: usize,

    /// Endpoint of the board's data socket
    pub data_endpoint: String,
}

/// Reassembles frames from a chunked byte stream.
///
/// Writes from the controller may be split into chunks no larger than the
/// advertised maximum write length, so a single receive may hold a partial
/// frame or several frames. Bytes are appended as they arrive and complete
/// frames are peeled off the front using the length header.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A message on the motor board data link.
///
/// The set of messages is closed: decoding switches exhaustively on the
/// header ID and unknown IDs are an explicit error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorMessage {
    /// Round-trip-time probe. The timestamp is supplied by the caller and
    /// echoed back unmodified in the matching [`MotorMessage::Pong`].
    Ping { timestamp_s: f64 },

    /// Echo response to a [`MotorMessage::Ping`].
    Pong { timestamp_s: f64 },

    /// Direct motor control. Throttles are in [-1, 1], sign giving direction
    /// and magnitude speed.
    Motor {
        left_throttle: f32,
        right_throttle: f32,
    },

    /// Watchdog configuration. Receiving this message also resets the
    /// watchdog timer.
    WatchdogConfig { enabled: bool, timeout_s: f64 },

    /// Sets the PWM carrier frequency used for the motor drive signals.
    PwmFrequency { frequency_hz: u16 },
}

/// Errors which can occur when decoding frames from the wire.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WireError {
    #[error("Frame is truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Frame header declares an invalid length of {0} bytes")]
    BadLength(u8),

    #[error("Unknown message ID 0x{0:02x}")]
    UnknownId(u8),

    #[error("Frame length {actual} does not match the expected length {expected} for this ID")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Throttle value {0} is outside [-1, 1]")]
    ThrottleOutOfRange(f32),

    #[error("Watchdog timeout {0} is not a positive finite number of seconds")]
    InvalidTimeout(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotorMessage {
    /// Total encoded size of this message, including the two byte header.
    pub fn encoded_len(&self) -> usize {
        match self {
            MotorMessage::Ping { .. } => 10,
            MotorMessage::Pong { .. } => 10,
            MotorMessage::Motor { .. } => 10,
            MotorMessage::WatchdogConfig { .. } => 11,
            MotorMessage::PwmFrequency { .. } => 4,
        }
    }

    /// Encode this message into a wire frame.
    ///
    /// Throttles are clamped into [-1, 1] on encode, so a frame produced here
    /// always decodes successfully.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MotorMessage::Ping { timestamp_s } => {
                let mut buf = [0u8; 10];
                buf[0] = 10;
                buf[1] = PING_ID;
                LittleEndian::write_f64(&mut buf[2..10], timestamp_s);
                buf.to_vec()
            }
            MotorMessage::Pong { timestamp_s } => {
                let mut buf = [0u8; 10];
                buf[0] = 10;
                buf[1] = PONG_ID;
                LittleEndian::write_f64(&mut buf[2..10], timestamp_s);
                buf.to_vec()
            }
            MotorMessage::Motor {
                left_throttle,
                right_throttle,
            } => {
                let mut buf = [0u8; 10];
                buf[0] = 10;
                buf[1] = MOTOR_ID;
                LittleEndian::write_f32(&mut buf[2..6], left_throttle.max(-1.0).min(1.0));
                LittleEndian::write_f32(&mut buf[6..10], right_throttle.max(-1.0).min(1.0));
                buf.to_vec()
            }
            MotorMessage::WatchdogConfig { enabled, timeout_s } => {
                let mut buf = [0u8; 11];
                buf[0] = 11;
                buf[1] = WATCHDOG_CONFIG_ID;
                buf[2] = enabled as u8;
                LittleEndian::write_f64(&mut buf[3..11], timeout_s);
                buf.to_vec()
            }
            MotorMessage::PwmFrequency { frequency_hz } => {
                let mut buf = [0u8; 4];
                buf[0] = 4;
                buf[1] = PWM_FREQUENCY_ID;
                LittleEndian::write_u16(&mut buf[2..4], frequency_hz);
                buf.to_vec()
            }
        }
    }

    /// Decode a single complete frame.
    ///
    /// The buffer must contain exactly one frame, header included.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 2 {
            return Err(WireError::Truncated {
                expected: 2,
                actual: buf.len(),
            });
        }

        let declared_len = buf[0] as usize;
        if declared_len != buf.len() {
            return Err(WireError::Truncated {
                expected: declared_len,
                actual: buf.len(),
            });
        }

        let id = buf[1];

        let msg = match id {
            PING_ID => {
                Self::check_len(buf, 10)?;
                MotorMessage::Ping {
                    timestamp_s: LittleEndian::read_f64(&buf[2..10]),
                }
            }
            PONG_ID => {
                Self::check_len(buf, 10)?;
                MotorMessage::Pong {
                    timestamp_s: LittleEndian::read_f64(&buf[2..10]),
                }
            }
            MOTOR_ID => {
                Self::check_len(buf, 10)?;
                let left_throttle = LittleEndian::read_f32(&buf[2..6]);
                let right_throttle = LittleEndian::read_f32(&buf[6..10]);

                for &throttle in &[left_throttle, right_throttle] {
                    if !throttle.is_finite() || throttle.abs() > 1.0 {
                        return Err(WireError::ThrottleOutOfRange(throttle));
                    }
                }

                MotorMessage::Motor {
                    left_throttle,
                    right_throttle,
                }
            }
            WATCHDOG_CONFIG_ID => {
                Self::check_len(buf, 11)?;
                let timeout_s = LittleEndian::read_f64(&buf[3..11]);

                if !timeout_s.is_finite() || timeout_s <= 0.0 {
                    return Err(WireError::InvalidTimeout(timeout_s));
                }

                MotorMessage::WatchdogConfig {
                    enabled: buf[2] != 0,
                    timeout_s,
                }
            }
            PWM_FREQUENCY_ID => {
                Self::check_len(buf, 4)?;
                MotorMessage::PwmFrequency {
                    frequency_hz: LittleEndian::read_u16(&buf[2..4]),
                }
            }
            unknown => return Err(WireError::UnknownId(unknown)),
        };

        Ok(msg)
    }

    fn check_len(buf: &[u8], expected: usize) -> Result<(), WireError> {
        if buf.len() != expected {
            Err(WireError::LengthMismatch {
                expected,
                actual: buf.len(),
            })
        } else {
            Ok(())
        }
    }
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes to the accumulator.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Attempt to peel the next complete frame off the front of the buffer.
    ///
    /// Returns `None` if no complete frame is buffered yet. A frame with an
    /// invalid length header poisons the stream, in which case the buffer is
    /// cleared and the error returned; there are no sync markers to recover
    /// with.
    pub fn next_frame(&mut self) -> Option<Result<MotorMessage, WireError>> {
        if self.buffer.is_empty() {
            return None;
        }

        let declared_len = self.buffer[0] as usize;

        // A frame can never be shorter than its header
        if declared_len < 2 {
            let bad = self.buffer[0];
            self.buffer.clear();
            return Some(Err(WireError::BadLength(bad)));
        }

        if self.buffer.len() < declared_len {
            return None;
        }

        let frame: Vec<u8> = self.buffer.drain(0..declared_len).collect();
        Some(MotorMessage::decode(&frame))
    }

    /// Number of bytes currently buffered.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip_all_ids() {
        let messages = [
            MotorMessage::Ping { timestamp_s: 12.5 },
            MotorMessage::Pong { timestamp_s: 12.5 },
            MotorMessage::Motor {
                left_throttle: -0.25,
                right_throttle: 1.0,
            },
            MotorMessage::WatchdogConfig {
                enabled: true,
                timeout_s: 1.0,
            },
            MotorMessage::PwmFrequency { frequency_hz: 20000 },
        ];

        for msg in &messages {
            let frame = msg.encode();
            assert_eq!(frame.len(), msg.encoded_len());
            assert_eq!(frame[0] as usize, frame.len());
            assert!(frame.len() <= MAX_FRAME_BYTES);
            assert_eq!(MotorMessage::decode(&frame), Ok(*msg));
        }
    }

    #[test]
    fn test_decode_errors() {
        // Truncated header
        assert_eq!(
            MotorMessage::decode(&[10]),
            Err(WireError::Truncated {
                expected: 2,
                actual: 1
            })
        );

        // Truncated body
        let mut frame = MotorMessage::Ping { timestamp_s: 0.0 }.encode();
        frame.truncate(6);
        assert!(matches!(
            MotorMessage::decode(&frame),
            Err(WireError::Truncated { .. })
        ));

        // Unknown ID
        assert_eq!(
            MotorMessage::decode(&[2, 0x7f]),
            Err(WireError::UnknownId(0x7f))
        );

        // Out of range throttle
        let mut frame = vec![10, 0x10];
        frame.extend_from_slice(&2.0f32.to_le_bytes());
        frame.extend_from_slice(&0.0f32.to_le_bytes());
        assert_eq!(
            MotorMessage::decode(&frame),
            Err(WireError::ThrottleOutOfRange(2.0))
        );

        // Non-positive watchdog timeout
        let mut frame = vec![11, 0x20, 1];
        frame.extend_from_slice(&0.0f64.to_le_bytes());
        assert_eq!(
            MotorMessage::decode(&frame),
            Err(WireError::InvalidTimeout(0.0))
        );
    }

    #[test]
    fn test_encode_clamps_throttle() {
        let frame = MotorMessage::Motor {
            left_throttle: 2.0,
            right_throttle: -3.0,
        }
        .encode();

        assert_eq!(
            MotorMessage::decode(&frame),
            Ok(MotorMessage::Motor {
                left_throttle: 1.0,
                right_throttle: -1.0
            })
        );
    }

    #[test]
    fn test_accumulator_reassembles_chunks() {
        let mut accum = FrameAccumulator::new();

        let first = MotorMessage::Motor {
            left_throttle: 0.5,
            right_throttle: 0.5,
        };
        let second = MotorMessage::PwmFrequency { frequency_hz: 8000 };

        let mut stream = first.encode();
        stream.extend(second.encode());

        // Feed the stream three bytes at a time
        for chunk in stream.chunks(3) {
            accum.extend(chunk);
        }

        assert_eq!(accum.next_frame(), Some(Ok(first)));
        assert_eq!(accum.next_frame(), Some(Ok(second)));
        assert_eq!(accum.next_frame(), None);
        assert_eq!(accum.pending_bytes(), 0);
    }

    #[test]
    fn test_accumulator_partial_frame_waits() {
        let mut accum = FrameAccumulator::new();
        let frame = MotorMessage::Ping { timestamp_s: 1.0 }.encode();

        accum.extend(&frame[0..4]);
        assert_eq!(accum.next_frame(), None);

        accum.extend(&frame[4..]);
        assert_eq!(
            accum.next_frame(),
            Some(Ok(MotorMessage::Ping { timestamp_s: 1.0 }))
        );
    }

    #[test]
    fn test_accumulator_bad_length_clears() {
        let mut accum = FrameAccumulator::new();
        accum.extend(&[1, 2, 3]);

        assert_eq!(accum.next_frame(), Some(Err(WireError::BadLength(1))));
        assert_eq!(accum.pending_bytes(), 0);
    }
}
