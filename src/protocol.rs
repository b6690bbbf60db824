use std::fmt;

use thiserror::Error;

/// Marker byte of a DATA-PUSH frame
pub const PUSH_MARKER: u8 = b'S';

/// Marker byte of a DATA-PULL frame
pub const PULL_MARKER: u8 = b'G';

/// Length of a type identifier in bytes
pub const DATA_TYPE_LEN: usize = 3;

/// PULL frame size: marker + type id
pub const PULL_FRAME_SIZE: usize = 1 + DATA_TYPE_LEN;

/// PUSH header size: marker + type id + 2 byte length
pub const PUSH_HEADER_SIZE: usize = PULL_FRAME_SIZE + 2;

/// Largest payload a PUSH frame can declare
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("invalid data type id: {0:?}")]
    InvalidDataType(String),
}

/// 3-byte identifier naming a data block, e.g. `POS`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType([u8; DATA_TYPE_LEN]);

impl DataType {
    pub const fn new(bytes: [u8; DATA_TYPE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DATA_TYPE_LEN] {
        &self.0
    }
}

impl TryFrom<&str> for DataType {
    type Error = FrameError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let src = s.as_bytes();
        if src.len() != DATA_TYPE_LEN || !s.is_ascii() {
            return Err(FrameError::InvalidDataType(s.to_string()));
        }
        let mut bytes = [0u8; DATA_TYPE_LEN];
        bytes.copy_from_slice(src);
        Ok(Self(bytes))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataType({})", self)
    }
}

/// Peer transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Deliver `payload` under `data_type`
    Push { data_type: DataType, payload: Vec<u8> },
    /// Ask the peer to push its value for `data_type`
    Pull { data_type: DataType },
}

impl Frame {
    pub fn data_type(&self) -> DataType {
        match self {
            Frame::Push { data_type, .. } | Frame::Pull { data_type } => *data_type,
        }
    }

    /// Size of the encoded frame
    #[inline]
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Push { payload, .. } => PUSH_HEADER_SIZE + payload.len(),
            Frame::Pull { .. } => PULL_FRAME_SIZE,
        }
    }

    /// Encode the frame into its wire form.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        match self {
            Frame::Push { data_type, payload } => {
                if payload.len() > MAX_PAYLOAD_LEN {
                    return Err(FrameError::PayloadTooLarge(payload.len()));
                }
                buf.push(PUSH_MARKER);
                buf.extend_from_slice(data_type.as_bytes());
                buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                buf.extend_from_slice(payload);
            }
            Frame::Pull { data_type } => {
                buf.push(PULL_MARKER);
                buf.extend_from_slice(data_type.as_bytes());
            }
        }
        Ok(buf)
    }

    /// Decode one frame from the front of `data`.
    ///
    /// Returns the frame and the number of bytes consumed, or `Ok(None)` when
    /// `data` holds only part of a frame.
    #[inline]
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>, FrameError> {
        let Some(&kind) = data.first() else {
            return Ok(None);
        };
        if kind != PUSH_MARKER && kind != PULL_MARKER {
            return Err(FrameError::UnknownKind(kind));
        }
        if data.len() < PULL_FRAME_SIZE {
            return Ok(None);
        }

        let data_type = DataType::new([data[1], data[2], data[3]]);

        if kind == PULL_MARKER {
            return Ok(Some((Frame::Pull { data_type }, PULL_FRAME_SIZE)));
        }

        if data.len() < PUSH_HEADER_SIZE {
            return Ok(None);
        }
        let len = u16::from_be_bytes([data[4], data[5]]) as usize;
        let end = PUSH_HEADER_SIZE + len;
        if data.len() < end {
            return Ok(None);
        }

        let payload = data[PUSH_HEADER_SIZE..end].to_vec();
        Ok(Some((Frame::Push { data_type, payload }, end)))
    }
}

/// Resegments a byte stream into frames.
///
/// Reads may deliver several frames, or a fraction of one; leftover bytes are
/// kept until the next `extend`. Consumed bytes are only shifted out once the
/// buffered frames run dry.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Start of the first unconsumed byte in `buf`
    pos: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        match Frame::parse(&self.buf[self.pos..])? {
            Some((frame, consumed)) => {
                self.pos += consumed;
                Ok(Some(frame))
            }
            None => {
                self.compact();
                Ok(None)
            }
        }
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}
