use crate::config::Limits;
use crate::error::Result;
use crate::protocol::Frame;
use crate::protocol::frame::FrameHead;
use crate::protocol::mask::{apply_mask_fast, random_mask};
use crate::transport::Transport;

/// Reads and writes whole frames on a [`Transport`].
///
/// Every read pulls exactly the bytes of one frame: two header bytes, the
/// extended length, the masking key and the payload. The declared length is
/// checked against [`Limits::max_frame_size`] before the payload buffer is
/// allocated.
pub struct WebSocketCodec<T> {
    io: T,
    write_buf: Vec<u8>,
    limits: Limits,
}

impl<T> WebSocketCodec<T> {
    #[must_use]
    pub fn new(io: T, limits: Limits) -> Self {
        Self {
            io,
            write_buf: Vec::new(),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: Transport> WebSocketCodec<T> {
    /// Read one frame, unmasking the payload if the peer masked it.
    ///
    /// # Errors
    ///
    /// Transport failures, plus `UnknownOpcode`, `ReservedBitsSet` and
    /// `FrameTooLarge` for bad headers.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut head = [0u8; 2];
        self.io.read_exact(&mut head)?;
        let head = FrameHead::decode(head[0], head[1])?;

        let mut extended = [0u8; 8];
        let extended = &mut extended[..head.extended_len_size()];
        self.io.read_exact(extended)?;

        let len = head.payload_len(extended);
        self.limits.check_frame_size(len)?;

        let mut mask = [0u8; 4];
        if head.masked {
            self.io.read_exact(&mut mask)?;
        }

        // Bounded by max_frame_size above.
        let mut payload = vec![0u8; len as usize];
        self.io.read_exact(&mut payload)?;
        if head.masked {
            apply_mask_fast(&mut payload, mask);
        }

        Ok(Frame::new(head.fin, head.opcode, payload).with_masked(head.masked))
    }

    /// Write one frame, masked with a fresh random key if `masked` is set.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub fn write_frame(&mut self, frame: &Frame, masked: bool) -> Result<()> {
        let mask = masked.then(random_mask);
        self.write_buf.clear();
        frame.encode_into(&mut self.write_buf, mask);
        self.io.write(&self.write_buf)?;
        Ok(())
    }
}
