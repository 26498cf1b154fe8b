use bytes::{Buf, Bytes};
use crate::error::SrtError;

macro_rules! checked_get_impl {
    ($name: ident, $ty:ty, $getter: ident) => {
        fn $name(&mut self, field: &'static str) -> Result<$ty, SrtError> {
            self.ensure_remaining(std::mem::size_of::<$ty>(), field)?;
            Ok(self.$getter())
        }
    }
}

/// Bounds-checked big-endian reads that advance the buffer's cursor. All wire fields are in
///  network byte order, and a short buffer is a format error rather than a panic.
///
/// NB: For [Bytes], `read_bytes` slices the underlying buffer without copying, so payloads and
///      CIFs parsed through this trait share the datagram's allocation.
pub trait WireBuf: Buf {
    fn ensure_remaining(&self, needed: usize, field: &'static str) -> Result<(), SrtError> {
        if self.remaining() < needed {
            return Err(SrtError::Truncated { field, needed, remaining: self.remaining() });
        }
        Ok(())
    }

    checked_get_impl!(read_u8, u8, get_u8);
    checked_get_impl!(read_u16, u16, get_u16);
    checked_get_impl!(read_u32, u32, get_u32);

    fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], SrtError> {
        self.ensure_remaining(N, field)?;
        let mut result = [0u8; N];
        self.copy_to_slice(&mut result);
        Ok(result)
    }

    fn read_bytes(&mut self, len: usize, field: &'static str) -> Result<Bytes, SrtError> {
        self.ensure_remaining(len, field)?;
        Ok(self.copy_to_bytes(len))
    }
}

impl <T: Buf> WireBuf for T {
}
