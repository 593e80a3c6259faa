//! Fixed-size binary messages over a Unix socket pair.
//!
//! Used to carry the reason a forked child could not start its program back to the parent;
//! both ends are close-on-exec, so a successful `exec` shows up as end-of-file.
use sealed::DeSerializeBytes;
use std::{
    io::{self, Read, Write},
    marker::PhantomData,
    os::unix::net::UnixStream,
};

mod sealed {
    pub trait DeSerializeBytes {
        fn zero_init() -> Self;
        fn as_mut_ref(&mut self) -> &mut [u8];
    }

    impl<const N: usize> DeSerializeBytes for [u8; N] {
        fn zero_init() -> [u8; N] {
            [0; N]
        }
        fn as_mut_ref(&mut self) -> &mut [u8] {
            self.as_mut_slice()
        }
    }
}

/// Serialization/deserialization trait using a byte array as storage.
pub trait DeSerialize {
    /// Usually `[u8; std::mem::size_of::<Self>()]`.
    type Bytes: sealed::DeSerializeBytes;
    fn serialize(&self) -> Self::Bytes;
    fn deserialize(bytes: Self::Bytes) -> Self;
}

/// One end of a socket pair that sends `W` messages and receives `R` messages.
pub struct BinPipe<R: DeSerialize, W: DeSerialize = R> {
    sock: UnixStream,
    _read_marker: PhantomData<R>,
    _write_marker: PhantomData<W>,
}

impl<R: DeSerialize, W: DeSerialize> BinPipe<R, W> {
    /// Create both ends; [UnixStream::pair()] sets `SOCK_CLOEXEC` on them.
    pub fn pair() -> io::Result<(BinPipe<R, W>, BinPipe<W, R>)> {
        let (first, second) = UnixStream::pair()?;
        Ok((
            BinPipe {
                sock: first,
                _read_marker: PhantomData::<R>,
                _write_marker: PhantomData::<W>,
            },
            // R and W are inverted here since the type of what's written in one
            // pipe is read in the other, and vice versa.
            BinPipe {
                sock: second,
                _read_marker: PhantomData::<W>,
                _write_marker: PhantomData::<R>,
            },
        ))
    }

    /// Read a `R` from the pipe.
    ///
    /// Returns `Ok(None)` when the other end was closed before a full message arrived.
    pub fn read(&mut self) -> io::Result<Option<R>> {
        let mut bytes = R::Bytes::zero_init();
        match self.sock.read_exact(bytes.as_mut_ref()) {
            Ok(()) => Ok(Some(R::deserialize(bytes))),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write a `W` to the pipe.
    pub fn write(&mut self, message: &W) -> io::Result<()> {
        self.sock.write_all(message.serialize().as_mut_ref())?;
        Ok(())
    }
}
