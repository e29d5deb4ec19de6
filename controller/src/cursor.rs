//! Cursors walking the field area of an extended header.

use crate::codec::Error;

/// Tracks where the next field of a byte slice is written.
pub struct WriteCursor<'d> {
    pos: usize,
    data: &'d mut [u8],
}

impl<'d> WriteCursor<'d> {
    pub fn new(data: &'d mut [u8]) -> Self {
        Self { pos: 0, data }
    }

    /// Hands out the next `nbytes` bytes for a field to encode itself into.
    pub fn take(&mut self, nbytes: usize) -> Result<&mut [u8], Error> {
        if self.available() < nbytes {
            return Err(Error::InsufficientSpace);
        }
        let dest = &mut self.data[self.pos..self.pos + nbytes];
        self.pos += nbytes;
        Ok(dest)
    }

    pub fn append(&mut self, data: &[u8]) -> Result<(), Error> {
        self.take(data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }
}

#[derive(Debug, Clone)]
pub struct ReadCursor<'d> {
    pos: usize,
    data: &'d [u8],
}

impl<'d> ReadCursor<'d> {
    pub fn new(data: &'d [u8]) -> Self {
        Self { pos: 0, data }
    }

    pub fn slice(&mut self, nbytes: usize) -> Result<&'d [u8], Error> {
        if self.available() < nbytes {
            return Err(Error::InsufficientSpace);
        }
        let src = &self.data[self.pos..self.pos + nbytes];
        self.pos += nbytes;
        Ok(src)
    }

    /// Everything not read yet.
    pub fn rest(&mut self) -> &'d [u8] {
        let src = &self.data[self.pos..];
        self.pos = self.data.len();
        src
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_stops_at_end() {
        let mut buf = [0u8; 4];
        let mut cursor = WriteCursor::new(&mut buf);
        cursor.take(3).unwrap().copy_from_slice(&[1, 2, 3]);
        assert_eq!(cursor.append(&[4, 5]), Err(Error::InsufficientSpace));
        cursor.append(&[4]).unwrap();
        assert_eq!(cursor.available(), 0);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn read_rest() {
        let mut cursor = ReadCursor::new(&[1, 2, 3]);
        assert_eq!(cursor.slice(1), Ok(&[1u8][..]));
        assert!(cursor.slice(3).is_err());
        assert_eq!(cursor.rest(), &[2, 3]);
        assert_eq!(cursor.available(), 0);
    }
}
