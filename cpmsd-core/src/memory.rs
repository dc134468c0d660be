//! Guest memory bus.
//!
//! The disk core only touches guest memory through this trait: to read and
//! write FCBs, directory records and the DMA buffer.

/// Size of the guest address space.
pub const MEMORY_SIZE: usize = 0x10000;

/// Flat 64 KiB byte store. Addresses wrap around at the top of memory.
pub trait GuestMemory {
    fn read_byte(&self, addr: u16) -> u8;

    fn write_byte(&mut self, addr: u16, value: u8);

    /// Little-endian word.
    fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }

    fn write_word(&mut self, addr: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    /// Fill `buf` from guest memory starting at `addr`.
    fn read_block(&self, addr: u16, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(addr.wrapping_add(i as u16));
        }
    }

    /// Copy `data` into guest memory starting at `addr`.
    fn write_block(&mut self, addr: u16, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u16), byte);
        }
    }
}

impl GuestMemory for [u8; MEMORY_SIZE] {
    fn read_byte(&self, addr: u16) -> u8 {
        self[addr as usize]
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        self[addr as usize] = value;
    }

    fn read_block(&self, addr: u16, buf: &mut [u8]) {
        let start = addr as usize;
        if start + buf.len() <= MEMORY_SIZE {
            buf.copy_from_slice(&self[start..start + buf.len()]);
        } else {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = self[(start + i) % MEMORY_SIZE];
            }
        }
    }

    fn write_block(&mut self, addr: u16, data: &[u8]) {
        let start = addr as usize;
        if start + data.len() <= MEMORY_SIZE {
            self[start..start + data.len()].copy_from_slice(data);
        } else {
            for (i, &byte) in data.iter().enumerate() {
                self[(start + i) % MEMORY_SIZE] = byte;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_access() {
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        mem.write_word(0x1000, 0xBEEF);
        assert_eq!(mem.read_byte(0x1000), 0xEF);
        assert_eq!(mem.read_byte(0x1001), 0xBE);
        assert_eq!(mem.read_word(0x1000), 0xBEEF);
    }

    #[test]
    fn test_block_wraps() {
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        mem.write_block(0xFFFE, &[1, 2, 3, 4]);
        assert_eq!(mem.read_byte(0xFFFF), 2);
        assert_eq!(mem.read_byte(0x0000), 3);

        let mut buf = [0u8; 4];
        mem.read_block(0xFFFE, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }
}
