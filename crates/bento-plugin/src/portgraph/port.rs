//! Host-owned event port buffers.
//!
//! An event buffer is a flat byte area the host connects to an event port.
//! The area starts with two `u32` words — used size and capacity in bytes —
//! followed by frames: a [`PgEventHeader`] and the body, padded so every
//! header starts on a 4-byte boundary. The host writes inbound buffers
//! before `run` and reads outbound buffers after; the storage is allocated
//! once, 8-byte aligned, and reused every block.

use crate::portgraph::abi::PgEventHeader;

const HEADER_SIZE: usize = std::mem::size_of::<PgEventHeader>();

/// Bytes before the frame data: used size, then capacity.
const HEAD_SIZE: usize = 8;

fn pad4(value: usize) -> usize {
    (value + 3) & !3
}

pub struct EventBuffer {
    /// `u64` words keep the area aligned for the header words and frame
    /// headers; all access goes through byte views.
    storage: Vec<u64>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = pad4(capacity);
        let words = (HEAD_SIZE + capacity + 7) / 8;
        let mut buffer = Self {
            storage: vec![0u64; words],
        };
        buffer.write_word(1, capacity as u32);
        buffer
    }

    /// Pointer handed to `connect_port`.
    pub fn as_ptr(&mut self) -> *mut std::ffi::c_void {
        self.storage.as_mut_ptr() as *mut std::ffi::c_void
    }

    fn read_word(&self, index: usize) -> u32 {
        let bytes = self.bytes();
        u32::from_ne_bytes(bytes[index * 4..index * 4 + 4].try_into().unwrap())
    }

    fn write_word(&mut self, index: usize, value: u32) {
        let bytes = self.bytes_mut();
        bytes[index * 4..index * 4 + 4].copy_from_slice(&value.to_ne_bytes());
    }

    fn bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self.storage.as_ptr() as *const u8, self.storage.len() * 8)
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(
                self.storage.as_mut_ptr() as *mut u8,
                self.storage.len() * 8,
            )
        }
    }

    pub fn clear(&mut self) {
        self.write_word(0, 0);
    }

    pub fn used(&self) -> usize {
        self.read_word(0) as usize
    }

    pub fn capacity(&self) -> usize {
        self.read_word(1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// Append one frame. Fails without writing when the body would not fit.
    pub fn append(&mut self, frames: u32, body_type: u32, body: &[u8]) -> bool {
        let used = self.used();
        let needed = pad4(HEADER_SIZE + body.len());
        if used + needed > self.capacity() {
            return false;
        }
        let header = PgEventHeader {
            frames,
            body_type,
            body_size: body.len() as u32,
        };
        let offset = HEAD_SIZE + used;
        let bytes = self.bytes_mut();
        unsafe {
            std::ptr::copy_nonoverlapping(
                &header as *const PgEventHeader as *const u8,
                bytes.as_mut_ptr().add(offset),
                HEADER_SIZE,
            );
        }
        bytes[offset + HEADER_SIZE..offset + HEADER_SIZE + body.len()].copy_from_slice(body);
        self.write_word(0, (used + needed) as u32);
        true
    }

    pub fn iter(&self) -> EventIter<'_> {
        EventIter {
            buffer: self,
            offset: 0,
        }
    }
}

pub struct EventIter<'a> {
    buffer: &'a EventBuffer,
    offset: usize,
}

impl<'a> Iterator for EventIter<'a> {
    type Item = (PgEventHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let used = self.buffer.used();
        if self.offset + HEADER_SIZE > used {
            return None;
        }
        let bytes = self.buffer.bytes();
        let at = HEAD_SIZE + self.offset;
        let header = unsafe {
            std::ptr::read_unaligned(bytes.as_ptr().add(at) as *const PgEventHeader)
        };
        let body_start = at + HEADER_SIZE;
        let body_end = body_start + header.body_size as usize;
        if body_end > HEAD_SIZE + used {
            return None;
        }
        self.offset += pad4(HEADER_SIZE + header.body_size as usize);
        Some((header, &bytes[body_start..body_end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_iterate() {
        let mut buffer = EventBuffer::new(256);
        assert!(buffer.is_empty());
        assert!(buffer.append(0, 7, &[0x90, 60, 100]));
        assert!(buffer.append(32, 7, &[0x80, 60, 0]));

        let frames: Vec<_> = buffer.iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0.frames, 0);
        assert_eq!(frames[0].1, &[0x90, 60, 100]);
        assert_eq!(frames[1].0.frames, 32);
        assert_eq!(frames[1].0.body_size, 3);
    }

    #[test]
    fn test_clear_resets() {
        let mut buffer = EventBuffer::new(64);
        buffer.append(0, 1, &[1, 2, 3, 4]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.iter().count(), 0);
    }

    #[test]
    fn test_capacity_respected() {
        let mut buffer = EventBuffer::new(32);
        assert!(buffer.append(0, 1, &[0; 16]));
        // 12-byte header + 16-byte body used 28 of 32; another frame cannot fit.
        assert!(!buffer.append(0, 1, &[0; 16]));
        assert_eq!(buffer.iter().count(), 1);
    }

    #[test]
    fn test_bodies_are_padded() {
        let mut buffer = EventBuffer::new(256);
        buffer.append(0, 1, &[1]);
        buffer.append(1, 2, &[2, 2]);
        let frames: Vec<_> = buffer.iter().collect();
        assert_eq!(frames[0].1, &[1]);
        assert_eq!(frames[1].1, &[2, 2]);
    }

    #[test]
    fn test_layout_matches_plugin_view() {
        // Plugins address the area as raw words: used at 0, capacity at 4.
        let mut buffer = EventBuffer::new(64);
        buffer.append(3, 9, &[5, 6]);
        let base = buffer.as_ptr() as *const u32;
        unsafe {
            assert_eq!(*base, buffer.used() as u32);
            assert_eq!(*base.add(1), 64);
            // First frame header right after the head words.
            assert_eq!(*base.add(2), 3);
            assert_eq!(*base.add(3), 9);
            assert_eq!(*base.add(4), 2);
        }
    }
}
