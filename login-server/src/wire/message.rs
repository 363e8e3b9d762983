use std::convert::TryInto;

/// Largest frame this server will ever read or write, header and checksum
/// included.
pub const MAX_MESSAGE_SIZE: usize = 24590;
pub const HEADER_LENGTH: usize = 2;
pub const CHECKSUM_LENGTH: usize = 4;
pub const XTEA_MULTIPLE: usize = 8;
pub const INITIAL_BUFFER_POSITION: usize = 8;
pub const MAX_BODY_LENGTH: usize = MAX_MESSAGE_SIZE - HEADER_LENGTH - CHECKSUM_LENGTH - XTEA_MULTIPLE;

/// A received frame, positioned for sequential decoding.
///
/// Mirrors the read side of the original `NetworkMessage`: a fixed buffer,
/// a logical `length` set once the header is parsed, and a `position`
/// cursor that advances as fields are consumed. Reads past the declared
/// length set the sticky `overrun` flag instead of panicking.
pub struct InboundMessage {
    buffer: Box<[u8; MAX_MESSAGE_SIZE]>,
    length: usize,
    position: usize,
    overrun: bool,
}

impl InboundMessage {
    pub fn new() -> Self {
        InboundMessage {
            buffer: Box::new([0u8; MAX_MESSAGE_SIZE]),
            length: 0,
            position: 0,
            overrun: false,
        }
    }

    pub fn reset(&mut self) {
        self.length = 0;
        self.position = 0;
        self.overrun = false;
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) {
        self.length = length;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_overrun(&self) -> bool {
        self.overrun
    }

    /// Raw slice for the two-byte outer length header.
    pub fn header_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[0..HEADER_LENGTH]
    }

    pub fn decode_header_length(&self) -> u16 {
        u16::from_le_bytes(self.buffer[0..2].try_into().unwrap())
    }

    /// Buffer region for the body read, starting right after the outer
    /// header. Leaves `position` set to the start of the body.
    pub fn body_buffer_mut(&mut self, size: usize) -> &mut [u8] {
        self.position = HEADER_LENGTH;
        &mut self.buffer[HEADER_LENGTH..HEADER_LENGTH + size]
    }

    /// Borrow `len` bytes at the current position without moving the
    /// cursor. Used by the RSA step, which replaces ciphertext with
    /// plaintext in place before reading the leading sentinel byte.
    pub fn peek_mut(&mut self, len: usize) -> &mut [u8] {
        let pos = self.position;
        &mut self.buffer[pos..pos + len]
    }

    /// Borrow an arbitrary region without disturbing the read cursor.
    /// Used by XTEA decryption, which works over a span independent of
    /// the fields already consumed ahead of it.
    pub fn region_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        &mut self.buffer[start..start + len]
    }

    pub fn region(&self, start: usize, len: usize) -> &[u8] {
        &self.buffer[start..start + len]
    }

    fn can_read(&mut self, size: usize) -> bool {
        if self.position + size > self.length + INITIAL_BUFFER_POSITION || size >= MAX_MESSAGE_SIZE - self.position
        {
            self.overrun = true;
            return false;
        }
        true
    }

    pub fn skip(&mut self, count: isize) {
        let next = self.position as isize + count;
        if next < 0 || next as usize > MAX_MESSAGE_SIZE {
            self.overrun = true;
            return;
        }
        self.position = next as usize;
    }

    pub fn get_u8(&mut self) -> u8 {
        if !self.can_read(1) {
            return 0;
        }
        let v = self.buffer[self.position];
        self.position += 1;
        v
    }

    pub fn get_u16(&mut self) -> u16 {
        if !self.can_read(2) {
            return 0;
        }
        let v = u16::from_le_bytes(self.buffer[self.position..self.position + 2].try_into().unwrap());
        self.position += 2;
        v
    }

    pub fn get_u32(&mut self) -> u32 {
        if !self.can_read(4) {
            return 0;
        }
        let v = u32::from_le_bytes(self.buffer[self.position..self.position + 4].try_into().unwrap());
        self.position += 4;
        v
    }

    pub fn get_u64(&mut self) -> u64 {
        if !self.can_read(8) {
            return 0;
        }
        let v = u64::from_le_bytes(self.buffer[self.position..self.position + 8].try_into().unwrap());
        self.position += 8;
        v
    }

    pub fn get_bytes(&mut self, size: usize) -> Vec<u8> {
        if !self.can_read(size) {
            return Vec::new();
        }
        let v = self.buffer[self.position..self.position + size].to_vec();
        self.position += size;
        v
    }

    /// Everything from the current position to the declared end of the
    /// logical message, for handlers that forward the raw payload (e.g.
    /// opcode routing to the event fabric) rather than decoding it further.
    pub fn remaining(&mut self) -> Vec<u8> {
        let remaining = (self.length + INITIAL_BUFFER_POSITION).saturating_sub(self.position);
        self.get_bytes(remaining)
    }

    pub fn get_string(&mut self) -> String {
        let len = self.get_u16() as usize;
        if self.overrun || !self.can_read(len) {
            return String::new();
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// A frame under construction, built back-to-front: typed fields are
/// appended forward from `INITIAL_BUFFER_POSITION`, then the inner
/// length, checksum, and outer length headers are prepended by walking
/// `start` backward over the already-reserved lead-in bytes.
pub struct OutboundMessage {
    buffer: Box<[u8; MAX_MESSAGE_SIZE]>,
    start: usize,
    position: usize,
    length: usize,
}

impl OutboundMessage {
    pub fn new() -> Self {
        OutboundMessage {
            buffer: Box::new([0u8; MAX_MESSAGE_SIZE]),
            start: INITIAL_BUFFER_POSITION,
            position: INITIAL_BUFFER_POSITION,
            length: 0,
        }
    }

    fn can_add(&self, size: usize) -> bool {
        size + self.position < MAX_BODY_LENGTH
    }

    pub fn add_u8(&mut self, v: u8) {
        if !self.can_add(1) {
            return;
        }
        self.buffer[self.position] = v;
        self.position += 1;
        self.length += 1;
    }

    pub fn add_u16(&mut self, v: u16) {
        if !self.can_add(2) {
            return;
        }
        self.buffer[self.position..self.position + 2].copy_from_slice(&v.to_le_bytes());
        self.position += 2;
        self.length += 2;
    }

    pub fn add_u32(&mut self, v: u32) {
        if !self.can_add(4) {
            return;
        }
        self.buffer[self.position..self.position + 4].copy_from_slice(&v.to_le_bytes());
        self.position += 4;
        self.length += 4;
    }

    pub fn add_u64(&mut self, v: u64) {
        if !self.can_add(8) {
            return;
        }
        self.buffer[self.position..self.position + 8].copy_from_slice(&v.to_le_bytes());
        self.position += 8;
        self.length += 8;
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() > 8192 || !self.can_add(bytes.len()) {
            return;
        }
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        self.length += bytes.len();
    }

    pub fn add_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        if bytes.len() > 8192 || !self.can_add(bytes.len() + 2) {
            return;
        }
        self.add_u16(bytes.len() as u16);
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        self.length += bytes.len();
    }

    pub fn add_double(&mut self, value: f64, precision: u8) {
        self.add_u8(precision);
        let scale = 10f64.powi(precision as i32);
        let scaled = (value * scale) as i64 + i32::MAX as i64;
        self.add_u32(scaled as u32);
    }

    /// Writes padding in place without advancing `position`, matching the
    /// original codec: padding only ever runs once, immediately before
    /// encryption, so nothing is written after it.
    pub fn add_padding(&mut self, n: usize) {
        if !self.can_add(n) {
            return;
        }
        for i in 0..n {
            self.buffer[self.position + i] = 0x33;
        }
        self.length += n;
    }

    fn add_header_u16(&mut self, v: u16) {
        self.start -= 2;
        self.buffer[self.start..self.start + 2].copy_from_slice(&v.to_le_bytes());
        self.length += 2;
    }

    fn add_header_u32(&mut self, v: u32) {
        self.start -= 4;
        self.buffer[self.start..self.start + 4].copy_from_slice(&v.to_le_bytes());
        self.length += 4;
    }

    /// Prepends the inner length header, using the content length *before*
    /// the header itself is accounted for.
    pub fn write_message_length(&mut self) {
        let current = self.length as u16;
        self.add_header_u16(current);
    }

    /// Prepends the Adler-32 checksum over the current span, then the
    /// outer length header over the result.
    pub fn add_crypto_header(&mut self) {
        let checksum = super::checksum::adler32(&self.buffer[self.start..self.start + self.length]);
        self.add_header_u32(checksum);
        self.write_message_length();
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn output_buffer(&self) -> &[u8] {
        &self.buffer[self.start..self.start + self.length]
    }

    pub fn output_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.start..self.start + self.length]
    }
}
