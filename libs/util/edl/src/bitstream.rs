// This file is part of OpenEDL.
//
// OpenEDL is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// OpenEDL is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with OpenEDL.  If not, see <http://www.gnu.org/licenses/>.

use crate::{read_up_to, EdlError, Endian, HEADER_SIZE};
use anyhow::{ensure, Result};
use std::io::{Read, Seek, SeekFrom};

/*
 * LSB-first bit reader over a seekable source.
 *
 * Format notes:
 *
 * - Bits are stored in 32 bit words from the least significant bit to the
 *   most significant bit.  Bits are dropped from the bottom of the bit
 *   buffer, using shift right, and refill words are spliced in above the
 *   pending bits, using shift left.
 *
 * - Refill words are fetched from `stream_offset + pos` four bytes at a
 *   time and byte swapped when the container is big-endian.  `pos` may
 *   advance by fewer than four bytes near the end: the container clamps
 *   the fetch against its declared decompressed size.
 *
 * - Once the source itself runs dry no bits are added and the live count
 *   degrades to the would-be byte fetch.  The count can go negative from
 *   there; consumers only rely on it eventually exceeding 32, and the
 *   accumulator keeps yielding whatever real bits remain.
 */
pub(crate) struct BitReader<'a, R> {
    reader: &'a mut R,
    bitbuf: u64,
    bitcnt: i32,
    pos: u32,
    stream_offset: u64,
    source_len: u64,
    read_end: u64,
    limit: u32,
    endian: Endian,
}

impl<'a, R: Read + Seek> BitReader<'a, R> {
    pub(crate) fn new(
        reader: &'a mut R,
        stream_offset: u64,
        decompressed_size: u32,
        endian: Endian,
    ) -> Result<Self> {
        let source_len = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            bitbuf: 0,
            bitcnt: 0,
            pos: HEADER_SIZE as u32,
            stream_offset,
            source_len,
            read_end: stream_offset + HEADER_SIZE as u64,
            limit: decompressed_size,
            endian,
        })
    }

    pub(crate) fn pos(&self) -> u32 {
        self.pos
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.read_end >= self.source_len
    }

    /// Top the accumulator up with the next refill word, unless more than
    /// 32 bits are already pending.
    pub(crate) fn refill(&mut self) -> Result<()> {
        if self.bitcnt > 32 {
            return Ok(());
        }
        let remaining = i64::from(self.limit) - i64::from(self.pos);
        let fetch = remaining.clamp(0, 4) as u32;
        if self.exhausted() {
            self.bitcnt = fetch as i32;
            return Ok(());
        }
        ensure!(
            self.bitcnt >= 0,
            EdlError::MalformedStream("bit accumulator underflow")
        );
        let start = self.stream_offset + u64::from(self.pos);
        self.reader.seek(SeekFrom::Start(start))?;
        let mut word = [0u8; 4];
        let n = read_up_to(self.reader, &mut word)?;
        self.read_end = start + n as u64;
        let mut incoming = u32::from_le_bytes(word);
        if self.endian == Endian::Big {
            incoming = incoming.swap_bytes();
        }
        self.pos += fetch;
        self.bitbuf |= u64::from(incoming) << self.bitcnt as u32;
        self.bitcnt += fetch as i32 * 8;
        Ok(())
    }

    /// Remove and return the next `n` bits.
    pub(crate) fn bits(&mut self, n: u32) -> u32 {
        let out = (self.bitbuf & ((1u64 << n) - 1)) as u32;
        self.bitbuf >>= n;
        self.bitcnt -= n as i32;
        out
    }

    /// Return the next `n` bits without removing them.
    pub(crate) fn peek(&self, n: u32) -> u32 {
        (self.bitbuf & ((1u64 << n) - 1)) as u32
    }

    /// Return the `n` bits found past the next `skip` bits, removing
    /// nothing.
    pub(crate) fn peek_beyond(&self, skip: u32, n: u32) -> u32 {
        ((self.bitbuf >> skip) & ((1u64 << n) - 1)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn with_header(payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn refill_reads_little_endian_words() -> Result<()> {
        let data = with_header(&[0x78, 0x56, 0x34, 0x12]);
        let mut cursor = Cursor::new(data);
        let mut bits = BitReader::new(&mut cursor, 0, 64, Endian::Little)?;
        bits.refill()?;
        assert_eq!(bits.peek(32), 0x1234_5678);
        assert_eq!(bits.bits(8), 0x78);
        assert_eq!(bits.bits(8), 0x56);
        Ok(())
    }

    #[test]
    fn refill_swaps_big_endian_words() -> Result<()> {
        let data = with_header(&[0x78, 0x56, 0x34, 0x12]);
        let mut cursor = Cursor::new(data);
        let mut bits = BitReader::new(&mut cursor, 0, 64, Endian::Big)?;
        bits.refill()?;
        assert_eq!(bits.bits(8), 0x12);
        assert_eq!(bits.bits(8), 0x34);
        Ok(())
    }

    #[test]
    fn refill_skips_above_32_pending_bits() -> Result<()> {
        let data = with_header(&[0xFF; 12]);
        let mut cursor = Cursor::new(data);
        let mut bits = BitReader::new(&mut cursor, 0, 64, Endian::Little)?;
        bits.refill()?;
        bits.refill()?;
        assert_eq!(bits.pos(), 20);
        assert_eq!(bits.bitcnt, 64);
        bits.refill()?;
        assert_eq!(bits.pos(), 20);
        Ok(())
    }

    #[test]
    fn consumption_is_lsb_first() -> Result<()> {
        let data = with_header(&[0b1010_1101, 0, 0, 0]);
        let mut cursor = Cursor::new(data);
        let mut bits = BitReader::new(&mut cursor, 0, 64, Endian::Little)?;
        bits.refill()?;
        assert_eq!(bits.bits(1), 1);
        assert_eq!(bits.bits(2), 0b10);
        assert_eq!(bits.bits(5), 0b10101);
        Ok(())
    }

    #[test]
    fn peek_beyond_skips_pending_bits() -> Result<()> {
        let data = with_header(&[0x0F, 0x05, 0, 0]);
        let mut cursor = Cursor::new(data);
        let mut bits = BitReader::new(&mut cursor, 0, 64, Endian::Little)?;
        bits.refill()?;
        assert_eq!(bits.peek_beyond(8, 3), 0b101);
        assert_eq!(bits.peek(4), 0xF);
        Ok(())
    }

    #[test]
    fn exhausted_refill_degrades_the_count() -> Result<()> {
        let data = with_header(&[0xAB, 0xCD]);
        let mut cursor = Cursor::new(data);
        let mut bits = BitReader::new(&mut cursor, 0, 64, Endian::Little)?;
        bits.refill()?;
        assert_eq!(bits.bits(16), 0xCDAB);
        assert!(bits.exhausted());
        bits.refill()?;
        assert_eq!(bits.pos(), 16);
        assert_eq!(bits.bitcnt, 4);
        Ok(())
    }

    #[test]
    fn refill_clamps_to_the_declared_size() -> Result<()> {
        let data = with_header(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut cursor = Cursor::new(data);
        let mut bits = BitReader::new(&mut cursor, 0, 14, Endian::Little)?;
        bits.refill()?;
        assert_eq!(bits.pos(), 14);
        assert_eq!(bits.bitcnt, 16);
        bits.refill()?;
        assert_eq!(bits.pos(), 14);
        Ok(())
    }
}
