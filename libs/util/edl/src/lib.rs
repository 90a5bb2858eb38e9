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

// Decode EDL containers: a 12 byte header followed by either the payload
// bytes verbatim (EDL-0) or a bit-packed stream of Huffman coded literals
// and backreferences (EDL-1).

mod bitstream;
mod edl1;
mod huffman;

use anyhow::{bail, ensure, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::trace;
use memmap::MmapOptions;
use std::{
    fs::File,
    io::{Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
};
use thiserror::Error;

/// Size of the container header in bytes.
pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum EdlError {
    #[error("not a valid EDL file")]
    InvalidMagic,
    #[error("unsupported compression type ({0})")]
    UnsupportedCompression(u8),
    #[error("malformed code table: {0}")]
    MalformedTable(&'static str),
    #[error("malformed token stream: {0}")]
    MalformedStream(&'static str),
    #[error("stream ended before the final frame")]
    UnexpectedEof,
    #[error("internal decoder error")]
    Internal,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Endian {
    Little = 0,
    Big = 1,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompressionType {
    Raw = 0,
    Coded = 1,
}

impl CompressionType {
    fn from_flags(flags: u8) -> Result<Self> {
        Ok(match flags & 0xF {
            0 => CompressionType::Raw,
            1 => CompressionType::Coded,
            ty => bail!(EdlError::UnsupportedCompression(ty)),
        })
    }
}

/// The container header: three magic bytes, a flags byte carrying the
/// endianness bit (7) and the compression type nibble (3:0), then the
/// compressed and decompressed sizes in the file's endianness.
#[derive(Clone, Debug)]
pub struct EdlHeader {
    pub compression: CompressionType,
    pub endian: Endian,
    pub compressed_size: u32,
    pub decompressed_size: u32,
}

impl EdlHeader {
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        read_up_to(reader, &mut raw)?;
        ensure!(&raw[0..3] == b"EDL", EdlError::InvalidMagic);
        let endian = if raw[3] >> 7 != 0 {
            Endian::Big
        } else {
            Endian::Little
        };
        let compression = CompressionType::from_flags(raw[3])?;
        let mut compressed_size = LittleEndian::read_u32(&raw[4..8]);
        let mut decompressed_size = LittleEndian::read_u32(&raw[8..12]);
        if endian == Endian::Big {
            compressed_size = compressed_size.swap_bytes();
            decompressed_size = decompressed_size.swap_bytes();
        }
        trace!(
            "edl header: {:?} {:?} {} -> {} bytes",
            compression,
            endian,
            compressed_size,
            decompressed_size
        );
        Ok(Self {
            compression,
            endian,
            compressed_size,
            decompressed_size,
        })
    }
}

/// Decode one EDL container starting at the source's current position.
pub fn decompress<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    let stream_offset = reader.stream_position()?;
    let header = EdlHeader::parse(reader)?;
    match header.compression {
        CompressionType::Raw => decompress_raw(reader, &header, stream_offset),
        CompressionType::Coded => edl1::decompress(reader, &header, stream_offset),
    }
}

/// Decode one EDL container and write the result to `writer`.
pub fn decompress_into<R: Read + Seek, W: Write>(reader: &mut R, writer: &mut W) -> Result<()> {
    let buffer = decompress(reader)?;
    writer.write_all(&buffer)?;
    Ok(())
}

/// Decode an EDL file from disk.
pub fn decompress_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let fp = File::open(path)?;
    let map = unsafe { MmapOptions::new().map(&fp)? };
    decompress(&mut Cursor::new(&map[..]))
}

// EDL-0 carries the payload verbatim after the header; the copy is bounded
// by whichever of the source and the declared size runs out first.
fn decompress_raw<R: Read + Seek>(
    reader: &mut R,
    header: &EdlHeader,
    stream_offset: u64,
) -> Result<Vec<u8>> {
    let source_len = reader.seek(SeekFrom::End(0))?;
    let length = source_len
        .saturating_sub(HEADER_SIZE as u64)
        .min(u64::from(header.decompressed_size));
    reader.seek(SeekFrom::Start(stream_offset + HEADER_SIZE as u64))?;
    let mut out = Vec::with_capacity(length as usize);
    reader.take(length).read_to_end(&mut out)?;
    Ok(out)
}

// Fill as much of `buf` as the source can supply; a short source leaves
// the tail bytes untouched.
pub(crate) fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
