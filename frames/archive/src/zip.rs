/*!
    Streaming ZIP writer.

    Every entry's data is fully known when it is added, so the CRC-32 and
    sizes go straight into the local header and no data descriptors are
    needed. Only the classic (non-ZIP64) layout is produced.
*/

use std::io::Write;

use bytes::{BufMut, BytesMut};
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use flate2::write::DeflateEncoder;
use log::trace;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::ArchiveError;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

const VERSION_NEEDED: u16 = 20;
/// Made by UNIX, ZIP version 2.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// Bit 11: names are UTF-8.
const FLAG_UTF8: u16 = 1 << 11;
/// Regular file, rw-r--r--.
const EXTERNAL_ATTRIBUTES: u32 = 0o100644 << 16;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const MAX_ENTRIES: usize = u16::MAX as usize;
const MAX_OFFSET: u64 = u32::MAX as u64;

/**
    How entry data is stored.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    /// Data is copied verbatim.
    #[default]
    Stored,
    /// Raw deflate at the given level (1-9).
    Deflate(u32),
}

impl Compression {
    /**
        Maps a zlib-style level to a compression mode: 0 stores, 1-9 deflate.
    */
    pub fn from_level(level: u32) -> Self {
        match level {
            0 => Self::Stored,
            n => Self::Deflate(n.min(9)),
        }
    }
}

struct CentralEntry {
    name: String,
    method: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    offset: u32,
}

/**
    Writes a ZIP archive entry by entry to an async sink.
*/
pub struct ZipStreamWriter<W> {
    inner: W,
    compression: Compression,
    entries: Vec<CentralEntry>,
    offset: u64,
    dos_time: u16,
    dos_date: u16,
}

impl<W> ZipStreamWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W, compression: Compression) -> Self {
        let (dos_time, dos_date) = dos_timestamp(Local::now().naive_local());
        Self {
            inner,
            compression,
            entries: Vec::new(),
            offset: 0,
            dos_time,
            dos_date,
        }
    }

    /// Bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /**
        Write one entry and flush it to the sink.
    */
    pub async fn add_entry(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        if self.entries.len() >= MAX_ENTRIES {
            return Err(ArchiveError::TooManyEntries(MAX_ENTRIES));
        }
        let name_len =
            u16::try_from(name.len()).map_err(|_| ArchiveError::NameTooLong(name.to_string()))?;
        let uncompressed_size =
            u32::try_from(data.len()).map_err(|_| ArchiveError::TooLarge(MAX_OFFSET))?;

        let crc32 = crc32fast::hash(data);
        let (method, payload) = match self.compression {
            Compression::Stored => (METHOD_STORED, None),
            Compression::Deflate(level) => {
                let mut encoder =
                    DeflateEncoder::new(Vec::new(), flate2::Compression::new(level));
                encoder.write_all(data)?;
                (METHOD_DEFLATED, Some(encoder.finish()?))
            }
        };
        let payload: &[u8] = payload.as_deref().unwrap_or(data);
        let compressed_size =
            u32::try_from(payload.len()).map_err(|_| ArchiveError::TooLarge(MAX_OFFSET))?;

        let offset = self.offset;
        let header_len = 30 + name.len() as u64;
        if offset + header_len + payload.len() as u64 > MAX_OFFSET {
            return Err(ArchiveError::TooLarge(MAX_OFFSET));
        }

        let mut header = BytesMut::with_capacity(header_len as usize);
        header.put_u32_le(LOCAL_HEADER_SIGNATURE);
        header.put_u16_le(VERSION_NEEDED);
        header.put_u16_le(FLAG_UTF8);
        header.put_u16_le(method);
        header.put_u16_le(self.dos_time);
        header.put_u16_le(self.dos_date);
        header.put_u32_le(crc32);
        header.put_u32_le(compressed_size);
        header.put_u32_le(uncompressed_size);
        header.put_u16_le(name_len);
        header.put_u16_le(0);
        header.put_slice(name.as_bytes());

        self.inner.write_all(&header).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        self.offset += header_len + payload.len() as u64;

        trace!(
            "zip entry '{}' written ({} -> {} bytes)",
            name, uncompressed_size, compressed_size
        );

        self.entries.push(CentralEntry {
            name: name.to_string(),
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            // Checked against MAX_OFFSET above.
            offset: offset as u32,
        });
        Ok(())
    }

    /**
        Write the central directory and end record, flush, and shut the sink
        down. Returns the sink.
    */
    pub async fn finish(mut self) -> Result<W, ArchiveError> {
        let mut directory = BytesMut::new();
        for entry in &self.entries {
            directory.put_u32_le(CENTRAL_HEADER_SIGNATURE);
            directory.put_u16_le(VERSION_MADE_BY);
            directory.put_u16_le(VERSION_NEEDED);
            directory.put_u16_le(FLAG_UTF8);
            directory.put_u16_le(entry.method);
            directory.put_u16_le(self.dos_time);
            directory.put_u16_le(self.dos_date);
            directory.put_u32_le(entry.crc32);
            directory.put_u32_le(entry.compressed_size);
            directory.put_u32_le(entry.uncompressed_size);
            directory.put_u16_le(entry.name.len() as u16);
            directory.put_u16_le(0); // extra field
            directory.put_u16_le(0); // comment
            directory.put_u16_le(0); // disk number
            directory.put_u16_le(0); // internal attributes
            directory.put_u32_le(EXTERNAL_ATTRIBUTES);
            directory.put_u32_le(entry.offset);
            directory.put_slice(entry.name.as_bytes());
        }

        let directory_offset = self.offset;
        let directory_size = directory.len() as u64;
        if directory_offset + directory_size > MAX_OFFSET {
            return Err(ArchiveError::TooLarge(MAX_OFFSET));
        }

        let count = self.entries.len() as u16;
        directory.put_u32_le(END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        directory.put_u16_le(0); // this disk
        directory.put_u16_le(0); // disk with the directory
        directory.put_u16_le(count);
        directory.put_u16_le(count);
        directory.put_u32_le(directory_size as u32);
        directory.put_u32_le(directory_offset as u32);
        directory.put_u16_le(0); // comment

        // The sink is shut down even when the end record could not be written.
        let written = async {
            self.inner.write_all(&directory).await?;
            self.inner.flush().await
        }
        .await;
        let closed = self.inner.shutdown().await;
        written?;
        closed?;
        self.offset += directory.len() as u64;

        Ok(self.inner)
    }
}

/// MS-DOS time and date; years before 1980 clamp to 1980-01-01.
fn dos_timestamp(now: NaiveDateTime) -> (u16, u16) {
    if now.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let time = (now.hour() << 11) | (now.minute() << 5) | (now.second() / 2);
    let date = (((now.year() - 1980) as u32) << 9) | (now.month() << 5) | now.day();
    (time as u16, date as u16)
}
