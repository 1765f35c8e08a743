// Licensed under the Apache-2.0 license

//! Sparse, address-indexed memory image.
//!
//! Bytes are kept as non-overlapping, non-adjacent contiguous segments keyed by
//! their start address. A write that overlaps or touches existing segments
//! merges them into one, with the new bytes taking precedence.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use crate::error::CombineError;
use crate::format::ImageFormat;

/// Value written to never-loaded addresses in a flat binary export.
pub const FLAT_FILL_BYTE: u8 = 0xFF;

/// Payload bytes per Intel HEX data record.
const HEX_RECORD_DATA_LEN: u64 = 16;
/// First address Intel HEX (32-bit linear addressing) cannot express.
const HEX_ADDRESS_LIMIT: u64 = 1 << 32;

/// Entry point carried by an Intel HEX file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartAddress {
    Segment { cs: u16, ip: u16 },
    Linear(u32),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryImage {
    segments: BTreeMap<u64, Vec<u8>>,
    start_address: Option<StartAddress>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `data` so that `data[i]` lands at `address + i`.
    pub fn load_binary(&mut self, data: &[u8], address: u64) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = address
            .checked_add(data.len() as u64)
            .ok_or(CombineError::AddressOverflow {
                address,
                len: data.len(),
            })?;

        // Segments that overlap or abut [address, end), lowest first.
        let mut touching: Vec<u64> = self
            .segments
            .range(..=end)
            .rev()
            .take_while(|(start, bytes)| *start + bytes.len() as u64 >= address)
            .map(|(start, _)| *start)
            .collect();
        touching.reverse();

        let merged_end = touching
            .last()
            .map(|start| (start + self.segments[start].len() as u64).max(end))
            .unwrap_or(end);

        // Grow the lowest segment in place when it starts at or before the new
        // bytes, so that sequential loads stay linear.
        let (merged_start, mut merged) = match touching.first() {
            Some(&first) if first <= address => {
                touching.remove(0);
                (first, self.segments.remove(&first).unwrap_or_default())
            }
            _ => (address, Vec::new()),
        };
        merged.resize((merged_end - merged_start) as usize, FLAT_FILL_BYTE);

        for start in touching {
            if let Some(bytes) = self.segments.remove(&start) {
                let offset = (start - merged_start) as usize;
                merged[offset..offset + bytes.len()].copy_from_slice(&bytes);
            }
        }
        let offset = (address - merged_start) as usize;
        merged[offset..offset + data.len()].copy_from_slice(data);

        self.segments.insert(merged_start, merged);
        Ok(())
    }

    /// Writes the header (or any other fixed record) at `address`.
    pub fn store_at_address(&mut self, data: &[u8], address: u64) -> Result<()> {
        self.load_binary(data, address)
    }

    pub fn load_binary_file(&mut self, path: &Path, address: u64) -> Result<()> {
        let data = std::fs::read(path)
            .map_err(|e| anyhow!("Cannot read file '{}': {}", path.display(), e))?;
        log::debug!(
            "{}: {} bytes at 0x{:08x}",
            path.display(),
            data.len(),
            address
        );
        self.load_binary(&data, address)
    }

    /// Merges the contents of an Intel HEX file at the addresses it carries.
    pub fn load_hex_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read file '{}': {}", path.display(), e))?;
        self.load_hex(&text, path)
    }

    pub fn from_hex_file(path: &Path) -> Result<Self> {
        let mut image = Self::new();
        image.load_hex_file(path)?;
        Ok(image)
    }

    /// Parses Intel HEX text; `source` is only used in error messages.
    pub fn load_hex(&mut self, text: &str, source: &Path) -> Result<()> {
        let mut base = 0u64;
        for record in ihex::Reader::new(text.trim()) {
            let record = record.map_err(|e| CombineError::HexParse {
                path: source.to_path_buf(),
                reason: format!("{e:?}"),
            })?;
            match record {
                ihex::Record::Data { offset, value } => {
                    self.load_binary(&value, base + u64::from(offset))?;
                }
                ihex::Record::ExtendedSegmentAddress(segment) => {
                    base = u64::from(segment) << 4;
                }
                ihex::Record::ExtendedLinearAddress(upper) => {
                    base = u64::from(upper) << 16;
                }
                ihex::Record::StartSegmentAddress { cs, ip } => {
                    self.start_address = Some(StartAddress::Segment { cs, ip });
                }
                ihex::Record::StartLinearAddress(address) => {
                    self.start_address = Some(StartAddress::Linear(address));
                }
                ihex::Record::EndOfFile => break,
            }
        }
        Ok(())
    }

    pub fn start_address(&self) -> Option<StartAddress> {
        self.start_address
    }

    pub fn set_start_address(&mut self, start_address: Option<StartAddress>) {
        self.start_address = start_address;
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of written bytes.
    pub fn len(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    pub fn min_address(&self) -> Option<u64> {
        self.segments.keys().next().copied()
    }

    /// Highest written address (inclusive).
    pub fn max_address(&self) -> Option<u64> {
        self.segments
            .iter()
            .next_back()
            .map(|(start, bytes)| start + bytes.len() as u64 - 1)
    }

    /// Contiguous written ranges in address order.
    pub fn segments(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.segments
            .iter()
            .map(|(start, bytes)| (*start, bytes.as_slice()))
    }

    pub fn get(&self, address: u64) -> Option<u8> {
        let (start, bytes) = self.segments.range(..=address).next_back()?;
        bytes.get((address - start) as usize).copied()
    }

    /// Returns `len` bytes from `address`, or `None` if any of them was never
    /// written.
    pub fn read(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        if len == 0 {
            return Some(Vec::new());
        }
        let (start, bytes) = self.segments.range(..=address).next_back()?;
        let offset = usize::try_from(address - start).ok()?;
        bytes.get(offset..offset.checked_add(len)?).map(<[u8]>::to_vec)
    }

    /// Like [`MemoryImage::read`], but never-written bytes read as
    /// [`FLAT_FILL_BYTE`].
    pub fn read_filled(&self, address: u64, len: usize) -> Vec<u8> {
        let mut out = vec![FLAT_FILL_BYTE; len];
        let end = address.saturating_add(len as u64);
        let first = self
            .segments
            .range(..=address)
            .next_back()
            .map_or(address, |(start, _)| *start);
        for (start, bytes) in self.segments.range(first..end) {
            let lo = (*start).max(address);
            let hi = (start + bytes.len() as u64).min(end);
            if lo >= hi {
                continue;
            }
            out[(lo - address) as usize..(hi - address) as usize]
                .copy_from_slice(&bytes[(lo - start) as usize..(hi - start) as usize]);
        }
        out
    }

    /// Copies every segment of `other` into this image, and its start
    /// address if it has one.
    pub fn merge(&mut self, other: &MemoryImage) -> Result<()> {
        for (start, bytes) in other.segments() {
            self.load_binary(bytes, start)?;
        }
        if other.start_address.is_some() {
            self.start_address = other.start_address;
        }
        Ok(())
    }

    /// Bytes from the lowest to the highest written address, with gaps set to
    /// [`FLAT_FILL_BYTE`].
    pub fn to_flat_binary(&self) -> Result<Vec<u8>> {
        let (Some(min), Some(max)) = (self.min_address(), self.max_address()) else {
            return Ok(Vec::new());
        };
        let size = usize::try_from(max - min + 1)
            .map_err(|_| anyhow!("Image spanning 0x{min:x}..=0x{max:x} is too large"))?;
        Ok(self.read_filled(min, size))
    }

    /// Serializes the written bytes as Intel HEX records.
    pub fn to_hex_string(&self) -> Result<String> {
        let mut records = Vec::new();
        match self.start_address {
            Some(StartAddress::Segment { cs, ip }) => {
                records.push(ihex::Record::StartSegmentAddress { cs, ip })
            }
            Some(StartAddress::Linear(address)) => {
                records.push(ihex::Record::StartLinearAddress(address))
            }
            None => {}
        }

        let mut current_upper = 0u16;
        for (start, bytes) in self.segments() {
            let last = start + bytes.len() as u64 - 1;
            if last >= HEX_ADDRESS_LIMIT {
                bail!(CombineError::HexAddressOutOfRange(last));
            }
            let mut address = start;
            let mut rest = bytes;
            while !rest.is_empty() {
                let upper = (address >> 16) as u16;
                if upper != current_upper {
                    records.push(ihex::Record::ExtendedLinearAddress(upper));
                    current_upper = upper;
                }
                // Records stay 16-byte aligned, which also keeps them inside
                // one 64 KiB window.
                let room = HEX_RECORD_DATA_LEN - address % HEX_RECORD_DATA_LEN;
                let n = rest.len().min(room as usize);
                records.push(ihex::Record::Data {
                    offset: (address & 0xFFFF) as u16,
                    value: rest[..n].to_vec(),
                });
                address += n as u64;
                rest = &rest[n..];
            }
        }
        records.push(ihex::Record::EndOfFile);

        ihex::create_object_file_representation(&records)
            .map_err(|e| anyhow!("Failed to encode Intel HEX records: {e:?}"))
    }

    /// Writes the image to `path` in the requested encoding.
    pub fn export(&self, path: &Path, format: ImageFormat) -> Result<()> {
        let contents = match format {
            ImageFormat::Binary => self.to_flat_binary()?,
            ImageFormat::Hex => self.to_hex_string()?.into_bytes(),
        };
        std::fs::write(path, contents)
            .with_context(|| format!("Unable to write file {}", path.display()))
    }
}
