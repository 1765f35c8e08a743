// Licensed under the Apache-2.0 license
#![cfg_attr(not(test), no_std)]

//! Layout of the firmware metadata header that the update client expects to
//! find next to the application image.
//!
//! All multi-byte fields are big-endian. The header checksum is a CRC-32 over
//! the whole header with the checksum field set to zero.

use core::mem::offset_of;

use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const FIRMWARE_HEADER_MAGIC: u32 = 0x5A51_B3D4;
pub const FIRMWARE_HEADER_VERSION: u32 = 2;

/// Width of the firmware digest field (SHA-256).
pub const FIRMWARE_HASH_SIZE: usize = 32;
pub const CAMPAIGN_ID_SIZE: usize = 16;

pub const FIRMWARE_HEADER_SIZE: usize = core::mem::size_of::<FirmwareHeader>();
pub const HEADER_CHECKSUM_OFFSET: usize = offset_of!(FirmwareHeader, header_checksum);

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FirmwareHeader {
    pub magic: U32<BigEndian>,
    pub version: U32<BigEndian>,
    /// Larger values are newer firmware.
    pub firmware_version: U64<BigEndian>,
    pub firmware_size: U64<BigEndian>,
    pub firmware_hash: [u8; FIRMWARE_HASH_SIZE],
    pub campaign_id: [u8; CAMPAIGN_ID_SIZE],
    /// Always 0: no signature follows the header.
    pub signature_size: U32<BigEndian>,
    pub header_checksum: U32<BigEndian>,
}

/// Why a header failed [`FirmwareHeader::check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderFault {
    BadMagic(u32),
    BadVersion(u32),
    ChecksumMismatch { stored: u32, computed: u32 },
}

impl core::fmt::Display for HeaderFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HeaderFault::BadMagic(magic) => write!(f, "bad magic 0x{magic:08x}"),
            HeaderFault::BadVersion(version) => write!(f, "unsupported header version {version}"),
            HeaderFault::ChecksumMismatch { stored, computed } => write!(
                f,
                "checksum 0x{stored:08x} does not match computed 0x{computed:08x}"
            ),
        }
    }
}

impl FirmwareHeader {
    /// Creates a header with the checksum already filled in.
    pub fn new(
        firmware_version: u64,
        firmware_size: u64,
        firmware_hash: [u8; FIRMWARE_HASH_SIZE],
    ) -> Self {
        let mut header = Self {
            magic: U32::new(FIRMWARE_HEADER_MAGIC),
            version: U32::new(FIRMWARE_HEADER_VERSION),
            firmware_version: U64::new(firmware_version),
            firmware_size: U64::new(firmware_size),
            firmware_hash,
            campaign_id: [0; CAMPAIGN_ID_SIZE],
            signature_size: U32::new(0),
            header_checksum: U32::new(0),
        };
        header.header_checksum = U32::new(header.compute_checksum());
        header
    }

    /// CRC-32 of the serialized header with `header_checksum` zeroed.
    pub fn compute_checksum(&self) -> u32 {
        let mut zeroed = *self;
        zeroed.header_checksum = U32::new(0);
        crc32fast::hash(zeroed.as_bytes())
    }

    pub fn check(&self) -> Result<(), HeaderFault> {
        if self.magic.get() != FIRMWARE_HEADER_MAGIC {
            return Err(HeaderFault::BadMagic(self.magic.get()));
        }
        if self.version.get() != FIRMWARE_HEADER_VERSION {
            return Err(HeaderFault::BadVersion(self.version.get()));
        }
        let computed = self.compute_checksum();
        if computed != self.header_checksum.get() {
            return Err(HeaderFault::ChecksumMismatch {
                stored: self.header_checksum.get(),
                computed,
            });
        }
        Ok(())
    }

    pub fn verify(&self) -> bool {
        self.check().is_ok()
    }
}
