// Licensed under the Apache-2.0 license

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use sha2::{Digest, Sha256};
use update_header::{FirmwareHeader, FIRMWARE_HASH_SIZE, FIRMWARE_HEADER_SIZE};
use zerocopy::FromBytes;

use crate::error::{CombineError, FileRole};
use crate::format::ImageFormat;
use crate::memory_image::MemoryImage;

/// Checks the metadata header stored at `header_address` and, if
/// `application_address` is given, the application it describes.
pub fn verify_image(
    image: &MemoryImage,
    header_address: u64,
    application_address: Option<u64>,
) -> Result<FirmwareHeader> {
    let bytes = image
        .read(header_address, FIRMWARE_HEADER_SIZE)
        .ok_or(CombineError::HeaderMissing(header_address))?;
    let header = FirmwareHeader::read_from_bytes(&bytes)
        .map_err(|_| anyhow!("Failed to parse header: invalid format or size"))?;
    header
        .check()
        .map_err(|fault| CombineError::InvalidHeader {
            address: header_address,
            reason: fault.to_string(),
        })?;

    if let Some(address) = application_address {
        let size = header.firmware_size.get();
        let truncated = || CombineError::ApplicationTruncated { address, size };
        let len = usize::try_from(size).map_err(|_| truncated())?;
        if len > 0 {
            let last = address
                .checked_add(size - 1)
                .ok_or_else(truncated)?;
            if image.get(address).is_none() || image.max_address() < Some(last) {
                bail!(truncated());
            }
        }
        // HEX applications may have holes; they were hashed as fill bytes.
        let blob = image.read_filled(address, len);
        let actual: [u8; FIRMWARE_HASH_SIZE] = Sha256::digest(&blob).into();
        if actual != header.firmware_hash {
            bail!(CombineError::HashMismatch {
                expected: hex::encode(header.firmware_hash),
                actual: hex::encode(actual),
            });
        }
    }

    log::info!(
        "Header at 0x{:08x}: version {}, size {}, hash {}",
        header_address,
        header.firmware_version.get(),
        header.firmware_size.get(),
        hex::encode(header.firmware_hash)
    );
    Ok(header)
}

/// Loads a combined `.hex`, or a `.bin` that starts at `base`, and verifies it.
pub fn verify_file(
    path: &Path,
    base: u64,
    header_address: u64,
    application_address: Option<u64>,
) -> Result<FirmwareHeader> {
    let image = match ImageFormat::from_path(path, FileRole::Image)? {
        ImageFormat::Binary => {
            let mut image = MemoryImage::new();
            image.load_binary_file(path, base)?;
            image
        }
        ImageFormat::Hex => MemoryImage::from_hex_file(path)?,
    };
    verify_image(&image, header_address, application_address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::create_header;
    use zerocopy::IntoBytes;

    const HEADER: u64 = 0x8000;
    const APP: u64 = 0x8400;

    fn combined(app: &[u8]) -> MemoryImage {
        let mut image = MemoryImage::new();
        image.load_binary(&[0x42; 64], 0).unwrap();
        image
            .store_at_address(create_header(app, 5).as_bytes(), HEADER)
            .unwrap();
        image.load_binary(app, APP).unwrap();
        image
    }

    fn error_of(result: Result<FirmwareHeader>) -> CombineError {
        result.unwrap_err().downcast::<CombineError>().unwrap()
    }

    #[test]
    fn test_good_image() {
        let image = combined(&[0xAA; 256]);
        let header = verify_image(&image, HEADER, Some(APP)).unwrap();
        assert_eq!(header.firmware_size.get(), 256);
        assert_eq!(header.firmware_version.get(), 5);
        verify_image(&image, HEADER, None).unwrap();
    }

    #[test]
    fn test_empty_application() {
        let image = combined(&[]);
        verify_image(&image, HEADER, Some(APP)).unwrap();
    }

    #[test]
    fn test_missing_header() {
        let image = combined(&[1, 2, 3]);
        assert!(matches!(
            error_of(verify_image(&image, 0x9000, None)),
            CombineError::HeaderMissing(0x9000)
        ));
    }

    #[test]
    fn test_corrupted_header() {
        let mut image = combined(&[1, 2, 3]);
        image.load_binary(&[0xFF], HEADER + 20).unwrap();
        assert!(matches!(
            error_of(verify_image(&image, HEADER, None)),
            CombineError::InvalidHeader { .. }
        ));

        // Misplaced header address lands on bootloader bytes.
        assert!(matches!(
            error_of(verify_image(&image, 0, None)),
            CombineError::HeaderMissing(0)
        ));
    }

    #[test]
    fn test_corrupted_application() {
        let mut image = combined(&[0xAA; 256]);
        image.load_binary(&[0xAB], APP + 100).unwrap();
        assert!(matches!(
            error_of(verify_image(&image, HEADER, Some(APP))),
            CombineError::HashMismatch { .. }
        ));
    }

    #[test]
    fn test_truncated_application() {
        let mut image = MemoryImage::new();
        image
            .store_at_address(create_header(&[0xAA; 256], 5).as_bytes(), HEADER)
            .unwrap();
        image.load_binary(&[0xAA; 128], APP).unwrap();
        assert!(matches!(
            error_of(verify_image(&image, HEADER, Some(APP))),
            CombineError::ApplicationTruncated { size: 256, .. }
        ));
    }
}
