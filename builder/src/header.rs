// Licensed under the Apache-2.0 license

use sha2::{Digest, Sha256};
use update_header::{FirmwareHeader, FIRMWARE_HASH_SIZE};

/// Builds the metadata header for an application image.
///
/// The firmware hash is SHA-256 over `app_blob`. Verifiers depend on this
/// choice, so it must not change without bumping the header version.
pub fn create_header(app_blob: &[u8], firmware_version: u64) -> FirmwareHeader {
    let firmware_hash: [u8; FIRMWARE_HASH_SIZE] = Sha256::digest(app_blob).into();
    let firmware_size = app_blob.len() as u64;

    log::info!("imageSize:    {}", firmware_size);
    log::info!("imageHash:    {}", hex::encode(firmware_hash));
    log::info!("imageversion: {}", firmware_version);

    FirmwareHeader::new(firmware_version, firmware_size, firmware_hash)
}
