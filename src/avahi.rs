//! mDNS advertisement record
//!
//! avahi picks up service files from its services directory, so the
//! agent publishes its connection status by rewriting that file.

use crate::{model::{DeviceStatus, Identity}, templates};
use std::{fs, io, path::Path};

/// Write the advertisement for `status`
pub fn write_status(path: &Path, identity: &Identity, status: DeviceStatus) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let body = templates::avahi_service(
        &status.to_string(),
        &identity.patch_version,
        &identity.mac,
        &identity.credentials.api_hash(),
    );
    fs::write(path, body)
}
