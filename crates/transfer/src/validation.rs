use std::path::{Component, Path};

use crate::TransferError;

/// Longest accepted file name, in bytes. Leaves room for the staging
/// prefix and suffix within a 255-byte file system limit.
const MAX_NAME_LEN: usize = 224;

/// Suffix of the hidden files a consumer writes before renaming them into
/// place. Names shaped like them (`.<name>.partial`) are reserved.
pub const STAGING_SUFFIX: &str = ".partial";

/// Validates a reassembly file name.
///
/// Output files live directly under the consumer's output root, so a name
/// must be a single plain path component. Rejects:
/// - Empty names and names longer than 224 bytes
/// - Path separators (`/` or `\`)
/// - `.` and `..`
/// - Windows drive prefixes (`C:`) and NUL bytes
/// - Hidden names ending in [`STAGING_SUFFIX`]
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(TransferError::InvalidName(format!(
            "name too long: {} bytes (max {MAX_NAME_LEN})",
            name.len()
        )));
    }

    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    if name.contains('\0') {
        return Err(TransferError::InvalidName("NUL byte not allowed".into()));
    }

    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidName(format!(
            "drive prefix not allowed: {name}"
        )));
    }

    if name.starts_with('.') && name.ends_with(STAGING_SUFFIX) {
        return Err(TransferError::InvalidName(format!(
            "reserved staging name: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}
