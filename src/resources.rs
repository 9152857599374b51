// src/resources.rs

use crate::error::{PcaError, Result};
use log::debug;
use sysinfo::System;

/// Checks that an `f64` buffer of `n_elements` fits in the memory the OS
/// reports as available.
///
/// Platforms where sysinfo cannot read memory statistics report 0; the check
/// is skipped there and only arithmetic overflow is rejected.
pub fn ensure_f64_allocation(n_elements: usize, what: &str) -> Result<()> {
    let requested_bytes = (n_elements as u64)
        .checked_mul(std::mem::size_of::<f64>() as u64)
        .ok_or(PcaError::Memory {
            requested_bytes: u64::MAX,
            available_bytes: 0,
        })?;

    let mut sys = System::new();
    sys.refresh_memory();
    let available_bytes = sys.available_memory();
    debug!(
        "{} needs {} bytes; {} bytes available",
        what, requested_bytes, available_bytes
    );

    if available_bytes > 0 && requested_bytes > available_bytes {
        return Err(PcaError::Memory {
            requested_bytes,
            available_bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn small_allocation_passes() {
        assert!(ensure_f64_allocation(1024, "test buffer").is_ok());
    }

    #[test]
    fn overflowing_allocation_is_a_memory_error() {
        let err = ensure_f64_allocation(usize::MAX, "huge buffer").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Memory);
    }
}
