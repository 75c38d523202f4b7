//! Access-mode flags selecting how an accessor talks to its register.

use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// Flags passed when requesting an accessor.
    ///
    /// `RAW` bypasses the codec and exposes the device's native `i32` words;
    /// `WAIT_FOR_NEW_DATA` turns the accessor into a push accessor whose
    /// `read` blocks on the backend's distribution queue.
    pub struct AccessMode: u32 {
        const RAW = 1 << 0;
        const WAIT_FOR_NEW_DATA = 1 << 1;
    }
}

impl AccessMode {
    /// Fails with `LogicError` if any flag outside `allowed` is set.
    pub fn check_for_unknown_flags(self, allowed: AccessMode) -> Result<()> {
        let unknown = self - allowed;
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(Error::logic(format!(
                "Access mode flags {unknown:?} are not supported for this register"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_flag_check() {
        let flags = AccessMode::RAW | AccessMode::WAIT_FOR_NEW_DATA;
        assert!(flags.check_for_unknown_flags(AccessMode::all()).is_ok());
        assert!(flags.check_for_unknown_flags(AccessMode::RAW).is_err());
        assert!(AccessMode::empty().check_for_unknown_flags(AccessMode::empty()).is_ok());
    }
}
