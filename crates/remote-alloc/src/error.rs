use snafu::{Location, Snafu};

use crate::{chunk::Handle, region::RegionId};

/// Errors reported by region and pool operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("invalid parameter: {reason}"))]
    InvalidParameter {
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no room for {size} bytes in the region"))]
    OutOfMemory {
        size: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to allocate a page of {records} chunk records"))]
    OutOfPages {
        records: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("unknown region {region}"))]
    UnknownRegion {
        region: RegionId,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("unknown handle {handle}"))]
    UnknownHandle {
        handle: Handle,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("handle {handle} has already been freed"))]
    HandleAlreadyFreed {
        handle: Handle,
        #[snafu(implicit)]
        location: Location,
    },
}

impl AllocError {
    /// Returns `true` if the operation failed for lack of space, either in the
    /// region itself or in the chunk pool backing its metadata.
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::OutOfPages { .. })
    }

    #[must_use]
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, Self::InvalidParameter { .. })
    }

    /// Returns `true` for the errors produced by handle validation.
    #[must_use]
    pub fn is_bad_handle(&self) -> bool {
        matches!(
            self,
            Self::UnknownRegion { .. } | Self::UnknownHandle { .. } | Self::HandleAlreadyFreed { .. }
        )
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkId;

    #[test]
    fn test_display() {
        let err = InvalidParameterSnafu {
            reason: "size must not be zero",
        }
        .build();
        assert_eq!(err.to_string(), "invalid parameter: size must not be zero");
        assert!(err.is_invalid_parameter());
        assert!(!err.is_out_of_memory());

        let err = OutOfMemorySnafu { size: 64_u32 }.build();
        assert_eq!(err.to_string(), "no room for 64 bytes in the region");
        assert!(err.is_out_of_memory());

        let err = OutOfPagesSnafu { records: 500_usize }.build();
        assert!(err.is_out_of_memory());
        assert!(!err.is_bad_handle());
    }

    #[test]
    fn test_bad_handle_errors() {
        let err = UnknownRegionSnafu {
            region: RegionId::new(3),
        }
        .build();
        assert_eq!(err.to_string(), "unknown region #3");
        assert!(err.is_bad_handle());

        let handle = Handle::new(ChunkId::new(7), 2);
        let err = HandleAlreadyFreedSnafu { handle }.build();
        assert_eq!(err.to_string(), "handle 7@2 has already been freed");
        assert!(err.is_bad_handle());

        let err = UnknownHandleSnafu { handle }.build();
        assert_eq!(err.to_string(), "unknown handle 7@2");
    }
}
