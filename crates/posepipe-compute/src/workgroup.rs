use posepipe_core::{PoseError, Result, MODEL_INPUT_HEIGHT, MODEL_INPUT_WIDTH};

/// Work-group limits reported by a graphics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroupLimits {
    pub max_size_x: u32,
    pub max_size_y: u32,
    pub max_invocations: u32,
}

/// Side length of the square work group used to tile the output tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroupSize(u32);

impl WorkGroupSize {
    /// Upper bound regardless of what the device allows.
    pub const PREFERRED: u32 = 64;

    /// Pick the largest square work group the device supports, capped at
    /// [`Self::PREFERRED`] and rounded down to a multiple of 4.
    pub fn choose(limits: WorkGroupLimits) -> Result<Self> {
        let size = Self::PREFERRED
            .min(limits.max_size_x)
            .min(limits.max_size_y)
            .min(limits.max_invocations.isqrt())
            & !3;
        if size == 0 {
            return Err(PoseError::Graphics(format!(
                "device work-group limits too small for a 4x4 group: {limits:?}"
            )));
        }
        tracing::info!(
            max_invocations = limits.max_invocations,
            max_x = limits.max_size_x,
            max_y = limits.max_size_y,
            size,
            "chose compute work-group size"
        );
        Ok(Self(size))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Number of groups along x and y covering the output tensor.
    pub fn group_count(self) -> (u32, u32) {
        (
            (MODEL_INPUT_WIDTH as u32).div_ceil(self.0),
            (MODEL_INPUT_HEIGHT as u32).div_ceil(self.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(x: u32, y: u32, invocations: u32) -> WorkGroupLimits {
        WorkGroupLimits {
            max_size_x: x,
            max_size_y: y,
            max_invocations: invocations,
        }
    }

    #[test]
    fn test_invocation_limit_dominates() {
        // sqrt(1024) = 32
        assert_eq!(WorkGroupSize::choose(limits(1024, 1024, 1024)).unwrap().get(), 32);
        // sqrt(128) = 11, rounded down to 8
        assert_eq!(WorkGroupSize::choose(limits(128, 128, 128)).unwrap().get(), 8);
    }

    #[test]
    fn test_capped_at_preferred() {
        assert_eq!(WorkGroupSize::choose(limits(1024, 1024, 65536)).unwrap().get(), 64);
    }

    #[test]
    fn test_axis_limit() {
        assert_eq!(WorkGroupSize::choose(limits(1024, 22, 1024)).unwrap().get(), 20);
    }

    #[test]
    fn test_too_small() {
        assert!(WorkGroupSize::choose(limits(2, 2, 4)).is_err());
    }

    #[test]
    fn test_group_count_covers_output() {
        let size = WorkGroupSize::choose(limits(128, 128, 128)).unwrap();
        assert_eq!(size.group_count(), (33, 33));
        let size = WorkGroupSize::choose(limits(1024, 1024, 4096)).unwrap();
        assert_eq!(size.group_count(), (5, 5));
    }
}
