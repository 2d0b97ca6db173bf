use posepipe_core::{PoseError, Result};

/// Round `value` up to a multiple of `multiple`, which must be a power of two.
pub fn round_up(value: usize, multiple: usize) -> Result<usize> {
    if !multiple.is_power_of_two() {
        return Err(PoseError::Contract(format!(
            "rounding multiple {multiple} is not a power of two"
        )));
    }
    value
        .checked_add(multiple - 1)
        .map(|v| v & !(multiple - 1))
        .ok_or_else(|| PoseError::Contract(format!("{value} overflows when rounded to {multiple}")))
}

/// Accelerator-preferred placement of one tensor in shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPreference {
    pub alignment: usize,
    pub padding: usize,
}

impl Default for MemoryPreference {
    /// Natural `f32` alignment, no padding.
    fn default() -> Self {
        Self {
            alignment: std::mem::size_of::<f32>(),
            padding: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorLayout {
    pub offset: usize,
    pub padded_length: usize,
}

/// Byte placement of every output tensor inside the output buffer.
/// Computed once per compilation and never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLayout {
    outputs: Vec<TensorLayout>,
    total_size: usize,
}

impl ExecutionLayout {
    /// Lay out `sizes` contiguously, aligning each start and padding each
    /// length as `preference(index)` asks.
    pub fn plan<F>(sizes: &[usize], mut preference: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<MemoryPreference>,
    {
        let mut offset = 0;
        let mut outputs = Vec::with_capacity(sizes.len());
        for (index, &size) in sizes.iter().enumerate() {
            let pref = preference(index)?;
            offset = round_up(offset, pref.alignment)?;
            let padded_length = round_up(size, pref.padding)?;
            outputs.push(TensorLayout {
                offset,
                padded_length,
            });
            offset += padded_length;
        }
        Ok(Self {
            outputs,
            total_size: offset,
        })
    }

    pub fn outputs(&self) -> &[TensorLayout] {
        &self.outputs
    }

    pub fn output(&self, index: usize) -> Option<TensorLayout> {
        self.outputs.get(index).copied()
    }

    /// Bytes needed to hold every output.
    pub fn total_size(&self) -> usize {
        self.total_size
    }
}
