use crate::frame::MAX_U31;

/// For widening casts that can never lose information on the platforms we support
pub trait SafeCast<T> {
    fn safe_cast(self) -> T;
}

#[cfg(not(target_pointer_width = "16"))]
impl SafeCast<usize> for u32 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

impl SafeCast<u64> for u32 {
    fn safe_cast(self) -> u64 {
        self as u64
    }
}

/// For narrowing casts where business logic ensures that the value is in the narrower type's range.
/// NB: The implementations will panic otherwise
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}
impl PrecheckedCast<u32> for usize {
    fn prechecked_cast(self) -> u32 {
        self.try_into().expect("this is a bug: application logic should have ensured the value range")
    }
}

/// Offsets on the wire are limited to 31 bits. This adds a number of bytes to an offset,
///  returning `None` if the result does not fit.
pub fn checked_offset_add(offset: u32, len: usize) -> Option<u32> {
    let offset: u64 = offset.safe_cast();
    let max: u64 = MAX_U31.safe_cast();
    let result = offset.checked_add(u64::try_from(len).ok()?)?;
    if result > max {
        return None;
    }
    Some(result as u32)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::zero(0, 0, Some(0))]
    #[case::simple(5, 7, Some(12))]
    #[case::up_to_max(MAX_U31 - 3, 3, Some(MAX_U31))]
    #[case::beyond_max(MAX_U31 - 3, 4, None)]
    #[case::huge_len(0, usize::MAX, None)]
    fn test_checked_offset_add(#[case] offset: u32, #[case] len: usize, #[case] expected: Option<u32>) {
        assert_eq!(checked_offset_add(offset, len), expected);
    }
}
