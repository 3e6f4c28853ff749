/// Round `size` up to the next multiple of `alignment`.
///
/// Values that are already aligned are returned unchanged. An alignment of
/// zero leaves `size` untouched.
pub fn align_up(size: u32, alignment: u32) -> u32 {
    if alignment == 0 || size % alignment == 0 {
        return size;
    }

    (size / alignment + 1) * alignment
}

/// [`align_up`] that returns `None` instead of overflowing.
pub fn checked_align_up(size: u32, alignment: u32) -> Option<u32> {
    if alignment == 0 || size % alignment == 0 {
        return Some(size);
    }

    (size / alignment + 1).checked_mul(alignment)
}

/// True when `source` names a URI rather than a filesystem path.
pub fn looks_like_uri(source: &str) -> bool {
    match source.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}
