//! Internal use-after-drop guard.
//!
//! There is no C ABI in this crate (see `SPEC_FULL.md` §2): nothing here
//! is `extern "C"` or layout-stable. The tag is kept purely as a
//! `debug_assert`-friendly marker on `QuantizationResult` so a logic bug
//! that resurrects a dropped result trips an assertion instead of reading
//! stale palette data silently.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MagicTag {
    Result,
    Freed,
}

pub(crate) const LIQ_RESULT_MAGIC: MagicTag = MagicTag::Result;
pub(crate) const LIQ_FREED_MAGIC: MagicTag = MagicTag::Freed;
