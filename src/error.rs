use thiserror::Error;

/// Result/error code surface.
///
/// Mirrors the four failure kinds from the engine's error model: input
/// validation (rejected at the setter, state unchanged), resource
/// exhaustion, quality floor not met, and unsupported usage. Setters return
/// this by value (`LIQ_OK` on success) rather than `Result<(), _>` so that
/// no-op-on-error callers can ignore the return value exactly as cheaply as
/// before; operations that produce a value return `Result<T, liq_error>`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum liq_error {
    #[error("ok")]
    LIQ_OK,
    #[error("value out of range")]
    LIQ_VALUE_OUT_OF_RANGE,
    #[error("output buffer too small")]
    LIQ_BUFFER_TOO_SMALL,
    #[error("out of memory")]
    LIQ_OUT_OF_MEMORY,
    #[error("aborted")]
    LIQ_ABORTED,
    #[error("bitmap not available")]
    LIQ_BITMAP_NOT_AVAILABLE,
    #[error("invalid pointer")]
    LIQ_INVALID_POINTER,
    #[error("unsupported")]
    LIQ_UNSUPPORTED,
    #[error("image quality below the configured minimum")]
    LIQ_QUALITY_TOO_LOW,
}

pub use liq_error::*;

/// Public-facing alias; `liq_error` is kept internally for parity with the
/// historical naming already baked into the palette-search and remap code.
pub type LiqError = liq_error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        assert_eq!(LIQ_QUALITY_TOO_LOW.to_string(), "image quality below the configured minimum");
    }
}
