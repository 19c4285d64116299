//! OTA Upgrade cluster (0x0019) frame validators and firmware version
//! string rendering. Validation failures are never fatal: the frame is
//! dropped and logged, and no event is surfaced (§7 kind 2).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaFrameKind {
    LegacyBootloadStarted,
    LegacyBootloadFailed,
    LegacyBootloadCompleted,
    ImageNotify,
    QueryNextImageRequest,
    QueryNextImageResponse,
    UpgradeStarted,
    UpgradeEndRequest,
    UpgradeEndResponse,
}

const IMAGE_NOTIFY_JITTER_MIN: u8 = 1;
const IMAGE_NOTIFY_JITTER_MAX: u8 = 100;

/// Extra payload bytes required per `payloadType`, indexed 0-3.
const IMAGE_NOTIFY_EXTRA_BYTES: [usize; 4] = [0, 2, 4, 8];

/// Returns `true` iff `buffer` is well-formed for `kind`.
pub fn validate(kind: OtaFrameKind, buffer: &[u8]) -> bool {
    match kind {
        OtaFrameKind::LegacyBootloadStarted
        | OtaFrameKind::LegacyBootloadFailed
        | OtaFrameKind::LegacyBootloadCompleted => {
            if !buffer.is_empty() {
                tracing::warn!(?kind, len = buffer.len(), "unexpected non-empty legacy bootload frame");
            }
            true
        }
        OtaFrameKind::ImageNotify => validate_image_notify(buffer),
        OtaFrameKind::QueryNextImageRequest => buffer.len() >= 9,
        OtaFrameKind::QueryNextImageResponse => !buffer.is_empty(),
        OtaFrameKind::UpgradeStarted => {
            if !buffer.is_empty() {
                tracing::warn!(len = buffer.len(), "unexpected non-empty upgrade-started frame");
            }
            true
        }
        OtaFrameKind::UpgradeEndRequest => buffer.len() >= 9,
        OtaFrameKind::UpgradeEndResponse => buffer.len() >= 16,
    }
}

fn validate_image_notify(buffer: &[u8]) -> bool {
    if buffer.len() < 2 {
        return false;
    }
    let payload_type = buffer[0];
    let query_jitter = buffer[1];

    let Some(&extra) = IMAGE_NOTIFY_EXTRA_BYTES.get(payload_type as usize) else {
        return false;
    };
    if buffer.len() < 2 + extra {
        return false;
    }
    (IMAGE_NOTIFY_JITTER_MIN..=IMAGE_NOTIFY_JITTER_MAX).contains(&query_jitter)
}

/// Renders a firmware version as fixed-width lower hex, e.g. `0x00000100`.
pub fn format_version(version: u32) -> String {
    format!("0x{:08x}", version)
}

/// Parses a firmware version string. Accepts the canonical `0x%08x` form
/// plus anything `strtoul` would accept: an optional `0x`/`0X` prefix
/// forces hex, otherwise the string is parsed as decimal; parsing stops at
/// the first non-digit character and any trailing garbage is ignored.
pub fn parse_version(s: &str) -> Option<u32> {
    let s = s.trim_start();
    let (digits, radix) = if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (rest, 16)
    } else {
        (s, 10)
    };

    let valid_len = digits
        .char_indices()
        .take_while(|(_, c)| c.is_digit(radix))
        .count();

    if valid_len == 0 {
        return None;
    }

    u32::from_str_radix(&digits[..valid_len], radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn image_notify_accepts_minimal_frame() {
        assert!(validate(OtaFrameKind::ImageNotify, &[0x00, 0x32]));
    }

    #[test]
    fn image_notify_rejects_jitter_out_of_range() {
        assert!(!validate(OtaFrameKind::ImageNotify, &[0x00, 0x65]));
    }

    #[test]
    fn image_notify_rejects_short_buffer_for_payload_type() {
        assert!(!validate(OtaFrameKind::ImageNotify, &[0x03, 0x01]));
    }

    #[test]
    fn image_notify_accepts_payload_type_three_with_enough_bytes() {
        let mut buf = vec![0x03, 0x01];
        buf.extend_from_slice(&[0u8; 8]);
        assert!(validate(OtaFrameKind::ImageNotify, &buf));
    }

    #[test]
    fn query_next_image_request_needs_nine_bytes() {
        assert!(!validate(OtaFrameKind::QueryNextImageRequest, &[0u8; 8]));
        assert!(validate(OtaFrameKind::QueryNextImageRequest, &[0u8; 9]));
    }

    #[test]
    fn upgrade_end_response_needs_sixteen_bytes() {
        assert!(!validate(OtaFrameKind::UpgradeEndResponse, &[0u8; 15]));
        assert!(validate(OtaFrameKind::UpgradeEndResponse, &[0u8; 16]));
    }

    #[test]
    fn legacy_frames_accept_empty_buffer() {
        assert!(validate(OtaFrameKind::LegacyBootloadStarted, &[]));
        assert!(validate(OtaFrameKind::LegacyBootloadStarted, &[1, 2, 3]));
    }

    #[test]
    fn version_format_matches_fixed_width_hex() {
        assert_eq!(format_version(0x100), "0x00000100");
    }

    #[test]
    fn version_parse_accepts_hex_and_decimal() {
        assert_eq!(parse_version("0x00000200"), Some(0x200));
        assert_eq!(parse_version("512"), Some(512));
        assert_eq!(parse_version("0x200garbage"), Some(0x200));
    }

    proptest! {
        #[test]
        fn version_round_trip(v: u32) {
            prop_assert_eq!(parse_version(&format_version(v)), Some(v));
        }
    }
}
