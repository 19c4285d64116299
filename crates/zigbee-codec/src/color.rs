//! CIE-1931 `x,y` color resource string codec and the `moveToColor` ZCL
//! payload encoder for the Color Control cluster (0x0300).

use crate::primitives::{ZclReader, ZclWriter};

/// ZCL wants integer values of normalized x/y scaled by this factor.
const XY_SCALE_FACTOR: f64 = 65536.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveToColorPayload {
    pub scaled_x: u16,
    pub scaled_y: u16,
    pub transition_time: u16,
}

/// Builds the 6-byte `moveToColor` command payload: `ColorX`, `ColorY`,
/// `TransitionTime`, each a little-endian `u16`. Returns `None` if `x`/`y`
/// are outside the normalized `[0, 1)` range the cluster accepts.
pub fn encode_move_to_color(x: f64, y: f64, transition_time: u16) -> Option<Vec<u8>> {
    if !(0.0..1.0).contains(&x) || !(0.0..1.0).contains(&y) {
        return None;
    }
    let scaled_x = (x * XY_SCALE_FACTOR) as u16;
    let scaled_y = (y * XY_SCALE_FACTOR) as u16;

    let mut w = ZclWriter::new();
    w.put_u16(scaled_x).put_u16(scaled_y).put_u16(transition_time);
    Some(w.into_bytes())
}

pub fn decode_move_to_color(buffer: &[u8]) -> Option<MoveToColorPayload> {
    let mut r = ZclReader::new(buffer);
    Some(MoveToColorPayload {
        scaled_x: r.get_u16().ok()?,
        scaled_y: r.get_u16().ok()?,
        transition_time: r.get_u16().ok()?,
    })
}

/// Renders a normalized CIE coordinate pair as the resource string form,
/// six decimal places, comma-separated.
pub fn format_color(x: f64, y: f64) -> String {
    format!("{:.6},{:.6}", x, y)
}

/// Parses the `"x,y"` resource string form back into normalized
/// coordinates.
pub fn parse_color(s: &str) -> Option<(f64, f64)> {
    let (x_str, y_str) = s.split_once(',')?;
    let x: f64 = x_str.trim().parse().ok()?;
    let y: f64 = y_str.trim().parse().ok()?;
    Some((x, y))
}
