//! Link quality: a monotone state machine over `(neRssi, feRssi, neLqi,
//! feLqi, priorLevel)`. "Monotone" here means a single good or bad reading
//! nudges the level by at most one step from whatever it already was,
//! rather than recomputing it from scratch on every report — a report with
//! RSSI/LQI in a middling band doesn't flip straight from `Great` to `Bad`.

use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkQualityLevel {
    Unknown,
    Bad,
    Fair,
    Good,
    Great,
}

impl LinkQualityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkQualityLevel::Unknown => "unknown",
            LinkQualityLevel::Bad => "bad",
            LinkQualityLevel::Fair => "fair",
            LinkQualityLevel::Good => "good",
            LinkQualityLevel::Great => "great",
        }
    }
}

/// RSSI (dBm) and LQI (0-255) sit on different scales; each is bucketed to
/// a level independently, then the pair is merged down to the weaker of
/// the two before being smoothed against the prior level. Readings use
/// `i8::MIN`/`0` as "absent" sentinels, same as the device service would
/// report when a radio-side value hasn't been populated yet.
fn bucket_rssi(rssi: i8) -> LinkQualityLevel {
    if rssi == i8::MIN {
        LinkQualityLevel::Unknown
    } else if rssi >= -55 {
        LinkQualityLevel::Great
    } else if rssi >= -65 {
        LinkQualityLevel::Good
    } else if rssi >= -75 {
        LinkQualityLevel::Fair
    } else {
        LinkQualityLevel::Bad
    }
}

fn bucket_lqi(lqi: u8) -> LinkQualityLevel {
    if lqi == 0 {
        LinkQualityLevel::Unknown
    } else if lqi >= 200 {
        LinkQualityLevel::Great
    } else if lqi >= 150 {
        LinkQualityLevel::Good
    } else if lqi >= 100 {
        LinkQualityLevel::Fair
    } else {
        LinkQualityLevel::Bad
    }
}

fn weaker(a: LinkQualityLevel, b: LinkQualityLevel) -> LinkQualityLevel {
    // `Unknown` doesn't count as "weak" when the other side has a real
    // reading — only penalize when *both* sides are unreadable.
    match (a, b) {
        (LinkQualityLevel::Unknown, other) | (other, LinkQualityLevel::Unknown) => other,
        _ => a.min(b),
    }
}

/// Computes the new link quality level. Near/far-end readings are merged
/// independently, the weaker of the two instantaneous levels is taken, and
/// the result is stepped toward that target by at most one level from
/// `prior` so a single noisy report can't cause a multi-level jump.
pub fn determine_link_quality(
    ne_rssi: i8,
    fe_rssi: i8,
    ne_lqi: u8,
    fe_lqi: u8,
    prior: LinkQualityLevel,
) -> LinkQualityLevel {
    let ne_level = weaker(bucket_rssi(ne_rssi), bucket_lqi(ne_lqi));
    let fe_level = weaker(bucket_rssi(fe_rssi), bucket_lqi(fe_lqi));
    let target = weaker(ne_level, fe_level);

    if target == LinkQualityLevel::Unknown {
        return if prior == LinkQualityLevel::Unknown { LinkQualityLevel::Unknown } else { prior };
    }
    if prior == LinkQualityLevel::Unknown {
        return target;
    }

    match target.cmp(&prior) {
        std::cmp::Ordering::Greater => step_up(prior),
        std::cmp::Ordering::Less => step_down(prior),
        std::cmp::Ordering::Equal => prior,
    }
}

fn step_up(level: LinkQualityLevel) -> LinkQualityLevel {
    match level {
        LinkQualityLevel::Unknown => LinkQualityLevel::Bad,
        LinkQualityLevel::Bad => LinkQualityLevel::Fair,
        LinkQualityLevel::Fair => LinkQualityLevel::Good,
        LinkQualityLevel::Good | LinkQualityLevel::Great => LinkQualityLevel::Great,
    }
}

fn step_down(level: LinkQualityLevel) -> LinkQualityLevel {
    match level {
        LinkQualityLevel::Great => LinkQualityLevel::Good,
        LinkQualityLevel::Good => LinkQualityLevel::Fair,
        LinkQualityLevel::Fair => LinkQualityLevel::Bad,
        LinkQualityLevel::Bad | LinkQualityLevel::Unknown => LinkQualityLevel::Bad,
    }
}

/// Renders the detail JSON blob stored alongside the `linkQuality`
/// resource string.
pub fn link_quality_details_json(ne_rssi: i8, fe_rssi: i8, ne_lqi: u8, fe_lqi: u8, comm_fail: bool) -> serde_json::Value {
    json!({
        "nerssi": ne_rssi,
        "ferssi": fe_rssi,
        "nelqi": ne_lqi,
        "felqi": fe_lqi,
        "commFail": comm_fail,
    })
}
