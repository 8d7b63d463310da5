//! Parsing `/proc/asound/cardN/stream0`
//!
//! The kernel lists each direction in its own section:
//!
//! ```text
//! Capture:
//!   Status: Stop
//!   Interface 2
//!     Altset 1
//!     Format: S16_LE
//!     Channels: 2
//!     Endpoint: 0x82 (2 IN) (ASYNC)
//!     Rates: 48000, 44100
//! ```
//!
//! A `Rates:` line belongs to the closest `Channels:` line at most five
//! lines above it.

use super::Direction;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::trace;

/// How far back a `Rates:` line looks for its channel count
const CHANNELS_LOOKBACK: usize = 5;

static CHANNELS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*Channels:\s*(\d+)").expect("valid regex"));
static RATES: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Rates:\s*(.+)$").expect("valid regex"));

fn section_header(d: Direction) -> &'static str {
    match d {
        Direction::Capture => "Capture:",
        Direction::Playback => "Playback:",
    }
}

/// Supported rates and their channel count for one direction.  Later
/// entries for the same rate win.
pub fn supported_formats<S: AsRef<str>>(lines: &[S], direction: Direction) -> BTreeMap<u32, u32> {
    let mut formats = BTreeMap::new();
    let start = match lines
        .iter()
        .position(|l| l.as_ref().trim() == section_header(direction))
    {
        Some(i) => i + 1,
        None => return formats,
    };
    let end = lines[start..]
        .iter()
        .position(|l| l.as_ref().trim() == section_header(direction.other()))
        .map(|i| start + i)
        .unwrap_or(lines.len());

    for i in start..end {
        let rates = match RATES.captures(lines[i].as_ref()) {
            Some(c) => c[1].to_owned(),
            None => continue,
        };

        let channels = (i.saturating_sub(CHANNELS_LOOKBACK).max(start)..i)
            .rev()
            .find_map(|j| CHANNELS.captures(lines[j].as_ref()))
            .and_then(|c| c[1].parse::<u32>().ok());
        let channels = match channels {
            Some(c) => c,
            None => {
                trace!("no channel count near {:?}", lines[i].as_ref());
                continue;
            }
        };

        for rate in rates.split(',').filter_map(|r| r.trim().parse::<u32>().ok()) {
            formats.insert(rate, channels);
        }
    }
    formats
}

/// Pick the sample rate for a bridge: the configured rate if the card
/// supports it, else 48000, else 44100
pub fn choose_rate(formats: &BTreeMap<u32, u32>, preferred: u32) -> Option<(u32, u32)> {
    [preferred, 48000, 44100]
        .iter()
        .find_map(|r| formats.get(r).map(|ch| (*r, *ch)))
}
