//! Card discovery from `/proc/asound/cards` and the `arecord -l` /
//! `aplay -l` listings

use crate::model::SoundCardType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// ` 2 [Blue           ]: USB-Audio - Yeti Stereo Microphone`
static PROC_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s+\[(\S+)\s*\]:").expect("valid regex"));

/// `card 2: Blue [Yeti Stereo Microphone], device 0: USB Audio [USB Audio]`
static LISTED_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^card (\d+): (\S+) \[").expect("valid regex"));

/// Map card names to kernel card numbers, skipping the on-board card
pub fn parse_proc_cards(contents: &str) -> BTreeMap<String, u32> {
    contents
        .lines()
        .filter_map(|line| {
            let caps = PROC_CARD.captures(line)?;
            let number = caps[1].parse().ok()?;
            Some((caps[2].to_owned(), number))
        })
        .filter(|(name, _)| !SoundCardType::is_onboard_name(name))
        .collect()
}

/// Card names from `arecord -l` or `aplay -l` output.  A card with
/// several devices is only reported once.
pub fn parse_card_listing(output: &str) -> Vec<String> {
    let mut names: Vec<String> = output
        .lines()
        .filter_map(|line| LISTED_CARD.captures(line).map(|c| c[2].to_owned()))
        .filter(|name| !SoundCardType::is_onboard_name(name))
        .collect();
    names.sort();
    names.dedup();
    names
}
