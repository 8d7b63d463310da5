//! Telemetry reported to the control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Connection status published in the mDNS record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceStatus {
    Starting,
    NotConnected,
    Connected,
    Error,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::NotConnected => "not connected",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// Round trip statistics from the last probe run, in milliseconds
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub pkts_sent: u32,
    pub pkts_recv: u32,
    pub min_rtt: f64,
    pub max_rtt: f64,
    pub avg_rtt: f64,
    pub stddev_rtt: f64,
    pub last_rtt: f64,
    pub stats_updated_at: Option<DateTime<Utc>>,
}

impl LatencyStats {
    /// Summarise one probe run.  An empty series yields zeroes but
    /// still advances the timestamp.
    pub fn from_rtts(rtts: &[Duration], sent: u32, now: DateTime<Utc>) -> Self {
        let ms: Vec<f64> = rtts.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        let mut stats = Self {
            pkts_sent: sent,
            pkts_recv: ms.len() as u32,
            stats_updated_at: Some(now),
            ..Self::default()
        };
        if ms.is_empty() {
            return stats;
        }

        let n = ms.len() as f64;
        stats.min_rtt = ms.iter().cloned().fold(f64::INFINITY, f64::min);
        stats.max_rtt = ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        stats.avg_rtt = ms.iter().sum::<f64>() / n;
        stats.last_rtt = ms[ms.len() - 1];
        if ms.len() > 1 {
            let var = ms.iter().map(|x| (x - stats.avg_rtt).powi(2)).sum::<f64>() / (n - 1.0);
            stats.stddev_rtt = var.sqrt();
        }
        stats
    }
}

/// Body of every heartbeat, over either transport
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub mac: String,
    pub version: String,
    #[serde(rename = "type")]
    pub sound_card_type: String,
    pub alsa_name: String,
    pub enabled: bool,
    pub status: String,
    #[serde(flatten)]
    pub latency: LatencyStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_series_is_zero_but_stamped() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let s = LatencyStats::from_rtts(&[], 5, now);
        assert_eq!(s.pkts_sent, 5);
        assert_eq!(s.pkts_recv, 0);
        assert_eq!(s.min_rtt, 0.0);
        assert_eq!(s.avg_rtt, 0.0);
        assert_eq!(s.stats_updated_at, Some(now));
    }

    #[test]
    fn sample_statistics() {
        let rtts: Vec<_> = [10, 20, 30].iter().map(|ms| Duration::from_millis(*ms)).collect();
        let s = LatencyStats::from_rtts(&rtts, 5, Utc::now());
        assert_eq!(s.pkts_recv, 3);
        assert!((s.min_rtt - 10.0).abs() < 1e-9);
        assert!((s.max_rtt - 30.0).abs() < 1e-9);
        assert!((s.avg_rtt - 20.0).abs() < 1e-9);
        assert!((s.stddev_rtt - 10.0).abs() < 1e-9);
        assert!((s.last_rtt - 30.0).abs() < 1e-9);
    }

    #[test]
    fn status_strings() {
        assert_eq!(DeviceStatus::NotConnected.to_string(), "not connected");
        assert_eq!(DeviceStatus::Connected.to_string(), "connected");
    }
}
