use std::time::Duration;

/// Byte accounting for one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMeter {
    received: u64,
    total: Option<u64>,
    percentage: u8,
}

impl TransferMeter {
    /// `total` is the advertised content length; zero counts as unknown.
    pub fn new(total: Option<u64>) -> Self {
        Self {
            received: 0,
            total: total.filter(|t| *t > 0),
            percentage: 0,
        }
    }

    /// Account for `bytes` more and return the resulting percentage. With an
    /// unknown total the last reported value is kept.
    pub fn record(&mut self, bytes: u64) -> u8 {
        self.received = self.received.saturating_add(bytes);
        if let Some(total) = self.total {
            let pct = (u128::from(self.received) * 100 / u128::from(total)).min(100);
            self.percentage = pct as u8;
        }
        self.percentage
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    pub fn speed(&self, elapsed: Duration) -> Option<String> {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 || self.received == 0 {
            return None;
        }
        Some(format!("{}/s", format_bytes(self.received as f64 / secs)))
    }

    pub fn eta(&self, elapsed: Duration) -> Option<String> {
        let total = self.total?;
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 || self.received == 0 {
            return None;
        }
        let rate = self.received as f64 / secs;
        let remaining = total.saturating_sub(self.received) as f64 / rate;
        Some(format_duration(Duration::from_secs_f64(remaining)))
    }
}

pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024.0 {
        return format!("{bytes:.0} B");
    }
    let mut value = bytes / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
