use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use ri_core::{OperationKind, ProgressRecord, Status};

pub mod download;
pub mod images;
pub mod install;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn progress_bar(prefix: &str) -> ProgressBar {
    let bar_style = ProgressStyle::default_bar()
        .template("    {prefix:<12} {bar:25.cyan/dim} {pos:>3}% {msg}")
        .map(|s| s.progress_chars("━━╸"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    let pb = ProgressBar::new(100);
    pb.set_style(bar_style);
    pb.set_prefix(prefix.to_string());
    pb
}

fn render(pb: &ProgressBar, record: &ProgressRecord) {
    pb.set_position(u64::from(record.percentage));

    let mut msg = record.message.clone();
    if let Some(speed) = &record.speed {
        msg.push_str(&format!("  {speed}"));
    }
    if let Some(eta) = &record.eta {
        msg.push_str(&format!("  eta {eta}"));
    }
    pb.set_message(msg);
}

fn finish(pb: &ProgressBar, record: &ProgressRecord, kind: OperationKind) {
    let label = record.status.label(kind);
    let mark = match record.status {
        Status::Succeeded => style(format!("✓ {label}")).green(),
        Status::Stopped => style(format!("■ {label}")).yellow(),
        _ => style(format!("✗ {label}")).red(),
    };
    pb.finish_with_message(format!("{mark} {}", style(&record.message).dim()));
}
