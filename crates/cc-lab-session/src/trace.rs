//! Packet-admission schedules for the emulated link.
//!
//! A trace lists one millisecond timestamp per packet the shaper may deliver,
//! assuming MTU-sized (1500 byte) packets. The shaper replays the file
//! verbatim, so the output must be fully determined by bandwidth and duration.

use anyhow::{Context, Result};
use cc_lab_abstract::ConfigError;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const MTU_BYTES: u64 = 1500;
const MTU_BITS: f64 = (MTU_BYTES * 8) as f64;
const MS_PER_SECOND: f64 = 1000.0;

/// A named trace reproduced by `write_presets`.
#[derive(Debug, Clone, Copy)]
pub struct TracePreset {
    pub name: &'static str,
    pub bandwidth_mbps: f64,
    pub duration_seconds: f64,
}

pub const PRESETS: [TracePreset; 3] = [
    TracePreset {
        name: "low_10mbps",
        bandwidth_mbps: 10.0,
        duration_seconds: 60.0,
    },
    TracePreset {
        name: "med_30mbps",
        bandwidth_mbps: 30.0,
        duration_seconds: 60.0,
    },
    TracePreset {
        name: "high_100mbps",
        bandwidth_mbps: 100.0,
        duration_seconds: 60.0,
    },
];

pub fn packets_per_ms(bandwidth_mbps: f64) -> f64 {
    bandwidth_mbps * 1e6 / MTU_BITS / MS_PER_SECOND
}

fn validate(bandwidth_mbps: f64, duration_seconds: f64) -> Result<(), ConfigError> {
    if bandwidth_mbps.is_infinite() {
        return Err(ConfigError::NotFinite {
            field: "bandwidth",
            value: bandwidth_mbps,
        });
    }
    if duration_seconds.is_infinite() {
        return Err(ConfigError::NotFinite {
            field: "duration",
            value: duration_seconds,
        });
    }
    if !(bandwidth_mbps > 0.0) {
        return Err(ConfigError::NonPositiveBandwidth(bandwidth_mbps));
    }
    if !(duration_seconds > 0.0) {
        return Err(ConfigError::NonPositiveDuration(duration_seconds));
    }
    Ok(())
}

/// Slots emitted for every millisecond tick.
///
/// Any fractional remainder earns a whole extra slot on every tick rather than
/// a proportional share, so links with a small remainder get more capacity
/// than requested. Existing traces depend on this exact output.
fn slots_per_tick(packets_per_ms: f64) -> u64 {
    let whole = packets_per_ms.floor() as u64;
    if packets_per_ms.fract() > 0.0 {
        whole + 1
    } else {
        whole
    }
}

fn tick_count(duration_seconds: f64) -> u64 {
    (duration_seconds * MS_PER_SECOND) as u64
}

/// Largest trace `schedule` agrees to produce.
pub const MAX_TRACE_ENTRIES: u64 = u32::MAX as u64;

/// Validated `(ticks, slots per tick)` for a trace within `MAX_TRACE_ENTRIES`.
fn sizing(bandwidth_mbps: f64, duration_seconds: f64) -> Result<(u64, u64), ConfigError> {
    validate(bandwidth_mbps, duration_seconds)?;
    let ticks = tick_count(duration_seconds);
    let per_tick = slots_per_tick(packets_per_ms(bandwidth_mbps));
    match ticks.checked_mul(per_tick) {
        Some(entries) if entries <= MAX_TRACE_ENTRIES => Ok((ticks, per_tick)),
        _ => Err(ConfigError::TraceTooLarge {
            bandwidth_mbps,
            duration_seconds,
            max_entries: MAX_TRACE_ENTRIES,
        }),
    }
}

/// Lazily yields the admission schedule.
pub fn schedule(
    bandwidth_mbps: f64,
    duration_seconds: f64,
) -> Result<impl Iterator<Item = u64>, ConfigError> {
    let (ticks, per_tick) = sizing(bandwidth_mbps, duration_seconds)?;
    let per_tick = usize::try_from(per_tick).map_err(|_| ConfigError::TraceTooLarge {
        bandwidth_mbps,
        duration_seconds,
        max_entries: MAX_TRACE_ENTRIES,
    })?;
    Ok((0..ticks).flat_map(move |tick| std::iter::repeat_n(tick, per_tick)))
}

pub fn generate(bandwidth_mbps: f64, duration_seconds: f64) -> Result<Vec<u64>, ConfigError> {
    Ok(schedule(bandwidth_mbps, duration_seconds)?.collect())
}

/// Number of entries `generate` produces, without building the trace.
pub fn expected_len(bandwidth_mbps: f64, duration_seconds: f64) -> Result<u64, ConfigError> {
    let (ticks, per_tick) = sizing(bandwidth_mbps, duration_seconds)?;
    Ok(ticks * per_tick)
}

pub fn write_trace<W: Write>(writer: &mut W, trace: impl IntoIterator<Item = u64>) -> io::Result<()> {
    for timestamp in trace {
        writeln!(writer, "{timestamp}")?;
    }
    Ok(())
}

/// Validate, then write the trace to `path`. Returns the number of entries.
pub fn write_trace_file(path: &Path, bandwidth_mbps: f64, duration_seconds: f64) -> Result<u64> {
    let entries = expected_len(bandwidth_mbps, duration_seconds)?;
    let trace = schedule(bandwidth_mbps, duration_seconds)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create trace directory {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create trace file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_trace(&mut writer, trace)
        .and_then(|_| writer.flush())
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;

    info!(
        "Trace file generated: {} ({} entries, {:.3} packets/ms)",
        path.display(),
        entries,
        packets_per_ms(bandwidth_mbps)
    );
    Ok(entries)
}

pub fn write_presets(dir: &Path) -> Result<Vec<PathBuf>> {
    PRESETS
        .iter()
        .map(|preset| {
            let path = dir.join(format!("{}.trace", preset.name));
            write_trace_file(&path, preset.bandwidth_mbps, preset.duration_seconds)?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cc-lab-trace-{}-{name}", std::process::id()))
    }

    #[test]
    fn ten_mbps_for_one_second() {
        let trace = generate(10.0, 1.0).unwrap();
        assert!((packets_per_ms(10.0) - 0.8333).abs() < 1e-3);
        assert_eq!(trace.len(), 1000);
        for (index, timestamp) in trace.iter().enumerate() {
            assert_eq!(*timestamp, index as u64);
        }
    }

    #[test]
    fn traces_are_sorted_and_sized() {
        for &(bandwidth, duration) in &[
            (0.57, 2.0),
            (2.64, 1.5),
            (12.0, 1.0),
            (30.0, 0.25),
            (100.42, 0.5),
            (114.68, 0.1),
        ] {
            let trace = generate(bandwidth, duration).unwrap();
            let pps = packets_per_ms(bandwidth);
            let per_tick = pps.floor() as u64 + u64::from(pps.fract() > 0.0);
            let ticks = (duration * 1000.0) as u64;

            assert_eq!(trace.len() as u64, ticks * per_tick, "{bandwidth} Mbps");
            assert_eq!(expected_len(bandwidth, duration).unwrap(), trace.len() as u64);
            assert!(trace.windows(2).all(|w| w[0] <= w[1]), "{bandwidth} Mbps not sorted");
            assert_eq!(trace.last().copied(), Some(ticks - 1));
        }
    }

    #[test]
    fn whole_rates_get_no_extra_slot() {
        let trace = generate(12.0, 0.01).unwrap();
        assert_eq!(trace, (0..10).collect::<Vec<_>>());

        let trace = generate(24.0, 0.002).unwrap();
        assert_eq!(trace, vec![0, 0, 1, 1]);
    }

    #[test]
    fn fractional_rates_round_up_every_tick() {
        // 2.5 packets/ms becomes 3 slots per tick
        assert_eq!(generate(30.0, 0.002).unwrap(), vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(generate(0.0, 1.0), Err(ConfigError::NonPositiveBandwidth(0.0)));
        assert_eq!(generate(-3.0, 1.0), Err(ConfigError::NonPositiveBandwidth(-3.0)));
        assert_eq!(generate(10.0, 0.0), Err(ConfigError::NonPositiveDuration(0.0)));
        assert!(generate(f64::NAN, 1.0).is_err());
        assert!(matches!(
            generate(f64::INFINITY, 1.0),
            Err(ConfigError::NotFinite { field: "bandwidth", .. })
        ));
    }

    #[test]
    fn invalid_input_writes_nothing() {
        let path = scratch_path("invalid.trace");
        let _ = fs::remove_file(&path);
        assert!(write_trace_file(&path, -1.0, 60.0).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn oversized_traces_are_config_errors() {
        assert!(matches!(
            expected_len(1e30, 1.0),
            Err(ConfigError::TraceTooLarge { .. })
        ));
        assert!(matches!(
            expected_len(100.0, 1e17),
            Err(ConfigError::TraceTooLarge { .. })
        ));
        assert!(matches!(
            schedule(1e30, 1.0),
            Err(ConfigError::TraceTooLarge { .. })
        ));
        // 100 Mbps is 9 slots per tick
        assert!(expected_len(100.0, (MAX_TRACE_ENTRIES / 9) as f64 / 1000.0).is_ok());

        let path = scratch_path("oversized.trace");
        let _ = fs::remove_file(&path);
        assert!(write_trace_file(&path, 1e30, 1.0).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn writes_newline_delimited_file() {
        let path = scratch_path("two_ticks.trace");
        let entries = write_trace_file(&path, 30.0, 0.002).unwrap();
        assert_eq!(entries, 6);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "0\n0\n0\n1\n1\n1\n");
        fs::remove_file(&path).unwrap();
    }
}
