//! Command-line configuration for the daemon.

use std::path::PathBuf;
use std::time::Duration;

use mux_core::arbiter::{ArbitrationPolicy, Mode};
use mux_core::control::{ControlRequest, parse_request};
use mux_core::driver::MuxTimings;

use crate::error::DaemonError;

pub const USAGE: &str = "Usage: cht-usb-mux --base <addr> [--size <len>] [--mode <host|device|otg>] \
[--poll-interval <ms>] [--sysfs-root <path>] [--mem <path>] [--mux-only]";

/// Bytes mapped when `--size` is not given.
pub const DEFAULT_WINDOW_SIZE: usize = 0x1000;
/// Extcon sampling period when `--poll-interval` is not given.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Physical address of the register window.
    pub base: u64,
    pub size: usize,
    /// Mode requested at startup; `None` leaves the mux following the cable.
    pub mode: Option<Mode>,
    pub poll_interval: Duration,
    pub sysfs_root: PathBuf,
    pub mem_path: PathBuf,
    pub policy: ArbitrationPolicy,
    pub timings: MuxTimings,
}

impl DaemonConfig {
    fn new(base: u64) -> Self {
        Self {
            base,
            size: DEFAULT_WINDOW_SIZE,
            mode: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sysfs_root: PathBuf::from("/sys"),
            mem_path: PathBuf::from("/dev/mem"),
            policy: ArbitrationPolicy::ChargerAware,
            timings: MuxTimings::DEFAULT,
        }
    }
}

/// Parses daemon arguments (without the program name).
pub fn parse_args<I>(args: I) -> Result<DaemonConfig, DaemonError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut base = None;
    let mut size = None;
    let mut mode = None;
    let mut poll_interval = None;
    let mut sysfs_root = None;
    let mut mem_path = None;
    let mut policy = ArbitrationPolicy::ChargerAware;

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };

        if flag == "--mux-only" {
            policy = ArbitrationPolicy::MuxOnly;
            continue;
        }

        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| DaemonError::Usage(format!("Expected value after {flag}")))
        };

        match flag.as_str() {
            "--base" => base = Some(parse_number(&value()?, "--base")?),
            "--size" => {
                let raw = parse_number(&value()?, "--size")?;
                size = Some(usize::try_from(raw).map_err(|_| {
                    DaemonError::Usage(format!("--size {raw:#x} does not fit in memory"))
                })?);
            }
            "--mode" => mode = Some(parse_mode(&value()?)?),
            "--poll-interval" => {
                let millis = parse_number(&value()?, "--poll-interval")?;
                if millis == 0 {
                    return Err(DaemonError::Usage(
                        "--poll-interval must be at least 1 ms".to_string(),
                    ));
                }
                poll_interval = Some(Duration::from_millis(millis));
            }
            "--sysfs-root" => sysfs_root = Some(PathBuf::from(value()?)),
            "--mem" => mem_path = Some(PathBuf::from(value()?)),
            other => return Err(DaemonError::Usage(format!("Unknown argument `{other}`"))),
        }
    }

    let base = base.ok_or_else(|| DaemonError::Usage("--base is required".to_string()))?;
    let mut config = DaemonConfig::new(base);
    config.mode = mode;
    config.policy = policy;
    if let Some(size) = size {
        config.size = size;
    }
    if let Some(interval) = poll_interval {
        config.poll_interval = interval;
    }
    if let Some(root) = sysfs_root {
        config.sysfs_root = root;
    }
    if let Some(path) = mem_path {
        config.mem_path = path;
    }
    Ok(config)
}

fn parse_number(text: &str, flag: &str) -> Result<u64, DaemonError> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse(),
    };
    parsed.map_err(|_| DaemonError::Usage(format!("{flag}: `{text}` is not a number")))
}

fn parse_mode(text: &str) -> Result<Mode, DaemonError> {
    match parse_request(text) {
        Ok(ControlRequest::SetMode(mode)) => Ok(mode),
        _ => Err(DaemonError::Usage(format!(
            "--mode: `{text}` is not one of host, device, otg"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn base_only_uses_defaults() {
        let config = parse_args(args(&["--base", "0xfed0_8000"])).unwrap();
        assert_eq!(config.base, 0xfed0_8000);
        assert_eq!(config.size, DEFAULT_WINDOW_SIZE);
        assert_eq!(config.mode, None);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.sysfs_root, PathBuf::from("/sys"));
        assert_eq!(config.policy, ArbitrationPolicy::ChargerAware);
    }

    #[test]
    fn accepts_inline_and_separate_values() {
        let config = parse_args(args(&[
            "--base=4096",
            "--size",
            "0x200",
            "--mode=host",
            "--poll-interval",
            "25",
            "--sysfs-root=/tmp/sys",
            "--mux-only",
        ]))
        .unwrap();

        assert_eq!(config.base, 4096);
        assert_eq!(config.size, 0x200);
        assert_eq!(config.mode, Some(Mode::Host));
        assert_eq!(config.poll_interval, Duration::from_millis(25));
        assert_eq!(config.sysfs_root, PathBuf::from("/tmp/sys"));
        assert_eq!(config.policy, ArbitrationPolicy::MuxOnly);
    }

    #[test]
    fn usage_errors_exit_with_two() {
        for bad in [
            args(&[]),
            args(&["--base"]),
            args(&["--base", "nope"]),
            args(&["--base", "0x1000", "--mode", "dumpregs"]),
            args(&["--base", "0x1000", "--poll-interval", "0"]),
            args(&["--base", "0x1000", "--verbose"]),
        ] {
            let error = parse_args(bad.clone()).unwrap_err();
            assert!(matches!(error, DaemonError::Usage(_)), "{bad:?}");
            assert_eq!(error.exit_status(), 2);
        }
    }
}
