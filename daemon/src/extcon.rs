//! Cable publishers backed by the Linux extcon class.
//!
//! Platform presence is read from `<root>/bus/acpi/devices/<HID>:NN` and each
//! publisher is the extcon device whose `name` attribute matches the
//! descriptor. Cable states come from the device's `state` attribute, one
//! `CABLE=0|1` pair per line.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use heapless::Vec;
use mux_core::signals::{
    CableSignal, PublisherDescriptor, PublisherDirectory, SignalKind, SignalSource,
    UnavailableDependency,
};

use crate::error::DaemonError;

/// Signals reported by one sample of a `state` attribute.
pub type Sample = Vec<CableSignal, 4>;

/// Sysfs tree rooted at `/sys` (or a test fixture).
pub struct SysfsDirectory {
    root: PathBuf,
}

impl SysfsDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn acpi_devices(&self) -> PathBuf {
        self.root.join("bus/acpi/devices")
    }

    fn extcon_class(&self) -> PathBuf {
        self.root.join("class/extcon")
    }

    /// Finds the extcon device registered as `name`.
    pub fn find_extcon(&self, name: &str) -> io::Result<Option<PathBuf>> {
        let entries = match fs::read_dir(self.extcon_class()) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };

        for entry in entries {
            let path = entry?.path();
            if let Ok(registered) = fs::read_to_string(path.join("name")) {
                if registered.trim_end() == name {
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }
}

/// An ACPI device counts as present unless its `status` attribute reads 0.
fn acpi_device_enabled(path: &Path) -> bool {
    match fs::read_to_string(path.join("status")) {
        Ok(status) => status.trim() != "0",
        Err(_) => true,
    }
}

impl PublisherDirectory for SysfsDirectory {
    fn platform_present(&self, platform_id: &str) -> bool {
        let Ok(entries) = fs::read_dir(self.acpi_devices()) else {
            return false;
        };
        let prefix = format!("{platform_id}:");

        entries.filter_map(Result::ok).any(|entry| {
            entry.file_name().to_string_lossy().starts_with(&prefix)
                && acpi_device_enabled(&entry.path())
        })
    }

    fn publisher_ready(&self, publisher: &str) -> bool {
        matches!(self.find_extcon(publisher), Ok(Some(_)))
    }
}

fn cable_kind(cable: &str) -> Option<(SignalKind, bool)> {
    // USB-HOST reports a host cable, which is the absence of the ID fact.
    match cable {
        "USB-HOST" => Some((SignalKind::IdPresence, true)),
        "SDP" => Some((SignalKind::VbusCharger1, false)),
        "CDP" => Some((SignalKind::VbusCharger2, false)),
        "DCP" => Some((SignalKind::VbusCharger3, false)),
        _ => None,
    }
}

/// Parses an extcon `state` attribute, keeping only `wanted` kinds.
pub fn parse_state(text: &str, wanted: &[SignalKind]) -> Sample {
    let mut sample = Sample::new();
    for line in text.lines() {
        let Some((cable, value)) = line.trim().split_once('=') else {
            continue;
        };
        let Some((kind, inverted)) = cable_kind(cable) else {
            continue;
        };
        let Ok(raw) = value.parse::<u8>() else {
            continue;
        };
        if wanted.contains(&kind) && !sample.iter().any(|signal| signal.kind == kind) {
            let _ = sample.push(CableSignal::new(kind, (raw != 0) != inverted));
        }
    }
    sample
}

const fn slot(kind: SignalKind) -> usize {
    match kind {
        SignalKind::IdPresence => 0,
        SignalKind::VbusCharger1 => 1,
        SignalKind::VbusCharger2 => 2,
        SignalKind::VbusCharger3 => 3,
    }
}

/// One resolved publisher and the values it last delivered.
pub struct ExtconPublisher {
    descriptor: &'static PublisherDescriptor,
    state_path: PathBuf,
    delivered: [Option<bool>; 4],
}

impl ExtconPublisher {
    /// Locates the extcon device for `descriptor`.
    pub fn open(
        directory: &SysfsDirectory,
        descriptor: &'static PublisherDescriptor,
    ) -> Result<Self, DaemonError> {
        let device = directory
            .find_extcon(descriptor.publisher)
            .map_err(|source| DaemonError::io("scan extcon class", source))?
            .ok_or(DaemonError::Attach(
                mux_core::controller::AttachError::Unavailable(UnavailableDependency {
                    platform_id: descriptor.platform_id,
                    publisher: descriptor.publisher,
                }),
            ))?;

        Ok(Self {
            descriptor,
            state_path: device.join("state"),
            delivered: [None; 4],
        })
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.publisher
    }

    /// Reads the current cable state.
    pub fn sample(&self) -> io::Result<Sample> {
        let text = fs::read_to_string(&self.state_path)?;
        Ok(parse_state(&text, self.descriptor.signals))
    }

    /// Records `sample` as already delivered.
    pub fn prime(&mut self, sample: &Sample) {
        for signal in sample {
            self.mark_delivered(*signal);
        }
    }

    /// Signals in `sample` that differ from what was last delivered.
    pub fn changes(&self, sample: &Sample) -> Sample {
        sample
            .iter()
            .filter(|signal| self.delivered[slot(signal.kind)] != Some(signal.value))
            .copied()
            .collect()
    }

    pub fn mark_delivered(&mut self, signal: CableSignal) {
        self.delivered[slot(signal.kind)] = Some(signal.value);
    }

    pub fn delivered(&self, kind: SignalKind) -> Option<bool> {
        self.delivered[slot(kind)]
    }
}

/// Primed publishers viewed as one signal source for the initial sync.
pub struct PublisherSet<'a>(pub &'a [ExtconPublisher]);

impl SignalSource for PublisherSet<'_> {
    fn current(&self, kind: SignalKind) -> Option<bool> {
        self.0.iter().find_map(|publisher| publisher.delivered(kind))
    }
}
