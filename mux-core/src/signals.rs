//! Cable-state signals and the publishers that deliver them.
//!
//! Each publisher reports `(kind, value)` pairs through a single callback
//! path; [`CableState`] folds them into the two facts the arbiter needs.

use core::fmt;

use heapless::Vec;

/// Cable fact reported by a publisher.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalKind {
    /// No host cable is attached (device role expected upstream).
    IdPresence,
    /// Standard downstream port charger detected (SDP).
    VbusCharger1,
    /// Charging downstream port detected (CDP).
    VbusCharger2,
    /// Dedicated charging port detected (DCP).
    VbusCharger3,
}

impl SignalKind {
    /// Every signal kind in a stable order.
    pub const ALL: [SignalKind; 4] = [
        SignalKind::IdPresence,
        SignalKind::VbusCharger1,
        SignalKind::VbusCharger2,
        SignalKind::VbusCharger3,
    ];

    /// The three charger-detection signals.
    pub const CHARGERS: [SignalKind; 3] = [
        SignalKind::VbusCharger1,
        SignalKind::VbusCharger2,
        SignalKind::VbusCharger3,
    ];

    /// Short label used by logs and front-ends.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SignalKind::IdPresence => "id",
            SignalKind::VbusCharger1 => "charger1",
            SignalKind::VbusCharger2 => "charger2",
            SignalKind::VbusCharger3 => "charger3",
        }
    }

    /// Parses a label produced by [`SignalKind::label`].
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }

    const fn charger_index(self) -> Option<usize> {
        match self {
            SignalKind::IdPresence => None,
            SignalKind::VbusCharger1 => Some(0),
            SignalKind::VbusCharger2 => Some(1),
            SignalKind::VbusCharger3 => Some(2),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable snapshot of one cable fact.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CableSignal {
    pub kind: SignalKind,
    pub value: bool,
}

impl CableSignal {
    /// Creates a new signal snapshot.
    #[must_use]
    pub const fn new(kind: SignalKind, value: bool) -> Self {
        Self { kind, value }
    }
}

impl fmt::Display for CableSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = if self.value { "on" } else { "off" };
        write!(f, "{}={value}", self.kind)
    }
}

/// Latest cable facts as seen by the worker.
///
/// The three charger signals are tracked separately so that one charger
/// dropping does not clear a source still reported by another.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CableState {
    id_present: bool,
    chargers: [bool; 3],
}

impl CableState {
    /// Builds a state from the two aggregated facts.
    #[must_use]
    pub const fn new(id_present: bool, vbus_valid: bool) -> Self {
        Self {
            id_present,
            chargers: [vbus_valid, false, false],
        }
    }

    /// `true` when no host cable is attached.
    #[must_use]
    pub const fn id_present(&self) -> bool {
        self.id_present
    }

    /// `true` when any tracked charger reports a supplying source.
    #[must_use]
    pub const fn vbus_valid(&self) -> bool {
        self.chargers[0] || self.chargers[1] || self.chargers[2]
    }

    /// Last value reported for `kind`.
    #[must_use]
    pub const fn signal(&self, kind: SignalKind) -> bool {
        match kind.charger_index() {
            Some(index) => self.chargers[index],
            None => self.id_present,
        }
    }

    /// Records `signal`, returning `true` if the stored value changed.
    pub fn apply(&mut self, signal: CableSignal) -> bool {
        let slot = match signal.kind.charger_index() {
            Some(index) => &mut self.chargers[index],
            None => &mut self.id_present,
        };
        let changed = *slot != signal.value;
        *slot = signal.value;
        changed
    }
}

impl fmt::Display for CableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id_present={} vbus_valid={}",
            self.id_present,
            self.vbus_valid()
        )
    }
}

/// Known publisher advertised by a platform identifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PublisherDescriptor {
    /// Platform (ACPI) identifier that announces the publisher.
    pub platform_id: &'static str,
    /// Name the publisher registers under once it is ready.
    pub publisher: &'static str,
    /// Signals this publisher reports.
    pub signals: &'static [SignalKind],
}

/// Publishers that may feed the mux on Cherry Trail class boards.
pub const KNOWN_PUBLISHERS: &[PublisherDescriptor] = &[
    PublisherDescriptor {
        platform_id: "INT3496",
        publisher: "INT3496:00",
        signals: &[SignalKind::IdPresence],
    },
    PublisherDescriptor {
        platform_id: "INT34D3",
        publisher: "cht_wcove_pwrsrc",
        signals: &SignalKind::ALL,
    },
];

/// Maximum number of publishers resolved for one device.
pub const MAX_PUBLISHERS: usize = 4;

/// A publisher the platform announced has not registered yet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnavailableDependency {
    pub platform_id: &'static str,
    pub publisher: &'static str,
}

impl fmt::Display for UnavailableDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "publisher `{}` for {} is not ready yet",
            self.publisher, self.platform_id
        )
    }
}

/// Platform hook answering which publishers exist.
pub trait PublisherDirectory {
    /// Returns `true` when the platform announces `platform_id`.
    fn platform_present(&self, platform_id: &str) -> bool;

    /// Returns `true` when the publisher named `publisher` has registered.
    fn publisher_ready(&self, publisher: &str) -> bool;
}

/// Current value of a cable fact, read straight from its publisher.
pub trait SignalSource {
    /// Returns `None` when the publisher cannot report `kind` right now.
    fn current(&self, kind: SignalKind) -> Option<bool>;
}

/// Publishers resolved for one device instance.
pub type ResolvedPublishers = Vec<&'static PublisherDescriptor, MAX_PUBLISHERS>;

/// Resolves the publishers to subscribe to.
///
/// Descriptors whose platform id is absent are skipped. A present platform
/// whose publisher has not registered yet yields [`UnavailableDependency`] so
/// the caller can retry later. An empty result is valid: the mux is then only
/// reachable through the control surface.
pub fn resolve_publishers<D>(
    directory: &D,
    table: &'static [PublisherDescriptor],
) -> Result<ResolvedPublishers, UnavailableDependency>
where
    D: PublisherDirectory + ?Sized,
{
    let mut resolved = ResolvedPublishers::new();
    for descriptor in table {
        if !directory.platform_present(descriptor.platform_id) {
            continue;
        }

        if !directory.publisher_ready(descriptor.publisher) {
            return Err(UnavailableDependency {
                platform_id: descriptor.platform_id,
                publisher: descriptor.publisher,
            });
        }

        // Table entries beyond capacity are ignored; the known table is smaller.
        let _ = resolved.push(descriptor);
    }

    Ok(resolved)
}

/// Signals covered by a set of resolved publishers, deduplicated.
#[must_use]
pub fn covered_signals(publishers: &[&PublisherDescriptor]) -> Vec<SignalKind, 4> {
    let mut covered = Vec::new();
    for kind in SignalKind::ALL {
        if publishers
            .iter()
            .any(|descriptor| descriptor.signals.contains(&kind))
        {
            let _ = covered.push(kind);
        }
    }
    covered
}
