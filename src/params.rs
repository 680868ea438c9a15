//! Parameter-name conventions for the AZM4/AZM8 device family.
//!
//! The protocol itself treats parameter names as opaque strings; this module
//! captures the naming scheme the devices actually use, so callers can build
//! names like `ZoneGain_0` without string-formatting by hand.

use crate::protocol::Format;

/// Liveness parameter polled by the keepalive task. The reply is ignored;
/// only the traffic matters.
pub const KEEPALIVE_PARAM: &str = "KeepAlive";

/// Logical controls the device family exposes. Each kind maps to one wire
/// parameter per zone, source, or group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// Zone output level, conventionally driven as a percentage
    ZoneGain,
    /// Zone mute toggle, 0/1
    ZoneMute,
    /// Which source index a zone is routed from
    ZoneSource,
    /// Zone label as configured on the device
    ZoneName,
    /// Zone output meter in dB, pushed at high rate over UDP
    ZoneMeter,
    /// Source input level
    SourceGain,
    /// Source mute toggle, 0/1
    SourceMute,
    /// Source label
    SourceName,
    /// Source input meter in dB
    SourceMeter,
    /// Whether a zone group is combined, 0/1
    GroupActive,
}

impl ControlKind {
    pub const ALL: [ControlKind; 10] = [
        ControlKind::ZoneGain,
        ControlKind::ZoneMute,
        ControlKind::ZoneSource,
        ControlKind::ZoneName,
        ControlKind::ZoneMeter,
        ControlKind::SourceGain,
        ControlKind::SourceMute,
        ControlKind::SourceName,
        ControlKind::SourceMeter,
        ControlKind::GroupActive,
    ];

    /// Wire-name prefix; the zero-based index follows an underscore.
    pub fn prefix(self) -> &'static str {
        match self {
            ControlKind::ZoneGain => "ZoneGain",
            ControlKind::ZoneMute => "ZoneMute",
            ControlKind::ZoneSource => "ZoneSource",
            ControlKind::ZoneName => "ZoneName",
            ControlKind::ZoneMeter => "ZoneMeter",
            ControlKind::SourceGain => "SourceGain",
            ControlKind::SourceMute => "SourceMute",
            ControlKind::SourceName => "SourceName",
            ControlKind::SourceMeter => "SourceMeter",
            ControlKind::GroupActive => "GroupActive",
        }
    }

    /// Format this control is conventionally read and written in.
    pub fn format(self) -> Format {
        match self {
            ControlKind::ZoneGain | ControlKind::SourceGain => Format::Pct,
            ControlKind::ZoneName | ControlKind::SourceName => Format::Str,
            _ => Format::Val,
        }
    }

    /// Whether the device accepts writes. Meters and labels are
    /// observe-only from this protocol.
    pub fn writable(self) -> bool {
        !matches!(
            self,
            ControlKind::ZoneName
                | ControlKind::SourceName
                | ControlKind::ZoneMeter
                | ControlKind::SourceMeter
        )
    }

    /// Parameter name for the given zero-based index, e.g. `ZoneGain_0`.
    pub fn param(self, index: usize) -> String {
        format!("{}_{}", self.prefix(), index)
    }

    /// Reverse lookup: `ZoneGain_3` becomes `(ZoneGain, 3)`. Names that do
    /// not follow the `<Prefix>_<index>` scheme yield `None`.
    pub fn parse(param: &str) -> Option<(ControlKind, usize)> {
        let (prefix, index) = param.rsplit_once('_')?;
        let index = index.parse().ok()?;
        let kind = ControlKind::ALL.into_iter().find(|k| k.prefix() == prefix)?;
        Some((kind, index))
    }
}

/// `ZoneGain_{n}`: zone output level.
pub fn zone_gain(n: usize) -> String {
    ControlKind::ZoneGain.param(n)
}

/// `ZoneMute_{n}`: zone mute toggle.
pub fn zone_mute(n: usize) -> String {
    ControlKind::ZoneMute.param(n)
}

/// `ZoneSource_{n}`: source index routed to a zone.
pub fn zone_source(n: usize) -> String {
    ControlKind::ZoneSource.param(n)
}

/// `ZoneName_{n}`: zone label.
pub fn zone_name(n: usize) -> String {
    ControlKind::ZoneName.param(n)
}

/// `ZoneMeter_{n}`: zone output meter.
pub fn zone_meter(n: usize) -> String {
    ControlKind::ZoneMeter.param(n)
}

/// `SourceGain_{n}`: source input level.
pub fn source_gain(n: usize) -> String {
    ControlKind::SourceGain.param(n)
}

/// `SourceMute_{n}`: source mute toggle.
pub fn source_mute(n: usize) -> String {
    ControlKind::SourceMute.param(n)
}

/// `SourceName_{n}`: source label.
pub fn source_name(n: usize) -> String {
    ControlKind::SourceName.param(n)
}

/// `SourceMeter_{n}`: source input meter.
pub fn source_meter(n: usize) -> String {
    ControlKind::SourceMeter.param(n)
}

/// `GroupActive_{n}`: group combine toggle.
pub fn group_active(n: usize) -> String {
    ControlKind::GroupActive.param(n)
}

/// How many zones, sources, and groups a device exposes. The AZM4 ships
/// four zones, the AZM8 eight; both speak the same protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLayout {
    pub zones: usize,
    pub sources: usize,
    pub groups: usize,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        DeviceLayout::azm8()
    }
}

impl DeviceLayout {
    pub fn azm4() -> Self {
        Self {
            zones: 4,
            sources: 4,
            groups: 4,
        }
    }

    pub fn azm8() -> Self {
        Self {
            zones: 8,
            sources: 4,
            groups: 4,
        }
    }

    fn count(self, kind: ControlKind) -> usize {
        match kind {
            ControlKind::ZoneGain
            | ControlKind::ZoneMute
            | ControlKind::ZoneSource
            | ControlKind::ZoneName
            | ControlKind::ZoneMeter => self.zones,
            ControlKind::SourceGain
            | ControlKind::SourceMute
            | ControlKind::SourceName
            | ControlKind::SourceMeter => self.sources,
            ControlKind::GroupActive => self.groups,
        }
    }

    /// Every `(param, fmt)` pair for this layout, suitable for one bulk
    /// subscribe right after connecting.
    pub fn subscription_specs(self) -> Vec<(String, Format)> {
        ControlKind::ALL
            .into_iter()
            .flat_map(move |kind| {
                (0..self.count(kind)).map(move |i| (kind.param(i), kind.format()))
            })
            .collect()
    }
}
