//! Logical process variables and the tag registry.
//!
//! A [`Tag`] is an opaque handle to one scalar remote variable. Tags are
//! registered against the endpoint before connecting; path-to-address
//! resolution happens exactly once, inside `connect()`. The remote path
//! convention is fixed and must be preserved for compatibility with the
//! existing tank server.

use crate::transport::RemoteAddr;

/// Number of tanks on the rig.
pub const TANK_COUNT: usize = 4;
/// Number of pump valves.
pub const VALVE_COUNT: usize = 2;
/// Number of three-way flow-split ratios.
pub const RATIO_COUNT: usize = 2;

/// One scalar process variable on the quadruple-tank rig.
///
/// The inner index is 1-based, matching the plant documentation
/// (Tank1..Tank4, Valve1..Valve2, Ratio1..Ratio2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessVar {
    /// Water level of tank `n` [cm].
    TankLevel(u8),
    /// Water temperature of tank `n` [°C].
    TankTemperature(u8),
    /// Pump valve voltage `n` [V].
    ValveVoltage(u8),
    /// Three-way valve flow split γ`n` [0..1].
    FlowRatio(u8),
}

impl ProcessVar {
    /// Whether the inner index is within the rig's fixed ranges.
    pub fn in_range(&self) -> bool {
        match self {
            Self::TankLevel(n) | Self::TankTemperature(n) => (1..=TANK_COUNT as u8).contains(n),
            Self::ValveVoltage(n) => (1..=VALVE_COUNT as u8).contains(n),
            Self::FlowRatio(n) => (1..=RATIO_COUNT as u8).contains(n),
        }
    }

    /// Remote browse path for this variable.
    ///
    /// Fixed convention: `Process/Tanks/Tank{n}/Level`,
    /// `Process/Tanks/Tank{n}/Temperature`, `Process/Valves/Valve{n}/Voltage`,
    /// `Process/Ratios/Ratio{n}/Gamma`.
    pub fn path(&self) -> String {
        match self {
            Self::TankLevel(n) => format!("Process/Tanks/Tank{n}/Level"),
            Self::TankTemperature(n) => format!("Process/Tanks/Tank{n}/Temperature"),
            Self::ValveVoltage(n) => format!("Process/Valves/Valve{n}/Voltage"),
            Self::FlowRatio(n) => format!("Process/Ratios/Ratio{n}/Gamma"),
        }
    }
}

/// Opaque handle to a registered process variable.
///
/// Obtained from `PvEndpoint::register`; immutable once issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub(crate) u16);

/// One registered tag: logical variable, remote path, resolved address.
#[derive(Debug, Clone)]
pub(crate) struct TagEntry {
    pub var: ProcessVar,
    pub path: String,
    /// Remote address, bound during `connect()`. `None` until resolved.
    pub addr: Option<RemoteAddr>,
}

/// Registry of all tags known to one endpoint.
#[derive(Debug, Default)]
pub(crate) struct TagTable {
    entries: Vec<TagEntry>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable, returning the existing handle if already present.
    pub fn register(&mut self, var: ProcessVar) -> Tag {
        if let Some(idx) = self.entries.iter().position(|e| e.var == var) {
            return Tag(idx as u16);
        }
        self.entries.push(TagEntry {
            var,
            path: var.path(),
            addr: None,
        });
        Tag((self.entries.len() - 1) as u16)
    }

    pub fn entry(&self, tag: Tag) -> Option<&TagEntry> {
        self.entries.get(tag.0 as usize)
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut TagEntry> {
        self.entries.iter_mut()
    }

    /// Drop all resolved addresses (session closed; a reconnect re-resolves).
    pub fn clear_resolution(&mut self) {
        for entry in &mut self.entries {
            entry.addr = None;
        }
    }
}
