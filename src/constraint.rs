//! Environmental preconditions gating when a task may run.
//!
//! A task bound to [`Constraints`] is eligible to start only while every
//! constraint holds against the current [`DeviceState`]. While they do not,
//! the scheduler keeps the task `Blocked`; an unmet constraint never fails a
//! task.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Network connectivity a task requires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// No network requirement.
    #[default]
    NotRequired,
    /// Any working connection.
    Connected,
    /// An unmetered connection.
    Unmetered,
}

/// A single precondition, used to report why a task is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// The device must be charging.
    Charging,
    /// The battery must not be low.
    BatteryNotLow,
    /// Storage must not be low.
    StorageNotLow,
    /// The device must be idle.
    DeviceIdle,
    /// The required network type must be available.
    Network,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charging => write!(f, "charging"),
            Self::BatteryNotLow => write!(f, "battery_not_low"),
            Self::StorageNotLow => write!(f, "storage_not_low"),
            Self::DeviceIdle => write!(f, "device_idle"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Snapshot of the environment the constraints are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeviceState {
    /// The device is plugged in.
    pub charging: bool,
    /// The battery is below the low threshold.
    pub battery_low: bool,
    /// Free storage is below the low threshold.
    pub storage_low: bool,
    /// The device is idle.
    pub idle: bool,
    /// Currently available network.
    pub network: NetworkType,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            charging: false,
            battery_low: false,
            storage_low: false,
            idle: false,
            network: NetworkType::Connected,
        }
    }
}

impl DeviceState {
    /// Returns a copy with `charging` set.
    #[must_use]
    pub fn with_charging(mut self, charging: bool) -> Self {
        self.charging = charging;
        self
    }
}

/// Boolean preconditions a task requires before it may run.
///
/// # Examples
///
/// ```
/// use taskchain::{ConstraintKind, Constraints, DeviceState};
///
/// let constraints = Constraints::default().with_requires_charging(true);
///
/// let unplugged = DeviceState::default();
/// assert!(!constraints.is_satisfied_by(&unplugged));
/// assert_eq!(constraints.unmet(&unplugged), vec![ConstraintKind::Charging]);
///
/// let plugged = unplugged.with_charging(true);
/// assert!(constraints.is_satisfied_by(&plugged));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Constraints {
    /// Run only while charging.
    pub requires_charging: bool,
    /// Run only while the battery is not low.
    pub requires_battery_not_low: bool,
    /// Run only while storage is not low.
    pub requires_storage_not_low: bool,
    /// Run only while the device is idle.
    pub requires_device_idle: bool,
    /// Network the task needs.
    pub required_network: NetworkType,
}

impl Constraints {
    /// No constraints: always satisfied.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the charging requirement.
    #[must_use]
    pub fn with_requires_charging(mut self, required: bool) -> Self {
        self.requires_charging = required;
        self
    }

    /// Sets the battery-not-low requirement.
    #[must_use]
    pub fn with_requires_battery_not_low(mut self, required: bool) -> Self {
        self.requires_battery_not_low = required;
        self
    }

    /// Sets the storage-not-low requirement.
    #[must_use]
    pub fn with_requires_storage_not_low(mut self, required: bool) -> Self {
        self.requires_storage_not_low = required;
        self
    }

    /// Sets the device-idle requirement.
    #[must_use]
    pub fn with_requires_device_idle(mut self, required: bool) -> Self {
        self.requires_device_idle = required;
        self
    }

    /// Sets the network requirement.
    #[must_use]
    pub fn with_required_network(mut self, network: NetworkType) -> Self {
        self.required_network = network;
        self
    }

    /// Returns `true` if no precondition is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `true` if every precondition holds in `state`.
    pub fn is_satisfied_by(&self, state: &DeviceState) -> bool {
        self.unmet(state).is_empty()
    }

    /// Lists the preconditions that do not hold in `state`.
    pub fn unmet(&self, state: &DeviceState) -> Vec<ConstraintKind> {
        let mut unmet = Vec::new();
        if self.requires_charging && !state.charging {
            unmet.push(ConstraintKind::Charging);
        }
        if self.requires_battery_not_low && state.battery_low {
            unmet.push(ConstraintKind::BatteryNotLow);
        }
        if self.requires_storage_not_low && state.storage_low {
            unmet.push(ConstraintKind::StorageNotLow);
        }
        if self.requires_device_idle && !state.idle {
            unmet.push(ConstraintKind::DeviceIdle);
        }
        let network_ok = match self.required_network {
            NetworkType::NotRequired => true,
            NetworkType::Connected => state.network != NetworkType::NotRequired,
            NetworkType::Unmetered => state.network == NetworkType::Unmetered,
        };
        if !network_ok {
            unmet.push(ConstraintKind::Network);
        }
        unmet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_constraints_always_hold() {
        let constraints = Constraints::none();
        assert!(constraints.is_empty());
        assert!(constraints.is_satisfied_by(&DeviceState::default()));
    }

    #[test]
    fn every_unmet_precondition_is_reported() {
        let constraints = Constraints::none()
            .with_requires_charging(true)
            .with_requires_battery_not_low(true)
            .with_requires_storage_not_low(true)
            .with_requires_device_idle(true);
        let state = DeviceState {
            charging: false,
            battery_low: true,
            storage_low: true,
            idle: false,
            network: NetworkType::Connected,
        };
        assert_eq!(
            constraints.unmet(&state),
            vec![
                ConstraintKind::Charging,
                ConstraintKind::BatteryNotLow,
                ConstraintKind::StorageNotLow,
                ConstraintKind::DeviceIdle,
            ]
        );
    }

    #[test]
    fn network_requirements() {
        let offline = DeviceState {
            network: NetworkType::NotRequired,
            ..DeviceState::default()
        };
        let metered = DeviceState::default();
        let unmetered = DeviceState {
            network: NetworkType::Unmetered,
            ..DeviceState::default()
        };

        let connected = Constraints::none().with_required_network(NetworkType::Connected);
        assert!(!connected.is_satisfied_by(&offline));
        assert!(connected.is_satisfied_by(&metered));

        let wifi = Constraints::none().with_required_network(NetworkType::Unmetered);
        assert!(!wifi.is_satisfied_by(&metered));
        assert!(wifi.is_satisfied_by(&unmetered));
    }

    #[test]
    fn constraints_deserialize_with_defaults() {
        let constraints: Constraints =
            serde_json::from_str(r#"{"requires_charging": true}"#).unwrap();
        assert!(constraints.requires_charging);
        assert_eq!(constraints.required_network, NetworkType::NotRequired);
    }
}
