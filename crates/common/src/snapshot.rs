use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whole-site energy totals for one measurement type (production, consumption or net).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SystemReading {
    pub watt_hours_lifetime: i64,
    pub watt_hours_last_7_days: i64,
    pub watt_hours_today: i64,
    pub watts_now: i64,
}

/// One CT meter (or one of its phase channels) at the meter's own reading time.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CtMeterReading {
    pub eid: i64,
    /// Epoch seconds.
    pub timestamp: i64,
    /// Wh.
    pub energy_delivered: f64,
    /// Wh.
    pub energy_received: f64,
    /// W.
    pub active_power: f64,
    pub power_factor: f64,
    pub voltage: f64,
    pub current: f64,
    pub frequency: f64,
}

/// Latest report of a single micro-inverter.
///
/// The optional electrical detail comes from the device-data endpoint, which
/// older firmware does not serve.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InverterReading {
    pub serial_number: String,
    /// Device-supplied report time, epoch seconds.
    pub last_report_date: i64,
    pub last_report_watts: i64,
    pub max_report_watts: i64,
    pub dc_voltage: Option<f64>,
    pub dc_current: Option<f64>,
    pub ac_voltage: Option<f64>,
    pub ac_current: Option<f64>,
    pub ac_frequency: Option<f64>,
    /// Degrees Celsius.
    pub temperature: Option<f64>,
    /// Wh since commissioning.
    pub lifetime_energy: Option<f64>,
    /// Wh produced during the last report interval.
    pub energy_produced: Option<f64>,
    pub energy_today: Option<f64>,
    /// Seconds covered by the last report.
    pub last_report_duration: Option<i64>,
}

/// One poll's worth of device telemetry.
///
/// Phase maps are keyed by phase name (`L1`, `L2`, `L3`) and are empty on
/// single-phase installations or when the device has no metering.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub system_production: Option<SystemReading>,
    pub system_consumption: Option<SystemReading>,
    pub system_net_consumption: Option<SystemReading>,
    pub system_production_phases: BTreeMap<String, SystemReading>,
    pub system_consumption_phases: BTreeMap<String, SystemReading>,
    pub system_net_consumption_phases: BTreeMap<String, SystemReading>,
    pub ctmeter_production: Option<CtMeterReading>,
    pub ctmeter_consumption: Option<CtMeterReading>,
    pub ctmeter_production_phases: BTreeMap<String, CtMeterReading>,
    pub ctmeter_consumption_phases: BTreeMap<String, CtMeterReading>,
    /// Keyed by serial number.
    pub inverters: BTreeMap<String, InverterReading>,
}
