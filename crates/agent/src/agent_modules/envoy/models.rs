//! Response shapes of the Envoy local API and their conversion into a [`Snapshot`].
use envflux_common::{CtMeterReading, InverterReading, Snapshot, SystemReading};
use serde::Deserialize;
use std::collections::BTreeMap;

const PHASE_NAMES: [&str; 3] = ["L1", "L2", "L3"];

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementLine {
    #[serde(default)]
    pub w_now: f64,
    #[serde(default)]
    pub wh_lifetime: f64,
    #[serde(default)]
    pub wh_today: f64,
    #[serde(default)]
    pub wh_last_seven_days: f64,
}

impl From<&MeasurementLine> for SystemReading {
    fn from(line: &MeasurementLine) -> Self {
        SystemReading {
            watt_hours_lifetime: line.wh_lifetime.round() as i64,
            watt_hours_last_7_days: line.wh_last_seven_days.round() as i64,
            watt_hours_today: line.wh_today.round() as i64,
            watts_now: line.w_now.round() as i64,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    #[serde(rename = "type")]
    pub kind: String,
    pub measurement_type: Option<String>,
    #[serde(default)]
    pub active_count: i64,
    #[serde(flatten)]
    pub totals: MeasurementLine,
    #[serde(default)]
    pub lines: Vec<MeasurementLine>,
}

/// `/production.json?details=1`
#[derive(Deserialize, Debug, Default)]
pub struct ProductionResponse {
    #[serde(default)]
    pub production: Vec<Measurement>,
    #[serde(default)]
    pub consumption: Vec<Measurement>,
}

/// One element of `/api/v1/production/inverters`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InverterEntry {
    pub serial_number: String,
    pub last_report_date: i64,
    #[serde(default)]
    pub last_report_watts: i64,
    #[serde(default)]
    pub max_report_watts: i64,
}

fn phases(measurement: &Measurement) -> BTreeMap<String, SystemReading> {
    if measurement.lines.len() < 2 {
        return BTreeMap::new();
    }
    PHASE_NAMES
        .iter()
        .zip(&measurement.lines)
        .map(|(name, line)| (name.to_string(), SystemReading::from(line)))
        .collect()
}

fn find<'a>(measurements: &'a [Measurement], measurement_type: &str) -> Option<&'a Measurement> {
    measurements.iter().find(|m| {
        m.kind == "eim"
            && m.active_count > 0
            && m.measurement_type.as_deref() == Some(measurement_type)
    })
}

pub fn build_snapshot(production: &ProductionResponse, inverters: &[InverterEntry]) -> Snapshot {
    let mut snapshot = Snapshot::default();

    // Metered production wins; unmetered systems only report the inverter aggregate.
    let production_meter = find(&production.production, "production");
    if let Some(meter) = production_meter {
        snapshot.system_production = Some(SystemReading::from(&meter.totals));
        snapshot.system_production_phases = phases(meter);
    } else if let Some(aggregate) = production.production.iter().find(|m| m.kind == "inverters") {
        snapshot.system_production = Some(SystemReading::from(&aggregate.totals));
    }

    if let Some(meter) = find(&production.consumption, "total-consumption") {
        snapshot.system_consumption = Some(SystemReading::from(&meter.totals));
        snapshot.system_consumption_phases = phases(meter);
    }
    if let Some(meter) = find(&production.consumption, "net-consumption") {
        snapshot.system_net_consumption = Some(SystemReading::from(&meter.totals));
        snapshot.system_net_consumption_phases = phases(meter);
    }

    snapshot.inverters = inverters
        .iter()
        .map(|entry| {
            (
                entry.serial_number.clone(),
                InverterReading {
                    serial_number: entry.serial_number.clone(),
                    last_report_date: entry.last_report_date,
                    last_report_watts: entry.last_report_watts,
                    max_report_watts: entry.max_report_watts,
                    ..Default::default()
                },
            )
        })
        .collect();

    snapshot
}

/// One element of `/ivp/meters`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MeterConfig {
    pub eid: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub measurement_type: String,
    #[serde(default)]
    pub phase_count: usize,
}

/// A meter total or one of its phase channels in `/ivp/meters/readings`.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct MeterChannel {
    pub eid: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "actEnergyDlvd", default)]
    pub energy_delivered: f64,
    #[serde(rename = "actEnergyRcvd", default)]
    pub energy_received: f64,
    #[serde(rename = "activePower", default)]
    pub active_power: f64,
    #[serde(rename = "pwrFactor", default)]
    pub power_factor: f64,
    #[serde(default)]
    pub voltage: f64,
    #[serde(default)]
    pub current: f64,
    #[serde(rename = "freq", default)]
    pub frequency: f64,
}

impl From<&MeterChannel> for CtMeterReading {
    fn from(channel: &MeterChannel) -> Self {
        CtMeterReading {
            eid: channel.eid,
            timestamp: channel.timestamp,
            energy_delivered: channel.energy_delivered,
            energy_received: channel.energy_received,
            active_power: channel.active_power,
            power_factor: channel.power_factor,
            voltage: channel.voltage,
            current: channel.current,
            frequency: channel.frequency,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MeterReadingEntry {
    #[serde(flatten)]
    pub totals: MeterChannel,
    #[serde(default)]
    pub channels: Vec<MeterChannel>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct LastReading {
    #[serde(rename = "acVoltageINmV")]
    pub ac_voltage_millivolts: Option<f64>,
    #[serde(rename = "acCurrentInmA")]
    pub ac_current_milliamps: Option<f64>,
    #[serde(rename = "acFrequencyINmHz")]
    pub ac_frequency_millihertz: Option<f64>,
    #[serde(rename = "dcVoltageINmV")]
    pub dc_voltage_millivolts: Option<f64>,
    #[serde(rename = "dcCurrentINmA")]
    pub dc_current_milliamps: Option<f64>,
    #[serde(rename = "channelTemp")]
    pub temperature: Option<f64>,
    #[serde(rename = "joulesProduced")]
    pub joules_produced: Option<f64>,
    pub duration: Option<i64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct LifetimeReading {
    #[serde(rename = "joulesProduced")]
    pub joules_produced: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceChannel {
    pub last_reading: Option<LastReading>,
    pub lifetime: Option<LifetimeReading>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    #[serde(default)]
    pub dev_name: String,
    #[serde(default)]
    pub sn: String,
    #[serde(default)]
    pub channels: Vec<DeviceChannel>,
}

/// Values of `/ivp/pdm/device_data`. Device objects sit next to counters
/// such as `deviceCount`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum DeviceDataItem {
    Device(DeviceEntry),
    Other(serde_json::Value),
}

pub type DeviceDataResponse = BTreeMap<String, DeviceDataItem>;

const MICRO_INVERTER_DEVICE: &str = "pcu";
const JOULES_PER_WATT_HOUR: f64 = 3600.0;

fn milli(value: Option<f64>) -> Option<f64> {
    value.map(|v| v / 1000.0)
}

fn watt_hours(joules: Option<f64>) -> Option<f64> {
    joules.map(|j| j / JOULES_PER_WATT_HOUR)
}

fn meter_phases(
    meter: &MeterConfig,
    entry: &MeterReadingEntry,
) -> BTreeMap<String, CtMeterReading> {
    if meter.phase_count < 2 {
        return BTreeMap::new();
    }
    PHASE_NAMES
        .iter()
        .zip(entry.channels.iter().take(meter.phase_count))
        .map(|(name, channel)| (name.to_string(), CtMeterReading::from(channel)))
        .collect()
}

/// Fills the CT-meter part of `snapshot` from enabled meters and their readings.
pub fn apply_meter_readings(
    snapshot: &mut Snapshot,
    meters: &[MeterConfig],
    readings: &[MeterReadingEntry],
) {
    for meter in meters.iter().filter(|m| m.state == "enabled") {
        let Some(entry) = readings.iter().find(|r| r.totals.eid == meter.eid) else {
            continue;
        };
        let (total, phases) = match meter.measurement_type.as_str() {
            "production" => (
                &mut snapshot.ctmeter_production,
                &mut snapshot.ctmeter_production_phases,
            ),
            "net-consumption" | "total-consumption" => (
                &mut snapshot.ctmeter_consumption,
                &mut snapshot.ctmeter_consumption_phases,
            ),
            _ => continue,
        };
        if total.is_none() {
            *total = Some(CtMeterReading::from(&entry.totals));
            *phases = meter_phases(meter, entry);
        }
    }
}

/// Adds electrical detail from the device-data endpoint to inverters already
/// in `snapshot`. Unknown serial numbers are ignored.
pub fn apply_device_data(snapshot: &mut Snapshot, device_data: &DeviceDataResponse) {
    let devices = device_data.values().filter_map(|item| match item {
        DeviceDataItem::Device(device) if device.dev_name == MICRO_INVERTER_DEVICE => Some(device),
        _ => None,
    });
    for device in devices {
        let Some(inverter) = snapshot.inverters.get_mut(&device.sn) else {
            continue;
        };
        let Some(channel) = device.channels.first() else {
            continue;
        };
        if let Some(last) = &channel.last_reading {
            inverter.dc_voltage = milli(last.dc_voltage_millivolts);
            inverter.dc_current = milli(last.dc_current_milliamps);
            inverter.ac_voltage = milli(last.ac_voltage_millivolts);
            inverter.ac_current = milli(last.ac_current_milliamps);
            inverter.ac_frequency = milli(last.ac_frequency_millihertz);
            inverter.temperature = last.temperature;
            inverter.energy_produced = watt_hours(last.joules_produced);
            inverter.last_report_duration = last.duration;
        }
        if let Some(lifetime) = &channel.lifetime {
            inverter.lifetime_energy = watt_hours(lifetime.joules_produced);
        }
    }
}

/// Extracts the `<sn>` element from the `/info` XML document.
pub fn parse_serial(info_xml: &str) -> Option<String> {
    let start = info_xml.find("<sn>")? + "<sn>".len();
    let end = start + info_xml[start..].find("</sn>")?;
    let serial = info_xml[start..end].trim();
    (!serial.is_empty()).then(|| serial.to_string())
}
