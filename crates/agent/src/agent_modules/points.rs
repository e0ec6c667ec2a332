use crate::agent_modules::tracker::UpdateTracker;
use chrono::{DateTime, Utc};
use envflux_common::{CtMeterReading, InverterReading, Record, Snapshot, SystemReading};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const INVERTER_MEASUREMENT: &str = "inverters";

fn ctmeter_record(
    measurement: &str,
    reading: &CtMeterReading,
    phase: Option<&str>,
) -> Option<Record> {
    let Some(timestamp) = DateTime::<Utc>::from_timestamp(reading.timestamp, 0) else {
        warn!(
            eid = reading.eid,
            timestamp = reading.timestamp,
            "CT meter timestamp out of range, skipping."
        );
        return None;
    };
    let mut record = Record::new(measurement, timestamp)
        .tag("eid", reading.eid.to_string())
        .field("energy_delivered", reading.energy_delivered)
        .field("energy_received", reading.energy_received)
        .field("active_power", reading.active_power)
        .field("power_factor", reading.power_factor)
        .field("voltage", reading.voltage)
        .field("current", reading.current)
        .field("frequency", reading.frequency);
    if let Some(phase) = phase {
        record = record.tag("phase", phase);
    }
    Some(record)
}

fn system_record(
    measurement: &str,
    reading: &SystemReading,
    phase: Option<&str>,
    received_at: DateTime<Utc>,
) -> Record {
    let mut record = Record::new(measurement, received_at)
        .field("watt_hours_lifetime", reading.watt_hours_lifetime)
        .field("watt_hours_last_7_days", reading.watt_hours_last_7_days)
        .field("watt_hours_today", reading.watt_hours_today)
        .field("watts_now", reading.watts_now);
    if let Some(phase) = phase {
        record = record.tag("phase", phase);
    }
    record
}

fn inverter_record(reading: &InverterReading) -> Option<Record> {
    let Some(timestamp) = DateTime::<Utc>::from_timestamp(reading.last_report_date, 0) else {
        warn!(
            serial_number = %reading.serial_number,
            last_report_date = reading.last_report_date,
            "Inverter report date out of range, skipping."
        );
        return None;
    };
    Some(
        Record::new(INVERTER_MEASUREMENT, timestamp)
            .tag("serial_number", reading.serial_number.as_str())
            .field("last_report_watts", reading.last_report_watts)
            .field("max_report_watts", reading.max_report_watts)
            .optional_field("dc_voltage", reading.dc_voltage)
            .optional_field("dc_current", reading.dc_current)
            .optional_field("ac_voltage", reading.ac_voltage)
            .optional_field("ac_current", reading.ac_current)
            .optional_field("ac_frequency", reading.ac_frequency)
            .optional_field("temperature", reading.temperature)
            .optional_field("lifetime_energy", reading.lifetime_energy)
            .optional_field("energy_produced", reading.energy_produced)
            .optional_field("energy_today", reading.energy_today)
            .optional_field("last_report_duration", reading.last_report_duration),
    )
}

/// Maps a snapshot onto records. CT meters and inverters carry their own
/// report time; site totals are stamped with `received_at`. Inverters are
/// emitted only when `tracker` has not seen that report yet.
pub fn generate_records(
    snapshot: &Snapshot,
    tracker: &UpdateTracker,
    received_at: DateTime<Utc>,
) -> Vec<Record> {
    let mut records = Vec::new();

    let meters: [(&str, &Option<CtMeterReading>); 2] = [
        ("ctmeter_consumption", &snapshot.ctmeter_consumption),
        ("ctmeter_production", &snapshot.ctmeter_production),
    ];
    for (measurement, reading) in meters {
        if let Some(reading) = reading {
            records.extend(ctmeter_record(measurement, reading, None));
        }
    }

    let phased_meters: [(&str, &BTreeMap<String, CtMeterReading>); 2] = [
        ("ctmeter_consumption_phases", &snapshot.ctmeter_consumption_phases),
        ("ctmeter_production_phases", &snapshot.ctmeter_production_phases),
    ];
    for (measurement, phases) in phased_meters {
        for (phase, reading) in phases {
            records.extend(ctmeter_record(measurement, reading, Some(phase.as_str())));
        }
    }

    let totals: [(&str, &Option<SystemReading>); 3] = [
        ("system_consumption", &snapshot.system_consumption),
        ("system_production", &snapshot.system_production),
        ("system_net_consumption", &snapshot.system_net_consumption),
    ];
    for (measurement, reading) in totals {
        if let Some(reading) = reading {
            records.push(system_record(measurement, reading, None, received_at));
        }
    }

    let phased: [(&str, &BTreeMap<String, SystemReading>); 3] = [
        ("system_consumption_phases", &snapshot.system_consumption_phases),
        ("system_production_phases", &snapshot.system_production_phases),
        ("system_net_consumption_phases", &snapshot.system_net_consumption_phases),
    ];
    for (measurement, phases) in phased {
        for (phase, reading) in phases {
            records.push(system_record(measurement, reading, Some(phase.as_str()), received_at));
        }
    }

    let mut reported_new_data = Vec::new();
    for reading in snapshot.inverters.values() {
        let previously_seen = tracker.has_seen(&reading.serial_number);
        // Only a report that can actually be written may advance the tracker.
        let Some(record) = inverter_record(reading) else {
            continue;
        };
        if !tracker.should_update(&reading.serial_number, reading.last_report_date) {
            continue;
        }
        records.push(record);
        if previously_seen {
            reported_new_data.push(reading.serial_number.as_str());
        }
    }
    if !reported_new_data.is_empty() {
        info!(inverters = %reported_new_data.join(", "), "Inverters reported new data.");
    }

    // A line without fields is rejected by the whole write.
    let before = records.len();
    records.retain(|record| !record.fields().is_empty());
    if records.len() < before {
        debug!(dropped = before - records.len(), "Dropped records without usable fields.");
    }

    records
}
