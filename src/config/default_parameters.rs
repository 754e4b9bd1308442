use super::{ParameterName, ParameterSpec};

fn spec(
    address: &str,
    name: ParameterName,
    device_class: &str,
    state_class: &str,
    unit: &str,
    additional_data: Option<&str>,
    entity_name: Option<&str>,
    response_idx: Option<usize>,
) -> ParameterSpec {
    ParameterSpec {
        address: address.to_string(),
        name,
        device_class: device_class.to_string(),
        state_class: Some(state_class.to_string()),
        unit: Some(unit.to_string()),
        additional_data: additional_data.map(str::to_string),
        entity_name: entity_name.map(str::to_string),
        response_idx,
        entity_category: None,
    }
}

fn single(name: &str) -> ParameterName {
    ParameterName::Single(name.to_string())
}

fn per_phase(base: &str) -> ParameterName {
    ParameterName::PerValue(vec![
        format!("{base}, phase A"),
        format!("{base}, phase B"),
        format!("{base}, phase C"),
    ])
}

/// Built-in parameter set for CE301/CE303 meters, prepended to the
/// user-configured list when `general.include_default_parameters` is set.
pub fn default_parameters() -> Vec<ParameterSpec> {
    vec![
        spec(
            "ET0PE",
            single("Cumulative energy"),
            "energy",
            "total_increasing",
            "kWh",
            None,
            None,
            Some(0),
        ),
        spec(
            "ECMPE",
            single("Monthly energy"),
            "energy",
            "total",
            "kWh",
            None,
            None,
            Some(0),
        ),
        spec(
            "ENMPE",
            single("Cumulative energy, previous month"),
            "energy",
            "total_increasing",
            "kWh",
            Some("{{ energomera_prev_month }}"),
            Some("ENMPE_PREV_MONTH"),
            Some(0),
        ),
        spec(
            "EAMPE",
            single("Previous month energy"),
            "energy",
            "total",
            "kWh",
            Some("{{ energomera_prev_month }}"),
            Some("ECMPE_PREV_MONTH"),
            Some(0),
        ),
        spec(
            "ECDPE",
            single("Daily energy"),
            "energy",
            "total",
            "kWh",
            None,
            None,
            Some(0),
        ),
        spec(
            "POWPP",
            per_phase("Active energy"),
            "power",
            "measurement",
            "kW",
            None,
            None,
            None,
        ),
        spec(
            "POWEP",
            single("Active energy"),
            "power",
            "measurement",
            "kW",
            None,
            None,
            None,
        ),
        spec(
            "VOLTA",
            per_phase("Voltage"),
            "voltage",
            "measurement",
            "V",
            None,
            None,
            None,
        ),
        spec(
            "VNULL",
            single("Neutral voltage"),
            "voltage",
            "measurement",
            "V",
            None,
            None,
            None,
        ),
        spec(
            "CURRE",
            per_phase("Current"),
            "current",
            "measurement",
            "A",
            None,
            None,
            None,
        ),
        spec(
            "FREQU",
            single("Frequency"),
            "frequency",
            "measurement",
            "Hz",
            None,
            None,
            None,
        ),
    ]
}
