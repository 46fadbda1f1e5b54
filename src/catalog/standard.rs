//! Standard OBD2 mode-01 sensors.

use crate::storage::NewSensor;

/// The built-in catalog loaded by `--seed-catalog`.
pub fn standard_sensors() -> Vec<NewSensor> {
    vec![
        NewSensor::new("0x04", "Calculated Engine Load", "%")
            .with_formula("A * 100 / 255", 1)
            .with_bounds(0.0, 100.0),
        NewSensor::new("0x05", "Engine Coolant Temperature", "°C")
            .with_formula("A - 40", 1)
            .with_bounds(-40.0, 215.0),
        NewSensor::new("0x06", "Short Term Fuel Trim Bank 1", "%")
            .with_formula("(A - 128) * 100 / 128", 1)
            .with_bounds(-100.0, 99.2),
        NewSensor::new("0x07", "Long Term Fuel Trim Bank 1", "%")
            .with_formula("(A - 128) * 100 / 128", 1)
            .with_bounds(-100.0, 99.2),
        NewSensor::new("0x08", "Short Term Fuel Trim Bank 2", "%")
            .with_formula("(A - 128) * 100 / 128", 1)
            .with_bounds(-100.0, 99.2),
        NewSensor::new("0x09", "Long Term Fuel Trim Bank 2", "%")
            .with_formula("(A - 128) * 100 / 128", 1)
            .with_bounds(-100.0, 99.2),
        NewSensor::new("0x0A", "Fuel Pressure", "kPa")
            .with_formula("A * 3", 1)
            .with_bounds(0.0, 765.0),
        NewSensor::new("0x0B", "Intake Manifold Absolute Pressure", "kPa").with_bounds(0.0, 255.0),
        NewSensor::new("0x0C", "Engine RPM", "RPM")
            .with_formula("((A * 256) + B) / 4", 2)
            .with_bounds(0.0, 16383.75),
        NewSensor::new("0x0D", "Vehicle Speed", "km/h").with_bounds(0.0, 255.0),
        NewSensor::new("0x0E", "Timing Advance", "° before TDC")
            .with_formula("(A - 128) / 2", 1)
            .with_bounds(-64.0, 63.5),
        NewSensor::new("0x0F", "Intake Air Temperature", "°C")
            .with_formula("A - 40", 1)
            .with_bounds(-40.0, 215.0),
        NewSensor::new("0x10", "MAF Air Flow Rate", "g/s")
            .with_formula("((A * 256) + B) / 100", 2)
            .with_bounds(0.0, 655.35),
        NewSensor::new("0x11", "Throttle Position", "%")
            .with_formula("A * 100 / 255", 1)
            .with_bounds(0.0, 100.0),
        NewSensor::new("0x14", "Oxygen Sensor 1 Voltage", "V")
            .with_formula("A / 200", 1)
            .with_bounds(0.0, 1.275),
        NewSensor::new("0x15", "Oxygen Sensor 2 Voltage", "V")
            .with_formula("A / 200", 1)
            .with_bounds(0.0, 1.275),
        NewSensor::new("0x1F", "Run Time Since Engine Start", "s")
            .with_formula("(A * 256) + B", 2)
            .with_bounds(0.0, 65535.0),
        NewSensor::new("0x2F", "Fuel Tank Level Input", "%")
            .with_formula("A * 100 / 255", 1)
            .with_bounds(0.0, 100.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Formula;
    use std::collections::HashSet;

    #[test]
    fn test_standard_formulas_parse() {
        for sensor in standard_sensors() {
            if let Some(formula) = &sensor.calculation_formula {
                assert!(Formula::parse(formula).is_ok(), "{} failed: {}", sensor.pid, formula);
            }
        }
    }

    #[test]
    fn test_pids_unique() {
        let sensors = standard_sensors();
        let pids: HashSet<&str> = sensors.iter().map(|s| s.pid.as_str()).collect();
        assert_eq!(pids.len(), sensors.len());
    }

    #[test]
    fn test_two_byte_sensors() {
        let two_byte: Vec<String> = standard_sensors()
            .into_iter()
            .filter(|s| s.data_bytes == 2)
            .map(|s| s.pid)
            .collect();
        assert_eq!(two_byte, vec!["0x0C", "0x10", "0x1F"]);
    }
}
