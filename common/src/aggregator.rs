use crate::types::{SensorReading, DISCONNECTED_C};

/// A bus of temperature probes addressed by index.
pub trait TemperatureBus {
    /// Starts a conversion on every probe and refreshes the device list.
    fn request_conversion(&mut self);

    fn device_count(&mut self) -> usize;

    /// Last converted value in °C, or [`DISCONNECTED_C`] if the probe did not answer.
    fn temperature_c(&mut self, index: usize) -> f32;
}

pub fn read<B: TemperatureBus + ?Sized>(bus: &mut B) -> SensorReading {
    bus.request_conversion();
    let sensor_count = bus.device_count();

    let coldest = (0..sensor_count)
        .map(|index| bus.temperature_c(index))
        .filter(|value| is_valid_probe_value(*value))
        .reduce(f32::min);

    match coldest {
        Some(temperature_c) => SensorReading {
            temperature_c,
            sensor_count,
        },
        None => SensorReading::invalid(sensor_count),
    }
}

fn is_valid_probe_value(value: f32) -> bool {
    value.is_finite() && value != DISCONNECTED_C
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBus;
    use crate::types::INVALID_READING_C;

    #[test]
    fn minimum_ignores_disconnected_probes() {
        let mut bus = FakeBus::new(&[21.5, DISCONNECTED_C, 19.2]);
        let reading = read(&mut bus);

        assert_eq!(reading.temperature_c, 19.2);
        assert_eq!(reading.sensor_count, 3);
        assert_eq!(bus.conversions, 1);
    }

    #[test]
    fn negative_readings_win() {
        let mut bus = FakeBus::new(&[-3.25, 4.0]);
        assert_eq!(read(&mut bus).temperature_c, -3.25);
    }

    #[test]
    fn empty_bus_is_invalid() {
        let mut bus = FakeBus::new(&[]);
        let reading = read(&mut bus);

        assert_eq!(reading.temperature_c, INVALID_READING_C);
        assert_eq!(reading.sensor_count, 0);
        assert!(!reading.is_valid());
    }

    #[test]
    fn all_disconnected_is_invalid() {
        let mut bus = FakeBus::new(&[DISCONNECTED_C, DISCONNECTED_C]);
        let reading = read(&mut bus);

        assert_eq!(reading.temperature_c, INVALID_READING_C);
        assert_eq!(reading.sensor_count, 2);
    }

    #[test]
    fn non_finite_values_are_discarded() {
        let mut bus = FakeBus::new(&[f32::NAN, 12.0]);
        assert_eq!(read(&mut bus).temperature_c, 12.0);
    }
}
