use std::collections::BTreeMap;

use log::{debug, info, warn};

use tetra_protocol::DeviceId;

use crate::config::DeviceConfig;

/// Match configured devices to serial ports.
///
/// Devices with a fixed port keep it. The remaining devices are found by
/// asking every other port for its terminal's ISSI through `identify` and
/// comparing against the configured ISSI. Devices that cannot be matched are
/// left out with a warning.
pub fn assign_ports<F>(
    devices: &[DeviceConfig],
    candidates: &[String],
    mut identify: F,
) -> BTreeMap<DeviceId, String>
where
    F: FnMut(&str) -> tetra_protocol::Result<String>,
{
    let mut assigned: BTreeMap<DeviceId, String> = devices
        .iter()
        .filter_map(|d| d.port.clone().map(|port| (d.id, port)))
        .collect();

    let mut wanted: Vec<(DeviceId, &str)> = devices
        .iter()
        .filter(|d| d.port.is_none())
        .filter_map(|d| d.issi.as_deref().map(|issi| (d.id, last_digits(issi))))
        .collect();

    for port in candidates {
        if wanted.is_empty() {
            break;
        }
        if assigned.values().any(|p| p == port) {
            continue;
        }
        let issi = match identify(port) {
            Ok(issi) => issi,
            Err(e) => {
                debug!("{port}: no terminal answered ({e})");
                continue;
            }
        };
        match wanted.iter().position(|(_, want)| *want == issi) {
            Some(index) => {
                let (device, _) = wanted.remove(index);
                info!("device {device} (ISSI {issi}) found on {port}");
                assigned.insert(device, port.clone());
            }
            None => debug!("{port}: ISSI {issi} is not configured"),
        }
    }

    for (device, issi) in wanted {
        warn!("device {device}: no port answered with ISSI {issi}");
    }
    assigned
}

fn last_digits(issi: &str) -> &str {
    let issi = issi.trim();
    let start = issi
        .char_indices()
        .rev()
        .nth(6)
        .map_or(0, |(index, _)| index);
    &issi[start..]
}

#[cfg(test)]
mod tests {
    use tetra_protocol::{AckMode, TetraError};

    use super::*;

    fn device(id: u8, port: Option<&str>, issi: Option<&str>) -> DeviceConfig {
        DeviceConfig {
            id: DeviceId(id),
            port: port.map(str::to_string),
            issi: issi.map(str::to_string),
            ack: AckMode::None,
            init: false,
            init_commands: Vec::new(),
            tnp1_profiles: false,
            poll_signal: false,
            poll_gps: false,
        }
    }

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fixed_ports_are_kept() {
        let devices = [device(1, Some("/dev/ttyUSB0"), None)];
        let assigned = assign_ports(&devices, &ports(&["/dev/ttyUSB0"]), |_| {
            panic!("fixed ports are not identified")
        });
        assert_eq!(assigned[&DeviceId(1)], "/dev/ttyUSB0");
    }

    #[test]
    fn test_devices_found_by_issi() {
        let devices = [
            device(1, Some("/dev/ttyUSB0"), None),
            device(2, None, Some("2621234567")),
            device(3, None, Some("7654321")),
        ];
        let mut asked = Vec::new();
        let assigned = assign_ports(
            &devices,
            &ports(&["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2", "/dev/ttyUSB3"]),
            |port| {
                asked.push(port.to_string());
                match port {
                    "/dev/ttyUSB1" => Ok("7654321".to_string()),
                    "/dev/ttyUSB2" => Err(TetraError::Timeout),
                    _ => Ok("1234567".to_string()),
                }
            },
        );
        assert_eq!(assigned[&DeviceId(2)], "/dev/ttyUSB3");
        assert_eq!(assigned[&DeviceId(3)], "/dev/ttyUSB1");
        assert_eq!(asked, ports(&["/dev/ttyUSB1", "/dev/ttyUSB2", "/dev/ttyUSB3"]));
    }

    #[test]
    fn test_unmatched_device_is_left_out() {
        let devices = [device(1, None, Some("1111111"))];
        let assigned = assign_ports(&devices, &ports(&["/dev/ttyUSB0"]), |_| {
            Ok("2222222".to_string())
        });
        assert!(assigned.is_empty());
    }

    #[test]
    fn test_probing_stops_once_all_found() {
        let devices = [device(1, None, Some("1111111"))];
        let mut calls = 0;
        let assigned = assign_ports(&devices, &ports(&["a", "b", "c"]), |_| {
            calls += 1;
            Ok("1111111".to_string())
        });
        assert_eq!(assigned[&DeviceId(1)], "a");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_last_digits() {
        assert_eq!(last_digits(" 2621234567 "), "1234567");
        assert_eq!(last_digits("123"), "123");
        assert_eq!(last_digits("1\u{e4}234567"), "\u{e4}234567");
    }
}
