use std::sync::OnceLock;

use crate::metadata::SensorInfo;

/// A configured camera endpoint.
///
/// Identity and address never change after construction. The sensor identity
/// is learned from the first valid metadata and kept for the endpoint's
/// lifetime.
#[derive(Debug)]
pub struct Endpoint {
    id: String,
    address: String,
    rotate_180: bool,
    sensor: OnceLock<SensorInfo>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            rotate_180: false,
            sensor: OnceLock::new(),
        }
    }

    /// Mark the endpoint as physically mounted upside down.
    pub fn with_rotate_180(mut self, rotate: bool) -> Self {
        self.rotate_180 = rotate;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `host:port` of the endpoint node.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn rotate_180(&self) -> bool {
        self.rotate_180
    }

    /// Sensor identity, once an endpoint has reported it.
    pub fn sensor_info(&self) -> Option<&SensorInfo> {
        self.sensor.get()
    }

    /// Memoize the sensor identity. A later report that disagrees is logged
    /// and ignored.
    pub(crate) fn remember_sensor(&self, info: SensorInfo) {
        let stored = self.sensor.get_or_init(|| {
            tracing::info!(endpoint = %self.id, sensor = %info, "sensor identified");
            info
        });
        if *stored != info {
            tracing::warn!(
                endpoint = %self.id,
                known = %stored,
                reported = %info,
                "endpoint reported different sensor geometry; keeping first"
            );
        }
    }
}
