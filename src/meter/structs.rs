use super::client::ClientError;
use crate::resolver::ResolvedRequest;
use thiserror::Error;

/// Identification retrieved from the meter at session start. Seeds the
/// Home Assistant device ids, so it has to be known before anything can be
/// published for the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub sw_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    /// Parses the response to the `HELLO` parameter,
    /// `<mode>,<model>,<sw_version>,<serial>,<flags>`.
    pub fn from_hello(value: &str) -> Option<Self> {
        let fields: Vec<&str> = value.split(',').collect();
        match fields.as_slice() {
            [_, model, sw_version, serial_number, _] => Some(DeviceInfo {
                model: model.to_string(),
                sw_version: sw_version.to_string(),
                serial_number: serial_number.to_string(),
            }),
            _ => None,
        }
    }

    pub fn device_id(&self) -> String {
        format!("{}_{}", self.model, self.serial_number)
    }
}

/// Raw value(s) the meter returned for one resolved request. When
/// `response_idx` was configured only the selected value is retained here.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingValue {
    pub request: ResolvedRequest,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestFailure {
    pub request: ResolvedRequest,
    pub error: ClientError,
}

/// Result of a completed read cycle. Per-request failures are carried
/// alongside the successful readings; they have already been logged by the
/// session.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReadings {
    pub device: DeviceInfo,
    pub readings: Vec<ReadingValue>,
    pub failures: Vec<RequestFailure>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Connection to meter failed: {0}")]
    Connection(String),
    #[error("Authentication with meter failed: {0}")]
    Auth(String),
    #[error("Meter link became unusable: {0}")]
    Link(String),
}

/// Terminal result of one meter session run.
pub type SessionOutcome = Result<CycleReadings, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_parsing() {
        let info = DeviceInfo::from_hello("2,CE301,12.02,00123456,57").unwrap();
        assert_eq!(info.model, "CE301");
        assert_eq!(info.sw_version, "12.02");
        assert_eq!(info.serial_number, "00123456");
        assert_eq!(info.device_id(), "CE301_00123456");
    }

    #[test]
    fn test_malformed_hello_rejected() {
        assert_eq!(DeviceInfo::from_hello("CE301,12.02"), None);
        assert_eq!(DeviceInfo::from_hello(""), None);
    }
}
