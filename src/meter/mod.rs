use log::{debug, error, warn};

pub mod client;
pub mod serial;
pub mod structs;
#[cfg(test)]
pub mod testing;

use crate::config::ParameterName;
use crate::resolver::ResolvedRequest;
use client::{ClientError, MeterClient};
use structs::{CycleReadings, DeviceInfo, ReadingValue, RequestFailure, SessionError, SessionOutcome};

/// Address of the identification pseudo-parameter every supported meter
/// answers with `<mode>,<model>,<sw_version>,<serial>,<flags>`.
const HELLO_ADDRESS: &str = "HELLO";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Identifying,
    Authenticating,
    Reading,
    Closing,
    Done,
    Failed,
}

/// Drives one authenticated read cycle against the meter. The session owns
/// the transport only for the duration of the cycle and never publishes
/// anything - it hands a [`SessionOutcome`] back to the scheduler.
pub struct MeterSession<'a, C: MeterClient> {
    client: &'a mut C,
    password: &'a str,
    state: SessionState,
}

impl<'a, C: MeterClient> MeterSession<'a, C> {
    pub fn new(client: &'a mut C, password: &'a str) -> Self {
        MeterSession {
            client,
            password,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Meter session: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the cycle to completion. The logout/break sequence is attempted
    /// whenever the transport got opened, regardless of how the cycle went.
    pub async fn run(mut self, requests: &[ResolvedRequest]) -> SessionOutcome {
        self.transition(SessionState::Connecting);
        if let Err(e) = self.client.open().await {
            self.transition(SessionState::Failed);
            return Err(SessionError::Connection(e.to_string()));
        }

        let result = self.exchange(requests).await;

        self.transition(SessionState::Closing);
        if let Err(e) = self.client.close().await {
            // The cycle outcome stands on its own; a failed logout only
            // matters for the next session's wake-up.
            debug!("Error closing meter session, ignoring: {e}");
        }

        match &result {
            Ok(_) => self.transition(SessionState::Done),
            Err(_) => self.transition(SessionState::Failed),
        }
        result
    }

    async fn exchange(&mut self, requests: &[ResolvedRequest]) -> SessionOutcome {
        self.transition(SessionState::Identifying);
        let identification = self
            .client
            .handshake()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        debug!("Meter identification: {identification}");

        self.transition(SessionState::Authenticating);
        self.client
            .authenticate(self.password)
            .await
            .map_err(|e| SessionError::Auth(e.to_string()))?;

        let device = self.identify().await?;
        debug!(
            "Connected to meter: model '{}', SW version '{}', serial number '{}'",
            device.model, device.sw_version, device.serial_number
        );

        self.transition(SessionState::Reading);
        let mut readings = Vec::with_capacity(requests.len());
        let mut failures = Vec::new();

        for request in requests {
            match self
                .client
                .request(&request.spec.address, request.additional_data.as_deref())
                .await
            {
                Ok(values) => match select_values(request, values) {
                    Ok(values) => readings.push(ReadingValue {
                        request: request.clone(),
                        values,
                    }),
                    Err(e) => {
                        error!(
                            "Inconsistent response for parameter '{}', skipping it: {}",
                            request.spec.address, e
                        );
                        failures.push(RequestFailure {
                            request: request.clone(),
                            error: e,
                        });
                    }
                },
                Err(e) if e.is_fatal() => {
                    error!(
                        "Meter link failed at parameter '{}', aborting remaining requests: {}",
                        request.spec.address, e
                    );
                    return Err(SessionError::Link(e.to_string()));
                }
                Err(e) => {
                    warn!(
                        "Request for parameter '{}' failed, skipping to next: {}",
                        request.spec.address, e
                    );
                    failures.push(RequestFailure {
                        request: request.clone(),
                        error: e,
                    });
                }
            }
        }

        Ok(CycleReadings {
            device,
            readings,
            failures,
        })
    }

    /// Reads the meter identification. A missing or malformed response means
    /// we cannot derive stable entity ids, so the whole cycle is treated as
    /// a connection failure.
    async fn identify(&mut self) -> Result<DeviceInfo, SessionError> {
        let response = self
            .client
            .request(HELLO_ADDRESS, None)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        response
            .first()
            .and_then(|value| DeviceInfo::from_hello(value))
            .ok_or_else(|| {
                SessionError::Connection(format!(
                    "Malformed identification response: {response:?}"
                ))
            })
    }
}

/// Applies `response_idx` selection and validates multi-value responses
/// against the declared name sequence.
fn select_values(
    request: &ResolvedRequest,
    values: Vec<String>,
) -> Result<Vec<String>, ClientError> {
    if let Some(idx) = request.spec.response_idx {
        return match values.get(idx) {
            Some(value) => Ok(vec![value.clone()]),
            None => Err(ClientError::Protocol(format!(
                "Response has {} value(s), response_idx {} is out of range",
                values.len(),
                idx
            ))),
        };
    }

    if let ParameterName::PerValue(names) = &request.spec.name {
        if names.len() != values.len() {
            return Err(ClientError::Protocol(format!(
                "Response has {} value(s) but {} name(s) are configured",
                values.len(),
                names.len()
            )));
        }
    }

    Ok(values)
}
