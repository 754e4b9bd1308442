//! Scripted meter client for exercising the session and scheduler without a
//! serial port.

use super::client::{ClientError, MeterClient};
use crate::config::{ParameterName, ParameterSpec};
use crate::resolver::ResolvedRequest;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};

pub fn request_for(address: &str, additional_data: Option<&str>) -> ResolvedRequest {
    ResolvedRequest {
        spec: ParameterSpec {
            address: address.to_string(),
            name: ParameterName::Single(address.to_string()),
            device_class: "energy".to_string(),
            state_class: Some("total".to_string()),
            unit: Some("kWh".to_string()),
            additional_data: additional_data.map(str::to_string),
            entity_name: None,
            response_idx: None,
            entity_category: None,
        },
        additional_data: additional_data.map(str::to_string),
    }
}

pub struct ScriptedClient {
    /// Queued responses per address; when a queue runs dry the default
    /// response is served.
    responses: HashMap<String, VecDeque<Result<Vec<String>, ClientError>>>,
    /// Cycles for which `handshake` still fails.
    handshake_failures: usize,
    /// Cycles for which `authenticate` still fails.
    auth_failures: usize,
    pub opens: usize,
    /// Ordered trace of client calls, e.g. `open`, `request ET0PE(02.23)`.
    pub log: Vec<String>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        ScriptedClient {
            responses: HashMap::new(),
            handshake_failures: 0,
            auth_failures: 0,
            opens: 0,
            log: Vec::new(),
        }
    }

    pub fn with_response(mut self, address: &str, response: Result<Vec<String>, ClientError>) -> Self {
        self.responses
            .entry(address.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn failing_handshake(mut self) -> Self {
        self.handshake_failures = usize::MAX;
        self
    }

    pub fn failing_auth(mut self) -> Self {
        self.auth_failures = usize::MAX;
        self
    }

    pub fn failing_auth_once(mut self) -> Self {
        self.auth_failures = 1;
        self
    }
}

#[async_trait]
impl MeterClient for ScriptedClient {
    async fn open(&mut self) -> Result<(), ClientError> {
        self.opens += 1;
        self.log.push("open".to_string());
        Ok(())
    }

    async fn handshake(&mut self) -> Result<String, ClientError> {
        self.log.push("handshake".to_string());
        if self.handshake_failures > 0 {
            self.handshake_failures = self.handshake_failures.saturating_sub(1);
            return Err(ClientError::Timeout);
        }
        Ok("/EKT5CE301v12".to_string())
    }

    async fn authenticate(&mut self, _password: &str) -> Result<(), ClientError> {
        self.log.push("authenticate".to_string());
        if self.auth_failures > 0 {
            self.auth_failures = self.auth_failures.saturating_sub(1);
            return Err(ClientError::AuthRejected);
        }
        Ok(())
    }

    async fn request(
        &mut self,
        address: &str,
        additional_data: Option<&str>,
    ) -> Result<Vec<String>, ClientError> {
        self.log.push(format!(
            "request {}({})",
            address,
            additional_data.unwrap_or("")
        ));

        if let Some(queue) = self.responses.get_mut(address) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }

        if address == "HELLO" {
            return Ok(vec!["2,CE301,12.02,00123456,57".to_string()]);
        }
        Ok(vec!["0.0".to_string()])
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.log.push("close".to_string());
        Ok(())
    }
}
