//! IEC 62056-21 mode C client for Energomera meters over a serial line.
//!
//! The exchange starts at 300 baud 7E1 with the `/?!` wake sequence, then
//! switches to the baud rate advertised in the identification line and runs
//! the rest of the session in programming mode. Frames carry the Energomera
//! variant of the block check character - an arithmetic sum masked to 7 bits
//! rather than the standard XOR.

use super::client::{ClientError, MeterClient};
use async_trait::async_trait;
use log::{debug, trace};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};

const SOH: u8 = 0x01;
const STX: u8 = 0x02;
const ETX: u8 = 0x03;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;

const INITIAL_BAUD: u32 = 300;
// Sanity cap for inbound frames; real responses are far shorter
const MAX_FRAME: usize = 1024;

pub struct SerialMeterClient {
    port_name: String,
    timeout: Duration,
    stream: Option<SerialStream>,
}

impl SerialMeterClient {
    pub fn new(port_name: &str, timeout: Duration) -> Self {
        SerialMeterClient {
            port_name: port_name.to_string(),
            timeout,
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut SerialStream, ClientError> {
        self.stream
            .as_mut()
            .ok_or_else(|| ClientError::Link("Serial port is not open".to_string()))
    }
}

/// Energomera BCC: arithmetic sum over the frame content (everything after
/// the leading SOH/STX, ETX included) masked to 7 bits.
fn bcc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) & 0x7F
}

fn baud_rate_for(ident_char: u8) -> Option<u32> {
    if ident_char.is_ascii_digit() && ident_char <= b'6' {
        Some(INITIAL_BAUD << (ident_char - b'0'))
    } else {
        None
    }
}

/// Extracts every parenthesized value from a response body, covering both
/// the one-dataset-per-line and repeated-group layouts the meters use.
fn parse_values(body: &[u8]) -> Result<Vec<String>, ClientError> {
    let text = String::from_utf8_lossy(body);
    let mut values = Vec::new();
    let mut current: Option<String> = None;

    for ch in text.chars() {
        match ch {
            '(' => current = Some(String::new()),
            ')' => {
                if let Some(value) = current.take() {
                    values.push(value);
                }
            }
            _ => {
                if let Some(value) = current.as_mut() {
                    value.push(ch);
                }
            }
        }
    }

    if values.is_empty() {
        return Err(ClientError::Protocol(format!(
            "Response contains no values: '{}'",
            text.trim()
        )));
    }
    if values.len() == 1 && values[0].starts_with("ERR") {
        return Err(ClientError::Protocol(format!(
            "Meter returned error code {}",
            values[0]
        )));
    }
    Ok(values)
}

async fn write_all(
    stream: &mut SerialStream,
    data: &[u8],
    dur: Duration,
) -> Result<(), ClientError> {
    trace!("serial >> {:02x?}", data);
    match timeout(dur, async {
        stream.write_all(data).await?;
        stream.flush().await
    })
    .await
    {
        Err(_) => Err(ClientError::Timeout),
        Ok(Err(e)) => Err(ClientError::Link(e.to_string())),
        Ok(Ok(())) => Ok(()),
    }
}

async fn read_byte(stream: &mut SerialStream, dur: Duration) -> Result<u8, ClientError> {
    match timeout(dur, stream.read_u8()).await {
        Err(_) => Err(ClientError::Timeout),
        Ok(Err(e)) => Err(ClientError::Link(e.to_string())),
        Ok(Ok(byte)) => Ok(byte),
    }
}

/// Reads a SOH/STX framed message through its ETX, verifies the BCC and
/// returns the full frame including the leading control byte.
async fn read_frame(stream: &mut SerialStream, dur: Duration) -> Result<Vec<u8>, ClientError> {
    let first = read_byte(stream, dur).await?;
    if first == NAK {
        return Err(ClientError::Protocol("Meter responded with NAK".to_string()));
    }
    if first != SOH && first != STX {
        return Err(ClientError::Protocol(format!(
            "Unexpected frame start byte 0x{first:02x}"
        )));
    }

    let mut frame = vec![first];
    loop {
        let byte = read_byte(stream, dur).await?;
        frame.push(byte);
        if byte == ETX {
            break;
        }
        if frame.len() > MAX_FRAME {
            return Err(ClientError::Protocol("Frame exceeds maximum size".to_string()));
        }
    }

    let received = read_byte(stream, dur).await?;
    let expected = bcc(&frame[1..]);
    if received != expected {
        return Err(ClientError::Protocol(format!(
            "BCC mismatch: expected 0x{expected:02x}, got 0x{received:02x}"
        )));
    }
    trace!("serial << {:02x?}", frame);
    Ok(frame)
}

fn command_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(SOH);
    frame.extend_from_slice(payload);
    frame.push(bcc(payload));
    frame
}

#[async_trait]
impl MeterClient for SerialMeterClient {
    async fn open(&mut self) -> Result<(), ClientError> {
        debug!("Opening serial port {} at {INITIAL_BAUD} baud 7E1", self.port_name);
        let stream = tokio_serial::new(&self.port_name, INITIAL_BAUD)
            .data_bits(DataBits::Seven)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| ClientError::Link(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn handshake(&mut self) -> Result<String, ClientError> {
        let dur = self.timeout;
        let stream = self.stream()?;

        write_all(stream, b"/?!\r\n", dur).await?;

        // Identification line, e.g. `/EKT5CE301v12`
        let mut line = Vec::new();
        loop {
            let byte = read_byte(stream, dur).await? & 0x7F;
            if byte == b'\n' {
                break;
            }
            if byte != b'\r' {
                line.push(byte);
            }
            if line.len() > 64 {
                return Err(ClientError::Protocol(
                    "Identification line too long".to_string(),
                ));
            }
        }
        let identification = String::from_utf8_lossy(&line).to_string();
        if !identification.starts_with('/') {
            return Err(ClientError::Protocol(format!(
                "Malformed identification line '{identification}'"
            )));
        }

        let baud_char = *identification
            .as_bytes()
            .get(4)
            .ok_or_else(|| ClientError::Protocol("Identification line too short".to_string()))?;
        let baud = baud_rate_for(baud_char).ok_or_else(|| {
            ClientError::Protocol(format!("Unknown baud rate character '{}'", baud_char as char))
        })?;

        // Acknowledge into programming mode, echoing the advertised rate
        write_all(stream, &[ACK, b'0', baud_char, b'1', b'\r', b'\n'], dur).await?;

        debug!("Switching to {baud} baud for programming mode");
        stream
            .set_baud_rate(baud)
            .map_err(|e| ClientError::Link(e.to_string()))?;

        // Password prompt frame: SOH P0 STX (<serial>) ETX BCC
        read_frame(stream, dur).await?;

        Ok(identification)
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), ClientError> {
        let dur = self.timeout;
        let stream = self.stream()?;

        let mut payload = Vec::new();
        payload.extend_from_slice(b"P1\x02(");
        payload.extend_from_slice(password.as_bytes());
        payload.extend_from_slice(b")\x03");
        write_all(stream, &command_frame(&payload), dur).await?;

        match read_byte(stream, dur).await? {
            ACK => Ok(()),
            _ => Err(ClientError::AuthRejected),
        }
    }

    async fn request(
        &mut self,
        address: &str,
        additional_data: Option<&str>,
    ) -> Result<Vec<String>, ClientError> {
        let dur = self.timeout;
        let stream = self.stream()?;

        let mut payload = Vec::new();
        payload.extend_from_slice(b"R1\x02");
        payload.extend_from_slice(address.as_bytes());
        payload.push(b'(');
        if let Some(data) = additional_data {
            payload.extend_from_slice(data.as_bytes());
        }
        payload.extend_from_slice(b")\x03");
        write_all(stream, &command_frame(&payload), dur).await?;

        let frame = read_frame(stream, dur).await?;
        // Strip the leading STX and trailing ETX
        parse_values(&frame[1..frame.len() - 1])
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        if let Some(stream) = self.stream.as_mut() {
            // Best effort break; the meter drops the session on its own
            // timeout if this never arrives
            let _ = write_all(stream, &command_frame(b"B0\x03"), self.timeout).await;
        }
        self.stream = None;
        Ok(())
    }
}
