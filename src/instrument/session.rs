//! Instrument session: one command/response channel to a bench instrument.
//!
//! A session owns its transport exclusively. Commands are written with the
//! configured write terminator; query responses are read up to the read
//! terminator, which is stripped. Every read is bounded by the session
//! timeout and a timeout is a fatal transport fault.

use crate::error::{BenchError, BenchResult};
use crate::instrument::address::ResourceAddress;
use crate::instrument::scpi::parse_f64_response;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

/// Byte stream an instrument session can run over (TCP socket, serial port,
/// in-memory duplex in tests).
pub trait InstrumentIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> InstrumentIo for T {}

/// Boxed transport.
pub type DynIo = Box<dyn InstrumentIo>;

/// Line terminators and timeout of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Appended to every command written.
    pub write_termination: String,
    /// Marks the end of a query response.
    pub read_termination: char,
    /// Upper bound for every query response.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            write_termination: "\n".to_string(),
            read_termination: '\n',
            timeout: Duration::from_secs(10),
        }
    }
}

/// Parsed `*IDN?` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Identity {
    /// Parse the comma-separated `*IDN?` response. Missing fields are empty.
    pub fn parse(response: &str) -> Self {
        let mut fields = response.trim().split(',').map(|f| f.trim().to_string());
        Self {
            manufacturer: fields.next().unwrap_or_default(),
            model: fields.next().unwrap_or_default(),
            serial: fields.next().unwrap_or_default(),
            firmware: fields.next().unwrap_or_default(),
        }
    }
}

pub struct InstrumentSession {
    name: String,
    io: Option<BufReader<DynIo>>,
    options: SessionOptions,
    identity: Option<Identity>,
}

impl InstrumentSession {
    /// Wrap an already-open transport.
    pub fn new(name: impl Into<String>, io: DynIo, options: SessionOptions) -> Self {
        Self {
            name: name.into(),
            io: Some(BufReader::new(io)),
            options,
            identity: None,
        }
    }

    /// Connect to `address` and wrap the transport in a session.
    pub async fn open(
        name: impl Into<String>,
        address: &ResourceAddress,
        options: SessionOptions,
    ) -> BenchResult<Self> {
        let io = address.open(options.timeout).await?;
        Ok(Self::new(name, io, options))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Identity read by the last [`identify`](Self::identify) call.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn io_mut(&mut self) -> BenchResult<&mut BufReader<DynIo>> {
        let name = &self.name;
        self.io
            .as_mut()
            .ok_or_else(|| BenchError::SessionClosed(name.clone()))
    }

    /// Write one command.
    pub async fn send(&mut self, command: &str) -> BenchResult<()> {
        let line = format!("{}{}", command, self.options.write_termination);
        trace!(instrument = %self.name, command, "send");
        let io = self.io_mut()?;
        io.get_mut().write_all(line.as_bytes()).await?;
        io.get_mut().flush().await?;
        Ok(())
    }

    /// Write one command and read one response line.
    pub async fn query(&mut self, command: &str) -> BenchResult<String> {
        self.send(command).await?;

        let terminator = self.options.read_termination;
        let timeout = self.options.timeout;
        let mut delimiter = [0u8; 4];
        let delimiter = terminator.encode_utf8(&mut delimiter).as_bytes()[0];

        let mut buffer = Vec::new();
        let read = {
            let io = self.io_mut()?;
            tokio::time::timeout(timeout, io.read_until(delimiter, &mut buffer)).await
        };

        let n = match read {
            Ok(result) => result?,
            Err(_) => {
                return Err(BenchError::Timeout {
                    instrument: self.name.clone(),
                    command: command.to_string(),
                    timeout,
                })
            }
        };
        if n == 0 {
            return Err(BenchError::UnexpectedEof(self.name.clone()));
        }

        let mut response = String::from_utf8_lossy(&buffer).into_owned();
        if response.ends_with(terminator) {
            response.pop();
        }
        trace!(instrument = %self.name, command, response = %response, "query");
        Ok(response)
    }

    /// Query and convert the response to a number.
    pub async fn query_f64(&mut self, command: &str) -> BenchResult<f64> {
        let response = self.query(command).await?;
        parse_f64_response(command, &response)
    }

    /// Issue `*IDN?` and remember the identity.
    pub async fn identify(&mut self) -> BenchResult<&Identity> {
        let response = self.query("*IDN?").await?;
        let identity = Identity::parse(&response);
        debug!(instrument = %self.name, model = %identity.model, "Identified");
        Ok(self.identity.insert(identity))
    }

    /// Close the session. Later calls are no-ops.
    pub async fn close(&mut self) -> BenchResult<()> {
        if let Some(mut io) = self.io.take() {
            let result = io.get_mut().shutdown().await;
            debug!(instrument = %self.name, "Session closed");
            result?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn session_pair(options: SessionOptions) -> (InstrumentSession, DuplexStream) {
        let (host, device) = tokio::io::duplex(256);
        (InstrumentSession::new("scope", Box::new(host), options), device)
    }

    #[test]
    fn parses_identity() {
        let id = Identity::parse("KEYSIGHT TECHNOLOGIES,DSOX1204G,CN12345678,02.12\n");
        assert_eq!(id.manufacturer, "KEYSIGHT TECHNOLOGIES");
        assert_eq!(id.model, "DSOX1204G");
        assert_eq!(id.serial, "CN12345678");
        assert_eq!(id.firmware, "02.12");

        let short = Identity::parse("ACME");
        assert_eq!(short.model, "");
    }

    #[tokio::test]
    async fn send_appends_write_terminator() {
        let (mut session, mut device) = session_pair(SessionOptions::default());
        session.send("CHANnel1:PROBe +1.0").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"CHANnel1:PROBe +1.0\n");
    }

    #[tokio::test]
    async fn query_strips_read_terminator() {
        let (mut session, mut device) = session_pair(SessionOptions::default());
        device.write_all(b"+2.5E-01\n").await.unwrap();

        let response = session.query(":CHAN1:SCAL?").await.unwrap();
        assert_eq!(response, "+2.5E-01");
    }

    #[tokio::test]
    async fn custom_terminators_are_honoured() {
        let options = SessionOptions {
            write_termination: "\r\n".into(),
            read_termination: '\r',
            ..Default::default()
        };
        let (mut session, mut device) = session_pair(options);
        device.write_all(b"0.75\r").await.unwrap();

        let value = session.query_f64("MEAS:CURR? CH2").await.unwrap();
        assert_eq!(value, 0.75);

        let mut buf = vec![0u8; 64];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"MEAS:CURR? CH2\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_instrument_times_out() {
        let (mut session, _device) = session_pair(SessionOptions::default());
        let err = session.query(":MEAS:VRMS? CHAN1").await.unwrap_err();
        assert!(matches!(err, BenchError::Timeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn closed_peer_is_unexpected_eof() {
        let (mut session, device) = session_pair(SessionOptions::default());
        drop(device);
        let err = session.query("*IDN?").await.unwrap_err();
        assert!(err.is_transport_fault(), "{err}");
    }

    #[tokio::test]
    async fn identify_stores_identity() {
        let (mut session, mut device) = session_pair(SessionOptions::default());
        device
            .write_all(b"Keysight Technologies,33500B,MY123,4.00\n")
            .await
            .unwrap();

        let model = session.identify().await.unwrap().model.clone();
        assert_eq!(model, "33500B");
        assert_eq!(session.identity().map(|id| id.model.as_str()), Some("33500B"));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_io() {
        let (mut session, mut device) = session_pair(SessionOptions::default());
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(!session.is_open());

        let mut buf = Vec::new();
        let n = device.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        let err = session.send("OUTPut1 OFF").await.unwrap_err();
        assert!(matches!(err, BenchError::SessionClosed(_)));
    }
}
