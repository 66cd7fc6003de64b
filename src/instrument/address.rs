//! Instrument resource addresses.
//!
//! Bench configuration names instruments with VISA-style resource strings:
//!
//! - `TCPIP0::192.168.0.254::5025::SOCKET` - raw SCPI socket
//! - `TCPIP0::192.168.0.253::hislip0::INSTR` - HiSLIP resource
//! - `ASRL/dev/ttyUSB0::INSTR`, `ASRLCOM3::INSTR` - serial port
//! - `192.168.0.251:5025` - bare host and port
//!
//! HiSLIP framing is VISA middleware territory. HiSLIP resources are opened
//! through the same instrument's raw SCPI socket ([`RAW_SCPI_PORT`]), which
//! carries the identical command set.

use crate::error::{BenchError, BenchResult};
use crate::instrument::session::DynIo;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Port of the raw SCPI socket on LAN instruments.
pub const RAW_SCPI_PORT: u16 = 5025;

/// Default baud rate for `ASRL` resources.
pub const DEFAULT_SERIAL_BAUD: u32 = 9600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// Raw TCP socket.
    Socket { host: String, port: u16 },
    /// HiSLIP resource, reached through the raw SCPI socket.
    Hislip { host: String, device: String },
    /// Serial port.
    Serial { port: String, baud: u32 },
}

impl ResourceAddress {
    /// Host and port of the TCP connection this address resolves to.
    pub fn tcp_endpoint(&self) -> Option<(&str, u16)> {
        match self {
            ResourceAddress::Socket { host, port } => Some((host.as_str(), *port)),
            ResourceAddress::Hislip { host, .. } => Some((host.as_str(), RAW_SCPI_PORT)),
            ResourceAddress::Serial { .. } => None,
        }
    }

    /// Open the transport behind this address.
    ///
    /// The connection attempt is bounded by `timeout`.
    pub async fn open(&self, timeout: Duration) -> BenchResult<DynIo> {
        match self {
            ResourceAddress::Socket { .. } | ResourceAddress::Hislip { .. } => {
                let (host, port) = self
                    .tcp_endpoint()
                    .ok_or_else(|| BenchError::InvalidAddress(self.to_string()))?;
                if let ResourceAddress::Hislip { device, .. } = self {
                    debug!(host, device = %device, port, "Opening HiSLIP resource via raw SCPI socket");
                }
                let connect = TcpStream::connect((host, port));
                let stream = tokio::time::timeout(timeout, connect)
                    .await
                    .map_err(|_| BenchError::Connect {
                        resource: self.to_string(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            format!("connect timed out after {:?}", timeout),
                        ),
                    })?
                    .map_err(|source| BenchError::Connect {
                        resource: self.to_string(),
                        source,
                    })?;
                stream.set_nodelay(true)?;
                info!(resource = %self, "Connected");
                Ok(Box::new(stream))
            }
            ResourceAddress::Serial { port, baud } => open_serial(port, *baud).await,
        }
    }
}

#[cfg(feature = "instrument_serial")]
pub(crate) async fn open_serial(port: &str, baud: u32) -> BenchResult<DynIo> {
    use tokio_serial::SerialPortBuilderExt;

    let port_path = port.to_string();
    let stream = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&port_path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| BenchError::Io(std::io::Error::other(e)))?
    .map_err(|e| BenchError::Connect {
        resource: format!("{} @ {} baud", port, baud),
        source: std::io::Error::from(e),
    })?;

    info!(port, baud, "Serial port opened");
    Ok(Box::new(stream))
}

#[cfg(not(feature = "instrument_serial"))]
pub(crate) async fn open_serial(_port: &str, _baud: u32) -> BenchResult<DynIo> {
    Err(BenchError::SerialFeatureDisabled)
}

impl FromStr for ResourceAddress {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BenchError::InvalidAddress(s.to_string());
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split("::").collect();
        let interface = parts.first().copied().unwrap_or_default().to_ascii_uppercase();

        if interface.starts_with("TCPIP") {
            return match parts.as_slice() {
                [_, host, port, kind] if kind.eq_ignore_ascii_case("SOCKET") => {
                    let port = port.parse().map_err(|_| invalid())?;
                    Ok(ResourceAddress::Socket {
                        host: host.to_string(),
                        port,
                    })
                }
                [_, host, device, kind]
                    if kind.eq_ignore_ascii_case("INSTR")
                        && device.to_ascii_lowercase().starts_with("hislip") =>
                {
                    Ok(ResourceAddress::Hislip {
                        host: host.to_string(),
                        device: device.to_string(),
                    })
                }
                _ => Err(invalid()),
            };
        }

        if interface.starts_with("ASRL") {
            return match parts.as_slice() {
                [first, kind] if kind.eq_ignore_ascii_case("INSTR") && first.len() > 4 => {
                    Ok(ResourceAddress::Serial {
                        port: first[4..].to_string(),
                        baud: DEFAULT_SERIAL_BAUD,
                    })
                }
                _ => Err(invalid()),
            };
        }

        if parts.len() == 1 {
            if let Some((host, port)) = trimmed.rsplit_once(':') {
                if !host.is_empty() {
                    let port = port.parse().map_err(|_| invalid())?;
                    return Ok(ResourceAddress::Socket {
                        host: host.to_string(),
                        port,
                    });
                }
            }
        }

        Err(invalid())
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAddress::Socket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            ResourceAddress::Hislip { host, device } => write!(f, "TCPIP0::{}::{}::INSTR", host, device),
            ResourceAddress::Serial { port, .. } => write!(f, "ASRL{}::INSTR", port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket_resource() {
        let addr: ResourceAddress = "TCPIP0::192.168.0.254::5025::SOCKET".parse().unwrap();
        assert_eq!(
            addr,
            ResourceAddress::Socket {
                host: "192.168.0.254".into(),
                port: 5025
            }
        );
        assert_eq!(addr.tcp_endpoint(), Some(("192.168.0.254", 5025)));
    }

    #[test]
    fn hislip_resolves_to_raw_socket() {
        let addr: ResourceAddress = "TCPIP0::192.168.2.253::hislip0::INSTR".parse().unwrap();
        assert!(matches!(addr, ResourceAddress::Hislip { .. }));
        assert_eq!(addr.tcp_endpoint(), Some(("192.168.2.253", RAW_SCPI_PORT)));
        assert_eq!(addr.to_string(), "TCPIP0::192.168.2.253::hislip0::INSTR");
    }

    #[test]
    fn parses_serial_and_bare_addresses() {
        let serial: ResourceAddress = "ASRL/dev/ttyUSB0::INSTR".parse().unwrap();
        assert_eq!(
            serial,
            ResourceAddress::Serial {
                port: "/dev/ttyUSB0".into(),
                baud: DEFAULT_SERIAL_BAUD
            }
        );

        let bare: ResourceAddress = "localhost:5025".parse().unwrap();
        assert_eq!(bare.tcp_endpoint(), Some(("localhost", 5025)));
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "TCPIP0::host", "TCPIP0::host::notaport::SOCKET", "GPIB0::12::INSTR", "ASRL::INSTR"] {
            assert!(bad.parse::<ResourceAddress>().is_err(), "accepted {:?}", bad);
        }
    }
}
