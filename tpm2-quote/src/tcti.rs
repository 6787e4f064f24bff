// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TCTI configuration strings
//!
//! Accepts the subset of tpm2-tools' `TPM2TOOLS_TCTI` syntax that this crate
//! has transports for:
//!
//! - `device` or `device:/dev/tpmrm0`
//! - `mssim`, `mssim:host=127.0.0.1,port=2321`

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, info};

use crate::device::{TpmDevice, Transport};
use crate::error::{Error, Result};
use crate::mssim::{self, MsSimTransport};

/// Which transport to open, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tcti {
    Device(PathBuf),
    MsSim { host: String, port: u16 },
}

impl Tcti {
    /// Pick a character device if one exists, the local simulator otherwise
    pub fn detect() -> Self {
        match TpmDevice::detect_path() {
            Some(path) => Tcti::Device(path),
            None => Tcti::MsSim {
                host: mssim::DEFAULT_HOST.into(),
                port: mssim::DEFAULT_PORT,
            },
        }
    }

    /// Open the transport; simulators are powered on first
    pub fn open(&self) -> Result<Box<dyn Transport>> {
        info!("opening TPM transport {self}");
        match self {
            Tcti::Device(path) => Ok(Box::new(TpmDevice::open(path)?)),
            Tcti::MsSim { host, port } => {
                let mut sim = MsSimTransport::connect(host, *port)?;
                sim.power_on()?;
                Ok(Box::new(sim))
            }
        }
    }
}

impl fmt::Display for Tcti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tcti::Device(path) => write!(f, "device:{}", path.display()),
            Tcti::MsSim { host, port } => write!(f, "mssim:host={host},port={port}"),
        }
    }
}

impl FromStr for Tcti {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, conf) = match s.split_once(':') {
            Some((name, conf)) => (name, conf.trim()),
            None => (s, ""),
        };
        match name.trim() {
            "device" => {
                if conf.is_empty() {
                    TpmDevice::detect_path()
                        .map(Tcti::Device)
                        .ok_or_else(|| Error::InvalidArgument("no TPM device found".into()))
                } else {
                    Ok(Tcti::Device(PathBuf::from(conf)))
                }
            }
            "mssim" => {
                let mut host = mssim::DEFAULT_HOST.to_string();
                let mut port = mssim::DEFAULT_PORT;
                for opt in conf.split(',').filter(|o| !o.trim().is_empty()) {
                    match opt.trim().split_once('=') {
                        Some(("host", v)) => host = v.to_string(),
                        Some(("port", v)) => {
                            port = v.parse().map_err(|_| {
                                Error::InvalidArgument(format!("invalid simulator port {v:?}"))
                            })?
                        }
                        _ => {
                            return Err(Error::InvalidArgument(format!(
                                "unknown simulator option {opt:?}"
                            )))
                        }
                    }
                }
                debug!("simulator TCTI resolved to {host}:{port}");
                Ok(Tcti::MsSim { host, port })
            }
            other => Err(Error::InvalidArgument(format!(
                "unsupported TCTI {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        let tcti: Tcti = "device:/dev/tpm0".parse().unwrap();
        assert_eq!(tcti, Tcti::Device("/dev/tpm0".into()));
        assert_eq!(tcti.to_string(), "device:/dev/tpm0");
    }

    #[test]
    fn test_parse_mssim() {
        let tcti: Tcti = "mssim".parse().unwrap();
        assert_eq!(
            tcti,
            Tcti::MsSim {
                host: "localhost".into(),
                port: 2321
            }
        );

        let tcti: Tcti = "mssim:host=10.0.0.2,port=2421".parse().unwrap();
        assert_eq!(
            tcti,
            Tcti::MsSim {
                host: "10.0.0.2".into(),
                port: 2421
            }
        );
        assert_eq!(tcti.to_string(), "mssim:host=10.0.0.2,port=2421");
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("tabrmd".parse::<Tcti>().is_err());
        // swtpm's control channel is not the simulator's platform protocol
        assert!("swtpm".parse::<Tcti>().is_err());
        assert!("mssim:port=abc".parse::<Tcti>().is_err());
        assert!("mssim:path=/tmp".parse::<Tcti>().is_err());
    }
}
