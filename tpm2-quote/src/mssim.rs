// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Transport for the Microsoft/IBM TPM 2.0 reference simulator
//!
//! The simulator listens on two TCP ports: commands go to the command port
//! wrapped in `TPM_SEND_COMMAND` framing, and power/NV signals go to the
//! platform port (command port + 1).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, warn};

use crate::device::{Transport, TPM_MAX_COMMAND_SIZE};
use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 2321;

const TPM_SIGNAL_POWER_ON: u32 = 1;
const TPM_SIGNAL_NV_ON: u32 = 11;
const TPM_SEND_COMMAND: u32 = 8;
const TPM_SESSION_END: u32 = 20;

/// Connection to a running simulator
pub struct MsSimTransport {
    command: TcpStream,
    platform: TcpStream,
    locality: u8,
}

impl MsSimTransport {
    /// Connect to the command port and the platform port right above it
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let platform_port = port.checked_add(1).ok_or_else(|| {
            Error::InvalidArgument(format!("simulator port {port} leaves no room for platform port"))
        })?;
        let command = TcpStream::connect((host, port)).map_err(Error::transport(format!(
            "failed to connect to TPM simulator at {host}:{port}"
        )))?;
        let platform = TcpStream::connect((host, platform_port)).map_err(Error::transport(
            format!("failed to connect to TPM simulator platform port {host}:{platform_port}"),
        ))?;
        debug!("connected to TPM simulator at {host}:{port}");
        Ok(Self {
            command,
            platform,
            locality: 0,
        })
    }

    /// Locality the commands are sent from (default 0)
    pub fn set_locality(&mut self, locality: u8) {
        self.locality = locality;
    }

    /// Bound every read and write on both sockets; `None` blocks forever
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        for stream in [&self.command, &self.platform] {
            stream
                .set_read_timeout(timeout)
                .and_then(|_| stream.set_write_timeout(timeout))
                .map_err(Error::transport("failed to set simulator socket timeout"))?;
        }
        Ok(())
    }

    /// Power the simulated TPM on and enable its NV memory
    ///
    /// A freshly started simulator needs this before it accepts
    /// `TPM2_Startup`.
    pub fn power_on(&mut self) -> Result<()> {
        platform_signal(&mut self.platform, TPM_SIGNAL_POWER_ON)?;
        platform_signal(&mut self.platform, TPM_SIGNAL_NV_ON)
    }
}

fn read_u32(stream: &mut TcpStream, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    stream
        .read_exact(&mut buf)
        .map_err(Error::transport(format!("failed to read simulator {what}")))?;
    Ok(u32::from_be_bytes(buf))
}

fn platform_signal(stream: &mut TcpStream, signal: u32) -> Result<()> {
    stream
        .write_all(&signal.to_be_bytes())
        .map_err(Error::transport("failed to send simulator platform signal"))?;
    match read_u32(stream, "platform acknowledgement")? {
        0 => Ok(()),
        rc => Err(Error::MalformedResponse(format!(
            "simulator rejected platform signal {signal}: {rc}"
        ))),
    }
}

impl Transport for MsSimTransport {
    fn send_command(&mut self, command: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(9 + command.len());
        frame.extend_from_slice(&TPM_SEND_COMMAND.to_be_bytes());
        frame.push(self.locality);
        frame.extend_from_slice(&(command.len() as u32).to_be_bytes());
        frame.extend_from_slice(command);
        self.command
            .write_all(&frame)
            .map_err(Error::transport("failed to write TPM command to simulator"))
    }

    fn receive_response(&mut self) -> Result<Vec<u8>> {
        let len = read_u32(&mut self.command, "response length")? as usize;
        if len > TPM_MAX_COMMAND_SIZE {
            return Err(Error::MalformedResponse(format!(
                "simulator response of {len} bytes exceeds {TPM_MAX_COMMAND_SIZE}"
            )));
        }
        let mut response = vec![0u8; len];
        self.command
            .read_exact(&mut response)
            .map_err(Error::transport("failed to read TPM response from simulator"))?;
        let ack = read_u32(&mut self.command, "acknowledgement")?;
        if ack != 0 {
            warn!("simulator acknowledged command with {ack}");
        }
        Ok(response)
    }
}

impl Drop for MsSimTransport {
    fn drop(&mut self) {
        // Best effort; the simulator closes the session on disconnect anyway
        let end = TPM_SESSION_END.to_be_bytes();
        let _ = self.command.write_all(&end);
        let _ = self.platform.write_all(&end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn read_exact_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    /// Bind a command port with a free port right above it
    fn bind_pair() -> (TcpListener, TcpListener, u16) {
        loop {
            let command = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            let port = command.local_addr().unwrap().port();
            if port == u16::MAX {
                continue;
            }
            if let Ok(platform) = TcpListener::bind(("127.0.0.1", port + 1)) {
                return (command, platform, port);
            }
        }
    }

    #[test]
    fn test_command_framing() {
        let (command, platform, port) = bind_pair();
        let server = thread::spawn(move || {
            let (mut cmd, _) = command.accept().unwrap();
            let (mut plat, _) = platform.accept().unwrap();

            // power on + NV on
            for expected in [TPM_SIGNAL_POWER_ON, TPM_SIGNAL_NV_ON] {
                let sig = read_exact_n(&mut plat, 4);
                assert_eq!(u32::from_be_bytes(sig.try_into().unwrap()), expected);
                plat.write_all(&0u32.to_be_bytes()).unwrap();
            }

            let header = read_exact_n(&mut cmd, 9);
            assert_eq!(&header[..4], &TPM_SEND_COMMAND.to_be_bytes());
            assert_eq!(header[4], 0);
            let len = u32::from_be_bytes(header[5..9].try_into().unwrap()) as usize;
            let body = read_exact_n(&mut cmd, len);
            assert_eq!(body, vec![0x80, 0x01, 0, 0, 0, 12, 0, 0, 1, 0x7b, 0, 8]);

            let response = [0x80, 0x01, 0, 0, 0, 10, 0, 0, 0, 0];
            cmd.write_all(&(response.len() as u32).to_be_bytes()).unwrap();
            cmd.write_all(&response).unwrap();
            cmd.write_all(&0u32.to_be_bytes()).unwrap();
        });

        let mut sim = MsSimTransport::connect("127.0.0.1", port).unwrap();
        sim.set_timeout(Some(Duration::from_secs(5))).unwrap();
        sim.power_on().unwrap();
        let response = sim
            .transmit(&[0x80, 0x01, 0, 0, 0, 12, 0, 0, 1, 0x7b, 0, 8])
            .unwrap();
        assert_eq!(response, vec![0x80, 0x01, 0, 0, 0, 10, 0, 0, 0, 0]);
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = MsSimTransport::connect("127.0.0.1", port).err().unwrap();
        assert!(matches!(err, Error::Transport { .. }), "{err}");
    }
}
