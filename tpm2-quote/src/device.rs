// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM device communication layer
//!
//! Defines the [`Transport`] seam, the character-device transport for
//! `/dev/tpmrm0` or `/dev/tpm0`, and the command/response framing shared by
//! every command.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::marshal::*;
use crate::session::AuthSession;

/// Maximum TPM command/response size
pub const TPM_MAX_COMMAND_SIZE: usize = 4096;

/// Size of the command/response header: tag (2) + size (4) + code (4)
pub const TPM_HEADER_SIZE: usize = 10;

/// A channel that carries raw command bytes to a TPM and brings back its response
///
/// Implementations own connection setup, timeouts and any retry policy. A
/// TPM processes one command at a time, so `&mut self` keeps a connection
/// from being shared by concurrent round trips.
pub trait Transport {
    fn send_command(&mut self, command: &[u8]) -> Result<()>;

    fn receive_response(&mut self) -> Result<Vec<u8>>;

    /// One full round trip
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        self.send_command(command)?;
        self.receive_response()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_command(&mut self, command: &[u8]) -> Result<()> {
        (**self).send_command(command)
    }

    fn receive_response(&mut self) -> Result<Vec<u8>> {
        (**self).receive_response()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_command(&mut self, command: &[u8]) -> Result<()> {
        (**self).send_command(command)
    }

    fn receive_response(&mut self) -> Result<Vec<u8>> {
        (**self).receive_response()
    }
}

/// TPM character device handle
pub struct TpmDevice {
    file: File,
    path: PathBuf,
}

impl TpmDevice {
    /// Open a TPM device
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::transport(format!(
                "failed to open TPM device {}",
                path.display()
            )))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// First TPM character device present on this host, resource manager first
    pub fn detect_path() -> Option<PathBuf> {
        ["/dev/tpmrm0", "/dev/tpm0"]
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    /// Get the device path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for TpmDevice {
    fn send_command(&mut self, command: &[u8]) -> Result<()> {
        self.file
            .write_all(command)
            .map_err(Error::transport("failed to write TPM command"))
    }

    fn receive_response(&mut self) -> Result<Vec<u8>> {
        // The kernel driver hands back the whole response in one read
        let mut response = vec![0u8; TPM_MAX_COMMAND_SIZE];
        let n = self
            .file
            .read(&mut response)
            .map_err(Error::transport("failed to read TPM response"))?;

        response.truncate(n);
        Ok(response)
    }
}

/// TPM command builder
pub struct TpmCommand {
    buf: CommandBuffer,
}

impl TpmCommand {
    /// Create a new command without sessions
    pub fn new(command_code: TpmCc) -> Self {
        Self::with_tag(TpmSt::NoSessions, command_code)
    }

    /// Create a new command with sessions
    pub fn with_sessions(command_code: TpmCc) -> Self {
        Self::with_tag(TpmSt::Sessions, command_code)
    }

    fn with_tag(tag: TpmSt, command_code: TpmCc) -> Self {
        let mut buf = CommandBuffer::with_capacity(256);

        // Header: tag (2) + size (4) + command code (4)
        buf.put_u16(tag.to_u16());
        buf.put_u32(0); // Size placeholder
        buf.put_u32(command_code.to_u32());

        Self { buf }
    }

    /// Add a handle to the command
    pub fn add_handle(&mut self, handle: u32) {
        self.buf.put_u32(handle);
    }

    /// Add a u8 value
    pub fn add_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Add a u16 value
    pub fn add_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    /// Add a u32 value
    pub fn add_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Add a TPM2B structure
    pub fn add_tpm2b(&mut self, data: &[u8]) {
        self.buf.put_tpm2b(data);
    }

    /// Add a marshallable structure
    pub fn add<T: Marshal>(&mut self, value: &T) {
        value.marshal(&mut self.buf);
    }

    /// Add the authorization area: u32 size followed by the sessions
    pub fn add_auth_area(&mut self, sessions: &[&AuthSession]) {
        let auth_size: usize = sessions.iter().map(|s| s.encoded_len()).sum();
        self.buf.put_u32(auth_size as u32);
        for session in sessions {
            session.marshal(&mut self.buf);
        }
    }

    /// Finalize the command and return the bytes
    pub fn finalize(mut self) -> Vec<u8> {
        let size = self.buf.len() as u32;
        self.buf.update_u32(2, size);
        self.buf.into_vec()
    }
}

/// TPM response parser
#[derive(Debug)]
pub struct TpmResponse {
    pub tag: TpmSt,
    pub response_code: u32,
    pub data: Vec<u8>,
}

impl TpmResponse {
    /// Parse a TPM response header
    ///
    /// A response that does not frame correctly is `MalformedResponse`; a
    /// well-framed response carrying a non-zero code is `TpmCommand`.
    pub fn parse(response: &[u8]) -> Result<Self> {
        if response.len() < TPM_HEADER_SIZE {
            return Err(Error::MalformedResponse(format!(
                "TPM response too short: {} bytes",
                response.len()
            )));
        }

        let mut buf = ResponseBuffer::new(response);
        let tag_raw = buf.get_u16()?;
        let tag = TpmSt::from_u16(tag_raw).ok_or_else(|| {
            Error::MalformedResponse(format!("invalid response tag: 0x{tag_raw:04x}"))
        })?;

        let size = buf.get_u32()? as usize;
        if size != response.len() {
            return Err(Error::MalformedResponse(format!(
                "TPM response size mismatch: header says {size}, got {}",
                response.len()
            )));
        }

        let response_code = buf.get_u32()?;
        if response_code != TpmRc::Success as u32 {
            debug!("TPM returned response code 0x{response_code:08x}");
            return Err(Error::TpmCommand {
                code: response_code,
            });
        }

        Ok(Self {
            tag,
            response_code,
            data: response[TPM_HEADER_SIZE..].to_vec(),
        })
    }

    /// Get a response buffer for parsing the data
    pub fn data_buffer(&self) -> ResponseBuffer<'_> {
        ResponseBuffer::new(&self.data)
    }

    /// Split a session-tagged response into its parameter area, skipping
    /// `handle_count` response handles first
    ///
    /// Responses without sessions have no parameter size field and the
    /// parameter area runs to the end.
    pub fn parameters(&self, handle_count: usize) -> Result<&[u8]> {
        let mut buf = self.data_buffer();
        buf.skip(handle_count * 4)
            .map_err(|_| Error::MalformedResponse("response handle area truncated".into()))?;
        if self.tag != TpmSt::Sessions {
            let start = buf.position();
            return Ok(&self.data[start..]);
        }
        let param_size = buf
            .get_u32()
            .map_err(|_| Error::MalformedResponse("missing parameter size".into()))?
            as usize;
        if param_size > buf.remaining() {
            return Err(Error::MalformedResponse(format!(
                "parameter area declares {param_size} bytes but only {} remain",
                buf.remaining()
            )));
        }
        let start = buf.position();
        Ok(&self.data[start..start + param_size])
    }
}
