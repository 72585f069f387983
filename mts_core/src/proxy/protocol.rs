//! Wire contract between proxy clients and servers
//!
//! Every message travels as one frame: a `u32` little-endian length prefix
//! followed by the bincode encoding of a [`ProxyRequest`] or
//! [`ProxyResponse`]. The same framing carries the global manager protocol.

use crate::command::ExecutionResult;
use crate::error::{MtsError, MtsResult};
use crate::interface::{CommandDescription, InterfaceDescription};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest frame accepted from a peer
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Stable integer alias for a command, negotiated at connect time
pub type CommandId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProxyRequest {
    /// Register the calling client
    AddClient { identity: String },
    RemoveClient { identity: String },
    /// Catalogue of every provided interface on the server
    GetProvidedInterfaces,
    /// Prepare a binding context for one connection
    ConnectServerSide {
        identity: String,
        client_component: String,
        required_interface: String,
        server_component: String,
        provided_interface: String,
    },
    /// Resolve required slots to command ids
    GetCommandId {
        identity: String,
        slots: Vec<CommandDescription>,
    },
    ExecuteVoid { id: CommandId },
    /// Void without a response frame
    ExecuteVoidOneway { id: CommandId },
    ExecuteWrite { id: CommandId, payload: Vec<u8> },
    /// Also serves VoidReturn commands
    ExecuteRead { id: CommandId },
    ExecuteQualifiedRead { id: CommandId, payload: Vec<u8> },
}

impl ProxyRequest {
    pub fn is_oneway(&self) -> bool {
        matches!(self, ProxyRequest::ExecuteVoidOneway { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProxyResponse {
    Ack,
    ProvidedInterfaces(Vec<InterfaceDescription>),
    CommandIds(Vec<(String, CommandId)>),
    Executed {
        result: ExecutionResult,
        payload: Option<Vec<u8>>,
    },
    Error(WireError),
}

/// Error category carried across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireErrorKind {
    NoSuchInterfaceOrCommand,
    DuplicateName,
    AlreadyConnected,
    TypeMismatch,
    InvalidState,
    Unsupported,
    Serialization,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

impl From<&MtsError> for WireError {
    fn from(err: &MtsError) -> Self {
        let (kind, message) = match err {
            MtsError::NoSuchInterfaceOrCommand(m) => (WireErrorKind::NoSuchInterfaceOrCommand, m.clone()),
            MtsError::DuplicateName(m) => (WireErrorKind::DuplicateName, m.clone()),
            MtsError::AlreadyConnected(m) => (WireErrorKind::AlreadyConnected, m.clone()),
            MtsError::TypeMismatch(m) => (WireErrorKind::TypeMismatch, m.clone()),
            MtsError::InvalidState(m) => (WireErrorKind::InvalidState, m.clone()),
            MtsError::Unsupported(m) => (WireErrorKind::Unsupported, m.clone()),
            MtsError::Serialization(m) => (WireErrorKind::Serialization, m.clone()),
            other => (WireErrorKind::Other, other.to_string()),
        };
        WireError { kind, message }
    }
}

impl From<WireError> for MtsError {
    fn from(err: WireError) -> Self {
        let m = err.message;
        match err.kind {
            WireErrorKind::NoSuchInterfaceOrCommand => MtsError::NoSuchInterfaceOrCommand(m),
            WireErrorKind::DuplicateName => MtsError::DuplicateName(m),
            WireErrorKind::AlreadyConnected => MtsError::AlreadyConnected(m),
            WireErrorKind::TypeMismatch => MtsError::TypeMismatch(m),
            WireErrorKind::InvalidState => MtsError::InvalidState(m),
            WireErrorKind::Unsupported => MtsError::Unsupported(m),
            WireErrorKind::Serialization => MtsError::Serialization(m),
            WireErrorKind::Other => MtsError::Internal(m),
        }
    }
}

/// Encode a message as a complete frame
pub fn encode_frame<T: Serialize>(message: &T) -> MtsResult<Vec<u8>> {
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(MtsError::Serialization(format!(
            "frame of {} bytes exceeds limit of {}",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body (without its length prefix)
pub fn decode_frame<T: DeserializeOwned>(body: &[u8]) -> MtsResult<T> {
    Ok(bincode::deserialize(body)?)
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> MtsResult<()> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> MtsResult<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(MtsError::transport(format!("frame too large: {} bytes", len)));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    decode_frame(&body)
}
