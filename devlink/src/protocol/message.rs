//! Message catalog.
//!
//! Every operation the device understands is one [`Operation`] variant with
//! a request code, a response code, a payload encoder and a response
//! decoder. Metadata operations exchange UTF-8 JSON; bulk data is sent raw.
//!
//! ## Operation codes
//!
//! | Operation        | Request | Response |
//! |------------------|---------|----------|
//! | GetVersion       | `0x01`  | `0x81`   |
//! | ListFolder       | `0x02`  | `0x82`   |
//! | WriteFileStart   | `0x03`  | `0x83`   |
//! | WriteFileData    | `0x04`  | `0x84`   |
//! | WriteFileEnd     | `0x05`  | `0x85`   |
//! | ReadFile         | `0x06`  | `0x86`   |
//! | DeleteFile       | `0x07`  | `0x87`   |
//! | MakeDirectory    | `0x08`  | `0x88`   |
//! | RenameFile       | `0x09`  | `0x89`   |
//! | GetFileInfo      | `0x0A`  | `0x8A`   |
//! | Reboot           | `0x0B`  | none     |
//!
//! ## Structured envelope
//!
//! ```text
//! { "success": bool, "errorMessage"?: string, "result"?: <operation-specific> }
//! ```
//!
//! ## Write-data payload
//!
//! ```text
//! +-------------+-----------+-------+-----------+
//! | path_len LE |   path    | flags | raw bytes |
//! +-------------+-----------+-------+-----------+
//! |     2       | path_len  |   1   |    ...    |
//! +-------------+-----------+-------+-----------+
//! ```
//!
//! Flag bit 0 marks the final chunk of a transfer.

use crate::error::{Error, Result};
use crate::protocol::frame;
use byteorder::{LittleEndian, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response code reserved for requests that expect no frame back.
pub const NULL_RESPONSE: u8 = 0x00;

/// Bit set in every response code.
pub const RESPONSE_FLAG: u8 = 0x80;

/// Write-data flag marking the final chunk.
pub const FLAG_LAST_CHUNK: u8 = 0x01;

/// Device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    /// Query firmware version.
    GetVersion = 0x01,
    /// List a directory.
    ListFolder = 0x02,
    /// Begin a chunked write.
    WriteFileStart = 0x03,
    /// One chunk of a chunked write.
    WriteFileData = 0x04,
    /// Finish a chunked write.
    WriteFileEnd = 0x05,
    /// Read a whole file.
    ReadFile = 0x06,
    /// Delete a file.
    DeleteFile = 0x07,
    /// Create a directory.
    MakeDirectory = 0x08,
    /// Rename or move a file.
    RenameFile = 0x09,
    /// Query a single file's descriptor.
    GetFileInfo = 0x0A,
    /// Restart the device. Fire-and-forget.
    Reboot = 0x0B,
}

impl Operation {
    /// Every operation, in code order.
    pub const ALL: [Self; 11] = [
        Self::GetVersion,
        Self::ListFolder,
        Self::WriteFileStart,
        Self::WriteFileData,
        Self::WriteFileEnd,
        Self::ReadFile,
        Self::DeleteFile,
        Self::MakeDirectory,
        Self::RenameFile,
        Self::GetFileInfo,
        Self::Reboot,
    ];

    /// Command code of the request frame.
    pub fn request_code(self) -> u8 {
        self as u8
    }

    /// Command code of the expected response frame.
    pub fn response_code(self) -> u8 {
        match self {
            Self::Reboot => NULL_RESPONSE,
            other => other.request_code() | RESPONSE_FLAG,
        }
    }

    /// Whether the device answers this operation at all.
    pub fn expects_response(self) -> bool {
        self.response_code() != NULL_RESPONSE
    }

    /// Look up an operation by request code.
    pub fn from_request_code(code: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.request_code() == code)
    }

    /// Look up an operation by response code.
    pub fn from_response_code(code: u8) -> Option<Self> {
        if code == NULL_RESPONSE {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|op| op.response_code() == code)
    }

    /// Decode a response payload for this operation.
    ///
    /// `None` means the operation completed without a payload and is
    /// reported as [`Error::NoResponse`], distinct from a failure envelope.
    /// An empty or `null` payload for an envelope operation counts the same.
    pub fn decode(self, payload: Option<&[u8]>) -> Result<Response> {
        if !self.expects_response() {
            return Ok(Response::Ack);
        }
        let payload = payload.ok_or(Error::NoResponse)?;
        if self != Self::ReadFile && is_blank_envelope(payload) {
            return Err(Error::NoResponse);
        }

        match self {
            Self::GetVersion => required(payload).map(Response::Version),
            Self::ListFolder => required(payload).map(Response::Listing),
            Self::GetFileInfo => required(payload).map(Response::FileInfo),
            Self::ReadFile => Ok(Response::FileData(payload.to_vec())),
            Self::WriteFileStart
            | Self::WriteFileData
            | Self::WriteFileEnd
            | Self::DeleteFile
            | Self::MakeDirectory
            | Self::RenameFile => {
                parse_envelope::<serde_json::Value>(payload)?;
                Ok(Response::Ack)
            },
            Self::Reboot => Ok(Response::Ack),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetVersion => "GetVersion",
            Self::ListFolder => "ListFolder",
            Self::WriteFileStart => "WriteFileStart",
            Self::WriteFileData => "WriteFileData",
            Self::WriteFileEnd => "WriteFileEnd",
            Self::ReadFile => "ReadFile",
            Self::DeleteFile => "DeleteFile",
            Self::MakeDirectory => "MakeDirectory",
            Self::RenameFile => "RenameFile",
            Self::GetFileInfo => "GetFileInfo",
            Self::Reboot => "Reboot",
        };
        f.write_str(name)
    }
}

/// A request with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Query firmware version.
    GetVersion,
    /// List the directory at `path`.
    ListFolder {
        /// Directory path.
        path: String,
    },
    /// Begin writing `size` bytes to `path`.
    WriteFileStart {
        /// Destination path.
        path: String,
        /// Total number of bytes that will follow.
        size: u64,
    },
    /// One chunk of file contents.
    WriteFileData {
        /// Destination path.
        path: String,
        /// Raw chunk bytes.
        data: Vec<u8>,
        /// Whether this is the final chunk.
        last: bool,
    },
    /// Finish writing `path`.
    WriteFileEnd {
        /// Destination path.
        path: String,
        /// Final byte count, validated by the device.
        size: u64,
    },
    /// Read the file at `path`.
    ReadFile {
        /// File path.
        path: String,
    },
    /// Delete the file at `path`.
    DeleteFile {
        /// File path.
        path: String,
    },
    /// Create a directory at `path`.
    MakeDirectory {
        /// Directory path.
        path: String,
    },
    /// Rename `from` to `to`.
    RenameFile {
        /// Current path.
        from: String,
        /// New path.
        to: String,
    },
    /// Query the descriptor of `path`.
    GetFileInfo {
        /// File path.
        path: String,
    },
    /// Restart the device.
    Reboot,
}

#[derive(Serialize)]
struct PathParams<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct SizedPathParams<'a> {
    path: &'a str,
    size: u64,
}

#[derive(Serialize)]
struct RenameParams<'a> {
    from: &'a str,
    to: &'a str,
}

impl Request {
    /// Operation this request belongs to.
    pub fn operation(&self) -> Operation {
        match self {
            Self::GetVersion => Operation::GetVersion,
            Self::ListFolder { .. } => Operation::ListFolder,
            Self::WriteFileStart { .. } => Operation::WriteFileStart,
            Self::WriteFileData { .. } => Operation::WriteFileData,
            Self::WriteFileEnd { .. } => Operation::WriteFileEnd,
            Self::ReadFile { .. } => Operation::ReadFile,
            Self::DeleteFile { .. } => Operation::DeleteFile,
            Self::MakeDirectory { .. } => Operation::MakeDirectory,
            Self::RenameFile { .. } => Operation::RenameFile,
            Self::GetFileInfo { .. } => Operation::GetFileInfo,
            Self::Reboot => Operation::Reboot,
        }
    }

    /// Encode the request payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::GetVersion | Self::Reboot => Vec::new(),
            Self::ListFolder { path }
            | Self::ReadFile { path }
            | Self::DeleteFile { path }
            | Self::MakeDirectory { path }
            | Self::GetFileInfo { path } => serde_json::to_vec(&PathParams { path })?,
            Self::WriteFileStart { path, size } | Self::WriteFileEnd { path, size } => {
                serde_json::to_vec(&SizedPathParams { path, size: *size })?
            },
            Self::RenameFile { from, to } => serde_json::to_vec(&RenameParams { from, to })?,
            Self::WriteFileData { path, data, last } => encode_write_data(path, data, *last)?,
        };
        Ok(payload)
    }

    /// Encode the request as a complete wire frame.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        frame::encode(self.operation().request_code(), &self.encode()?)
    }
}

/// Build a write-data payload: length-prefixed path, flags, raw bytes.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode_write_data(path: &str, data: &[u8], last: bool) -> Result<Vec<u8>> {
    let path_len = u16::try_from(path.len())
        .map_err(|_| Error::Protocol(format!("path too long ({} bytes)", path.len())))?;

    let mut payload = Vec::with_capacity(2 + path.len() + 1 + data.len());
    payload.write_u16::<LittleEndian>(path_len).unwrap();
    payload.extend_from_slice(path.as_bytes());
    payload.push(if last { FLAG_LAST_CHUNK } else { 0 });
    payload.extend_from_slice(data);
    Ok(payload)
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Firmware version.
    Version(VersionInfo),
    /// Directory contents.
    Listing(Vec<FileEntry>),
    /// A single file descriptor.
    FileInfo(FileEntry),
    /// Raw file contents.
    FileData(Vec<u8>),
    /// Success with no result.
    Ack,
}

impl Response {
    fn mismatch(&self, wanted: &str) -> Error {
        Error::Protocol(format!("expected {wanted} response, got {self:?}"))
    }

    /// Unwrap a version response.
    pub fn into_version(self) -> Result<VersionInfo> {
        match self {
            Self::Version(v) => Ok(v),
            other => Err(other.mismatch("version")),
        }
    }

    /// Unwrap a listing response.
    pub fn into_listing(self) -> Result<Vec<FileEntry>> {
        match self {
            Self::Listing(entries) => Ok(entries),
            other => Err(other.mismatch("listing")),
        }
    }

    /// Unwrap a file-info response.
    pub fn into_file_info(self) -> Result<FileEntry> {
        match self {
            Self::FileInfo(entry) => Ok(entry),
            other => Err(other.mismatch("file info")),
        }
    }

    /// Unwrap a file-data response.
    pub fn into_file_data(self) -> Result<Vec<u8>> {
        match self {
            Self::FileData(data) => Ok(data),
            other => Err(other.mismatch("file data")),
        }
    }

    /// Unwrap an acknowledgement.
    pub fn into_ack(self) -> Result<()> {
        match self {
            Self::Ack => Ok(()),
            other => Err(other.mismatch("acknowledgement")),
        }
    }
}

/// Uniform wrapper around structured responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// Whether the device completed the operation.
    pub success: bool,
    /// Device-provided failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Operation-specific result.
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    /// Successful envelope carrying `result`.
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            error_message: None,
            result: Some(result),
        }
    }

    /// Failure envelope with a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            result: None,
        }
    }

    /// Convert into the result, mapping `success: false` to [`Error::Device`].
    pub fn into_result(self) -> Result<Option<T>> {
        if self.success {
            Ok(self.result)
        } else {
            Err(Error::Device(
                self.error_message
                    .unwrap_or_else(|| "operation failed".to_string()),
            ))
        }
    }
}

/// Parse a structured payload into its envelope result.
pub fn parse_envelope<T: DeserializeOwned>(payload: &[u8]) -> Result<Option<T>> {
    let envelope: Envelope<T> = serde_json::from_slice(payload)?;
    envelope.into_result()
}

/// Whether a structured payload carries nothing: empty, whitespace or `null`.
fn is_blank_envelope(payload: &[u8]) -> bool {
    let trimmed = payload.trim_ascii();
    trimmed.is_empty() || trimmed == b"null"
}

fn required<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    parse_envelope(payload)?.ok_or_else(|| Error::Protocol("missing result".to_string()))
}

/// Firmware version report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Firmware version string.
    pub version: String,
    /// Hardware revision, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
}

/// Minimal file descriptor.
///
/// Directory names end with `/`; the root directory is `"/"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Entry name, with a trailing slash for directories.
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Whether the entry is a directory.
    #[serde(default)]
    pub is_directory: bool,
    /// Modification time in Unix seconds.
    #[serde(default)]
    pub last_modified: u64,
}

impl FileEntry {
    /// Make `name` and `is_directory` agree on the trailing-slash convention.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.name.ends_with('/') {
            self.is_directory = true;
        } else if self.is_directory {
            self.name.push('/');
        }
        self
    }

    /// Name without the directory marker.
    pub fn display_name(&self) -> &str {
        if self.name == "/" {
            &self.name
        } else {
            self.name.strip_suffix('/').unwrap_or(&self.name)
        }
    }
}

/// Join a directory path and an entry name with exactly one separator.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    format!("{dir}/{name}")
}
