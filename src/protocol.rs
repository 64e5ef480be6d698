//! Wire protocol: the RPC surface as a tagged-enum request/response
//! pair, framed as a length-prefixed JSON payload over a `TcpStream`.

use crate::error::{ArchiveError, ErrorKind};
use crate::model::{Annotations, ResultRecord};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One request variant per RPC method the archive server exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ArchiveRequest {
    CreateResult {
        parent: String,
        #[serde(default)]
        annotations: Annotations,
    },
    GetResult {
        name: String,
    },
    UpdateResult {
        name: String,
        result: ResultRecord,
        /// Dot-separated field-mask paths; absent means a whole-payload
        /// update rather than a masked merge.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        update_mask: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
    },
    DeleteResult {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
    },
    ListResults {
        parent: String,
        #[serde(default)]
        filter: String,
        #[serde(default)]
        page_size: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_token: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl From<&ArchiveError> for WireError {
    fn from(err: &ArchiveError) -> Self {
        let code = match err.kind() {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::FailedPrecondition => "failed_precondition",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        WireError {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ArchiveResponse {
    Result {
        result: ResultRecord,
    },
    ListResults {
        results: Vec<ResultRecord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_page_token: Option<String>,
    },
    Empty,
    Error {
        error: WireError,
    },
}

impl ArchiveResponse {
    pub fn from_result(result: Result<ArchiveResponse, ArchiveError>) -> ArchiveResponse {
        match result {
            Ok(response) => response,
            Err(e) => ArchiveResponse::Error {
                error: WireError::from(&e),
            },
        }
    }
}

/// Length-prefixed JSON framing: a big-endian `u32` byte length followed
/// by that many bytes of JSON, over a plain `AsyncRead` + `AsyncWrite`
/// stream.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME_LEN} byte limit"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> std::io::Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}
