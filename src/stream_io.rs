//! Bulk stream import/export (spec §4.3, §6 "Bulk stream format").
//!
//! Wire format, big-endian throughout:
//! ```text
//! count : i32
//! repeated count times:
//!   name  : u16 length-prefixed UTF-8 string
//!   size  : i32
//!   bytes : size bytes
//! ```
//! Used for state transfer between cluster nodes; this module only implements
//! the framing and file copy, not the transport the bytes travel over.

use std::{io, path::Path};

use snafu::ResultExt;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};

use crate::{
    error::{IoSnafu, ListRootSnafu, LoaderIoError},
    io::Filesystem,
};

/// Writes every file directly under `root` to `output` in the wire format
/// above (spec §4.3 `toStream`).
pub async fn to_stream<FS, W>(
    fs: &FS,
    root: &Path,
    stream_buffer_size: usize,
    output: &mut W,
) -> Result<(), LoaderIoError>
where
    FS: Filesystem,
    W: AsyncWrite + Unpin + Send,
{
    let names = fs
        .list_dir(root)
        .await
        .context(ListRootSnafu { path: root.to_path_buf() })?
        .ok_or_else(|| {
            LoaderIoError::ListRoot {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "root is not a directory"),
            }
        })?;

    output
        .write_i32(names.len() as i32)
        .await
        .context(IoSnafu { path: root.to_path_buf() })?;

    let mut chunk = vec![0u8; stream_buffer_size];
    for name in names {
        let path = root.join(&name);
        let len = fs.len(&path).await.context(IoSnafu { path: path.clone() })?;
        let handle = fs.open_read(&path).await.context(IoSnafu { path: path.clone() })?;
        let mut reader = BufReader::new(handle);

        write_utf(output, &name).await.context(IoSnafu { path: path.clone() })?;
        output
            .write_i32(len as i32)
            .await
            .context(IoSnafu { path: path.clone() })?;

        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            let read = reader
                .read(&mut chunk[..want])
                .await
                .context(IoSnafu { path: path.clone() })?;
            if read == 0 {
                // The file shrank out from under us mid-export; the declared
                // size was already committed to the wire, so stop here
                // rather than writing fewer bytes than promised.
                break;
            }
            output
                .write_all(&chunk[..read])
                .await
                .context(IoSnafu { path: path.clone() })?;
            remaining -= read as u64;
        }
        // `reader` (and the file handle inside it) drops here, whether or
        // not the copy above ran to completion.
    }

    output.flush().await.context(IoSnafu { path: root.to_path_buf() })?;
    Ok(())
}

/// Reads the wire format above from `input`, creating one file per entry
/// under `root` (spec §4.3 `fromStream`).
pub async fn from_stream<FS, R>(
    fs: &FS,
    root: &Path,
    stream_buffer_size: usize,
    input: &mut R,
) -> Result<(), LoaderIoError>
where
    FS: Filesystem,
    R: AsyncRead + Unpin + Send,
{
    let count = input
        .read_i32()
        .await
        .context(IoSnafu { path: root.to_path_buf() })?;

    let mut chunk = vec![0u8; stream_buffer_size];
    for _ in 0..count {
        let name = read_utf(input).await.context(IoSnafu { path: root.to_path_buf() })?;
        let declared_size = input
            .read_i32()
            .await
            .context(IoSnafu { path: root.to_path_buf() })?
            .max(0) as u64;

        let path = root.join(&name);
        let handle = fs
            .open_write_truncate(&path)
            .await
            .context(IoSnafu { path: path.clone() })?;
        let mut writer = BufWriter::new(handle);

        let mut remaining = declared_size;
        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            let read = input
                .read(&mut chunk[..want])
                .await
                .context(IoSnafu { path: path.clone() })?;
            if read == 0 {
                // EOF before the declared count was satisfied: per spec
                // §4.3, this file's copy simply stops here, no error. Any
                // remaining entries after this one will observe the same
                // exhausted stream and stop the same way.
                break;
            }
            writer
                .write_all(&chunk[..read])
                .await
                .context(IoSnafu { path: path.clone() })?;
            remaining -= read as u64;
        }

        writer.flush().await.context(IoSnafu { path: path.clone() })?;
        // `writer` (and the file handle inside it) drops here, closing the
        // output file before moving on to the next entry.
    }

    Ok(())
}

/// Writes `value` as a 2-byte length prefix followed by its UTF-8 bytes,
/// mirroring the length-prefixed string encoding spec §6 describes.
async fn write_utf<W: AsyncWrite + Unpin + Send>(output: &mut W, value: &str) -> io::Result<()> {
    output.write_u16(value.len() as u16).await?;
    output.write_all(value.as_bytes()).await
}

async fn read_utf<R: AsyncRead + Unpin + Send>(input: &mut R) -> io::Result<String> {
    let len = input.read_u16().await? as usize;
    let mut buffer = vec![0u8; len];
    input.read_exact(&mut buffer).await?;
    String::from_utf8(buffer).map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use temp_dir::TempDir;

    use super::*;
    use crate::io::ProductionFilesystem;

    #[tokio::test]
    async fn round_trip_preserves_file_names_and_contents() {
        let source = TempDir::new().unwrap();
        tokio::fs::write(source.path().join("1"), b"alpha").await.unwrap();
        tokio::fs::write(source.path().join("2"), b"beta-content").await.unwrap();

        let mut wire = Cursor::new(Vec::new());
        to_stream(&ProductionFilesystem, source.path(), 4, &mut wire)
            .await
            .unwrap();

        let dest = TempDir::new().unwrap();
        wire.set_position(0);
        from_stream(&ProductionFilesystem, dest.path(), 4, &mut wire)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(dest.path().join("1")).await.unwrap(), b"alpha");
        assert_eq!(
            tokio::fs::read(dest.path().join("2")).await.unwrap(),
            b"beta-content"
        );
    }

    #[tokio::test]
    async fn empty_root_exports_zero_count() {
        let source = TempDir::new().unwrap();
        let mut wire = Cursor::new(Vec::new());
        to_stream(&ProductionFilesystem, source.path(), 64, &mut wire)
            .await
            .unwrap();
        assert_eq!(wire.into_inner(), 0i32.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn truncated_input_stops_that_files_copy_without_error() {
        let dest = TempDir::new().unwrap();

        let mut wire = Vec::new();
        wire.extend_from_slice(&1i32.to_be_bytes());
        wire.extend_from_slice(&5u16.to_be_bytes());
        wire.extend_from_slice(b"short");
        wire.extend_from_slice(&100i32.to_be_bytes());
        wire.extend_from_slice(b"only-ten-b");

        let mut cursor = Cursor::new(wire);
        from_stream(&ProductionFilesystem, dest.path(), 4, &mut cursor)
            .await
            .unwrap();

        assert_eq!(
            tokio::fs::read(dest.path().join("short")).await.unwrap(),
            b"only-ten-b"
        );
    }

    #[tokio::test]
    async fn missing_root_fails_export() {
        let missing = std::path::Path::new("/nonexistent/definitely/not/here");
        let mut wire = Cursor::new(Vec::new());
        let result = to_stream(&ProductionFilesystem, missing, 64, &mut wire).await;
        assert!(result.is_err());
    }
}
