use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest length header accepted, in bytes. Wider than any `u64` in decimal.
const MAX_HEADER_LEN: u64 = 24;

/// Largest packet body accepted from an engine.
pub const MAX_PACKET_LEN: usize = 64 * 1024 * 1024;

/// Reads one `<length>\0<xml>\0` packet from the engine.
///
/// Returns `Ok(None)` when the engine closed the connection between packets.
/// Bodies that are not UTF-8 are decoded as ISO-8859-1, which is what engines
/// announce in the XML declaration when they do not speak UTF-8.
pub async fn read_packet<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut header = Vec::new();
    let bytes_read = (&mut *reader)
        .take(MAX_HEADER_LEN)
        .read_until(0, &mut header)
        .await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    if header.last() != Some(&0) {
        if header.len() as u64 >= MAX_HEADER_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "packet length header exceeds {MAX_HEADER_LEN} bytes: {:?}",
                    String::from_utf8_lossy(&header)
                ),
            ));
        }
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "engine closed the connection while reading a packet length",
        ));
    }
    header.pop();

    let length = std::str::from_utf8(&header)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "invalid packet length header: {:?}",
                    String::from_utf8_lossy(&header)
                ),
            )
        })?;
    if length > MAX_PACKET_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("packet length {length} exceeds the {MAX_PACKET_LEN} byte limit"),
        ));
    }

    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body).await?;

    let terminator = reader.read_u8().await?;
    if terminator != 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected NUL after packet body, found byte {terminator:#04x}"),
        ));
    }

    Ok(Some(decode_body(body)))
}

fn decode_body(body: Vec<u8>) -> String {
    match String::from_utf8(body) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Packet body is not UTF-8, decoding as ISO-8859-1");
            e.into_bytes().into_iter().map(char::from).collect()
        }
    }
}

/// Writes an already encoded, NUL-terminated command.
pub async fn write_command<W>(writer: &mut W, wire: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(wire.as_bytes()).await?;
    writer.flush().await
}
