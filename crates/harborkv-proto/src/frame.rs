use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;

use crate::{decode, ProtoError, Resp};

/// Read one complete RESP value from `r`, buffering partial frames in `buf`.
///
/// Returns the decoded value together with its raw wire bytes (the append-only
/// log stores the raw frame). `Ok(None)` signals a clean EOF on a frame
/// boundary; EOF in the middle of a frame is an error.
pub async fn read_value<R: AsyncReadExt + Unpin>(
    r: &mut R,
    max_frame: usize,
    buf: &mut BytesMut,
) -> Result<Option<(Resp, Bytes)>, ProtoError> {
    loop {
        if let Some((value, consumed)) = decode(&buf[..])? {
            if consumed > max_frame {
                return Err(ProtoError::FrameTooLarge);
            }
            let raw = buf.split_to(consumed).freeze();
            return Ok(Some((value, raw)));
        }
        if buf.len() > max_frame {
            return Err(ProtoError::FrameTooLarge);
        }
        let n = r.read_buf(buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ProtoError::Malformed("eof inside frame"));
        }
    }
}

/// Decode a buffer holding zero or more back-to-back frames, e.g. the
/// append-only log read back at startup.
pub fn decode_all(mut buf: &[u8]) -> Result<Vec<Resp>, ProtoError> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        match decode(buf)? {
            Some((value, consumed)) => {
                out.push(value);
                buf = &buf[consumed..];
            }
            None => return Err(ProtoError::Malformed("truncated trailing frame")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_argv;

    #[tokio::test]
    async fn reads_frames_split_across_reads() {
        let frame = encode_argv(&["SET", "k", "v"]);
        let (mut client, mut server) = tokio::io::duplex(8);
        let payload = frame.clone();
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for chunk in payload.chunks(3) {
                client.write_all(chunk).await.unwrap();
            }
            drop(client);
        });

        let mut buf = BytesMut::new();
        let (value, raw) = read_value(&mut server, 1024, &mut buf)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw, frame.freeze());
        match value {
            Resp::Array(items) => assert_eq!(items.len(), 3),
            other => panic!("unexpected value: {other:?}"),
        }
        assert!(read_value(&mut server, 1024, &mut buf).await.unwrap().is_none());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn enforces_max_frame() {
        let frame = encode_argv(&["SET", "k", &"x".repeat(512)]);
        let (mut client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = client.write_all(&frame).await;
        });
        let mut buf = BytesMut::new();
        let err = read_value(&mut server, 64, &mut buf).await.unwrap_err();
        assert!(matches!(err, ProtoError::FrameTooLarge));
    }

    #[test]
    fn decode_all_reads_concatenated_frames() {
        let mut log = BytesMut::new();
        log.extend_from_slice(&encode_argv(&["SET", "a", "1"]));
        log.extend_from_slice(&encode_argv(&["DEL", "a"]));
        let frames = decode_all(&log).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn decode_all_rejects_truncated_log() {
        let frame = encode_argv(&["SET", "a", "1"]);
        assert!(decode_all(&frame[..frame.len() - 2]).is_err());
    }
}
