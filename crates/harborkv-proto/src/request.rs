use bytes::BytesMut;

use crate::{ProtoError, Resp};

/// Encode a request as an array of bulk strings.
pub fn encode_argv<S: AsRef<str>>(args: &[S]) -> BytesMut {
    let items = args
        .iter()
        .map(|a| Resp::bulk(a.as_ref()))
        .collect::<Vec<_>>();
    Resp::Array(items).to_bytes()
}

/// Extract the argv from a decoded request frame. Inline simple strings are
/// tolerated alongside bulk strings; anything else is not a request.
pub fn argv_from_resp(value: &Resp) -> Result<Vec<String>, ProtoError> {
    let Resp::Array(items) = value else {
        return Err(ProtoError::NotARequest);
    };
    if items.is_empty() {
        return Err(ProtoError::NotARequest);
    }
    let mut argv = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Resp::Bulk(b) => argv.push(
                std::str::from_utf8(b)
                    .map_err(|_| ProtoError::InvalidUtf8)?
                    .to_string(),
            ),
            Resp::Simple(s) => argv.push(s.clone()),
            _ => return Err(ProtoError::NotARequest),
        }
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;

    #[test]
    fn argv_roundtrip() {
        let frame = encode_argv(&["LPUSH", "queue", "job-1"]);
        let (value, _) = decode(&frame).unwrap().unwrap();
        let argv = argv_from_resp(&value).unwrap();
        assert_eq!(argv, vec!["LPUSH", "queue", "job-1"]);
    }

    #[test]
    fn rejects_non_requests() {
        assert!(argv_from_resp(&Resp::Integer(1)).is_err());
        assert!(argv_from_resp(&Resp::Array(vec![])).is_err());
        assert!(argv_from_resp(&Resp::Array(vec![Resp::Integer(1)])).is_err());
    }
}
