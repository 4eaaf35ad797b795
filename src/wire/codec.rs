//! Encoding and decoding of request frames. No socket I/O happens here.
//!
//! ```text
//! [kind: i32 LE] [sender ip] [sender port] [kind-specific fields ...]
//! field := [len: u32 LE] [len bytes]
//! ```
//!
//! Strings are UTF-8, `u32` fields are 4 bytes LE and `i64`/`u64` fields
//! are 8 bytes LE. IP addresses travel as their text form.

use crate::wire::error::{CodecError, CodecResult};
use crate::wire::file_list::{FileList, ENTRY_SEPARATOR, FIELD_SEPARATOR};
use crate::wire::types::{FileOffer, Request, RequestKind, RequestPayload};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::{IpAddr, SocketAddr};

const TAG_SIZE: usize = 4;
const LEN_SIZE: usize = 4;

/// Encode a request into one frame (without the outer length prefix)
pub fn encode(request: &Request) -> CodecResult<Bytes> {
    let mut w = FieldWriter::with_capacity(128);
    w.buf.put_i32_le(request.kind().tag());
    w.put_str("sender_ip", &request.sender.ip().to_string())?;
    w.put_u32(u32::from(request.sender.port()));

    match &request.payload {
        RequestPayload::TextMessage { message } => {
            w.put_str("message", message)?;
        }
        RequestPayload::InboundFileTransferRequest {
            transfer_id,
            file_name,
            remote_folder,
            local_folder,
        } => {
            w.put_u32(*transfer_id);
            w.put_str("file_name", file_name)?;
            w.put_str("remote_folder", remote_folder)?;
            w.put_str("local_folder", local_folder)?;
        }
        RequestPayload::OutboundFileTransferRequest(offer) => {
            w.put_u32(offer.transfer_id);
            w.put_u32(offer.recipient_transfer_id);
            w.put_str("file_name", &offer.file_name)?;
            w.put_u64(offer.file_size);
            w.put_str("sender_folder", &offer.sender_folder)?;
            w.put_str("recipient_folder", &offer.recipient_folder)?;
            w.put_i64(offer.response_code);
            w.put_u32(offer.retry_counter);
            w.put_u32(offer.retry_limit);
        }
        RequestPayload::FileListRequest { folder }
        | RequestPayload::NoFilesAvailableForDownload { folder }
        | RequestPayload::RequestedFolderDoesNotExist { folder } => {
            w.put_str("folder", folder)?;
        }
        RequestPayload::FileListResponse { folder, files } => {
            w.put_str("folder", folder)?;
            w.put_str("field_separator", FIELD_SEPARATOR)?;
            w.put_str("entry_separator", ENTRY_SEPARATOR)?;
            w.put_str("file_list", &files.flatten(FIELD_SEPARATOR, ENTRY_SEPARATOR))?;
        }
        RequestPayload::RequestedFileDoesNotExist { transfer_id } => {
            w.put_u32(*transfer_id);
        }
        RequestPayload::FileTransferAccepted { response_code }
        | RequestPayload::FileTransferRejected { response_code }
        | RequestPayload::FileTransferStalled { response_code }
        | RequestPayload::FileTransferComplete { response_code } => {
            w.put_i64(*response_code);
        }
        RequestPayload::RetryOutboundFileTransfer {
            response_code,
            retry_counter,
            transfer_id,
        } => {
            w.put_i64(*response_code);
            w.put_u32(*retry_counter);
            w.put_u32(*transfer_id);
        }
        RequestPayload::RetryLimitExceeded {
            response_code,
            retry_limit,
            lockout_expire_ms,
        } => {
            w.put_i64(*response_code);
            w.put_u32(*retry_limit);
            w.put_i64(*lockout_expire_ms);
        }
        RequestPayload::ServerInfoResponse {
            local_ip,
            public_ip,
            platform,
            transfer_folder,
        } => {
            w.put_str("local_ip", &local_ip.to_string())?;
            let public = public_ip.map(|ip| ip.to_string()).unwrap_or_default();
            w.put_str("public_ip", &public)?;
            w.put_str("platform", platform)?;
            w.put_str("transfer_folder", transfer_folder)?;
        }
        RequestPayload::ServerInfoRequest | RequestPayload::ShutdownServerCommand => {}
    }

    Ok(w.buf.freeze())
}

/// Decode one frame back into a request
pub fn decode(frame: &[u8]) -> CodecResult<Request> {
    let mut r = FieldReader::new(frame);
    let tag = r.tag()?;
    let kind = RequestKind::try_from(tag)?;

    let sender_ip = r.ip("sender_ip")?;
    let sender_port = r.port("sender_port")?;
    let sender = SocketAddr::new(sender_ip, sender_port);

    let payload = match kind {
        RequestKind::TextMessage => RequestPayload::TextMessage {
            message: r.string("message")?,
        },
        RequestKind::InboundFileTransferRequest => RequestPayload::InboundFileTransferRequest {
            transfer_id: r.u32("transfer_id")?,
            file_name: r.string("file_name")?,
            remote_folder: r.string("remote_folder")?,
            local_folder: r.string("local_folder")?,
        },
        RequestKind::OutboundFileTransferRequest => {
            RequestPayload::OutboundFileTransferRequest(FileOffer {
                transfer_id: r.u32("transfer_id")?,
                recipient_transfer_id: r.u32("recipient_transfer_id")?,
                file_name: r.string("file_name")?,
                file_size: r.u64("file_size")?,
                sender_folder: r.string("sender_folder")?,
                recipient_folder: r.string("recipient_folder")?,
                response_code: r.i64("response_code")?,
                retry_counter: r.u32("retry_counter")?,
                retry_limit: r.u32("retry_limit")?,
            })
        }
        RequestKind::FileListRequest => RequestPayload::FileListRequest {
            folder: r.string("folder")?,
        },
        RequestKind::FileListResponse => {
            let folder = r.string("folder")?;
            let field_sep = r.string("field_separator")?;
            let entry_sep = r.string("entry_separator")?;
            let flat = r.string("file_list")?;
            RequestPayload::FileListResponse {
                folder,
                files: FileList::parse(&flat, &field_sep, &entry_sep),
            }
        }
        RequestKind::NoFilesAvailableForDownload => RequestPayload::NoFilesAvailableForDownload {
            folder: r.string("folder")?,
        },
        RequestKind::RequestedFolderDoesNotExist => RequestPayload::RequestedFolderDoesNotExist {
            folder: r.string("folder")?,
        },
        RequestKind::RequestedFileDoesNotExist => RequestPayload::RequestedFileDoesNotExist {
            transfer_id: r.u32("transfer_id")?,
        },
        RequestKind::FileTransferAccepted => RequestPayload::FileTransferAccepted {
            response_code: r.i64("response_code")?,
        },
        RequestKind::FileTransferRejected => RequestPayload::FileTransferRejected {
            response_code: r.i64("response_code")?,
        },
        RequestKind::FileTransferStalled => RequestPayload::FileTransferStalled {
            response_code: r.i64("response_code")?,
        },
        RequestKind::FileTransferComplete => RequestPayload::FileTransferComplete {
            response_code: r.i64("response_code")?,
        },
        RequestKind::RetryOutboundFileTransfer => RequestPayload::RetryOutboundFileTransfer {
            response_code: r.i64("response_code")?,
            retry_counter: r.u32("retry_counter")?,
            transfer_id: r.u32("transfer_id")?,
        },
        RequestKind::RetryLimitExceeded => RequestPayload::RetryLimitExceeded {
            response_code: r.i64("response_code")?,
            retry_limit: r.u32("retry_limit")?,
            lockout_expire_ms: r.i64("lockout_expire_ms")?,
        },
        RequestKind::ServerInfoRequest => RequestPayload::ServerInfoRequest,
        RequestKind::ServerInfoResponse => RequestPayload::ServerInfoResponse {
            local_ip: r.ip("local_ip")?,
            public_ip: r.optional_ip("public_ip")?,
            platform: r.string("platform")?,
            transfer_folder: r.string("transfer_folder")?,
        },
        RequestKind::ShutdownServerCommand => RequestPayload::ShutdownServerCommand,
    };

    r.finish()?;
    Ok(Request { sender, payload })
}

struct FieldWriter {
    buf: BytesMut,
}

impl FieldWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    fn put_field(&mut self, field: &'static str, bytes: &[u8]) -> CodecResult<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::FieldTooLarge {
            field,
            len: bytes.len(),
        })?;
        self.buf.put_u32_le(len);
        self.buf.put_slice(bytes);
        Ok(())
    }

    fn put_str(&mut self, field: &'static str, value: &str) -> CodecResult<()> {
        self.put_field(field, value.as_bytes())
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(4);
        self.buf.put_u32_le(value);
    }

    fn put_u64(&mut self, value: u64) {
        self.buf.put_u32_le(8);
        self.buf.put_u64_le(value);
    }

    fn put_i64(&mut self, value: i64) {
        self.buf.put_u32_le(8);
        self.buf.put_i64_le(value);
    }
}

struct FieldReader<'a> {
    frame: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    fn new(frame: &'a [u8]) -> Self {
        Self { frame, offset: 0 }
    }

    fn take(&mut self, field: &'static str, n: usize) -> CodecResult<&'a [u8]> {
        let available = self.frame.len() - self.offset;
        if available < n {
            return Err(CodecError::Truncated {
                field,
                offset: self.offset,
                needed: n,
                available,
            });
        }
        let bytes = &self.frame[self.offset..self.offset + n];
        self.offset += n;
        Ok(bytes)
    }

    fn tag(&mut self) -> CodecResult<i32> {
        let bytes = self.take("kind", TAG_SIZE)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Returns the field body and the offset at which it starts
    fn field(&mut self, field: &'static str) -> CodecResult<(usize, &'a [u8])> {
        let len = self.take(field, LEN_SIZE)?;
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let start = self.offset;
        Ok((start, self.take(field, len)?))
    }

    fn fixed<const N: usize>(&mut self, field: &'static str) -> CodecResult<[u8; N]> {
        let (offset, bytes) = self.field(field)?;
        <[u8; N]>::try_from(bytes).map_err(|_| CodecError::InvalidFieldLength {
            field,
            offset,
            expected: N,
            actual: bytes.len(),
        })
    }

    fn string(&mut self, field: &'static str) -> CodecResult<String> {
        let (offset, bytes) = self.field(field)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { field, offset })
    }

    fn u32(&mut self, field: &'static str) -> CodecResult<u32> {
        self.fixed::<4>(field).map(u32::from_le_bytes)
    }

    fn u64(&mut self, field: &'static str) -> CodecResult<u64> {
        self.fixed::<8>(field).map(u64::from_le_bytes)
    }

    fn i64(&mut self, field: &'static str) -> CodecResult<i64> {
        self.fixed::<8>(field).map(i64::from_le_bytes)
    }

    fn port(&mut self, field: &'static str) -> CodecResult<u16> {
        let value = self.u32(field)?;
        u16::try_from(value).map_err(|_| CodecError::InvalidAddress {
            field,
            value: value.to_string(),
        })
    }

    fn ip(&mut self, field: &'static str) -> CodecResult<IpAddr> {
        let text = self.string(field)?;
        text.parse()
            .map_err(|_| CodecError::InvalidAddress { field, value: text })
    }

    fn optional_ip(&mut self, field: &'static str) -> CodecResult<Option<IpAddr>> {
        let text = self.string(field)?;
        if text.is_empty() {
            return Ok(None);
        }
        text.parse()
            .map(Some)
            .map_err(|_| CodecError::InvalidAddress { field, value: text })
    }

    fn finish(self) -> CodecResult<()> {
        let remaining = self.frame.len() - self.offset;
        if remaining > 0 {
            return Err(CodecError::TrailingBytes {
                offset: self.offset,
                remaining,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::file_list::FileInfo;
    use std::net::Ipv4Addr;

    fn sender() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 9001)
    }

    fn sample_payloads() -> Vec<RequestPayload> {
        vec![
            RequestPayload::TextMessage {
                message: "ping".into(),
            },
            RequestPayload::TextMessage {
                message: String::new(),
            },
            RequestPayload::InboundFileTransferRequest {
                transfer_id: 7,
                file_name: "data.bin".into(),
                remote_folder: "/srv/share".into(),
                local_folder: String::new(),
            },
            RequestPayload::OutboundFileTransferRequest(FileOffer {
                transfer_id: 3,
                recipient_transfer_id: 0,
                file_name: "data.bin".into(),
                file_size: 1000,
                sender_folder: "/home/a".into(),
                recipient_folder: "/home/b".into(),
                response_code: 638_000_000_123_456_789,
                retry_counter: 1,
                retry_limit: 2,
            }),
            RequestPayload::FileListRequest {
                folder: "/srv/share".into(),
            },
            RequestPayload::FileListResponse {
                folder: "/srv/share".into(),
                files: FileList::new(vec![
                    FileInfo::new("a.txt", 1),
                    FileInfo::new("b.iso", 4_700_000_000),
                ]),
            },
            RequestPayload::FileListResponse {
                folder: "/empty".into(),
                files: FileList::default(),
            },
            RequestPayload::NoFilesAvailableForDownload {
                folder: "/empty".into(),
            },
            RequestPayload::RequestedFolderDoesNotExist {
                folder: "/missing".into(),
            },
            RequestPayload::RequestedFileDoesNotExist { transfer_id: 12 },
            RequestPayload::FileTransferAccepted { response_code: 1 },
            RequestPayload::FileTransferRejected { response_code: -5 },
            RequestPayload::FileTransferStalled {
                response_code: i64::MAX,
            },
            RequestPayload::FileTransferComplete { response_code: 42 },
            RequestPayload::RetryOutboundFileTransfer {
                response_code: 42,
                retry_counter: 2,
                transfer_id: 9,
            },
            RequestPayload::RetryLimitExceeded {
                response_code: 42,
                retry_limit: 2,
                lockout_expire_ms: 1_700_000_000_000,
            },
            RequestPayload::ServerInfoRequest,
            RequestPayload::ServerInfoResponse {
                local_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                public_ip: Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9))),
                platform: "linux".into(),
                transfer_folder: "/srv/share".into(),
            },
            RequestPayload::ServerInfoResponse {
                local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                public_ip: None,
                platform: String::new(),
                transfer_folder: String::new(),
            },
            RequestPayload::ShutdownServerCommand,
        ]
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let payloads = sample_payloads();
        for kind in RequestKind::ALL {
            assert!(
                payloads.iter().any(|p| p.kind() == kind),
                "no sample for {kind:?}"
            );
        }

        for payload in payloads {
            let request = Request::new(sender(), payload);
            let frame = encode(&request).unwrap();
            let decoded = decode(&frame).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn test_text_message_layout() {
        let request = Request::new(
            sender(),
            RequestPayload::TextMessage {
                message: "hi".into(),
            },
        );
        let frame = encode(&request).unwrap();

        assert_eq!(&frame[..4], &1i32.to_le_bytes());
        let ip = "192.168.1.20";
        assert_eq!(&frame[4..8], &(ip.len() as u32).to_le_bytes());
        assert_eq!(&frame[8..8 + ip.len()], ip.as_bytes());
        let port_at = 8 + ip.len();
        assert_eq!(&frame[port_at..port_at + 4], &4u32.to_le_bytes());
        assert_eq!(&frame[port_at + 4..port_at + 8], &9001u32.to_le_bytes());
        assert_eq!(&frame[frame.len() - 2..], b"hi");
    }

    #[test]
    fn test_unknown_kind_fails() {
        let mut frame = encode(&Request::new(sender(), RequestPayload::ServerInfoRequest))
            .unwrap()
            .to_vec();
        frame[..4].copy_from_slice(&99i32.to_le_bytes());
        assert_eq!(decode(&frame), Err(CodecError::UnknownKind(99)));

        frame[..4].copy_from_slice(&0i32.to_le_bytes());
        assert_eq!(decode(&frame), Err(CodecError::UnknownKind(0)));
    }

    #[test]
    fn test_truncated_frame_reports_field() {
        let request = Request::new(
            sender(),
            RequestPayload::FileTransferAccepted { response_code: 77 },
        );
        let frame = encode(&request).unwrap();
        let err = decode(&frame[..frame.len() - 3]).unwrap_err();
        match err {
            CodecError::Truncated {
                field,
                needed,
                available,
                ..
            } => {
                assert_eq!(field, "response_code");
                assert_eq!(needed, 8);
                assert_eq!(available, 5);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }

        assert!(matches!(
            decode(&frame[..2]),
            Err(CodecError::Truncated { field: "kind", .. })
        ));
    }

    #[test]
    fn test_numeric_field_with_wrong_length() {
        let mut frame = BytesMut::new();
        frame.put_i32_le(RequestKind::RequestedFileDoesNotExist.tag());
        frame.put_u32_le(9);
        frame.put_slice(b"127.0.0.1");
        frame.put_u32_le(4);
        frame.put_u32_le(9001);
        frame.put_u32_le(2);
        frame.put_u16_le(5);

        let err = decode(&frame).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidFieldLength {
                field: "transfer_id",
                expected: 4,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let request = Request::new(sender(), RequestPayload::ShutdownServerCommand);
        let mut frame = encode(&request).unwrap().to_vec();
        frame.extend_from_slice(&[0, 1, 2]);
        assert!(matches!(
            decode(&frame),
            Err(CodecError::TrailingBytes { remaining: 3, .. })
        ));
    }

    #[test]
    fn test_invalid_sender_address() {
        let mut frame = BytesMut::new();
        frame.put_i32_le(RequestKind::ServerInfoRequest.tag());
        frame.put_u32_le(7);
        frame.put_slice(b"not-ip!");
        frame.put_u32_le(4);
        frame.put_u32_le(9001);

        assert!(matches!(
            decode(&frame),
            Err(CodecError::InvalidAddress {
                field: "sender_ip",
                ..
            })
        ));
    }

    #[test]
    fn test_file_list_skips_malformed_entries() {
        let mut frame = BytesMut::new();
        frame.put_i32_le(RequestKind::FileListResponse.tag());
        for s in ["127.0.0.1"] {
            frame.put_u32_le(s.len() as u32);
            frame.put_slice(s.as_bytes());
        }
        frame.put_u32_le(4);
        frame.put_u32_le(9001);
        for s in ["/share", "#", ";", "ok.txt#5;bad#x;fine.bin#9"] {
            frame.put_u32_le(s.len() as u32);
            frame.put_slice(s.as_bytes());
        }

        let request = decode(&frame).unwrap();
        let files = request.file_list().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files.files[1], FileInfo::new("fine.bin", 9));
    }

    #[test]
    fn test_file_list_with_pipe_in_name() {
        let listing = FileList::new(vec![
            FileInfo::new("draft|final.doc", 42),
            FileInfo::new("other.txt", 3),
        ]);
        let request = Request::new(
            sender(),
            RequestPayload::FileListResponse {
                folder: "/share".into(),
                files: listing.clone(),
            },
        );

        let decoded = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded.file_list().unwrap(), &listing);
    }

    #[test]
    fn test_accessor_for_wrong_kind_fails() {
        let request = Request::new(sender(), RequestPayload::ServerInfoRequest);
        assert_eq!(
            request.text_message(),
            Err(CodecError::WrongKind {
                expected: RequestKind::TextMessage,
                actual: RequestKind::ServerInfoRequest,
            })
        );
        assert!(request.response_code().is_err());
        assert!(request.file_list().is_err());

        let text = Request::new(
            sender(),
            RequestPayload::TextMessage {
                message: "hello".into(),
            },
        );
        assert_eq!(text.text_message(), Ok("hello"));
    }
}
