// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Siemens S7 client over ISO-on-TCP
//!
//! Only what the sampler needs is implemented: connection setup and reading a
//! contiguous byte range of a data block.
//!
//! ## Framing
//!
//! Every message is a TPKT packet (RFC 1006) carrying an ISO 8073 COTP TPDU:
//!
//! ```text
//! TPKT   03 00 LL LL
//! COTP   CR/CC: 11 E0|D0 ...      DT: 02 F0 80
//! S7     32 <type> 00 00 <pdu ref> <param len> <data len> [error class/code] <params> <data>
//! ```
//!
//! The connection sequence is COTP connection request, COTP connection
//! confirm, then an S7 "setup communication" job that negotiates the PDU
//! length. Reads are S7 "read var" jobs addressing the DB area with a byte
//! transport size and a bit address.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{with_timeout, ControllerLink, LinkError, LinkSettings};

const TPKT_VERSION: u8 = 0x03;
const TPKT_HEADER_LEN: usize = 4;

const COTP_CONNECTION_REQUEST: u8 = 0xE0;
const COTP_CONNECTION_CONFIRM: u8 = 0xD0;
const COTP_DATA: u8 = 0xF0;
const COTP_LAST_DATA_UNIT: u8 = 0x80;
const COTP_TPDU_SIZE_1024: u8 = 0x0A;

const S7_PROTOCOL_ID: u8 = 0x32;
const S7_JOB: u8 = 0x01;
const S7_ACK_DATA: u8 = 0x03;

const FUNCTION_READ_VAR: u8 = 0x04;
const FUNCTION_SETUP_COMMUNICATION: u8 = 0xF0;

const AREA_DATA_BLOCK: u8 = 0x84;
const TRANSPORT_SIZE_BYTE: u8 = 0x02;
const RETURN_CODE_SUCCESS: u8 = 0xFF;

const LOCAL_TSAP: u16 = 0x0100;
const PG_CONNECTION: u16 = 0x01;
const REQUESTED_PDU_LENGTH: u16 = 480;

/// Bytes of a read var response that are not payload
const READ_RESPONSE_OVERHEAD: usize = 18;

// Offsets inside a complete ack-data frame (TPKT + COTP DT + S7 header)
const ACK_ERROR_CLASS: usize = 17;
const ACK_ERROR_CODE: usize = 18;
const ACK_FUNCTION: usize = 19;
const SETUP_PDU_LENGTH: usize = 25;
const READ_ITEM_COUNT: usize = 20;
const READ_RETURN_CODE: usize = 21;
const READ_TRANSPORT_SIZE: usize = 22;
const READ_DATA_LENGTH: usize = 23;
const READ_DATA: usize = 25;

/// Largest byte offset expressible in the 24 bit S7 bit address
const MAX_BYTE_OFFSET: u32 = 0x00FF_FFFF >> 3;

/// An S7 connection reading data blocks.
pub struct S7Link {
    settings: LinkSettings,
    stream: Option<TcpStream>,
    pdu_length: u16,
    pdu_reference: u16,
    last_activity: Instant,
}

impl S7Link {
    /// Open the TCP connection and perform the COTP and S7 handshakes.
    ///
    /// # Errors
    ///
    /// [`LinkError::Connect`] if the TCP connection fails, [`LinkError::Timeout`]
    /// or [`LinkError::Protocol`] if the handshake does not complete.
    pub async fn connect(settings: LinkSettings) -> Result<Self, LinkError> {
        let mut link = Self {
            settings,
            stream: None,
            pdu_length: REQUESTED_PDU_LENGTH,
            pdu_reference: 0,
            last_activity: Instant::now(),
        };
        let stream = link.establish().await?;
        link.stream = Some(stream);
        Ok(link)
    }

    /// PDU length negotiated with the controller
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    /// Largest number of bytes a single read can return
    pub fn max_read_length(&self) -> usize {
        usize::from(self.pdu_length).saturating_sub(READ_RESPONSE_OVERHEAD)
    }

    async fn establish(&mut self) -> Result<TcpStream, LinkError> {
        let endpoint = self.settings.endpoint();
        let timeout = self.settings.timeout;
        debug!("Opening S7 connection to {}", endpoint);

        let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(LinkError::Connect { endpoint, source }),
            Err(_) => {
                return Err(LinkError::Connect {
                    endpoint,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", timeout),
                    ),
                })
            }
        };
        stream.set_nodelay(true)?;

        let request = connection_request(self.settings.rack, self.settings.slot);
        let confirm = exchange(&mut stream, &request, timeout).await?;
        check_connection_confirm(&confirm)?;

        let request = setup_communication_request(self.next_pdu_reference());
        let response = exchange(&mut stream, &request, timeout).await?;
        self.pdu_length = parse_setup_communication(&response)?;
        self.last_activity = Instant::now();

        debug!(
            "S7 connection to {} established, PDU length {}",
            endpoint, self.pdu_length
        );
        Ok(stream)
    }

    fn next_pdu_reference(&mut self) -> u16 {
        self.pdu_reference = self.pdu_reference.wrapping_add(1);
        self.pdu_reference
    }
}

#[async_trait]
impl ControllerLink for S7Link {
    async fn read_block(
        &mut self,
        device_index: u16,
        byte_offset: u32,
        length: usize,
    ) -> Result<Vec<u8>, LinkError> {
        if length == 0 || length > self.max_read_length() {
            return Err(LinkError::Protocol(format!(
                "cannot read {} bytes in one request (limit {})",
                length,
                self.max_read_length()
            )));
        }

        if self.stream.is_some() && self.settings.idle_expired(self.last_activity) {
            debug!(
                "S7 connection to {} idle for more than {:?}, reconnecting",
                self.settings.endpoint(),
                self.settings.idle_timeout
            );
            self.stream = None;
        }

        let request = read_var_request(self.next_pdu_reference(), device_index, byte_offset, length)?;

        // The stream is taken out for the exchange so a failed or cancelled
        // request leaves the link disconnected rather than desynchronised.
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.establish().await?,
        };

        let response = exchange(&mut stream, &request, self.settings.timeout).await?;
        let result = parse_read_var(&response, length);

        if !matches!(result, Err(LinkError::Protocol(_))) {
            self.stream = Some(stream);
            self.last_activity = Instant::now();
        }
        result
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing S7 connection to {}", self.settings.endpoint());
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("s7://{}", self.settings.endpoint())
    }
}

/// Send `request` and wait for one complete TPKT frame in response.
async fn exchange(
    stream: &mut TcpStream,
    request: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, LinkError> {
    with_timeout("request", timeout, async {
        stream.write_all(request).await.map_err(LinkError::from)
    })
    .await?;
    with_timeout("response", timeout, receive_frame(stream)).await
}

async fn receive_frame(stream: &mut TcpStream) -> Result<Vec<u8>, LinkError> {
    let mut header = [0u8; TPKT_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    if header[0] != TPKT_VERSION {
        return Err(LinkError::Protocol(format!(
            "unexpected TPKT version 0x{:02X}",
            header[0]
        )));
    }

    let length = usize::from(u16::from_be_bytes([header[2], header[3]]));
    if length < TPKT_HEADER_LEN + 3 {
        return Err(LinkError::Protocol(format!("TPKT length {} too small", length)));
    }

    let mut frame = vec![0u8; length];
    frame[..TPKT_HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut frame[TPKT_HEADER_LEN..]).await?;
    Ok(frame)
}

fn tpkt(payload: &[u8]) -> Vec<u8> {
    let length = (payload.len() + TPKT_HEADER_LEN) as u16;
    let mut frame = Vec::with_capacity(usize::from(length));
    frame.extend_from_slice(&[TPKT_VERSION, 0x00]);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn s7_job(pdu_reference: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x02, COTP_DATA, COTP_LAST_DATA_UNIT];
    payload.extend_from_slice(&[S7_PROTOCOL_ID, S7_JOB, 0x00, 0x00]);
    payload.extend_from_slice(&pdu_reference.to_be_bytes());
    payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
    payload.extend_from_slice(params);
    payload.extend_from_slice(data);
    tpkt(&payload)
}

/// COTP connection request for a PG connection to `rack`/`slot`.
fn connection_request(rack: u8, slot: u8) -> Vec<u8> {
    let remote_tsap = (PG_CONNECTION << 8) | (u16::from(rack) * 0x20 + u16::from(slot));
    let [local_hi, local_lo] = LOCAL_TSAP.to_be_bytes();
    let [remote_hi, remote_lo] = remote_tsap.to_be_bytes();
    tpkt(&[
        0x11, // length of the COTP header that follows
        COTP_CONNECTION_REQUEST,
        0x00, 0x00, // destination reference
        0x00, 0x01, // source reference
        0x00, // class 0
        0xC0, 0x01, COTP_TPDU_SIZE_1024,
        0xC1, 0x02, local_hi, local_lo,
        0xC2, 0x02, remote_hi, remote_lo,
    ])
}

fn check_connection_confirm(frame: &[u8]) -> Result<(), LinkError> {
    match frame.get(5) {
        Some(&COTP_CONNECTION_CONFIRM) => Ok(()),
        Some(other) => Err(LinkError::Protocol(format!(
            "expected COTP connection confirm, got TPDU 0x{:02X}",
            other
        ))),
        None => Err(LinkError::Protocol("truncated COTP connection confirm".to_string())),
    }
}

fn setup_communication_request(pdu_reference: u16) -> Vec<u8> {
    let [pdu_hi, pdu_lo] = REQUESTED_PDU_LENGTH.to_be_bytes();
    s7_job(
        pdu_reference,
        &[
            FUNCTION_SETUP_COMMUNICATION,
            0x00,
            0x00, 0x01, // max AmQ calling
            0x00, 0x01, // max AmQ called
            pdu_hi, pdu_lo,
        ],
        &[],
    )
}

/// Validate the common ack-data header and return the function code.
fn check_ack_data(frame: &[u8], expected_function: u8) -> Result<(), LinkError> {
    if frame.len() <= ACK_FUNCTION || frame[5] != COTP_DATA || frame[7] != S7_PROTOCOL_ID {
        return Err(LinkError::Protocol("malformed S7 response".to_string()));
    }
    if frame[8] != S7_ACK_DATA {
        return Err(LinkError::Protocol(format!(
            "unexpected S7 message type 0x{:02X}",
            frame[8]
        )));
    }
    let (class, code) = (frame[ACK_ERROR_CLASS], frame[ACK_ERROR_CODE]);
    if class != 0 || code != 0 {
        return Err(LinkError::Protocol(format!(
            "S7 error class 0x{:02X} code 0x{:02X}",
            class, code
        )));
    }
    if frame[ACK_FUNCTION] != expected_function {
        return Err(LinkError::Protocol(format!(
            "unexpected S7 function 0x{:02X}",
            frame[ACK_FUNCTION]
        )));
    }
    Ok(())
}

fn parse_setup_communication(frame: &[u8]) -> Result<u16, LinkError> {
    check_ack_data(frame, FUNCTION_SETUP_COMMUNICATION)?;
    let bytes = frame
        .get(SETUP_PDU_LENGTH..SETUP_PDU_LENGTH + 2)
        .ok_or_else(|| LinkError::Protocol("truncated setup communication response".to_string()))?;
    let pdu_length = u16::from_be_bytes([bytes[0], bytes[1]]);
    if usize::from(pdu_length) <= READ_RESPONSE_OVERHEAD {
        return Err(LinkError::Protocol(format!(
            "negotiated PDU length {} too small",
            pdu_length
        )));
    }
    Ok(pdu_length)
}

fn read_var_request(
    pdu_reference: u16,
    db_number: u16,
    byte_offset: u32,
    length: usize,
) -> Result<Vec<u8>, LinkError> {
    if byte_offset > MAX_BYTE_OFFSET {
        return Err(LinkError::Protocol(format!(
            "byte offset {} out of S7 address range",
            byte_offset
        )));
    }
    let count = u16::try_from(length)
        .map_err(|_| LinkError::Protocol(format!("read length {} too large", length)))?;
    let [count_hi, count_lo] = count.to_be_bytes();
    let [db_hi, db_lo] = db_number.to_be_bytes();
    let [_, addr_hi, addr_mid, addr_lo] = (byte_offset << 3).to_be_bytes();

    Ok(s7_job(
        pdu_reference,
        &[
            FUNCTION_READ_VAR,
            0x01, // item count
            0x12, // variable specification
            0x0A, // length of the address specification
            0x10, // syntax id: S7ANY
            TRANSPORT_SIZE_BYTE,
            count_hi, count_lo,
            db_hi, db_lo,
            AREA_DATA_BLOCK,
            addr_hi, addr_mid, addr_lo,
        ],
        &[],
    ))
}

fn parse_read_var(frame: &[u8], expected_length: usize) -> Result<Vec<u8>, LinkError> {
    check_ack_data(frame, FUNCTION_READ_VAR)?;
    if frame.len() < READ_DATA {
        return Err(LinkError::Protocol("truncated read var response".to_string()));
    }
    if frame[READ_ITEM_COUNT] != 1 {
        return Err(LinkError::Protocol(format!(
            "expected one item, got {}",
            frame[READ_ITEM_COUNT]
        )));
    }

    let code = frame[READ_RETURN_CODE];
    if code != RETURN_CODE_SUCCESS {
        return Err(LinkError::Rejected {
            code,
            reason: return_code_reason(code),
        });
    }

    let raw_length = usize::from(u16::from_be_bytes([
        frame[READ_DATA_LENGTH],
        frame[READ_DATA_LENGTH + 1],
    ]));
    // Bit, real and octet-string transport sizes count bytes, the others count bits
    let data_length = match frame[READ_TRANSPORT_SIZE] {
        0x03 | 0x07 | 0x09 => raw_length,
        _ => raw_length / 8,
    };

    let data = frame
        .get(READ_DATA..READ_DATA + data_length)
        .ok_or_else(|| LinkError::Protocol("read var payload truncated".to_string()))?;
    if data.len() < expected_length {
        return Err(LinkError::Protocol(format!(
            "controller returned {} bytes, {} requested",
            data.len(),
            expected_length
        )));
    }
    Ok(data.to_vec())
}

fn return_code_reason(code: u8) -> &'static str {
    match code {
        0x01 => "hardware fault",
        0x03 => "accessing the object not allowed",
        0x05 => "address out of range",
        0x06 => "data type not supported",
        0x07 => "data type inconsistent",
        0x0A => "object does not exist",
        _ => "unknown item return code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn ack_frame(pdu_reference: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x02, COTP_DATA, COTP_LAST_DATA_UNIT];
        payload.extend_from_slice(&[S7_PROTOCOL_ID, S7_ACK_DATA, 0x00, 0x00]);
        payload.extend_from_slice(&pdu_reference.to_be_bytes());
        payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
        payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
        payload.extend_from_slice(&[0x00, 0x00]);
        payload.extend_from_slice(params);
        payload.extend_from_slice(data);
        tpkt(&payload)
    }

    fn setup_ack(pdu_length: u16) -> Vec<u8> {
        let [hi, lo] = pdu_length.to_be_bytes();
        ack_frame(1, &[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, hi, lo], &[])
    }

    fn read_ack(return_code: u8, payload: &[u8]) -> Vec<u8> {
        let bits = ((payload.len() * 8) as u16).to_be_bytes();
        let mut data = vec![return_code, 0x04, bits[0], bits[1]];
        data.extend_from_slice(payload);
        ack_frame(2, &[FUNCTION_READ_VAR, 0x01], &data)
    }

    fn connection_confirm() -> Vec<u8> {
        tpkt(&[
            0x11, COTP_CONNECTION_CONFIRM, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A, 0xC1,
            0x02, 0x01, 0x00, 0xC2, 0x02, 0x01, 0x01,
        ])
    }

    fn settings(port: u16) -> LinkSettings {
        LinkSettings {
            address: "127.0.0.1".to_string(),
            port,
            rack: 0,
            slot: 1,
            timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(5),
        }
    }

    /// Accept one connection and answer each received frame with the next canned reply
    async fn fake_plc(replies: Vec<Vec<u8>>) -> (u16, tokio::task::JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut requests = Vec::new();
            for reply in replies {
                let mut header = [0u8; 4];
                socket.read_exact(&mut header).await.unwrap();
                let length = usize::from(u16::from_be_bytes([header[2], header[3]]));
                let mut body = vec![0u8; length - 4];
                socket.read_exact(&mut body).await.unwrap();
                let mut request = header.to_vec();
                request.extend_from_slice(&body);
                requests.push(request);
                socket.write_all(&reply).await.unwrap();
            }
            requests
        });
        (port, handle)
    }

    #[test]
    fn test_connection_request_frame() {
        let frame = connection_request(0, 1);
        assert_eq!(
            frame,
            vec![
                0x03, 0x00, 0x00, 0x16, 0x11, 0xE0, 0x00, 0x00, 0x00, 0x01, 0x00, 0xC0, 0x01,
                0x0A, 0xC1, 0x02, 0x01, 0x00, 0xC2, 0x02, 0x01, 0x01,
            ]
        );

        // rack 1 slot 3 -> 0x20 + 3
        let frame = connection_request(1, 3);
        assert_eq!(&frame[20..22], &[0x01, 0x23]);
    }

    #[test]
    fn test_setup_communication_frame() {
        let frame = setup_communication_request(1);
        assert_eq!(
            frame,
            vec![
                0x03, 0x00, 0x00, 0x19, 0x02, 0xF0, 0x80, 0x32, 0x01, 0x00, 0x00, 0x00, 0x01,
                0x00, 0x08, 0x00, 0x00, 0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x01, 0xE0,
            ]
        );
    }

    #[test]
    fn test_read_var_frame() {
        let frame = read_var_request(2, 1, 0, 7).unwrap();
        assert_eq!(frame.len(), 31);
        assert_eq!(&frame[..4], &[0x03, 0x00, 0x00, 0x1F]);
        assert_eq!(
            &frame[17..],
            &[0x04, 0x01, 0x12, 0x0A, 0x10, 0x02, 0x00, 0x07, 0x00, 0x01, 0x84, 0x00, 0x00, 0x00]
        );

        // byte 10 of DB 300 -> bit address 80
        let frame = read_var_request(3, 300, 10, 4).unwrap();
        assert_eq!(&frame[25..27], &[0x01, 0x2C]);
        assert_eq!(&frame[28..31], &[0x00, 0x00, 0x50]);
    }

    #[test]
    fn test_read_var_rejects_out_of_range_offset() {
        assert!(matches!(
            read_var_request(1, 1, MAX_BYTE_OFFSET + 1, 7),
            Err(LinkError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_read_var_success() {
        let payload = [1, 2, 3, 0, 0, 0, 42];
        let data = parse_read_var(&read_ack(RETURN_CODE_SUCCESS, &payload), 7).unwrap();
        assert_eq!(data, payload.to_vec());
    }

    #[test]
    fn test_parse_read_var_item_error() {
        let frame = read_ack(0x0A, &[]);
        match parse_read_var(&frame, 7) {
            Err(LinkError::Rejected { code, reason }) => {
                assert_eq!(code, 0x0A);
                assert_eq!(reason, "object does not exist");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_read_var_header_error() {
        let mut frame = read_ack(RETURN_CODE_SUCCESS, &[0; 7]);
        frame[ACK_ERROR_CLASS] = 0x85;
        assert!(matches!(parse_read_var(&frame, 7), Err(LinkError::Protocol(_))));
    }

    #[test]
    fn test_parse_setup_communication() {
        assert_eq!(parse_setup_communication(&setup_ack(240)).unwrap(), 240);
        assert!(parse_setup_communication(&setup_ack(10)).is_err());
    }

    #[tokio::test]
    async fn test_connect_and_read_block() {
        let payload = [1, 2, 3, 0xFF, 0xFF, 0xFF, 0xFF];
        let (port, server) = fake_plc(vec![
            connection_confirm(),
            setup_ack(240),
            read_ack(RETURN_CODE_SUCCESS, &payload),
        ])
        .await;

        let mut link = S7Link::connect(settings(port)).await.unwrap();
        assert_eq!(link.pdu_length(), 240);
        assert_eq!(link.max_read_length(), 222);

        let data = link.read_block(1, 0, 7).await.unwrap();
        assert_eq!(data, payload.to_vec());
        link.close().await.ok();

        let requests = server.await.unwrap();
        assert_eq!(requests[0], connection_request(0, 1));
        assert_eq!(requests[2][17], FUNCTION_READ_VAR);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = S7Link::connect(settings(port)).await;
        assert!(matches!(result, Err(LinkError::Connect { .. })));
    }

    /// Serve every incoming connection as an S7 CPU answering reads with `payload`.
    /// The first `silent_reads` read requests are left unanswered.
    async fn scripted_plc(payload: [u8; 7], silent_reads: usize) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let silent = Arc::new(AtomicUsize::new(silent_reads));

        let accepted = connections.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let silent = silent.clone();
                tokio::spawn(async move {
                    while let Ok(request) = receive_frame(&mut socket).await {
                        let reply = match (request[5], request.get(17)) {
                            (COTP_CONNECTION_REQUEST, _) => connection_confirm(),
                            (_, Some(&FUNCTION_SETUP_COMMUNICATION)) => setup_ack(240),
                            (_, Some(&FUNCTION_READ_VAR)) => {
                                if silent
                                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                                        n.checked_sub(1)
                                    })
                                    .is_ok()
                                {
                                    continue;
                                }
                                read_ack(RETURN_CODE_SUCCESS, &payload)
                            }
                            _ => break,
                        };
                        if socket.write_all(&reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (port, connections)
    }

    #[tokio::test]
    async fn test_read_timeout_reconnects_on_next_read() {
        let payload = [1, 2, 3, 0, 0, 0, 42];
        let (port, connections) = scripted_plc(payload, 1).await;
        let mut link = S7Link::connect(LinkSettings {
            timeout: Duration::from_millis(200),
            ..settings(port)
        })
        .await
        .unwrap();

        let result = link.read_block(1, 0, 7).await;
        assert!(matches!(result, Err(LinkError::Timeout { .. })));
        assert!(link.stream.is_none());

        let data = link.read_block(1, 0, 7).await.unwrap();
        assert_eq!(data, payload.to_vec());
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        link.close().await.ok();
    }

    #[tokio::test]
    async fn test_idle_connection_is_reopened() {
        let payload = [4, 5, 6, 0, 0, 0, 7];
        let (port, connections) = scripted_plc(payload, 0).await;
        let mut link = S7Link::connect(LinkSettings {
            idle_timeout: Duration::from_millis(50),
            ..settings(port)
        })
        .await
        .unwrap();

        assert_eq!(link.read_block(1, 0, 7).await.unwrap(), payload.to_vec());
        assert_eq!(connections.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(link.read_block(1, 0, 7).await.unwrap(), payload.to_vec());
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        link.close().await.ok();
    }

    #[tokio::test]
    async fn test_zero_idle_timeout_keeps_connection() {
        let payload = [1, 2, 3, 0, 0, 0, 42];
        let (port, connections) = scripted_plc(payload, 0).await;
        let mut link = S7Link::connect(LinkSettings {
            idle_timeout: Duration::ZERO,
            ..settings(port)
        })
        .await
        .unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(link.read_block(1, 0, 7).await.unwrap(), payload.to_vec());
        }
        assert_eq!(connections.load(Ordering::SeqCst), 1);
        link.close().await.ok();
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_request() {
        let (port, _server) = fake_plc(vec![connection_confirm(), setup_ack(240)]).await;
        let mut link = S7Link::connect(settings(port)).await.unwrap();

        let result = link.read_block(1, 0, 500).await;
        assert!(matches!(result, Err(LinkError::Protocol(_))));
    }
}
