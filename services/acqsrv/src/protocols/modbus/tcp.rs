//! Modbus TCP connection source (MBAP framing)

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::constants::{mbap_frame_size, MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use super::pdu::ModbusPdu;
use crate::error::{AcqError, Result};
use crate::transport::ConnectionSource;

/// TCP endpoint holding at most one open stream
#[derive(Debug)]
pub struct TcpConnectionSource {
    name: String,
    address: String,
    timeout: Duration,
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl TcpConnectionSource {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        let address = format!("{}:{}", host, port);
        Self {
            name: format!("tcp://{}", address),
            address,
            timeout,
            stream: None,
            transaction_id: 0,
        }
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    async fn transact(&mut self, tid: u16, unit_id: u8, frame: &[u8]) -> Result<ModbusPdu> {
        let stream = self.stream.as_mut().ok_or_else(AcqError::not_connected)?;

        stream.write_all(frame).await?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        stream.read_exact(&mut header).await?;

        let resp_tid = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let resp_unit = header[6];

        if protocol_id != 0 {
            return Err(AcqError::connection(format!(
                "Invalid MBAP protocol id {}",
                protocol_id
            )));
        }
        if !(2..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(AcqError::connection(format!(
                "Invalid MBAP length {}",
                length
            )));
        }

        let mut body = vec![0u8; length - 1];
        stream.read_exact(&mut body).await?;

        // A stale or foreign reply means the stream is out of step
        if resp_tid != tid {
            return Err(AcqError::connection(format!(
                "Transaction id mismatch: sent {}, received {}",
                tid, resp_tid
            )));
        }
        if resp_unit != unit_id {
            return Err(AcqError::protocol(format!(
                "Unit id mismatch: sent {}, received {}",
                unit_id, resp_unit
            )));
        }

        ModbusPdu::from_slice(&body)
    }
}

#[async_trait]
impl ConnectionSource for TcpConnectionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        debug!(endpoint = %self.name, "Connecting");
        let stream = timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| AcqError::timeout(format!("Connect to {} timed out", self.address)))?
            .map_err(|e| AcqError::connection(format!("Connect to {}: {}", self.address, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(endpoint = %self.name, "Failed to set TCP_NODELAY: {}", e);
        }
        self.stream = Some(stream);
        info!(endpoint = %self.name, "Connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(endpoint = %self.name, "Connection closed");
        }
    }

    async fn exchange(&mut self, unit_id: u8, request: &ModbusPdu) -> Result<ModbusPdu> {
        let tid = self.next_transaction_id();

        let mut frame = BytesMut::with_capacity(mbap_frame_size(request.len()));
        frame.put_u16(tid);
        frame.put_u16(0);
        frame.put_u16((request.len() + 1) as u16);
        frame.put_u8(unit_id);
        frame.put_slice(request.as_slice());

        let wait = self.timeout;
        let outcome = timeout(wait, self.transact(tid, unit_id, &frame)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(AcqError::timeout(format!(
                "No response from {} within {:?}",
                self.address, wait
            ))),
        };

        if let Err(e) = &result {
            if e.is_connection_lost() {
                // Partial frames may remain in the socket
                self.stream = None;
            }
        }
        result
    }
}
