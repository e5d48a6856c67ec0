//! Modbus TCP simulator for integration testing
//!
//! Serves a [`DataBank`] over MBAP framing. Supports function codes
//! 1, 2, 3, 4, 5, 6, 15 and 16.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::DataBank;
use crate::model::Region;
use crate::protocols::modbus::constants::{
    function, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS,
};

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

/// In-memory Modbus TCP server
pub struct ModbusTcpSimulator {
    bank: Arc<Mutex<DataBank>>,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ModbusTcpSimulator {
    /// Bind to an ephemeral port on localhost and start serving
    pub async fn start(bank: DataBank) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let bank = Arc::new(Mutex::new(bank));
        info!("Modbus simulator listening on {}", addr);

        let shared = Arc::clone(&bank);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("New connection from {}", peer);
                        let bank = Arc::clone(&shared);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, bank).await {
                                debug!("Connection closed: {}", e);
                            }
                        });
                    },
                    Err(e) => {
                        debug!("Accept error: {}", e);
                        break;
                    },
                }
            }
        });

        Ok(Self { bank, addr, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn bank(&self) -> Arc<Mutex<DataBank>> {
        Arc::clone(&self.bank)
    }

    pub fn register(&self, region: Region, address: u16) -> u16 {
        self.bank.lock().register(region, address)
    }

    pub fn set_register(&self, region: Region, address: u16, value: u16) {
        self.bank.lock().set_register(region, address, value);
    }

    /// Stop accepting new connections
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ModbusTcpSimulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, bank: Arc<Mutex<DataBank>>) -> std::io::Result<()> {
    let mut header = [0u8; 7];
    loop {
        stream.read_exact(&mut header).await?;
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if protocol_id != 0 || length < 2 {
            return Ok(());
        }

        let mut pdu = vec![0u8; length - 1];
        stream.read_exact(&mut pdu).await?;

        let response = process(&pdu, &mut bank.lock());

        let mut frame = Vec::with_capacity(7 + response.len());
        frame.extend_from_slice(&header[0..4]);
        frame.extend_from_slice(&((response.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&response);
        stream.write_all(&frame).await?;
    }
}

fn exception(function_code: u8, code: u8) -> Vec<u8> {
    vec![function_code | 0x80, code]
}

fn word(pdu: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*pdu.get(at)?, *pdu.get(at + 1)?]))
}

fn in_range(start: u16, count: u16, max: u16) -> bool {
    count >= 1 && count <= max && u32::from(start) + u32::from(count) <= 65536
}

/// Handle one request PDU and build the response PDU
fn process(pdu: &[u8], bank: &mut DataBank) -> Vec<u8> {
    let Some(&fc) = pdu.first() else {
        return exception(0, ILLEGAL_FUNCTION);
    };
    let (Some(addr), Some(value)) = (word(pdu, 1), word(pdu, 3)) else {
        return exception(fc, ILLEGAL_DATA_VALUE);
    };

    match fc {
        function::READ_COILS | function::READ_DISCRETE_INPUTS => {
            let region = if fc == function::READ_COILS {
                Region::Coils
            } else {
                Region::DiscreteInputs
            };
            if !in_range(addr, value, MAX_READ_BITS) {
                return exception(fc, ILLEGAL_DATA_ADDRESS);
            }
            let bits = bank.read_bits(region, addr, value);
            let mut packed = vec![0u8; bits.len().div_ceil(8)];
            for (i, bit) in bits.iter().enumerate() {
                if *bit {
                    packed[i / 8] |= 1 << (i % 8);
                }
            }
            let mut response = vec![fc, packed.len() as u8];
            response.extend_from_slice(&packed);
            response
        },
        function::READ_HOLDING_REGISTERS | function::READ_INPUT_REGISTERS => {
            let region = if fc == function::READ_HOLDING_REGISTERS {
                Region::HoldingRegisters
            } else {
                Region::InputRegisters
            };
            if !in_range(addr, value, MAX_READ_REGISTERS) {
                return exception(fc, ILLEGAL_DATA_ADDRESS);
            }
            let mut response = vec![fc, (value * 2) as u8];
            for register in bank.read_registers(region, addr, value) {
                response.extend_from_slice(&register.to_be_bytes());
            }
            response
        },
        function::WRITE_SINGLE_COIL => {
            let state = match value {
                0xFF00 => true,
                0x0000 => false,
                _ => return exception(fc, ILLEGAL_DATA_VALUE),
            };
            bank.set_bit(Region::Coils, addr, state);
            pdu[..5].to_vec()
        },
        function::WRITE_SINGLE_REGISTER => {
            bank.set_register(Region::HoldingRegisters, addr, value);
            pdu[..5].to_vec()
        },
        function::WRITE_MULTIPLE_COILS => {
            let data = pdu.get(6..).unwrap_or(&[]);
            if !in_range(addr, value, MAX_WRITE_BITS) || data.len() < (value as usize).div_ceil(8) {
                return exception(fc, ILLEGAL_DATA_VALUE);
            }
            let bits: Vec<bool> = (0..value as usize)
                .map(|i| data[i / 8] & (1 << (i % 8)) != 0)
                .collect();
            bank.write_bits(Region::Coils, addr, &bits);
            pdu[..5].to_vec()
        },
        function::WRITE_MULTIPLE_REGISTERS => {
            let data = pdu.get(6..).unwrap_or(&[]);
            if !in_range(addr, value, MAX_WRITE_REGISTERS) || data.len() < value as usize * 2 {
                return exception(fc, ILLEGAL_DATA_VALUE);
            }
            let registers: Vec<u16> = data
                .chunks_exact(2)
                .take(value as usize)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            bank.set_registers(Region::HoldingRegisters, addr, &registers);
            pdu[..5].to_vec()
        },
        _ => exception(fc, ILLEGAL_FUNCTION),
    }
}
