//! Modbus TCP simulator for testing
//!
//! A small in-memory heat pump controller: input and holding registers keyed
//! by protocol address, FC03/FC04/FC06 only. Unknown registers answer with
//! exception code 2, like the real device for absent optional sensors.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_ILLEGAL_DATA_ADDRESS, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_MBAP_LENGTH, MBAP_HEADER_LEN,
};
use crate::error::Result;

/// Illegal function
const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

#[derive(Debug, Default)]
struct Registers {
    input: HashMap<u16, u16>,
    holding: HashMap<u16, u16>,
}

/// In-memory Modbus TCP server
#[derive(Debug, Clone, Default)]
pub struct ModbusSimulator {
    registers: Arc<RwLock<Registers>>,
    response_delay_ms: Arc<AtomicU64>,
    requests: Arc<AtomicU64>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ModbusSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_input(&self, address: u16, value: u16) {
        self.registers.write().await.input.insert(address, value);
    }

    pub async fn set_holding(&self, address: u16, value: u16) {
        self.registers.write().await.holding.insert(address, value);
    }

    pub async fn holding(&self, address: u16) -> Option<u16> {
        self.registers.read().await.holding.get(&address).copied()
    }

    /// Delay every response, used to exercise client timeouts
    pub fn set_response_delay(&self, delay: Duration) {
        self.response_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of requests answered so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Start listening on 127.0.0.1 with an ephemeral port
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;
        info!("Modbus simulator listening on {}", local_addr);

        let sim = self.clone();
        let accept = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("New connection from {}", peer);
                        let conn_sim = sim.clone();
                        let handle = tokio::spawn(async move {
                            conn_sim.handle_connection(stream).await;
                        });
                        sim.tasks.lock().await.push(handle);
                    },
                    Err(e) => {
                        error!("Accept error: {}", e);
                        break;
                    },
                }
            }
        });
        self.tasks.lock().await.push(accept);

        Ok(local_addr)
    }

    /// Stop accepting and drop every open connection
    pub async fn shutdown(&self) {
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        debug!("Simulator stopped");
    }

    async fn handle_connection(&self, mut stream: TcpStream) {
        loop {
            let mut header = [0u8; MBAP_HEADER_LEN];
            if stream.read_exact(&mut header).await.is_err() {
                break;
            }

            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            if length < 2 || length > MAX_MBAP_LENGTH {
                debug!("Bad frame length: {}", length);
                break;
            }

            let mut body = vec![0u8; length];
            if stream.read_exact(&mut body).await.is_err() {
                break;
            }

            let tid = u16::from_be_bytes([header[0], header[1]]);
            let protocol_id = u16::from_be_bytes([header[2], header[3]]);
            if protocol_id != 0 {
                continue;
            }

            let unit_id = body[0];
            let pdu = self.respond(&body[1..]).await;
            self.requests.fetch_add(1, Ordering::Relaxed);

            let delay = self.response_delay_ms.load(Ordering::Relaxed);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let mut response = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
            response.extend_from_slice(&tid.to_be_bytes());
            response.extend_from_slice(&[0x00, 0x00]);
            response.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
            response.push(unit_id);
            response.extend_from_slice(&pdu);

            if let Err(e) = stream.write_all(&response).await {
                debug!("Write error: {}", e);
                break;
            }
        }
    }

    /// Build the response PDU for a request PDU
    async fn respond(&self, request: &[u8]) -> Vec<u8> {
        let Some(&function_code) = request.first() else {
            return exception(0, EXCEPTION_ILLEGAL_FUNCTION);
        };
        if request.len() < 5 {
            return exception(function_code, EXCEPTION_ILLEGAL_FUNCTION);
        }
        let address = u16::from_be_bytes([request[1], request[2]]);
        let operand = u16::from_be_bytes([request[3], request[4]]);

        match function_code {
            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
                let registers = self.registers.read().await;
                let table = if function_code == FC_READ_HOLDING_REGISTERS {
                    &registers.holding
                } else {
                    &registers.input
                };

                let values: Option<Vec<u16>> = (0..operand)
                    .map(|i| table.get(&address.wrapping_add(i)).copied())
                    .collect();
                match values {
                    Some(values) => {
                        let mut pdu = vec![function_code, (values.len() * 2) as u8];
                        for value in values {
                            pdu.extend_from_slice(&value.to_be_bytes());
                        }
                        pdu
                    },
                    None => exception(function_code, EXCEPTION_ILLEGAL_DATA_ADDRESS),
                }
            },
            FC_WRITE_SINGLE_REGISTER => {
                let mut registers = self.registers.write().await;
                match registers.holding.get_mut(&address) {
                    Some(slot) => {
                        *slot = operand;
                        request[..5].to_vec()
                    },
                    None => exception(function_code, EXCEPTION_ILLEGAL_DATA_ADDRESS),
                }
            },
            _ => exception(function_code, EXCEPTION_ILLEGAL_FUNCTION),
        }
    }
}

fn exception(function_code: u8, code: u8) -> Vec<u8> {
    vec![function_code | EXCEPTION_FLAG, code]
}
