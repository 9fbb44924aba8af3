//! Modbus Connection Management
//!
//! A single TCP session per device, shared by every register access, plus the
//! connection manager that decides when a (re)connect is allowed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::constants::{
    self, BACKOFF_BASE, BACKOFF_MAX, BACKOFF_THRESHOLD_FAILURES, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, MBAP_HEADER_LEN,
};
use crate::error::{ModbusError, Result};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::transport::{FrameProcessor, MbapHeader};

/// Register-level transport to one device
///
/// Implementations are not expected to multiplex: callers issue one request
/// at a time against a connected transport.
#[async_trait]
pub trait ModbusTransport: Send + Sync + fmt::Debug {
    /// Open the underlying session
    async fn connect(&self) -> Result<()>;

    /// Whether the session is currently usable
    fn is_connected(&self) -> bool;

    /// Release the session, tolerant of it already being closed
    async fn close(&self);

    /// FC04
    async fn read_input_registers(&self, unit_id: u8, address: u16, count: u16)
        -> Result<Vec<u16>>;

    /// FC03
    async fn read_holding_registers(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>>;

    /// FC06
    async fn write_single_register(&self, unit_id: u8, address: u16, value: u16) -> Result<()>;
}

/// Connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
    /// Request retries after a timeout
    pub retries: u8,
}

impl ConnectionParams {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: constants::DEFAULT_PORT,
            unit_id: constants::DEFAULT_UNIT_ID,
            timeout: constants::DEFAULT_TIMEOUT,
            retries: constants::DEFAULT_RETRIES,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// TCP transport
// ============================================================================

#[derive(Debug)]
struct Session {
    stream: TcpStream,
    processor: FrameProcessor,
}

impl Session {
    /// Send a request and wait for its response, retrying after timeouts
    async fn request(
        &mut self,
        unit_id: u8,
        pdu: &ModbusPdu,
        timeout_duration: Duration,
        retries: u8,
    ) -> Result<ModbusPdu> {
        let mut attempt = 0u8;
        loop {
            let frame = self.processor.build_frame(unit_id, pdu);
            match self.round_trip(&frame, timeout_duration).await {
                Ok(response) => {
                    return self.processor.parse_frame(&response).map(|(_, pdu)| pdu);
                },
                Err(ModbusError::Timeout(msg)) if attempt < retries => {
                    attempt += 1;
                    self.processor.clear_pending();
                    debug!("Retry {}/{}: {}", attempt, retries, msg);
                },
                Err(e) => {
                    self.processor.clear_pending();
                    return Err(e);
                },
            }
        }
    }

    /// Write a frame and read frames until the pending response arrives
    ///
    /// Late replies to earlier, timed-out requests are discarded.
    async fn round_trip(&mut self, frame: &[u8], timeout_duration: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout_duration;

        match timeout_at(deadline, self.stream.write_all(frame)).await {
            Ok(Ok(())) => debug!("TCP TX: {}B", frame.len()),
            Ok(Err(e)) => {
                error!("TCP TX: {}", e);
                return Err(ModbusError::io(format!("TCP write error: {e}")));
            },
            Err(_) => return Err(ModbusError::timeout("TCP write timeout")),
        }

        loop {
            let response = self.read_frame(deadline).await?;
            let transaction_id = u16::from_be_bytes([response[0], response[1]]);
            if self.processor.is_pending(transaction_id) {
                debug!("TCP RX: {}B", response.len());
                return Ok(response);
            }
            debug!("Stale response discarded: trans_id={:04X}", transaction_id);
        }
    }

    async fn read_frame(&mut self, deadline: Instant) -> Result<Vec<u8>> {
        // [Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][PDU(N)]
        let mut header = [0u8; MBAP_HEADER_LEN];
        match timeout_at(deadline, self.stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => {
                error!("TCP header RX: {}", e);
                return Err(ModbusError::io(format!("TCP header read error: {e}")));
            },
            Err(_) => {
                debug!("TCP header timeout");
                return Err(ModbusError::timeout("TCP header read timeout"));
            },
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        MbapHeader::validate_length(length)?;

        let mut response = vec![0u8; MBAP_HEADER_LEN + length];
        response[..MBAP_HEADER_LEN].copy_from_slice(&header);
        match timeout_at(
            deadline,
            self.stream.read_exact(&mut response[MBAP_HEADER_LEN..]),
        )
        .await
        {
            Ok(Ok(_)) => Ok(response),
            Ok(Err(e)) => {
                error!("TCP PDU RX: {}", e);
                Err(ModbusError::io(format!("TCP PDU read error: {e}")))
            },
            Err(_) => {
                debug!("TCP PDU timeout");
                Err(ModbusError::timeout("TCP PDU read timeout"))
            },
        }
    }
}

/// Modbus TCP client transport
///
/// The session mutex doubles as the request lock, so only one
/// request/response pair is ever on the wire.
pub struct TcpTransport {
    params: ConnectionParams,
    session: Mutex<Option<Session>>,
    connected: AtomicBool,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("address", &self.params.address())
            .field("connected", &self.connected.load(Ordering::Acquire))
            .finish()
    }
}

impl TcpTransport {
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    async fn execute(&self, unit_id: u8, pdu: &ModbusPdu) -> Result<ModbusPdu> {
        let mut guard = self.session.lock().await;
        let result = match guard.as_mut() {
            Some(session) => {
                session
                    .request(unit_id, pdu, self.params.timeout, self.params.retries)
                    .await
            },
            None => return Err(ModbusError::NotConnected),
        };

        if let Err(e) = &result {
            if e.needs_reconnect() {
                warn!("Session dropped: {}", e);
                *guard = None;
                self.connected.store(false, Ordering::Release);
            }
        }
        result
    }

    async fn read_registers(
        &self,
        function_code: u8,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let request = PduBuilder::build_read_request(function_code, address, count)?;
        let response = self.execute(unit_id, &request).await?;
        response.parse_registers(function_code, count)
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn connect(&self) -> Result<()> {
        let addr = self.params.address();
        let mut guard = self.session.lock().await;
        *guard = None;
        self.connected.store(false, Ordering::Release);

        debug!("TCP connecting: {}", addr);
        match timeout(self.params.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                *guard = Some(Session {
                    stream,
                    processor: FrameProcessor::new(),
                });
                self.connected.store(true, Ordering::Release);
                info!("TCP connected: {}", addr);
                Ok(())
            },
            Ok(Err(e)) => {
                debug!("TCP err: {} - {}", addr, e);
                Err(ModbusError::connection(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                debug!("TCP timeout: {}", addr);
                Err(ModbusError::timeout(format!("Connection to {addr} timed out")))
            },
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        if let Some(mut session) = self.session.lock().await.take() {
            if let Err(e) = session.stream.shutdown().await {
                debug!("TCP shutdown: {}", e);
            }
            debug!("Disconnected");
        }
    }

    async fn read_input_registers(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.read_registers(FC_READ_INPUT_REGISTERS, unit_id, address, count)
            .await
    }

    async fn read_holding_registers(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.read_registers(FC_READ_HOLDING_REGISTERS, unit_id, address, count)
            .await
    }

    async fn write_single_register(&self, unit_id: u8, address: u16, value: u16) -> Result<()> {
        let request = PduBuilder::build_write_single_register(address, value)?;
        let response = self.execute(unit_id, &request).await?;
        response.parse_write_echo(address, value)
    }
}

// ============================================================================
// Connection manager
// ============================================================================

/// Backoff window for a given consecutive-failure count
///
/// `None` below the threshold, otherwise `base * 2^(failures - threshold)`
/// capped at the maximum.
pub fn backoff_for(consecutive_failures: u32) -> Option<Duration> {
    if consecutive_failures < BACKOFF_THRESHOLD_FAILURES {
        return None;
    }
    // 2^4 * 300s already exceeds the cap
    let exponent = (consecutive_failures - BACKOFF_THRESHOLD_FAILURES).min(8);
    Some(BACKOFF_BASE.saturating_mul(1u32 << exponent).min(BACKOFF_MAX))
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionStats {
    pub consecutive_failures: u32,
    /// Number of times the manager entered backoff
    pub backoff_episodes: u32,
    pub last_attempt: Option<Instant>,
}

#[derive(Debug, Default)]
struct ConnectionState {
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
    backoff_notified: bool,
    backoff_episodes: u32,
}

/// Clears the in-flight flag on every exit path
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the device transport and the reconnect policy
#[derive(Debug)]
pub struct ConnectionManager {
    transport: Option<Arc<dyn ModbusTransport>>,
    target: String,
    unit_id: u8,
    state: Mutex<ConnectionState>,
    in_flight: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager for a Modbus TCP device
    pub fn new(params: ConnectionParams) -> Self {
        let target = params.address();
        let unit_id = params.unit_id;
        Self::build(Some(Arc::new(TcpTransport::new(params))), target, unit_id)
    }

    /// Create a manager around an existing transport
    pub fn with_transport(transport: Arc<dyn ModbusTransport>, unit_id: u8) -> Self {
        let target = format!("{:?}", transport);
        Self::build(Some(transport), target, unit_id)
    }

    /// Create a manager without a transport; every connect fails
    pub fn unconfigured() -> Self {
        Self::build(None, "<none>".to_string(), constants::DEFAULT_UNIT_ID)
    }

    fn build(transport: Option<Arc<dyn ModbusTransport>>, target: String, unit_id: u8) -> Self {
        Self {
            transport,
            target,
            unit_id,
            state: Mutex::new(ConnectionState::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Live transport handle, absent when none is configured
    pub fn handle(&self) -> Option<Arc<dyn ModbusTransport>> {
        self.transport.clone()
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .as_ref()
            .map(|t| t.is_connected())
            .unwrap_or(false)
    }

    /// Try to (re)connect, honoring the backoff window unless `startup`
    ///
    /// Returns the connected status. A call made while another attempt is in
    /// flight returns the current status without starting a second attempt.
    pub async fn connect(&self, startup: bool) -> bool {
        let Some(transport) = self.transport.as_ref() else {
            warn!("No transport configured");
            return false;
        };

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("Connect in flight: {}", self.target);
            return transport.is_connected();
        };

        {
            let mut state = self.state.lock().await;
            if !startup {
                if let (Some(window), Some(last)) =
                    (backoff_for(state.consecutive_failures), state.last_attempt)
                {
                    let elapsed = last.elapsed();
                    if elapsed < window {
                        debug!("Backoff: {}s remaining", (window - elapsed).as_secs());
                        return false;
                    }
                    info!("Backoff expired, retrying: {}", self.target);
                }
            }
            state.last_attempt = Some(Instant::now());
        }

        let outcome = match transport.connect().await {
            Ok(()) if transport.is_connected() => Ok(()),
            Ok(()) => Err(ModbusError::connection("Transport not connected after connect")),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                let mut state = self.state.lock().await;
                if state.consecutive_failures > 0 {
                    info!(
                        "Connected: {} (after {} failures)",
                        self.target, state.consecutive_failures
                    );
                } else {
                    info!("Connected: {}", self.target);
                }
                state.consecutive_failures = 0;
                state.backoff_notified = false;
                true
            },
            Err(e) => {
                {
                    let mut state = self.state.lock().await;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    let failures = state.consecutive_failures;

                    if !startup
                        && failures >= BACKOFF_THRESHOLD_FAILURES
                        && !state.backoff_notified
                    {
                        state.backoff_notified = true;
                        state.backoff_episodes += 1;
                        let window = backoff_for(failures).unwrap_or(BACKOFF_BASE);
                        warn!(
                            "Entering backoff: {} unreachable ({}x failed), retry in {}s: {}",
                            self.target,
                            failures,
                            window.as_secs(),
                            e
                        );
                    } else {
                        warn!("Connect failed ({}x): {} - {}", failures, self.target, e);
                    }
                }
                transport.close().await;
                false
            },
        }
    }

    /// Release the transport session
    pub async fn close(&self) {
        if let Some(transport) = self.transport.as_ref() {
            transport.close().await;
        }
    }

    pub async fn stats(&self) -> ConnectionStats {
        let state = self.state.lock().await;
        ConnectionStats {
            consecutive_failures: state.consecutive_failures,
            backoff_episodes: state.backoff_episodes,
            last_attempt: state.last_attempt,
        }
    }
}
