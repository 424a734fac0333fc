//! L3: the bus state machine performing arbitration, telegram framing,
//! escape handling, CRC verification, ACK/NAK retry, auto-SYN, and
//! passive observation.
//!
//! This follows the newer, more complete of the two historical bus-loop
//! designs (SPEC_FULL.md §9, Open Question (a)): states and counters line
//! up one-to-one with `DirectProtocolHandler`/`BusState`, folding CRC and
//! escape handling into the receive/send loop rather than splitting them
//! across separate reader/writer objects.

mod request;

pub use request::{BusRequest, RequestOutcome};

use crate::device::{ArbitrationState, Device};
use crate::error::{Error, Result};
use crate::symbol::{self, MasterSymbols, SlaveSymbols, Symbol, ACK, BROADCAST, NAK, SYN};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Time a full symbol takes on a 2400 bps line, rounded up (§4.3).
pub const SYMBOL_DURATION: Duration = Duration::from_millis(5);
/// Timeout for a sent byte's echo to arrive.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(10);
/// Silence after which the engine may generate its own SYN.
pub const SYN_TIMEOUT: Duration = Duration::from_millis(51);
/// Interval at which the fallback SYN generator emits SYN during silence.
pub const SYN_INTERVAL: Duration = Duration::from_millis(40);
/// Silence after which the bus is considered to have no signal.
pub const SIGNAL_TIMEOUT: Duration = Duration::from_millis(250);
/// Maximum time to wait for a slave's response after ACKing the command.
pub const SLAVE_RECV_TIMEOUT: Duration = Duration::from_millis(15);

/// The possible bus states, following `DirectProtocolHandler::BusState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// No signal on the bus.
    NoSignal,
    /// Skip all symbols until the next SYN.
    Skip,
    /// Ready for the next master (after a SYN, send/receive QQ).
    Ready,
    /// Receiving command (ZZ, PBSB, master data).
    RecvCmd,
    /// Receiving the command CRC.
    RecvCmdCrc,
    /// Receiving the command ACK/NAK.
    RecvCmdAck,
    /// Receiving the response (slave data).
    RecvRes,
    /// Receiving the response CRC.
    RecvResCrc,
    /// Receiving the response ACK/NAK.
    RecvResAck,
    /// Sending command (ZZ, PBSB, master data).
    SendCmd,
    /// Sending the command CRC.
    SendCmdCrc,
    /// Sending the response ACK/NAK.
    SendResAck,
    /// Sending the command ACK/NAK (answering as slave).
    SendCmdAck,
    /// Sending the response (slave data, answering as slave).
    SendRes,
    /// Sending the response CRC.
    SendResCrc,
    /// Sending SYN to close out a completed transfer.
    SendSyn,
}

/// Tunables for a running [`ProtocolEngine`] (§4.6 `EngineConfig`
/// supplies these; this is the subset the engine itself consumes).
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// This host's own master address.
    pub own_address: u8,
    /// Whether to also claim the derived slave address for answering.
    pub answer: bool,
    /// Retries permitted after losing bus arbitration.
    pub bus_lost_retries: u32,
    /// Retries permitted after a failed send (echo mismatch, timeout).
    pub failed_send_retries: u32,
    /// Number of auto-SYNs to wait before retrying after losing
    /// arbitration to a different-priority participant.
    pub lock_count: u32,
    /// Whether this engine may act as the fallback SYN generator.
    pub generate_syn: bool,
    /// Read-only: never writes to the bus (passive observation only).
    pub read_only: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            own_address: 0x03,
            answer: false,
            bus_lost_retries: 2,
            failed_send_retries: 2,
            lock_count: 3,
            generate_syn: false,
            read_only: false,
        }
    }
}

/// The effective lock count clamped to a minimum of 3, per §4.3.
fn effective_lock_count(configured: u32) -> u32 {
    configured.max(3)
}

/// Result of driving the engine through one complete telegram exchange.
#[derive(Debug)]
pub enum TelegramEvent {
    /// An active request completed (successfully or with a retryable
    /// failure already exhausted).
    RequestFinished {
        /// The request's final outcome.
        outcome: RequestOutcome,
    },
    /// A telegram was observed passively (not our own request) and may be
    /// of interest to the catalog/dispatcher cache.
    Observed {
        /// The master part observed.
        master: MasterSymbols,
        /// The slave part observed, if the destination was a slave and it
        /// answered.
        slave: Option<SlaveSymbols>,
    },
    /// Bus state changed in a way the dispatcher should know about (e.g.
    /// signal acquired/lost), with no telegram attached.
    StateChanged(BusState),
}

/// Drives the eBUS state machine over a single [`Device`].
///
/// Owns the device exclusively: per §5, only one task (the "protocol
/// thread") ever touches L1/L2, and this type is that task's state.
pub struct ProtocolEngine {
    device: Device,
    config: ProtocolConfig,
    state: BusState,
    remain_lock_count: u32,
    generate_syn_interval: Option<Duration>,
    last_activity: Option<Instant>,
    last_syn_receive: Option<Instant>,
    command: MasterSymbols,
    response: SlaveSymbols,
    current_request: Option<BusRequest>,
    repeat: bool,
    min_symbol_latency: Option<Duration>,
    max_symbol_latency: Option<Duration>,
}

impl ProtocolEngine {
    /// Build an engine around `device` with the given configuration.
    pub fn new(device: Device, config: ProtocolConfig) -> Self {
        let lock_count = effective_lock_count(config.lock_count);
        let remain_lock_count = if config.lock_count == 0 { 1 } else { 0 };
        let generate_syn_interval = if config.generate_syn {
            let number = symbol::master_number(config.own_address);
            Some(Duration::from_millis(10 * number as u64) + SYN_TIMEOUT)
        } else {
            None
        };
        Self {
            device,
            config: ProtocolConfig {
                lock_count,
                ..config
            },
            state: BusState::NoSignal,
            remain_lock_count,
            generate_syn_interval,
            last_activity: None,
            last_syn_receive: None,
            command: MasterSymbols::new(),
            response: SlaveSymbols::new(),
            current_request: None,
            repeat: false,
            min_symbol_latency: None,
            max_symbol_latency: None,
        }
    }

    /// Current bus state.
    pub fn state(&self) -> BusState {
        self.state
    }

    /// Whether a signal has been seen on the bus recently.
    pub fn has_signal(&self) -> bool {
        self.state != BusState::NoSignal
    }

    /// Observed min/max symbol echo latency, if any telegram has been
    /// exchanged yet.
    pub fn symbol_latency(&self) -> Option<(Duration, Duration)> {
        match (self.min_symbol_latency, self.max_symbol_latency) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    fn record_latency(&mut self, latency: Duration) {
        self.min_symbol_latency = Some(match self.min_symbol_latency {
            Some(min) => min.min(latency),
            None => latency,
        });
        self.max_symbol_latency = Some(match self.max_symbol_latency {
            Some(max) => max.max(latency),
            None => latency,
        });
    }

    fn set_state(&mut self, state: BusState) {
        if state != self.state {
            trace!(from = ?self.state, to = ?state, "bus state transition");
        }
        self.state = state;
    }

    /// Open the underlying device.
    pub async fn open(&mut self) -> Result<()> {
        self.device.open().await
    }

    /// Submit a request to be sent on the next opportunity. Only one
    /// request may be in flight at a time; callers queue additional
    /// requests at L5.
    pub fn submit(&mut self, request: BusRequest) -> Result<()> {
        if self.current_request.is_some() {
            return Err(Error::Duplicate("a request is already in flight".into()));
        }
        self.current_request = Some(request);
        Ok(())
    }

    /// Whether a request is currently being handled.
    pub fn is_busy(&self) -> bool {
        self.current_request.is_some()
    }

    /// Directly record a completed `(master, slave)` exchange as if it had
    /// just happened, bypassing arbitration and I/O (mirrors upstream's
    /// `injectMessage`; used to fold a purely local answer into the
    /// observation stream without touching the wire).
    pub fn inject(&mut self, master: MasterSymbols, slave: Option<SlaveSymbols>) -> TelegramEvent {
        TelegramEvent::Observed { master, slave }
    }

    /// Drive the engine for one step: wait for (or send) the next byte and
    /// advance the bus state machine, returning a [`TelegramEvent`] when
    /// one telegram completes or the bus's signal status changes.
    ///
    /// The caller (the Dispatcher's protocol-thread loop) calls this in a
    /// tight loop; each call performs at most one transport round trip.
    pub async fn step(&mut self) -> Result<Option<TelegramEvent>> {
        let timeout = self.next_timeout();
        let had_request = self.current_request.is_some() && self.state == BusState::Ready;

        if had_request && !self.config.read_only && self.remain_lock_count == 0 {
            return self.handle_send(timeout).await;
        }
        self.handle_receive(timeout).await
    }

    fn next_timeout(&self) -> Duration {
        match self.state {
            BusState::Ready | BusState::NoSignal | BusState::Skip => SYN_TIMEOUT,
            BusState::RecvRes | BusState::SendRes => SLAVE_RECV_TIMEOUT,
            _ => SEND_TIMEOUT,
        }
    }

    async fn handle_receive(&mut self, timeout: Duration) -> Result<Option<TelegramEvent>> {
        let recvd = match self.device.recv(timeout).await {
            Ok(r) => r,
            Err(Error::Timeout(_)) => return self.on_silence(),
            Err(e) => return Err(e),
        };
        self.last_activity = Some(Instant::now());

        if recvd.value == SYN {
            self.last_syn_receive = Some(Instant::now());
            if self.remain_lock_count > 0 {
                self.remain_lock_count -= 1;
            }
            if matches!(
                self.state,
                BusState::RecvCmd | BusState::RecvRes | BusState::SendCmd | BusState::SendRes
            ) {
                // SYN arrived where data was expected: framing violation.
                warn!("unexpected SYN mid-telegram");
                self.reset_exchange();
                self.set_state(BusState::Ready);
                return Err(Error::Framing("unexpected SYN mid-telegram".into()));
            }
            self.set_state(BusState::Ready);
            return Ok(None);
        }

        match recvd.arbitration {
            ArbitrationState::Won => {
                self.begin_send_after_arbitration();
                return Ok(None);
            }
            ArbitrationState::Lost => {
                self.on_arbitration_lost(recvd.value);
                return Ok(None);
            }
            _ => {}
        }

        self.feed_passive_byte(recvd.value).await
    }

    fn begin_send_after_arbitration(&mut self) {
        self.set_state(BusState::SendCmd);
    }

    fn on_arbitration_lost(&mut self, echoed: Symbol) {
        let candidate = self.config.own_address;
        self.remain_lock_count = if (echoed & 0x0F) == (candidate & 0x0F) {
            1
        } else {
            self.config.lock_count
        };
        if let Some(req) = &mut self.current_request {
            req.record_arbitration_retry();
        }
        self.set_state(BusState::Ready);
    }

    fn reset_exchange(&mut self) {
        self.command.clear();
        self.response.clear();
        self.repeat = false;
    }

    /// Fold a received byte from someone else's telegram into the passive
    /// observation state machine, completing and returning an
    /// [`TelegramEvent::Observed`] once the full exchange has been seen.
    async fn feed_passive_byte(&mut self, value: Symbol) -> Result<Option<TelegramEvent>> {
        match self.state {
            BusState::Ready => {
                self.reset_exchange();
                self.command.push(value);
                self.set_state(BusState::RecvCmd);
                Ok(None)
            }
            BusState::RecvCmd => {
                self.command.push(value);
                if let Some(nn) = self.command.data_len() {
                    if self.command.len() == MasterSymbols::data_offset() + 1 + nn {
                        self.set_state(BusState::RecvCmdCrc);
                    }
                }
                Ok(None)
            }
            BusState::RecvCmdCrc => {
                // `value` is the CRC byte itself, not yet part of
                // `self.command`: fold it in only after comparing it
                // against the CRC of the header and data already stored.
                let expected = self.command.calc_crc();
                self.command.push(value);
                if value != expected {
                    self.set_state(BusState::Ready);
                    return Err(Error::CrcMaster);
                }
                if self.command.destination() == BROADCAST {
                    self.set_state(BusState::Ready);
                    let master = std::mem::take(&mut self.command);
                    return Ok(Some(TelegramEvent::Observed {
                        master,
                        slave: None,
                    }));
                }
                self.set_state(BusState::RecvCmdAck);
                Ok(None)
            }
            BusState::RecvCmdAck => {
                if value == ACK {
                    if symbol::is_master(self.command.destination()) {
                        self.set_state(BusState::Ready);
                        let master = std::mem::take(&mut self.command);
                        Ok(Some(TelegramEvent::Observed {
                            master,
                            slave: None,
                        }))
                    } else {
                        self.set_state(BusState::RecvRes);
                        Ok(None)
                    }
                } else if value == NAK {
                    self.set_state(BusState::Ready);
                    Err(Error::Nak)
                } else {
                    self.set_state(BusState::Ready);
                    Err(Error::Framing("expected ACK/NAK".into()))
                }
            }
            BusState::RecvRes => {
                self.response.push(value);
                if let Some(nn) = self.response.data_len() {
                    if self.response.len() == SlaveSymbols::data_offset() + 1 + nn {
                        self.set_state(BusState::RecvResCrc);
                    }
                }
                Ok(None)
            }
            BusState::RecvResCrc => {
                let expected = self.response.calc_crc();
                self.response.push(value);
                if value != expected {
                    self.set_state(BusState::Ready);
                    return Err(Error::CrcSlave);
                }
                self.set_state(BusState::Ready);
                let master = std::mem::take(&mut self.command);
                let slave = std::mem::take(&mut self.response);
                Ok(Some(TelegramEvent::Observed {
                    master,
                    slave: Some(slave),
                }))
            }
            _ => Ok(None),
        }
    }

    fn on_silence(&mut self) -> Result<Option<TelegramEvent>> {
        let now = Instant::now();
        let silent_for = self.last_activity.map(|t| now.duration_since(t));
        if let Some(elapsed) = silent_for {
            if elapsed > SIGNAL_TIMEOUT && self.state != BusState::NoSignal {
                self.set_state(BusState::NoSignal);
                return Ok(Some(TelegramEvent::StateChanged(BusState::NoSignal)));
            }
        } else if self.state != BusState::NoSignal {
            self.set_state(BusState::NoSignal);
            return Ok(Some(TelegramEvent::StateChanged(BusState::NoSignal)));
        }
        Ok(None)
    }

    async fn handle_send(&mut self, timeout: Duration) -> Result<Option<TelegramEvent>> {
        let request = self.current_request.as_ref().expect("checked by caller");
        let master = request.master().clone();
        self.command = master;
        debug!(dest = ?self.command.destination(), "sending telegram");

        self.device.start_arbitration(self.config.own_address).await?;
        // The first byte back is the SYN itself (arbitration still
        // `None` while the device writes its candidate); the outcome
        // only resolves once the echoed candidate byte is read.
        let recvd = loop {
            let recvd = self.device.recv(timeout).await?;
            if recvd.arbitration == ArbitrationState::None && self.device.is_arbitrating() {
                continue;
            }
            break recvd;
        };
        if recvd.arbitration != ArbitrationState::Won {
            self.on_arbitration_lost(recvd.value);
            return Ok(None);
        }

        self.send_command_bytes().await?;

        let outcome = self.finish_send(timeout).await;
        self.reset_exchange();
        self.set_state(BusState::Ready);
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => RequestOutcome::Failed(e),
        };
        let mut request = self.current_request.take().expect("checked above");
        request.complete(outcome.clone());
        Ok(Some(TelegramEvent::RequestFinished { outcome }))
    }

    /// Write out `self.command`'s bytes, verifying each is echoed back
    /// unchanged.
    async fn send_command_bytes(&mut self) -> Result<()> {
        for i in 0..self.command.len() {
            let byte = self.command.at(i);
            self.device.send(byte).await?;
            let echo_start = Instant::now();
            let echoed = self.device.recv(SEND_TIMEOUT).await?;
            self.record_latency(echo_start.elapsed());
            if echoed.value != byte {
                self.set_state(BusState::Ready);
                return Err(Error::Framing("echo mismatch while sending".into()));
            }
        }
        Ok(())
    }

    async fn finish_send(&mut self, timeout: Duration) -> Result<RequestOutcome> {
        let dest = self.command.destination();
        if dest == BROADCAST {
            self.send_syn().await?;
            return Ok(RequestOutcome::Success {
                slave: None,
            });
        }
        if symbol::is_master(dest) {
            let mut ack = self.device.recv(timeout).await?;
            if ack.value == NAK && !self.repeat {
                // The command part has to be repeated once, and once
                // only, by the sender.
                self.repeat = true;
                self.send_command_bytes().await?;
                ack = self.device.recv(timeout).await?;
            }
            return match ack.value {
                ACK => Ok(RequestOutcome::Success { slave: None }),
                NAK => Err(Error::Nak),
                _ => Err(Error::Framing("expected ACK/NAK from master peer".into())),
            };
        }
        let ack = self.device.recv(timeout).await?;
        if ack.value != ACK {
            return Err(Error::Nak);
        }
        let slave = self.recv_slave_with_retry(timeout).await?;
        self.device.send(ACK).await?;
        self.send_syn().await?;
        Ok(RequestOutcome::Success { slave: Some(slave) })
    }

    async fn recv_slave_with_retry(&mut self, timeout: Duration) -> Result<SlaveSymbols> {
        for attempt in 0..2 {
            let mut slave = SlaveSymbols::new();
            loop {
                let recvd = self.device.recv(timeout).await?;
                slave.push(recvd.value);
                if let Some(nn) = slave.data_len() {
                    if slave.len() == SlaveSymbols::data_offset() + 1 + nn {
                        break;
                    }
                }
            }
            let expected = slave.calc_crc();
            let crc = self.device.recv(timeout).await?.value;
            if crc == expected {
                slave.push(crc);
                return Ok(slave);
            }
            if attempt == 0 {
                self.device.send(NAK).await?;
                // Discard our own echoed NAK before reading the retry.
                self.device.recv(SEND_TIMEOUT).await?;
            } else {
                return Err(Error::CrcSlave);
            }
        }
        unreachable!()
    }

    async fn send_syn(&mut self) -> Result<()> {
        self.device.send(SYN).await?;
        self.set_state(BusState::SendSyn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_count_clamped_to_minimum_three() {
        assert_eq!(effective_lock_count(0), 3);
        assert_eq!(effective_lock_count(1), 3);
        assert_eq!(effective_lock_count(10), 10);
    }

    #[test]
    fn syn_generation_interval_scales_with_master_number() {
        let config = ProtocolConfig {
            own_address: 0x03, // master_number(0x03) == 3
            generate_syn: true,
            ..Default::default()
        };
        let device = Device::Plain(crate::device::PlainDevice::new(
            crate::transport::Transport::Tcp(crate::transport::TcpTransport::new(
                "127.0.0.1".into(),
                0,
            )),
        ));
        let engine = ProtocolEngine::new(device, config);
        assert_eq!(
            engine.generate_syn_interval,
            Some(Duration::from_millis(10 * 3) + SYN_TIMEOUT)
        );
    }
}
