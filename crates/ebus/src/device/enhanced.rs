//! Enhanced device: a smart adapter performs arbitration itself and
//! reports every command and event over a 2-byte framed protocol (§4.2).

use super::{ArbitrationState, Received};
use crate::error::{Error, Result};
use crate::symbol::{Symbol, SYN};
use crate::transport::Transport;
use std::time::Duration;
use std::time::Instant;

const ENH_BYTE1: u8 = 0xc0;
const ENH_BYTE2: u8 = 0x80;
const ENH_BYTE_MASK: u8 = 0xc0;

const REQ_INIT: u8 = 0x0;
const REQ_SEND: u8 = 0x1;
const REQ_START: u8 = 0x2;
#[allow(dead_code)]
const REQ_INFO: u8 = 0x3;

const RES_RESETTED: u8 = 0x0;
const RES_RECEIVED: u8 = 0x1;
const RES_STARTED: u8 = 0x2;
const RES_INFO: u8 = 0x3;
const RES_FAILED: u8 = 0xa;
const RES_ERROR_EBUS: u8 = 0xb;
const RES_ERROR_HOST: u8 = 0xc;

/// Build the 2-byte enhanced frame for `cmd`/`data`.
fn make_sequence(cmd: u8, data: u8) -> [u8; 2] {
    [
        ENH_BYTE1 | (cmd << 2) | ((data & 0xc0) >> 6),
        ENH_BYTE2 | (data & 0x3f),
    ]
}

/// Decode the command nibble and payload from a 2-byte frame.
fn decode_sequence(byte1: u8, byte2: u8) -> (u8, u8) {
    let cmd = (byte1 >> 2) & 0x0f;
    let data = ((byte1 & 0x03) << 6) | (byte2 & 0x3f);
    (cmd, data)
}

/// A response decoded from the enhanced wire.
enum Response {
    Resetted,
    Received(Symbol),
    Started(Symbol),
    Failed(Symbol),
    Info(u8),
    ErrorEbus(u8),
    ErrorHost(u8),
}

/// Time after which an unsolicited RESETTED implies the adapter reset on
/// its own and the host should force a reconnect.
const SELF_RESET_GRACE: Duration = Duration::from_secs(3);

/// A device whose arbitration is performed by a smart adapter (§4.2,
/// "Enhanced device").
pub struct EnhancedDevice {
    transport: Transport,
    state: ArbitrationState,
    opened_at: Option<Instant>,
    initialized: bool,
}

impl EnhancedDevice {
    /// Wrap `transport` as an enhanced device.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            state: ArbitrationState::None,
            opened_at: None,
            initialized: false,
        }
    }

    pub(crate) async fn open(&mut self) -> Result<()> {
        self.transport.open().await?;
        let seq = make_sequence(REQ_INIT, 0);
        self.transport.write(&seq).await?;
        self.opened_at = Some(Instant::now());
        self.initialized = false;
        Ok(())
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.transport.is_valid()
    }

    pub(crate) async fn send(&mut self, value: Symbol) -> Result<()> {
        let seq = make_sequence(REQ_SEND, value);
        self.transport.write(&seq).await
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<Option<Response>> {
        let buf = self.transport.read(timeout).await?;
        if buf.is_empty() {
            return Ok(None);
        }
        let first = buf[0];
        if first & ENH_BYTE_MASK != ENH_BYTE1 {
            // Raw, non-framed byte passes through untouched.
            self.transport.consume(1);
            return Ok(Some(Response::Received(first)));
        }
        if buf.len() < 2 {
            return Ok(None);
        }
        let second = buf[1];
        if second & ENH_BYTE_MASK != ENH_BYTE2 {
            self.transport.consume(1);
            return Err(Error::Framing(format!(
                "expected enhanced continuation byte, got {second:#04x}"
            )));
        }
        self.transport.consume(2);
        let (cmd, data) = decode_sequence(first, second);
        Ok(Some(match cmd {
            RES_RESETTED => Response::Resetted,
            RES_RECEIVED => Response::Received(data),
            RES_STARTED => Response::Started(data),
            RES_FAILED => Response::Failed(data),
            RES_INFO => Response::Info(data),
            RES_ERROR_EBUS => Response::ErrorEbus(data),
            RES_ERROR_HOST => Response::ErrorHost(data),
            other => {
                return Err(Error::Framing(format!("unknown enhanced command {other:#x}")));
            }
        }))
    }

    pub(crate) async fn recv(&mut self, timeout: Duration) -> Result<Received> {
        loop {
            match self.read_frame(timeout).await? {
                None => return Err(Error::Timeout("byte from enhanced device".into())),
                Some(Response::Resetted) => {
                    if self.initialized {
                        if let Some(opened) = self.opened_at {
                            if opened.elapsed() > SELF_RESET_GRACE {
                                return Err(Error::TransportIo(std::io::Error::other(
                                    "enhanced adapter reset unexpectedly",
                                )));
                            }
                        }
                    }
                    self.initialized = true;
                    continue;
                }
                Some(Response::Received(value)) => {
                    return Ok(Received {
                        value,
                        arbitration: ArbitrationState::None,
                    });
                }
                Some(Response::Started(value)) => {
                    self.state = ArbitrationState::None;
                    return Ok(Received {
                        value,
                        arbitration: ArbitrationState::Won,
                    });
                }
                Some(Response::Failed(value)) => {
                    self.state = ArbitrationState::None;
                    return Ok(Received {
                        value,
                        arbitration: ArbitrationState::Lost,
                    });
                }
                Some(Response::Info(_)) => continue,
                Some(Response::ErrorEbus(code)) => {
                    return Err(Error::Framing(format!("adapter reported bus error {code:#04x}")));
                }
                Some(Response::ErrorHost(code)) => {
                    return Err(Error::Framing(format!("adapter reported host error {code:#04x}")));
                }
            }
        }
    }

    pub(crate) async fn start_arbitration(&mut self, master_address: Symbol) -> Result<()> {
        if master_address == SYN {
            self.state = ArbitrationState::None;
            return Ok(());
        }
        if self.state == ArbitrationState::Running {
            return Err(Error::Duplicate("arbitration already running".into()));
        }
        let seq = make_sequence(REQ_START, master_address);
        self.transport.write(&seq).await?;
        self.state = ArbitrationState::Running;
        Ok(())
    }

    pub(crate) fn is_arbitrating(&self) -> bool {
        self.state == ArbitrationState::Running
    }

    pub(crate) fn cancel_arbitration(&mut self) -> bool {
        let was_running = self.is_arbitrating();
        self.state = ArbitrationState::None;
        was_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_round_trips() {
        for cmd in 0u8..16 {
            for data in [0x00, 0x3f, 0x40, 0xaa, 0xff] {
                let [b1, b2] = make_sequence(cmd, data);
                assert_eq!(b1 & ENH_BYTE_MASK, ENH_BYTE1);
                assert_eq!(b2 & ENH_BYTE_MASK, ENH_BYTE2);
                assert_eq!(decode_sequence(b1, b2), (cmd, data));
            }
        }
    }

    #[tokio::test]
    async fn started_response_wins_arbitration() {
        use crate::transport::lab::LabTransport;

        let (transport, harness) = LabTransport::pair();
        let mut device = EnhancedDevice::new(Transport::Lab(transport));
        device.open().await.unwrap();
        harness.recv_sent().await; // drain INIT

        let frame = make_sequence(RES_STARTED, 0x03);
        harness.inject(&frame);
        let recvd = device.recv(Duration::from_millis(50)).await.unwrap();
        assert_eq!(recvd.value, 0x03);
        assert_eq!(recvd.arbitration, ArbitrationState::Won);
    }
}
