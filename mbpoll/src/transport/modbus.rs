//! Transport backed by `tokio-modbus`.

use async_trait::async_trait;
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_modbus::client::{Client, Context, Reader, Writer, rtu, tcp};
use tokio_modbus::prelude::{Request, Response, Slave, SlaveContext};
use tracing::{debug, info, warn};

use super::{ConnectionKind, ModbusRequest, Reply, ResponseData, Transport};
use crate::config::ConnectOptions;
use crate::error::TransportError;
use crate::item::FunctionCode;

const DEFAULT_DEVICE_ID: u8 = 1;
const DEFAULT_TIMEOUT_MS: u64 = 1500;

/// MEI type for Read Device Identification.
const MEI_READ_DEVICE_ID: u8 = 0x0E;

/// Modbus TCP/RTU transport.
///
/// Serial RTU (plain or buffered), TCP, and RTU framing over a TCP socket
/// (`TcpRTUBuffered`, `Telnet`) are supported. ASCII serial, UDP and the
/// C701 UDP-serial bridge are reported as [`TransportError::Unsupported`].
pub struct ModbusTransport {
    context: Arc<Mutex<Option<Context>>>,
    open: Arc<AtomicBool>,
    device_id: AtomicU8,
    timeout_ms: AtomicU64,
}

impl Default for ModbusTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusTransport {
    pub fn new() -> Self {
        Self {
            context: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
            device_id: AtomicU8::new(DEFAULT_DEVICE_ID),
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT_MS),
        }
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::Connection(format!("Invalid address: {}", e)))?
            .next()
            .ok_or_else(|| TransportError::Connection(format!("No address for {}", host)))
    }

    async fn open_tcp(&self, host: &str, options: &ConnectOptions) -> Result<Context, TransportError> {
        let addr = Self::resolve(host, options.port).await?;
        let slave = Slave(self.device_id());

        tokio::time::timeout(self.timeout(), tcp::connect_slave(addr, slave))
            .await
            .map_err(|_| TransportError::Connection("Connection timeout".to_string()))?
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    async fn open_rtu_over_tcp(
        &self,
        host: &str,
        options: &ConnectOptions,
    ) -> Result<Context, TransportError> {
        let addr = Self::resolve(host, options.port).await?;

        let stream = tokio::time::timeout(self.timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Connection("Connection timeout".to_string()))?
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(rtu::attach_slave(stream, Slave(self.device_id())))
    }

    fn open_serial(&self, port: &str, options: &ConnectOptions) -> Result<Context, TransportError> {
        let parity = match options.parity.to_lowercase().as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };

        let stop_bits = match options.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match options.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let builder = tokio_serial::new(port, options.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits);

        let serial = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| TransportError::Connection(format!("Serial open failed: {}", e)))?;

        Ok(rtu::attach_slave(serial, Slave(self.device_id())))
    }
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn connect(
        &self,
        kind: ConnectionKind,
        host: &str,
        options: &ConnectOptions,
    ) -> Result<(), TransportError> {
        let ctx = match kind {
            ConnectionKind::Tcp => self.open_tcp(host, options).await?,
            ConnectionKind::TcpRtuBuffered | ConnectionKind::Telnet => {
                self.open_rtu_over_tcp(host, options).await?
            }
            ConnectionKind::Rtu | ConnectionKind::RtuBuffered => self.open_serial(host, options)?,
            ConnectionKind::AsciiSerial | ConnectionKind::Udp | ConnectionKind::C701 => {
                return Err(TransportError::Unsupported(kind.label().to_string()));
            }
        };

        let mut guard = self.context.lock().await;
        if let Some(mut previous) = guard.replace(ctx) {
            // Best effort, the old link is being replaced anyway.
            let _ = previous.disconnect().await;
        }
        self.open.store(true, Ordering::SeqCst);

        info!(kind = %kind, host = %host, "Modbus link open");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn set_device_id(&self, id: u8) {
        self.device_id.store(id, Ordering::SeqCst);
    }

    fn device_id(&self) -> u8 {
        self.device_id.load(Ordering::SeqCst)
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    fn submit(&self, request: ModbusRequest, reply: Reply) {
        let context = self.context.clone();
        let open = self.open.clone();
        let timeout = self.timeout();

        tokio::spawn(async move {
            // Malformed values are rejected before touching the link.
            if let Err(e) = check_request(&request) {
                reply.send(Err(e));
                return;
            }

            let mut guard = context.lock().await;
            let Some(ctx) = guard.as_mut() else {
                reply.send(Err(TransportError::NotConnected));
                return;
            };

            ctx.set_slave(Slave(request.device_id));
            let result = match tokio::time::timeout(timeout, execute(ctx, &request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
            };

            // A timed out or broken exchange leaves the stream in an unknown
            // position; drop the link so the engine reconnects.
            if matches!(
                result,
                Err(TransportError::Request(_)) | Err(TransportError::Timeout(_))
            ) {
                warn!(request = %reply.request(), "Dropping Modbus link after failed exchange");
                *guard = None;
                open.store(false, Ordering::SeqCst);
            }
            drop(guard);

            reply.send(result);
        });
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut guard = self.context.lock().await;
        self.open.store(false, Ordering::SeqCst);

        match guard.take() {
            Some(mut ctx) => ctx
                .disconnect()
                .await
                .map_err(|e| TransportError::Connection(e.to_string())),
            None => {
                debug!("Close requested on a link that is not open");
                Ok(())
            }
        }
    }
}

fn request_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Request(e.to_string())
}

fn exception_error(e: impl std::fmt::Debug) -> TransportError {
    TransportError::Exception(format!("{:?}", e))
}

fn word_count(len: usize) -> Result<u16, TransportError> {
    u16::try_from(len).map_err(|_| TransportError::Request(format!("Too many values: {}", len)))
}

fn device_id_code(value: u16) -> Result<u8, TransportError> {
    u8::try_from(value)
        .map_err(|_| TransportError::Request(format!("Invalid read device id code {}", value)))
}

/// Check that the value fits the frame for its function code.
fn check_request(request: &ModbusRequest) -> Result<(), TransportError> {
    word_count(request.value.as_slice().len())?;
    if request.function == FunctionCode::ReadDeviceIdentification {
        device_id_code(request.value.first().unwrap_or(1))?;
    }
    Ok(())
}

/// Perform one request on an open context.
async fn execute(ctx: &mut Context, request: &ModbusRequest) -> Result<ResponseData, TransportError> {
    let address = request.address;
    let words = request.value.as_slice();
    let quantity = request.value.first().unwrap_or(1);

    match request.function {
        FunctionCode::ReadCoils => {
            let bits = ctx
                .read_coils(address, quantity)
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;
            Ok(ResponseData::Bits(bits))
        }
        FunctionCode::ReadDiscreteInputs => {
            let bits = ctx
                .read_discrete_inputs(address, quantity)
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;
            Ok(ResponseData::Bits(bits))
        }
        FunctionCode::ReadHoldingRegisters => {
            let registers = ctx
                .read_holding_registers(address, quantity)
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;
            Ok(ResponseData::Registers(registers))
        }
        FunctionCode::ReadInputRegisters => {
            let registers = ctx
                .read_input_registers(address, quantity)
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;
            Ok(ResponseData::Registers(registers))
        }
        FunctionCode::WriteSingleCoil => {
            ctx.write_single_coil(address, quantity != 0)
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;
            Ok(ResponseData::Written {
                address,
                quantity: 1,
            })
        }
        FunctionCode::WriteSingleRegister => {
            ctx.write_single_register(address, quantity)
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;
            Ok(ResponseData::Written {
                address,
                quantity: 1,
            })
        }
        FunctionCode::WriteMultipleCoils => {
            let coils: Vec<bool> = words.iter().map(|word| *word != 0).collect();
            ctx.write_multiple_coils(address, &coils)
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;
            Ok(ResponseData::Written {
                address,
                quantity: word_count(coils.len())?,
            })
        }
        FunctionCode::WriteMultipleRegisters => {
            ctx.write_multiple_registers(address, words)
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;
            Ok(ResponseData::Written {
                address,
                quantity: word_count(words.len())?,
            })
        }
        FunctionCode::ReadDeviceIdentification => {
            let payload = vec![MEI_READ_DEVICE_ID, device_id_code(quantity)?, 0x00];
            let response = ctx
                .call(Request::Custom(
                    FunctionCode::ReadDeviceIdentification.code(),
                    Cow::Owned(payload),
                ))
                .await
                .map_err(request_error)?
                .map_err(exception_error)?;

            match response {
                Response::Custom(_, data) => Ok(ResponseData::DeviceIdentification(data.to_vec())),
                other => Err(TransportError::Request(format!(
                    "Unexpected response to FC43: {:?}",
                    other
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::PollValue;
    use crate::transport::{Completion, RequestId};

    #[tokio::test]
    async fn test_unsupported_kinds_fail_without_io() {
        let transport = ModbusTransport::new();
        let options = ConnectOptions::default();

        for kind in [
            ConnectionKind::AsciiSerial,
            ConnectionKind::Udp,
            ConnectionKind::C701,
        ] {
            let err = transport.connect(kind, "localhost", &options).await.unwrap_err();
            assert_eq!(err, TransportError::Unsupported(kind.label().to_string()));
        }
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_submit_without_connection() {
        let transport = ModbusTransport::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Completion>();
        let reply = Reply::from_fn(RequestId(1), move |completion| {
            let _ = tx.send(completion);
        });

        transport.submit(
            ModbusRequest {
                function: FunctionCode::ReadHoldingRegisters,
                device_id: 1,
                address: 0,
                value: PollValue::Single(1),
            },
            reply,
        );

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.request, RequestId(1));
        assert_eq!(completion.result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_when_not_open() {
        let transport = ModbusTransport::new();
        assert!(transport.close().await.is_ok());
    }

    #[test]
    fn test_word_count_bounds() {
        assert_eq!(word_count(123), Ok(123));
        assert_eq!(word_count(usize::from(u16::MAX)), Ok(u16::MAX));
        assert!(matches!(
            word_count(usize::from(u16::MAX) + 1),
            Err(TransportError::Request(_))
        ));
    }

    #[test]
    fn test_check_request() {
        let mut request = ModbusRequest {
            function: FunctionCode::ReadDeviceIdentification,
            device_id: 1,
            address: 0,
            value: PollValue::Single(300),
        };
        assert!(matches!(
            check_request(&request),
            Err(TransportError::Request(_))
        ));

        request.value = PollValue::Single(3);
        assert_eq!(check_request(&request), Ok(()));

        request.function = FunctionCode::WriteMultipleRegisters;
        request.value = PollValue::Many(vec![0; usize::from(u16::MAX) + 1]);
        assert!(check_request(&request).is_err());
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_value() {
        let transport = ModbusTransport::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Completion>();
        let reply = Reply::from_fn(RequestId(2), move |completion| {
            let _ = tx.send(completion);
        });

        transport.submit(
            ModbusRequest {
                function: FunctionCode::ReadDeviceIdentification,
                device_id: 1,
                address: 0,
                value: PollValue::Single(256),
            },
            reply,
        );

        let completion = rx.recv().await.unwrap();
        assert!(matches!(
            completion.result,
            Err(TransportError::Request(_))
        ));
    }

    #[test]
    fn test_defaults_and_setters() {
        let transport = ModbusTransport::new();
        assert_eq!(transport.device_id(), 1);
        assert_eq!(transport.timeout(), Duration::from_millis(1500));

        transport.set_device_id(17);
        transport.set_timeout(Duration::from_millis(250));
        assert_eq!(transport.device_id(), 17);
        assert_eq!(transport.timeout(), Duration::from_millis(250));
    }
}
