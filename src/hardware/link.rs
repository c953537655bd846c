//! Controller transport.
//!
//! [`ControllerLink`] is the seam between the motion controller and the
//! wire: one envelope out, one `#CF`-terminated response back. The serial
//! implementation is gated behind the `transport_serial` feature so the
//! planning and mock paths build without libudev; tests use
//! `hardware::mock::MockLink`.

use async_trait::async_trait;

use crate::error::Result;

/// Request/response exchange with the motor controller rack.
#[async_trait]
pub trait ControllerLink: Send + Sync {
    /// Send one newline-terminated envelope and read the response up to
    /// and including the `#CF` marker. Timeouts surface as
    /// `BenchError::ControllerCommunication`.
    async fn exchange(&self, envelope: &str) -> Result<String>;
}

#[cfg(feature = "transport_serial")]
pub use serial::SerialLink;

#[cfg(feature = "transport_serial")]
mod serial {
    use super::ControllerLink;
    use crate::error::{BenchError, Result};
    use crate::protocol::RESPONSE_TERMINATOR;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Mutex;
    use tokio_serial::{SerialPortBuilderExt, SerialStream};
    use tracing::trace;

    /// Serial transport to the controller rack.
    pub struct SerialLink {
        port: Mutex<SerialStream>,
        timeout: Duration,
    }

    impl SerialLink {
        pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
            let port = tokio_serial::new(path, baud_rate)
                .open_native_async()
                .map_err(|e| {
                    BenchError::ControllerCommunication(format!(
                        "failed to open '{path}': {e}"
                    ))
                })?;
            Ok(Self {
                port: Mutex::new(port),
                timeout,
            })
        }
    }

    #[async_trait]
    impl ControllerLink for SerialLink {
        async fn exchange(&self, envelope: &str) -> Result<String> {
            let mut port = self.port.lock().await;

            let command = format!("{envelope}\n");
            trace!(cmd = %envelope, "controller write");
            port.write_all(command.as_bytes()).await.map_err(|e| {
                BenchError::ControllerCommunication(format!("write failed: {e}"))
            })?;

            let mut response = String::new();
            let mut buf = [0u8; 256];
            let read = async {
                loop {
                    let n = port.read(&mut buf).await.map_err(|e| {
                        BenchError::ControllerCommunication(format!("read failed: {e}"))
                    })?;
                    if n == 0 {
                        return Err(BenchError::ControllerCommunication(
                            "controller closed the line".into(),
                        ));
                    }
                    response.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if response.contains(RESPONSE_TERMINATOR) {
                        return Ok(());
                    }
                }
            };
            tokio::time::timeout(self.timeout, read).await.map_err(|_| {
                BenchError::ControllerCommunication(format!(
                    "no response within {:?} to '{envelope}'",
                    self.timeout
                ))
            })??;

            trace!(resp = %response.trim(), "controller read");
            Ok(response.trim().to_string())
        }
    }
}
