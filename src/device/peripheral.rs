//! Serial peripheral contract

use crate::error::DeviceError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Serial-attached peripheral boundary
///
/// Framing is the transport's business: `read_frame` returns one delimited
/// response, `read_buffered` whatever raw bytes are waiting right now.
#[async_trait]
pub trait PeripheralPort: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Write raw bytes, returning the number of bytes written
    async fn write_raw(&self, bytes: &[u8]) -> Result<usize, DeviceError>;

    /// Read one delimited frame, or `None` if nothing arrived within `timeout`
    async fn read_frame(&self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError>;

    /// Drain the currently buffered raw bytes (possibly empty)
    async fn read_buffered(&self) -> Result<Vec<u8>, DeviceError>;
}

/// Named peripheral port
pub struct PeripheralHandle {
    name: String,
    port: Arc<dyn PeripheralPort>,
    lease: Arc<Mutex<()>>,
}

impl PeripheralHandle {
    pub fn connect(name: impl Into<String>, port: Arc<dyn PeripheralPort>) -> Self {
        let name = name.into();
        tracing::info!("📡 Peripheral handle '{}' connected", name);
        Self {
            name,
            port,
            lease: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> &dyn PeripheralPort {
        self.port.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_connected()
    }

    pub(crate) fn lease(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.lease)
    }
}

impl std::fmt::Debug for PeripheralHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralHandle")
            .field("name", &self.name)
            .field("connected", &self.port.is_connected())
            .finish()
    }
}
