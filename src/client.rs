//! Client entry point.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::AuthProvider;
use crate::channels::Channels;
use crate::config::ClientOptions;
use crate::connection::driver::Driver;
use crate::connection::{Connection, ConnectionInner};
use crate::error::{Error, Result};
use crate::telemetry::spans;
use crate::transport::Transport;

/// A realtime client: one connection and the channels multiplexed over it.
///
/// Must be created inside a Tokio runtime; the connection driver runs as a task
/// on it. Dropping the client stops the driver without a graceful close.
pub struct Realtime {
    connection: Connection,
    channels: Channels,
    shutdown: CancellationToken,
}

impl Realtime {
    pub fn new(
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self> {
        options
            .validate()
            .map_err(|e| Error::InvalidOptions(e.to_string()))?;
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let options = Arc::new(options);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectionInner::new(options.clone(), commands_tx));
        let channels = Channels::new(inner.clone());
        let shutdown = CancellationToken::new();

        let driver = Driver::new(
            inner.clone(),
            channels.clone(),
            transport,
            auth,
            commands_rx,
            shutdown.clone(),
        );
        let span = spans::connection(options.client_id.as_deref());
        runtime.spawn(driver.run().instrument(span));

        let client = Self {
            connection: Connection { inner },
            channels,
            shutdown,
        };
        if options.auto_connect {
            client.connection.connect();
        }
        Ok(client)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Close the connection gracefully.
    pub fn close(&self) {
        self.connection.close();
    }
}

impl Drop for Realtime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Realtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realtime")
            .field("connection", &self.connection)
            .field("channels", &self.channels)
            .finish()
    }
}
