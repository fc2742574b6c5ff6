//! TCP accept loop.

use tokio::net::TcpListener;

use crate::connection::{drive_connection, ConnectionContext};
use crate::error::Result;

/// Bind the relay listener.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "relay listening");
    Ok(listener)
}

/// Accept connections forever, one driver task each.
pub async fn serve(ctx: ConnectionContext, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "connection accepted");
        tokio::spawn(drive_connection(ctx.clone(), stream));
    }
}
