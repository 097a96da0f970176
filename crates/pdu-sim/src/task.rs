//! Simulated PDU actor task
//!
//! Serves a `SimPdu` over any async stream in a select! loop: inbound
//! bytes are fed to the device model, replies (after any configured
//! delay) are written back, and a command channel allows shutdown. In
//! tests the stream is one end of `tokio::io::duplex`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::pdu::SimPdu;

/// Commands that can be sent to a running simulated PDU
#[derive(Debug, Clone)]
pub enum SimCommand {
    /// Shut the task down
    Shutdown,
}

/// Serve a simulated PDU over a stream
///
/// Runs until the stream closes, an I/O error occurs, or `Shutdown`
/// arrives on the command channel.
pub async fn run_sim_pdu<S>(
    mut stream: S,
    mut pdu: SimPdu,
    mut cmd_rx: mpsc::Receiver<SimCommand>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];

    info!("Starting sim PDU {} ({} plugs)", pdu.name(), pdu.plug_count());

    if let Some(greeting) = pdu.greeting() {
        stream.write_all(&greeting).await?;
        stream.flush().await?;
    }

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Sim PDU {} stream closed", pdu.name());
                        break;
                    }
                    Ok(n) => {
                        let data = &buf[..n];
                        debug!("Sim PDU {} received {:02X?}", pdu.name(), data);
                        pdu.feed(data);

                        let delay = pdu.reply_delay();
                        while let Some(reply) = pdu.take_output() {
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            stream.write_all(&reply).await?;
                            stream.flush().await?;
                        }
                    }
                    Err(e) => {
                        warn!("Sim PDU {} stream error: {}", pdu.name(), e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SimCommand::Shutdown) | None => {
                        debug!("Shutdown requested for sim PDU {}", pdu.name());
                        break;
                    }
                }
            }
        }
    }

    info!("Sim PDU {} task ended", pdu.name());
    Ok(())
}
