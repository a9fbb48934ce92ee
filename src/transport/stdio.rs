//! JSON-lines stdio transport.
//!
//! Each stdin line is one bridge call (`{"action": "...", ...}`); each
//! completed request is written to stdout as one envelope line. Logs go to
//! stderr so stdout carries envelopes only.

use crate::error::{BrokerError, BrokerResult};
use crate::executor::Broker;
use crate::host::HostSurface;
use crate::models::bridge::salvage_callback;
use crate::models::{BridgeCall, ResponseEnvelope};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Stdio transport implementation.
pub struct StdioTransport<H: HostSurface> {
    broker: Arc<Broker<H>>,
    envelopes: Mutex<mpsc::UnboundedReceiver<ResponseEnvelope>>,
}

impl<H: HostSurface> StdioTransport<H> {
    /// Create a transport over `broker`, writing envelopes read from `envelopes`.
    pub fn new(
        broker: Arc<Broker<H>>,
        envelopes: mpsc::UnboundedReceiver<ResponseEnvelope>,
    ) -> Self {
        Self {
            broker,
            envelopes: Mutex::new(envelopes),
        }
    }
}

impl<H: HostSurface> Transport for StdioTransport<H> {
    async fn run(&self) -> BrokerResult<()> {
        info!("Starting broker with stdio transport");
        let mut envelopes = self.envelopes.lock().await;
        let reader = BufReader::new(tokio::io::stdin());
        let mut writer = tokio::io::stdout();

        let shutdown_requested = tokio::select! {
            result = serve_lines(&self.broker, reader, &mut writer, &mut envelopes) => {
                result?;
                info!("Stdin closed, all requests answered");
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received");
                true
            }
        };

        let reason = if shutdown_requested {
            "shutdown signal"
        } else {
            "input closed"
        };
        self.broker.shutdown(reason).await;

        // Requests failed by the shutdown were never written by the cancelled loop.
        let flushed = write_pending(&mut writer, &mut envelopes).await?;
        debug!(flushed, "Wrote envelopes produced by shutdown");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Feed calls from `reader` into `broker` and write envelopes to `writer`.
///
/// Returns once the input is exhausted and every submitted request has been
/// answered.
pub async fn serve_lines<H, R, W>(
    broker: &Broker<H>,
    reader: R,
    mut writer: W,
    envelopes: &mut mpsc::UnboundedReceiver<ResponseEnvelope>,
) -> BrokerResult<()>
where
    H: HostSurface,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut input_open = true;
    let mut outstanding: usize = 0;

    while input_open || outstanding > 0 {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.map_err(io_error)? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match decode_call(&line) {
                        Ok(request) => {
                            outstanding += 1;
                            broker.submit(request);
                        }
                        Err(Some(envelope)) => write_envelope(&mut writer, &envelope).await?,
                        Err(None) => {}
                    },
                    None => {
                        debug!(outstanding, "Input exhausted");
                        input_open = false;
                    }
                }
            }
            envelope = envelopes.recv() => {
                let Some(envelope) = envelope else {
                    warn!(outstanding, "Envelope channel closed");
                    break;
                };
                outstanding = outstanding.saturating_sub(1);
                write_envelope(&mut writer, &envelope).await?;
            }
        }
    }
    Ok(())
}

/// Write every envelope already waiting in `envelopes` without blocking.
///
/// Returns the number of envelopes written.
pub async fn write_pending<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelopes: &mut mpsc::UnboundedReceiver<ResponseEnvelope>,
) -> BrokerResult<usize> {
    let mut written = 0;
    while let Ok(envelope) = envelopes.try_recv() {
        write_envelope(writer, &envelope).await?;
        written += 1;
    }
    Ok(written)
}

/// Decode one line; on failure return the error envelope to write, if the
/// callback token could be recovered.
fn decode_call(line: &str) -> Result<crate::models::Request, Option<ResponseEnvelope>> {
    match BridgeCall::parse(line).and_then(BridgeCall::into_request) {
        Ok(request) => Ok(request),
        Err(e) => match salvage_callback(line) {
            Some(callback) => Err(Some(ResponseEnvelope::failure(callback, None, e.to_string()))),
            None => {
                warn!(error = %e, "Dropping undecodable call without callback token");
                Err(None)
            }
        },
    }
}

async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &ResponseEnvelope,
) -> BrokerResult<()> {
    let mut line = envelope.to_json();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

fn io_error(err: std::io::Error) -> BrokerError {
    BrokerError::internal(format!("stdio transport I/O error: {}", err))
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_call_salvages_callback() {
        let err = decode_call(r#"{"action":"nope","callbackJSON":"cb-7"}"#).unwrap_err();
        let envelope = err.unwrap();
        assert_eq!(envelope.callback(), "cb-7");
        assert!(envelope.is_error());
    }

    #[test]
    fn test_decode_call_without_callback() {
        assert!(matches!(decode_call("not json"), Err(None)));
    }

    #[test]
    fn test_decode_call_ok() {
        let request =
            decode_call(r#"{"action":"rawQuery","sqlCommand":"SELECT 1","callbackJSON":"cb"}"#)
                .unwrap();
        assert_eq!(request.callback(), Some("cb"));
    }
}
