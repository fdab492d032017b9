//! Process plumbing: tracing setup, the tokio runtime, and Ctrl-C wiring.

use std::future::Future;

use tokio::sync::broadcast;

use promote_core::AbortHandle;

use crate::error::{io_err, RuntimeError};

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Build a multi-threaded runtime and block on `work`.
pub fn block_on<F: Future>(work: F) -> Result<F::Output, RuntimeError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    Ok(runtime.block_on(work))
}

/// Run `work` while a signal task turns Ctrl-C into an abort request.
/// The release notices at its next poll iteration.
pub async fn run_with_ctrl_c<F: Future>(
    abort: AbortHandle,
    work: F,
) -> Result<F::Output, RuntimeError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let signal_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::warn!("received ctrl-c, aborting release at the next poll");
                            abort.abort();
                            Ok(())
                        }
                        Err(err) => Err(RuntimeError::Task {
                            task: "signal_handler",
                            detail: format!("ctrl-c handler failed: {err}"),
                        }),
                    }
                }
            }
        })
    };

    let output = work.await;
    let _ = shutdown_tx.send(());
    handle_join("signal_handler", signal_handle.await)?;
    Ok(output)
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), RuntimeError>, tokio::task::JoinError>,
) -> Result<(), RuntimeError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(RuntimeError::Task {
            task,
            detail: format!("join failure: {err}"),
        }),
    }
}
