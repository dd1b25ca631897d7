//! Startup orchestration -- compile, provision, and datapath lifecycle.
//!
//! The [`Orchestrator`] runs the one-shot compilation pipeline and then the
//! steady-state datapath. The two halves only meet through the kernel table.
//!
//! # Startup Order
//!
//! 1. Interface lookup (skipped in dry-run)
//! 2. Signature file → DFA
//! 3. DFA → serialized table → table store (pinned map, or memory in dry-run)
//! 4. Socket map check, AF_XDP socket bind
//! 5. Datapath thread (`xids-datapath`), stats sampler thread (`xids-stats`, verbose only)
//!
//! # Shutdown
//!
//! Cancelling the token stops the datapath after its current batch. The
//! sampler observes the same token and exits within 100 ms.

use std::thread::JoinHandle;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use xids_core::config::{ProvisionPolicy, XidsConfig};
use xids_core::error::XidsError;
use xids_dfa::{Dfa, PerCpuSerializer, SerializedTable, SignatureSet, TableSerializer};
use xids_xdp_engine::{DatapathSnapshot, MemoryStore, ProvisionReport, TableStore, provision};

/// Outcome of a completed run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Distinct signatures compiled.
    pub signatures: usize,
    /// DFA states.
    pub states: usize,
    /// Table entries attempted.
    pub entries: usize,
    /// Table entries written.
    pub written: usize,
    /// Table entries that failed (continue policy only).
    pub failed: usize,
    /// Final datapath counters; `None` in dry-run mode.
    pub datapath: Option<DatapathSnapshot>,
}

/// The daemon orchestrator.
pub struct Orchestrator {
    config: XidsConfig,
    dry_run: bool,
}

impl Orchestrator {
    /// Build the orchestrator from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `XidsError::Config` if validation fails, including a missing
    /// `--dev` when kernel access is required.
    pub fn new(config: XidsConfig, dry_run: bool) -> Result<Self, XidsError> {
        config.validate()?;
        if !dry_run {
            config.validate_interface()?;
        }
        Ok(Self { config, dry_run })
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &XidsConfig {
        &self.config
    }

    /// Load the signature file and compile it.
    pub async fn compile(&self) -> Result<(SignatureSet, Dfa), XidsError> {
        let signatures = SignatureSet::load(&self.config.signatures.path).await?;
        let dfa = Dfa::compile(&signatures)?;
        Ok((signatures, dfa))
    }

    /// Run to completion.
    ///
    /// In dry-run mode this returns after provisioning into memory. Otherwise it
    /// blocks until `shutdown` is cancelled or the datapath fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunSummary, XidsError> {
        let started = Instant::now();

        #[cfg(target_os = "linux")]
        {
            if !self.dry_run {
                let interface = &self.config.interface;
                let resolved = resolve_interfaces(interface)?;
                tracing::info!(
                    device = %interface.device,
                    ifindex = resolved.ifindex,
                    queue = interface.queue,
                    redirect_device = %interface.redirect_device,
                    redirect_ifindex = resolved.redirect_ifindex,
                    "interface resolved"
                );
            }
        }

        let (signatures, dfa) = self.compile().await?;
        let mut summary = RunSummary {
            signatures: signatures.len(),
            states: dfa.state_count(),
            ..RunSummary::default()
        };

        if self.dry_run {
            let n_cpus = xids_dfa::possible_cpus().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cpu topology unavailable, replicating for one cpu");
                1
            });
            let table = PerCpuSerializer::new(n_cpus)
                .with_layout(self.config.table.layout)
                .serialize(&dfa);
            let mut store = MemoryStore::with_capacity(table.len()).with_value_len(table.value_len());
            let report = provision_table(&mut store, &table, self.config.table.provision_policy)?;
            record(&mut summary, &report);
            tracing::info!(
                signatures = summary.signatures,
                states = summary.states,
                entries = summary.entries,
                n_cpus,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "dry run complete"
            );
            return Ok(summary);
        }

        self.run_attached(dfa, summary, shutdown).await
    }

    #[cfg(target_os = "linux")]
    async fn run_attached(
        self,
        dfa: Dfa,
        mut summary: RunSummary,
        shutdown: CancellationToken,
    ) -> Result<RunSummary, XidsError> {
        use std::sync::Arc;
        use std::time::Duration;

        use xids_core::error::DatapathError;
        use xids_xdp_engine::{
            Datapath, DatapathCounters, DatapathOptions, MacRewrite, PinnedMap, SocketMap,
            StatsSampler, XskSocket,
        };

        let interface = &self.config.interface;
        let pin_dir = interface.pin_dir();

        let mut map = PinnedMap::open(pin_dir.join(&self.config.table.map_name))?;
        let table = serialize_for(&dfa, self.config.table.layout, map.is_per_cpu(), map.value_len());
        let report = provision_table(&mut map, &table, self.config.table.provision_policy)?;
        record(&mut summary, &report);

        let sockets = SocketMap::open(pin_dir.join(&self.config.table.socket_map_name))?;
        if !sockets.covers_queue(interface.queue) {
            return Err(DatapathError::Setup {
                stage: "socket map",
                reason: format!("queue {} is outside the socket map", interface.queue),
            }
            .into());
        }

        let (umem, rings, socket) = XskSocket::open(interface, &self.config.datapath)?;
        let counters = Arc::new(DatapathCounters::new());
        let mut datapath = Datapath::builder(umem, rings, socket)
            .options(DatapathOptions::from_config(&self.config.datapath, interface))
            .mac_rewrite(MacRewrite::from_config(interface))
            .counters(Arc::clone(&counters))
            .build()?;

        let cancel = shutdown.child_token();
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
        let worker = {
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name("xids-datapath".to_owned())
                .spawn(move || {
                    let _ = done_tx.send(datapath.run(&cancel));
                })?
        };
        // Early returns below must not leave the datapath running.
        let worker = WorkerGuard::new(cancel.clone(), worker);

        let sampler = if self.config.general.verbose {
            Some(StatsSampler::spawn(
                Arc::clone(&counters),
                Duration::from_secs(self.config.stats.interval_secs),
                cancel.clone(),
            )?)
        } else {
            None
        };

        let early = tokio::select! {
            () = cancel.cancelled() => None,
            result = &mut done_rx => Some(result),
        };
        if early.is_some() {
            tracing::warn!("datapath stopped before shutdown was requested");
        }
        cancel.cancel();

        let result = match early {
            Some(result) => result,
            None => done_rx.await,
        };
        if worker.join().is_err() {
            tracing::error!("datapath thread panicked");
        }
        if let Some(stats) = sampler.and_then(StatsSampler::join) {
            tracing::info!(
                rx_packets = stats.rx.packets,
                tx_packets = stats.tx.packets,
                backpressure_drops = stats.backpressure_drops,
                "final datapath stats"
            );
        }

        let snapshot = result.map_err(|_| DatapathError::Setup {
            stage: "datapath",
            reason: "datapath thread exited without a result".to_owned(),
        })??;
        summary.datapath = Some(snapshot);
        Ok(summary)
    }

    #[cfg(not(target_os = "linux"))]
    async fn run_attached(
        self,
        _dfa: Dfa,
        _summary: RunSummary,
        _shutdown: CancellationToken,
    ) -> Result<RunSummary, XidsError> {
        Err(xids_core::error::DatapathError::Setup {
            stage: "platform",
            reason: "AF_XDP datapath requires Linux; use --dry-run".to_owned(),
        }
        .into())
    }
}

/// Kernel interface indices for the configured devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedInterfaces {
    /// Receive device.
    pub ifindex: u32,
    /// Redirect target, when one is configured.
    pub redirect_ifindex: Option<u32>,
}

/// Look up the receive device and the optional redirect device.
///
/// # Errors
///
/// `DatapathError::Interface` (exit status 30) when either name is unknown.
#[cfg(target_os = "linux")]
pub fn resolve_interfaces(
    interface: &xids_core::config::InterfaceConfig,
) -> Result<ResolvedInterfaces, XidsError> {
    let ifindex = xids_xdp_engine::interface_index(&interface.device)?;
    let redirect_ifindex = match interface.redirect_device.as_str() {
        "" => None,
        name => Some(xids_xdp_engine::interface_index(name)?),
    };
    Ok(ResolvedInterfaces {
        ifindex,
        redirect_ifindex,
    })
}

/// Write the serialized table into `store`.
///
/// Under [`ProvisionPolicy::Continue`] every entry is attempted, but a table
/// with missing transitions still fails startup once the pass completes.
///
/// # Errors
///
/// - `ProvisionError::Update` on the first failure (stop-on-first-error)
/// - `ProvisionError::Partial` when any entry failed (continue)
pub fn provision_table<S: TableStore + ?Sized>(
    store: &mut S,
    table: &SerializedTable,
    policy: ProvisionPolicy,
) -> Result<ProvisionReport, XidsError> {
    let report = provision(store, table, policy)?;
    if !report.failures.is_empty() {
        tracing::error!(
            failed = report.failures.len(),
            total = report.attempted,
            "table provisioned with missing entries"
        );
    }
    Ok(report.into_result()?)
}

fn record(summary: &mut RunSummary, report: &ProvisionReport) {
    summary.entries = report.attempted;
    summary.written = report.written;
    summary.failed = report.failures.len();
}

/// Owns a worker thread that observes `cancel`.
///
/// Dropping the guard cancels the token and joins the thread.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
struct WorkerGuard {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
impl WorkerGuard {
    fn new(cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Wait for the thread to exit; `Err` if it panicked.
    fn join(mut self) -> std::thread::Result<()> {
        self.handle.take().map_or(Ok(()), JoinHandle::join)
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            if handle.join().is_err() {
                tracing::error!("worker thread panicked during teardown");
            }
        }
    }
}

/// Pick the serializer matching the value layout of the target store.
#[cfg(target_os = "linux")]
fn serialize_for(
    dfa: &Dfa,
    layout: xids_core::config::TableLayout,
    per_cpu: bool,
    value_len: usize,
) -> SerializedTable {
    use xids_dfa::{FlatSerializer, value_stride};
    use xids_xdp_engine::xids_ebpf_common::DfaValue;

    if per_cpu {
        let n_cpus = value_len / value_stride(DfaValue::SIZE);
        PerCpuSerializer::new(n_cpus).with_layout(layout).serialize(dfa)
    } else {
        FlatSerializer::with_layout(layout).serialize(dfa)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for a shutdown signal (Ctrl+C).
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn spawn_waiter(cancel: &CancellationToken, exited: &Arc<AtomicBool>) -> JoinHandle<()> {
        let cancel = cancel.clone();
        let exited = Arc::clone(exited);
        std::thread::spawn(move || {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            exited.store(true, Ordering::SeqCst);
        })
    }

    #[test]
    fn early_return_cancels_and_joins_worker() {
        let cancel = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));

        let start = || -> Result<(), XidsError> {
            let _worker = WorkerGuard::new(cancel.clone(), spawn_waiter(&cancel, &exited));
            // the sampler failing to spawn after the datapath is up
            Err(std::io::Error::other("sampler spawn failed").into())
        };

        assert!(start().is_err());
        assert!(cancel.is_cancelled());
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn join_waits_for_worker() {
        let cancel = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));
        let worker = WorkerGuard::new(cancel.clone(), spawn_waiter(&cancel, &exited));

        cancel.cancel();
        assert!(worker.join().is_ok());
        assert!(exited.load(Ordering::SeqCst));
    }
}
