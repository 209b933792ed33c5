//! # Scheduler Loop
//!
//! Two independent, self-re-arming tasks:
//!
//! ```text
//!   ┌─────────────── process ────────────────┐   ┌──────────── request-loan ─────────────┐
//!   │ sleep(wait) ─► participation::process  │   │ sleep(wait) ─► reload [borrow]         │
//!   │      ▲            │                    │   │      ▲         LoanRequester::request  │
//!   │      └── arm(report.wait | 60s) ◄──────┘   │      └── arm(report.wait | 60s) ◄──────┘
//!   └────────────────────────────────────────┘   └────────────────────────────────────────┘
//!                          ▲                                        ▲
//!                          └────────── watch<bool> shutdown ────────┘
//! ```
//!
//! - Both tasks tick immediately on start.
//! - Each tick runs in its own tokio task; an error or panic becomes
//!   [`DEFAULT_WAIT`] and never stops the loop.
//! - A wait is clamped to `[MIN_WAIT, MAX_WAIT]` (zero becomes the
//!   default) and then gets uniform jitter in `[0, jitter_secs]`.
//! - Shutdown is observed between ticks; an in-flight tick runs to
//!   completion or to its own timeouts.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use borrower_common::Address;
use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chain::ChainClient;
use crate::clock::unix_now;
use crate::config::{load_borrow_config, BorrowConfigError, SchedulerConfig};
use crate::console::KeyConsole;
use crate::error::TickError;
use crate::loan_request::{LoanOutcome, LoanRequester};
use crate::participation::{self, DEFAULT_WAIT};
use crate::wallet::Wallet;

pub const MIN_WAIT: Duration = Duration::from_secs(1);
pub const MAX_WAIT: Duration = Duration::from_secs(3_600);

/// Clamps `wait` and adds up to `jitter_secs` of random delay.
pub fn arm_wait(wait: Duration, jitter_secs: u64) -> Duration {
    let base = if wait.is_zero() { DEFAULT_WAIT } else { wait.clamp(MIN_WAIT, MAX_WAIT) };
    let base = Duration::from_secs(base.as_secs());
    if jitter_secs == 0 {
        return base;
    }
    base + Duration::from_secs(rand::thread_rng().gen_range(0..=jitter_secs))
}

fn log_tick_error(task: &str, e: &TickError) {
    error!(task, kind = %e.kind(), error = %e, "❌ {} tick failed", task);
}

// ════════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ════════════════════════════════════════════════════════════════════════════

pub struct Scheduler {
    chain: Arc<dyn ChainClient>,
    console: Arc<dyn KeyConsole>,
    wallet: Arc<dyn Wallet>,
    treasury: Address,
    adnl_address: [u8; 32],
    config_path: PathBuf,
    send_timeout: Duration,
    timing: SchedulerConfig,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        console: Arc<dyn KeyConsole>,
        wallet: Arc<dyn Wallet>,
        treasury: Address,
        adnl_address: [u8; 32],
        config_path: PathBuf,
        send_timeout: Duration,
        timing: SchedulerConfig,
    ) -> Self {
        Self { chain, console, wallet, treasury, adnl_address, config_path, send_timeout, timing }
    }

    /// One process tick. Always yields the next wait.
    pub async fn process_tick(&self) -> Duration {
        match participation::process(self.chain.as_ref(), self.treasury, unix_now()).await {
            Ok(report) => {
                if !report.failed.is_empty() {
                    warn!(failed = ?report.failed, "some rounds could not be processed");
                }
                info!(sent = report.sent.len(), wait_secs = report.wait.as_secs(), "participations processed");
                report.wait
            }
            Err(e) => {
                log_tick_error("process", &e);
                DEFAULT_WAIT
            }
        }
    }

    /// One request-loan tick. Always yields the next wait.
    pub async fn request_tick(&self) -> Duration {
        let borrow = match load_borrow_config(&self.config_path) {
            Ok(borrow) => borrow,
            Err(e) => {
                log_tick_error("request", &TickError::Config(BorrowConfigError::Load(e)));
                return DEFAULT_WAIT;
            }
        };

        let requester = LoanRequester {
            chain: self.chain.as_ref(),
            console: self.console.as_ref(),
            wallet: self.wallet.as_ref(),
            treasury: self.treasury,
            adnl_address: self.adnl_address,
            send_timeout: self.send_timeout,
        };
        match requester.request_loan(&borrow, unix_now()).await {
            Ok(report) => {
                match &report.outcome {
                    LoanOutcome::Sent { receipt, .. } => {
                        info!(seqno = receipt.seqno, "✅ {}", report.outcome)
                    }
                    LoanOutcome::LowBalance { .. } | LoanOutcome::OutOfSync { .. } => {
                        warn!("⚠️ {}", report.outcome)
                    }
                    _ => info!("⏩ {}", report.outcome),
                }
                report.wait
            }
            Err(e) => {
                log_tick_error("request", &e);
                DEFAULT_WAIT
            }
        }
    }

    /// Runs both tasks until `shutdown` turns true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let process = {
            let this = self.clone();
            run_task("process", self.timing.process_jitter_secs, shutdown.clone(), move || {
                let this = this.clone();
                async move { this.process_tick().await }
            })
        };
        let request = {
            let this = self.clone();
            run_task("request", self.timing.request_jitter_secs, shutdown, move || {
                let this = this.clone();
                async move { this.request_tick().await }
            })
        };
        tokio::join!(process, request);
    }
}

/// Re-arming loop of one task. Each tick is spawned so a panic is caught
/// at the join handle.
pub async fn run_task<F, Fut>(task: &'static str, jitter_secs: u64, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Duration> + Send + 'static,
{
    let mut deadline = tokio::time::Instant::now();
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let wait = match tokio::spawn(tick()).await {
            Ok(wait) => wait,
            Err(e) => {
                log_tick_error(task, &TickError::Panicked(e.to_string()));
                DEFAULT_WAIT
            }
        };

        let wait = arm_wait(wait, jitter_secs);
        deadline = tokio::time::Instant::now() + wait;
        info!(task, wait_secs = wait.as_secs(), at = unix_now() + wait.as_secs(), "💤 next {} tick in {}s", task, wait.as_secs());
    }
    info!(task, "task stopped");
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<Scheduler>();
    }
    let _ = check;
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_arm_wait_clamps() {
        assert_eq!(arm_wait(Duration::ZERO, 0), DEFAULT_WAIT);
        assert_eq!(arm_wait(Duration::from_millis(200), 0), MIN_WAIT);
        assert_eq!(arm_wait(Duration::from_secs(86_400), 0), MAX_WAIT);
        assert_eq!(arm_wait(Duration::from_secs(30), 0), Duration::from_secs(30));
    }

    #[test]
    fn test_arm_wait_jitter_bounds() {
        for _ in 0..100 {
            let w = arm_wait(Duration::from_secs(30), 60);
            assert!(w >= Duration::from_secs(30) && w <= Duration::from_secs(90));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_survives_panics_and_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();

        let handle = tokio::spawn(run_task("test", 0, rx, move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("first tick explodes");
                }
                Duration::from_secs(5)
            }
        }));

        // First tick panics (60s default), then ticks every 5s.
        tokio::time::sleep(Duration::from_secs(71)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
        let after = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }
}
