//! Live scan event stream

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::cli::CommandContext;
use crate::cli::args::GlobalOptions;
use crate::error::{Error, Result};
use crate::socket::{
    SocketOptions, SocketReconnector, SocketState, TungsteniteConnector, ws_url_from_api_base,
};

const STATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One progress bar per running scan
struct ScanBars {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    filter: Option<String>,
}

impl ScanBars {
    fn wants(&self, scan_id: &str) -> bool {
        self.filter.as_deref().is_none_or(|f| f == scan_id)
    }

    fn bar(&self, scan_id: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        bars.entry(scan_id.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(
                    ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar.set_prefix(scan_id.to_string());
                bar
            })
            .clone()
    }

    fn take(&self, scan_id: &str) -> ProgressBar {
        let existing = self
            .bars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(scan_id);
        existing.unwrap_or_else(|| self.multi.add(ProgressBar::new(100)))
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }
}

/// Stream events until interrupted or the socket gives up
pub async fn run(opts: &GlobalOptions, max_attempts: Option<u32>, scan: Option<String>) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let state = ctx.require_session().await?;
    let sweeper = ctx.http.start_cache_sweeper(ctx.config.cache_sweep_interval());

    let options = SocketOptions {
        max_attempts: max_attempts.unwrap_or(ctx.config.max_reconnect_attempts),
        token: state.token,
    };
    let url = ws_url_from_api_base(&ctx.config.api_url);
    let socket = SocketReconnector::new(&url, options, Arc::new(TungsteniteConnector));

    let bars = Arc::new(ScanBars {
        multi: MultiProgress::new(),
        bars: Mutex::new(HashMap::new()),
        filter: scan,
    });
    register_handlers(&socket, &bars);

    println!("{} {}", "Watching".cyan(), url);
    socket.connect();

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            _ = tokio::time::sleep(STATE_POLL_INTERVAL) => {
                if socket.state() == SocketState::GivenUp {
                    break Err(Error::Other(format!(
                        "Lost connection to {} and gave up after {} attempts",
                        url, socket.attempt()
                    )));
                }
            }
        }
    };

    socket.disconnect();
    sweeper.abort();
    let _ = bars.multi.clear();
    outcome
}

fn register_handlers(socket: &SocketReconnector, bars: &Arc<ScanBars>) {
    let b = Arc::clone(bars);
    socket.on_connected(move || b.println(format!("{} Connected", "✓".green())));

    let b = Arc::clone(bars);
    socket.on_disconnected(move || b.println(format!("{} Disconnected, reconnecting...", "⚠".yellow())));

    let b = Arc::clone(bars);
    socket.on_scan_progress(move |event| {
        if !b.wants(&event.scan_id) {
            return;
        }
        let bar = b.bar(&event.scan_id);
        bar.set_position(event.progress.clamp(0.0, 100.0) as u64);
        bar.set_message(event.status.clone());
    });

    let b = Arc::clone(bars);
    socket.on_scan_complete(move |event| {
        if !b.wants(&event.scan_id) {
            return;
        }
        b.take(&event.scan_id).finish_with_message(format!(
            "{} complete, {} findings",
            "✓".green(),
            event.findings_count
        ));
    });

    let b = Arc::clone(bars);
    socket.on_scan_failed(move |event| {
        if !b.wants(&event.scan_id) {
            return;
        }
        b.take(&event.scan_id)
            .abandon_with_message(format!("{} failed: {}", "✗".red(), event.error));
    });

    let b = Arc::clone(bars);
    socket.on_finding_created(move |event| {
        if b.filter.is_some() {
            return;
        }
        b.println(format!(
            "{} [{}] {}",
            "●".yellow(),
            event.severity.to_uppercase(),
            event.title
        ));
    });
}
