use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::alert::{self, AlertState, Verdict};
use crate::config::AppConfig;
use crate::notify::{Notifier, OutboundMessage};
use crate::probe::Prober;
use crate::render::GraphRenderer;
use crate::store::{Sample, Store};

/// Window rendered into the alert graph.
pub const GRAPH_WINDOW: Duration = Duration::from_secs(6 * 60 * 60);

/// The control loop: probe, append, evaluate, notify, sleep. Single task,
/// no overlapping ticks. Nothing that happens inside a tick may escape it;
/// the loop only ends when its future is dropped at shutdown.
pub struct Sampler<'a, P, R, N> {
    config: &'a AppConfig,
    store: Store,
    prober: &'a P,
    renderer: &'a R,
    notifier: &'a N,
    alert_state: AlertState,
}

impl<'a, P, R, N> Sampler<'a, P, R, N>
where
    P: Prober,
    R: GraphRenderer,
    N: Notifier,
{
    pub fn new(
        config: &'a AppConfig,
        store: Store,
        prober: &'a P,
        renderer: &'a R,
        notifier: &'a N,
    ) -> Self {
        Self {
            config,
            store,
            prober,
            renderer,
            notifier,
            alert_state: AlertState::default(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn alert_state(&self) -> &AlertState {
        &self.alert_state
    }

    /// Run until cancelled. The sleep starts after the tick finishes, so the
    /// schedule drifts by however long the tick took; drift correction is
    /// deliberately not attempted.
    pub async fn run(mut self) -> Result<()> {
        info!(
            host = %self.config.host,
            interval = ?self.config.interval,
            threshold_ms = self.config.threshold_ms,
            "starting sampling loop"
        );

        loop {
            self.tick().await;
            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// One iteration of the loop. Infallible by contract: every failure is
    /// logged and absorbed here.
    pub async fn tick(&mut self) {
        self.tick_at(Utc::now()).await;
    }

    /// Tick with an explicit sample timestamp. `tick` stamps with the wall
    /// clock; tests drive this directly.
    pub async fn tick_at(&mut self, at: chrono::DateTime<Utc>) {
        let latency_ms = match self.prober.probe().await {
            Ok(ms) => {
                info!(host = %self.config.host, latency_ms = format_args!("{ms:.2}"), "probe complete");
                ms
            }
            Err(err) => {
                // No data beats fabricated data: skip the tick entirely.
                warn!(host = %self.config.host, error = %err, "probe failed; skipping tick");
                return;
            }
        };

        let sample = Sample {
            at,
            latency_ms: Some(latency_ms),
        };

        if let Err(err) = self.store.append(&sample) {
            warn!(error = %err, "sample rejected; store left unchanged");
            return;
        }

        if let Err(err) = self.store.flush(&self.config.store.path).await {
            warn!(error = %err, file = ?self.config.store.path, "store flush failed");
        }

        let verdict = alert::evaluate(
            &sample,
            self.config.threshold_ms,
            self.config.realert_cooldown,
            &self.alert_state,
            sample.at,
        );

        if verdict == Verdict::Alert {
            self.raise_alert(latency_ms, at).await;
        }
    }

    /// Render-then-notify. A render failure downgrades to a text-only
    /// notification; a delivery failure leaves the alert state untouched so
    /// the next breach tries again.
    async fn raise_alert(&mut self, latency_ms: f64, at: chrono::DateTime<Utc>) {
        let series = self.store.series(GRAPH_WINDOW);
        let graph = match self.renderer.render(&series, &self.config.graph.path) {
            Ok(()) => Some(self.config.graph.path.clone()),
            Err(err) => {
                warn!(error = %err, "graph render failed; sending text-only alert");
                None
            }
        };

        let message = OutboundMessage::latency_alert(
            &self.config.host,
            self.config.threshold_ms,
            latency_ms,
            graph,
        );

        match self.notifier.send(&message) {
            Ok(()) => {
                info!(latency_ms = format_args!("{latency_ms:.2}"), "alert notification sent");
                self.alert_state.last_alert_sent_at = Some(at);
            }
            Err(err) => {
                error!(error = %err, "alert notification failed");
            }
        }
    }
}
