use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rttmon::config::AppConfig;
use rttmon::notify::{Notifier, NotifyError, OutboundMessage};
use rttmon::probe::{ProbeError, Prober};
use rttmon::render::{GraphRenderer, RenderError};
use rttmon::sampler::Sampler;
use rttmon::{Store, DEFAULT_ARCHIVES};
use tokio::runtime::Runtime;

struct ScriptedProber {
    results: Mutex<Vec<Option<f64>>>,
}

impl ScriptedProber {
    fn new(results: Vec<Option<f64>>) -> Self {
        let mut reversed = results;
        reversed.reverse();
        Self {
            results: Mutex::new(reversed),
        }
    }
}

impl Prober for ScriptedProber {
    async fn probe(&self) -> Result<f64, ProbeError> {
        let next = self.results.lock().unwrap().pop();
        match next {
            Some(Some(ms)) => Ok(ms),
            Some(None) => Err(ProbeError::Unreachable {
                host: "test".into(),
                reason: "scripted failure".into(),
            }),
            None => panic!("prober called more times than scripted"),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<OutboundMessage>>,
    fail: bool,
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: &OutboundMessage) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail {
            Err(NotifyError::Message(lettre::error::Error::MissingTo))
        } else {
            Ok(())
        }
    }
}

struct NoopRenderer;

impl GraphRenderer for NoopRenderer {
    fn render(
        &self,
        _series: &[(DateTime<Utc>, Option<f64>)],
        _path: &Path,
    ) -> Result<(), RenderError> {
        Ok(())
    }
}

struct FailingRenderer;

impl GraphRenderer for FailingRenderer {
    fn render(
        &self,
        _series: &[(DateTime<Utc>, Option<f64>)],
        _path: &Path,
    ) -> Result<(), RenderError> {
        Err(RenderError::Draw("scripted render failure".into()))
    }
}

fn test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.threshold_ms = 60.0;
    config.store.path = dir.join("latency.json");
    config.graph.path = dir.join("latency_graph.png");
    config
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn fresh_store(config: &AppConfig) -> Store {
    Store::create(config.store.step, &DEFAULT_ARCHIVES).unwrap()
}

#[test]
fn alerts_fire_exactly_on_threshold_exceeding_samples() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let prober = ScriptedProber::new(vec![Some(40.0), Some(70.0), Some(55.0), Some(80.0)]);
        let renderer = NoopRenderer;
        let notifier = RecordingNotifier::default();

        let mut sampler = Sampler::new(&config, fresh_store(&config), &prober, &renderer, &notifier);
        for i in 0..4 {
            sampler.tick_at(at(1_000 + i * 10)).await;
        }

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2, "only samples 2 and 4 breach the threshold");
        assert!(sent[0].subject.contains("70.00"));
        assert!(sent[1].subject.contains("80.00"));
        drop(sent);

        // All four points made it into the store.
        assert_eq!(sampler.store().last_timestamp(), Some(at(1_030)));
        let series = sampler.store().series(Duration::from_secs(60));
        let known = series.iter().filter(|(_, v)| v.is_some()).count();
        assert_eq!(known, 4);
    });
}

#[test]
fn probe_failure_skips_the_tick_entirely() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let prober = ScriptedProber::new(vec![None, None, None, None, None]);
        let renderer = NoopRenderer;
        let notifier = RecordingNotifier::default();

        let mut sampler = Sampler::new(&config, fresh_store(&config), &prober, &renderer, &notifier);
        for i in 0..5 {
            sampler.tick_at(at(1_000 + i * 10)).await;
        }

        assert_eq!(sampler.store().last_timestamp(), None, "no store mutation");
        assert!(notifier.sent.lock().unwrap().is_empty(), "no notifications");
        assert!(
            !config.store.path.exists(),
            "a skipped tick must not even flush the store"
        );
    });
}

#[test]
fn render_failure_downgrades_to_text_only_alert() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let prober = ScriptedProber::new(vec![Some(100.0)]);
        let renderer = FailingRenderer;
        let notifier = RecordingNotifier::default();

        let mut sampler = Sampler::new(&config, fresh_store(&config), &prober, &renderer, &notifier);
        sampler.tick_at(at(1_000)).await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].attachment.is_none(), "graph must be dropped, not the alert");
    });
}

#[test]
fn successful_render_attaches_the_graph() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let prober = ScriptedProber::new(vec![Some(100.0)]);
        let renderer = NoopRenderer;
        let notifier = RecordingNotifier::default();

        let mut sampler = Sampler::new(&config, fresh_store(&config), &prober, &renderer, &notifier);
        sampler.tick_at(at(1_000)).await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attachment.as_deref(), Some(config.graph.path.as_path()));
    });
}

#[test]
fn realert_cooldown_throttles_sustained_breach() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.realert_cooldown = Some(Duration::from_secs(60));
        let prober = ScriptedProber::new(vec![Some(70.0), Some(80.0), Some(90.0)]);
        let renderer = NoopRenderer;
        let notifier = RecordingNotifier::default();

        let mut sampler = Sampler::new(&config, fresh_store(&config), &prober, &renderer, &notifier);
        for i in 0..3 {
            sampler.tick_at(at(1_000 + i * 10)).await;
        }

        assert_eq!(
            notifier.sent.lock().unwrap().len(),
            1,
            "breaches inside the cooldown must stay quiet"
        );
    });
}

#[test]
fn delivery_failure_does_not_poison_future_alerts() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let prober = ScriptedProber::new(vec![Some(70.0), Some(80.0)]);
        let renderer = NoopRenderer;
        let notifier = RecordingNotifier {
            sent: Mutex::new(Vec::new()),
            fail: true,
        };

        let mut sampler = Sampler::new(&config, fresh_store(&config), &prober, &renderer, &notifier);
        sampler.tick_at(at(1_000)).await;
        sampler.tick_at(at(1_010)).await;

        assert_eq!(
            notifier.sent.lock().unwrap().len(),
            2,
            "each breach must attempt delivery despite earlier failures"
        );
        assert!(
            sampler.alert_state().last_alert_sent_at.is_none(),
            "failed deliveries must not update the alert state"
        );
    });
}
