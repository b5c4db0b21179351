use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Default archive layout: roughly 24h at base resolution, 24h at 5x, and
/// two weeks at 30x (with a 10s base step).
pub const DEFAULT_ARCHIVES: [ArchiveSpec; 3] = [
    ArchiveSpec {
        resolution: 1,
        rows: 1440,
    },
    ArchiveSpec {
        resolution: 5,
        rows: 288,
    },
    ArchiveSpec {
        resolution: 30,
        rows: 672,
    },
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to initialize store: {0}")]
    Init(String),
    #[error("timestamp {attempted} is not after last accepted timestamp {last}")]
    OutOfOrder { attempted: i64, last: i64 },
    #[error("failed to persist store: {0}")]
    Io(#[from] std::io::Error),
}

/// One base-resolution observation. `latency_ms = None` means the probe ran
/// but produced no usable measurement; such samples are stored as unknown,
/// never as zero.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub latency_ms: Option<f64>,
}

/// Shape of one ring archive: `resolution` is a multiple of the base step,
/// `rows` the fixed slot count. Consolidation is always AVERAGE.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub resolution: u32,
    pub rows: usize,
}

/// A window that has received samples but has not yet been sealed into the
/// ring. Absent samples are counted into the window's existence but not its
/// average.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingWindow {
    window: i64,
    sum: f64,
    known: u32,
}

impl PendingWindow {
    fn new(window: i64, value: Option<f64>) -> Self {
        let mut pending = Self {
            window,
            sum: 0.0,
            known: 0,
        };
        pending.absorb(value);
        pending
    }

    fn absorb(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.known += 1;
        }
    }

    fn average(&self) -> Option<f64> {
        if self.known > 0 {
            Some(self.sum / self.known as f64)
        } else {
            None
        }
    }
}

/// Fixed-capacity ring of consolidated points at one resolution. The slot
/// vector always holds exactly `rows` entries; unsealed slots read as
/// unknown, and sealing overwrites the oldest slot once the ring is full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    resolution: u32,
    slots: Vec<Option<f64>>,
    write_pos: usize,
    last_sealed_window: Option<i64>,
    pending: Option<PendingWindow>,
}

impl Archive {
    fn new(spec: &ArchiveSpec) -> Self {
        Self {
            resolution: spec.resolution,
            slots: vec![None; spec.rows],
            write_pos: 0,
            last_sealed_window: None,
            pending: None,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn rows(&self) -> usize {
        self.slots.len()
    }

    /// Seconds of history this archive can retain at the given base step.
    fn span_secs(&self, step: u32) -> i64 {
        self.window_secs(step) * self.slots.len() as i64
    }

    fn window_secs(&self, step: u32) -> i64 {
        i64::from(step) * i64::from(self.resolution)
    }

    fn ingest(&mut self, step: u32, ts: i64, value: Option<f64>) {
        let window_secs = self.window_secs(step);
        let window = ts.div_euclid(window_secs);

        match self.pending.take() {
            None => self.pending = Some(PendingWindow::new(window, value)),
            Some(mut pending) if pending.window == window => {
                pending.absorb(value);
                self.pending = Some(pending);
            }
            Some(pending) => {
                // Monotonic appends guarantee window > pending.window. Seal
                // the finished window, then seal any skipped windows as
                // unknown (capped at the ring size; older wraps are moot).
                self.seal(pending.window, pending.average());
                let gap = (window - pending.window - 1).min(self.slots.len() as i64);
                for skipped in (window - gap)..window {
                    self.seal(skipped, None);
                }
                self.pending = Some(PendingWindow::new(window, value));
            }
        }
    }

    fn seal(&mut self, window: i64, value: Option<f64>) {
        self.slots[self.write_pos] = value;
        self.write_pos = (self.write_pos + 1) % self.slots.len();
        self.last_sealed_window = Some(window);
    }

    /// Sealed points in chronological order, each stamped at its window end,
    /// plus the running average of the pending window as a live point.
    fn points(&self, step: u32) -> Vec<(DateTime<Utc>, Option<f64>)> {
        let window_secs = self.window_secs(step);
        let mut out = Vec::with_capacity(self.slots.len() + 1);

        if let Some(last) = self.last_sealed_window {
            let rows = self.slots.len();
            for offset in (0..rows as i64).rev() {
                let window = last - offset;
                let slot = (self.write_pos + rows - 1 - offset as usize) % rows;
                let ts = (window + 1) * window_secs;
                out.push((to_datetime(ts), self.slots[slot]));
            }
        }

        if let Some(pending) = &self.pending {
            if pending.known > 0 {
                let ts = (pending.window + 1) * window_secs;
                out.push((to_datetime(ts), pending.average()));
            }
        }

        out
    }

    pub fn valid_samples(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Multi-resolution latency archive for a single monitored target. Appends
/// are base-resolution only; consolidation into coarser archives happens
/// eagerly as appended timestamps cross window boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    step: u32,
    last_timestamp: Option<i64>,
    archives: Vec<Archive>,
}

impl Store {
    /// Load the store persisted at `path`, or create a fresh one with the
    /// given base step and archive layout. An existing file is reused
    /// unchanged; the supplied specs only apply to fresh stores.
    pub async fn open_or_create(
        path: &Path,
        step: Duration,
        specs: &[ArchiveSpec],
    ) -> Result<Self, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let store: Store = serde_json::from_slice(&bytes)
                    .map_err(|err| StoreError::Init(format!("corrupt store file: {err}")))?;
                info!(file = ?path, archives = store.archives.len(), "reusing existing store");
                Ok(store)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let store = Self::create(step, specs)?;
                store.flush(path).await?;
                info!(file = ?path, step = store.step, "created store");
                Ok(store)
            }
            Err(err) => Err(StoreError::Init(format!(
                "cannot read store file {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn create(step: Duration, specs: &[ArchiveSpec]) -> Result<Self, StoreError> {
        let step_secs = step.as_secs();
        if step_secs == 0 || step_secs > u32::MAX as u64 {
            return Err(StoreError::Init(format!("invalid base step {step:?}")));
        }
        if specs.is_empty() {
            return Err(StoreError::Init("at least one archive is required".into()));
        }
        for spec in specs {
            if spec.resolution == 0 || spec.rows == 0 {
                return Err(StoreError::Init(format!(
                    "invalid archive spec {spec:?}"
                )));
            }
        }

        let mut archives: Vec<Archive> = specs.iter().map(Archive::new).collect();
        archives.sort_by_key(|archive| archive.resolution);

        Ok(Self {
            step: step_secs as u32,
            last_timestamp: None,
            archives,
        })
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp.map(to_datetime)
    }

    /// Append one base-resolution sample. Timestamps must be strictly
    /// increasing; a rejected append leaves every archive untouched.
    pub fn append(&mut self, sample: &Sample) -> Result<(), StoreError> {
        let ts = sample.at.timestamp();
        if let Some(last) = self.last_timestamp {
            if ts <= last {
                return Err(StoreError::OutOfOrder {
                    attempted: ts,
                    last,
                });
            }
        }

        for archive in &mut self.archives {
            archive.ingest(self.step, ts, sample.latency_ms);
        }
        self.last_timestamp = Some(ts);
        Ok(())
    }

    /// Points covering the `lookback` window ending at the last accepted
    /// timestamp, from the finest archive whose retention spans the window.
    pub fn series(&self, lookback: Duration) -> Vec<(DateTime<Utc>, Option<f64>)> {
        let Some(last) = self.last_timestamp else {
            return Vec::new();
        };
        let wanted = lookback.as_secs() as i64;
        // Finest archive that spans the window, or the coarsest one for
        // oversized windows.
        let Some(archive) = self
            .archives
            .iter()
            .find(|archive| archive.span_secs(self.step) >= wanted)
            .or_else(|| self.archives.last())
        else {
            return Vec::new();
        };

        let start = last - wanted;
        archive
            .points(self.step)
            .into_iter()
            .filter(|(ts, _)| ts.timestamp() > start)
            .collect()
    }

    /// Persist the whole store atomically (write to tmp, then rename).
    pub async fn flush(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec(self)
            .map_err(|err| StoreError::Init(format!("serialize failed: {err}")))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
}
