//! Episode metric loggers.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use dc_types::LoggerKind;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};

use crate::history::EpisodeRecord;

pub trait MetricsLogger: Send + Sync {
    fn log_episode(&self, record: &EpisodeRecord);
}

/// One structured `tracing` event per episode.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLogger;

impl MetricsLogger for DefaultLogger {
    fn log_episode(&self, record: &EpisodeRecord) {
        info!(
            trial = record.trial,
            episode = record.episode,
            data_env = %record.data_env_name,
            loss = record.loss,
            mean_reward = record.mean_reward,
            mean_validation_score = record.mean_validation_score,
            mlf_diversity = %format!("{}/{}", record.n_unique_mlfs, record.n_successful_mlfs),
            best_mlf = record.best_mlf.as_deref().unwrap_or("-"),
            "episode finished"
        );
    }
}

/// Writes `{"metric": <name>, "value": <v>}` lines, the format floyd turns
/// into training metrics. Non-finite values are skipped. Write failures
/// never abort training; the first one is reported.
pub struct FloydLogger {
    out: Mutex<Box<dyn Write + Send>>,
    write_failed: AtomicBool,
}

impl FloydLogger {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            write_failed: AtomicBool::new(false),
        }
    }

    /// Whether any metric line failed to reach the output.
    pub fn write_failed(&self) -> bool {
        self.write_failed.load(Ordering::Relaxed)
    }

    fn write_episode(&self, record: &EpisodeRecord) -> io::Result<()> {
        let mut out = self.out.lock();
        for line in floyd_metric_lines(record) {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

impl std::fmt::Debug for FloydLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloydLogger").finish_non_exhaustive()
    }
}

pub fn floyd_metric_lines(record: &EpisodeRecord) -> Vec<String> {
    let metrics = [
        ("loss", record.loss),
        ("mean_reward", record.mean_reward),
        ("mean_validation_score", record.mean_validation_score),
        ("std_validation_score", record.std_validation_score),
        ("n_successful_mlfs", record.n_successful_mlfs as f64),
        ("n_unique_mlfs", record.n_unique_mlfs as f64),
        ("n_unique_hyperparameters", record.n_unique_hyperparameters as f64),
        ("mlf_diversity", record.mlf_diversity),
        (
            "best_validation_score",
            record.best_validation_score.unwrap_or(f64::NAN),
        ),
    ];
    metrics
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(name, value)| json!({ "metric": name, "value": value }).to_string())
        .collect()
}

impl MetricsLogger for FloydLogger {
    fn log_episode(&self, record: &EpisodeRecord) {
        if let Err(err) = self.write_episode(record) {
            if !self.write_failed.swap(true, Ordering::Relaxed) {
                warn!(error = %err, episode = record.episode, "could not write floyd metrics");
            }
        }
    }
}

pub fn metrics_logger(kind: LoggerKind) -> Box<dyn MetricsLogger> {
    match kind {
        LoggerKind::Default => Box::new(DefaultLogger),
        LoggerKind::Floyd => Box::new(FloydLogger::stdout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record() -> EpisodeRecord {
        EpisodeRecord {
            trial: 0,
            episode: 1,
            data_env_name: "env".to_string(),
            loss: 0.5,
            mean_reward: 0.25,
            mean_validation_score: f64::NAN,
            std_validation_score: f64::NAN,
            n_successful_mlfs: 0,
            n_unique_mlfs: 0,
            n_unique_hyperparameters: 0,
            mlf_diversity: 0.0,
            best_reward: None,
            best_validation_score: None,
            best_mlf: None,
        }
    }

    #[test]
    fn floyd_lines_are_json_metrics() {
        let lines = floyd_metric_lines(&record());
        assert_eq!(lines[0], r#"{"metric":"loss","value":0.5}"#);
        assert!(lines.iter().all(|l| !l.contains("validation_score")));
        assert_eq!(lines.len(), 6);
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken(Arc<parking_lot::Mutex<usize>>);

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            *self.0.lock() += 1;
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn floyd_logger_survives_a_closed_output() {
        let attempts = Arc::new(parking_lot::Mutex::new(0));
        let logger = FloydLogger::new(Box::new(Broken(attempts.clone())));
        assert!(!logger.write_failed());
        logger.log_episode(&record());
        assert!(logger.write_failed());
        logger.log_episode(&record());
        // each episode gives up at its first failed line
        assert_eq!(*attempts.lock(), 2);
    }

    #[test]
    fn floyd_logger_writes_one_line_per_metric() {
        let buffer = Shared::default();
        let logger = FloydLogger::new(Box::new(buffer.clone()));
        logger.log_episode(&record());
        let text = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert_eq!(text.lines().count(), 6);
        for line in text.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["metric"].is_string());
        }
    }
}
