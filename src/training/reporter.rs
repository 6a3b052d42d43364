use std::time::Duration;

/// Batches between progress reports unless configured otherwise.
pub const DEFAULT_REPORT_INTERVAL: usize = 100;

/// Rolling train-loss and batch-time accumulators, emptied at every report.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    interval: usize,
    batch_size: usize,
    dataset_size: usize,
    loss_sum: f64,
    time_sum: f64,
    /// Batches seen since the last report, trained or skipped.
    batches: usize,
    /// Batches whose loss entered `loss_sum`.
    samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    /// 1-based epoch number.
    pub epoch: usize,
    pub batch_index: usize,
    /// Fraction of the epoch already seen, `i * batch_size / dataset_size`.
    pub progress: f64,
    /// NaN when every batch in the window was skipped.
    pub avg_loss: f64,
    /// Trained batches behind `avg_loss`.
    pub samples: usize,
    pub eta_secs: f64,
}

impl ProgressReporter {
    pub fn new(interval: usize, batch_size: usize, dataset_size: usize) -> Self {
        Self {
            interval: interval.max(1),
            batch_size,
            dataset_size,
            loss_sum: 0.0,
            time_sum: 0.0,
            batches: 0,
            samples: 0,
        }
    }

    pub fn reset(&mut self) {
        self.loss_sum = 0.0;
        self.time_sum = 0.0;
        self.batches = 0;
        self.samples = 0;
    }

    /// Adds one trained batch; returns a report when
    /// `batch_index % interval == interval - 1`.
    pub fn record(
        &mut self,
        epoch: usize,
        batch_index: usize,
        loss: f64,
        batch_time: Duration,
    ) -> Option<ProgressReport> {
        self.loss_sum += loss;
        self.samples += 1;
        self.tick(epoch, batch_index, batch_time)
    }

    /// Counts a batch that produced no usable loss. It still advances the
    /// cadence and the ETA, so a skip on a report index does not drop the report.
    pub fn skip(
        &mut self,
        epoch: usize,
        batch_index: usize,
        batch_time: Duration,
    ) -> Option<ProgressReport> {
        self.tick(epoch, batch_index, batch_time)
    }

    fn tick(
        &mut self,
        epoch: usize,
        batch_index: usize,
        batch_time: Duration,
    ) -> Option<ProgressReport> {
        self.time_sum += batch_time.as_secs_f64();
        self.batches += 1;

        if batch_index % self.interval != self.interval - 1 {
            return None;
        }

        let dataset_size = self.dataset_size.max(1) as f64;
        let batches_per_epoch = dataset_size / self.batch_size.max(1) as f64;
        let avg_loss = if self.samples == 0 {
            f64::NAN
        } else {
            self.loss_sum / self.samples as f64
        };
        let report = ProgressReport {
            epoch: epoch + 1,
            batch_index,
            progress: (batch_index * self.batch_size) as f64 / dataset_size,
            avg_loss,
            samples: self.samples,
            eta_secs: (self.time_sum / self.batches as f64)
                * (batches_per_epoch - batch_index as f64).max(0.0),
        };
        self.reset();

        Some(report)
    }
}

impl ProgressReport {
    pub fn log(&self) {
        tracing::info!(
            "Epoch no:{} | Epoch progress(%):{:.2} | Avg train loss:{:.2} | ETA(s):{}",
            self.epoch,
            self.progress * 100.0,
            self.avg_loss,
            self.eta_secs as u64
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_on_the_hundredth_batch_only() {
        let mut reporter = ProgressReporter::new(DEFAULT_REPORT_INTERVAL, 64, 64_000);

        for i in 0..99 {
            assert!(reporter
                .record(0, i, 2.0, Duration::from_millis(10))
                .is_none());
        }
        let report = reporter
            .record(0, 99, 2.0, Duration::from_millis(10))
            .unwrap();

        assert_eq!(report.epoch, 1);
        assert!((report.avg_loss - 2.0).abs() < 1e-12);
        assert!((report.progress - 99.0 * 64.0 / 64_000.0).abs() < 1e-12);
        // 10ms per batch, 1000 batches per epoch, 99 done.
        assert!((report.eta_secs - 0.01 * 901.0).abs() < 1e-6);
    }

    #[test]
    fn accumulators_reset_after_each_report() {
        let mut reporter = ProgressReporter::new(2, 1, 10);

        reporter.record(0, 0, 1.0, Duration::ZERO);
        let first = reporter.record(0, 1, 3.0, Duration::ZERO).unwrap();
        reporter.record(0, 2, 10.0, Duration::ZERO);
        let second = reporter.record(0, 3, 20.0, Duration::ZERO).unwrap();

        assert!((first.avg_loss - 2.0).abs() < 1e-12);
        assert!((second.avg_loss - 15.0).abs() < 1e-12);
    }

    #[test]
    fn skipped_batch_on_the_report_index_still_reports() {
        let mut reporter = ProgressReporter::new(2, 1, 10);

        assert!(reporter
            .record(0, 0, 4.0, Duration::from_secs(1))
            .is_none());
        let report = reporter.skip(0, 1, Duration::from_secs(3)).unwrap();

        assert_eq!(report.batch_index, 1);
        assert_eq!(report.samples, 1);
        assert!((report.avg_loss - 4.0).abs() < 1e-12);
        // 2s per batch over both batches, 9 batches left.
        assert!((report.eta_secs - 18.0).abs() < 1e-9);
    }

    #[test]
    fn window_of_skipped_batches_has_no_average_loss() {
        let mut reporter = ProgressReporter::new(2, 1, 10);

        reporter.skip(0, 0, Duration::ZERO);
        let report = reporter.skip(0, 1, Duration::ZERO).unwrap();

        assert_eq!(report.samples, 0);
        assert!(report.avg_loss.is_nan());

        reporter.record(0, 2, 5.0, Duration::ZERO);
        let next = reporter.record(0, 3, 7.0, Duration::ZERO).unwrap();
        assert_eq!(next.samples, 2);
        assert!((next.avg_loss - 6.0).abs() < 1e-12);
    }
}
