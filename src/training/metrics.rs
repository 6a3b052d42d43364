use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::error::TrainError;

/// Destination for scalar training curves. Training behaves identically
/// whichever sink is plugged in.
pub trait MetricsSink {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64);

    fn flush(&mut self) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetrics;

impl MetricsSink for NoMetrics {
    fn add_scalar(&mut self, _name: &str, _value: f64, _step: u64) {}
}

#[derive(Serialize)]
struct Row<'a> {
    name: &'a str,
    step: u64,
    value: f64,
}

/// Writes `name,step,value` rows to a CSV file.
pub struct CsvMetrics {
    writer: csv::Writer<File>,
}

impl CsvMetrics {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, TrainError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(["name", "step", "value"])?;
        Ok(Self { writer })
    }
}

impl MetricsSink for CsvMetrics {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) {
        if let Err(err) = self.writer.serialize(Row { name, step, value }) {
            tracing::warn!("dropping metric {name}: {err}");
        }
    }

    fn flush(&mut self) {
        if let Err(err) = self.writer.flush() {
            tracing::warn!("failed to flush metrics: {err}");
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub name: String,
    pub value: f64,
    pub step: u64,
}

/// Keeps every scalar in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryMetrics {
    pub scalars: Vec<Scalar>,
}

impl MemoryMetrics {
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Scalar> + 'a {
        self.scalars.iter().filter(move |s| s.name == name)
    }
}

impl MetricsSink for MemoryMetrics {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) {
        self.scalars.push(Scalar {
            name: name.to_string(),
            value,
            step,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_sink_writes_a_header_and_one_row_per_scalar() {
        let path = std::env::temp_dir().join(format!("plantraj-metrics-{}.csv", std::process::id()));

        let mut sink = CsvMetrics::create(&path).unwrap();
        sink.add_scalar("train/loss", 0.5, 2);
        sink.add_scalar("val/NLL", 1.25, 4);
        sink.flush();

        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(written, "name,step,value\ntrain/loss,2,0.5\nval/NLL,4,1.25\n");
    }

    #[test]
    fn memory_sink_filters_by_name() {
        let mut sink = MemoryMetrics::default();
        sink.add_scalar("train/loss", 1.0, 1);
        sink.add_scalar("val/RMSE", 2.0, 1);
        sink.add_scalar("train/loss", 3.0, 2);

        let steps: Vec<u64> = sink.named("train/loss").map(|s| s.step).collect();

        assert_eq!(steps, vec![1, 2]);
    }
}
