//! Tabular view of a [`ResultStore`] (Arrow) and its on-disk form (Parquet).

use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float64Array, RecordBatch, StringArray, TimestampMillisecondArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use parquet::arrow::ArrowWriter;

use super::ResultStore;
use crate::fingerprint::canonical_json;
use crate::{Error, Result};

/// Fixed leading columns of the results table.
pub const RESULT_COLUMNS: [&str; 14] = [
    "algorithm",
    "collection",
    "dataset",
    "hyper_params",
    "hyper_params_id",
    "repetition",
    "status",
    "error_message",
    "preprocess_time",
    "main_time",
    "postprocess_time",
    "artifact_path",
    "started_at",
    "ended_at",
];

fn utc_millis() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
}

impl ResultStore {
    /// Names of all metrics recorded in the store, sorted.
    #[must_use]
    pub fn metric_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.iter().flat_map(|r| r.metrics().keys()).collect();
        names.into_iter().cloned().collect()
    }

    /// Build the results table: one row per experiment, one nullable
    /// `Float64` column per metric after the fixed columns.
    ///
    /// # Errors
    /// Returns [`Error::StorageError`] if a metric is named like a fixed
    /// column and [`Error::Arrow`] if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let metric_names = self.metric_names();
        if let Some(clash) = metric_names.iter().find(|n| RESULT_COLUMNS.contains(&n.as_str())) {
            return Err(Error::StorageError(format!(
                "metric {clash} has the name of a result column"
            )));
        }

        let mut fields = vec![
            Field::new(RESULT_COLUMNS[0], DataType::Utf8, false),
            Field::new(RESULT_COLUMNS[1], DataType::Utf8, false),
            Field::new(RESULT_COLUMNS[2], DataType::Utf8, false),
            Field::new(RESULT_COLUMNS[3], DataType::Utf8, false),
            Field::new(RESULT_COLUMNS[4], DataType::Utf8, false),
            Field::new(RESULT_COLUMNS[5], DataType::UInt32, false),
            Field::new(RESULT_COLUMNS[6], DataType::Utf8, false),
            Field::new(RESULT_COLUMNS[7], DataType::Utf8, true),
            Field::new(RESULT_COLUMNS[8], DataType::Float64, true),
            Field::new(RESULT_COLUMNS[9], DataType::Float64, true),
            Field::new(RESULT_COLUMNS[10], DataType::Float64, true),
            Field::new(RESULT_COLUMNS[11], DataType::Utf8, false),
            Field::new(RESULT_COLUMNS[12], utc_millis(), true),
            Field::new(RESULT_COLUMNS[13], utc_millis(), true),
        ];
        fields.extend(
            metric_names
                .iter()
                .map(|name| Field::new(name.as_str(), DataType::Float64, true)),
        );

        let rows = self.results();
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.key().algorithm()))),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.key().dataset().collection()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.key().dataset().name()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| canonical_json(r.params())),
            )),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.key().fingerprint()))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.key().repetition()))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.status().as_str()))),
            Arc::new(rows.iter().map(|r| r.error_message()).collect::<StringArray>()),
            Arc::new(rows.iter().map(|r| r.times().and_then(|t| t.pre)).collect::<Float64Array>()),
            Arc::new(rows.iter().map(|r| r.times().map(|t| t.main)).collect::<Float64Array>()),
            Arc::new(rows.iter().map(|r| r.times().and_then(|t| t.post)).collect::<Float64Array>()),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.artifact_path().display().to_string()),
            )),
            Arc::new(
                rows.iter()
                    .map(|r| r.started_at().map(|t| t.timestamp_millis()))
                    .collect::<TimestampMillisecondArray>()
                    .with_timezone("UTC"),
            ),
            Arc::new(
                rows.iter()
                    .map(|r| r.ended_at().map(|t| t.timestamp_millis()))
                    .collect::<TimestampMillisecondArray>()
                    .with_timezone("UTC"),
            ),
        ];
        for name in &metric_names {
            columns.push(Arc::new(
                rows.iter()
                    .map(|r| r.metrics().get(name).copied())
                    .collect::<Float64Array>(),
            ));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }

    /// Write the results table as a Parquet file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let batch = self.to_record_batch()?;
        let file = File::create(path.as_ref())?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }
}
