//! Shared fixtures: synthetic patient tables.

#![allow(dead_code)]
#![allow(clippy::cast_precision_loss)]

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use readmission_pipeline::config::{Hyperparameters, PipelineConfig};
use readmission_pipeline::storage::StorageEngine;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("encounter_id", DataType::Int64, false),
        Field::new("age", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("race", DataType::Utf8, true),
        Field::new("time_in_hospital", DataType::Int64, true),
        Field::new("num_lab_procedures", DataType::Int64, true),
        Field::new("num_medications", DataType::Int64, true),
        Field::new("diabetesMed", DataType::Utf8, true),
        Field::new("readmitted", DataType::Utf8, true),
    ]))
}

/// Five records; the third has no `readmitted` value.
pub fn five_records() -> RecordBatch {
    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
            Arc::new(StringArray::from(vec![
                Some("[70-80)"),
                Some("[50-60)"),
                Some("[60-70)"),
                Some("[40-50)"),
                Some("[80-90)"),
            ])),
            Arc::new(StringArray::from(vec![
                Some("Female"),
                Some("Male"),
                Some("Female"),
                None,
                Some("Male"),
            ])),
            Arc::new(StringArray::from(vec![
                Some("Caucasian"),
                Some("AfricanAmerican"),
                Some("Caucasian"),
                Some("Hispanic"),
                Some("Caucasian"),
            ])),
            Arc::new(Int64Array::from(vec![3, 1, 7, 2, 9])),
            Arc::new(Int64Array::from(vec![41, 12, 60, 33, 58])),
            Arc::new(Int64Array::from(vec![12, 5, 20, 9, 22])),
            Arc::new(StringArray::from(vec![
                Some("Yes"),
                Some("No"),
                Some("Yes"),
                Some("No"),
                Some("Yes"),
            ])),
            Arc::new(StringArray::from(vec![
                Some("<30"),
                Some("NO"),
                None,
                Some(">30"),
                Some("<30"),
            ])),
        ],
    )
    .unwrap()
}

/// `n` deterministic records where long stays with many medications are
/// mostly readmitted within 30 days.
pub fn patients(n: usize) -> RecordBatch {
    let races = ["Caucasian", "AfricanAmerican", "Hispanic", "Asian", "Other"];
    let mut ages = Vec::with_capacity(n);
    let mut genders = Vec::with_capacity(n);
    let mut race = Vec::with_capacity(n);
    let mut days = Vec::with_capacity(n);
    let mut labs = Vec::with_capacity(n);
    let mut meds = Vec::with_capacity(n);
    let mut diabetes = Vec::with_capacity(n);
    let mut readmitted = Vec::with_capacity(n);

    for i in 0..n {
        let decade = (i * 7) % 9;
        let stay = (i * 5) % 14 + 1;
        let medications = (i * 11) % 40 + 1;
        ages.push(format!("[{}-{})", decade * 10, decade * 10 + 10));
        genders.push(if i % 2 == 0 { "Female" } else { "Male" });
        race.push(races[i % races.len()]);
        days.push(stay as i64);
        labs.push(((i * 13) % 90) as i64);
        meds.push(medications as i64);
        diabetes.push(if i % 3 == 0 { "No" } else { "Yes" });
        let risky = stay > 8 && medications > 15;
        readmitted.push(match (risky, i % 5) {
            (true, 0) | (false, 1) => ">30",
            (true, _) => "<30",
            (false, 2) => "<30",
            _ => "NO",
        });
    }

    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(Int64Array::from_iter_values(0..n as i64)),
            Arc::new(StringArray::from(ages)),
            Arc::new(StringArray::from(genders)),
            Arc::new(StringArray::from(race)),
            Arc::new(Int64Array::from(days)),
            Arc::new(Int64Array::from(labs)),
            Arc::new(Int64Array::from(meds)),
            Arc::new(StringArray::from(diabetes)),
            Arc::new(StringArray::from(readmitted)),
        ],
    )
    .unwrap()
}

pub fn table(batch: RecordBatch) -> StorageEngine {
    StorageEngine::new(vec![batch])
}

pub fn write_parquet(path: &Path, batch: &RecordBatch) {
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

/// In-memory config with a small forest, writing artifacts under `dir`.
pub fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        hyperparameters: Hyperparameters {
            n_estimators: 20,
            ..Hyperparameters::baseline()
        },
        ..PipelineConfig::in_memory(dir.join("artifacts"))
    }
}
