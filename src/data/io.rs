//! Reading uploads and writing scored output.
//!
//! Files are read with Polars and converted into a raw [`Dataset`]; scored
//! batches are written back through Polars with the prediction columns
//! appended.

use super::{Dataset, RawColumn, RawValue};
use crate::error::{RenewalError, Result};
use calamine::{Data, DataType as _, Reader as _, open_workbook_auto};
use chrono::{DateTime, NaiveDate};
use polars::prelude::*;
use std::path::Path;

/// Name of the appended probability column.
pub const PROBABILITY_COLUMN: &str = "RenewalProbability";
/// Name of the appended hard-label column.
pub const PREDICTION_COLUMN: &str = "PredictedRenewal";

/// Days between 0001-01-01 and the Unix epoch.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn data_err(what: &str) -> impl FnOnce(PolarsError) -> RenewalError + '_ {
    move |e| RenewalError::DataProcessing(format!("{what}: {e}"))
}

/// Load a CSV, spreadsheet, Parquet or JSON file, chosen by extension.
/// Spreadsheets are read from their first worksheet.
///
/// # Errors
///
/// Returns `DataProcessing` for unknown extensions and unreadable files.
pub fn load_df(path: &Path) -> Result<DataFrame> {
    let ext = extension(path);

    let df = match ext.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(Some(10000))
            .with_has_header(true)
            .with_try_parse_dates(true)
            .finish()
            .map_err(data_err("Failed to scan CSV"))?
            .collect()
            .map_err(data_err("Failed to read CSV"))?,
        "xlsx" | "xls" | "xlsm" | "ods" => read_spreadsheet(path)?,
        "parquet" => ParquetReader::new(std::fs::File::open(path)?)
            .finish()
            .map_err(data_err("Failed to read Parquet"))?,
        "json" => JsonReader::new(std::fs::File::open(path)?)
            .finish()
            .map_err(data_err("Failed to read JSON"))?,
        _ => {
            return Err(RenewalError::DataProcessing(format!(
                "Unsupported file extension: '{ext}' (expected csv, xlsx, parquet or json)"
            )));
        }
    };

    try_parse_temporal_columns(df)
}

/// First worksheet as a frame. The first row names the columns. Columns
/// holding only numbers become `Float64` and columns holding only dates
/// become `Date`. Everything else is kept as text and coerced cell by
/// cell in [`frame_to_dataset`].
fn read_spreadsheet(path: &Path) -> Result<DataFrame> {
    let sheet_err = |what: &'static str| move |e: calamine::Error| RenewalError::DataProcessing(format!("{what}: {e}"));

    let mut workbook = open_workbook_auto(path).map_err(sheet_err("Failed to open spreadsheet"))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| RenewalError::DataProcessing("Spreadsheet has no worksheets".to_owned()))?
        .map_err(sheet_err("Failed to read worksheet"))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(DataFrame::empty());
    };
    let body: Vec<&[Data]> = rows.collect();

    let columns = header
        .iter()
        .enumerate()
        .map(|(j, title)| {
            let cells: Vec<Option<&Data>> = body
                .iter()
                .map(|row| row.get(j).filter(|c| !c.is_empty()))
                .collect();
            let name = match title.to_string().trim() {
                "" => format!("column_{}", j + 1),
                named => named.to_owned(),
            };
            sheet_column(name, &cells)
        })
        .collect();

    DataFrame::new(columns).map_err(data_err("Failed to build frame from spreadsheet"))
}

fn sheet_column(name: String, cells: &[Option<&Data>]) -> Column {
    let numeric = cells
        .iter()
        .flatten()
        .all(|c| matches!(c, Data::Int(_) | Data::Float(_)));
    if numeric {
        let values: Vec<Option<f64>> = cells.iter().map(|c| c.and_then(|c| c.as_f64())).collect();
        return Column::new(name.into(), values);
    }

    let dates: Vec<Option<NaiveDate>> = cells.iter().map(|c| c.and_then(cell_date)).collect();
    if dates.iter().filter(|d| d.is_some()).count() == cells.iter().flatten().count() {
        return Column::new(name.into(), dates);
    }

    let values: Vec<Option<String>> = cells.iter().map(|c| c.map(ToString::to_string)).collect();
    Column::new(name.into(), values)
}

fn cell_date(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::DateTime(_) | Data::DateTimeIso(_) => cell.as_date(),
        Data::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        _ => None,
    }
}

/// Promote string columns that mostly parse as dates.
///
/// # Errors
///
/// Fails if a promoted column cannot replace the original.
pub fn try_parse_temporal_columns(df: DataFrame) -> Result<DataFrame> {
    let mut df = df;
    let schema = df.schema().clone();

    for (name, dtype) in schema.iter() {
        if !matches!(dtype, DataType::String) {
            continue;
        }

        if let Ok(s) = df.column(name) {
            let s = s.as_materialized_series();
            if let Ok(casted) = s.cast(&DataType::Date)
                && casted.null_count() == s.null_count()
                && casted.null_count() < s.len()
            {
                df.replace(name, casted)?;
            }
        }
    }
    Ok(df)
}

/// Convert a Polars frame into raw cells.
///
/// # Errors
///
/// Returns `DataProcessing` when a column has a type that cannot be read.
pub fn frame_to_dataset(df: &DataFrame) -> Result<Dataset> {
    let mut columns = Vec::with_capacity(df.width());
    for col in df.get_columns() {
        let name = col.name().to_string();
        let series = col.as_materialized_series();
        let values = series_to_values(series)
            .map_err(|e| RenewalError::DataProcessing(format!("Column '{name}': {e}")))?;
        columns.push(RawColumn::new(name, values));
    }
    Dataset::new(columns)
}

fn series_to_values(series: &Series) -> PolarsResult<Vec<RawValue>> {
    let dtype = series.dtype().clone();

    if dtype.is_bool() {
        let s = series.cast(&DataType::String)?;
        return Ok(text_values(s.str()?));
    }

    if dtype.is_primitive_numeric() {
        let s = series.cast(&DataType::Float64)?;
        return Ok(s
            .f64()?
            .into_iter()
            .map(|v| match v {
                Some(n) if !n.is_nan() => RawValue::Number(n),
                _ => RawValue::Missing,
            })
            .collect());
    }

    match dtype {
        DataType::Date => {
            let s = series.cast(&DataType::Int32)?;
            Ok(s.i32()?
                .into_iter()
                .map(|v| {
                    v.and_then(|days| NaiveDate::from_num_days_from_ce_opt(days + EPOCH_DAYS_FROM_CE))
                        .map_or(RawValue::Missing, RawValue::Date)
                })
                .collect())
        }
        DataType::Datetime(unit, _) => {
            let s = series.cast(&DataType::Int64)?;
            Ok(s.i64()?
                .into_iter()
                .map(|v| {
                    v.and_then(|ts| match unit {
                        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(ts),
                        TimeUnit::Microseconds => DateTime::from_timestamp_micros(ts),
                        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(ts)),
                    })
                    .map_or(RawValue::Missing, |dt| RawValue::Date(dt.date_naive()))
                })
                .collect())
        }
        _ => {
            let s = series.cast(&DataType::String)?;
            Ok(text_values(s.str()?))
        }
    }
}

/// String cells are coerced one at a time, so a column that Polars left
/// as text because of a single stray entry still yields numbers and dates
/// for its other rows.
fn text_values(ca: &StringChunked) -> Vec<RawValue> {
    ca.into_iter()
        .map(|v| v.map_or(RawValue::Missing, RawValue::coerce))
        .collect()
}

/// Append the probability and hard-label columns to a scored frame. Rows
/// that could not be scored stay null.
///
/// # Errors
///
/// Fails if the lengths do not match the frame height.
pub fn append_predictions(
    df: &mut DataFrame,
    probabilities: Vec<Option<f64>>,
    labels: Vec<Option<i32>>,
) -> Result<()> {
    df.with_column(Series::new(PROBABILITY_COLUMN.into(), probabilities))?;
    df.with_column(Series::new(PREDICTION_COLUMN.into(), labels))?;
    Ok(())
}

/// Write a frame as Parquet, JSON or, for any other extension, CSV.
///
/// # Errors
///
/// Returns the I/O or Polars error from writing the file.
pub fn save_df(df: &mut DataFrame, path: &Path) -> Result<()> {
    let ext = extension(path);

    match ext.as_str() {
        "parquet" => {
            let file = std::fs::File::create(path)?;
            ParquetWriter::new(file)
                .finish(df)
                .map_err(data_err("Failed to write Parquet file"))?;
        }
        "json" => {
            let file = std::fs::File::create(path)?;
            JsonWriter::new(file)
                .with_json_format(JsonFormat::Json)
                .finish(df)
                .map_err(data_err("Failed to write JSON file"))?;
        }
        _ => {
            let file = std::fs::File::create(path)?;
            CsvWriter::new(file)
                .include_header(true)
                .finish(df)
                .map_err(data_err("Failed to write CSV file"))?;
        }
    }

    Ok(())
}
