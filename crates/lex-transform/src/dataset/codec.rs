//! Serialization between stored bytes and [`Dataset`].
//!
//! The format is chosen from the object key's extension. CSV is read with
//! every column as text, so a marker or a float appearing late in a column
//! never breaks schema inference. Decoding then standardizes textual missing
//! markers to nulls, re-types text columns that turn out to be integer,
//! float or boolean once the markers are gone, and assigns the row identity
//! if the stored data has none.

use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::io::Cursor;
use tracing::debug;

use super::Dataset;
use crate::error::{EngineError, Result, ResultExt};
use crate::utils::is_missing_marker;

/// On-disk dataset formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    Parquet,
}

impl DatasetFormat {
    /// Pick the format from an object key such as `sales.csv`.
    pub fn from_key(key: &str) -> Result<Self> {
        let ext = key
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" | "pq" => Ok(Self::Parquet),
            _ => Err(EngineError::UnsupportedFormat(key.to_string())),
        }
    }

    /// Canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

/// Decode stored bytes into a dataset.
pub fn decode(bytes: &[u8], format: DatasetFormat) -> Result<Dataset> {
    let cursor = Cursor::new(bytes.to_vec());
    let frame = match format {
        DatasetFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .into_reader_with_file_handle(cursor)
            .finish()
            .context("Failed to parse CSV")?,
        DatasetFormat::Parquet => ParquetReader::new(cursor)
            .finish()
            .context("Failed to parse Parquet")?,
    };

    let frame = standardize_missing(frame)?;
    debug!(
        "Decoded {} rows x {} columns ({:?})",
        frame.height(),
        frame.width(),
        format
    );
    Dataset::from_frame(frame)
}

/// Encode a dataset, keeping the identity column.
///
/// Use this for intermediate artifacts that a later stage diffs against.
pub fn encode(dataset: &Dataset, format: DatasetFormat) -> Result<Vec<u8>> {
    write_frame(dataset.frame().clone(), format)
}

/// Encode a dataset for end users, without the identity column.
pub fn encode_for_export(dataset: &Dataset, format: DatasetFormat) -> Result<Vec<u8>> {
    write_frame(dataset.without_identity()?, format)
}

fn write_frame(mut frame: DataFrame, format: DatasetFormat) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    match format {
        DatasetFormat::Csv => {
            CsvWriter::new(&mut buffer)
                .include_header(true)
                .finish(&mut frame)
                .context("Failed to write CSV")?;
        }
        DatasetFormat::Parquet => {
            ParquetWriter::new(&mut buffer)
                .finish(&mut frame)
                .context("Failed to write Parquet")?;
        }
    }
    Ok(buffer)
}

/// Replace textual missing markers with nulls in every text column.
///
/// A text column whose remaining values all parse as numbers is re-typed to
/// `Int64` or `Float64`; one holding only `true`/`false` becomes `Boolean`.
/// A textual identity column goes through the same path so that
/// [`Dataset::from_frame`] sees integers.
fn standardize_missing(mut frame: DataFrame) -> Result<DataFrame> {
    let text_columns: Vec<String> = frame
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String)
        .map(|c| c.name().to_string())
        .collect();

    for name in text_columns {
        let series = frame.column(&name)?.as_materialized_series();
        let values: Vec<Option<String>> = series
            .str()?
            .into_iter()
            .map(|v| v.filter(|s| !is_missing_marker(s)).map(str::to_string))
            .collect();

        let standardized = retype_numeric(&name, &values)
            .or_else(|| retype_boolean(&name, &values))
            .unwrap_or_else(|| Series::new(name.as_str().into(), values));
        frame.with_column(standardized)?;
    }

    Ok(frame)
}

fn retype_numeric(name: &str, values: &[Option<String>]) -> Option<Series> {
    if values.iter().all(Option::is_none) {
        return None;
    }

    let ints: Option<Vec<Option<i64>>> = values
        .iter()
        .map(|v| match v {
            Some(s) => s.trim().parse::<i64>().ok().map(Some),
            None => Some(None),
        })
        .collect();
    if let Some(ints) = ints {
        return Some(Series::new(name.into(), ints));
    }

    let floats: Option<Vec<Option<f64>>> = values
        .iter()
        .map(|v| match v {
            Some(s) => s.trim().parse::<f64>().ok().map(Some),
            None => Some(None),
        })
        .collect();
    floats.map(|floats| Series::new(name.into(), floats))
}

fn retype_boolean(name: &str, values: &[Option<String>]) -> Option<Series> {
    if values.iter().all(Option::is_none) {
        return None;
    }

    let bools: Option<Vec<Option<bool>>> = values
        .iter()
        .map(|v| match v {
            Some(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Some(true)),
                "false" => Some(Some(false)),
                _ => None,
            },
            None => Some(None),
        })
        .collect();
    bools.map(|bools| Series::new(name.into(), bools))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ROW_ID_COLUMN;
    use crate::dataset::value::CellValue;

    #[test]
    fn test_format_from_key() {
        assert_eq!(DatasetFormat::from_key("a.csv").unwrap(), DatasetFormat::Csv);
        assert_eq!(DatasetFormat::from_key("A.CSV").unwrap(), DatasetFormat::Csv);
        assert_eq!(
            DatasetFormat::from_key("dir/a.b.parquet").unwrap(),
            DatasetFormat::Parquet
        );
        assert!(matches!(
            DatasetFormat::from_key("notes.txt"),
            Err(EngineError::UnsupportedFormat(_))
        ));
        assert!(DatasetFormat::from_key("noext").is_err());
    }

    #[test]
    fn test_decode_csv_standardizes_markers_and_assigns_identity() {
        let csv = "name,score\nada,1\nbob,NA\ncy,n/a\n,3\n";
        let dataset = decode(csv.as_bytes(), DatasetFormat::Csv).unwrap();

        assert_eq!(dataset.row_ids().unwrap(), vec![0, 1, 2, 3]);

        let score = dataset.series("score").unwrap();
        assert_eq!(score.dtype(), &DataType::Int64);
        assert_eq!(score.null_count(), 2);

        let name = dataset.series("name").unwrap();
        assert_eq!(name.null_count(), 1);
    }

    #[test]
    fn test_decode_csv_mixed_text_stays_text() {
        let csv = "code\nA1\nNULL\n7\n";
        let dataset = decode(csv.as_bytes(), DatasetFormat::Csv).unwrap();

        let code = dataset.series("code").unwrap();
        assert_eq!(code.dtype(), &DataType::String);
        assert_eq!(code.null_count(), 1);
    }

    #[test]
    fn test_decode_csv_late_marker_and_late_float() {
        let mut csv = String::from("x,y,flag\n");
        for i in 0..150 {
            csv.push_str(&format!("{},a,true\n", i));
        }
        csv.push_str("NA,b,False\n");
        csv.push_str("2.5,n/a,\n");

        let dataset = decode(csv.as_bytes(), DatasetFormat::Csv).unwrap();
        assert_eq!(dataset.height(), 152);

        let x = dataset.series("x").unwrap();
        assert_eq!(x.dtype(), &DataType::Float64);
        assert_eq!(x.null_count(), 1);
        assert_eq!(x.f64().unwrap().get(151), Some(2.5));

        let y = dataset.series("y").unwrap();
        assert_eq!(y.dtype(), &DataType::String);
        assert_eq!(y.null_count(), 1);

        let flag = dataset.series("flag").unwrap();
        assert_eq!(flag.dtype(), &DataType::Boolean);
        assert_eq!(flag.null_count(), 1);
    }

    #[test]
    fn test_decode_csv_late_marker_keeps_integers() {
        let mut csv = String::from("n\n");
        for i in 0..120 {
            csv.push_str(&format!("{}\n", i));
        }
        csv.push_str("null\n");

        let dataset = decode(csv.as_bytes(), DatasetFormat::Csv).unwrap();

        let n = dataset.series("n").unwrap();
        assert_eq!(n.dtype(), &DataType::Int64);
        assert_eq!(n.null_count(), 1);
    }

    #[test]
    fn test_decode_csv_with_stored_identity() {
        let csv = "_row_id,a\n7,x\n3,y\n";
        let dataset = decode(csv.as_bytes(), DatasetFormat::Csv).unwrap();
        assert_eq!(dataset.row_ids().unwrap(), vec![7, 3]);
    }

    #[test]
    fn test_csv_encode_keeps_identity_and_export_drops_it() {
        let csv = "a,b\n1,x\n2,y\n";
        let dataset = decode(csv.as_bytes(), DatasetFormat::Csv).unwrap();

        let kept = String::from_utf8(encode(&dataset, DatasetFormat::Csv).unwrap()).unwrap();
        assert!(kept.starts_with("_row_id,a,b"));

        let exported =
            String::from_utf8(encode_for_export(&dataset, DatasetFormat::Csv).unwrap()).unwrap();
        assert!(exported.starts_with("a,b"));
        assert!(!exported.contains(ROW_ID_COLUMN));
    }

    #[test]
    fn test_parquet_roundtrip_preserves_identity() {
        let csv = "a,b\n1.5,x\n2.5,\n";
        let dataset = decode(csv.as_bytes(), DatasetFormat::Csv).unwrap();

        let bytes = encode(&dataset, DatasetFormat::Parquet).unwrap();
        let back = decode(&bytes, DatasetFormat::Parquet).unwrap();

        assert_eq!(back.row_ids().unwrap(), vec![0, 1]);
        let b = back.series("b").unwrap();
        assert_eq!(CellValue::from_any(&b.get(1).unwrap()), CellValue::Missing);
    }
}
