//! Medical transcription records (`Healthcare Documentation Database.csv`)

use super::reader::{Row, RowAccumulator};
use crate::error::RowError;
use crate::Result;
use arrow::array::{ArrayRef, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Output schema of the transcriptions artifact
#[must_use]
pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("serial_no", DataType::Int64, true),
        Field::new("description", DataType::Utf8, true),
        Field::new("medical_specialty", DataType::Utf8, true),
        Field::new("sample_name", DataType::Utf8, true),
        Field::new("keywords", DataType::Utf8, false),
        Field::new("cleaned_transcription", DataType::Utf8, true),
        Field::new("transcription_length", DataType::Int64, false),
    ]))
}

/// Trim whitespace, then trailing commas
fn clean_keywords(raw: Option<&str>) -> &str {
    raw.map_or("", |s| s.trim().trim_end_matches(','))
}

#[derive(Default)]
pub(crate) struct TranscriptionsAccumulator {
    serial_no: Int64Builder,
    description: StringBuilder,
    medical_specialty: StringBuilder,
    sample_name: StringBuilder,
    keywords: StringBuilder,
    cleaned_transcription: StringBuilder,
    transcription_length: Int64Builder,
}

impl RowAccumulator for TranscriptionsAccumulator {
    const REQUIRED: &'static [&'static str] =
        &["medical_specialty", "cleaned_transcription", "keywords"];

    fn push(&mut self, row: &Row<'_>) -> std::result::Result<(), RowError> {
        let serial_no = row.text("Serial No").and_then(|s| s.parse::<i64>().ok());
        let transcription = row.raw("cleaned_transcription").filter(|s| !s.is_empty());
        let length = transcription.map_or(0, |s| s.chars().count());

        self.serial_no.append_option(serial_no);
        self.description.append_option(row.text("description"));
        self.medical_specialty
            .append_option(row.text("medical_specialty"));
        self.sample_name.append_option(row.text("sample_name"));
        self.keywords.append_value(clean_keywords(row.raw("keywords")));
        self.cleaned_transcription.append_option(transcription);
        self.transcription_length
            .append_value(i64::try_from(length).unwrap_or(i64::MAX));
        Ok(())
    }

    fn finish(mut self) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.serial_no.finish()),
            Arc::new(self.description.finish()),
            Arc::new(self.medical_specialty.finish()),
            Arc::new(self.sample_name.finish()),
            Arc::new(self.keywords.finish()),
            Arc::new(self.cleaned_transcription.finish()),
            Arc::new(self.transcription_length.finish()),
        ];
        Ok(RecordBatch::try_new(schema(), columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_keywords() {
        assert_eq!(clean_keywords(Some("  cardio, ekg,, ")), "cardio, ekg");
        assert_eq!(clean_keywords(Some(",")), "");
        assert_eq!(clean_keywords(None), "");
    }
}
