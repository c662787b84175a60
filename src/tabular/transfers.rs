//! Equipment transfer records (`dod_all_states.csv`)

use super::reader::{coerce_f64, coerce_i64, date32, parse_date, year, Row, RowAccumulator};
use crate::error::RowError;
use crate::Result;
use arrow::array::{ArrayRef, Date32Builder, Float64Builder, Int32Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Output schema of the transfers artifact
#[must_use]
pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("state", DataType::Utf8, true),
        Field::new("agency_name", DataType::Utf8, true),
        Field::new("nsn", DataType::Utf8, true),
        Field::new("item_name", DataType::Utf8, true),
        Field::new("quantity", DataType::Int64, false),
        Field::new("ui", DataType::Utf8, true),
        Field::new("acquisition_value", DataType::Float64, false),
        Field::new("demil_code", DataType::Utf8, false),
        Field::new("ship_date", DataType::Date32, true),
        Field::new("year", DataType::Int32, true),
        Field::new("station_type", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
    ]))
}

/// Simplified equipment category from the two-digit NSN group prefix
#[must_use]
pub fn category_for_nsn(nsn: &str) -> &'static str {
    match nsn.get(..2).unwrap_or("") {
        "10" | "11" | "12" | "14" => "Weapons & Firearms",
        "13" => "Ammunition & Explosives",
        "15" | "16" | "17" => "Aircraft & Parts",
        "19" | "20" => "Ships & Marine",
        "22" | "23" | "24" | "25" | "26" => "Vehicles & Transport",
        "28" | "29" => "Engines & Power",
        "34" | "35" | "36" | "37" => "Industrial Equipment",
        "38" | "39" => "Construction Equipment",
        "42" => "Safety & Fire Equipment",
        "49" => "Maintenance Equipment",
        "51" | "52" | "53" => "Tools",
        "58" | "59" | "60" | "61" => "Communications & Electronics",
        "65" => "Medical Equipment",
        "66" => "Scientific Equipment",
        "67" => "Imaging Equipment",
        "68" => "Chemicals",
        "69" => "Training & Simulation",
        "70" => "IT & Computing",
        "71" | "72" | "73" => "Furniture & Supplies",
        "74" | "75" => "Office Equipment",
        "83" | "84" => "Clothing & Textiles",
        "85" => "Personal Gear",
        _ => "Other",
    }
}

#[derive(Default)]
pub(crate) struct TransfersAccumulator {
    state: StringBuilder,
    agency_name: StringBuilder,
    nsn: StringBuilder,
    item_name: StringBuilder,
    quantity: Int64Builder,
    ui: StringBuilder,
    acquisition_value: Float64Builder,
    demil_code: StringBuilder,
    ship_date: Date32Builder,
    year: Int32Builder,
    station_type: StringBuilder,
    category: StringBuilder,
}

impl RowAccumulator for TransfersAccumulator {
    const REQUIRED: &'static [&'static str] = &[
        "State",
        "Agency Name",
        "NSN",
        "Item Name",
        "Quantity",
        "Acquisition Value",
        "Ship Date",
        "DEMIL Code",
        "Station Type",
    ];

    fn push(&mut self, row: &Row<'_>) -> std::result::Result<(), RowError> {
        let nsn = row.text("NSN");
        let ship_date = row.text("Ship Date").and_then(parse_date);

        self.state.append_option(row.text("State"));
        self.agency_name.append_option(row.text("Agency Name"));
        self.nsn.append_option(nsn);
        self.item_name.append_option(row.text("Item Name"));
        self.quantity.append_value(coerce_i64(row.raw("Quantity")));
        self.ui.append_option(row.text("UI"));
        self.acquisition_value
            .append_value(coerce_f64(row.raw("Acquisition Value")));
        self.demil_code.append_value(row.text_or("DEMIL Code", "Unknown"));
        self.ship_date.append_option(ship_date.and_then(date32));
        self.year.append_option(ship_date.map(year));
        self.station_type
            .append_value(row.text_or("Station Type", "Unknown"));
        self.category
            .append_value(nsn.map_or("Other", category_for_nsn));
        Ok(())
    }

    fn finish(mut self) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.state.finish()),
            Arc::new(self.agency_name.finish()),
            Arc::new(self.nsn.finish()),
            Arc::new(self.item_name.finish()),
            Arc::new(self.quantity.finish()),
            Arc::new(self.ui.finish()),
            Arc::new(self.acquisition_value.finish()),
            Arc::new(self.demil_code.finish()),
            Arc::new(self.ship_date.finish()),
            Arc::new(self.year.finish()),
            Arc::new(self.station_type.finish()),
            Arc::new(self.category.finish()),
        ];
        Ok(RecordBatch::try_new(schema(), columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_for_nsn() {
        assert_eq!(category_for_nsn("1005-01-587-7175"), "Weapons & Firearms");
        assert_eq!(category_for_nsn("2320-01-371-9577"), "Vehicles & Transport");
        assert_eq!(category_for_nsn("6515-01-000-0000"), "Medical Equipment");
        assert_eq!(category_for_nsn("9999"), "Other");
        assert_eq!(category_for_nsn("1"), "Other");
        assert_eq!(category_for_nsn(""), "Other");
    }

    #[test]
    fn test_schema_shape() {
        let schema = schema();
        assert_eq!(schema.fields().len(), 12);
        assert_eq!(schema.field_with_name("ship_date").unwrap().data_type(), &DataType::Date32);
        assert!(!schema.field_with_name("category").unwrap().is_nullable());
    }
}
