//! Installation records (`military-bases.csv`, `;`-delimited, optional BOM)

use super::geometry::{parse_geo_point, parse_geo_shape, rings_data_type, RingsBuilder};
use super::reader::{coerce_f64, Row, RowAccumulator};
use crate::error::RowError;
use crate::Result;
use arrow::array::{ArrayRef, Float64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Output schema of the installations artifact
#[must_use]
pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("component", DataType::Utf8, true),
        Field::new("site_name", DataType::Utf8, false),
        Field::new("state_terr", DataType::Utf8, false),
        Field::new("oper_stat", DataType::Utf8, false),
        Field::new("joint_base", DataType::Utf8, false),
        Field::new("lat", DataType::Float64, false),
        Field::new("lon", DataType::Float64, false),
        Field::new("area", DataType::Float64, false),
        Field::new("perimeter", DataType::Float64, false),
        Field::new("shape_type", DataType::Utf8, true),
        Field::new("shape_rings", rings_data_type(), true),
    ]))
}

#[derive(Default)]
pub(crate) struct InstallationsAccumulator {
    component: StringBuilder,
    site_name: StringBuilder,
    state_terr: StringBuilder,
    oper_stat: StringBuilder,
    joint_base: StringBuilder,
    lat: Float64Builder,
    lon: Float64Builder,
    area: Float64Builder,
    perimeter: Float64Builder,
    shape_type: StringBuilder,
    shape_rings: RingsBuilder,
    bad_shapes: u64,
}

impl RowAccumulator for InstallationsAccumulator {
    const REQUIRED: &'static [&'static str] = &[
        "Geo Point",
        "COMPONENT",
        "Site Name",
        "State Terr",
        "Oper Stat",
        "Joint Base",
        "AREA",
        "PERIMETER",
    ];

    fn push(&mut self, row: &Row<'_>) -> std::result::Result<(), RowError> {
        let (lat, lon) = row
            .text("Geo Point")
            .and_then(parse_geo_point)
            .ok_or(RowError::MissingCoordinates)?;

        // unparseable shapes keep the row, with null geometry
        let shape = row.text("Geo Shape").and_then(|raw| {
            let parsed = parse_geo_shape(raw);
            if parsed.is_none() {
                self.bad_shapes += 1;
            }
            parsed
        });

        self.component.append_option(row.text("COMPONENT"));
        self.site_name.append_value(row.text_or("Site Name", "Unknown"));
        self.state_terr.append_value(row.text_or("State Terr", "Unknown"));
        self.oper_stat.append_value(row.text_or("Oper Stat", "Unknown"));
        self.joint_base.append_value(row.text_or("Joint Base", "Not Joint"));
        self.lat.append_value(lat);
        self.lon.append_value(lon);
        self.area.append_value(coerce_f64(row.raw("AREA")));
        self.perimeter.append_value(coerce_f64(row.raw("PERIMETER")));
        self.shape_type
            .append_option(shape.as_ref().map(|g| g.kind.as_str()));
        self.shape_rings.append(shape.as_ref());
        Ok(())
    }

    fn flagged_rows(&self) -> u64 {
        self.bad_shapes
    }

    fn finish(mut self) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.component.finish()),
            Arc::new(self.site_name.finish()),
            Arc::new(self.state_terr.finish()),
            Arc::new(self.oper_stat.finish()),
            Arc::new(self.joint_base.finish()),
            Arc::new(self.lat.finish()),
            Arc::new(self.lon.finish()),
            Arc::new(self.area.finish()),
            Arc::new(self.perimeter.finish()),
            Arc::new(self.shape_type.finish()),
            self.shape_rings.finish(),
        ];
        Ok(RecordBatch::try_new(schema(), columns)?)
    }
}
