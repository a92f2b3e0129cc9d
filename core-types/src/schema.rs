// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Arrow schema for option snapshot partitions.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use std::sync::Arc;

pub const TIMEZONE: &str = "UTC";

pub const MARKET_COLUMN_COUNT: usize = 16;

/// Nullable price/greek/volume columns, in on-disk order.
pub const MARKET_COLUMNS: [&str; MARKET_COLUMN_COUNT] = [
    "mark_price",
    "last_price",
    "bid_price",
    "ask_price",
    "mid_price",
    "delta",
    "gamma",
    "vega",
    "theta",
    "rho",
    "mark_iv",
    "bid_iv",
    "ask_iv",
    "open_interest",
    "volume_24h",
    "underlying_price",
];

pub fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some(TIMEZONE.into()))
}

/// Full snapshot schema. Every partition file is written with exactly this schema.
pub fn option_snapshot_schema() -> Schema {
    let mut fields = vec![
        Field::new("timestamp", timestamp_type(), false),
        Field::new("instrument_name", DataType::Utf8, false),
        Field::new("currency", DataType::Utf8, false),
        Field::new("expiration_timestamp", timestamp_type(), false),
        Field::new("strike", DataType::Float64, false),
        Field::new("option_type", DataType::Utf8, false),
    ];
    fields.extend(
        MARKET_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, true)),
    );
    fields.push(Field::new("underlying_index", DataType::Utf8, true));
    fields.push(Field::new("spot_price", DataType::Float64, false));
    Schema::new(fields)
}

pub fn option_snapshot_schema_ref() -> SchemaRef {
    Arc::new(option_snapshot_schema())
}
