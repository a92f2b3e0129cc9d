// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Conversion between snapshot rows and Arrow record batches.

use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, Float64Array, StringArray, TimestampMillisecondArray},
    datatypes::DataType,
    error::ArrowError,
    record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use core_types::{
    schema::{
        option_snapshot_schema_ref, timestamp_type, MARKET_COLUMNS, MARKET_COLUMN_COUNT, TIMEZONE,
    },
    types::{OptionType, SnapshotRow},
};

fn market_values(row: &SnapshotRow) -> [Option<f64>; MARKET_COLUMN_COUNT] {
    [
        row.mark_price,
        row.last_price,
        row.bid_price,
        row.ask_price,
        row.mid_price,
        row.delta,
        row.gamma,
        row.vega,
        row.theta,
        row.rho,
        row.mark_iv,
        row.bid_iv,
        row.ask_iv,
        row.open_interest,
        row.volume_24h,
        row.underlying_price,
    ]
}

fn market_slots(row: &mut SnapshotRow) -> [&mut Option<f64>; MARKET_COLUMN_COUNT] {
    [
        &mut row.mark_price,
        &mut row.last_price,
        &mut row.bid_price,
        &mut row.ask_price,
        &mut row.mid_price,
        &mut row.delta,
        &mut row.gamma,
        &mut row.vega,
        &mut row.theta,
        &mut row.rho,
        &mut row.mark_iv,
        &mut row.bid_iv,
        &mut row.ask_iv,
        &mut row.open_interest,
        &mut row.volume_24h,
        &mut row.underlying_price,
    ]
}

fn timestamp_array(values: impl Iterator<Item = i64>) -> ArrayRef {
    Arc::new(TimestampMillisecondArray::from_iter_values(values).with_timezone(TIMEZONE))
}

/// Encodes rows with the full declared schema, whatever subset of fields is populated.
pub fn rows_to_batch(rows: &[SnapshotRow]) -> Result<RecordBatch, ArrowError> {
    let schema = option_snapshot_schema_ref();
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    arrays.push(timestamp_array(
        rows.iter().map(|r| r.timestamp.timestamp_millis()),
    ));
    arrays.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.instrument_name.as_str()),
    )));
    arrays.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.currency.as_str()),
    )));
    arrays.push(timestamp_array(
        rows.iter().map(|r| r.expiration.timestamp_millis()),
    ));
    arrays.push(Arc::new(Float64Array::from_iter_values(
        rows.iter().map(|r| r.strike),
    )));
    arrays.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.option_type.as_str()),
    )));
    let market: Vec<_> = rows.iter().map(market_values).collect();
    for idx in 0..MARKET_COLUMNS.len() {
        let column: Float64Array = market.iter().map(|values| values[idx]).collect();
        arrays.push(Arc::new(column));
    }
    arrays.push(Arc::new(StringArray::from(
        rows.iter()
            .map(|r| r.underlying_index.as_deref())
            .collect::<Vec<_>>(),
    )));
    arrays.push(Arc::new(Float64Array::from_iter_values(
        rows.iter().map(|r| r.spot_price),
    )));
    RecordBatch::try_new(schema, arrays)
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    expected: &DataType,
) -> Result<Option<&'a T>, String> {
    let Some(array) = batch.column_by_name(name) else {
        return Ok(None);
    };
    if array.data_type() != expected {
        return Err(format!(
            "column {name} has type {}, expected {expected}",
            array.data_type()
        ));
    }
    array
        .as_any()
        .downcast_ref::<T>()
        .map(Some)
        .ok_or_else(|| format!("column {name} could not be decoded"))
}

fn required<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    expected: &DataType,
) -> Result<&'a T, String> {
    let array = column::<T>(batch, name, expected)?
        .ok_or_else(|| format!("missing required column {name}"))?;
    if array.null_count() > 0 {
        return Err(format!("required column {name} contains nulls"));
    }
    Ok(array)
}

fn utc_from_millis(millis: i64) -> Result<DateTime<Utc>, String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| format!("timestamp {millis} out of range"))
}

fn optional_f64(array: Option<&Float64Array>, idx: usize) -> Option<f64> {
    array.filter(|a| a.is_valid(idx)).map(|a| a.value(idx))
}

/// Decodes a stored batch. Columns are resolved by name; nullable columns missing from
/// older files decode as null, anything else that deviates from the schema is an error.
pub(crate) fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<SnapshotRow>, String> {
    let ts_type = timestamp_type();
    let timestamps = required::<TimestampMillisecondArray>(batch, "timestamp", &ts_type)?;
    let names = required::<StringArray>(batch, "instrument_name", &DataType::Utf8)?;
    let currencies = required::<StringArray>(batch, "currency", &DataType::Utf8)?;
    let expirations =
        required::<TimestampMillisecondArray>(batch, "expiration_timestamp", &ts_type)?;
    let strikes = required::<Float64Array>(batch, "strike", &DataType::Float64)?;
    let option_types = required::<StringArray>(batch, "option_type", &DataType::Utf8)?;
    let spot = required::<Float64Array>(batch, "spot_price", &DataType::Float64)?;
    let market = MARKET_COLUMNS
        .iter()
        .map(|name| column::<Float64Array>(batch, name, &DataType::Float64))
        .collect::<Result<Vec<_>, _>>()?;
    let underlying_index = column::<StringArray>(batch, "underlying_index", &DataType::Utf8)?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for idx in 0..batch.num_rows() {
        let option_type = option_types
            .value(idx)
            .parse::<OptionType>()
            .map_err(|err| err.to_string())?;
        let mut row = SnapshotRow {
            timestamp: utc_from_millis(timestamps.value(idx))?,
            instrument_name: names.value(idx).to_string(),
            currency: currencies.value(idx).to_string(),
            expiration: utc_from_millis(expirations.value(idx))?,
            strike: strikes.value(idx),
            option_type,
            mark_price: None,
            last_price: None,
            bid_price: None,
            ask_price: None,
            mid_price: None,
            delta: None,
            gamma: None,
            vega: None,
            theta: None,
            rho: None,
            mark_iv: None,
            bid_iv: None,
            ask_iv: None,
            open_interest: None,
            volume_24h: None,
            underlying_price: None,
            underlying_index: underlying_index
                .filter(|a| a.is_valid(idx))
                .map(|a| a.value(idx).to_string()),
            spot_price: spot.value(idx),
        };
        for (slot, array) in market_slots(&mut row).into_iter().zip(&market) {
            *slot = optional_f64(*array, idx);
        }
        rows.push(row);
    }
    Ok(rows)
}
