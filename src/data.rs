use crate::config::InputConfig;
use crate::types::{Attributes, Facility, Layer, ReferenceUnit};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geo::{MultiPolygon, Point};
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::{info, warn};

/// Loads tract boundaries in the frame named by `tract_frame`.
pub fn load_tracts(input: &InputConfig) -> Result<Layer<ReferenceUnit>> {
    info!("Loading census tract data from {:?}...", input.tracts);

    let extension = input
        .tracts
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension"))?;

    let units = match extension.as_str() {
        "shp" => load_shapefile(input)?,
        "json" | "geojson" => load_geojson(input)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    info!("Loaded {} census tracts", units.len());
    Ok(Layer::new(input.tract_frame.clone(), units))
}

fn load_shapefile(input: &InputConfig) -> Result<Vec<ReferenceUnit>> {
    let mut reader = Reader::from_path(&input.tracts)
        .with_context(|| format!("Failed to open Shapefile: {:?}", input.tracts))?;

    let mut units = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let id_value = record.get(&input.tract_id_column).ok_or_else(|| {
            anyhow!(
                "Tract id column '{}' not found in Shapefile",
                input.tract_id_column
            )
        })?;
        let id = match field_to_string(id_value) {
            Some(id) if !id.is_empty() => pad_tract_id(id, input.tract_id_width),
            _ => {
                warn!("Skipping shapefile record with no tract id");
                continue;
            }
        };

        let boundary: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon for tract {}: {:?}", id, e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM for tract {}: {:?}", id, e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ for tract {}: {:?}", id, e))?,
            // Null shapes stay in so normalization reports them as empty.
            shapefile::Shape::NullShape => MultiPolygon::new(vec![]),
            _ => {
                warn!("Skipping tract {} with non-polygon geometry", id);
                continue;
            }
        };

        let attributes = input
            .tract_columns
            .iter()
            .map(|column| {
                let value = record.get(column).and_then(field_to_string).unwrap_or_default();
                (column.clone(), value)
            })
            .collect();

        units.push(ReferenceUnit {
            id,
            boundary,
            attributes,
        });
    }

    Ok(units)
}

fn field_to_string(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(s) => s.as_ref().map(|s| s.trim().to_string()),
        FieldValue::Numeric(n) => n.map(|n| n.to_string()),
        FieldValue::Float(n) => n.map(|n| n.to_string()),
        FieldValue::Integer(n) => Some(n.to_string()),
        FieldValue::Double(n) => Some(n.to_string()),
        FieldValue::Logical(b) => b.map(|b| b.to_string()),
        FieldValue::Memo(s) => Some(s.clone()),
        other => Some(format!("{:?}", other)),
    }
}

fn load_geojson(input: &InputConfig) -> Result<Vec<ReferenceUnit>> {
    use geojson::GeoJson;

    let file = File::open(&input.tracts)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", input.tracts))?;
    let reader = BufReader::new(file);

    // Parses the whole file into memory.
    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut units = Vec::new();

    for feature in collection.features {
        let id = match feature
            .properties
            .as_ref()
            .and_then(|props| props.get(&input.tract_id_column))
            .and_then(json_to_string)
        {
            Some(id) if !id.is_empty() => pad_tract_id(id, input.tract_id_width),
            _ => {
                warn!("Skipping GeoJSON feature with no tract id");
                continue;
            }
        };

        let boundary = match feature.geometry {
            Some(geometry) => {
                let geometry: geo::Geometry<f64> = geometry
                    .value
                    .try_into()
                    .map_err(|e| anyhow!("Failed to convert geometry for tract {}: {:?}", id, e))?;
                match geometry {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        warn!("Skipping tract {} with non-polygon geometry", id);
                        continue;
                    }
                }
            }
            None => MultiPolygon::new(vec![]),
        };

        let attributes = input
            .tract_columns
            .iter()
            .map(|column| {
                let value = feature
                    .properties
                    .as_ref()
                    .and_then(|props| props.get(column))
                    .and_then(json_to_string)
                    .unwrap_or_default();
                (column.clone(), value)
            })
            .collect();

        units.push(ReferenceUnit {
            id,
            boundary,
            attributes,
        });
    }

    Ok(units)
}

/// Numeric id fields drop leading zeros ("06001400100" reads as 6001400100).
fn pad_tract_id(id: String, width: Option<usize>) -> String {
    match width {
        Some(width) if id.len() < width && id.bytes().all(|b| b.is_ascii_digit()) => {
            format!("{:0>width$}", id, width = width)
        }
        _ => id,
    }
}

fn json_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Loads facility points from CSV. Every column except the coordinate pair
/// is carried as an attribute, in header order.
pub fn load_facilities(input: &InputConfig) -> Result<Layer<Facility>> {
    info!("Loading MRF data from {:?}...", input.facilities_csv);

    let file = File::open(&input.facilities_csv)
        .with_context(|| format!("Failed to open CSV file: {:?}", input.facilities_csv))?;
    let facilities = read_facilities(file, input)?;

    info!("Loaded {} facilities", facilities.len());
    Ok(Layer::new(input.facility_frame.clone(), facilities))
}

pub fn read_facilities<R: Read>(source: R, input: &InputConfig) -> Result<Vec<Facility>> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(source);
    let headers = rdr.headers()?.clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("Column '{}' not found in facility CSV", name))
    };
    let lon_idx = column(&input.facility_lon_column)?;
    let lat_idx = column(&input.facility_lat_column)?;
    let id_idx = input
        .facility_id_column
        .as_deref()
        .map(|name| column(name))
        .transpose()?;

    let records = rdr
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to read facility CSV")?;

    // Assigned ids are zero-padded so string order equals row order.
    let width = records.len().to_string().len();
    let mut facilities = Vec::with_capacity(records.len());

    for (row, record) in records.iter().enumerate() {
        let line = row + 2;
        let id = match id_idx {
            Some(idx) => {
                let id = record.get(idx).unwrap_or("").to_string();
                if id.is_empty() {
                    return Err(anyhow!("Facility on line {} has an empty id", line));
                }
                id
            }
            None => format!("{:0width$}", row, width = width),
        };

        let coordinate = |idx: usize, name: &str| -> Result<f64> {
            let raw = record.get(idx).unwrap_or("");
            raw.parse::<f64>().with_context(|| {
                format!(
                    "Facility '{}' on line {} has a non-numeric {} value '{}'",
                    id, line, name, raw
                )
            })
        };
        let lon = coordinate(lon_idx, &input.facility_lon_column)?;
        let lat = coordinate(lat_idx, &input.facility_lat_column)?;

        let attributes: Attributes = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(idx, _)| *idx != lon_idx && *idx != lat_idx)
            .map(|(_, (h, v))| (h.to_string(), v.to_string()))
            .collect();

        facilities.push(Facility {
            id,
            location: Point::new(lon, lat),
            attributes,
        });
    }

    Ok(facilities)
}
