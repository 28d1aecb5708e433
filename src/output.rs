use crate::types::{Layer, MatchResult, NormalizedUnit};
use anyhow::{bail, Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Column layout for joined rows.
#[derive(Debug, Clone)]
pub struct OutputColumns<'a> {
    /// Header used for the unit id, normally the tract id column.
    pub id_column: &'a str,
    /// Prepended to every facility column, e.g. `nearest_mrf_`.
    pub prefix: &'a str,
}

impl OutputColumns<'_> {
    /// Fails if two columns would share a name, e.g. a facility column
    /// called `distance` next to the computed one.
    fn header(&self, first: Option<&MatchResult>) -> Result<Vec<String>> {
        let mut header = vec![self.id_column.to_string()];
        if let Some(row) = first {
            header.extend(row.unit_attributes.iter().map(|(k, _)| k.clone()));
        }
        header.push("centroid_x".to_string());
        header.push("centroid_y".to_string());
        for fixed in ["id", "x", "y", "distance"] {
            header.push(format!("{}{}", self.prefix, fixed));
        }
        if let Some(row) = first {
            header.extend(
                row.facility_attributes
                    .iter()
                    .map(|(k, _)| format!("{}{}", self.prefix, k)),
            );
        }

        let mut seen = HashSet::new();
        for name in &header {
            if !seen.insert(name.as_str()) {
                bail!(
                    "Output column '{}' appears more than once; rename the input column or change the column prefix",
                    name
                );
            }
        }
        Ok(header)
    }
}

fn row(result: &MatchResult) -> Vec<String> {
    let mut row = Vec::with_capacity(
        7 + result.unit_attributes.len() + result.facility_attributes.len(),
    );
    row.push(result.unit_id.clone());
    row.extend(result.unit_attributes.iter().map(|(_, v)| v.clone()));
    row.push(result.centroid.x().to_string());
    row.push(result.centroid.y().to_string());
    row.push(result.facility_id.clone());
    row.push(result.facility_location.x().to_string());
    row.push(result.facility_location.y().to_string());
    row.push(result.distance.to_string());
    row.extend(result.facility_attributes.iter().map(|(_, v)| v.clone()));
    row
}

pub fn write_matches<W: Write>(
    sink: W,
    columns: &OutputColumns<'_>,
    results: &[MatchResult],
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(sink);
    wtr.write_record(columns.header(results.first())?)?;
    for result in results {
        wtr.write_record(row(result))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes joined rows to a CSV file, creating parent directories.
pub fn save_matches(path: &Path, columns: &OutputColumns<'_>, results: &[MatchResult]) -> Result<()> {
    info!("Saving {} rows to CSV at {:?}", results.len(), path);
    columns.header(results.first())?;
    create_parent(path)?;
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    write_matches(BufWriter::new(file), columns, results)
        .with_context(|| format!("Failed to write CSV {:?}", path))
}

/// Normalized tracts as a GeoJSON FeatureCollection, with the centroid
/// carried as properties.
pub fn units_to_geojson(units: &Layer<NormalizedUnit>, id_column: &str) -> GeoJson {
    let features = units
        .records
        .iter()
        .map(|unit| {
            let mut properties = JsonObject::new();
            properties.insert(id_column.to_string(), Value::from(unit.id()));
            for (key, value) in unit.attributes() {
                properties.insert(key.clone(), Value::from(value.as_str()));
            }
            properties.insert("centroid_x".to_string(), Value::from(unit.centroid().x()));
            properties.insert("centroid_y".to_string(), Value::from(unit.centroid().y()));

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(unit.boundary()))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let mut foreign_members = JsonObject::new();
    foreign_members.insert("frame".to_string(), Value::from(units.frame.to_string()));

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign_members),
    })
}

pub fn save_units_geojson(path: &Path, units: &Layer<NormalizedUnit>, id_column: &str) -> Result<()> {
    info!("Saving {} tracts to GeoJSON at {:?}", units.len(), path);
    create_parent(path)?;
    let geojson = units_to_geojson(units, id_column);
    fs::write(path, geojson.to_string()).with_context(|| format!("Failed to write {:?}", path))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {:?}", parent))?;
    }
    Ok(())
}
