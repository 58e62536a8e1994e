use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::database::executor::SqlParam;
use crate::database::identifier;
use crate::database::table_info::TableInfo;

/// One GeoJSON Feature on the wire. Inbound bodies may omit everything but
/// `properties`; outbound Features always carry `"type": "Feature"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub feature_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

fn feature_type() -> String {
    "Feature".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub collection_type: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            collection_type: "FeatureCollection".to_string(),
            features,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("column {column} does not contain valid GeoJSON: {source}")]
    InvalidGeometry {
        column: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode geometry as JSON: {0}")]
    GeometryEncode(#[from] serde_json::Error),
    #[error("property name {0:?} is not a valid column identifier")]
    InvalidPropertyName(String),
}

/// Lifts a relational row into a Feature: every column lands in
/// `properties`, except the primary key (moved to `id`) and the geometry
/// column (parsed from its GeoJSON text into `geometry`).
pub fn row_to_feature(
    mut row: Map<String, Value>,
    pk: &str,
    geom: Option<&str>,
) -> Result<Feature, CodecError> {
    let id = row.remove(pk);

    let geometry = match geom {
        Some(column) => match row.remove(column) {
            Some(Value::String(text)) => Some(serde_json::from_str(&text).map_err(|source| {
                CodecError::InvalidGeometry {
                    column: column.to_string(),
                    source,
                }
            })?),
            // json/jsonb columns arrive already parsed
            Some(Value::Object(parsed)) => Some(Value::Object(parsed)),
            _ => None,
        },
        None => None,
    };

    Ok(Feature {
        feature_type: feature_type(),
        id,
        properties: row,
        geometry,
    })
}

/// The (columns, placeholders, values) triple behind one INSERT or UPDATE.
/// Columns are sanitized identifiers and the only text a caller may
/// interpolate; every value is a bound parameter.
#[derive(Debug)]
pub struct WriteSpec {
    pub columns: Vec<String>,
    pub placeholders: Vec<String>,
    pub values: Vec<SqlParam>,
}

/// Assembles the write spec for an inbound Feature: declared properties
/// first, then the geometry expression, then whichever audit columns the
/// table carries.
///
/// Inbound geometry is interpreted as 4326 and transformed to the table's
/// native SRID when one is configured.
pub fn write_spec(
    feature: &Feature,
    info: &TableInfo,
    is_insert: bool,
    now: DateTime<Utc>,
    client_ip: &str,
) -> Result<WriteSpec, CodecError> {
    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut values: Vec<SqlParam> = Vec::new();

    for (name, value) in &feature.properties {
        let column = identifier::sanitize(name);
        if column.is_empty() {
            return Err(CodecError::InvalidPropertyName(name.clone()));
        }
        columns.push(column);
        placeholders.push(format!("${}", values.len() + 1));
        values.push(SqlParam::Json(value.clone()));
    }

    if let Some(geom) = &info.geom {
        let from_geojson = format!("ST_SetSRID(ST_GeomFromGeoJSON(${}), 4326)", values.len() + 1);
        columns.push(geom.clone());
        placeholders.push(match info.srid {
            Some(srid) => format!("ST_Transform({}, {})", from_geojson, srid),
            None => from_geojson,
        });
        values.push(match &feature.geometry {
            Some(geometry) => SqlParam::Text(serde_json::to_string(geometry)?),
            None => SqlParam::Json(Value::Null),
        });
    }

    if info.has_ip && is_insert {
        columns.push("_ip".to_string());
        placeholders.push(format!("${}", values.len() + 1));
        values.push(SqlParam::Text(client_ip.to_string()));
    }

    if info.has_created && is_insert {
        columns.push("_created".to_string());
        placeholders.push(format!("${}", values.len() + 1));
        values.push(SqlParam::Timestamp(now));
    }

    if info.has_modified {
        columns.push("_modified".to_string());
        placeholders.push(format!("${}", values.len() + 1));
        values.push(SqlParam::Timestamp(now));
    }

    Ok(WriteSpec {
        columns,
        placeholders,
        values,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn info(geom: Option<&str>, srid: Option<i32>) -> TableInfo {
        TableInfo {
            schema: "public".to_string(),
            table: "roads".to_string(),
            pk: "id".to_string(),
            geom: geom.map(|g| g.to_string()),
            srid,
            has_created: false,
            has_modified: false,
            has_ip: false,
            can_select: true,
            can_insert: true,
            can_update: true,
        }
    }

    fn row(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn lifts_primary_key_out_of_properties() {
        let feature = row_to_feature(
            row(&[("id", json!(7)), ("name", json!("Main St"))]),
            "id",
            None,
        )
        .unwrap();

        assert_eq!(feature.id, Some(json!(7)));
        assert!(!feature.properties.contains_key("id"));
        assert_eq!(feature.properties["name"], json!("Main St"));
    }

    #[test]
    fn parses_geometry_text_and_drops_the_column() {
        let geojson = r#"{"type":"Point","coordinates":[1.0,2.0]}"#;
        let feature = row_to_feature(
            row(&[("id", json!(1)), ("geom", json!(geojson))]),
            "id",
            Some("geom"),
        )
        .unwrap();

        assert_eq!(
            feature.geometry,
            Some(json!({"type": "Point", "coordinates": [1.0, 2.0]}))
        );
        assert!(!feature.properties.contains_key("geom"));
    }

    #[test]
    fn row_without_pk_has_no_id() {
        let feature = row_to_feature(row(&[("name", json!("x"))]), "id", None).unwrap();
        assert_eq!(feature.id, None);
        assert_eq!(feature.properties["name"], json!("x"));
    }

    #[test]
    fn invalid_geometry_text_is_an_error() {
        let result = row_to_feature(
            row(&[("geom", json!("not geojson"))]),
            "id",
            Some("geom"),
        );
        assert!(matches!(
            result,
            Err(CodecError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn serializes_with_feature_type_tag() {
        let feature = row_to_feature(row(&[("id", json!(1))]), "id", None).unwrap();
        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(value["type"], json!("Feature"));
        assert_eq!(value["id"], json!(1));
    }

    fn body(properties: Value, geometry: Option<Value>) -> Feature {
        Feature {
            feature_type: "Feature".to_string(),
            id: None,
            properties: properties.as_object().cloned().unwrap_or_default(),
            geometry,
        }
    }

    #[test]
    fn audit_columns_follow_properties_in_order() {
        let mut info = info(None, None);
        info.has_created = true;
        info.has_modified = true;

        let spec = write_spec(
            &body(json!({"name": "a"}), None),
            &info,
            true,
            Utc::now(),
            "203.0.113.9",
        )
        .unwrap();

        assert_eq!(spec.columns, vec!["name", "_created", "_modified"]);
        assert_eq!(spec.placeholders, vec!["$1", "$2", "$3"]);
        assert_eq!(spec.values.len(), 3);
    }

    #[test]
    fn update_skips_created_and_ip() {
        let mut info = info(None, None);
        info.has_created = true;
        info.has_modified = true;
        info.has_ip = true;

        let spec = write_spec(
            &body(json!({"name": "a"}), None),
            &info,
            false,
            Utc::now(),
            "203.0.113.9",
        )
        .unwrap();

        assert_eq!(spec.columns, vec!["name", "_modified"]);
    }

    #[test]
    fn geometry_placeholder_wraps_geojson_constructor() {
        let spec = write_spec(
            &body(
                json!({"name": "a"}),
                Some(json!({"type": "Point", "coordinates": [0.0, 0.0]})),
            ),
            &info(Some("geom"), None),
            true,
            Utc::now(),
            "203.0.113.9",
        )
        .unwrap();

        assert_eq!(spec.columns, vec!["name", "geom"]);
        assert_eq!(
            spec.placeholders,
            vec!["$1", "ST_SetSRID(ST_GeomFromGeoJSON($2), 4326)"]
        );
    }

    #[test]
    fn table_srid_adds_a_transform() {
        let spec = write_spec(
            &body(json!({}), Some(json!({"type": "Point", "coordinates": [0.0, 0.0]}))),
            &info(Some("geom"), Some(2264)),
            true,
            Utc::now(),
            "203.0.113.9",
        )
        .unwrap();

        assert_eq!(
            spec.placeholders,
            vec!["ST_Transform(ST_SetSRID(ST_GeomFromGeoJSON($1), 4326), 2264)"]
        );
    }

    #[test]
    fn client_ip_binds_only_on_insert_when_column_exists() {
        let mut with_ip = info(None, None);
        with_ip.has_ip = true;

        let spec = write_spec(&body(json!({}), None), &with_ip, true, Utc::now(), "10.0.0.1")
            .unwrap();
        assert_eq!(spec.columns, vec!["_ip"]);
        assert!(matches!(&spec.values[0], SqlParam::Text(ip) if ip == "10.0.0.1"));

        let spec = write_spec(&body(json!({}), None), &info(None, None), true, Utc::now(), "10.0.0.1")
            .unwrap();
        assert!(spec.columns.is_empty());
    }

    #[test]
    fn property_names_are_sanitized() {
        let spec = write_spec(
            &body(json!({"na;me": "a"}), None),
            &info(None, None),
            true,
            Utc::now(),
            "10.0.0.1",
        )
        .unwrap();
        assert_eq!(spec.columns, vec!["name"]);
    }

    #[test]
    fn unsalvageable_property_name_is_rejected() {
        let result = write_spec(
            &body(json!({"💥": "a"}), None),
            &info(None, None),
            true,
            Utc::now(),
            "10.0.0.1",
        );
        assert!(matches!(result, Err(CodecError::InvalidPropertyName(_))));
    }
}
