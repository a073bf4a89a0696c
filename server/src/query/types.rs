//! Tile query types, GeoJSON encoding and error definitions

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::IndexError;

/// Errors that can occur when answering tile queries
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Malformed tile request: {0}")]
    Malformed(String),

    #[error("Experiment not found: {0}")]
    UnknownExperiment(String),

    #[error("Unknown object type '{type_name}' in experiment '{experiment_id}'")]
    UnknownObjectType {
        experiment_id: String,
        type_name: String,
    },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Request key of a tile query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileQuery {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub zplane: u32,
    pub tpoint: u32,
}

impl TileQuery {
    /// Parse `x`, `y`, `z`, `zlevel` and `t` from raw query parameters
    ///
    /// All five are required non-negative integers.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, QueryError> {
        let field = |name: &str| -> Result<u32, QueryError> {
            let raw = params
                .get(name)
                .ok_or_else(|| QueryError::Malformed(format!("missing parameter '{}'", name)))?;
            raw.trim()
                .parse::<u32>()
                .map_err(|_| QueryError::Malformed(format!("parameter '{}' is not a non-negative integer: '{}'", name, raw)))
        };

        Ok(Self {
            x: field("x")?,
            y: field("y")?,
            z: field("z")?,
            zplane: field("zlevel")?,
            tpoint: field("t")?,
        })
    }
}

/// GeoJSON geometry of one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    /// Global id, as a string
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_tile_query() {
        let query = TileQuery::from_params(&params(&[("x", "0"), ("y", "3"), ("z", "6"), ("zlevel", "1"), ("t", "2")])).unwrap();
        assert_eq!(
            query,
            TileQuery {
                x: 0,
                y: 3,
                z: 6,
                zplane: 1,
                tpoint: 2
            }
        );
    }

    #[test]
    fn test_missing_or_invalid_parameters() {
        let missing = TileQuery::from_params(&params(&[("x", "0"), ("y", "0"), ("z", "6"), ("t", "0")]));
        assert!(matches!(missing, Err(QueryError::Malformed(msg)) if msg.contains("zlevel")));

        for bad in ["abc", "-1", "1.5", ""] {
            let result = TileQuery::from_params(&params(&[("x", bad), ("y", "0"), ("z", "6"), ("zlevel", "0"), ("t", "0")]));
            assert!(matches!(result, Err(QueryError::Malformed(_))), "accepted x={:?}", bad);
        }
    }

    #[test]
    fn test_geojson_encoding() {
        let collection = FeatureCollection {
            features: vec![Feature {
                geometry: Geometry::Point { coordinates: [15.0, -30.0] },
                properties: FeatureProperties {
                    id: "18".to_string(),
                    type_name: "cells".to_string(),
                },
            }],
        };
        let json = serde_json::to_value(&collection).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["type"], "Feature");
        assert_eq!(json["features"][0]["geometry"]["type"], "Point");
        assert_eq!(json["features"][0]["properties"]["id"], "18");

        let back: FeatureCollection = serde_json::from_value(json).unwrap();
        assert_eq!(back, collection);
    }
}
