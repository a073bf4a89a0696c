//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules: temporary data
//! directories, published test experiments and a router over them.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use cellmap_server::config::Config;
use cellmap_server::index::{BBox, MapObject, ObjectIndex, SNAPSHOT_FILE, TypeIndex, write_snapshot};
use cellmap_server::mosaic::Raster;
use cellmap_server::pyramid::{LayerKind, PyramidBuilder};
use cellmap_server::tiles::LAYERS_DIR;
use cellmap_server::{AppServices, build_router};
use image::{ImageBuffer, Luma};
use tower::util::ServiceExt;

pub const EXPERIMENT: &str = "plate1";

/// Fresh, empty directory under the system temp dir
pub fn temp_data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cellmap_it_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn test_config(data_dir: &Path, tile_size: u32) -> Config {
    Config {
        data_dir: data_dir.to_path_buf(),
        tile_size,
        ..Config::default()
    }
}

/// Create a test application router over a data directory
pub fn create_test_app(data_dir: &Path, tile_size: u32) -> Router {
    build_router(AppServices::from_config(&test_config(data_dir, tile_size)))
}

fn rectangle(global_id: u64, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MapObject {
    MapObject {
        external_id: global_id,
        global_id,
        type_name: "cells".to_string(),
        tpoint: 0,
        zplane: 0,
        outline: vec![[min_x, min_y], [max_x, min_y], [max_x, max_y], [min_x, max_y], [min_x, min_y]],
        centroid: [(min_x + max_x) / 2.0, (min_y + max_y) / 2.0],
        bbox: BBox::new(min_x, min_y, max_x, max_y),
    }
}

/// Publish a small experiment: a "cells" type with max zoom 6 holding object
/// 18 inside tile (0, 0, 6) and object 19 far away, plus a display layer
pub fn publish_test_experiment(data_dir: &Path) {
    let experiment_dir = data_dir.join(EXPERIMENT);
    std::fs::create_dir_all(&experiment_dir).unwrap();

    let mut cells = TypeIndex::new(
        "cells",
        6,
        vec![
            rectangle(18, 10.0, -50.0, 20.0, -10.0),
            rectangle(19, 5000.0, -5010.0, 5010.0, -5000.0),
        ],
    );
    cells.set_min_poly_zoom(0);
    let mut nuclei = TypeIndex::new("nuclei", 6, Vec::new());
    nuclei.set_min_poly_zoom(0);

    let mut index = ObjectIndex::new();
    index.insert(cells);
    index.insert(nuclei);
    write_snapshot(&experiment_dir.join(SNAPSHOT_FILE), &index).unwrap();

    let display: Raster<u8> = ImageBuffer::from_fn(40, 20, |x, y| Luma([(x * 5 + y) as u8]));
    PyramidBuilder::new(16)
        .unwrap()
        .build(&display, LayerKind::Display, &experiment_dir.join(LAYERS_DIR).join("dapi"))
        .unwrap();
}

/// Issue a GET request and collect status, headers and body
pub async fn get(app: &Router, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

/// Write a 16-bit grayscale PNG
pub fn write_u16_png(path: &Path, width: u32, height: u32, pixel: impl Fn(u32, u32) -> u16) {
    let image: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_fn(width, height, |x, y| Luma([pixel(x, y)]));
    image.save(path).unwrap();
}
