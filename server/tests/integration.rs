//! Integration Tests for CellMap Server
//!
//! These tests drive the HTTP router over published experiments and run the
//! batch pipeline end to end on a temporary directory.

use axum::http::{StatusCode, header};

mod common;
use common::*;

// ============================================================================
// Map Object API Integration Tests
// ============================================================================

mod map_objects {
    use super::*;

    #[tokio::test]
    async fn test_list_experiments() {
        let data_dir = temp_data_dir("list_experiments");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, body) = get_json(&app, "/api/experiments").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["experiments"], serde_json::json!([EXPERIMENT]));
        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test]
    async fn test_list_object_types() {
        let data_dir = temp_data_dir("list_types");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, body) = get_json(&app, "/api/experiments/plate1/mapobjects").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["experiment_id"], EXPERIMENT);

        let types = body["types"].as_array().unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0]["name"], "cells");
        assert_eq!(types[0]["object_count"], 2);
        assert_eq!(types[0]["max_zoom"], 6);
        assert_eq!(types[1]["name"], "nuclei");
        assert_eq!(types[1]["object_count"], 0);
        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test]
    async fn test_tile_returns_intersecting_object() {
        let data_dir = temp_data_dir("tile_hit");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, body) = get_json(&app, "/api/experiments/plate1/mapobjects/cells?x=0&y=0&z=6&zlevel=0&t=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "FeatureCollection");

        let features = body["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["type"], "Feature");
        assert_eq!(features[0]["properties"]["id"], "18");
        assert_eq!(features[0]["properties"]["type"], "cells");
        assert_eq!(features[0]["geometry"]["type"], "Polygon");
        assert_eq!(
            features[0]["geometry"]["coordinates"][0][0],
            serde_json::json!([10.0, -50.0])
        );
        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_tile_is_empty_collection() {
        let data_dir = temp_data_dir("tile_miss");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, body) = get_json(&app, "/api/experiments/plate1/mapobjects/cells?x=3&y=3&z=6&zlevel=0&t=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "FeatureCollection");
        assert_eq!(body["features"], serde_json::json!([]));

        // Objects of other time points are not returned either
        let (status, body) = get_json(&app, "/api/experiments/plate1/mapobjects/cells?x=0&y=0&z=6&zlevel=0&t=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["features"], serde_json::json!([]));
        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test]
    async fn test_coarsest_tile_holds_every_object() {
        let data_dir = temp_data_dir("tile_whole");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, body) = get_json(&app, "/api/experiments/plate1/mapobjects/cells?x=0&y=0&z=0&zlevel=0&t=0").await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["properties"]["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["18", "19"]);
        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_or_non_integer_parameters_return_400() {
        let data_dir = temp_data_dir("malformed");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        for query in [
            "x=0&y=0&z=6&t=0",
            "x=0&y=0&z=6&zlevel=0",
            "x=a&y=0&z=6&zlevel=0&t=0",
            "x=0&y=-1&z=6&zlevel=0&t=0",
            "x=0&y=0&z=6.5&zlevel=0&t=0",
            "",
        ] {
            let uri = format!("/api/experiments/plate1/mapobjects/cells?{}", query);
            let (status, body) = get_json(&app, &uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "query {:?}", query);
            assert_eq!(body["code"], "malformed_request");
            assert!(body["error"].is_string());
        }

        // Zoom beyond the full resolution level
        let (status, _) = get_json(&app, "/api/experiments/plate1/mapobjects/cells?x=0&y=0&z=7&zlevel=0&t=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_experiment_or_type_returns_404() {
        let data_dir = temp_data_dir("unknown");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, body) = get_json(&app, "/api/experiments/plate1/mapobjects/vesicles?x=0&y=0&z=6&zlevel=0&t=0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_object_type");

        let (status, body) = get_json(&app, "/api/experiments/plate9/mapobjects/cells?x=0&y=0&z=6&zlevel=0&t=0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_experiment");

        let (status, _) = get_json(&app, "/api/experiments/plate9/mapobjects").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        std::fs::remove_dir_all(&data_dir).unwrap();
    }
}

// ============================================================================
// Pyramid Tile Integration Tests
// ============================================================================

mod layer_tiles {
    use super::*;

    #[tokio::test]
    async fn test_list_layers() {
        let data_dir = temp_data_dir("layers");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, body) = get_json(&app, "/api/experiments/plate1/layers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "dapi");
        assert_eq!(body[0]["kind"], "display");
        assert_eq!(body[0]["width"], 40);
        assert_eq!(body[0]["max_zoom"], 2);
        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test]
    async fn test_get_tile_returns_jpeg() {
        let data_dir = temp_data_dir("tile_jpeg");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, headers, body) = get(&app, "/api/experiments/plate1/layers/dapi/tiles/0/0/0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "image/jpeg");
        assert!(headers.get(header::CACHE_CONTROL).is_some());

        // Zoom 0 shrinks the 40x20 mosaic by four into a single tile
        let tile = image::load_from_memory(&body).unwrap();
        assert_eq!((tile.width(), tile.height()), (10, 5));

        // Edge tile of the full resolution level is cropped
        let (status, _, body) = get(&app, "/api/experiments/plate1/layers/dapi/tiles/2/2/1").await;
        assert_eq!(status, StatusCode::OK);
        let tile = image::load_from_memory(&body).unwrap();
        assert_eq!((tile.width(), tile.height()), (8, 4));
        std::fs::remove_dir_all(&data_dir).unwrap();
    }

    #[tokio::test]
    async fn test_tile_errors() {
        let data_dir = temp_data_dir("tile_errors");
        publish_test_experiment(&data_dir);
        let app = create_test_app(&data_dir, 256);

        let (status, _, _) = get(&app, "/api/experiments/plate1/layers/dapi/tiles/3/0/0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = get(&app, "/api/experiments/plate1/layers/dapi/tiles/2/3/0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json(&app, "/api/experiments/plate1/layers/gfp/tiles/0/0/0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let (status, _, _) = get(&app, "/api/experiments/plate1/layers/dapi/tiles/0/0/x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        std::fs::remove_dir_all(&data_dir).unwrap();
    }
}

// ============================================================================
// Batch Pipeline Integration Tests
// ============================================================================

mod pipeline_end_to_end {
    use super::*;
    use cellmap_server::labels::decode;
    use cellmap_server::pipeline::{JobConfig, Pipeline, PipelineError};
    use cellmap_server::pyramid::PyramidError;
    use std::path::{Path, PathBuf};

    const SITE: u32 = 100;

    /// Two cycles of a 2x2 grid of 100x100 sites; cycle 1 is shifted by (5, 3)
    fn write_acquisition(root: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let cycle0 = root.join("cycle0");
        let cycle1 = root.join("cycle1");
        let labels = root.join("labels");
        for dir in [&cycle0, &cycle1, &labels] {
            std::fs::create_dir_all(dir).unwrap();
        }

        let mut file_names = Vec::new();
        for row in 1..=2u32 {
            for column in 1..=2u32 {
                let base = (row * 2 + column) as u16 * 1000;
                write_u16_png(&cycle0.join(format!("r{}_c{}_dapi.png", row, column)), SITE, SITE, |x, y| {
                    base + (x + y) as u16
                });
                write_u16_png(&cycle1.join(format!("r{}_c{}_gfp.png", row, column)), SITE, SITE, |x, _| {
                    base + x as u16
                });
                // One square object per site, plus a second one in the first site
                let first = row == 1 && column == 1;
                write_u16_png(&labels.join(format!("r{}_c{}_cells.png", row, column)), SITE, SITE, |x, y| {
                    if (40..60).contains(&x) && (40..60).contains(&y) {
                        1
                    } else if first && (10..20).contains(&x) && (70..80).contains(&y) {
                        2
                    } else {
                        0
                    }
                });
                file_names.push(format!("r{}_c{}_gfp.png", row, column));
            }
        }

        let shifts = serde_json::json!({
            "xShift": [5.0, 5.0, 5.0, 5.0],
            "yShift": [3.0, 3.0, 3.0, 3.0],
            "fileName": file_names,
            "upperOverlap": 3,
            "lowerOverlap": 0,
            "rightOverlap": 0,
            "leftOverlap": 5,
            "maxShift": 10,
            "noShiftIndex": [0, 0, 0, 0],
            "noShiftCount": 0,
            "cycleNum": 1
        });
        std::fs::write(cycle1.join("shift_descriptor.json"), shifts.to_string()).unwrap();
        (cycle0, cycle1, labels)
    }

    fn job(root: &Path, data_dir: &Path) -> JobConfig {
        let (cycle0, cycle1, labels) = write_acquisition(root);
        serde_json::from_value(serde_json::json!({
            "experiment_id": EXPERIMENT,
            "data_dir": data_dir,
            "locator": { "pattern": r"r(?P<row>\d+)_c(?P<column>\d+)_(?P<channel>[a-z]+)\.png$" },
            "reference_cycle": 0,
            "cycles": [
                { "cycle": 0, "image_dir": cycle0 },
                { "cycle": 1, "image_dir": cycle1, "shift_file": cycle1.join("shift_descriptor.json") }
            ],
            "layers": [
                { "channel": "dapi", "cycle": 0 },
                { "channel": "gfp", "cycle": 1, "scaling": { "clip_value": 6000 } }
            ],
            "objects": [
                { "object_type": "cells", "cycle": 0, "label_dir": labels }
            ],
            "tile_size": 64
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_publishes_layers_and_objects() {
        let root = temp_data_dir("pipeline_root");
        let data_dir = root.join("data");
        let report = Pipeline::new(job(&root, &data_dir)).unwrap().run().unwrap();

        // Cycles at (0, 0) and (5, 3) share a 195x197 region
        assert_eq!((report.width, report.height), (195, 197));
        assert_eq!(report.max_zoom, 2);
        assert_eq!(report.layers, vec!["dapi", "gfp", "cells", "cells_ids"]);
        assert_eq!(report.objects["cells"], 5);
        assert_eq!(report.max_ids["cells"], 5);

        let app = create_test_app(&data_dir, 64);

        let (status, body) = get_json(&app, "/api/experiments/plate1/layers").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["cells", "cells_ids", "dapi", "gfp"]);
        assert!(body.as_array().unwrap().iter().all(|l| l["width"] == 195 && l["height"] == 197));

        // The square of site (0, 0) spans columns 40..60 and rows 40..60, shifted by the crop (5, 3)
        let (status, body) = get_json(&app, "/api/experiments/plate1/mapobjects/cells?x=0&y=0&z=2&zlevel=0&t=0").await;
        assert_eq!(status, StatusCode::OK);
        let features = body["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["properties"]["id"], "1");
        let ring = features[0]["geometry"]["coordinates"][0].as_array().unwrap();
        assert!(ring.contains(&serde_json::json!([35.0, -37.0])));
        assert!(ring.contains(&serde_json::json!([55.0, -57.0])));

        // The small object of site (0, 0) lies in the tile below
        let (_, body) = get_json(&app, "/api/experiments/plate1/mapobjects/cells?x=0&y=1&z=2&zlevel=0&t=0").await;
        let ids: Vec<&str> = body["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["properties"]["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["2"]);

        let (_, body) = get_json(&app, "/api/experiments/plate1/mapobjects/cells?x=0&y=0&z=0&zlevel=0&t=0").await;
        assert_eq!(body["features"].as_array().unwrap().len(), 5);

        // Global ids are decodable from the id layer at full resolution
        let (status, headers, bytes) = get(&app, "/api/experiments/plate1/layers/cells_ids/tiles/2/0/0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "image/png");
        let tile = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decode(tile.get_pixel(45, 45).0), 1);
        assert_eq!(decode(tile.get_pixel(0, 0).0), 0);

        let (status, headers, _) = get(&app, "/api/experiments/plate1/layers/gfp/tiles/1/1/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "image/jpeg");

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_rerun_requires_overwrite() {
        let root = temp_data_dir("pipeline_rerun");
        let data_dir = root.join("data");
        let mut job = job(&root, &data_dir);
        job.objects.clear();
        job.layers.truncate(1);

        Pipeline::new(job.clone()).unwrap().run().unwrap();
        assert!(matches!(
            Pipeline::new(job.clone()).unwrap().run(),
            Err(PipelineError::Pyramid(PyramidError::OutputExists(_)))
        ));

        job.overwrite = true;
        let report = Pipeline::new(job).unwrap().run().unwrap();
        assert_eq!(report.layers, vec!["dapi"]);
        assert!(report.objects.is_empty());
        std::fs::remove_dir_all(&root).unwrap();
    }
}
