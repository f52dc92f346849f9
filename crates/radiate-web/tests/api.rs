//! 通过 Router 驱动的接口测试：内存 SQLite、临时目录与合成数据集

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use radiate_core::{Result, TpsConfig, TpsError};
use radiate_database::{DatabasePool, DatabaseQueries};
use radiate_dose::{AnalyticalDoseEngine, DoseEngine, DoseRequest};
use radiate_imaging::{CtImage, Dataset, DatasetLoader, Grid, Polygon, Structure, StructureSet, Volume};
use radiate_storage::StorageManager;
use radiate_web::{create_app, AppState};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// 20 x 16 x 12 的水模，PTV 为 z = 4..=7 层上的方形轮廓
///
/// `dose` 非空时数据集附带同网格、数值恒定的 RTDOSE。
#[derive(Default)]
struct FakeLoader {
    dose: Option<f32>,
}

fn square(z: f64) -> Polygon {
    Polygon {
        points: vec![[5.5, 4.5, z], [11.5, 4.5, z], [11.5, 10.5, z], [5.5, 10.5, z]],
    }
}

impl DatasetLoader for FakeLoader {
    fn load(&self, _dir: &Path) -> Result<Dataset> {
        let grid = Grid::new([20, 16, 12], [1.0; 3], [0.0; 3]);
        let structures = StructureSet {
            label: Some("RS".to_string()),
            structures: vec![
                Structure {
                    number: 1,
                    name: "PTV".to_string(),
                    color: Some([255, 0, 0]),
                    polygons: (4..=7).map(|z| square(z as f64)).collect(),
                },
                Structure {
                    number: 2,
                    name: "Optic Nerve".to_string(),
                    color: None,
                    polygons: vec![],
                },
            ],
        };
        Ok(Dataset {
            ct: Some(CtImage {
                name: "CT".to_string(),
                patient_id: Some("P001".to_string()),
                volume: Arc::new(Volume::filled(grid, 0.0)),
            }),
            structures: Some(structures),
            dose: self.dose.map(|value| Arc::new(Volume::filled(grid, value))),
        })
    }
}

/// 总是失败的剂量引擎
struct FailingEngine;

#[async_trait]
impl DoseEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    async fn compute(&self, _request: &DoseRequest) -> Result<Volume<f32>> {
        Err(TpsError::DoseEngine("beam model unavailable".to_string()))
    }
}

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    dir: TempDir,
}

async fn setup(with_engine: bool) -> TestApp {
    let engine: Option<Arc<dyn DoseEngine>> = if with_engine {
        Some(Arc::new(AnalyticalDoseEngine::new(60.0)))
    } else {
        None
    };
    setup_with(engine, FakeLoader::default()).await
}

async fn setup_with(engine: Option<Arc<dyn DoseEngine>>, loader: FakeLoader) -> TestApp {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    let mut config = TpsConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.storage.upload_dir = root.join("uploads");
    config.storage.output_dir = root.join("Output");
    config.storage.patient_dir = root.join("patientData");
    config.storage.datasets_dir = root.join("datasets");
    config.storage.frontend_dir = root.join("frontend");
    std::fs::create_dir_all(root.join("datasets/phantom")).unwrap();
    std::fs::create_dir_all(root.join("frontend/js")).unwrap();
    std::fs::write(root.join("frontend/index.html"), "<html>index</html>").unwrap();
    std::fs::write(root.join("frontend/js/app.js"), "console.log(1);").unwrap();

    let db = DatabasePool::connect(&config.database.url, 1).await.unwrap();
    DatabaseQueries::new(&db).create_tables().await.unwrap();
    let storage = StorageManager::from_config(&config.storage);
    storage.ensure_dirs().await.unwrap();

    let loader: Arc<dyn DatasetLoader> = Arc::new(loader);
    let state = Arc::new(AppState::new(config, db, storage, Some(loader), engine));

    TestApp {
        app: create_app(state.clone()),
        state,
        dir,
    }
}

impl TestApp {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    async fn raw(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    /// 患者 + 数据集 CT，返回 CT id
    async fn patient_with_ct(&self, patient_id: &str) -> i64 {
        let (status, _) = self
            .post("/patients/create", json!({ "id": patient_id, "name": "Test Patient" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = self
            .post("/ct", json!({ "patient_id": patient_id, "dataset_name": "phantom" }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["ct_scan"]["id"].as_i64().unwrap()
    }

    async fn roi_id(&self, ct_id: i64, name: &str) -> i64 {
        let (_, body) = self.get(&format!("/roi?ct_scan_id={}", ct_id)).await;
        body["rois"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["name"] == name)
            .and_then(|r| r["id"].as_i64())
            .unwrap()
    }
}

#[tokio::test]
async fn test_liveness_and_health() {
    let t = setup(true).await;
    let (status, body) = t.raw("/test").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().starts_with("Server is working"));

    let (status, body) = t.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dose_engine"], "analytical");
}

#[tokio::test]
async fn test_patient_validation() {
    let t = setup(true).await;

    let (status, body) = t.post("/patients/create", json!({ "name": "No Id" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Patient ID is required");

    let (status, body) = t.post("/patients/create", json!({ "id": "P1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Patient name is required");

    let (status, body) = t
        .post("/patients/create", json!({ "id": "P1", "name": "A", "birthDate": "01/02/1980" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid birth date format. Use YYYY-MM-DD");

    let (status, body) = t
        .post(
            "/patients/create",
            json!({ "id": "P1", "name": "Alice", "birthDate": "1980-02-01", "sex": "F" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["patient"]["birthDate"], "1980-02-01");
    assert!(t.dir.path().join("patientData/P1.json").exists());

    let (status, body) = t.post("/patients/create", json!({ "id": "P1", "name": "Again" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Patient with ID P1 already exists");

    let (status, body) = t.get("/patients/load").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = t.get("/patients/P404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = t.get("/patients").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_patient_delete_cascades() {
    let t = setup(true).await;
    let ct_id = t.patient_with_ct("P1").await;
    let (status, _) = t
        .post("/roi", json!({ "patient_id": "P1", "ct_scan_id": ct_id, "name": "PTV" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, plan) = t
        .post("/plans", json!({ "patient_id": "P1", "ct_scan_id": ct_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let plan_id = plan["plan"]["id"].as_i64().unwrap();

    let (status, _) = t.send(Method::DELETE, "/patients/P1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!t.dir.path().join("patientData/P1.json").exists());

    let (_, body) = t.get("/ct?patient_id=P1").await;
    assert_eq!(body["count"], 0);
    let (_, body) = t.get("/roi?patient_id=P1").await;
    assert_eq!(body["count"], 0);
    let (status, _) = t.get(&format!("/plans/{}", plan_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t.send(Method::DELETE, "/patients/P1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ct_requests() {
    let t = setup(true).await;
    let (status, body) = t.post("/ct", json!({ "dataset_name": "phantom" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "patient_id is required");

    t.post("/patients/create", json!({ "id": "P1", "name": "A" })).await;
    let (status, body) = t.post("/ct", json!({ "patient_id": "P1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Either dataset_name or DICOM files required");

    let (status, body) = t
        .post("/ct", json!({ "patient_id": "P1", "dataset_name": "missing" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Dataset missing not found");

    let (status, body) = t
        .post("/ct", json!({ "patient_id": "P1", "dataset_name": "phantom", "name": "Planning CT" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ct_scan"]["slice_count"], 12);

    let (status, _) = t.get("/ct?ct_scan_id=999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plan_lifecycle() {
    let t = setup(true).await;
    let ct_id = t.patient_with_ct("P1").await;
    let other_ct = t.patient_with_ct("P2").await;

    let (status, body) = t.post("/plans", json!({ "patient_id": "P1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "patient_id and ct_scan_id are required");

    let (status, body) = t
        .post("/plans", json!({ "patient_id": "P1", "ct_scan_id": other_ct }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "CT scan does not belong to this patient");

    let (status, body) = t
        .post(
            "/plans",
            json!({ "patient_id": "P1", "ct_scan_id": ct_id, "beam_names": ["A"], "gantry_angles": [0.0, 90.0] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, body) = t
        .post(
            "/plans",
            json!({ "patient_id": "P1", "ct_scan_id": ct_id, "plan_name": "Prostate", "gantry_angles": [0.0, 180.0] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["plan"]["beam_names"], json!(["Beam1", "Beam2"]));
    assert_eq!(body["plan"]["couch_angles"], json!([0.0, 0.0]));
    let plan_id = body["plan"]["id"].as_i64().unwrap();

    let (status, body) = t
        .send(Method::PUT, &format!("/plans/{}", plan_id), Some(json!({ "plan_name": "Renamed" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"]["plan_name"], "Renamed");

    let (status, body) = t.get(&format!("/plans/{}", plan_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"]["dose_results"], json!([]));

    let (_, body) = t.get("/plans?patient_id=P1").await;
    assert_eq!(body["count"], 1);

    let (status, body) = t.send(Method::DELETE, &format!("/plans/{}", plan_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Plan 'Renamed' deleted successfully");

    let (status, body) = t.get("/plans/424242").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Plan with ID 424242 not found");
}

#[tokio::test]
async fn test_slice_views_and_roi_creation() {
    let t = setup(true).await;
    let ct_id = t.patient_with_ct("P1").await;

    let (status, body) = t.get(&format!("/ct/{}/slice/5", ct_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["view"], "axial");
    assert_eq!(body["total_slices"], 12);
    assert_eq!(body["dimensions"], json!({ "width": 20, "height": 16 }));
    assert_eq!(body["ct_slice"].as_array().unwrap().len(), 16);
    assert_eq!(body["roi_contours"][0]["name"], "PTV");
    assert!(body["dose_slice"].is_null());

    // 轮廓内体素 (x=8, y=7)
    let mask = &body["mask_slice"];
    assert_eq!(mask[7][8], 1);
    assert_eq!(mask[0][0], 0);

    // RTSTRUCT 中的结构已登记为 ROI，按名称分类
    let (_, rois) = t.get(&format!("/roi?ct_scan_id={}", ct_id)).await;
    assert_eq!(rois["count"], 2);
    let nerve = rois["rois"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "Optic Nerve")
        .unwrap()
        .clone();
    assert_eq!(nerve["roi_type"], "OAR");

    let (status, body) = t.get(&format!("/ct/{}/slice/3?view=coronal", ct_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_slices"], 16);
    assert_eq!(body["dimensions"], json!({ "width": 20, "height": 12 }));

    let (status, body) = t.get(&format!("/ct/{}/slice/19?view=sagittal", ct_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_slices"], 20);
    assert_eq!(body["dimensions"], json!({ "width": 16, "height": 12 }));

    let (status, _) = t.get(&format!("/ct/{}/slice/12", ct_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t.get("/ct/999/slice/0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // 二次访问不会重复创建
    t.get(&format!("/ct/{}/slice/0", ct_id)).await;
    let (_, rois) = t.get(&format!("/roi?ct_scan_id={}", ct_id)).await;
    assert_eq!(rois["count"], 2);
}

#[tokio::test]
async fn test_dose_computation() {
    let t = setup(true).await;
    let ct_id = t.patient_with_ct("P1").await;
    t.get(&format!("/ct/{}/slice/0", ct_id)).await;
    let ptv = t.roi_id(ct_id, "PTV").await;

    let (status, body) = t
        .post(
            "/dose",
            json!({ "patient_id": "P1", "ct_scan_id": ct_id, "plan_name": "Dose", "target_roi_id": ptv }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Dose computation completed");
    let result = &body["result"];
    assert_eq!(result["computation_status"], "completed");
    assert_eq!(result["roi_id"], ptv);
    let d95 = result["d95"].as_f64().unwrap();
    let d5 = result["d5"].as_f64().unwrap();
    assert!(d95 > 0.0 && d95 <= d5);
    assert_eq!(result["dvh_data"]["dose_values"].as_array().unwrap().len(), 100);
    for key in ["dose_file_path", "dvh_file_path", "visualization_image_path"] {
        let path = result[key].as_str().unwrap();
        assert!(Path::new(path).exists(), "{} missing", key);
    }
    let plan_id = result["plan_id"].as_i64().unwrap();

    let (_, results) = t.get(&format!("/results?plan_id={}", plan_id)).await;
    assert_eq!(results["count"], 1);
    let (_, results) = t.get("/results?patient_id=P1").await;
    assert_eq!(results["count"], 1);

    // 切片接口带出剂量
    let (_, slice) = t.get(&format!("/ct/{}/slice/5", ct_id)).await;
    assert_eq!(slice["dose_slice"].as_array().unwrap().len(), 16);

    let image = Path::new(result["visualization_image_path"].as_str().unwrap())
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    let (status, png) = t.raw(&format!("/get_image?image={}", image)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&png[1..4], b"PNG");

    // 复用已有计划
    let (status, body) = t.post("/dose", json!({ "plan_id": plan_id })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["plan_id"], plan_id);

    let (status, _) = t.post("/dose", json!({ "plan_id": 999 })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t.raw("/get_image?image=nothing.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dose_failure_is_recorded() {
    let t = setup_with(Some(Arc::new(FailingEngine)), FakeLoader::default()).await;
    let ct_id = t.patient_with_ct("P1").await;

    let (status, body) = t.post("/dose", json!({ "patient_id": "P1", "ct_scan_id": ct_id })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("beam model unavailable"));

    let (_, results) = t.get(&format!("/results?ct_scan_id={}", ct_id)).await;
    assert_eq!(results["count"], 1);
    let result = &results["results"][0];
    assert_eq!(result["computation_status"], "failed");
    assert!(result["error_message"].as_str().unwrap().contains("beam model unavailable"));
    assert!(result["dose_file_path"].is_null());

    // 失败结果不提供剂量切片
    let (_, slice) = t.get(&format!("/ct/{}/slice/5", ct_id)).await;
    assert!(slice["dose_slice"].is_null());
}

#[tokio::test]
async fn test_ct_delete_cascades() {
    let t = setup(true).await;
    let ct_id = t.patient_with_ct("P1").await;
    t.get(&format!("/ct/{}/slice/0", ct_id)).await;
    let ptv = t.roi_id(ct_id, "PTV").await;

    let (status, body) = t
        .post("/dose", json!({ "patient_id": "P1", "ct_scan_id": ct_id, "target_roi_id": ptv }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let plan_id = body["result"]["plan_id"].as_i64().unwrap();
    assert!(t.state.doses.get(&ct_id).await.is_some());

    let (status, body) = t.send(Method::DELETE, &format!("/ct/{}", ct_id), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(t.state.doses.get(&ct_id).await.is_none());

    let (status, _) = t.get(&format!("/ct?ct_scan_id={}", ct_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, rois) = t.get(&format!("/roi?ct_scan_id={}", ct_id)).await;
    assert_eq!(rois["count"], 0);
    let (status, _) = t.get(&format!("/plans/{}", plan_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, results) = t.get(&format!("/results?ct_scan_id={}", ct_id)).await;
    assert_eq!(results["count"], 0);

    let (status, _) = t.send(Method::DELETE, &format!("/ct/{}", ct_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_roi_delete_clears_plan_target() {
    let t = setup(true).await;
    let ct_id = t.patient_with_ct("P1").await;
    let (status, body) = t
        .post("/roi", json!({ "patient_id": "P1", "ct_scan_id": ct_id, "name": "Boost" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let roi_id = body["roi"]["id"].as_i64().unwrap();

    let (_, plan) = t
        .post("/plans", json!({ "patient_id": "P1", "ct_scan_id": ct_id, "target_roi_id": roi_id }))
        .await;
    let plan_id = plan["plan"]["id"].as_i64().unwrap();
    assert_eq!(plan["plan"]["target_roi_id"], roi_id);

    let (status, body) = t.send(Method::DELETE, &format!("/roi/{}", roi_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "ROI 'Boost' deleted successfully");

    let (_, rois) = t.get(&format!("/roi?ct_scan_id={}", ct_id)).await;
    assert!(rois["rois"].as_array().unwrap().iter().all(|r| r["id"] != roi_id));
    let (_, plan) = t.get(&format!("/plans/{}", plan_id)).await;
    assert!(plan["plan"]["target_roi_id"].is_null());

    let (status, body) = t.send(Method::DELETE, &format!("/roi/{}", roi_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], format!("ROI with ID {} not found", roi_id));
}

#[tokio::test]
async fn test_slice_prefers_dataset_dose() {
    let engine: Arc<dyn DoseEngine> = Arc::new(AnalyticalDoseEngine::new(60.0));
    let t = setup_with(Some(engine), FakeLoader { dose: Some(7.5) }).await;
    let ct_id = t.patient_with_ct("P1").await;
    t.get(&format!("/ct/{}/slice/0", ct_id)).await;
    let ptv = t.roi_id(ct_id, "PTV").await;

    // 已有完成的剂量结果，切片仍取数据集 RTDOSE
    let (status, _) = t
        .post("/dose", json!({ "patient_id": "P1", "ct_scan_id": ct_id, "target_roi_id": ptv }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, slice) = t.get(&format!("/ct/{}/slice/5", ct_id)).await;
    assert_eq!(status, StatusCode::OK);
    let rows = slice["dose_slice"].as_array().unwrap();
    assert_eq!(rows.len(), 16);
    for row in rows {
        for value in row.as_array().unwrap() {
            assert!((value.as_f64().unwrap() - 7.5).abs() < 1e-4, "{}", value);
        }
    }
}

#[tokio::test]
async fn test_engine_disabled() {
    let t = setup(false).await;
    let ct_id = t.patient_with_ct("P1").await;

    let (status, body) = t.post("/dose", json!({ "patient_id": "P1", "ct_scan_id": ct_id })).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Dose computation is not available");

    let (status, _) = t.get("/tutorial/compute_dose?size=20").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, results) = t.get("/results").await;
    assert_eq!(results["count"], 0);
}

#[tokio::test]
async fn test_tutorial_phantom() {
    let t = setup(true).await;
    let (status, body) = t.get("/tutorial/compute_dose?size=30").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Dose Computation Completed!");
    assert_eq!(body["ct_slice"].as_array().unwrap().len(), 30);
    assert!(body["d95"].as_f64().unwrap() > 0.0);
    assert!(t.dir.path().join("Output/SimpleDose.png").exists());

    let (status, _) = t.raw("/get_image").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_plotly_tutorial_returns_outline() {
    let t = setup(true).await;
    let (status, filled) = t.get("/tutorial/compute_dose?size=30").await;
    assert_eq!(status, StatusCode::OK);
    let (status, outline) = t.get("/plotly/compute_dose?size=30").await;
    assert_eq!(status, StatusCode::OK, "{}", outline);
    assert_eq!(outline["message"], "Dose Computation Completed!");
    assert_eq!(outline["slice_num"], filled["slice_num"]);

    let cells = |body: &Value| -> Vec<u64> {
        body["mask_slice"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|row| row.as_array().unwrap().iter().map(|v| v.as_u64().unwrap()))
            .collect()
    };
    let (filled, outline) = (cells(&filled), cells(&outline));
    assert_eq!(filled.len(), outline.len());
    let (filled_count, outline_count) = (filled.iter().sum::<u64>(), outline.iter().sum::<u64>());
    assert!(outline_count > 0 && outline_count < filled_count);
    // 轮廓像素均位于实心掩膜内
    assert!(filled.iter().zip(&outline).all(|(f, o)| *o <= *f));

    let (status, png) = t.raw("/plotly/get_image").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&png[1..4], b"PNG");
}

#[tokio::test]
async fn test_datasets_and_upload() {
    let t = setup(true).await;
    let (_, body) = t.get("/load_data/datasets").await;
    assert_eq!(body["datasets"], json!(["phantom"]));

    let (status, body) = t.get("/load_data/phantom").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roi_names"], json!(["PTV", "Optic Nerve"]));
    assert_eq!(body["message"], "phantom loaded successfully!");

    let (_, body) = t.get("/load_data/datasets/phantom/rois").await;
    assert_eq!(body["roi_names"][0], "PTV");

    let (status, _) = t.get("/load_data/..").await;
    assert_ne!(status, StatusCode::OK);

    let boundary = "radiateboundary";
    let multipart = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"dicom_folder\"; filename=\"case/ct1.dcm\"\r\n\
         Content-Type: application/dicom\r\n\r\nDICM\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/uploads/upload_dicom")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(multipart))
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(t.dir.path().join("uploads/dicom_temp/ct1.dcm").exists());
}

#[tokio::test]
async fn test_static_frontend() {
    let t = setup(true).await;
    let (status, body) = t.raw("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<html>index</html>");

    let (status, _) = t.raw("/js/app.js").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t.raw("/dashboard.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = t.raw("/unknown.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = t.raw("/patients/unknown/route").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
