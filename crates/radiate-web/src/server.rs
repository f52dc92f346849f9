//! Web服务器

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use radiate_core::{Result, TpsError};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers::{ct, datasets, dose, health, patients, patients_root, plans, roi, test_route, tutorial};
use crate::state::AppState;
use crate::static_files::{self, HTML_PAGES};

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: Arc<AppState>) -> Self {
        let app = create_app(state);

        Self { addr, app }
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| TpsError::Internal(format!("Failed to start web server: {}", e)))?;

        Ok(())
    }
}

/// 组装全部路由与中间件
pub fn create_app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_body_bytes;

    let mut router = Router::new()
        // 存活与健康检查
        .route("/test", get(test_route))
        .route("/health", get(health))
        .merge(patient_routes())
        .merge(ct_routes())
        .merge(plan_routes())
        .merge(dose_routes())
        .merge(dataset_routes())
        // 前端
        .route("/", get(static_files::index));
    for page in HTML_PAGES {
        router = router.route(&format!("/{}.html", page), get(static_files::html_page));
    }

    router
        .fallback(static_files::fallback)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
}

/// 患者路由
fn patient_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/patients", get(patients_root).post(patients_root))
        .route("/patients/create", post(patients::create_patient))
        .route("/patients/load", get(patients::load_patients))
        .route(
            "/patients/:id",
            get(patients::get_patient).delete(patients::delete_patient),
        )
}

/// CT 与 ROI 路由
fn ct_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ct", post(ct::create_ct).get(ct::list_ct))
        .route("/ct/:id", delete(ct::delete_ct))
        .route("/ct/:id/slice/:slice_num", get(ct::get_slice))
        .route("/roi", post(roi::create_roi).get(roi::list_rois))
        .route("/roi/:id", delete(roi::delete_roi))
}

/// 治疗计划路由
fn plan_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/plans", post(plans::create_plan).get(plans::list_plans))
        .route(
            "/plans/:id",
            get(plans::get_plan)
                .put(plans::update_plan)
                .delete(plans::delete_plan),
        )
}

/// 剂量计算与结果路由
fn dose_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dose", post(dose::compute_dose))
        .route("/results", get(dose::list_results))
        .route("/get_image", get(dose::get_image))
        .route("/tutorial/compute_dose", get(tutorial::compute_dose))
        .route("/tutorial/get_image", get(dose::get_image))
        .route("/plotly/compute_dose", get(tutorial::plotly_compute_dose))
        .route("/plotly/get_image", get(dose::get_image))
}

/// 数据集与上传路由
fn dataset_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/load_data/datasets", get(datasets::list_datasets))
        .route("/load_data/:dataset", get(datasets::load_dataset_info))
        .route("/load_data/datasets/:dataset/rois", get(datasets::dataset_rois))
        .route("/uploads/upload_dicom", post(datasets::upload_dicom))
}
